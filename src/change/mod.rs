//! Change Detection
//!
//! Decides whether freshly fetched channel data is worth broadcasting.
//!
//! One detector serves every connection: the decision to push is made per
//! channel, not per client. The stored value for a channel is always the
//! last value that was actually broadcast, so a series of small drifts
//! accumulates until it crosses the threshold.

mod comparator;

pub use comparator::{Comparator, RANKED_MARGIN, RANKED_TOP_N};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::channels::{ChannelRegistry, Threshold};

/// Tracks the last broadcast value of every channel
#[derive(Debug, Default)]
pub struct ChangeDetector {
    /// Channel name → comparator used when the threshold is numeric
    comparators: HashMap<String, Comparator>,
    /// Channel name → last broadcast value
    last: Mutex<HashMap<String, Value>>,
}

impl ChangeDetector {
    /// Detector with no channel-specific comparators
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector using each registered channel's comparator
    pub fn from_registry(registry: &ChannelRegistry) -> Self {
        let comparators = registry
            .iter()
            .map(|spec| (spec.name.clone(), spec.comparator.clone()))
            .collect();

        Self {
            comparators,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when `data` should be broadcast for `channel`.
    ///
    /// The first observation of a channel is always significant. When this
    /// returns true, `data` becomes the stored value.
    pub fn has_significant_change(
        &self,
        channel: &str,
        data: &Value,
        threshold: Threshold,
    ) -> bool {
        let mut last = self.state();

        let significant = match last.get(channel) {
            None => true,
            Some(prev) => match threshold {
                Threshold::Always => prev != data,
                Threshold::Fraction(fraction) => self
                    .comparators
                    .get(channel)
                    .unwrap_or(&Comparator::Structural)
                    .is_significant(prev, data, fraction),
            },
        };

        if significant {
            last.insert(channel.to_string(), data.clone());
        }

        significant
    }

    /// Forget the stored value of one channel, or of all channels
    pub fn clear(&self, channel: Option<&str>) {
        let mut last = self.state();
        match channel {
            Some(name) => {
                last.remove(name);
            }
            None => last.clear(),
        }
    }

    /// Last broadcast value for a channel
    pub fn last_value(&self, channel: &str) -> Option<Value> {
        self.state().get(channel).cloned()
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
