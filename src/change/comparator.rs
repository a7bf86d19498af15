//! Per-channel significance comparators
//!
//! Each comparator answers one question: given the last broadcast value and
//! a freshly fetched one, is the difference worth pushing? Field locations
//! are JSON pointers (`/cpu/load`) or plain object keys for list items.

use serde_json::Value;

/// Fixed top-N size for ranked lists
pub const RANKED_TOP_N: usize = 5;

/// Fixed absolute margin (percentage points) for ranked lists
pub const RANKED_MARGIN: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    /// Any structural difference is significant
    Structural,

    /// Numeric fields compared against `threshold * 100` points
    Scalar { fields: Vec<String> },

    /// Array of interfaces keyed by `key`, combined rate is the sum of `rates`
    InterfaceRates { key: String, rates: Vec<String> },

    /// Ordered list (at pointer `list`) whose top entries are tracked
    RankedList {
        list: String,
        key: String,
        metric: String,
        top_n: usize,
        margin: f64,
    },

    /// Array of resources keyed by `key` with a usage percentage
    ResourceArray { key: String, usage: String },

    /// Order-independent set of `{key}:{state}` pairs
    Membership { key: String, state: String },
}

impl Comparator {
    pub fn scalar<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Comparator::Scalar {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn interface_rates<I, S>(key: impl Into<String>, rates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Comparator::InterfaceRates {
            key: key.into(),
            rates: rates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ranked_list(
        list: impl Into<String>,
        key: impl Into<String>,
        metric: impl Into<String>,
    ) -> Self {
        Comparator::RankedList {
            list: list.into(),
            key: key.into(),
            metric: metric.into(),
            top_n: RANKED_TOP_N,
            margin: RANKED_MARGIN,
        }
    }

    pub fn resource_array(key: impl Into<String>, usage: impl Into<String>) -> Self {
        Comparator::ResourceArray {
            key: key.into(),
            usage: usage.into(),
        }
    }

    pub fn membership(key: impl Into<String>, state: impl Into<String>) -> Self {
        Comparator::Membership {
            key: key.into(),
            state: state.into(),
        }
    }

    /// Decide whether `next` differs significantly from `prev`
    pub fn is_significant(&self, prev: &Value, next: &Value, threshold: f64) -> bool {
        match self {
            Comparator::Structural => prev != next,
            Comparator::Scalar { fields } => scalar_changed(prev, next, fields, threshold),
            Comparator::InterfaceRates { key, rates } => {
                interface_rates_changed(prev, next, key, rates, threshold)
            }
            Comparator::RankedList {
                list,
                key,
                metric,
                top_n,
                margin,
            } => ranked_list_changed(prev, next, list, key, metric, *top_n, *margin),
            Comparator::ResourceArray { key, usage } => {
                resource_array_changed(prev, next, key, usage, threshold)
            }
            Comparator::Membership { key, state } => membership_changed(prev, next, key, state),
        }
    }
}

fn number_at(value: &Value, pointer: &str) -> Option<f64> {
    value.pointer(pointer).and_then(Value::as_f64)
}

fn field_f64(item: &Value, field: &str) -> f64 {
    item.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

fn key_string(item: &Value, field: &str) -> String {
    match item.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn scalar_changed(prev: &Value, next: &Value, fields: &[String], threshold: f64) -> bool {
    let limit = threshold * 100.0;

    for field in fields {
        let Some(old) = number_at(prev, field) else {
            return true;
        };
        let Some(new) = number_at(next, field) else {
            return true;
        };
        if (new - old).abs() > limit {
            return true;
        }
    }

    false
}

fn interface_rates_changed(
    prev: &Value,
    next: &Value,
    key: &str,
    rates: &[String],
    threshold: f64,
) -> bool {
    let (Some(prev), Some(next)) = (prev.as_array(), next.as_array()) else {
        return prev != next;
    };

    // Positional comparison: a reordered enumeration counts as a change.
    if prev.len() != next.len() {
        return true;
    }
    if prev.iter().zip(next).any(|(p, n)| p.get(key) != n.get(key)) {
        return true;
    }

    let combined = |item: &Value| rates.iter().map(|r| field_f64(item, r)).sum::<f64>();

    for (p, n) in prev.iter().zip(next) {
        let old = combined(p);
        let new = combined(n);

        if old == 0.0 {
            if new > 0.0 {
                return true;
            }
        } else if old > 0.0 && ((new - old) / old).abs() > threshold {
            return true;
        }
    }

    false
}

fn ranked_list_changed(
    prev: &Value,
    next: &Value,
    list: &str,
    key: &str,
    metric: &str,
    top_n: usize,
    margin: f64,
) -> bool {
    let empty = Vec::new();
    let prev_items = prev.pointer(list).and_then(Value::as_array).unwrap_or(&empty);
    let next_items = next.pointer(list).and_then(Value::as_array).unwrap_or(&empty);

    let prev_top = &prev_items[..prev_items.len().min(top_n)];
    let next_top = &next_items[..next_items.len().min(top_n)];

    if prev_top.len() != next_top.len() {
        return true;
    }
    if prev_top
        .iter()
        .zip(next_top)
        .any(|(p, n)| p.get(key) != n.get(key))
    {
        return true;
    }

    prev_top
        .iter()
        .zip(next_top)
        .any(|(p, n)| (field_f64(n, metric) - field_f64(p, metric)).abs() > margin)
}

fn resource_array_changed(
    prev: &Value,
    next: &Value,
    key: &str,
    usage: &str,
    threshold: f64,
) -> bool {
    let (Some(prev), Some(next)) = (prev.as_array(), next.as_array()) else {
        return prev != next;
    };

    if prev.len() != next.len() {
        return true;
    }

    let limit = threshold * 100.0;
    prev.iter().zip(next).any(|(p, n)| {
        p.get(key) != n.get(key) || (field_f64(n, usage) - field_f64(p, usage)).abs() > limit
    })
}

fn membership_changed(prev: &Value, next: &Value, key: &str, state: &str) -> bool {
    let (Some(prev), Some(next)) = (prev.as_array(), next.as_array()) else {
        return prev != next;
    };

    if prev.len() != next.len() {
        return true;
    }

    let canonical = |items: &[Value]| {
        let mut pairs: Vec<String> = items
            .iter()
            .map(|item| format!("{}:{}", key_string(item, key), key_string(item, state)))
            .collect();
        pairs.sort();
        pairs.join(",")
    };

    canonical(prev) != canonical(next)
}
