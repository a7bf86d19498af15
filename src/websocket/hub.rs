//! Broadcast Hub
//!
//! Owns every WebSocket connection and drives one push loop per channel.
//!
//! A channel loop only fetches while at least one connection is subscribed
//! to it. Fetched data passes through the shared [`ChangeDetector`]; data
//! deemed significant is serialized once and fanned out to every subscribed
//! connection whose outbound queue is still open.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::messages::{ClientMessage, ErrorCode, ServerMessage};
use super::scheduler::ChannelScheduler;
use crate::change::ChangeDetector;
use crate::channels::ChannelRegistry;

/// Unique identifier for a WebSocket connection
pub type ConnectionId = String;

/// A serialized text frame queued for one connection
pub type Frame = Arc<str>;

/// Configuration for the broadcast hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
        }
    }
}

/// Per-connection state, owned exclusively by the hub
pub struct ConnectionHandle {
    /// Outbound queue drained by the connection's socket writer
    pub sender: mpsc::UnboundedSender<Frame>,
    /// Channels this connection is subscribed to
    pub subscriptions: HashSet<String>,
    pub connected_at: DateTime<Utc>,
}

/// Result of one scheduled channel tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Channel is not registered
    Unknown,
    /// No subscribers, fetch skipped
    Idle,
    /// Fetcher failed, tick skipped
    FetchFailed,
    /// Data not significant, nothing sent
    Unchanged,
    /// Data sent to this many connections
    Broadcast(usize),
}

/// Result of a subscribe request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOutcome {
    /// Registered channels from the request
    pub accepted: Vec<String>,
    /// Unregistered channels from the request
    pub invalid: Vec<String>,
    /// Accepted channels the connection was not already subscribed to
    pub added: Vec<String>,
}

/// Snapshot of hub activity
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    /// Channel name → number of subscribed connections
    pub channels: BTreeMap<String, usize>,
    pub running: bool,
}

/// Errors that can occur in the broadcast hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    pub fn rejection(&self) -> Option<ServerMessage> {
        match self {
            HubError::TooManyConnections(_) => Some(ServerMessage::Error {
                message: self.to_string(),
                code: ErrorCode::TooManyConnections,
            }),
            _ => None,
        }
    }
}

/// Manages connections, subscriptions and the per-channel push loops
pub struct BroadcastHub {
    registry: Arc<ChannelRegistry>,
    detector: ChangeDetector,
    /// Active connections: ConnectionId → ConnectionHandle
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    /// Present while the hub is running
    scheduler: Mutex<Option<ChannelScheduler>>,
    config: HubConfig,
}

impl BroadcastHub {
    pub fn new(registry: Arc<ChannelRegistry>, config: HubConfig) -> Self {
        let detector = ChangeDetector::from_registry(&registry);

        Self {
            registry,
            detector,
            connections: RwLock::new(HashMap::new()),
            scheduler: Mutex::new(None),
            config,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Arm one repeating task per registered channel. No-op when running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let mut scheduler = ChannelScheduler::new();
        for spec in self.registry.iter() {
            let name = spec.name.clone();
            scheduler.every(&spec.name, spec.interval, Arc::downgrade(self), move |hub| {
                let name = name.clone();
                async move {
                    hub.tick(&name).await;
                }
            });
        }

        tracing::info!(channels = scheduler.len(), "Broadcast hub started");
        *slot = Some(scheduler);
    }

    /// Cancel every channel task. Connections stay open.
    pub fn stop(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut scheduler) = scheduler {
            scheduler.shutdown();
            tracing::info!("Broadcast hub stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Register a new connection and queue its `connected` acknowledgment
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Result<ConnectionId, HubError> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        let connected = ServerMessage::Connected {
            client_id: id.clone(),
            channels: self.registry.names(),
        };
        let _ = sender.send(encode(&connected)?);

        connections.insert(
            id.clone(),
            ConnectionHandle {
                sender,
                subscriptions: HashSet::new(),
                connected_at: Utc::now(),
            },
        );

        tracing::info!(connection_id = %id, "WebSocket connected");
        Ok(id)
    }

    /// Discard a connection's state
    pub async fn unregister(&self, id: &str) {
        if self.connections.write().await.remove(id).is_some() {
            tracing::info!(connection_id = %id, "WebSocket disconnected");
        }
    }

    /// Add registered channels to a connection's subscription set
    pub async fn subscribe(
        &self,
        id: &str,
        channels: Vec<String>,
    ) -> Result<SubscribeOutcome, HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections.get_mut(id).ok_or(HubError::ConnectionNotFound)?;

        let mut outcome = SubscribeOutcome::default();
        for channel in channels {
            if !self.registry.contains(&channel) {
                tracing::warn!(connection_id = %id, channel = %channel, "Invalid channel ignored");
                outcome.invalid.push(channel);
                continue;
            }

            if handle.subscriptions.insert(channel.clone()) {
                outcome.added.push(channel.clone());
            }
            outcome.accepted.push(channel);
        }

        tracing::debug!(
            connection_id = %id,
            channels = ?outcome.accepted,
            "Subscribed to channels"
        );

        Ok(outcome)
    }

    /// Remove channels from a connection's subscription set
    pub async fn unsubscribe(&self, id: &str, channels: &[String]) -> Result<(), HubError> {
        let mut connections = self.connections.write().await;
        let handle = connections.get_mut(id).ok_or(HubError::ConnectionNotFound)?;

        for channel in channels {
            handle.subscriptions.remove(channel);
        }

        tracing::debug!(connection_id = %id, channels = ?channels, "Unsubscribed from channels");
        Ok(())
    }

    /// Handle one inbound text frame from a connection
    pub async fn handle_text(&self, id: &str, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_client_message(id, message).await,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Invalid client message");
                let _ = self.send_to(id, &ServerMessage::from(&e)).await;
            }
        }
    }

    async fn handle_client_message(&self, id: &str, message: ClientMessage) {
        match message {
            ClientMessage::Subscribe { channels } => match self.subscribe(id, channels).await {
                Ok(outcome) => {
                    let reply = ServerMessage::Subscribed {
                        channels: outcome.accepted,
                        invalid: outcome.invalid,
                    };
                    if self.send_to(id, &reply).await.is_err() {
                        return;
                    }
                    for channel in &outcome.added {
                        self.push_current(id, channel).await;
                    }
                }
                Err(e) => {
                    tracing::error!(connection_id = %id, error = %e, "Subscribe error");
                }
            },
            ClientMessage::Unsubscribe { channels } => {
                match self.unsubscribe(id, &channels).await {
                    Ok(()) => {
                        let _ = self
                            .send_to(id, &ServerMessage::Unsubscribed { channels })
                            .await;
                    }
                    Err(e) => {
                        tracing::error!(connection_id = %id, error = %e, "Unsubscribe error");
                    }
                }
            }
            ClientMessage::Ping => {
                let _ = self.send_to(id, &ServerMessage::pong()).await;
            }
        }
    }

    /// Fetch a channel out of band and push it to one connection only.
    ///
    /// Bypasses the change detector so a new subscriber sees data before the
    /// next scheduled tick.
    async fn push_current(&self, id: &str, channel: &str) {
        let Some(spec) = self.registry.get(channel) else {
            return;
        };

        match spec.fetcher.fetch().await {
            Ok(data) => {
                let _ = self.send_to(id, &ServerMessage::data(channel, data)).await;
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %id,
                    channel = %channel,
                    error = %e,
                    "Initial fetch failed"
                );
            }
        }
    }

    /// Run one scheduled tick for a channel
    pub async fn tick(&self, channel: &str) -> TickOutcome {
        let Some(spec) = self.registry.get(channel) else {
            return TickOutcome::Unknown;
        };

        if self.subscriber_count(channel).await == 0 {
            return TickOutcome::Idle;
        }

        let data = match spec.fetcher.fetch().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Fetch failed, skipping tick");
                return TickOutcome::FetchFailed;
            }
        };

        if !self
            .detector
            .has_significant_change(channel, &data, spec.threshold)
        {
            return TickOutcome::Unchanged;
        }

        let frame = match encode(&ServerMessage::data(channel, data)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Failed to serialize data");
                return TickOutcome::FetchFailed;
            }
        };

        let sent = self.broadcast_frame(channel, &frame).await;
        tracing::trace!(channel = %channel, subscribers = sent, "Broadcast channel data");
        TickOutcome::Broadcast(sent)
    }

    /// Send a pre-serialized frame to every open subscriber of a channel
    async fn broadcast_frame(&self, channel: &str, frame: &Frame) -> usize {
        let connections = self.connections.read().await;

        connections
            .values()
            .filter(|handle| handle.subscriptions.contains(channel))
            .filter(|handle| !handle.sender.is_closed())
            .filter(|handle| handle.sender.send(Arc::clone(frame)).is_ok())
            .count()
    }

    /// Send a message directly to a specific connection
    pub async fn send_to(&self, id: &str, message: &ServerMessage) -> Result<(), HubError> {
        let frame = encode(message)?;
        let connections = self.connections.read().await;
        let handle = connections.get(id).ok_or(HubError::ConnectionNotFound)?;

        handle.sender.send(frame).map_err(|_| HubError::SendFailed)
    }

    /// Get the current connection count
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections subscribed to a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|handle| handle.subscriptions.contains(channel))
            .count()
    }

    pub async fn stats(&self) -> HubStats {
        let connections = self.connections.read().await;

        let channels = self
            .registry
            .iter()
            .map(|spec| {
                let count = connections
                    .values()
                    .filter(|handle| handle.subscriptions.contains(&spec.name))
                    .count();
                (spec.name.clone(), count)
            })
            .collect();

        HubStats {
            connections: connections.len(),
            channels,
            running: self.is_running(),
        }
    }
}

fn encode(message: &ServerMessage) -> Result<Frame, HubError> {
    Ok(Arc::from(serde_json::to_string(message)?))
}
