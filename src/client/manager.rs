//! Shared hub connection for dashboard clients.
//!
//! Provides a single WebSocket connection multiplexed across every panel in
//! the client process. Handles:
//!
//! - One transport for all subscriptions (first subscriber opens a channel,
//!   last unsubscriber closes it)
//! - Routing pushed `data` frames to the channel's local callbacks
//! - Automatic reconnection with exponential backoff
//! - Re-subscription of every active channel after reconnect
//! - Connection state listeners
//!
//! The manager is an explicit object shared via `Arc`, not a process global.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::backoff::Backoff;
use super::ClientError;
use crate::websocket::{ClientMessage, ServerMessage};

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Callback invoked with `(data, timestamp_ms)` for every push on a channel
pub type DataCallback = Arc<dyn Fn(&Value, i64) + Send + Sync>;

/// Callback invoked with `true` on open and `false` on close
pub type ConnectionListener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Options for the hub connection
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// WebSocket URL, e.g. `ws://localhost:3001/ws`
    pub url: String,
    pub backoff: Backoff,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the public handle and the transport task
struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Outbound queue of the live transport, if any
    link: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    /// Channel → local callbacks
    subscriptions: Mutex<HashMap<String, Vec<(u64, DataCallback)>>>,
    listeners: Mutex<Vec<ConnectionListener>>,
    next_callback_id: AtomicU64,
    attempts: AtomicU32,
    client_id: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            link: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            attempts: AtomicU32::new(0),
            client_id: Mutex::new(None),
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.link)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Queue a message on the live transport. Returns false when not open.
    fn send(&self, message: ClientMessage) -> bool {
        match lock(&self.link).as_ref() {
            Some(tx) if !tx.is_closed() => tx.send(message).is_ok(),
            _ => false,
        }
    }

    fn add_callback(&self, channel: &str, callback: DataCallback) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);

        let mut subscriptions = lock(&self.subscriptions);
        let entry = subscriptions.entry(channel.to_string()).or_default();
        let first = entry.is_empty();
        entry.push((id, callback));

        // Not open: the post-reconnect re-subscribe picks this channel up
        if first
            && self.send(ClientMessage::Subscribe {
                channels: vec![channel.to_string()],
            })
        {
            tracing::debug!(channel = %channel, "Subscribe sent");
        }

        id
    }

    fn remove_callback(&self, channel: &str, id: u64) {
        let mut subscriptions = lock(&self.subscriptions);
        let Some(entry) = subscriptions.get_mut(channel) else {
            return;
        };

        entry.retain(|(callback_id, _)| *callback_id != id);
        if entry.is_empty() {
            subscriptions.remove(channel);
            if self.send(ClientMessage::Unsubscribe {
                channels: vec![channel.to_string()],
            }) {
                tracing::debug!(channel = %channel, "Unsubscribe sent");
            }
        }
    }

    fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = lock(&self.subscriptions).keys().cloned().collect();
        channels.sort();
        channels
    }

    fn on_open(&self, link: mpsc::UnboundedSender<ClientMessage>) {
        self.attempts.store(0, Ordering::SeqCst);

        {
            // Held so no subscribe can slip between attach and re-subscribe
            let subscriptions = lock(&self.subscriptions);
            *lock(&self.link) = Some(link);

            let mut channels: Vec<String> = subscriptions.keys().cloned().collect();
            if !channels.is_empty() {
                channels.sort();
                tracing::info!(channels = ?channels, "Re-subscribing active channels");
                self.send(ClientMessage::Subscribe { channels });
            }
        }

        self.state.send_replace(ConnectionState::Connected);
        self.notify(true);
    }

    fn on_close(&self) {
        let was_open = lock(&self.link).take().is_some();
        *lock(&self.client_id) = None;
        self.state.send_replace(ConnectionState::Disconnected);

        if was_open {
            self.notify(false);
        }
    }

    fn notify(&self, connected: bool) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener(connected);
        }
    }

    /// Route one inbound text frame
    fn dispatch(&self, text: &str) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse server message");
                return;
            }
        };

        match message {
            ServerMessage::Data {
                channel,
                data,
                timestamp,
            } => {
                // Callbacks run outside the lock so they may subscribe or unsubscribe
                let callbacks: Vec<DataCallback> = match lock(&self.subscriptions).get(&channel) {
                    Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                    None => return,
                };
                for callback in callbacks {
                    callback(&data, timestamp);
                }
            }
            ServerMessage::Connected {
                client_id,
                channels,
            } => {
                tracing::debug!(
                    client_id = %client_id,
                    available = channels.len(),
                    "Hub acknowledged connection"
                );
                *lock(&self.client_id) = Some(client_id);
            }
            ServerMessage::Subscribed { channels, invalid } => {
                tracing::debug!(channels = ?channels, "Subscription confirmed");
                if !invalid.is_empty() {
                    tracing::warn!(invalid = ?invalid, "Hub rejected unknown channels");
                }
            }
            ServerMessage::Unsubscribed { channels } => {
                tracing::debug!(channels = ?channels, "Unsubscription confirmed");
            }
            ServerMessage::Error { message, code } => {
                tracing::warn!(code = ?code, message = %message, "Hub reported an error");
            }
            ServerMessage::Pong { timestamp } => {
                tracing::trace!(timestamp, "Pong");
            }
        }
    }
}

/// One shared, self-healing connection to the broadcast hub
pub struct ConnectionManager {
    options: ClientOptions,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(options: ClientOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            options,
            shared: Arc::new(Shared::new()),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Start the transport task. No-op while connecting, open, or waiting
    /// to reconnect.
    pub fn connect(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        self.shutdown.send_replace(false);
        *task = Some(tokio::spawn(run_transport(
            Arc::clone(&self.shared),
            self.options.clone(),
            self.shutdown.subscribe(),
        )));
    }

    /// Close the transport and stop reconnecting
    pub async fn disconnect(&self) {
        self.shutdown.send_replace(true);
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every connection state transition
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Register a listener called with `true` on open and `false` on close
    pub fn on_connection_change<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).push(Arc::new(listener));
    }

    /// Add a callback for a channel.
    ///
    /// The first callback for a channel sends `subscribe` when the transport
    /// is open. Dropping or unsubscribing the returned handle removes the
    /// callback; removing the last one sends `unsubscribe`.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value, i64) + Send + Sync + 'static,
    {
        let id = self.shared.add_callback(channel, Arc::new(callback));
        SubscriptionHandle {
            shared: Arc::downgrade(&self.shared),
            channel: channel.to_string(),
            id,
            active: true,
        }
    }

    /// Channels with at least one local callback, sorted
    pub fn active_channels(&self) -> Vec<String> {
        self.shared.active_channels()
    }

    /// Failed or closed cycles since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Id assigned by the hub for the current connection
    pub fn client_id(&self) -> Option<String> {
        lock(&self.shared.client_id).clone()
    }

    /// Send an application-level ping. Returns false when not open.
    pub fn ping(&self) -> bool {
        self.shared.send(ClientMessage::Ping)
    }

    #[cfg(test)]
    pub(crate) fn attach_link(&self, link: mpsc::UnboundedSender<ClientMessage>) {
        self.shared.on_open(link);
    }

    #[cfg(test)]
    pub(crate) fn detach_link(&self) {
        self.shared.on_close();
    }

    #[cfg(test)]
    pub(crate) fn deliver(&self, text: &str) {
        self.shared.dispatch(text);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

/// Registration of one callback on one channel
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriptionHandle {
    shared: Weak<Shared>,
    channel: String,
    id: u64,
    active: bool,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the callback now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_callback(&self.channel, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

async fn open_socket(options: &ClientOptions) -> Result<WebSocketStream, ClientError> {
    let connect = tokio_tungstenite::connect_async(options.url.as_str());

    match tokio::time::timeout(options.connect_timeout, connect).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(ClientError::WebSocket(e.to_string())),
        Err(_) => Err(ClientError::Timeout(options.connect_timeout)),
    }
}

async fn run_transport(
    shared: Arc<Shared>,
    options: ClientOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.state.send_replace(ConnectionState::Connecting);

        match open_socket(&options).await {
            Ok(socket) => {
                tracing::info!(url = %options.url, "Connected to dashboard hub");
                let stopped = pump(&shared, socket, &mut shutdown).await;
                shared.on_close();
                if stopped {
                    return;
                }
                tracing::info!(url = %options.url, "Connection to dashboard hub lost");
            }
            Err(e) => {
                shared.state.send_replace(ConnectionState::Disconnected);
                tracing::warn!(url = %options.url, error = %e, "Connection attempt failed");
            }
        }

        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = options.backoff.delay(attempt);
        tracing::info!(
            "Attempting reconnection in {}ms (attempt {})",
            delay.as_millis(),
            attempt + 1
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.state.send_replace(ConnectionState::Disconnected);
}

/// Pump frames until the socket closes. Returns true when stopped by shutdown.
async fn pump(
    shared: &Shared,
    socket: WebSocketStream,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    shared.on_open(tx);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return true;
            }
            outbound = rx.recv() => {
                let Some(message) = outbound else {
                    return false;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize client message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    return false;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Binary(bytes))) => {
                    shared.dispatch(&String::from_utf8_lossy(&bytes))
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "Server closed connection");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return false;
                }
                None => return false,
            }
        }
    }
}
