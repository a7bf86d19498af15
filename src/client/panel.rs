//! Panel data source
//!
//! Feeds one dashboard panel from one channel. Pushes arrive through the
//! shared [`ConnectionManager`] while it is connected; otherwise the panel
//! polls the REST endpoint for the same channel. Either way the panel sees
//! the same [`PanelSnapshot`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::manager::{ConnectionManager, ConnectionState, SubscriptionHandle};
use super::ClientError;
use crate::channels::standard_layout;

/// Polling interval for channels without a standard layout
const FALLBACK_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest polling period; zero would stall the driver
const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Polling,
    WebSocket,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelConfig {
    /// Requested mode. WebSocket degrades to polling while disconnected.
    pub mode: FetchMode,
    /// Polling period; the channel default when `None`
    pub polling_interval: Option<Duration>,
    pub enabled: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::WebSocket,
            polling_interval: None,
            enabled: true,
        }
    }
}

/// What a panel renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelSnapshot {
    pub data: Option<Value>,
    /// Message of the most recent failed fetch, cleared by the next success
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub loading: bool,
    /// Mode actually in use, `None` while disabled
    pub effective_mode: Option<FetchMode>,
}

impl PanelSnapshot {
    pub fn is_live(&self) -> bool {
        self.effective_mode == Some(FetchMode::WebSocket)
    }
}

/// Request/response source used while polling
#[async_trait]
pub trait RestSource: Send + Sync {
    async fn fetch(&self, channel: &str) -> Result<Value, ClientError>;
}

/// `GET {base_url}/api/v1/channels/{channel}`
pub struct HttpRestSource {
    client: Client,
    base_url: String,
}

impl HttpRestSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RestSource for HttpRestSource {
    async fn fetch(&self, channel: &str) -> Result<Value, ClientError> {
        let url = format!("{}/api/v1/channels/{}", self.base_url, channel);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Default polling period for a channel: its push interval
pub fn default_polling_interval(channel: &str) -> Duration {
    standard_layout(channel)
        .map(|layout| Duration::from_millis(layout.interval_ms))
        .unwrap_or(FALLBACK_POLLING_INTERVAL)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Data feed for one panel
pub struct PanelDataSource {
    channel: String,
    config: watch::Sender<PanelConfig>,
    snapshot: Arc<watch::Sender<PanelSnapshot>>,
    subscription: Arc<Mutex<Option<SubscriptionHandle>>>,
    task: JoinHandle<()>,
}

impl PanelDataSource {
    /// Spawn the feed. Must be called inside a tokio runtime.
    pub fn new(
        channel: impl Into<String>,
        manager: Arc<ConnectionManager>,
        rest: Arc<dyn RestSource>,
        config: PanelConfig,
    ) -> Self {
        let channel = channel.into();
        let (config_tx, config_rx) = watch::channel(config);
        let (snapshot_tx, _) = watch::channel(PanelSnapshot::default());
        let snapshot = Arc::new(snapshot_tx);
        let subscription = Arc::new(Mutex::new(None));

        let driver = Driver {
            channel: channel.clone(),
            manager,
            rest,
            snapshot: Arc::clone(&snapshot),
            subscription: Arc::clone(&subscription),
            ticker: None,
        };
        let task = tokio::spawn(driver.run(config_rx));

        Self {
            channel,
            config: config_tx,
            snapshot,
            subscription,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<PanelSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn config(&self) -> PanelConfig {
        self.config.borrow().clone()
    }

    pub fn set_config(&self, config: PanelConfig) {
        self.config.send_if_modified(|current| {
            let changed = *current != config;
            *current = config;
            changed
        });
    }

    pub fn set_mode(&self, mode: FetchMode) {
        self.set_config(PanelConfig {
            mode,
            ..self.config()
        });
    }

    pub fn set_polling_interval(&self, polling_interval: Option<Duration>) {
        self.set_config(PanelConfig {
            polling_interval,
            ..self.config()
        });
    }

    /// Disabling stops polling and pushes but keeps the last data
    pub fn set_enabled(&self, enabled: bool) {
        self.set_config(PanelConfig {
            enabled,
            ..self.config()
        });
    }

    /// Stop the feed and release the subscription
    pub fn close(self) {}
}

impl Drop for PanelDataSource {
    fn drop(&mut self) {
        self.task.abort();
        lock(&self.subscription).take();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Plan {
    mode: Option<FetchMode>,
    period: Duration,
}

enum Wake {
    Tick,
    /// `false` once the sender is gone
    Changed(bool),
}

struct Driver {
    channel: String,
    manager: Arc<ConnectionManager>,
    rest: Arc<dyn RestSource>,
    snapshot: Arc<watch::Sender<PanelSnapshot>>,
    subscription: Arc<Mutex<Option<SubscriptionHandle>>>,
    ticker: Option<Interval>,
}

impl Driver {
    async fn run(mut self, mut config_rx: watch::Receiver<PanelConfig>) {
        let mut state_rx = self.manager.connection_state();
        let mut current: Option<Plan> = None;

        loop {
            let plan = {
                let config = config_rx.borrow_and_update();
                let connected = *state_rx.borrow_and_update() == ConnectionState::Connected;
                self.plan(&config, connected)
            };

            if current != Some(plan) {
                let joined_existing = self.apply(plan);
                current = Some(plan);
                let empty = self.snapshot.borrow().data.is_none();
                if joined_existing && empty {
                    self.prime().await;
                }
            }

            let wake = tokio::select! {
                _ = next_tick(&mut self.ticker) => Wake::Tick,
                changed = config_rx.changed() => Wake::Changed(changed.is_ok()),
                changed = state_rx.changed() => Wake::Changed(changed.is_ok()),
            };

            match wake {
                Wake::Tick => self.poll_once().await,
                Wake::Changed(true) => {}
                Wake::Changed(false) => break,
            }
        }

        lock(&self.subscription).take();
    }

    fn plan(&self, config: &PanelConfig, connected: bool) -> Plan {
        let mode = match (config.enabled, config.mode, connected) {
            (false, _, _) => None,
            (true, FetchMode::WebSocket, true) => Some(FetchMode::WebSocket),
            (true, _, _) => Some(FetchMode::Polling),
        };
        let period = config
            .polling_interval
            .unwrap_or_else(|| default_polling_interval(&self.channel))
            .max(MIN_POLLING_INTERVAL);

        Plan { mode, period }
    }

    /// Returns true when the panel joined a push subscription the manager
    /// already carried, so no immediate push will follow.
    fn apply(&mut self, plan: Plan) -> bool {
        match plan.mode {
            None => {
                self.ticker = None;
                lock(&self.subscription).take();
                self.snapshot.send_modify(|s| {
                    s.loading = false;
                    s.effective_mode = None;
                });
                tracing::debug!(channel = %self.channel, "Panel disabled");
                false
            }
            Some(FetchMode::WebSocket) => {
                self.ticker = None;
                let joined_existing = self.ensure_subscribed();
                self.snapshot.send_modify(|s| {
                    s.loading = s.data.is_none();
                    s.effective_mode = Some(FetchMode::WebSocket);
                });
                tracing::debug!(channel = %self.channel, "Panel receiving pushes");
                joined_existing
            }
            Some(FetchMode::Polling) => {
                lock(&self.subscription).take();

                // First tick completes immediately
                let mut ticker = tokio::time::interval(plan.period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);

                self.snapshot.send_modify(|s| {
                    s.loading = true;
                    s.effective_mode = Some(FetchMode::Polling);
                });
                tracing::debug!(
                    channel = %self.channel,
                    period_ms = plan.period.as_millis() as u64,
                    "Panel polling"
                );
                false
            }
        }
    }

    /// Returns true if the channel was already active on the manager
    fn ensure_subscribed(&self) -> bool {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return false;
        }

        let already_active = self
            .manager
            .active_channels()
            .iter()
            .any(|c| c == &self.channel);

        let snapshot = Arc::clone(&self.snapshot);
        *subscription = Some(self.manager.subscribe(&self.channel, move |data, timestamp| {
            let when = Utc
                .timestamp_millis_opt(timestamp)
                .single()
                .unwrap_or_else(Utc::now);
            snapshot.send_modify(|s| {
                s.data = Some(data.clone());
                s.error = None;
                s.last_update = Some(when);
                s.loading = false;
            });
        }));
        already_active
    }

    /// One REST read for a panel that joined an existing push stream.
    /// Never overwrites data a push delivered meanwhile.
    async fn prime(&self) {
        match self.rest.fetch(&self.channel).await {
            Ok(data) => {
                self.snapshot.send_if_modified(|s| {
                    if s.data.is_some() {
                        return false;
                    }
                    s.data = Some(data);
                    s.error = None;
                    s.last_update = Some(Utc::now());
                    s.loading = false;
                    true
                });
            }
            Err(e) => {
                tracing::warn!(
                    channel = %self.channel,
                    error = %e,
                    "Panel initial fetch failed"
                );
                self.snapshot.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }
    }

    async fn poll_once(&self) {
        match self.rest.fetch(&self.channel).await {
            Ok(data) => {
                self.snapshot.send_modify(|s| {
                    s.data = Some(data);
                    s.error = None;
                    s.last_update = Some(Utc::now());
                    s.loading = false;
                });
            }
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "Panel fetch failed");
                self.snapshot.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::websocket::ClientMessage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RestSource for CountingSource {
        async fn fetch(&self, channel: &str) -> Result<Value, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClientError::Api {
                    status: 503,
                    message: "docker unavailable".to_string(),
                });
            }
            Ok(json!({ "channel": channel, "n": n }))
        }
    }

    fn manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(ClientOptions::new(
            "ws://127.0.0.1:1/ws",
        )))
    }

    fn polling(period_ms: u64) -> PanelConfig {
        PanelConfig {
            mode: FetchMode::Polling,
            polling_interval: Some(Duration::from_millis(period_ms)),
            enabled: true,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_default_polling_interval() {
        assert_eq!(
            default_polling_interval("metrics:network"),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            default_polling_interval("services"),
            Duration::from_millis(30_000)
        );
        assert_eq!(default_polling_interval("custom"), FALLBACK_POLLING_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_fetches_immediately_then_on_interval() {
        let source = CountingSource::new(false);
        let panel = PanelDataSource::new("services", manager(), source.clone(), polling(1_000));

        settle().await;
        assert_eq!(source.calls(), 1);
        let snapshot = panel.snapshot();
        assert_eq!(snapshot.data, Some(json!({ "channel": "services", "n": 0 })));
        assert_eq!(snapshot.effective_mode, Some(FetchMode::Polling));
        assert!(!snapshot.is_live());
        assert!(!snapshot.loading);
        assert!(snapshot.last_update.is_some());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_websocket_mode_degrades_while_disconnected() {
        let source = CountingSource::new(false);
        let manager = manager();
        let panel = PanelDataSource::new(
            "metrics:system",
            manager.clone(),
            source.clone(),
            PanelConfig::default(),
        );

        settle().await;
        assert_eq!(panel.snapshot().effective_mode, Some(FetchMode::Polling));
        assert_eq!(source.calls(), 1);
        assert!(manager.active_channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_websocket_mode_subscribes_when_connected() {
        let source = CountingSource::new(false);
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach_link(tx);

        let panel = PanelDataSource::new(
            "metrics:system",
            manager.clone(),
            source.clone(),
            PanelConfig::default(),
        );
        settle().await;

        assert_eq!(source.calls(), 0);
        assert_eq!(manager.active_channels(), vec!["metrics:system"]);
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Subscribe { .. })));
        assert!(panel.snapshot().loading);
        assert!(panel.snapshot().is_live());

        manager.deliver(concat!(
            r#"{"type":"data","channel":"metrics:system","#,
            r#""data":{"cpu":{"load":12}},"timestamp":1700000000000}"#,
        ));
        let snapshot = panel.snapshot();
        assert_eq!(snapshot.data, Some(json!({ "cpu": { "load": 12 } })));
        assert_eq!(
            snapshot.last_update.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
        assert!(!snapshot.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_polling_on_disconnect_and_back() {
        let source = CountingSource::new(false);
        let manager = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.attach_link(tx);

        let panel = PanelDataSource::new(
            "docker:info",
            manager.clone(),
            source.clone(),
            PanelConfig::default(),
        );
        settle().await;
        assert!(panel.snapshot().is_live());

        manager.detach_link();
        settle().await;
        assert_eq!(panel.snapshot().effective_mode, Some(FetchMode::Polling));
        assert_eq!(source.calls(), 1);
        assert!(manager.active_channels().is_empty());

        let (tx, _rx) = mpsc::unbounded_channel();
        manager.attach_link(tx);
        settle().await;
        assert!(panel.snapshot().is_live());
        assert_eq!(manager.active_channels(), vec!["docker:info"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_keeps_data_and_stops_polling() {
        let source = CountingSource::new(false);
        let panel = PanelDataSource::new("services", manager(), source.clone(), polling(1_000));
        settle().await;
        assert_eq!(source.calls(), 1);

        panel.set_enabled(false);
        settle().await;
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        let snapshot = panel.snapshot();
        assert_eq!(source.calls(), 1);
        assert!(snapshot.data.is_some());
        assert_eq!(snapshot.effective_mode, None);

        panel.set_enabled(true);
        settle().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_is_reported_on_panel() {
        let source = CountingSource::new(true);
        let panel = PanelDataSource::new(
            "docker:containers",
            manager(),
            source.clone(),
            polling(1_000),
        );
        settle().await;

        let snapshot = panel.snapshot();
        assert!(snapshot.data.is_none());
        assert!(!snapshot.loading);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("API error 503: docker unavailable")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unsubscribes() {
        let source = CountingSource::new(false);
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach_link(tx);

        let panel = PanelDataSource::new(
            "services",
            manager.clone(),
            source,
            PanelConfig::default(),
        );
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Subscribe { .. })));

        panel.close();
        assert!(manager.active_channels().is_empty());
        assert_eq!(
            rx.try_recv().ok(),
            Some(ClientMessage::Unsubscribe {
                channels: vec!["services".to_string()]
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_polling_interval_is_clamped() {
        let source = CountingSource::new(false);
        let panel = PanelDataSource::new(
            "services",
            manager(),
            source.clone(),
            PanelConfig {
                mode: FetchMode::Polling,
                polling_interval: Some(Duration::ZERO),
                enabled: true,
            },
        );

        settle().await;
        assert!(source.calls() >= 1);
        assert!(!panel.task.is_finished());
        assert_eq!(panel.snapshot().effective_mode, Some(FetchMode::Polling));
        assert!(panel.snapshot().data.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_to_polling_unsubscribes() {
        let source = CountingSource::new(false);
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach_link(tx);

        let panel = PanelDataSource::new(
            "docker:info",
            manager.clone(),
            source.clone(),
            PanelConfig::default(),
        );
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Subscribe { .. })));
        assert_eq!(source.calls(), 0);

        panel.set_mode(FetchMode::Polling);
        settle().await;

        assert_eq!(
            rx.try_recv().ok(),
            Some(ClientMessage::Unsubscribe {
                channels: vec!["docker:info".to_string()]
            })
        );
        assert!(rx.try_recv().is_err());
        assert!(manager.active_channels().is_empty());
        assert_eq!(source.calls(), 1);
        assert_eq!(panel.snapshot().effective_mode, Some(FetchMode::Polling));
        assert!(panel.snapshot().data.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_panel_on_active_channel_reads_once() {
        let source = CountingSource::new(false);
        let manager = manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach_link(tx);

        let first = PanelDataSource::new(
            "services",
            manager.clone(),
            source.clone(),
            PanelConfig::default(),
        );
        settle().await;
        assert_eq!(source.calls(), 0);
        assert!(first.snapshot().loading);

        let second = PanelDataSource::new(
            "services",
            manager.clone(),
            source.clone(),
            PanelConfig::default(),
        );
        settle().await;

        assert_eq!(source.calls(), 1);
        let snapshot = second.snapshot();
        assert!(snapshot.is_live());
        assert!(!snapshot.loading);
        assert_eq!(snapshot.data, Some(json!({ "channel": "services", "n": 0 })));

        // One wire subscribe for both panels
        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Subscribe { .. })));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 1);
    }
}
