#![allow(dead_code)]

use dashpulse::api::{serve_with_shutdown, ApiConfig, AppState};
use dashpulse::channels::{fetcher_fn, ChannelRegistry, FetchError, Fetcher};
use dashpulse::links::LinkStore;
use dashpulse::websocket::{BroadcastHub, HubConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<BroadcastHub>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(registry: ChannelRegistry) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::start_on(listener, registry)
    }

    pub fn start_on(listener: TcpListener, registry: ChannelRegistry) -> Self {
        let addr = listener.local_addr().unwrap();
        let hub = Arc::new(BroadcastHub::new(Arc::new(registry), HubConfig::default()));
        let links = Arc::new(LinkStore::in_memory().unwrap());
        let state = AppState::new(Arc::clone(&hub), links, ApiConfig::default());

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            serve_with_shutdown(listener, state, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            hub,
            shutdown: Some(tx),
            task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn connect(&self) -> Socket {
        let (socket, _) = tokio_tungstenite::connect_async(self.ws_url()).await.unwrap();
        socket
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), &mut self.task).await;
    }
}

/// Fetcher returning whatever the shared cell holds
pub fn cell_fetcher(initial: Value) -> (Arc<Mutex<Value>>, Arc<dyn Fetcher>) {
    let cell = Arc::new(Mutex::new(initial));
    let source = Arc::clone(&cell);
    let fetcher = fetcher_fn(move || {
        let value = source.lock().unwrap().clone();
        async move { Ok::<_, FetchError>(value) }
    });
    (cell, fetcher)
}

pub async fn send_json(socket: &mut Socket, text: &str) {
    socket.send(Message::Text(text.to_string())).await.unwrap();
}

/// Next JSON text frame, or `None` on timeout/close
pub async fn next_json(socket: &mut Socket, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        match tokio::time::timeout(remaining, socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Skip frames until one matches, or `None` on timeout
pub async fn wait_for<F>(socket: &mut Socket, wait: Duration, mut matches: F) -> Option<Value>
where
    F: FnMut(&Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
        let frame = next_json(socket, remaining).await?;
        if matches(&frame) {
            return Some(frame);
        }
    }
}

/// Collect every frame that arrives within `wait`
pub async fn drain(socket: &mut Socket, wait: Duration) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut frames = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) {
        match next_json(socket, remaining).await {
            Some(frame) => frames.push(frame),
            None => break,
        }
    }
    frames
}
