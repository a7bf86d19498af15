mod common;

use common::{cell_fetcher, drain, next_json, send_json, wait_for, TestServer};
use dashpulse::change::Comparator;
use dashpulse::channels::{ChannelRegistry, ChannelSpec, StaticFetcher, Threshold};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_connect_ack_lists_channels() {
    let registry = ChannelRegistry::new()
        .with_channel(ChannelSpec::new(
            "services",
            Duration::from_secs(30),
            Threshold::Always,
            Arc::new(StaticFetcher::new(json!([]))),
        ))
        .with_channel(ChannelSpec::new(
            "docker:info",
            Duration::from_secs(5),
            Threshold::Always,
            Arc::new(StaticFetcher::new(json!({}))),
        ));
    let server = TestServer::start(registry).await;
    let mut socket = server.connect().await;

    let connected = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(connected["type"], "connected");
    assert!(connected["clientId"].is_string());
    assert_eq!(connected["channels"], json!(["services", "docker:info"]));

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_type_keeps_connection_usable() {
    let registry = ChannelRegistry::new().with_channel(ChannelSpec::new(
        "services",
        Duration::from_secs(30),
        Threshold::Always,
        Arc::new(StaticFetcher::new(json!([]))),
    ));
    let server = TestServer::start(registry).await;
    let mut socket = server.connect().await;
    next_json(&mut socket, WAIT).await.unwrap();

    send_json(&mut socket, r#"{"type":"unknown"}"#).await;
    let error = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "UNKNOWN_TYPE");
    assert!(error["message"].as_str().unwrap().contains("unknown"));

    send_json(&mut socket, "{not json").await;
    let error = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(error["code"], "INVALID_JSON");

    send_json(&mut socket, r#"{"type":"subscribe","channels":"services"}"#).await;
    let error = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(error["code"], "INVALID_CHANNELS");

    send_json(&mut socket, r#"{"type":"ping"}"#).await;
    let pong = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].is_i64());

    server.stop().await;
}

#[tokio::test]
async fn test_subscribe_confirms_then_pushes_immediately() {
    let registry = ChannelRegistry::new().with_channel(ChannelSpec::new(
        "services",
        Duration::from_secs(60),
        Threshold::Always,
        Arc::new(StaticFetcher::new(json!([{ "name": "Grafana" }]))),
    ));
    let server = TestServer::start(registry).await;
    let mut socket = server.connect().await;
    next_json(&mut socket, WAIT).await.unwrap();

    send_json(
        &mut socket,
        r#"{"type":"subscribe","channels":["services","bogus"]}"#,
    )
    .await;

    let subscribed = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["channels"], json!(["services"]));
    assert_eq!(subscribed["invalid"], json!(["bogus"]));

    let data = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(data["type"], "data");
    assert_eq!(data["channel"], "services");
    assert_eq!(data["data"], json!([{ "name": "Grafana" }]));
    assert!(data["timestamp"].is_i64());

    let stats = server.hub.stats().await;
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.channels["services"], 1);
    assert!(stats.running);

    send_json(&mut socket, r#"{"type":"unsubscribe","channels":["services"]}"#).await;
    let unsubscribed = next_json(&mut socket, WAIT).await.unwrap();
    assert_eq!(unsubscribed["type"], "unsubscribed");
    assert_eq!(server.hub.stats().await.channels["services"], 0);

    server.stop().await;
}

#[tokio::test]
async fn test_container_change_reaches_every_subscriber_only() {
    let (containers, fetcher) = cell_fetcher(json!([
        { "id": "a1", "name": "web", "state": "running" },
        { "id": "b2", "name": "db", "state": "running" }
    ]));
    let registry = ChannelRegistry::new()
        .with_channel(
            ChannelSpec::new(
                "docker:containers",
                Duration::from_millis(100),
                Threshold::Always,
                fetcher,
            )
            .comparator(Comparator::membership("id", "state")),
        )
        .with_channel(ChannelSpec::new(
            "services",
            Duration::from_secs(60),
            Threshold::Always,
            Arc::new(StaticFetcher::new(json!([]))),
        ));
    let server = TestServer::start(registry).await;

    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let mut c = server.connect().await;
    for socket in [&mut a, &mut b, &mut c] {
        next_json(socket, WAIT).await.unwrap();
    }

    for socket in [&mut a, &mut b] {
        send_json(socket, r#"{"type":"subscribe","channels":["docker:containers"]}"#).await;
    }
    send_json(&mut c, r#"{"type":"subscribe","channels":["services"]}"#).await;

    // Let the first tick record the baseline
    tokio::time::sleep(Duration::from_millis(400)).await;
    for socket in [&mut a, &mut b] {
        let frames = drain(socket, Duration::from_millis(100)).await;
        assert!(frames.iter().any(|f| f["type"] == "data"));
    }
    drain(&mut c, Duration::from_millis(100)).await;

    containers.lock().unwrap()[1]["state"] = json!("exited");

    for socket in [&mut a, &mut b] {
        let update = wait_for(socket, WAIT, |f| f["type"] == "data").await.unwrap();
        assert_eq!(update["channel"], "docker:containers");
        assert_eq!(update["data"][1]["state"], "exited");
    }

    let unrelated = drain(&mut c, Duration::from_millis(400)).await;
    assert!(unrelated
        .iter()
        .all(|f| f["channel"] != "docker:containers"));

    server.stop().await;
}

#[tokio::test]
async fn test_insignificant_change_is_not_pushed() {
    let (system, fetcher) = cell_fetcher(json!({ "cpu": 50, "mem": 60 }));
    let registry = ChannelRegistry::new().with_channel(
        ChannelSpec::new(
            "metrics:system",
            Duration::from_millis(100),
            Threshold::Fraction(0.05),
            fetcher,
        )
        .comparator(Comparator::scalar(["/cpu", "/mem"])),
    );
    let server = TestServer::start(registry).await;
    let mut socket = server.connect().await;
    next_json(&mut socket, WAIT).await.unwrap();

    send_json(&mut socket, r#"{"type":"subscribe","channels":["metrics:system"]}"#).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    drain(&mut socket, Duration::from_millis(100)).await;

    *system.lock().unwrap() = json!({ "cpu": 55, "mem": 60 });
    let quiet = drain(&mut socket, Duration::from_millis(400)).await;
    assert!(quiet.iter().all(|f| f["type"] != "data"));

    *system.lock().unwrap() = json!({ "cpu": 56, "mem": 60 });
    let update = wait_for(&mut socket, WAIT, |f| f["type"] == "data").await.unwrap();
    assert_eq!(update["data"]["cpu"], 56);

    server.stop().await;
}
