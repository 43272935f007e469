use cloud_messaging::config::TopicConfig;
use cloud_messaging::register_handlers;
use domain_accounts::RecordingDispatcher;
use domain_ingest::InMemoryIngestRepository;
use queue_relay::{MemoryBroker, ObserverHub, QueueMetrics, QueueRelay};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn configured_topics_reach_their_handlers() {
    let topics = TopicConfig::default();
    let broker = MemoryBroker::new();
    let repo = Arc::new(InMemoryIngestRepository::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let relay = QueueRelay::new(
        Arc::new(broker.clone()),
        Arc::new(QueueMetrics::new()),
        Arc::new(ObserverHub::new(16)),
    );

    register_handlers(&relay, &topics, repo.clone(), dispatcher.clone())
        .await
        .unwrap();
    // Nothing is consumed before the session exists.
    assert_eq!(broker.connect_count(), 0);
    relay.connect().await.unwrap();

    broker
        .publish(&topics.logs, r#"{"action":"create","type":"entity","operator":"bo"}"#)
        .unwrap();
    broker
        .publish(&topics.emails, r#"{"event":"trial_started","email":"x@y.z"}"#)
        .unwrap();

    wait_for(|| broker.acked_tags().len() == 2).await;
    assert_eq!(repo.logs().len(), 1);
    assert_eq!(dispatcher.count("trial_started"), 1);

    relay.disconnect().await.unwrap();
    assert!(broker.is_closed());
}

#[tokio::test]
async fn originator_is_skipped_by_fan_out() {
    let topics = TopicConfig::default();
    let broker = MemoryBroker::new();
    let repo = Arc::new(InMemoryIngestRepository::new());
    let relay = QueueRelay::new(
        Arc::new(broker.clone()),
        Arc::new(QueueMetrics::new()),
        Arc::new(ObserverHub::new(16)),
    );
    register_handlers(&relay, &topics, repo, Arc::new(RecordingDispatcher::new()))
        .await
        .unwrap();
    relay.connect().await.unwrap();

    let (author, mut author_rx) = relay.observers().register();
    let (_, mut watcher_rx) = relay.observers().register();

    broker
        .publish_from(
            &topics.receipts,
            r#"{"client":"acme","service":"chat"}"#,
            Some(author),
        )
        .unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(2), watcher_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let update: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(update["type"], "receipt");
    assert!(update["documentId"].is_string());
    assert!(author_rx.try_recv().is_err());

    relay.disconnect().await.unwrap();
}
