use async_trait::async_trait;
use queue_relay::{
    MemoryBroker, ObserverHub, QueueHandler, QueueMessage, QueueMetrics, QueueRelay,
    ReferenceObject, RelayResult,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Deserialize)]
struct Entry {
    id: String,
}

/// Acks with the given reference type; malformed JSON is logged and left alone.
struct Typed {
    kind: &'static str,
    seen: mpsc::UnboundedSender<u64>,
}

#[async_trait]
impl QueueHandler for Typed {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()> {
        let _ = self.seen.send(message.delivery_tag());
        let entry: Entry = match message.parse_json() {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed entry");
                return Ok(());
            }
        };
        relay
            .ack_queue_message(message, Some(&ReferenceObject::new(self.kind, entry.id)))
            .await?;
        Ok(())
    }
}

fn relay(broker: &MemoryBroker) -> QueueRelay {
    QueueRelay::new(
        Arc::new(broker.clone()),
        Arc::new(QueueMetrics::new()),
        Arc::new(ObserverHub::new(32)),
    )
}

async fn next(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("observer update in time")
        .expect("observer channel open")
}

#[tokio::test]
async fn malformed_log_is_not_acked_and_other_listeners_keep_working() {
    let broker = MemoryBroker::new();
    let relay = relay(&broker);
    relay.connect().await.unwrap();

    let (log_seen_tx, mut log_seen) = mpsc::unbounded_channel();
    let (receipt_seen_tx, _receipt_seen) = mpsc::unbounded_channel();
    relay
        .listen_queue_topic("logs", Arc::new(Typed { kind: "log", seen: log_seen_tx }))
        .await
        .unwrap();
    relay
        .listen_queue_topic(
            "receipts",
            Arc::new(Typed {
                kind: "receipt",
                seen: receipt_seen_tx,
            }),
        )
        .await
        .unwrap();
    let (_, mut observer) = relay.observers().register();

    let bad = broker.publish("logs", "{not json").unwrap();
    let receipt = broker.publish("receipts", r#"{"id":"r-1"}"#).unwrap();
    let good = broker.publish("logs", r#"{"id":"l-1"}"#).unwrap();

    let mut updates = vec![next(&mut observer).await, next(&mut observer).await];
    updates.sort();
    assert_eq!(
        updates,
        vec![
            r#"{"type":"log","documentId":"l-1"}"#.to_string(),
            r#"{"type":"receipt","documentId":"r-1"}"#.to_string(),
        ]
    );

    // The malformed delivery reached its handler but was never acknowledged.
    let mut handled = vec![log_seen.recv().await.unwrap(), log_seen.recv().await.unwrap()];
    handled.sort();
    assert_eq!(handled, vec![bad, good]);

    let mut acked = broker.acked_tags();
    acked.sort();
    let mut expected = vec![receipt, good];
    expected.sort();
    assert_eq!(acked, expected);

    let status = relay.get_queue_status();
    assert_eq!(status.messages_by_topic["log"], 1);
    assert_eq!(status.messages_by_topic["receipt"], 1);
}

#[tokio::test]
async fn originator_does_not_receive_its_own_update() {
    let broker = MemoryBroker::new();
    let relay = relay(&broker);
    let (seen_tx, _seen) = mpsc::unbounded_channel();
    relay
        .listen_queue_topic("logs", Arc::new(Typed { kind: "log", seen: seen_tx }))
        .await
        .unwrap();
    relay.connect().await.unwrap();

    let (author, mut author_rx) = relay.observers().register();
    let (_, mut watcher_rx) = relay.observers().register();

    broker
        .publish_from("logs", r#"{"id":"mine"}"#, Some(author))
        .unwrap();

    assert_eq!(
        next(&mut watcher_rx).await,
        r#"{"type":"log","documentId":"mine"}"#
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(author_rx.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_acks_do_not_lose_increments() {
    let relay = QueueRelay::detached(Arc::new(QueueMetrics::new()), Arc::default());
    relay.connect().await.unwrap();

    let tasks: Vec<_> = (0..200u64)
        .map(|tag| {
            let relay = relay.clone();
            tokio::spawn(async move {
                let message = QueueMessage::new("receipts", tag, "{}");
                let reference = ReferenceObject::new("receipt", tag.to_string());
                // Two racing acks of the same message: only one may count.
                let (a, b) = tokio::join!(
                    relay.ack_queue_message(&message, Some(&reference)),
                    relay.ack_queue_message(&message, Some(&reference)),
                );
                assert!(a.unwrap() ^ b.unwrap());
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(relay.get_queue_status().messages_by_topic["receipt"], 200);
}
