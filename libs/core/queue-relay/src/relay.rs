use chrono::Utc;
use database::{retry_with_backoff, RetryConfig};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use observability::RelayMetrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerConnector};
use crate::error::{RelayError, RelayResult};
use crate::handler::QueueHandler;
use crate::message::{QueueMessage, ReferenceObject};
use crate::metrics::{QueueMetrics, QueueStatus};
use crate::observers::ObserverHub;

#[derive(Clone)]
struct Subscription {
    topic: String,
    handler: Arc<dyn QueueHandler>,
}

#[derive(Default)]
struct Lifecycle {
    connected: bool,
    /// Set by `disconnect`; a lost session is not re-established after it
    closing: bool,
    /// Id of the newest broker session attempt, 0 before the first one
    session: u64,
    /// Subscriptions waiting for a broker session
    pending: Vec<Subscription>,
    /// Subscriptions attached to the current session
    active: Vec<Subscription>,
    consumers: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
struct Session {
    id: u64,
    broker: Arc<dyn Broker>,
}

struct Inner {
    /// `None` runs the relay detached: no broker is ever dialed.
    connector: Option<Arc<dyn BrokerConnector>>,
    session: RwLock<Option<Session>>,
    reconnect: RwLock<RetryConfig>,
    lifecycle: Mutex<Lifecycle>,
    metrics: Arc<QueueMetrics>,
    observers: Arc<ObserverHub>,
}

/// Bridges broker topics to in-process handlers.
///
/// Subscriptions may be registered before [`connect`](Self::connect); they
/// are queued and attached once the broker session exists. Every delivery
/// runs its handler in its own task.
///
/// When a consumer stream ends without [`disconnect`](Self::disconnect),
/// the session is considered lost: the relay goes offline, requeues its
/// subscriptions and reconnects with the policy set by
/// [`with_reconnect`](Self::with_reconnect) until it succeeds or is
/// disconnected.
#[derive(Clone)]
pub struct QueueRelay {
    inner: Arc<Inner>,
}

impl QueueRelay {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        metrics: Arc<QueueMetrics>,
        observers: Arc<ObserverHub>,
    ) -> Self {
        Self::build(Some(connector), metrics, observers)
    }

    /// A relay for test mode: `connect` succeeds immediately, acknowledgments
    /// still fan out and count but never reach a broker.
    pub fn detached(metrics: Arc<QueueMetrics>, observers: Arc<ObserverHub>) -> Self {
        Self::build(None, metrics, observers)
    }

    fn build(
        connector: Option<Arc<dyn BrokerConnector>>,
        metrics: Arc<QueueMetrics>,
        observers: Arc<ObserverHub>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                session: RwLock::new(None),
                reconnect: RwLock::new(RetryConfig::default()),
                lifecycle: Mutex::new(Lifecycle::default()),
                metrics,
                observers,
            }),
        }
    }

    /// Backoff used to re-establish a lost broker session.
    pub fn with_reconnect(self, policy: RetryConfig) -> Self {
        *self.inner.reconnect.write() = policy;
        self
    }

    pub fn is_detached(&self) -> bool {
        self.inner.connector.is_none()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lifecycle.lock().await.connected
    }

    pub fn observers(&self) -> &Arc<ObserverHub> {
        &self.inner.observers
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.inner.metrics
    }

    /// Open the broker session and attach every queued subscription.
    ///
    /// Returns `Ok(true)` once connected; calling it again is a no-op. If a
    /// queued topic cannot be attached the session is closed, the queue is
    /// restored and the error returned, so the caller may retry.
    pub async fn connect(&self) -> RelayResult<bool> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        lifecycle.closing = false;
        self.open_session(&mut lifecycle).await
    }

    async fn open_session(&self, lifecycle: &mut Lifecycle) -> RelayResult<bool> {
        if lifecycle.connected {
            return Ok(true);
        }

        let Some(connector) = &self.inner.connector else {
            lifecycle.connected = true;
            self.inner.metrics.mark_online(Utc::now());
            info!(
                queued = lifecycle.pending.len(),
                "relay running detached, broker disabled"
            );
            return Ok(true);
        };

        let broker = connector.connect().await?;
        // Ids are never reused, even by a failed attempt.
        lifecycle.session += 1;
        let id = lifecycle.session;
        let pending = std::mem::take(&mut lifecycle.pending);

        match self.attach_all(&broker, id, &pending).await {
            Ok(consumers) => {
                *self.inner.session.write() = Some(Session { id, broker });
                lifecycle.consumers.extend(consumers);
                lifecycle.active.extend(pending);
                lifecycle.connected = true;
                self.inner.metrics.mark_online(Utc::now());
                info!(
                    session = id,
                    topics = lifecycle.active.len(),
                    "relay connected"
                );
                Ok(true)
            }
            Err(e) => {
                lifecycle.pending = pending;
                if let Err(close_err) = broker.close().await {
                    warn!(error = %close_err, "failed to close broker after setup error");
                }
                Err(e)
            }
        }
    }

    /// Register `handler` for every message on `topic`.
    ///
    /// Before the relay is connected the subscription is queued.
    pub async fn listen_queue_topic(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn QueueHandler>,
    ) -> RelayResult<()> {
        let subscription = Subscription {
            topic: topic.into(),
            handler,
        };
        let mut lifecycle = self.inner.lifecycle.lock().await;

        match self.session() {
            Some(session) if lifecycle.connected => {
                let consumer = self
                    .attach(&session.broker, session.id, subscription.clone())
                    .await?;
                lifecycle.consumers.push(consumer);
                lifecycle.active.push(subscription);
            }
            _ => {
                debug!(topic = %subscription.topic, "subscription queued");
                lifecycle.pending.push(subscription);
            }
        }
        Ok(())
    }

    /// Acknowledge `message` at most once.
    ///
    /// Returns `Ok(false)` when the message was already acknowledged; nothing
    /// is broadcast or counted in that case. With a `reference`, its JSON is
    /// sent to every observer except the message's originator and the
    /// counter for `reference.kind` is incremented.
    pub async fn ack_queue_message(
        &self,
        message: &QueueMessage,
        reference: Option<&ReferenceObject>,
    ) -> RelayResult<bool> {
        if !message.claim_ack() {
            debug!(
                topic = message.topic(),
                delivery_tag = message.delivery_tag(),
                "message already acknowledged"
            );
            return Ok(false);
        }

        match self.session() {
            Some(session) if message.session().is_none_or(|id| id == session.id) => {
                if let Err(e) = session.broker.ack(message.delivery_tag()).await {
                    message.release_ack();
                    return Err(e);
                }
            }
            // The tag means nothing on the new channel; the broker redelivers it.
            Some(_) => {
                message.release_ack();
                return Err(RelayError::StaleDelivery(message.delivery_tag()));
            }
            None if self.is_detached() => {}
            None => {
                message.release_ack();
                return Err(RelayError::NotConnected);
            }
        }

        if let Some(reference) = reference {
            let payload = serde_json::to_string(reference)?;
            let delivered = self
                .inner
                .observers
                .broadcast_except(&payload, message.origin());
            let total = self.inner.metrics.increment(&reference.kind);
            debug!(
                topic = message.topic(),
                kind = %reference.kind,
                document_id = %reference.document_id,
                delivered,
                total,
                "message acknowledged"
            );
        }
        Ok(true)
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.inner.metrics.snapshot()
    }

    /// Stop consuming and close the broker session. Deliveries still in
    /// flight stay unacknowledged and are redelivered by the broker.
    ///
    /// Subscriptions go back on the queue, so a later `connect` resumes them.
    pub async fn disconnect(&self) -> RelayResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        lifecycle.closing = true;
        Self::go_offline(&mut lifecycle);

        let session = self.inner.session.write().take();
        match session {
            Some(session) => {
                session.broker.close().await?;
                info!(session = session.id, "relay disconnected");
            }
            None => debug!("no broker session to close"),
        }
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        self.inner.session.read().clone()
    }

    fn go_offline(lifecycle: &mut Lifecycle) {
        for consumer in lifecycle.consumers.drain(..) {
            consumer.abort();
        }
        lifecycle.connected = false;
        let active = std::mem::take(&mut lifecycle.active);
        lifecycle.pending.extend(active);
    }

    /// Tear down session `id` after one of its streams ended, then reconnect.
    /// Runs in its own task so aborting the consumers cannot cancel it.
    /// Boxed, since the consumers it attaches may call it again.
    fn recover(self, id: u64) -> BoxFuture<'static, ()> {
        async move {
            {
                let mut lifecycle = self.inner.lifecycle.lock().await;
                if lifecycle.closing || !lifecycle.connected || lifecycle.session != id {
                    return;
                }
                warn!(session = id, "broker session lost, reconnecting");
                Self::go_offline(&mut lifecycle);

                let lost = self.inner.session.write().take();
                if let Some(lost) = lost {
                    if let Err(e) = lost.broker.close().await {
                        debug!(session = id, error = %e, "lost session did not close cleanly");
                    }
                }
            }

            let policy = self.inner.reconnect.read().clone();
            loop {
                let attempt = retry_with_backoff(|| self.reopen(), policy.clone()).await;
                match attempt {
                    Ok(true) => {
                        info!(lost = id, "broker session re-established");
                        return;
                    }
                    Ok(false) => {
                        debug!("relay disconnected while reconnecting");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "reconnect attempts exhausted, starting over");
                        tokio::time::sleep(policy.max_delay).await;
                    }
                }
            }
        }
        .boxed()
    }

    /// `Ok(false)` once `disconnect` was called.
    async fn reopen(&self) -> RelayResult<bool> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.closing {
            return Ok(false);
        }
        self.open_session(&mut lifecycle).await
    }

    async fn attach_all(
        &self,
        broker: &Arc<dyn Broker>,
        session: u64,
        subscriptions: &[Subscription],
    ) -> RelayResult<Vec<JoinHandle<()>>> {
        let mut consumers = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            match self.attach(broker, session, subscription.clone()).await {
                Ok(consumer) => consumers.push(consumer),
                Err(e) => {
                    for consumer in consumers {
                        consumer.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(consumers)
    }

    async fn attach(
        &self,
        broker: &Arc<dyn Broker>,
        session: u64,
        subscription: Subscription,
    ) -> RelayResult<JoinHandle<()>> {
        let mut stream = broker.consume(&subscription.topic).await?;
        let relay = self.clone();

        Ok(tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(message) => {
                        let message = message.in_session(session);
                        let relay = relay.clone();
                        let handler = subscription.handler.clone();
                        tokio::spawn(async move { relay.dispatch(handler, message).await });
                    }
                    Err(e) => {
                        error!(topic = %subscription.topic, error = %e, "consumer failed");
                        break;
                    }
                }
            }
            debug!(topic = %subscription.topic, session, "consumer stopped");
            tokio::spawn(relay.recover(session));
        }))
    }

    async fn dispatch(&self, handler: Arc<dyn QueueHandler>, message: QueueMessage) {
        if let Err(e) = handler.handle(self, &message).await {
            warn!(
                topic = message.topic(),
                delivery_tag = message.delivery_tag(),
                error = %e,
                "handler failed"
            );
        }
        if !message.is_acked() {
            RelayMetrics::record_rejected(message.topic());
        }
    }
}
