use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::{Broker, BrokerConnector, MessageStream};
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::message::{ObserverId, QueueMessage, ORIGIN_HEADER};

/// Dials RabbitMQ and opens a single consuming channel.
#[derive(Clone, Debug)]
pub struct AmqpConnector {
    url: String,
    prefetch: u16,
}

impl AmqpConnector {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            url: config.url.clone(),
            prefetch: config.prefetch,
        }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> RelayResult<Arc<dyn Broker>> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        connection.on_error(|err| {
            error!(error = %err, "broker connection lost");
        });

        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        info!(prefetch = self.prefetch, "connected to RabbitMQ");
        Ok(Arc::new(AmqpBroker {
            connection,
            channel,
        }))
    }
}

/// RabbitMQ session. Every topic is consumed on the same channel so
/// delivery tags stay unique across topics.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Broker for AmqpBroker {
    #[instrument(skip(self))]
    async fn consume(&self, topic: &str) -> RelayResult<MessageStream> {
        self.channel
            .queue_declare(
                topic,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RelayError::QueueUnavailable {
                topic: topic.to_string(),
                details: e.to_string(),
            })?;

        let consumer = self
            .channel
            .basic_consume(
                topic,
                &format!("cloud-messaging.{topic}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("consuming queue");
        let topic = topic.to_string();
        Ok(consumer
            .map(move |delivery| {
                let delivery = delivery?;
                let origin = origin_of(&delivery.properties);
                Ok(QueueMessage::new(topic.clone(), delivery.delivery_tag, delivery.data)
                    .with_origin(origin))
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> RelayResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&self) -> RelayResult<()> {
        self.connection.close(200, "shutdown").await?;
        info!("RabbitMQ connection closed");
        Ok(())
    }
}

fn origin_of(properties: &BasicProperties) -> Option<ObserverId> {
    let headers = properties.headers().as_ref()?;
    let raw = match headers.inner().get(ORIGIN_HEADER)? {
        AMQPValue::LongString(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
        AMQPValue::ShortString(value) => value.as_str().to_owned(),
        _ => return None,
    };
    raw.parse().ok()
}
