//! NATS consumer for incoming iris records

use crate::error::PipelineError;
use async_nats::Client;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tracing::info;

/// Consumer for receiving raw records from NATS
pub struct RecordConsumer {
    client: Client,
    subject: String,
    queue_group: String,
}

impl RecordConsumer {
    /// Create a new record consumer
    pub fn new(client: Client, subject: &str, queue_group: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            queue_group: queue_group.to_string(),
        }
    }

    /// Join the queue group on the input subject and stream message payloads.
    ///
    /// Dropping the stream unsubscribes.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, Bytes>, PipelineError> {
        let subscriber = self
            .client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .map_err(|e| PipelineError::Subscribe {
                subject: self.subject.clone(),
                reason: e.to_string(),
            })?;

        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "Subscribed to input subject"
        );
        Ok(subscriber.map(|message| message.payload).boxed())
    }
}
