//! NATS producer for classified records

use crate::error::PipelineError;
use crate::pipeline::RecordSink;
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Producer for publishing records to the output subject
#[derive(Clone)]
pub struct RecordProducer {
    client: Client,
    subject: String,
}

impl RecordProducer {
    /// Create a new record producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }
}

#[async_trait]
impl RecordSink for RecordProducer {
    async fn publish(&self, payload: Bytes) -> Result<(), PipelineError> {
        let size = payload.len();
        self.client
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|e| PipelineError::Publish {
                subject: self.subject.clone(),
                reason: e.to_string(),
            })?;

        debug!(subject = %self.subject, bytes = size, "Published record");
        Ok(())
    }

    async fn flush(&self) -> Result<(), PipelineError> {
        self.client
            .flush()
            .await
            .map_err(|e| PipelineError::Flush(e.to_string()))
    }
}
