use std::sync::Arc;

use crate::queue::MessageQueue;
use crate::request::{encode_response, ProvisionResponse};

/// Best-effort delivery of correlated responses. Failures are logged and dropped: the
/// credential side effect has already happened (or not), and re-requesting is safe.
#[derive(Clone)]
pub struct ResponsePublisher {
    queue: Arc<dyn MessageQueue>,
    topic: String,
}

impl ResponsePublisher {
    pub fn new(queue: Arc<dyn MessageQueue>, topic: impl Into<String>) -> Self {
        Self {
            queue,
            topic: topic.into(),
        }
    }

    /// Returns whether the response reached the queue.
    pub async fn publish(&self, response: &ProvisionResponse) -> bool {
        let data = match encode_response(response) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(
                    ?err,
                    message_id = %response.message_id,
                    "could not encode response; requester may wait indefinitely",
                );
                return false;
            }
        };

        match self.queue.publish(&self.topic, &data).await {
            Ok(()) => {
                tracing::debug!(
                    message_id = %response.message_id,
                    success = response.success,
                    topic = %self.topic,
                    "response published",
                );
                true
            }
            Err(err) => {
                tracing::error!(
                    ?err,
                    message_id = %response.message_id,
                    topic = %self.topic,
                    "failed to publish response",
                );
                false
            }
        }
    }
}
