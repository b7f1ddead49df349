//! The queue consumer: pull one message, decode it, validate, issue, respond, acknowledge.
//!
//! Every consumed message is acknowledged exactly once, whatever happened to it. Delivery is
//! at-least-once, so nothing here deduplicates; issuance operations must tolerate repeats.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{retry, BackoffPolicy, OsJitter, RetryError};
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionerResult, QueueError};
use crate::issuer::{CommandIssuer, IssueOutcome, Issuer};
use crate::publisher::ResponsePublisher;
use crate::queue::{MessageQueue, PubSubClient, ReceivedMessage};
use crate::request::{decode_request, CredentialRequest, ProvisionResponse, RequestKind};
use crate::validation::{missing_field, validate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub request_topic: String,
    pub response_topic: String,
    pub subscription: String,
    pub pull_retry_interval: Duration,
    pub refresh_crls_on_boot: bool,
}

impl From<&ProvisionerConfig> for DispatcherSettings {
    fn from(config: &ProvisionerConfig) -> Self {
        Self {
            request_topic: config.request_topic.clone(),
            response_topic: config.response_topic.clone(),
            subscription: config.subscription.clone(),
            pull_retry_interval: config.pull_retry_interval,
            refresh_crls_on_boot: config.refresh_crls_on_boot,
        }
    }
}

/// What became of one consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The payload could not be decoded; no response was sent.
    Ignored,
    Responded(ProvisionResponse),
}

pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    issuer: Arc<dyn Issuer>,
    publisher: ResponsePublisher,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        issuer: Arc<dyn Issuer>,
        settings: DispatcherSettings,
    ) -> Self {
        let publisher = ResponsePublisher::new(queue.clone(), settings.response_topic.clone());
        Self {
            queue,
            issuer,
            publisher,
            settings,
        }
    }

    /// Wires the Pub/Sub client and the script-backed issuer described by `config`.
    pub fn from_config(config: &ProvisionerConfig) -> ProvisionerResult<Self> {
        let queue = PubSubClient::new(
            config.pubsub_endpoint.as_str(),
            config.project.clone(),
            config.access_token.clone(),
        )?;
        let issuer = CommandIssuer::new(config.scripts_dir.clone());
        tracing::info!(
            project = %config.project,
            endpoint = %config.pubsub_endpoint,
            scripts_dir = %issuer.scripts_dir().display(),
            "dispatcher configured",
        );
        Ok(Self::new(
            Arc::new(queue),
            Arc::new(issuer),
            DispatcherSettings::from(config),
        ))
    }

    /// Makes sure both topics and the subscription exist, then optionally regenerates CRLs.
    /// Queue errors here are fatal to the run.
    pub async fn prepare(&self) -> Result<(), QueueError> {
        let settings = &self.settings;
        self.queue.ensure_topic(&settings.request_topic).await?;
        self.queue.ensure_topic(&settings.response_topic).await?;
        self.queue
            .ensure_subscription(&settings.subscription, &settings.request_topic)
            .await?;
        tracing::info!(
            request_topic = %settings.request_topic,
            response_topic = %settings.response_topic,
            subscription = %settings.subscription,
            "queue resources ready",
        );

        if settings.refresh_crls_on_boot {
            let operation = RequestKind::CreateCrls.operation();
            tracing::info!(%operation, "regenerating CRLs at boot");
            let outcome = self.issuer.issue(operation, &[]).await;
            log_outcome(operation, &outcome);
        }
        Ok(())
    }

    /// Consumes forever. Only process shutdown ends it.
    pub async fn run(&self) {
        tracing::info!(subscription = %self.settings.subscription, "processing messages");
        loop {
            self.poll_once().await;
        }
    }

    /// One pull (retried at a fixed interval until the queue answers) and the handling of
    /// whatever it returned.
    pub async fn poll_once(&self) -> Vec<Disposition> {
        let policy = BackoffPolicy::fixed(self.settings.pull_retry_interval);
        let pulled = retry(&policy, &OsJitter, |_: &QueueError| true, |_| {
            self.queue.pull(&self.settings.subscription, 1)
        })
        .await;

        let messages = match pulled {
            Ok(retried) => retried.value,
            // A fixed policy has no ceiling and every pull error is retryable.
            Err(RetryError::Fatal(err)) | Err(RetryError::Exhausted { last: err, .. }) => {
                tracing::error!(?err, "pull abandoned");
                return Vec::new();
            }
        };

        let mut dispositions = Vec::with_capacity(messages.len());
        for message in &messages {
            dispositions.push(self.handle_message(message).await);
        }
        dispositions
    }

    /// Handles one message end to end, always finishing with an acknowledgement.
    pub async fn handle_message(&self, message: &ReceivedMessage) -> Disposition {
        let disposition = match decode_request(&message.data) {
            Ok(request) => {
                let success = self.process(&request, &message.message_id).await;
                let response = ProvisionResponse::new(request, message.message_id.clone(), success);
                self.publisher.publish(&response).await;
                Disposition::Responded(response)
            }
            Err(err) => {
                tracing::warn!(
                    ?err,
                    message_id = %message.message_id,
                    data = %message.data,
                    "could not make sense of message; ignored",
                );
                Disposition::Ignored
            }
        };

        if let Err(err) = self
            .queue
            .acknowledge(&self.settings.subscription, &[message.ack_id.clone()])
            .await
        {
            // It will be redelivered and handled again.
            tracing::warn!(?err, message_id = %message.message_id, "acknowledge failed");
        }
        disposition
    }

    /// Validates and, if valid, runs the request's operation. Returns the success flag for
    /// the response.
    pub async fn process(&self, request: &CredentialRequest, message_id: &str) -> bool {
        let Some(kind) = request.kind() else {
            if request.kind.is_empty() {
                tracing::warn!(%message_id, "request type empty; ignored");
            } else {
                tracing::warn!(%message_id, kind = %request.kind, "unknown request type; ignored");
            }
            return false;
        };

        if !validate(request) {
            tracing::warn!(
                %message_id,
                %kind,
                field = ?missing_field(kind, request),
                user = %request.user,
                "parameter validation failed",
            );
            return false;
        }

        let operation = kind.operation();
        let args = request.arguments_for(kind);
        tracing::info!(
            %message_id,
            %kind,
            %operation,
            user = %request.user,
            identity = %request.identity,
            "running issuance operation",
        );
        let outcome = self.issuer.issue(operation, &args).await;
        log_outcome(operation, &outcome);
        outcome.success
    }
}

fn log_outcome(operation: &str, outcome: &IssueOutcome) {
    let output = outcome.output_lossy();
    if outcome.success {
        tracing::info!(target: "provisioner.issue", %operation, %output, "operation succeeded");
    } else {
        tracing::warn!(target: "provisioner.issue", %operation, %output, "operation failed");
    }
}
