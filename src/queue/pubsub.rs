use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{MessageQueue, ReceivedMessage};
use crate::error::QueueError;

/// Pub/Sub REST client. Authentication happens elsewhere; this only presents a bearer token.
pub struct PubSubClient {
    client: Client,
    base_url: String,
    project: String,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
    return_immediately: bool,
}

impl PubSubClient {
    pub fn new(
        base_url: impl Into<String>,
        project: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, QueueError> {
        // Pulls are long polls, so the timeout has to outlast the server-side wait.
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project: project.into(),
            token,
        })
    }

    pub fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.project, topic)
    }

    pub fn subscription_path(&self, subscription: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project, subscription)
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.base_url, resource)
    }

    fn auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, QueueError> {
        let response = self.auth(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Status { status, body })
    }

    /// GET the resource; PUT `body` to create it when the GET reports 404.
    async fn ensure(&self, resource: &str, body: serde_json::Value) -> Result<(), QueueError> {
        let url = self.endpoint(resource);
        match self.send(self.client.get(&url)).await {
            Ok(_) => return Ok(()),
            Err(QueueError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            }) => {}
            Err(err) => return Err(err),
        }

        match self.send(self.client.put(&url).json(&body)).await {
            Ok(_) => {
                tracing::info!(%resource, "created queue resource");
                Ok(())
            }
            // Another instance won the race to create it.
            Err(QueueError::Status {
                status: StatusCode::CONFLICT,
                ..
            }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl MessageQueue for PubSubClient {
    async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let url = self.endpoint(&format!("{}:pull", self.subscription_path(subscription)));
        let response = self
            .send(self.client.post(url).json(&PullRequest {
                max_messages,
                return_immediately: false,
            }))
            .await?;
        let parsed: PullResponse = response
            .json()
            .await
            .map_err(|err| QueueError::Decode(err.to_string()))?;

        Ok(parsed
            .received_messages
            .into_iter()
            .map(|received| ReceivedMessage {
                ack_id: received.ack_id,
                message_id: received.message.message_id,
                data: received.message.data,
            })
            .collect())
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<(), QueueError> {
        let url = self.endpoint(&format!(
            "{}:acknowledge",
            self.subscription_path(subscription)
        ));
        self.send(self.client.post(url).json(&json!({ "ackIds": ack_ids })))
            .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &str) -> Result<(), QueueError> {
        let url = self.endpoint(&format!("{}:publish", self.topic_path(topic)));
        self.send(
            self.client
                .post(url)
                .json(&json!({ "messages": [{ "data": data }] })),
        )
        .await?;
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> Result<(), QueueError> {
        let name = self.topic_path(topic);
        self.ensure(&name, json!({})).await
    }

    async fn ensure_subscription(
        &self,
        subscription: &str,
        topic: &str,
    ) -> Result<(), QueueError> {
        let name = self.subscription_path(subscription);
        self.ensure(&name, json!({ "topic": self.topic_path(topic) }))
            .await
    }
}
