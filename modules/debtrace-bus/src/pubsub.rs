//! REST client for a Pub/Sub-compatible bus endpoint.
//!
//! Speaks the v1 JSON surface (`topics/*:publish`,
//! `subscriptions/*:pull`, `subscriptions/*:acknowledge`), which both
//! the hosted service and the local emulator expose. Authentication is
//! an optional bearer token; the emulator needs none.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BusError, Result};
use crate::{PulledMessage, Publisher, Subscriber};

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default, rename = "receivedMessages")]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
struct ReceivedMessage {
    #[serde(rename = "ackId")]
    ack_id: String,
    message: WireMessage,
    #[serde(default, rename = "deliveryAttempt")]
    delivery_attempt: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(rename = "messageId")]
    message_id: String,
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(BusError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Publishes to one topic.
pub struct PubSubPublisher {
    client: reqwest::Client,
    publish_url: String,
    auth_token: Option<String>,
    publish_timeout: Duration,
}

impl PubSubPublisher {
    pub fn new(
        base_url: &str,
        project_id: &str,
        topic_id: &str,
        auth_token: Option<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            publish_url: format!(
                "{}/v1/projects/{}/topics/{}:publish",
                base_url.trim_end_matches('/'),
                project_id,
                topic_id
            ),
            auth_token,
            publish_timeout,
        }
    }
}

#[async_trait]
impl Publisher for PubSubPublisher {
    async fn publish(&self, data: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(data).map_err(|e| BusError::Payload(e.to_string()))?;
        let body = serde_json::json!({
            "messages": [{ "data": BASE64.encode(&bytes) }]
        });

        let mut request = self
            .client
            .post(&self.publish_url)
            .timeout(self.publish_timeout)
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        check(request.send().await?).await?;
        debug!(url = %self.publish_url, "Published message");
        Ok(())
    }
}

/// Pulls leased batches from one subscription.
pub struct PubSubSubscriber {
    client: reqwest::Client,
    pull_url: String,
    ack_url: String,
    auth_token: Option<String>,
    batch_size: usize,
    retry_deadline: Duration,
}

impl PubSubSubscriber {
    pub fn new(
        base_url: &str,
        project_id: &str,
        subscription_id: &str,
        auth_token: Option<String>,
        batch_size: usize,
        retry_deadline: Duration,
    ) -> Self {
        let base = format!(
            "{}/v1/projects/{}/subscriptions/{}",
            base_url.trim_end_matches('/'),
            project_id,
            subscription_id
        );
        Self {
            client: reqwest::Client::new(),
            pull_url: format!("{base}:pull"),
            ack_url: format!("{base}:acknowledge"),
            auth_token,
            batch_size,
            retry_deadline,
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Subscriber for PubSubSubscriber {
    async fn pull(&self) -> Result<Vec<PulledMessage>> {
        let body = serde_json::json!({ "maxMessages": self.batch_size });
        let request = self
            .authed(self.client.post(&self.pull_url))
            .timeout(self.retry_deadline)
            .json(&body);
        let response = check(request.send().await?).await?;
        let payload: PullResponse = response.json().await?;

        let mut pulled = Vec::with_capacity(payload.received_messages.len());
        for received in payload.received_messages {
            let data = BASE64
                .decode(received.message.data.as_bytes())
                .map_err(|e| BusError::Payload(e.to_string()))?;
            pulled.push(PulledMessage {
                ack_id: received.ack_id,
                message_id: received.message.message_id,
                delivery_attempts: received.delivery_attempt.unwrap_or(1),
                data,
            });
        }
        Ok(pulled)
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        let body = serde_json::json!({ "ackIds": [ack_id] });
        let request = self.authed(self.client.post(&self.ack_url)).json(&body);
        check(request.send().await?).await?;
        Ok(())
    }
}
