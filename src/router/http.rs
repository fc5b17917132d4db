//! Transactional email over an HTTP/JSON API (Resend/Postmark style).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use super::{OutboundMessage, OutboundProvider, SentMessage};
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct HttpEmailConfig {
    /// Full send endpoint, e.g. `https://api.resend.com/emails`.
    pub endpoint: String,
    pub api_key: SecretString,
    pub from_address: String,
    pub timeout: Duration,
}

pub struct HttpEmailProvider {
    name: String,
    config: HttpEmailConfig,
    client: reqwest::Client,
}

impl HttpEmailProvider {
    pub fn new(name: impl Into<String>, config: HttpEmailConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client: reqwest::Client::new(),
        }
    }

    /// JSON request body for a message.
    pub fn request_body(&self, message: &OutboundMessage) -> Value {
        let mut headers = serde_json::Map::new();
        if let Some(parent) = &message.in_reply_to {
            headers.insert("In-Reply-To".into(), json!(format!("<{parent}>")));
        }
        if !message.references.is_empty() {
            let chain = message
                .references
                .iter()
                .map(|r| format!("<{r}>"))
                .collect::<Vec<_>>()
                .join(" ");
            headers.insert("References".into(), json!(chain));
        }

        json!({
            "from": message.from.as_deref().unwrap_or(&self.config.from_address),
            "to": message.to,
            "subject": message.subject.as_deref().unwrap_or_default(),
            "text": message.body,
            "headers": headers,
            "tags": message.tags,
        })
    }
}

/// Provider id from common response shapes.
fn response_message_id(body: &Value) -> Option<String> {
    ["id", "MessageID", "message_id", "messageId"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(String::from)
}

#[async_trait]
impl OutboundProvider for HttpEmailProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SentMessage, ProviderError> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(self.config.timeout)
            .json(&self.request_body(message))
            .send()
            .await
            .map_err(|e| ProviderError::SendFailed {
                provider: self.name.clone(),
                reason: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::SendFailed {
                provider: self.name.clone(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(SentMessage {
            message_id: response_message_id(&body),
        })
    }
}
