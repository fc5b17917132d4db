//! Twilio Programmable Messaging provider.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{OutboundMessage, OutboundProvider, SentMessage};
use crate::error::ProviderError;

const DEFAULT_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sending number in E.164.
    pub from_number: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl TwilioConfig {
    pub fn new(account_sid: impl Into<String>, auth_token: SecretString, from_number: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token,
            from_number: from_number.into(),
            api_base: DEFAULT_API_BASE.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct TwilioSmsProvider {
    name: String,
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioSmsProvider {
    pub fn new(name: impl Into<String>, config: TwilioConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl OutboundProvider for TwilioSmsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SentMessage, ProviderError> {
        let to = message.to.first().ok_or_else(|| ProviderError::InvalidMessage {
            provider: self.name.clone(),
            reason: "No recipient".into(),
        })?;
        let from = message.from.as_deref().unwrap_or(&self.config.from_number);
        let form = [("To", to.as_str()), ("From", from), ("Body", message.body.as_str())];

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.expose_secret()))
            .timeout(self.config.timeout)
            .form(&form)
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
        let sid = body.get("sid").and_then(Value::as_str).map(String::from);
        tracing::info!(provider = %self.name, to = %to, sid = ?sid, "SMS sent");
        Ok(SentMessage { message_id: sid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_url_uses_account() {
        let mut config = TwilioConfig::new("AC123", SecretString::from("t".to_string()), "+15550009999");
        config.api_base = "http://localhost:9999/".into();
        let provider = TwilioSmsProvider::new("twilio", config);
        assert_eq!(
            provider.messages_url(),
            "http://localhost:9999/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn missing_recipient_is_invalid() {
        let provider = TwilioSmsProvider::new(
            "twilio",
            TwilioConfig::new("AC123", SecretString::from("t".to_string()), "+15550009999"),
        );
        let mut message = OutboundMessage::new(crate::channels::Channel::Sms, "+1555", "hi");
        message.to.clear();
        let err = provider.send(&message).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidMessage { .. }));
    }
}
