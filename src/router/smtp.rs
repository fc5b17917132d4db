//! SMTP email provider (lettre).
//!
//! Threading headers are set on every reply so the correspondent's client
//! keeps the conversation together, and the generated Message-ID is
//! returned for storage as the assistant entry's `emailId`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use super::{OutboundMessage, OutboundProvider, SentMessage};
use crate::error::ProviderError;
use crate::threading::address_domain;

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub timeout: Duration,
}

pub struct SmtpProvider {
    name: String,
    config: SmtpConfig,
}

impl SmtpProvider {
    pub fn new(name: impl Into<String>, config: SmtpConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn failed(&self, reason: String) -> ProviderError {
        ProviderError::SendFailed {
            provider: self.name.clone(),
            reason,
        }
    }

    fn invalid(&self, reason: String) -> ProviderError {
        ProviderError::InvalidMessage {
            provider: self.name.clone(),
            reason,
        }
    }

    /// Build the RFC 5322 message. Returns it with its bare Message-ID.
    pub fn build_message(&self, message: &OutboundMessage) -> Result<(Message, String), ProviderError> {
        let from_raw = message.from.as_deref().unwrap_or(&self.config.from_address);
        let from: Mailbox = from_raw
            .parse()
            .map_err(|e| self.invalid(format!("Invalid from address: {e}")))?;

        let domain = address_domain(from_raw).unwrap_or_else(|| "localhost".into());
        let message_id = format!("{}@{domain}", Uuid::new_v4());

        let mut builder = Message::builder()
            .from(from)
            .subject(message.subject.clone().unwrap_or_default())
            .message_id(Some(format!("<{message_id}>")));

        if message.to.is_empty() {
            return Err(self.invalid("No recipients".into()));
        }
        for to in &message.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| self.invalid(format!("Invalid to address {to}: {e}")))?;
            builder = builder.to(mailbox);
        }

        if let Some(parent) = &message.in_reply_to {
            builder = builder.in_reply_to(format!("<{parent}>"));
        }
        if !message.references.is_empty() {
            let chain = message
                .references
                .iter()
                .map(|r| format!("<{r}>"))
                .collect::<Vec<_>>()
                .join(" ");
            builder = builder.references(chain);
        }

        let email = builder
            .body(message.body.clone())
            .map_err(|e| self.invalid(format!("Failed to build email: {e}")))?;
        Ok((email, message_id))
    }
}

#[async_trait]
impl OutboundProvider for SmtpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SentMessage, ProviderError> {
        let (email, message_id) = self.build_message(message)?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| self.failed(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(self.config.timeout))
            .build();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| self.failed(format!("SMTP task failed: {e}")))?
            .map_err(|e| self.failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(provider = %self.name, to = ?message.to, "Email sent");
        Ok(SentMessage {
            message_id: Some(message_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Channel;

    fn provider() -> SmtpProvider {
        SmtpProvider::new(
            "smtp",
            SmtpConfig {
                host: "smtp.acme.io".into(),
                port: 587,
                username: "bot".into(),
                password: SecretString::from("secret".to_string()),
                from_address: "Acme Support <support@acme.io>".into(),
                timeout: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn reply_carries_threading_headers() {
        let message = OutboundMessage::new(Channel::Email, "alice@x.com", "Thanks!")
            .with_subject("Re: Quote Request")
            .in_reply_to("m-2@x.com", vec!["m-1@acme.io".into()]);

        let (email, message_id) = provider().build_message(&message).unwrap();
        assert!(message_id.ends_with("@acme.io"));

        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("In-Reply-To: <m-2@x.com>"));
        assert!(raw.contains("References: <m-1@acme.io> <m-2@x.com>"));
        assert!(raw.contains(&format!("Message-ID: <{message_id}>")));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let message = OutboundMessage::new(Channel::Email, "not an address", "hi");
        let err = provider().build_message(&message).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidMessage { .. }));
    }
}
