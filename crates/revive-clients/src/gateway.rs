//! Messaging gateway client
//!
//! Sends plain text through a named channel instance of a WhatsApp-style
//! HTTP gateway (`POST /message/sendText/{instance}`).

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Gateway error: {status} - {message}")]
    Api { status: u16, message: String },
}

/// Delivery receipt for an accepted message. Some gateway builds accept a
/// message without echoing its id; the send still counts as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendTextResponse {
    key: Option<MessageKey>,
}

#[derive(Debug, Deserialize)]
struct MessageKey {
    id: Option<String>,
}

#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: Arc<String>,
    api_key: Arc<String>,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self, GatewayError> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Revive/0.1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
            api_key: Arc::new(api_key),
        })
    }

    /// Send `text` to `recipient` (phone number or JID) via `instance`
    pub async fn send_text(
        &self,
        instance: &str,
        recipient: &str,
        text: &str,
    ) -> Result<SendReceipt, GatewayError> {
        let url = format!("{}/message/sendText/{}", self.base_url, instance);
        let number = normalize_recipient(recipient);
        debug!("Gateway send via {} to {}", instance, number);

        let response = self
            .client
            .post(&url)
            .header("apikey", self.api_key.as_str())
            .json(&json!({ "number": number, "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let receipt = parse_receipt(&body);
        if receipt.message_id.is_none() {
            warn!(
                "Gateway accepted message via {} ({}) without a message id",
                instance, status
            );
        }
        Ok(receipt)
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

/// Read the message id from an accepted send; missing or unparseable
/// bodies yield a receipt without an id
fn parse_receipt(body: &str) -> SendReceipt {
    let message_id = serde_json::from_str::<SendTextResponse>(body)
        .ok()
        .and_then(|r| r.key)
        .and_then(|k| k.id)
        .filter(|id| !id.is_empty());
    SendReceipt { message_id }
}

/// Strip formatting from phone numbers; JIDs pass through untouched
pub fn normalize_recipient(recipient: &str) -> String {
    if recipient.contains('@') {
        return recipient.trim().to_string();
    }
    recipient.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_recipient() {
        assert_eq!(normalize_recipient("+55 (11) 98765-4321"), "5511987654321");
        assert_eq!(
            normalize_recipient(" 5511987654321@s.whatsapp.net "),
            "5511987654321@s.whatsapp.net"
        );
    }

    #[test]
    fn test_parse_receipt_with_id() {
        let receipt = parse_receipt(r#"{"key":{"id":"3EB0ABC","fromMe":true},"status":"PENDING"}"#);
        assert_eq!(receipt.message_id.as_deref(), Some("3EB0ABC"));
    }

    #[test]
    fn test_accepted_send_without_id_is_delivered() {
        assert_eq!(parse_receipt(r#"{"status":"PENDING"}"#).message_id, None);
        assert_eq!(parse_receipt("").message_id, None);
        assert_eq!(parse_receipt("accepted").message_id, None);
        assert_eq!(parse_receipt(r#"{"key":{"id":""}}"#).message_id, None);
    }
}
