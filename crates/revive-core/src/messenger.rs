use anyhow::Result;
use async_trait::async_trait;
use revive_clients::GatewayClient;

/// Trait for delivering outbound text through a messaging gateway
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` to `recipient` through the channel `instance`.
    /// Returns the provider's message id when the gateway reports one; an
    /// accepted send without an id is still a delivery.
    async fn send_message(
        &self,
        instance: &str,
        recipient: &str,
        text: &str,
    ) -> Result<Option<String>>;
}

#[async_trait]
impl Messenger for GatewayClient {
    async fn send_message(
        &self,
        instance: &str,
        recipient: &str,
        text: &str,
    ) -> Result<Option<String>> {
        let receipt = self.send_text(instance, recipient, text).await?;
        Ok(receipt.message_id)
    }
}
