use async_trait::async_trait;

use super::types::OutboundMessage;
use crate::error::Result;

/// Delivers replies to the chat platform.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Send a message. When `message.prompts` is non-empty the prompts are
    /// rendered as selectable options under the text.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Clear the pending state of a selected option.
    async fn acknowledge_callback(&self, _callback_id: &str) -> Result<()> {
        Ok(())
    }
}
