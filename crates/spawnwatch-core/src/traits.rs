//! Transport seam: the only way the engine talks to the outside world.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Destination, MessageRef, SentMessage};

/// Outbound message transport. Every call is fallible and may suspend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Send a new message and return its reference.
    async fn send(&self, destination: &Destination, content: &str)
    -> Result<MessageRef, TransportError>;

    /// Replace the content of a previously sent message.
    async fn edit(&self, message: &MessageRef, content: &str) -> Result<(), TransportError>;

    /// Delete a previously sent message.
    async fn delete(&self, message: &MessageRef) -> Result<(), TransportError>;

    /// Read a message back.
    async fn fetch(&self, message: &MessageRef) -> Result<SentMessage, TransportError>;

    /// Most recent messages in a channel, newest first.
    async fn recent(&self, channel_id: &str, limit: usize)
    -> Result<Vec<SentMessage>, TransportError>;
}
