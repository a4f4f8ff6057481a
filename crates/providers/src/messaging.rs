//! Messaging/email collaborator contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stina_domain::error::Result;

/// An outbound message to one or more recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Reply within an existing thread when set.
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Delivery receipt returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

/// A raw inbound message as handed over by the inbox provider, before
/// ingestion normalizes it into a `Communication`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInboundMessage {
    pub message_id: String,
    pub sender: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[async_trait::async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Send a message and return the delivery receipt.
    async fn send(&self, message: OutboundMessage) -> Result<DeliveryReceipt>;

    /// Inbound messages not yet handed to ingestion, oldest first.
    async fn list_unprocessed(&self) -> Result<Vec<RawInboundMessage>>;
}
