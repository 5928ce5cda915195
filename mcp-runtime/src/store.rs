//! Storage seams consumed by the tool dispatcher.
//!
//! Orders, items and tags belong to the external order-management system and
//! are only read here (plus the one payment-status update). Sessions and
//! messages are owned by this service.

use async_trait::async_trait;
use orchestrator_core::orders::{Order, OrderItem};
use orchestrator_core::sessions::{MessageRole, SessionMessage};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("order record could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: i64) -> Result<Option<Order>, StoreError>;

    /// Empty when the item relation or one of its columns does not exist.
    async fn get_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError>;

    /// Empty when the tag relations do not exist.
    async fn get_tags(&self, order_id: i64) -> Result<Vec<String>, StoreError>;

    /// Set the payment status, then record an audit entry on a best-effort basis.
    async fn mark_paid(&self, order_id: i64, paid_status_id: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, title: Option<&str>) -> Result<i64, StoreError>;

    async fn append_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &Value,
    ) -> Result<(), StoreError>;

    /// Oldest first, at most `limit` entries.
    async fn get_history(
        &self,
        session_id: i64,
        limit: i64,
    ) -> Result<Vec<SessionMessage>, StoreError>;
}
