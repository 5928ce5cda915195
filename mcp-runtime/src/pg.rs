//! PostgreSQL implementations of the storage seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::orders::{Order, OrderItem};
use orchestrator_core::sessions::{MessageRole, SessionMessage};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgQueryResult;

use crate::store::{OrderStore, SessionStore, StoreError};

const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_COLUMN: &str = "42703";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    tag_entity_table: i64,
}

impl PgStore {
    pub fn new(pool: PgPool, tag_entity_table: i64) -> Self {
        Self {
            pool,
            tag_entity_table,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    orderid: i64,
    sku: Option<String>,
    name: Option<String>,
    qty: i32,
    price: Decimal,
    tax_amount: Decimal,
}

impl OrderItemRow {
    fn into_item(self) -> OrderItem {
        OrderItem {
            orderid: self.orderid,
            sku: self.sku,
            name: self.name,
            qty: self.qty,
            price: self.price,
            tax_amount: self.tax_amount,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    role: String,
    content: Value,
    created_at: DateTime<Utc>,
}

/// True for errors meaning an optional relation or column is not provisioned.
fn is_missing_relation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(UNDEFINED_TABLE | UNDEFINED_COLUMN)
        ),
        _ => false,
    }
}

fn or_empty<T>(relation: &'static str, result: Result<Vec<T>, sqlx::Error>) -> Result<Vec<T>, StoreError> {
    match result {
        Ok(rows) => Ok(rows),
        Err(err) if is_missing_relation(&err) => {
            tracing::debug!(relation, error = %err, "Optional relation missing, reading as empty");
            Ok(Vec::new())
        }
        Err(err) => Err(err.into()),
    }
}

/// Log-and-ignore for side writes. Only failures reported by the database or
/// the connection are tolerated; anything else propagates.
fn tolerate_side_write(
    operation: &'static str,
    result: Result<PgQueryResult, sqlx::Error>,
) -> Result<(), StoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(err @ (sqlx::Error::Database(_) | sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)) => {
            tracing::warn!(
                event = "side_write_skipped",
                operation,
                error = %err,
                "Best-effort write failed and was ignored"
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn get_order(&self, order_id: i64) -> Result<Option<Order>, StoreError> {
        let record = sqlx::query_scalar::<_, Value>(
            "SELECT to_jsonb(o) FROM orders o WHERE o.id = $1 LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Order::from_record).transpose().map_err(StoreError::from)
    }

    async fn get_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT orderid::int8 AS orderid,
                   sku::text AS sku,
                   name::text AS name,
                   COALESCE(qty, 0)::int4 AS qty,
                   COALESCE(price, 0)::numeric AS price,
                   COALESCE(tax_amount, 0)::numeric AS tax_amount
            FROM order_items
            WHERE orderid = $1
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await;

        Ok(or_empty("order_items", rows)?
            .into_iter()
            .map(OrderItemRow::into_item)
            .collect())
    }

    async fn get_tags(&self, order_id: i64) -> Result<Vec<String>, StoreError> {
        let tags = sqlx::query_scalar::<_, String>(
            r#"
            SELECT t.name::text
            FROM tag_entities te
            JOIN tags t ON t.id = te.tag_id
            WHERE te.entity_id_tbl = $1 AND te.entity_id = $2
            ORDER BY t.name
            "#,
        )
        .bind(self.tag_entity_table)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await;

        or_empty("tag_entities", tags)
    }

    async fn mark_paid(&self, order_id: i64, paid_status_id: i64) -> Result<(), StoreError> {
        // One connection for the whole operation; returned to the pool on drop.
        let mut conn = self.pool.acquire().await?;

        sqlx::query("UPDATE orders SET status_payment_id = $1 WHERE id = $2")
            .bind(paid_status_id)
            .bind(order_id)
            .execute(&mut *conn)
            .await?;

        let audit = sqlx::query(
            "INSERT INTO order_audit_log (order_id, action, detail) VALUES ($1, $2, $3)",
        )
        .bind(order_id)
        .bind("payment_marked")
        .bind(json!({ "status_payment_id": paid_status_id }))
        .execute(&mut *conn)
        .await;

        tolerate_side_write("order_audit_log", audit)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, title: Option<&str>) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO mcp_sessions (title) VALUES ($1) RETURNING id",
        )
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn append_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &Value,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO mcp_messages (session_id, role, content) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(role.as_str())
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: i64,
        limit: i64,
    ) -> Result<Vec<SessionMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT role, content, created_at
            FROM mcp_messages
            WHERE session_id = $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SessionMessage {
                role: row.role,
                content: row.content,
                created_at: row.created_at,
            })
            .collect())
    }
}
