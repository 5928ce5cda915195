//! In-memory backends for dispatcher, router and transport tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::orders::{Order, OrderItem};
use orchestrator_core::sessions::{MessageRole, SessionMessage};
use orchestrator_core::transform::{InvoicePayload, SalesOrderPayload, VendorDefaults};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::config::{DEFAULT_ANALYZE_PROMPT, RuntimeConfig};
use crate::store::{OrderStore, SessionStore, StoreError};
use crate::tools::Toolbox;
use crate::upstream::{LanguageModel, UpstreamError, VendorSink};

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        ollama_url: "http://127.0.0.1:9".to_string(),
        ollama_model: "llama3.1".to_string(),
        analyze_prompt: DEFAULT_ANALYZE_PROMPT.to_string(),
        webhook_secret: "s3cret".to_string(),
        paid_status_id: 2,
        invoice_sink_url: "http://127.0.0.1:9/invoices".to_string(),
        sales_order_sink_url: "http://127.0.0.1:9/salesorders".to_string(),
        sales_org_id: "org-test".to_string(),
        vendor_defaults: VendorDefaults::default(),
        totals_tolerance: Decimal::new(5, 2),
        tag_entity_table: 7,
    }
}

/// Order with a complete customer block and a declared total of 100.00.
pub fn sample_order(id: i64) -> Order {
    let mut order = Order::from_record(json!({
        "id": id,
        "name_shipping": "Ana López",
        "NIT": "1234567-8",
        "address_shipping": "4a Avenida 12-50, Zona 10",
        "city_shipping": "Guatemala",
        "region_shipping": "Guatemala",
        "phone_shipping": "+502 5555 0000",
        "email_shipping": "ana@example.com",
        "status_payment_id": 1,
        "comment": "Entregar por la tarde",
        "shipping_method_id": 3,
        "voided": false
    }))
    .expect("sample order should deserialize");
    order.total = Some(Decimal::new(10000, 2));
    order
}

/// One line: 2 × 45.00 + 10.00 tax.
pub fn sample_items(order_id: i64) -> Vec<OrderItem> {
    vec![OrderItem {
        orderid: order_id,
        sku: Some("CAF-500".to_string()),
        name: Some("Café molido 500g".to_string()),
        qty: 2,
        price: Decimal::new(4500, 2),
        tax_amount: Decimal::new(1000, 2),
    }]
}

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<i64, Order>>,
    items: Mutex<HashMap<i64, Vec<OrderItem>>>,
    tags: Mutex<HashMap<i64, Vec<String>>>,
    paid: Mutex<Vec<(i64, i64)>>,
}

impl MemoryOrderStore {
    pub fn insert(&self, order: Order, items: Vec<OrderItem>, tags: Vec<String>) {
        let id = order.id;
        self.orders.lock().unwrap().insert(id, order);
        self.items.lock().unwrap().insert(id, items);
        self.tags.lock().unwrap().insert(id, tags);
    }

    pub fn paid_calls(&self) -> Vec<(i64, i64)> {
        self.paid.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get_order(&self, order_id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.lock().unwrap().get(&order_id).cloned())
    }

    async fn get_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_tags(&self, order_id: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_paid(&self, order_id: i64, paid_status_id: i64) -> Result<(), StoreError> {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&order_id) {
            order.status_payment_id = Some(paid_status_id);
        }
        self.paid.lock().unwrap().push((order_id, paid_status_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    next_id: Mutex<i64>,
    messages: Mutex<Vec<(i64, MessageRole, Value)>>,
    append_budget: Mutex<Option<usize>>,
}

impl MemorySessionStore {
    pub fn messages(&self) -> Vec<(i64, MessageRole, Value)> {
        self.messages.lock().unwrap().clone()
    }

    /// Accept `accepted` more appends, then fail every later one as a closed pool.
    pub fn fail_appends_after(&self, accepted: usize) {
        *self.append_budget.lock().unwrap() = Some(accepted);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, _title: Option<&str>) -> Result<i64, StoreError> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        Ok(*next_id)
    }

    async fn append_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &Value,
    ) -> Result<(), StoreError> {
        if let Some(budget) = self.append_budget.lock().unwrap().as_mut() {
            if *budget == 0 {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            *budget -= 1;
        }
        self.messages
            .lock()
            .unwrap()
            .push((session_id, role, content.clone()));
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: i64,
        limit: i64,
    ) -> Result<Vec<SessionMessage>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == session_id)
            .take(limit as usize)
            .map(|(_, role, content)| SessionMessage {
                role: role.as_str().to_string(),
                content: content.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

/// Replies with a fixed text and records `(model, prompt)` pairs.
pub struct ScriptedModel {
    reply: String,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, UpstreamError> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        Ok(self.reply.clone())
    }
}

/// Acknowledges every payload unless told to reject invoices.
#[derive(Default)]
pub struct RecordingSink {
    reject_invoices: Mutex<bool>,
    deliveries: Mutex<Vec<&'static str>>,
}

impl RecordingSink {
    pub fn reject_invoices(&self) {
        *self.reject_invoices.lock().unwrap() = true;
    }

    pub fn deliveries(&self) -> Vec<&'static str> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl VendorSink for RecordingSink {
    async fn send_invoice(&self, payload: &InvoicePayload) -> Result<Value, UpstreamError> {
        if *self.reject_invoices.lock().unwrap() {
            return Err(UpstreamError::Status {
                target: "invoice sink",
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.deliveries.lock().unwrap().push("invoice");
        Ok(json!({ "ok": true, "invoice_ref": payload.invoice_ref }))
    }

    async fn send_sales_order(&self, payload: &SalesOrderPayload) -> Result<Value, UpstreamError> {
        self.deliveries.lock().unwrap().push("sales_order");
        Ok(json!({ "ok": true, "reference_number": payload.reference_number }))
    }
}

/// Fakes wired into a [`Toolbox`], kept accessible for assertions.
pub struct Fixture {
    pub orders: Arc<MemoryOrderStore>,
    pub sessions: Arc<MemorySessionStore>,
    pub model: Arc<ScriptedModel>,
    pub sinks: Arc<RecordingSink>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            orders: Arc::new(MemoryOrderStore::default()),
            sessions: Arc::new(MemorySessionStore::default()),
            model: Arc::new(ScriptedModel::new("Todo cuadra.")),
            sinks: Arc::new(RecordingSink::default()),
        }
    }
}

impl Fixture {
    pub fn with_order(order: Order, items: Vec<OrderItem>) -> Self {
        let fixture = Self::default();
        fixture.orders.insert(order, items, vec!["vip".to_string()]);
        fixture
    }

    pub fn toolbox(&self) -> Toolbox {
        Toolbox::new(
            Arc::new(test_config()),
            self.orders.clone(),
            self.sessions.clone(),
            self.model.clone(),
            self.sinks.clone(),
        )
    }
}
