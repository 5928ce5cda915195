//! Tool catalog and dispatcher.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::idempotency::{IDEMPOTENCY_TTL_SECS, payment_event_key};
use orchestrator_core::orders::{Order, OrderItem, TotalsSummary};
use orchestrator_core::sessions::MessageRole;
use orchestrator_core::transform::{
    InvoicePayload, SalesOrderPayload, to_invoice_payload, to_sales_order_payload,
};
use orchestrator_core::validate::{ValidationError, validate_order};
use serde_json::{Map, Value, json};

use crate::config::RuntimeConfig;
use crate::idempotency::IdempotencyStore;
use crate::store::{OrderStore, SessionStore, StoreError};
use crate::upstream::{LanguageModel, UpstreamError, VendorSink};

/// Maximum number of messages returned by `sessions.get_history`.
pub const HISTORY_LIMIT: i64 = 200;

/// `source` recorded for payment events that arrive without one.
pub const DEFAULT_PAYMENT_SOURCE: &str = "mcp-tool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    OrdersAnalyze,
    OrdersTransform,
    OrdersSendMock,
    WebhooksOrderPaid,
    SessionsCreate,
    SessionsGetHistory,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::OrdersAnalyze,
        ToolName::OrdersTransform,
        ToolName::OrdersSendMock,
        ToolName::WebhooksOrderPaid,
        ToolName::SessionsCreate,
        ToolName::SessionsGetHistory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::OrdersAnalyze => "orders.analyze",
            ToolName::OrdersTransform => "orders.transform",
            ToolName::OrdersSendMock => "orders.send_mock",
            ToolName::WebhooksOrderPaid => "webhooks.order_paid",
            ToolName::SessionsCreate => "sessions.create",
            ToolName::SessionsGetHistory => "sessions.get_history",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    fn description(self) -> &'static str {
        match self {
            ToolName::OrdersAnalyze => "Analiza una orden con LLM",
            ToolName::OrdersTransform => "Convierte la orden a payloads Odoo/Zoho (no los envía)",
            ToolName::OrdersSendMock => "Genera y envía payloads a los endpoints mock (Odoo/Zoho)",
            ToolName::WebhooksOrderPaid => "Marca como pagada, valida y prepara payloads",
            ToolName::SessionsCreate => "Crea una sesión de conversación",
            ToolName::SessionsGetHistory => "Devuelve el historial de una sesión",
        }
    }

    fn input_schema(self) -> Value {
        let id = json!({ "type": ["integer", "string"] });
        match self {
            ToolName::OrdersAnalyze => json!({
                "type": "object",
                "required": ["order_id"],
                "properties": {
                    "order_id": id,
                    "prompt": { "type": "string" },
                    "model": { "type": "string" },
                    "session_id": id
                }
            }),
            ToolName::OrdersTransform | ToolName::OrdersSendMock => json!({
                "type": "object",
                "required": ["order_id"],
                "properties": {
                    "order_id": id,
                    "session_id": id
                }
            }),
            ToolName::WebhooksOrderPaid => json!({
                "type": "object",
                "required": ["order_id", "secret"],
                "properties": {
                    "order_id": id,
                    "secret": { "type": "string" },
                    "source": { "type": "string" },
                    "session_id": id
                }
            }),
            ToolName::SessionsCreate => json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" }
                }
            }),
            ToolName::SessionsGetHistory => json!({
                "type": "object",
                "required": ["session_id"],
                "properties": {
                    "session_id": id
                }
            }),
        }
    }
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolName::ALL
        .into_iter()
        .map(|tool| ToolDefinition {
            name: tool.as_str(),
            description: tool.description(),
            input_schema: tool.input_schema(),
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog entry '{0}' has no handler")]
    Unhandled(String),
    #[error("catalog lists '{0}' more than once")]
    Duplicate(String),
    #[error("schema of '{name}' requires undeclared property '{property}'")]
    UndeclaredRequired { name: String, property: String },
}

/// Checked once at startup: every advertised tool resolves to a handler and
/// every required argument is declared in its schema.
pub fn validate_catalog() -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for definition in tool_definitions() {
        if ToolName::parse(definition.name).is_none() {
            return Err(CatalogError::Unhandled(definition.name.to_string()));
        }
        if !seen.insert(definition.name) {
            return Err(CatalogError::Duplicate(definition.name.to_string()));
        }
        let properties = definition.input_schema.get("properties");
        let required = definition
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for property in required.iter().filter_map(Value::as_str) {
            if properties.and_then(|p| p.get(property)).is_none() {
                return Err(CatalogError::UndeclaredRequired {
                    name: definition.name.to_string(),
                    property: property.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("order_not_found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ToolError {
    /// Conventional HTTP status for caller-side failures; `None` for internal ones.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ToolError::InvalidArgument(_) => Some(400),
            ToolError::Unauthorized => Some(401),
            ToolError::NotFound => Some(404),
            ToolError::Validation(_) | ToolError::Upstream(_) | ToolError::Store(_) => None,
        }
    }
}

/// A payment notification after argument parsing.
#[derive(Debug, Clone)]
pub struct OrderPaidRequest {
    pub order_id: i64,
    pub secret: String,
    pub source: String,
    pub session_id: Option<i64>,
}

#[derive(Debug)]
pub enum OrderPaidOutcome {
    /// The same event was already admitted within the TTL window.
    Duplicate,
    /// Marked paid but not admissible for the vendors.
    Rejected {
        error: ValidationError,
        order: Order,
        items: Vec<OrderItem>,
    },
    Accepted {
        status_payment_id: Option<i64>,
        invoice: InvoicePayload,
        sales_order: SalesOrderPayload,
    },
}

impl OrderPaidOutcome {
    pub fn to_value(&self) -> Value {
        match self {
            OrderPaidOutcome::Duplicate => json!({ "ok": true, "status": "duplicate_ignored" }),
            OrderPaidOutcome::Rejected {
                error,
                order,
                items,
            } => json!({
                "ok": false,
                "error": error.to_string(),
                "order": order,
                "items": items,
            }),
            OrderPaidOutcome::Accepted {
                status_payment_id,
                invoice,
                sales_order,
            } => json!({
                "ok": true,
                "status_payment_id": status_payment_id,
                "invoice": invoice,
                "sales_order": sales_order,
            }),
        }
    }
}

fn parse_id(key: &str, value: &Value) -> Result<i64, ToolError> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ToolError::InvalidArgument(format!("'{key}' must be an integer")))
}

fn required_id(args: &Map<String, Value>, key: &str) -> Result<i64, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Err(ToolError::InvalidArgument(format!(
            "Missing required field '{key}'"
        ))),
        Some(value) => parse_id(key, value),
    }
}

fn optional_id(args: &Map<String, Value>, key: &str) -> Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_id(key, value).map(Some),
    }
}

fn optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.trim().to_string())),
        Some(_) => Err(ToolError::InvalidArgument(format!(
            "'{key}' must be a string"
        ))),
    }
}

/// Executes tools against the injected backends. Shared by both transports.
pub struct Toolbox {
    config: Arc<RuntimeConfig>,
    orders: Arc<dyn OrderStore>,
    sessions: Arc<dyn SessionStore>,
    model: Arc<dyn LanguageModel>,
    sinks: Arc<dyn VendorSink>,
}

impl Toolbox {
    pub fn new(
        config: Arc<RuntimeConfig>,
        orders: Arc<dyn OrderStore>,
        sessions: Arc<dyn SessionStore>,
        model: Arc<dyn LanguageModel>,
        sinks: Arc<dyn VendorSink>,
    ) -> Self {
        Self {
            config,
            orders,
            sessions,
            model,
            sinks,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub async fn call(
        &self,
        tool: ToolName,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        match tool {
            ToolName::OrdersAnalyze => self.analyze(args).await,
            ToolName::OrdersTransform => self.transform(args).await,
            ToolName::OrdersSendMock => self.send_mock(args).await,
            ToolName::WebhooksOrderPaid => self.order_paid_tool(args).await,
            ToolName::SessionsCreate => self.create_session(args).await,
            ToolName::SessionsGetHistory => self.session_history(args).await,
        }
    }

    async fn load_order(&self, order_id: i64) -> Result<Order, ToolError> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(ToolError::NotFound)
    }

    async fn log(
        &self,
        session_id: Option<i64>,
        role: MessageRole,
        content: Value,
    ) -> Result<(), ToolError> {
        if let Some(session_id) = session_id {
            self.sessions
                .append_message(session_id, role, &content)
                .await?;
        }
        Ok(())
    }

    /// Session logging after an irreversible step. A failed append is logged
    /// and dropped so the caller still sees the completed work.
    async fn log_after_commit(&self, session_id: Option<i64>, role: MessageRole, content: Value) {
        if let Err(err) = self.log(session_id, role, content).await {
            tracing::warn!(
                event = "session_log_skipped",
                session_id,
                error = %err,
                "Session append failed after side effects and was ignored"
            );
        }
    }

    /// Load, validate and build both payloads.
    async fn prepare_payloads(
        &self,
        order_id: i64,
    ) -> Result<(InvoicePayload, SalesOrderPayload), ToolError> {
        let order = self.load_order(order_id).await?;
        let items = self.orders.get_items(order_id).await?;
        validate_order(&order, &items, self.config.totals_tolerance)?;
        Ok(self.build_payloads(&order, &items))
    }

    fn build_payloads(
        &self,
        order: &Order,
        items: &[OrderItem],
    ) -> (InvoicePayload, SalesOrderPayload) {
        let defaults = &self.config.vendor_defaults;
        (
            to_invoice_payload(order, items, defaults),
            to_sales_order_payload(order, items, &self.config.sales_org_id, defaults),
        )
    }

    async fn analyze(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let order_id = required_id(args, "order_id")?;
        let instruction = optional_string(args, "prompt")?;
        let model = optional_string(args, "model")?
            .unwrap_or_else(|| self.config.ollama_model.clone());
        let session_id = optional_id(args, "session_id")?;

        let order = self.load_order(order_id).await?;
        let items = self.orders.get_items(order_id).await?;
        let tags = self.orders.get_tags(order_id).await?;
        let summary = TotalsSummary::of(&order, &items);

        let instruction = instruction.unwrap_or_else(|| self.config.analyze_prompt.trim().to_string());
        let prompt = analysis_prompt(&instruction, &order, &items, &tags, &summary);

        self.log(
            session_id,
            MessageRole::User,
            json!({ "tool": ToolName::OrdersAnalyze.as_str(), "prompt": prompt }),
        )
        .await?;

        let analysis = self.model.generate(&model, &prompt).await?;
        tracing::info!(event = "order_analyzed", order_id, model = %model);

        self.log(
            session_id,
            MessageRole::Assistant,
            json!({ "tool": ToolName::OrdersAnalyze.as_str(), "analysis": analysis }),
        )
        .await?;

        Ok(json!({
            "ok": true,
            "order_id": order_id,
            "model": model,
            "analysis": analysis,
            "summary": summary,
        }))
    }

    async fn transform(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let order_id = required_id(args, "order_id")?;
        let session_id = optional_id(args, "session_id")?;

        let (invoice, sales_order) = self.prepare_payloads(order_id).await?;

        self.log(
            session_id,
            MessageRole::Tool,
            json!({
                "tool": ToolName::OrdersTransform.as_str(),
                "invoice": invoice,
                "sales_order": sales_order,
            }),
        )
        .await?;

        Ok(json!({
            "ok": true,
            "order_id": order_id,
            "invoice": invoice,
            "sales_order": sales_order,
        }))
    }

    async fn send_mock(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let order_id = required_id(args, "order_id")?;
        let session_id = optional_id(args, "session_id")?;

        let (invoice, sales_order) = self.prepare_payloads(order_id).await?;

        // Sequential: a rejected invoice stops the sales order from being sent.
        let invoice_result = self.sinks.send_invoice(&invoice).await?;
        let sales_order_result = self.sinks.send_sales_order(&sales_order).await?;
        tracing::info!(event = "payloads_delivered", order_id);

        self.log_after_commit(
            session_id,
            MessageRole::Tool,
            json!({
                "tool": ToolName::OrdersSendMock.as_str(),
                "invoice": invoice,
                "sales_order": sales_order,
                "invoice_result": invoice_result,
                "sales_order_result": sales_order_result,
            }),
        )
        .await;

        Ok(json!({
            "ok": true,
            "order_id": order_id,
            "invoice_result": invoice_result,
            "sales_order_result": sales_order_result,
        }))
    }

    async fn order_paid_tool(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let secret = args
            .get("secret")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.authorize_webhook(&secret)?;

        let request = OrderPaidRequest {
            order_id: required_id(args, "order_id")?,
            secret,
            source: optional_string(args, "source")?
                .unwrap_or_else(|| DEFAULT_PAYMENT_SOURCE.to_string()),
            session_id: optional_id(args, "session_id")?,
        };
        let outcome = self.process_payment(&request).await?;
        Ok(outcome.to_value())
    }

    pub fn authorize_webhook(&self, secret: &str) -> Result<(), ToolError> {
        if secret.is_empty() || secret != self.config.webhook_secret {
            tracing::warn!(event = "webhook_rejected", reason = "bad_secret");
            return Err(ToolError::Unauthorized);
        }
        Ok(())
    }

    /// Secret check, then single admission per `source:order_id`, then the payment flow.
    pub async fn order_paid_once(
        &self,
        gate: &dyn IdempotencyStore,
        request: &OrderPaidRequest,
    ) -> Result<OrderPaidOutcome, ToolError> {
        self.authorize_webhook(&request.secret)?;

        let key = payment_event_key(&request.source, request.order_id);
        let admitted = gate
            .admit_once(&key, Duration::from_secs(IDEMPOTENCY_TTL_SECS))
            .await?;
        if !admitted {
            tracing::info!(
                event = "payment_duplicate_ignored",
                order_id = request.order_id,
                source = %request.source
            );
            return Ok(OrderPaidOutcome::Duplicate);
        }

        self.process_payment(request).await
    }

    /// Marks the order paid and prepares payloads. Validation failures are
    /// reported in the outcome, not as errors.
    pub async fn process_payment(
        &self,
        request: &OrderPaidRequest,
    ) -> Result<OrderPaidOutcome, ToolError> {
        let order_id = request.order_id;
        self.load_order(order_id).await?;

        self.log(
            request.session_id,
            MessageRole::User,
            json!({
                "tool": ToolName::WebhooksOrderPaid.as_str(),
                "order_id": order_id,
                "source": request.source,
            }),
        )
        .await?;

        self.orders
            .mark_paid(order_id, self.config.paid_status_id)
            .await?;
        tracing::info!(
            event = "order_marked_paid",
            order_id,
            source = %request.source,
            status_payment_id = self.config.paid_status_id
        );

        let order = self.load_order(order_id).await?;
        let items = self.orders.get_items(order_id).await?;

        let outcome = match validate_order(&order, &items, self.config.totals_tolerance) {
            Err(error) => {
                tracing::warn!(event = "paid_order_rejected", order_id, reason = %error);
                OrderPaidOutcome::Rejected {
                    error,
                    order,
                    items,
                }
            }
            Ok(()) => {
                let (invoice, sales_order) = self.build_payloads(&order, &items);
                OrderPaidOutcome::Accepted {
                    status_payment_id: order.status_payment_id,
                    invoice,
                    sales_order,
                }
            }
        };

        self.log_after_commit(request.session_id, MessageRole::Assistant, outcome.to_value())
            .await;
        Ok(outcome)
    }

    async fn create_session(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let title = optional_string(args, "title")?;
        let session_id = self.sessions.create_session(title.as_deref()).await?;
        tracing::info!(event = "session_created", session_id);
        Ok(json!({ "ok": true, "session_id": session_id }))
    }

    async fn session_history(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let session_id = required_id(args, "session_id")?;
        let messages = self.sessions.get_history(session_id, HISTORY_LIMIT).await?;
        Ok(json!({
            "ok": true,
            "session_id": session_id,
            "messages": messages,
        }))
    }
}

fn analysis_prompt(
    instruction: &str,
    order: &Order,
    items: &[OrderItem],
    tags: &[String],
    summary: &TotalsSummary,
) -> String {
    format!(
        "{instruction}\n\n\
         ORDER: {order}\n\
         ITEMS: {items}\n\
         TAGS: {tags}\n\
         \nResumen numérico:\n\
         - Subtotal items: {subtotal}\n\
         - Total orden: {declared}\n\
         - Diferencia: {difference}\n\
         Explica si cuadran o no y sugiere la siguiente acción.\n",
        order = json!(order),
        items = json!(items),
        tags = json!(tags),
        subtotal = summary.subtotal_items,
        declared = summary.declared_total,
        difference = summary.difference,
    )
}
