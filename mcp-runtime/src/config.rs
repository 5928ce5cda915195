use clap::Args;
use orchestrator_core::transform::VendorDefaults;
use rust_decimal::Decimal;

pub const DEFAULT_ANALYZE_PROMPT: &str = "Eres un asistente MCP de integraciones. Analiza la orden y responde en español, \
breve y claro: (1) si los totales parecen coherentes con las líneas, \
(2) campos críticos que faltan para Odoo/Zoho (NIT, dirección, SKU, qty>0), \
(3) alertas de riesgo (voided, estado de pago/envío), (4) sugerencia de acción.";

/// Runtime settings shared by the stdio and HTTP binaries.
#[derive(Args, Clone, Debug)]
pub struct RuntimeArgs {
    /// Language-model host
    #[arg(long, env = "OLLAMA_HOST", default_value = "127.0.0.1")]
    pub ollama_host: String,
    /// Language-model port
    #[arg(long, env = "OLLAMA_PORT", default_value_t = 11434)]
    pub ollama_port: u16,
    /// Model used when a call does not name one
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3.1")]
    pub ollama_model: String,
    /// Base instruction for orders.analyze
    #[arg(long, env = "ANALYZE_PROMPT", default_value = DEFAULT_ANALYZE_PROMPT)]
    pub analyze_prompt: String,
    /// Shared secret expected by the order-paid webhook
    #[arg(long, env = "MCP_WEBHOOK_SECRET", default_value = "changeme", hide_env_values = true)]
    pub webhook_secret: String,
    /// Payment-status id written when an order is marked paid
    #[arg(long, env = "PAID_STATUS_ID", default_value_t = 2)]
    pub paid_status_id: i64,
    /// Receiver for invoice payloads
    #[arg(
        long,
        env = "SINK_ODOO_URL",
        default_value = "http://127.0.0.1:8080/mock/odoo/invoices"
    )]
    pub invoice_sink_url: String,
    /// Receiver for sales-order payloads
    #[arg(
        long,
        env = "SINK_ZOHO_URL",
        default_value = "http://127.0.0.1:8080/mock/zoho/salesorders"
    )]
    pub sales_order_sink_url: String,
    /// Organization id stamped on sales-order payloads
    #[arg(long, env = "ORG_ID_ZOHO", default_value = "")]
    pub sales_org_id: String,
    /// Currency used when an order carries none
    #[arg(long, env = "DEFAULT_CURRENCY", default_value = "GTQ")]
    pub default_currency: String,
    /// Country code on invoice partner addresses
    #[arg(long, env = "INVOICE_COUNTRY", default_value = "GT")]
    pub invoice_country: String,
    /// Country name on sales-order shipping addresses
    #[arg(long, env = "SALES_ORDER_COUNTRY", default_value = "Guatemala")]
    pub sales_order_country: String,
    /// Allowed absolute difference between line totals and the declared total
    #[arg(long, env = "TOTALS_TOLERANCE", default_value = "0.05")]
    pub totals_tolerance: Decimal,
    /// Entity-table id of orders in the generic tag join
    #[arg(long, env = "TAG_ENTITY_TABLE", default_value_t = 7)]
    pub tag_entity_table: i64,
}

/// Frozen configuration, built once at startup and shared by reference.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub ollama_url: String,
    pub ollama_model: String,
    pub analyze_prompt: String,
    pub webhook_secret: String,
    pub paid_status_id: i64,
    pub invoice_sink_url: String,
    pub sales_order_sink_url: String,
    pub sales_org_id: String,
    pub vendor_defaults: VendorDefaults,
    pub totals_tolerance: Decimal,
    pub tag_entity_table: i64,
}

impl From<RuntimeArgs> for RuntimeConfig {
    fn from(args: RuntimeArgs) -> Self {
        Self {
            ollama_url: format!("http://{}:{}", args.ollama_host, args.ollama_port),
            ollama_model: args.ollama_model,
            analyze_prompt: args.analyze_prompt,
            webhook_secret: args.webhook_secret,
            paid_status_id: args.paid_status_id,
            invoice_sink_url: args.invoice_sink_url,
            sales_order_sink_url: args.sales_order_sink_url,
            sales_org_id: args.sales_org_id,
            vendor_defaults: VendorDefaults {
                currency: args.default_currency,
                invoice_country: args.invoice_country,
                sales_order_country: args.sales_order_country,
                ..VendorDefaults::default()
            },
            totals_tolerance: args.totals_tolerance,
            tag_entity_table: args.tag_entity_table,
        }
    }
}
