//! Order → vendor payload mapping.
//!
//! Both builders are total: every order with any item list produces a payload.
//! Admissibility is the validation gate's job, not this module's.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::orders::{Order, OrderItem};

/// Values the payload builders do not derive from the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorDefaults {
    /// Currency used when the order carries none.
    pub currency: String,
    /// Country code written into the invoice partner address.
    pub invoice_country: String,
    /// Country name written into the sales-order shipping address.
    pub sales_order_country: String,
    /// `meta.source` of every invoice.
    pub source_tag: String,
}

impl Default for VendorDefaults {
    fn default() -> Self {
        Self {
            currency: "GTQ".to_string(),
            invoice_country: "GT".to_string(),
            sales_order_country: "Guatemala".to_string(),
            source_tag: "MCP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoicePayload {
    pub invoice_ref: String,
    pub partner: InvoicePartner,
    pub currency: String,
    pub invoice_lines: Vec<InvoiceLine>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_expected: Decimal,
    pub meta: InvoiceMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoicePartner {
    pub name: String,
    pub vat: String,
    pub email: String,
    pub phone: String,
    pub address: InvoiceAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceLine {
    pub name: Option<String>,
    pub sku: Option<String>,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub price_unit: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub tax_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceMeta {
    pub source: String,
    pub shipping_method_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesOrderPayload {
    pub reference_number: String,
    pub customer_name: String,
    pub customer_tax_id: String,
    pub currency_code: String,
    pub line_items: Vec<SalesOrderLine>,
    pub notes: String,
    pub shipping_address: ShippingAddress,
    pub org_id: String,
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalesOrderLine {
    /// Vendor item identifier; the SKU until a catalog mapping exists.
    pub item_id: Option<String>,
    pub name: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub rate: Decimal,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub tax_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomField {
    pub label: String,
    pub value: String,
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

pub fn to_invoice_payload(
    order: &Order,
    items: &[OrderItem],
    defaults: &VendorDefaults,
) -> InvoicePayload {
    // Invoice side falls back to the region before the default currency.
    let currency = non_blank(&order.currency)
        .or_else(|| non_blank(&order.region_shipping))
        .unwrap_or_else(|| defaults.currency.clone());

    let invoice_lines = items
        .iter()
        .map(|item| InvoiceLine {
            name: item.name.clone(),
            sku: item.sku.clone(),
            quantity: item.qty,
            price_unit: item.price,
            tax_amount: item.tax_amount,
            subtotal: item.subtotal(),
        })
        .collect();

    InvoicePayload {
        invoice_ref: order.id.to_string(),
        partner: InvoicePartner {
            name: text(&order.name_shipping),
            vat: order.tax_id().unwrap_or_default(),
            email: text(&order.email_shipping),
            phone: text(&order.phone_shipping),
            address: InvoiceAddress {
                street: text(&order.address_shipping),
                city: text(&order.city_shipping),
                state: text(&order.region_shipping),
                country: defaults.invoice_country.clone(),
            },
        },
        currency,
        invoice_lines,
        total_expected: order.declared_total(),
        meta: InvoiceMeta {
            source: defaults.source_tag.clone(),
            shipping_method_id: order.shipping_method_id,
        },
    }
}

pub fn to_sales_order_payload(
    order: &Order,
    items: &[OrderItem],
    org_id: &str,
    defaults: &VendorDefaults,
) -> SalesOrderPayload {
    let currency_code = non_blank(&order.currency).unwrap_or_else(|| defaults.currency.clone());

    let line_items = items
        .iter()
        .map(|item| SalesOrderLine {
            item_id: item.sku.clone(),
            name: item.name.clone(),
            rate: item.price,
            quantity: item.qty,
            tax_amount: item.tax_amount,
        })
        .collect();

    SalesOrderPayload {
        reference_number: order.id.to_string(),
        customer_name: text(&order.name_shipping),
        customer_tax_id: order.tax_id().unwrap_or_default(),
        currency_code,
        line_items,
        notes: text(&order.comment),
        shipping_address: ShippingAddress {
            address: text(&order.address_shipping),
            city: text(&order.city_shipping),
            state: text(&order.region_shipping),
            country: defaults.sales_order_country.clone(),
        },
        org_id: org_id.to_string(),
        custom_fields: vec![
            CustomField {
                label: "phone".to_string(),
                value: text(&order.phone_shipping),
            },
            CustomField {
                label: "email".to_string(),
                value: text(&order.email_shipping),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::orders::fixtures::{item, order};

    #[test]
    fn invoice_line_subtotal_is_rounded_and_tax_passes_through() {
        let order = order(31, Decimal::new(880, 2));
        let items = vec![item(31, 3, Decimal::new(2515, 3), Decimal::new(1255, 3))];

        let payload = to_invoice_payload(&order, &items, &VendorDefaults::default());
        let line = &payload.invoice_lines[0];

        assert_eq!(line.subtotal, Decimal::new(755, 2));
        assert_eq!(line.tax_amount, Decimal::new(1255, 3));
        assert_eq!(line.price_unit, Decimal::new(2515, 3));
    }

    #[test]
    fn currency_fallback_differs_between_vendors() {
        let order = order(40, Decimal::ZERO);
        let defaults = VendorDefaults::default();

        let invoice = to_invoice_payload(&order, &[], &defaults);
        let sales_order = to_sales_order_payload(&order, &[], "org-1", &defaults);

        assert_eq!(invoice.currency, "Guatemala");
        assert_eq!(sales_order.currency_code, "GTQ");
    }

    #[test]
    fn explicit_currency_wins_for_both_vendors() {
        let mut order = order(41, Decimal::ZERO);
        order.currency = Some("USD".to_string());
        let defaults = VendorDefaults::default();

        assert_eq!(to_invoice_payload(&order, &[], &defaults).currency, "USD");
        assert_eq!(
            to_sales_order_payload(&order, &[], "", &defaults).currency_code,
            "USD"
        );
    }

    #[test]
    fn invoice_without_region_uses_default_currency() {
        let mut order = order(42, Decimal::ZERO);
        order.region_shipping = None;
        let payload = to_invoice_payload(&order, &[], &VendorDefaults::default());
        assert_eq!(payload.currency, "GTQ");
        assert_eq!(payload.partner.address.state, "");
    }

    #[test]
    fn sales_order_serializes_with_numeric_amounts() {
        let order = order(1024, Decimal::new(10000, 2));
        let items = vec![item(1024, 2, Decimal::new(4500, 2), Decimal::new(1000, 2))];
        let payload = to_sales_order_payload(&order, &items, "org-77", &VendorDefaults::default());

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["reference_number"], json!("1024"));
        assert_eq!(value["org_id"], json!("org-77"));
        assert_eq!(value["line_items"][0]["item_id"], json!("SKU-2"));
        assert_eq!(value["line_items"][0]["rate"], json!(45.0));
        assert_eq!(value["line_items"][0]["tax_amount"], json!(10.0));
        assert_eq!(value["notes"], json!("Entregar por la tarde"));
        assert_eq!(value["shipping_address"]["country"], json!("Guatemala"));
        assert_eq!(
            value["custom_fields"],
            json!([
                { "label": "phone", "value": "+502 5555 0000" },
                { "label": "email", "value": "ana@example.com" }
            ])
        );
    }

    #[test]
    fn invoice_carries_partner_and_metadata() {
        let order = order(1024, Decimal::new(10000, 2));
        let defaults = VendorDefaults {
            invoice_country: "SV".to_string(),
            ..VendorDefaults::default()
        };
        let payload = to_invoice_payload(&order, &[], &defaults);

        assert_eq!(payload.invoice_ref, "1024");
        assert_eq!(payload.partner.vat, "1234567-8");
        assert_eq!(payload.partner.address.country, "SV");
        assert_eq!(payload.total_expected, Decimal::new(10000, 2));
        assert_eq!(payload.meta.source, "MCP");
        assert_eq!(payload.meta.shipping_method_id, Some(3));
    }
}
