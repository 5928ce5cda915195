use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An order as read from the order-management system.
///
/// Only the fields the pipeline needs are typed. Every other column of the
/// source row is kept in `extra` so the full record can be echoed back to
/// callers and to the language model. The tax id stays in `extra` under
/// whichever key the source used (`NIT` or `nit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Customer name
    #[serde(default)]
    pub name_shipping: Option<String>,
    #[serde(default)]
    pub address_shipping: Option<String>,
    #[serde(default)]
    pub city_shipping: Option<String>,
    #[serde(default)]
    pub region_shipping: Option<String>,
    #[serde(default)]
    pub phone_shipping: Option<String>,
    #[serde(default)]
    pub email_shipping: Option<String>,
    /// Declared order total
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub total: Option<Decimal>,
    #[serde(default)]
    pub status_payment_id: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub shipping_method_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    /// Build an order from a JSON row (`to_jsonb(orders.*)`).
    pub fn from_record(record: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(record)
    }

    /// Customer tax id, from the `NIT` column or its folded `nit` form.
    pub fn tax_id(&self) -> Option<String> {
        ["NIT", "nit"]
            .iter()
            .find_map(|key| match self.extra.get(*key)? {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
    }

    /// Declared total; an absent total reads as zero.
    pub fn declared_total(&self) -> Decimal {
        self.total.unwrap_or_default()
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub orderid: i64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub qty: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub tax_amount: Decimal,
}

impl OrderItem {
    /// `qty × price`, unrounded.
    pub fn gross(&self) -> Decimal {
        Decimal::from(self.qty) * self.price
    }

    /// `qty × price` rounded to cents, half away from zero. Tax is not included.
    pub fn subtotal(&self) -> Decimal {
        round_cents(self.gross())
    }

    /// `qty × price + tax`, the amount a line contributes to the order total.
    pub fn line_total(&self) -> Decimal {
        self.gross() + self.tax_amount
    }
}

/// Sum of `qty × price + tax` over all lines.
pub fn items_total(items: &[OrderItem]) -> Decimal {
    items.iter().map(OrderItem::line_total).sum()
}

pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Numeric digest of an order handed to the analysis model and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal_items: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub declared_total: Decimal,
    /// `declared − subtotal`, rounded to cents.
    #[serde(with = "rust_decimal::serde::float")]
    pub difference: Decimal,
    /// Difference below one cent.
    pub matches: bool,
}

impl TotalsSummary {
    pub fn of(order: &Order, items: &[OrderItem]) -> Self {
        let subtotal_items = items_total(items);
        let declared_total = order.declared_total();
        let difference = round_cents(declared_total - subtotal_items);
        Self {
            subtotal_items,
            declared_total,
            difference,
            matches: difference.abs() < Decimal::new(1, 2),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{Order, OrderItem};

    pub fn order(id: i64, total: Decimal) -> Order {
        Order::from_record(json!({
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
        .map(|mut order| {
            order.total = Some(total);
            order
        })
        .expect("fixture order should deserialize")
    }

    pub fn item(orderid: i64, qty: i32, price: Decimal, tax: Decimal) -> OrderItem {
        OrderItem {
            orderid,
            sku: Some(format!("SKU-{qty}")),
            name: Some("Café molido 500g".to_string()),
            qty,
            price,
            tax_amount: tax,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;

    #[test]
    fn from_record_keeps_untyped_columns_and_reads_upper_case_tax_id() {
        let order = Order::from_record(json!({
            "id": 77,
            "NIT": "CF",
            "total": 12.5,
            "voided": true,
            "guia": "G-991"
        }))
        .unwrap();

        assert_eq!(order.tax_id().as_deref(), Some("CF"));
        assert_eq!(order.declared_total(), Decimal::new(125, 1));
        assert_eq!(order.extra.get("voided"), Some(&json!(true)));
        assert_eq!(order.extra.get("guia"), Some(&json!("G-991")));
        assert!(order.currency.is_none());
    }

    #[test]
    fn tax_id_key_is_echoed_as_the_source_spelled_it() {
        let upper = Order::from_record(json!({ "id": 1, "NIT": "CF" })).unwrap();
        let echoed = serde_json::to_value(&upper).unwrap();
        assert_eq!(echoed["NIT"], json!("CF"));
        assert!(echoed.get("nit").is_none());

        let folded = Order::from_record(json!({ "id": 2, "nit": 4455667 })).unwrap();
        assert_eq!(folded.tax_id().as_deref(), Some("4455667"));
        assert_eq!(serde_json::to_value(&folded).unwrap()["nit"], json!(4455667));
    }

    #[test]
    fn missing_total_reads_as_zero() {
        let order = Order::from_record(json!({ "id": 1 })).unwrap();
        assert_eq!(order.declared_total(), Decimal::ZERO);
    }

    #[test]
    fn subtotal_rounds_half_away_from_zero_and_excludes_tax() {
        let item = fixtures::item(1, 3, Decimal::new(2515, 3), Decimal::new(1234, 3));
        assert_eq!(item.subtotal(), Decimal::new(755, 2));
        assert_eq!(item.line_total(), Decimal::new(8779, 3));
    }

    #[test]
    fn items_total_adds_tax_per_line() {
        let items = vec![
            fixtures::item(1, 2, Decimal::new(4500, 2), Decimal::new(1000, 2)),
            fixtures::item(1, 1, Decimal::new(500, 2), Decimal::ZERO),
        ];
        assert_eq!(items_total(&items), Decimal::new(10500, 2));
    }

    #[test]
    fn summary_for_a_reconciled_order_matches() {
        let order = fixtures::order(1024, Decimal::new(10000, 2));
        let items = vec![fixtures::item(1024, 2, Decimal::new(4500, 2), Decimal::new(1000, 2))];

        let summary = TotalsSummary::of(&order, &items);
        assert_eq!(summary.subtotal_items, Decimal::new(10000, 2));
        assert_eq!(summary.difference, Decimal::ZERO);
        assert!(summary.matches);

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["declared_total"], json!(100.0));
        assert_eq!(value["matches"], json!(true));
    }

    #[test]
    fn summary_flags_a_one_cent_gap() {
        let order = fixtures::order(9, Decimal::new(1001, 2));
        let items = vec![fixtures::item(9, 1, Decimal::new(1000, 2), Decimal::ZERO)];

        let summary = TotalsSummary::of(&order, &items);
        assert_eq!(summary.difference, Decimal::new(1, 2));
        assert!(!summary.matches);
    }
}
