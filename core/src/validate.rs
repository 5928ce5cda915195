//! Admissibility checks run before an order is turned into vendor payloads.

use rust_decimal::Decimal;

use crate::orders::{Order, OrderItem, items_total};

/// Absolute tolerance used when reconciling line totals with the declared total.
pub const DEFAULT_TOTALS_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("La orden no tiene items.")]
    EmptyOrder,
    #[error("Faltan datos del cliente/dirección.")]
    IncompleteCustomer,
    #[error("Total no cuadra: líneas={computed:.2} vs orden={declared:.2}")]
    TotalMismatch { computed: Decimal, declared: Decimal },
}

pub fn items_present(items: &[OrderItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::EmptyOrder);
    }
    Ok(())
}

pub fn customer_complete(order: &Order) -> Result<(), ValidationError> {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if !(present(&order.name_shipping) && present(&order.address_shipping)) {
        return Err(ValidationError::IncompleteCustomer);
    }
    Ok(())
}

/// Fails only when the difference is strictly greater than `tolerance`.
pub fn totals_reconcile(
    order: &Order,
    items: &[OrderItem],
    tolerance: Decimal,
) -> Result<(), ValidationError> {
    let computed = items_total(items);
    let declared = order.declared_total();
    if (computed - declared).abs() > tolerance {
        return Err(ValidationError::TotalMismatch { computed, declared });
    }
    Ok(())
}

/// Items, then customer, then totals. The first failure wins.
pub fn validate_order(
    order: &Order,
    items: &[OrderItem],
    tolerance: Decimal,
) -> Result<(), ValidationError> {
    items_present(items)?;
    customer_complete(order)?;
    totals_reconcile(order, items, tolerance)
}
