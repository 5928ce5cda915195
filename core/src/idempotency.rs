use sha2::{Digest, Sha256};

/// Admission window for a payment event.
pub const IDEMPOTENCY_TTL_SECS: u64 = 3600;

/// Key identifying one logical payment event: `idempo:` + SHA-256 of `source:order_id`.
pub fn payment_event_key(source: &str, order_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source}:{order_id}").as_bytes());
    format!("idempo:{}", hex::encode(hasher.finalize()))
}
