pub mod error;
pub mod idempotency;
pub mod orders;
pub mod sessions;
pub mod transform;
pub mod validate;
