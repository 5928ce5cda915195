//! At-most-once admission of payment events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;

use crate::store::StoreError;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// True exactly once per `key` within `ttl`. Must be a single atomic step.
    async fn admit_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// Keys live in `idempotency_keys`; an expired row is reclaimed by the same upsert.
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn admit_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let admitted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO idempotency_keys (key, expires_at)
            VALUES ($1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= now()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(admitted.is_some())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Process-local gate. Only sound for a single instance.
pub struct MemoryIdempotencyStore<C = SystemClock> {
    clock: C,
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryIdempotencyStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryIdempotencyStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryIdempotencyStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn admit(&self, key: &str, ttl: Duration) -> bool {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.retain(|_, expires_at| *expires_at > now);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), now + ttl);
        true
    }
}

#[async_trait]
impl<C: Clock> IdempotencyStore for MemoryIdempotencyStore<C> {
    async fn admit_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.admit(key, ttl))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use orchestrator_core::idempotency::payment_event_key;

    use super::*;

    /// Clock advanced by hand.
    #[derive(Clone)]
    struct ManualClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + *self.offset.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn admits_once_then_again_after_expiry() {
        let clock = ManualClock::new();
        let store = MemoryIdempotencyStore::with_clock(clock.clone());
        let key = payment_event_key("shopify", 1024);
        let ttl = Duration::from_secs(3600);

        assert!(store.admit_once(&key, ttl).await.unwrap());
        assert!(!store.admit_once(&key, ttl).await.unwrap());

        clock.advance(Duration::from_secs(3599));
        assert!(!store.admit_once(&key, ttl).await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(store.admit_once(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let store = MemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.admit_once("idempo:a", ttl).await.unwrap());
        assert!(store.admit_once("idempo:b", ttl).await.unwrap());
        assert!(!store.admit_once("idempo:a", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_admissions_let_exactly_one_through() {
        let store = Arc::new(MemoryIdempotencyStore::new());
        let ttl = Duration::from_secs(60);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.admit_once("idempo:race", ttl).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
