//! Time and id generation seams.
//!
//! The driver and publisher never call `Utc::now` or `Uuid::new_v4`
//! directly; they go through [`RuntimeContext`] so tests can pin timestamps
//! and ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// Runtime context providing time and id generation.
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider),
            id_generator: Arc::new(RealIdGenerator),
        }
    }
}

impl RuntimeContext {
    pub fn fixed(timestamp_secs: i64, id_prefix: impl Into<String>) -> Self {
        Self {
            time_provider: Arc::new(FakeTimeProvider::new(timestamp_secs)),
            id_generator: Arc::new(FakeIdGenerator::new(id_prefix.into())),
        }
    }
}

pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// ISO-8601 UTC with millisecond precision, the event envelope format.
    fn now_iso(&self) -> String {
        self.now()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    pub fixed_timestamp: i64,
}

impl FakeTimeProvider {
    pub fn new(fixed_timestamp: i64) -> Self {
        Self { fixed_timestamp }
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.fixed_timestamp, 0)
            .single()
            .unwrap_or_default()
    }
}

pub struct FakeIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}
