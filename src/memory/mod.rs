//! Per-run memory.
//!
//! A step with `memory_store_key` persists its output text under that key;
//! a later step with `memory_recall_query` pulls the most relevant snippets
//! back into its prompt. Everything is scoped to one run id and dies with
//! the provider; cross-run persistence stays out of scope.

pub mod in_memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use in_memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory backend error: {0}")]
    Backend(String),
    #[error("run '{run_id}' hit the snippet cap of {cap}")]
    SnippetCapExceeded { run_id: String, cap: usize },
}

/// One recalled piece of step output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnippet {
    pub key: String,
    pub text: String,
}

/// Storage seam for per-run step output.
///
/// The engine only ever hands text in and wants ranked text back: `store`
/// is called by the driver after a step completes, `recall` while building
/// a dependent step's input, `forget_run` when a run's memory is no longer
/// needed.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Persist `text` under `key`. Writing an existing key replaces its
    /// text; the step that owns the key is the only writer in practice.
    async fn store(&self, run_id: &str, key: &str, text: &str) -> Result<(), MemoryError>;

    /// Up to `limit` snippets ranked by relevance to the free-text query.
    /// Snippets sharing no term with the query are never returned.
    async fn recall(
        &self,
        run_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemorySnippet>, MemoryError>;

    /// Drop everything stored for a run.
    async fn forget_run(&self, run_id: &str) -> Result<(), MemoryError>;
}
