//! Process-local memory with term-overlap recall.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MemoryError, MemoryProvider, MemorySnippet};

/// Most snippets one run may hold. Graphs are capped at 50 nodes, so any
/// run approaching this is writing in a loop.
const SNIPPET_CAP: usize = 256;

struct StoredSnippet {
    key: String,
    text: String,
    seq: u64,
}

#[derive(Default)]
struct RunMemory {
    snippets: Vec<StoredSnippet>,
    next_seq: u64,
}

/// In-process store.
///
/// Recall splits the query into lowercase terms and scores each snippet by
/// how many distinct terms its key or text mention; ties go to the most
/// recently written snippet.
#[derive(Default)]
pub struct InMemoryStore {
    runs: Mutex<HashMap<String, RunMemory>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryProvider for InMemoryStore {
    async fn store(&self, run_id: &str, key: &str, text: &str) -> Result<(), MemoryError> {
        let mut runs = self.runs.lock();
        let run = runs.entry(run_id.to_string()).or_default();
        let seq = run.next_seq;
        run.next_seq += 1;

        if let Some(existing) = run.snippets.iter_mut().find(|s| s.key == key) {
            existing.text = text.to_string();
            existing.seq = seq;
            return Ok(());
        }
        if run.snippets.len() >= SNIPPET_CAP {
            return Err(MemoryError::SnippetCapExceeded {
                run_id: run_id.to_string(),
                cap: SNIPPET_CAP,
            });
        }
        run.snippets.push(StoredSnippet {
            key: key.to_string(),
            text: text.to_string(),
            seq,
        });
        Ok(())
    }

    async fn recall(
        &self,
        run_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemorySnippet>, MemoryError> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let runs = self.runs.lock();
        let Some(run) = runs.get(run_id) else {
            return Ok(Vec::new());
        };

        let mut ranked: Vec<(usize, u64, MemorySnippet)> = run
            .snippets
            .iter()
            .filter_map(|snippet| {
                let score = relevance(&terms, snippet);
                (score > 0).then(|| {
                    (
                        score,
                        snippet.seq,
                        MemorySnippet {
                            key: snippet.key.clone(),
                            text: snippet.text.clone(),
                        },
                    )
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, _, snippet)| snippet)
            .collect())
    }

    async fn forget_run(&self, run_id: &str) -> Result<(), MemoryError> {
        self.runs.lock().remove(run_id);
        Ok(())
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|term| !term.is_empty())
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn relevance(terms: &[String], snippet: &StoredSnippet) -> usize {
    let key = snippet.key.to_lowercase();
    let text = snippet.text.to_lowercase();
    terms
        .iter()
        .filter(|term| key.contains(term.as_str()) || text.contains(term.as_str()))
        .count()
}
