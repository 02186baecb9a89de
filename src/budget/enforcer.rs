//! Runtime budget enforcement.
//!
//! The enforcer accumulates consumed tokens and cost across concurrently
//! running steps. `record` and `check` share one critical section so a
//! parallel group cannot race past a ceiling unobserved. The warning fires
//! once at 80% of either ceiling; `halted` latches and is never reset.

use parking_lot::Mutex;
use serde::Serialize;

use crate::schema::Budget;

use super::WARNING_THRESHOLD;

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
}

/// Consumption snapshot, carried on budget events.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BudgetUsage {
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Default)]
struct EnforcerState {
    used_tokens: u64,
    used_cost: f64,
    warned: bool,
    halted: bool,
}

pub struct BudgetEnforcer {
    max_tokens: Option<u64>,
    max_cost: Option<f64>,
    state: Mutex<EnforcerState>,
}

impl BudgetEnforcer {
    pub fn new(budget: Budget) -> Self {
        BudgetEnforcer {
            max_tokens: budget.max_tokens,
            max_cost: budget.max_cost,
            state: Mutex::new(EnforcerState::default()),
        }
    }

    pub fn has_budget(&self) -> bool {
        self.max_tokens.is_some() || self.max_cost.is_some()
    }

    /// Accumulate consumption. Counters only ever grow; with no ceilings
    /// configured this still tracks usage for reporting.
    pub fn record(&self, tokens: u64, cost: f64) {
        let mut state = self.state.lock();
        state.used_tokens += tokens;
        state.used_cost += cost;
    }

    pub fn check(&self) -> BudgetStatus {
        let mut state = self.state.lock();
        self.check_locked(&mut state)
    }

    /// Accumulate and check in a single critical section.
    pub fn record_and_check(&self, tokens: u64, cost: f64) -> BudgetStatus {
        let mut state = self.state.lock();
        state.used_tokens += tokens;
        state.used_cost += cost;
        self.check_locked(&mut state)
    }

    fn check_locked(&self, state: &mut EnforcerState) -> BudgetStatus {
        if state.halted {
            return BudgetStatus::Exceeded;
        }
        if let Some(max_cost) = self.max_cost {
            if state.used_cost >= max_cost {
                return BudgetStatus::Exceeded;
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if state.used_tokens >= max_tokens {
                return BudgetStatus::Exceeded;
            }
        }

        if !state.warned {
            let cost_warn = self
                .max_cost
                .map(|max| state.used_cost >= max * WARNING_THRESHOLD)
                .unwrap_or(false);
            let token_warn = self
                .max_tokens
                .map(|max| state.used_tokens as f64 >= max as f64 * WARNING_THRESHOLD)
                .unwrap_or(false);
            if cost_warn || token_warn {
                state.warned = true;
                return BudgetStatus::Warning;
            }
        }

        BudgetStatus::Ok
    }

    /// Latch the halt flag. Idempotent; once set, later groups must not be
    /// dispatched.
    pub fn halt(&self) {
        self.state.lock().halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    pub fn usage(&self) -> BudgetUsage {
        let state = self.state.lock();
        BudgetUsage {
            tokens: state.used_tokens,
            cost: state.used_cost,
        }
    }

    pub fn limits(&self) -> Budget {
        Budget {
            max_tokens: self.max_tokens,
            max_cost: self.max_cost,
        }
    }

    /// Highest consumption percentage across the configured ceilings.
    pub fn consumed_percentage(&self) -> u32 {
        let state = self.state.lock();
        let mut pct: f64 = 0.0;
        if let Some(max) = self.max_cost {
            if max > 0.0 {
                pct = pct.max(state.used_cost / max * 100.0);
            }
        }
        if let Some(max) = self.max_tokens {
            if max > 0 {
                pct = pct.max(state.used_tokens as f64 / max as f64 * 100.0);
            }
        }
        pct as u32
    }
}
