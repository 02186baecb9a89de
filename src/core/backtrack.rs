//! Per-step recovery: bounded retry with exponential backoff, one-shot
//! fallback substitution.
//!
//! A step gets `max_retries + 1` attempts. Transient failures, timeouts and
//! rate limits are retried; configuration errors are final on the first
//! occurrence; a schema-invalid payload is retried exactly once. When every
//! attempt fails and the node declares a fallback, the fallback runs once
//! with the same input. Fallback chains are forbidden by construction: the
//! fallback path has no fallback of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::budget::{BudgetEnforcer, BudgetStatus};
use crate::core::driver::EngineConfig;
use crate::core::event_bus::{EventEmitter, ExecutionEvent};
use crate::error::{StepError, StepErrorKind};
use crate::llm::{AdapterRegistry, CompletionRequest, CompletionResponse};
use crate::schema::NodeData;

/// Backoff base delay for attempt 0.
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// A successful step attempt.
#[derive(Debug, Clone)]
pub struct StepSuccess {
    pub text: String,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub model_used: String,
    pub attempts: u32,
}

/// Result of running a declared fallback once.
#[derive(Debug)]
pub struct FallbackOutcome {
    pub fallback_id: String,
    pub agent_name: String,
    pub result: Result<StepSuccess, StepError>,
}

/// Terminal outcome of one step, handed back to the driver.
#[derive(Debug)]
pub enum StepOutcome {
    Completed(StepSuccess),
    FailedWithFallback {
        error: StepError,
        attempts: u32,
        fallback: FallbackOutcome,
    },
    Failed {
        error: StepError,
        attempts: u32,
    },
    Cancelled,
}

/// Everything a step needs beyond its own configuration.
#[derive(Clone)]
pub struct StepContext {
    pub adapters: Arc<AdapterRegistry>,
    pub emitter: EventEmitter,
    pub enforcer: Arc<BudgetEnforcer>,
    pub cancel: CancellationToken,
    pub config: EngineConfig,
}

/// One step to execute: resolved node config, marshalled input, and the
/// pre-resolved fallback (if declared).
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub node_id: String,
    pub agent_name: String,
    pub parallel_group: usize,
    pub config: NodeData,
    pub prompt: String,
    pub fallback: Option<FallbackSpec>,
}

#[derive(Debug, Clone)]
pub struct FallbackSpec {
    pub node_id: String,
    pub agent_name: String,
    pub config: NodeData,
}

enum Attempt {
    Ok(CompletionResponse),
    Err(StepError),
    Cancelled,
}

/// Run one step to a terminal outcome. Never panics the run; every failure
/// mode maps to a [`StepOutcome`] variant.
pub async fn execute_step(request: StepRequest, ctx: StepContext) -> StepOutcome {
    let max_retries = request.config.max_retries.min(ctx.config.max_retry_cap);

    let mut attempts = 0u32;
    let mut invalid_response_retries = 0u32;
    let mut last_error = StepError::Transient("step was never attempted".to_string());

    loop {
        if ctx.cancel.is_cancelled() {
            return StepOutcome::Cancelled;
        }
        let attempt_index = attempts;
        attempts += 1;

        match run_attempt(&request.config, &request.prompt, &ctx).await {
            Attempt::Ok(response) => {
                let success = StepSuccess {
                    text: response.text,
                    tokens_prompt: response.tokens_prompt,
                    tokens_completion: response.tokens_completion,
                    cost: response.cost,
                    latency_ms: response.latency_ms,
                    model_used: response.model_used,
                    attempts,
                };
                record_usage(&ctx, &success).await;
                return StepOutcome::Completed(success);
            }
            Attempt::Cancelled => return StepOutcome::Cancelled,
            Attempt::Err(error) => {
                let will_retry = attempt_index < max_retries
                    && match error.kind() {
                        StepErrorKind::Configuration => false,
                        StepErrorKind::InvalidResponse => {
                            invalid_response_retries += 1;
                            invalid_response_retries <= 1
                        }
                        _ => true,
                    };

                warn!(
                    node_id = %request.node_id,
                    attempt = attempts,
                    error = %error,
                    will_retry,
                    "step attempt failed"
                );
                ctx.emitter
                    .emit(ExecutionEvent::AgentFailed {
                        agent_id: request.node_id.clone(),
                        error: error.to_string(),
                        will_retry,
                        retries_remaining: if will_retry {
                            max_retries - attempt_index
                        } else {
                            0
                        },
                        timestamp: ctx.emitter.timestamp(),
                    })
                    .await;

                if !will_retry {
                    last_error = error;
                    break;
                }

                let delay = backoff_delay(attempt_index, &error, ctx.config.retry_jitter);
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return StepOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
                ctx.emitter
                    .emit(ExecutionEvent::AgentRetrying {
                        agent_id: request.node_id.clone(),
                        retry_number: attempt_index + 1,
                        timestamp: ctx.emitter.timestamp(),
                    })
                    .await;
                last_error = error;
            }
        }
    }

    let Some(ref fallback) = request.fallback else {
        return StepOutcome::Failed {
            error: last_error,
            attempts,
        };
    };

    let reason = fallback_reason(&last_error, attempts, max_retries);
    ctx.emitter
        .emit(ExecutionEvent::AgentFallback {
            original_agent_id: request.node_id.clone(),
            fallback_agent_id: fallback.node_id.clone(),
            reason: reason.to_string(),
            timestamp: ctx.emitter.timestamp(),
        })
        .await;

    let outcome = execute_fallback(&request, fallback.clone(), &ctx).await;
    match outcome {
        Some(fallback_outcome) => StepOutcome::FailedWithFallback {
            error: last_error,
            attempts,
            fallback: fallback_outcome,
        },
        None => StepOutcome::Cancelled,
    }
}

/// Run a declared fallback once with the original step's input. No retries,
/// and its own failure is terminal no matter what it declares.
async fn execute_fallback(
    request: &StepRequest,
    fallback: FallbackSpec,
    ctx: &StepContext,
) -> Option<FallbackOutcome> {
    ctx.emitter
        .emit(ExecutionEvent::AgentStarted {
            agent_id: fallback.node_id.clone(),
            agent_name: fallback.agent_name.clone(),
            parallel_group: request.parallel_group,
            timestamp: ctx.emitter.timestamp(),
        })
        .await;

    match run_attempt(&fallback.config, &request.prompt, ctx).await {
        Attempt::Cancelled => None,
        Attempt::Ok(response) => {
            let success = StepSuccess {
                text: response.text,
                tokens_prompt: response.tokens_prompt,
                tokens_completion: response.tokens_completion,
                cost: response.cost,
                latency_ms: response.latency_ms,
                model_used: response.model_used,
                attempts: 1,
            };
            record_usage(ctx, &success).await;
            Some(FallbackOutcome {
                fallback_id: fallback.node_id,
                agent_name: fallback.agent_name,
                result: Ok(success),
            })
        }
        Attempt::Err(error) => {
            warn!(
                fallback_id = %fallback.node_id,
                original = %request.node_id,
                error = %error,
                "fallback failed"
            );
            ctx.emitter
                .emit(ExecutionEvent::AgentFailed {
                    agent_id: fallback.node_id.clone(),
                    error: error.to_string(),
                    will_retry: false,
                    retries_remaining: 0,
                    timestamp: ctx.emitter.timestamp(),
                })
                .await;
            Some(FallbackOutcome {
                fallback_id: fallback.node_id,
                agent_name: fallback.agent_name,
                result: Err(error),
            })
        }
    }
}

async fn run_attempt(config: &NodeData, prompt: &str, ctx: &StepContext) -> Attempt {
    let Some(adapter) = ctx.adapters.get(&config.provider) else {
        return Attempt::Err(StepError::Configuration(format!(
            "no adapter registered for provider '{}'",
            config.provider
        )));
    };

    let request = CompletionRequest {
        model: config.model.clone(),
        system_prompt: config.system_prompt.clone(),
        user_message: prompt.to_string(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        timeout_secs: config.timeout_seconds,
    };
    let timeout = Duration::from_secs(config.timeout_seconds);

    tokio::select! {
        _ = ctx.cancel.cancelled() => Attempt::Cancelled,
        result = tokio::time::timeout(timeout, adapter.complete(request)) => match result {
            Err(_elapsed) => Attempt::Err(StepError::Timeout),
            Ok(Ok(response)) => Attempt::Ok(response),
            Ok(Err(adapter_error)) => Attempt::Err(adapter_error.into()),
        }
    }
}

/// Feed consumption into the enforcer; a warning is published once, a
/// ceiling breach latches the halt flag.
async fn record_usage(ctx: &StepContext, success: &StepSuccess) {
    let tokens = success.tokens_prompt + success.tokens_completion;
    match ctx.enforcer.record_and_check(tokens, success.cost) {
        BudgetStatus::Ok => {}
        BudgetStatus::Warning => {
            ctx.emitter
                .emit(ExecutionEvent::BudgetWarning {
                    consumed: ctx.enforcer.usage(),
                    budget: ctx.enforcer.limits(),
                    percentage: ctx.enforcer.consumed_percentage(),
                    timestamp: ctx.emitter.timestamp(),
                })
                .await;
        }
        BudgetStatus::Exceeded => {
            ctx.enforcer.halt();
        }
    }
}

/// Backoff between attempts: `min(base * 2^attempt, cap)`, overridden by a
/// provider-supplied retry-after on rate limits.
fn backoff_delay(attempt: u32, error: &StepError, jitter: bool) -> Duration {
    if let Some(retry_after) = error.retry_after_secs() {
        return Duration::from_secs(retry_after);
    }
    let exponential = BASE_BACKOFF
        .as_millis()
        .saturating_mul(1u128 << attempt.min(31)) as u64;
    let capped = exponential.min(MAX_BACKOFF.as_millis() as u64);
    let millis = if jitter {
        capped + (rand::random::<f64>() * capped as f64 * 0.1) as u64
    } else {
        capped
    };
    Duration::from_millis(millis)
}

fn fallback_reason(error: &StepError, attempts: u32, max_retries: u32) -> &'static str {
    if attempts > max_retries {
        "max_retries_exhausted"
    } else {
        error.kind().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let err = StepError::Transient("x".into());
        assert_eq!(backoff_delay(0, &err, false), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, &err, false), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, &err, false), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, &err, false), Duration::from_secs(8));
        assert_eq!(backoff_delay(4, &err, false), Duration::from_secs(10));
        assert_eq!(backoff_delay(10, &err, false), Duration::from_secs(10));
    }

    #[test]
    fn test_rate_limit_overrides_backoff() {
        let err = StepError::RateLimited {
            retry_after_secs: Some(7),
            message: "slow".into(),
        };
        assert_eq!(backoff_delay(0, &err, false), Duration::from_secs(7));
    }

    #[test]
    fn test_jitter_bounded() {
        let err = StepError::Transient("x".into());
        for _ in 0..32 {
            let delay = backoff_delay(1, &err, true);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2200));
        }
    }

    #[test]
    fn test_fallback_reason() {
        let transient = StepError::Transient("x".into());
        assert_eq!(fallback_reason(&transient, 3, 2), "max_retries_exhausted");
        let config = StepError::Configuration("bad".into());
        assert_eq!(fallback_reason(&config, 1, 2), "configuration");
    }
}
