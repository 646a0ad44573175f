//! Per-node retry loop (§4.6.3). Distinct from [`crate::rate_limiter`]:
//! this is the executor's own attempt/backoff bookkeeping around a single
//! [`NodeHandler`](crate::context::NodeHandler) invocation, not a general
//! purpose helper nodes call on their own behalf.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use rand::Rng;
use runtime_core::{ExecutionQuality, NodeResult, NodeSpec, RetryConfig};

use crate::context::{NodeContext, NodeHandler};

/// Delay before the attempt numbered `attempt` (0-based, so `attempt = 0`
/// is the delay before the *second* try), including jitter if enabled.
pub fn backoff_delay(cfg: &RetryConfig, attempt: u32) -> f64 {
    let base = cfg.backoff_for(attempt);
    if !cfg.jitter {
        return base;
    }
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range((1.0 - cfg.jitter_factor)..=(1.0 + cfg.jitter_factor));
    base * factor
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `node`'s handler with retry/backoff, per §4.6.3: attempts are capped
/// at `node.max_retries + 1`; both a returned error and a caught panic
/// become a failed [`NodeResult`] via `NodeResult::from_system_exception`;
/// a success whose output is classified "empty" by `is_empty_response` is
/// retried the same as a failure, except the last (exhausted) attempt is
/// returned as-is rather than downgraded to a failure.
pub async fn run_node_with_retry(
    handler: &dyn NodeHandler,
    node: &NodeSpec,
    ctx: &NodeContext,
    retry_cfg: &RetryConfig,
    is_empty_response: Option<&(dyn Fn(&NodeResult) -> bool + Send + Sync)>,
) -> NodeResult {
    let mut attempt: u32 = 0;

    loop {
        if ctx.cancellation.is_cancelled() {
            return NodeResult::failure("cancelled");
        }

        let started = Instant::now();
        let outcome = AssertUnwindSafe(handler.handle(node, ctx)).catch_unwind().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut result = match outcome {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => NodeResult::from_system_exception(e),
            Err(panic) => NodeResult::from_system_exception(panic_message(&panic)),
        };
        result.latency_ms = latency_ms;

        let is_empty = result.success && is_empty_response.is_some_and(|f| f(&result));

        if result.success && !is_empty {
            result.retries_used = Some(attempt);
            result.execution_quality = Some(if attempt == 0 {
                ExecutionQuality::Clean
            } else {
                ExecutionQuality::Recovered
            });
            return result;
        }

        if attempt >= node.max_retries {
            result.retries_used = Some(attempt);
            if !result.success {
                result.execution_quality = Some(ExecutionQuality::Failed);
            } else {
                // Exhausted on emptiness, not failure: returned as-is (§4.6.3).
                result.execution_quality = Some(if attempt == 0 {
                    ExecutionQuality::Clean
                } else {
                    ExecutionQuality::Recovered
                });
            }
            return result;
        }

        tracing::warn!(
            node_id = %node.id,
            attempt,
            success = result.success,
            "node attempt did not produce a usable result, retrying"
        );
        let delay = backoff_delay(retry_cfg, attempt);
        tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        attempt += 1;
    }
}
