//! Rate-limited call helper (§4.9): a reusable retry-with-backoff wrapper
//! nodes can call when talking to an external service. Independent of
//! [`crate::retry`], which is the executor's own per-node attempt loop.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use runtime_core::RetryConfig;

use crate::retry::backoff_delay;

/// Per-model-key counters tracked by a [`RateLimiter`].
#[derive(Debug, Default)]
pub struct ModelStats {
    /// Calls to `with_retry`/`with_retry_async` for this key.
    pub total_requests: AtomicU64,
    /// Retry attempts beyond the first, summed across all calls.
    pub retries: AtomicU64,
    /// Attempts classified as a rate-limit error.
    pub rate_limit_hits: AtomicU64,
    /// Calls that exhausted retries and returned the final error.
    pub failed_requests: AtomicU64,
}

/// A snapshot of one model key's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitStats {
    /// See [`ModelStats::total_requests`].
    pub total_requests: u64,
    /// See [`ModelStats::retries`].
    pub retries: u64,
    /// See [`ModelStats::rate_limit_hits`].
    pub rate_limit_hits: u64,
    /// See [`ModelStats::failed_requests`].
    pub failed_requests: u64,
}

/// Default rate-limit classifier: an error is treated as a rate limit if
/// its message contains `"429"` or the case-insensitive substring
/// `"rate limit"`.
pub fn default_is_rate_limit_error(message: &str) -> bool {
    message.contains("429") || message.to_lowercase().contains("rate limit")
}

/// Exponential-backoff-with-jitter retry helper, keyed per model so callers
/// hitting several providers get independent counters.
#[derive(Debug)]
pub struct RateLimiter {
    config: RetryConfig,
    stats: Mutex<HashMap<String, Arc<ModelStats>>>,
}

impl RateLimiter {
    /// Build a limiter using `config`'s backoff parameters.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(HashMap::new()),
        }
    }

    fn stats_for(&self, model_key: &str) -> Arc<ModelStats> {
        let mut stats = self.stats.lock();
        match stats.entry(model_key.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => e.insert(Arc::new(ModelStats::default())).clone(),
        }
    }

    /// Counters for `model_key`, or all-zero if it has never been used.
    pub fn get_stats(&self, model_key: &str) -> RateLimitStats {
        let stats = self.stats.lock();
        match stats.get(model_key) {
            Some(s) => RateLimitStats {
                total_requests: s.total_requests.load(Ordering::Relaxed),
                retries: s.retries.load(Ordering::Relaxed),
                rate_limit_hits: s.rate_limit_hits.load(Ordering::Relaxed),
                failed_requests: s.failed_requests.load(Ordering::Relaxed),
            },
            None => RateLimitStats::default(),
        }
    }

    /// Clear `model_key`'s counters.
    pub fn reset_stats(&self, model_key: &str) {
        self.stats.lock().remove(model_key);
    }

    /// Run synchronous `f`, retrying on a classified rate-limit error or an
    /// "empty" success, per §4.6.3's backoff formula. `is_rate_limit_error`
    /// defaults to [`default_is_rate_limit_error`] applied to `E`'s
    /// `Display`; `is_empty_response` defaults to `None` (never empty),
    /// matching §9's resolved open question.
    pub fn with_retry<T, E>(
        &self,
        model_key: &str,
        mut f: impl FnMut() -> Result<T, E>,
        is_rate_limit_error: Option<&dyn Fn(&E) -> bool>,
        is_empty_response: Option<&dyn Fn(&T) -> bool>,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
    {
        let stats = self.stats_for(model_key);
        stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 0u32;
        loop {
            match f() {
                Ok(value) => {
                    let empty = is_empty_response.is_some_and(|pred| pred(&value));
                    if !empty || attempt >= self.config.max_retries {
                        return Ok(value);
                    }
                    attempt += 1;
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(std::time::Duration::from_secs_f64(backoff_delay(
                        &self.config,
                        attempt - 1,
                    )));
                }
                Err(err) => {
                    let is_rate_limit = is_rate_limit_error
                        .map(|pred| pred(&err))
                        .unwrap_or_else(|| default_is_rate_limit_error(&err.to_string()));
                    if is_rate_limit {
                        stats.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    if !is_rate_limit || attempt >= self.config.max_retries {
                        stats.failed_requests.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                    attempt += 1;
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(std::time::Duration::from_secs_f64(backoff_delay(
                        &self.config,
                        attempt - 1,
                    )));
                }
            }
        }
    }

    /// The async sibling of [`Self::with_retry`], for collaborators whose
    /// calls return a `Future`.
    pub async fn with_retry_async<T, E, Fut>(
        &self,
        model_key: &str,
        mut f: impl FnMut() -> Fut,
        is_rate_limit_error: Option<&(dyn Fn(&E) -> bool + Sync)>,
        is_empty_response: Option<&(dyn Fn(&T) -> bool + Sync)>,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let stats = self.stats_for(model_key);
        stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => {
                    let empty = is_empty_response.is_some_and(|pred| pred(&value));
                    if !empty || attempt >= self.config.max_retries {
                        return Ok(value);
                    }
                    attempt += 1;
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(std::time::Duration::from_secs_f64(backoff_delay(
                        &self.config,
                        attempt - 1,
                    )))
                    .await;
                }
                Err(err) => {
                    let is_rate_limit = is_rate_limit_error
                        .map(|pred| pred(&err))
                        .unwrap_or_else(|| default_is_rate_limit_error(&err.to_string()));
                    if is_rate_limit {
                        stats.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    if !is_rate_limit || attempt >= self.config.max_retries {
                        stats.failed_requests.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                    attempt += 1;
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(std::time::Duration::from_secs_f64(backoff_delay(
                        &self.config,
                        attempt - 1,
                    )))
                    .await;
                }
            }
        }
    }
}

static DEFAULT_LIMITER: OnceLock<RateLimiter> = OnceLock::new();

/// The process-wide default instance, for callers that don't want to
/// thread a `RateLimiter` through their call sites (mirrors the reference
/// module-level singleton, §4.9).
pub fn default_rate_limiter() -> &'static RateLimiter {
    DEFAULT_LIMITER.get_or_init(|| RateLimiter::new(RetryConfig::default()))
}
