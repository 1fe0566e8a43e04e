//! Composable call wrapping: classification and retry.
//!
//! Interceptors form an explicit ordered list fixed at construction time;
//! executing the chain wraps the underlying call from the inside out, so the
//! first layer in the list observes everything the layers after it do. The
//! stock chain is `[classify, retry]`: classification normalizes whatever
//! bubbles up, retry re-invokes the inner call for transient failures only.
//!
//! The chain is composed only around read-only calls. State-mutating calls
//! are never blindly retried — resubmission could duplicate effects; their
//! idempotency story is the prepare/commit request-id split.

use crate::agent::TimestampedReply;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use ledgerflow_core::{CallError, ErrorKind, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A re-invocable call. Each invocation is a fresh attempt.
pub type CallFn = Arc<dyn Fn() -> BoxFuture<'static, Result<TimestampedReply>> + Send + Sync>;

/// One layer of call wrapping.
#[async_trait]
pub trait CallInterceptor: Send + Sync {
    async fn handle(&self, next: CallFn) -> Result<TimestampedReply>;
}

/// An ordered list of interceptors composed once at construction.
/// `layers[0]` is the outermost wrapper.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    layers: Vec<Arc<dyn CallInterceptor>>,
}

impl InterceptorChain {
    pub fn new(layers: Vec<Arc<dyn CallInterceptor>>) -> Self {
        Self { layers }
    }

    pub async fn execute(&self, base: CallFn) -> Result<TimestampedReply> {
        let mut next = base;
        for layer in self.layers.iter().rev() {
            let layer = Arc::clone(layer);
            let inner = next;
            next = Arc::new(move || {
                let layer = Arc::clone(&layer);
                let inner = Arc::clone(&inner);
                async move { layer.handle(inner).await }.boxed()
            });
        }
        next().await
    }
}

/// Observer invoked with each classified failure and whether a retry will
/// follow. Purely informational; it cannot alter control flow.
pub type RetryObserver = Arc<dyn Fn(&CallError, bool) + Send + Sync>;

/// Retry configuration: attempt ceiling and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.multiplier.powi(attempt.min(24) as i32))
    }
}

/// Retries transient failures up to the attempt ceiling with exponential
/// backoff. Auth failures, application rejects and traps are surfaced on the
/// first occurrence.
pub struct RetryInterceptor {
    config: RetryConfig,
    observer: Option<RetryObserver>,
}

impl RetryInterceptor {
    pub fn new(config: RetryConfig, observer: Option<RetryObserver>) -> Self {
        Self { config, observer }
    }
}

impl Default for RetryInterceptor {
    fn default() -> Self {
        Self::new(RetryConfig::default(), None)
    }
}

#[async_trait]
impl CallInterceptor for RetryInterceptor {
    async fn handle(&self, next: CallFn) -> Result<TimestampedReply> {
        let mut attempt: u32 = 0;
        loop {
            match next().await {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    let will_retry =
                        error.retryable() && attempt + 1 < self.config.max_attempts;
                    if let Some(observer) = &self.observer {
                        observer(&error, will_retry);
                    }
                    if !will_retry {
                        return Err(error);
                    }
                    let delay = self.config.delay(attempt);
                    warn!(attempt, ?delay, "transient call failure, retrying: {error}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Normalizes classified errors on their way out: extracts the meaningful
/// trap message from the remote system's boilerplate so callers can render
/// it directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyInterceptor;

const TRAP_MARKER: &str = "trapped explicitly: ";

#[async_trait]
impl CallInterceptor for ClassifyInterceptor {
    async fn handle(&self, next: CallFn) -> Result<TimestampedReply> {
        next().await.map_err(|mut error| {
            if error.kind == ErrorKind::ApplicationTrap {
                if let Some(at) = error.message.find(TRAP_MARKER) {
                    error.message = error.message[at + TRAP_MARKER.len()..].to_string();
                }
            }
            debug!(kind = %error.kind, "call failed: {}", error.message);
            error
        })
    }
}
