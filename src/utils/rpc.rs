use crate::chain::{ChainReader, Connector, LogQuery, RawLog};
use crate::error::RpcError;
use alloy::primitives::{Address, Bytes, B256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::{sleep, timeout, Duration};

const RPC_ERR_MAX_LEN: usize = 260;

pub const DEFAULT_RETRY_ATTEMPTS: usize = 4;
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
pub const DEFAULT_RETRY_CAP_MS: u64 = 8_000;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Caller policy invoked once per exhausted call with the last error. Returning an endpoint
/// makes the access layer reconnect there for subsequent calls.
pub type ExhaustionHandler = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_MS,
            max_delay_ms: DEFAULT_RETRY_CAP_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed_attempts + 1`.
    pub fn backoff_ms(&self, failed_attempts: usize, retry_after_hint_ms: Option<u64>) -> u64 {
        let exp = bounded_exponential_backoff_ms(
            self.base_delay_ms,
            failed_attempts.saturating_sub(1).min(u32::MAX as usize) as u32,
            self.max_delay_ms,
        );
        exp.max(retry_after_hint_ms.unwrap_or(0))
            .min(self.max_delay_ms.max(self.base_delay_ms))
    }
}

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    base_ms
        .saturating_mul(1u64 << streak.min(16))
        .min(cap_ms.max(base_ms))
}

fn is_retryable_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let non_retryable = [
        "method not found",
        "-32601",
        "invalid params",
        "-32602",
        "execution reverted",
        "revert",
        "parse error",
        "-32700",
    ];
    !non_retryable.iter().any(|needle| msg.contains(needle))
}

pub fn is_rate_limited_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("compute units per second")
}

/// Best-effort `Retry-After` extraction. Seconds unless the value is suffixed with `ms`.
fn parse_retry_after_ms(message: &str) -> Option<u64> {
    let msg = message.to_ascii_lowercase();
    let start = msg
        .find("retry-after")
        .or_else(|| msg.find("retry after"))?;
    let tail = &msg[start..];
    let digits_at = tail.find(|c: char| c.is_ascii_digit())?;
    let digits: String = tail[digits_at..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let value: u64 = digits.parse().ok()?;
    let unit = tail[digits_at + digits.len()..].trim_start();
    if unit.starts_with("ms") || unit.starts_with("milli") {
        Some(value)
    } else {
        Some(value.saturating_mul(1_000))
    }
}

fn compact_rpc_error_message(message: &str) -> String {
    crate::utils::error::compact_error_message(message, RPC_ERR_MAX_LEN)
}

/// Failover policy that walks `endpoints` in order, wrapping around. `None` with fewer
/// than two endpoints since there is nothing to rotate to.
pub fn round_robin_handler(endpoints: Vec<String>) -> Option<ExhaustionHandler> {
    if endpoints.len() < 2 {
        return None;
    }
    let cursor = AtomicUsize::new(0);
    Some(Arc::new(move |last_error: &str| {
        let next = (cursor.fetch_add(1, Ordering::SeqCst) + 1) % endpoints.len();
        tracing::warn!(
            "[RPC] Rotating to {} after: {}",
            endpoints[next],
            compact_rpc_error_message(last_error)
        );
        Some(endpoints[next].clone())
    }))
}

/// Retrying front door to the chain.
///
/// Each call is attempted up to `policy.attempts` times with exponential backoff. Requests
/// the node refuses outright (reverts, unknown methods) fail immediately as
/// [`RpcError::Rejected`]. When the budget is spent the exhaustion handler runs *before* the
/// caller sees [`RpcError::Exhausted`]; endpoint choice belongs entirely to that handler.
pub struct RpcAccess {
    reader: RwLock<Arc<dyn ChainReader>>,
    endpoint: RwLock<String>,
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    on_exhausted: Option<ExhaustionHandler>,
}

impl RpcAccess {
    pub fn connect(
        connector: Arc<dyn Connector>,
        endpoint: &str,
        policy: RetryPolicy,
    ) -> Result<Self, RpcError> {
        let reader = connector
            .connect(endpoint)
            .map_err(|err| RpcError::Connect {
                endpoint: endpoint.to_string(),
                reason: compact_rpc_error_message(&format!("{err:#}")),
            })?;
        Ok(Self {
            reader: RwLock::new(reader),
            endpoint: RwLock::new(endpoint.to_string()),
            connector,
            policy,
            on_exhausted: None,
        })
    }

    pub fn with_exhaustion_handler(mut self, handler: ExhaustionHandler) -> Self {
        self.on_exhausted = Some(handler);
        self
    }

    pub fn set_exhaustion_handler(&mut self, handler: Option<ExhaustionHandler>) {
        self.on_exhausted = handler;
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn endpoint(&self) -> String {
        self.endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn current_reader(&self) -> Arc<dyn ChainReader> {
        self.reader
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Points subsequent calls at `endpoint`. Calls already in flight finish on the old one.
    pub fn swap_endpoint(&self, endpoint: &str) -> Result<(), RpcError> {
        let reader = self
            .connector
            .connect(endpoint)
            .map_err(|err| RpcError::Connect {
                endpoint: endpoint.to_string(),
                reason: compact_rpc_error_message(&format!("{err:#}")),
            })?;
        *self
            .reader
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = reader;
        *self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = endpoint.to_string();
        Ok(())
    }

    fn handle_exhaustion(&self, context: &str, last_error: &str) {
        let Some(handler) = self.on_exhausted.as_ref() else {
            return;
        };
        let Some(next) = handler(last_error) else {
            return;
        };
        match self.swap_endpoint(&next) {
            Ok(()) => tracing::warn!(
                "[RPC] {} exhausted retries; failing over to {}",
                context,
                next
            ),
            Err(err) => tracing::warn!("[RPC] Failover after {} failed: {}", context, err),
        }
    }

    pub async fn run<T, Op, Fut>(&self, context: &str, mut op: Op) -> Result<T, RpcError>
    where
        Op: FnMut(Arc<dyn ChainReader>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.policy.attempts.max(1);
        let timeout_ms = self.policy.call_timeout_ms.max(1);
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            let reader = self.current_reader();
            let mut retry_after_ms = None;
            match timeout(Duration::from_millis(timeout_ms), op(reader)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    let message = compact_rpc_error_message(&format!("{err:#}"));
                    if !is_retryable_rpc_error(&message) {
                        return Err(RpcError::Rejected {
                            context: context.to_string(),
                            message,
                        });
                    }
                    if is_rate_limited_rpc_error(&message) {
                        retry_after_ms = parse_retry_after_ms(&message);
                    }
                    last_message = message;
                }
                Err(_) => {
                    last_message = format!("timed out after {timeout_ms}ms");
                }
            }

            if attempt < attempts {
                let delay = self.policy.backoff_ms(attempt, retry_after_ms);
                tracing::debug!(
                    "[RPC] {} attempt {}/{} failed ({}); retrying in {}ms",
                    context,
                    attempt,
                    attempts,
                    last_message,
                    delay
                );
                sleep(Duration::from_millis(delay)).await;
            }
        }

        tracing::warn!(
            "[RPC] {} failed after {} attempt(s): {}",
            context,
            attempts,
            last_message
        );
        self.handle_exhaustion(context, &last_message);
        Err(RpcError::Exhausted {
            context: context.to_string(),
            attempts,
            last_error: last_message,
        })
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        self.run("eth_blockNumber", |r| async move { r.block_number().await })
            .await
    }

    pub async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, RpcError> {
        self.run(&format!("eth_getBlockByNumber(#{number})"), |r| async move {
            r.block_timestamp(number).await
        })
        .await
    }

    pub async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, RpcError> {
        let query = *query;
        self.run(
            &format!(
                "eth_getLogs({:#x}, [{}..={}])",
                query.address, query.from_block, query.to_block
            ),
            move |r| async move { r.logs(&query).await },
        )
        .await
    }

    pub async fn transaction_input(&self, hash: B256) -> Result<Option<Bytes>, RpcError> {
        self.run(&format!("eth_getTransactionByHash({hash:#x})"), |r| async move {
            r.transaction_input(hash).await
        })
        .await
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.run(&format!("eth_call({to:#x})"), |r| {
            let data = data.clone();
            async move { r.call(to, data).await }
        })
        .await
    }

    pub async fn receipt_status(&self, hash: B256) -> Result<Option<bool>, RpcError> {
        self.run(
            &format!("eth_getTransactionReceipt({hash:#x})"),
            |r| async move { r.receipt_status(hash).await },
        )
        .await
    }
}
