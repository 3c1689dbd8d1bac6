use crate::error::RpcError;
use crate::utils::clock::unix_now;
use crate::utils::rpc::RpcAccess;

pub const MAX_SEARCH_STEPS: u32 = 15;

/// Lowest block whose timestamp is at or after `head_timestamp - seconds_ago`.
///
/// Starts from `head - 2 * (seconds_ago / block_time)` and binary-searches up to the head.
/// Unknown or failing mid-point lookups move the lower bound past the mid-point instead of
/// failing the estimate. Only the head lookup is required to succeed.
pub async fn estimate_block(
    rpc: &RpcAccess,
    seconds_ago: u64,
    block_time_ms: u64,
) -> Result<u64, RpcError> {
    let head = rpc.block_number().await?;
    if seconds_ago == 0 {
        return Ok(head);
    }
    let head_ts = match rpc.block_timestamp(head).await {
        Ok(Some(ts)) => ts,
        Ok(None) | Err(_) => unix_now(),
    };
    let target = head_ts.saturating_sub(seconds_ago);

    let nominal_blocks = seconds_ago.saturating_mul(1_000) / block_time_ms.max(1);
    let mut lo = head.saturating_sub(nominal_blocks.saturating_mul(2));
    let mut hi = head;

    let mut steps = 0;
    while lo < hi && steps < MAX_SEARCH_STEPS {
        steps += 1;
        let mid = lo + (hi - lo) / 2;
        match rpc.block_timestamp(mid).await {
            Ok(Some(ts)) if ts >= target => hi = mid,
            Ok(Some(_)) => lo = mid + 1,
            Ok(None) => {
                tracing::debug!("[SCAN] Block #{} unknown during estimate; narrowing", mid);
                lo = mid + 1;
            }
            Err(err) => {
                tracing::debug!("[SCAN] Block #{} lookup failed during estimate: {}", mid, err);
                lo = mid + 1;
            }
        }
    }

    tracing::debug!(
        "[SCAN] Estimated block #{} for {}s ago after {} step(s)",
        hi,
        seconds_ago,
        steps
    );
    Ok(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, MockConnector};
    use crate::utils::rpc::RetryPolicy;
    use std::sync::Arc;

    fn access(chain: &Arc<MockChain>) -> RpcAccess {
        RpcAccess::connect(
            Arc::new(MockConnector::single("mock", chain.clone())),
            "mock",
            RetryPolicy {
                attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                call_timeout_ms: 1_000,
            },
        )
        .expect("connect")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_one_day_on_twelve_second_blocks() {
        let chain = Arc::new(MockChain::new(20_000, 1_600_000_000, 12));
        let rpc = access(&chain);
        let block = estimate_block(&rpc, 86_400, 12_000).await.expect("estimate");
        assert_eq!(block, 20_000 - 7_200);
        assert!(chain.timestamp_of(block) >= chain.timestamp_of(20_000) - 86_400);
        // head + head timestamp + at most MAX_SEARCH_STEPS lookups
        assert!(chain.call_count("eth_getBlockByNumber") <= 1 + MAX_SEARCH_STEPS as usize);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_missing_blocks_narrow_without_failing() {
        let chain = Arc::new(MockChain::new(20_000, 1_600_000_000, 12));
        for block in 12_790..12_810 {
            chain.remove_block(block);
        }
        let rpc = access(&chain);
        let block = estimate_block(&rpc, 86_400, 12_000).await.expect("estimate");
        assert!(block >= 12_800);
        assert!(block <= 20_000);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_zero_lookback_is_head_and_short_chains_clamp_to_genesis() {
        let chain = Arc::new(MockChain::new(100, 1_600_000_000, 12));
        let rpc = access(&chain);
        assert_eq!(estimate_block(&rpc, 0, 12_000).await.expect("head"), 100);
        assert_eq!(
            estimate_block(&rpc, 30 * 86_400, 12_000).await.expect("clamped"),
            0
        );
    }
}
