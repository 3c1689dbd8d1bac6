use crate::chain::{LogQuery, RawLog};
use crate::error::MirrorError;
use crate::utils::rpc::RpcAccess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Monotonic, reaches 100 on the last sub-range.
    pub percent: u8,
    pub logs_found: usize,
    pub chunk_from: u64,
    pub chunk_to: u64,
}

/// Inclusive sub-ranges of at most `chunk_blocks` blocks covering `[from, to]`.
pub fn chunk_ranges(from: u64, to: u64, chunk_blocks: u64) -> Vec<(u64, u64)> {
    let chunk_blocks = chunk_blocks.max(1);
    let mut out = Vec::new();
    if from > to {
        return out;
    }
    let mut start = from;
    loop {
        let end = start.saturating_add(chunk_blocks - 1).min(to);
        out.push((start, end));
        if end >= to {
            break;
        }
        start = end + 1;
    }
    out
}

/// Fetches `query` over `[from, to]` one sub-range at a time, in block order.
///
/// A sub-range that cannot be fetched fails the whole scan with
/// [`MirrorError::RangeScanFailed`]; logs from earlier sub-ranges are discarded with it.
pub async fn scan_logs<F>(
    rpc: &RpcAccess,
    query: LogQuery,
    from: u64,
    to: u64,
    chunk_blocks: u64,
    mut on_progress: F,
) -> Result<Vec<RawLog>, MirrorError>
where
    F: FnMut(ScanProgress),
{
    let ranges = chunk_ranges(from, to, chunk_blocks);
    if ranges.is_empty() {
        return Ok(Vec::new());
    }
    let total = (to - from).saturating_add(1);
    let mut logs = Vec::new();

    for (chunk_from, chunk_to) in ranges {
        let mut chunk = rpc
            .logs(&query.with_range(chunk_from, chunk_to))
            .await
            .map_err(|source| MirrorError::RangeScanFailed {
                from: chunk_from,
                to: chunk_to,
                source,
            })?;
        chunk.sort_by_key(RawLog::ordering_key);
        logs.extend(chunk);

        let done = (chunk_to - from).saturating_add(1);
        let percent = ((done as u128 * 100) / total as u128).min(100) as u8;
        on_progress(ScanProgress {
            percent,
            logs_found: logs.len(),
            chunk_from,
            chunk_to,
        });
    }

    tracing::debug!(
        "[SCAN] {:#x} [{}..={}] -> {} log(s)",
        query.address,
        from,
        to,
        logs.len()
    );
    Ok(logs)
}
