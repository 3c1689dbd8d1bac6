use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_UNIX_SECS: AtomicU64 = AtomicU64::new(1);

/// Wall-clock seconds, clamped so that readings never go backwards within the process.
///
/// Status and claim derivation compare against `finalize_ts`; a clock step backwards must not
/// flip an already-reported `executable` proposal back to `pending`.
pub fn unix_now() -> u64 {
    let sample = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs());
    normalize_unix_secs(sample)
}

fn normalize_unix_secs(sample: Option<u64>) -> u64 {
    let mut prev = LAST_UNIX_SECS.load(Ordering::Relaxed);
    loop {
        let normalized = sample.unwrap_or(prev).max(prev).max(1);
        match LAST_UNIX_SECS.compare_exchange_weak(
            prev,
            normalized,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return normalized,
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_clock_never_regresses() {
        let real = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(1_700_000_000);
        let first = normalize_unix_secs(Some(real));
        assert!(first >= real);
        assert!(normalize_unix_secs(Some(real - 100)) >= first);
        assert!(normalize_unix_secs(None) >= first);
    }

    #[test]
    fn test_unix_now_is_nonzero() {
        assert!(unix_now() > 0);
    }
}
