//! Retry backoff ladder

/// Delay before the attempt that follows `retry_count` failures.
///
/// Indexes into `ladder`, clamping to its last entry; an empty ladder means no
/// delay.
pub fn get_backoff_delay(retry_count: u32, ladder: &[u64]) -> u64 {
    let Some(last) = ladder.len().checked_sub(1) else {
        return 0;
    };
    let index = usize::try_from(retry_count).map_or(last, |count| count.min(last));
    ladder[index]
}

/// Whether an operation that has failed `retry_count` times may be tried again.
pub const fn should_retry(retry_count: u32, max_retries: u32) -> bool {
    retry_count < max_retries
}

/// Absolute deadline (Unix ms) for the next attempt.
pub fn next_attempt_at(now_ms: i64, retry_count: u32, ladder: &[u64]) -> i64 {
    let delay = i64::try_from(get_backoff_delay(retry_count, ladder)).unwrap_or(i64::MAX);
    now_ms.saturating_add(delay)
}
