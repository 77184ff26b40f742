use once_cell::sync::Lazy;
use std::time::Instant;

/// Absolute expiry timestamp meaning "never expires".
pub(crate) const ETERNAL: u64 = u64::MAX;

// The single, static reference point for all expiry arithmetic in the cache.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Current time in milliseconds since the cache epoch.
#[inline]
pub(crate) fn now_millis() -> u64 {
  Instant::now()
    .saturating_duration_since(*CACHE_EPOCH)
    .as_millis() as u64
}
