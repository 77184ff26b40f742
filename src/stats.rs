use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Thread-safe statistics collector. All fields are atomic so recording
/// never takes a lock; counters are only touched after a state transition
/// has been committed.
#[derive(Debug, Default)]
pub(crate) struct Stats {
  hits: CachePadded<AtomicU64>,
  misses: CachePadded<AtomicU64>,
  puts: CachePadded<AtomicU64>,
  removals: CachePadded<AtomicU64>,
  evictions: CachePadded<AtomicU64>,
}

impl Stats {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn record_hit(&self) {
    self.hits.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_miss(&self) {
    self.misses.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_put(&self) {
    self.puts.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_removal(&self) {
    self.removals.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_eviction(&self) {
    self.evictions.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_evictions(&self, count: u64) {
    self.evictions.fetch_add(count, Ordering::Relaxed);
  }

  /// Resets every counter to zero.
  pub(crate) fn reset(&self) {
    self.hits.store(0, Ordering::Relaxed);
    self.misses.store(0, Ordering::Relaxed);
    self.puts.store(0, Ordering::Relaxed);
    self.removals.store(0, Ordering::Relaxed);
    self.evictions.store(0, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the counters.
  pub(crate) fn snapshot(&self) -> StatsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let gets = hits + misses;

    StatsSnapshot {
      hits,
      misses,
      gets,
      hit_percentage: percentage(hits, gets),
      miss_percentage: percentage(misses, gets),
      puts: self.puts.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
    }
  }
}

fn percentage(part: u64, total: u64) -> f64 {
  if total == 0 {
    0.0
  } else {
    part as f64 / total as f64 * 100.0
  }
}

/// A point-in-time, public-facing snapshot of the cache's statistics.
#[derive(Clone)]
pub struct StatsSnapshot {
  /// Reads that found a live entry.
  pub hits: u64,
  /// Reads that found nothing, or an expired entry.
  pub misses: u64,
  /// Total read attempts: `hits + misses`.
  pub gets: u64,
  /// `hits / gets`, as a percentage.
  pub hit_percentage: f64,
  /// `misses / gets`, as a percentage.
  pub miss_percentage: f64,
  /// Committed create and update transitions, including loader installs.
  pub puts: u64,
  /// Committed remove transitions.
  pub removals: u64,
  /// Expired entries observed on access, plus capacity evictions.
  pub evictions: u64,
}

impl fmt::Debug for StatsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StatsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("gets", &self.gets)
      .field("hit_percentage", &format!("{:.2}%", self.hit_percentage))
      .field("miss_percentage", &format!("{:.2}%", self.miss_percentage))
      .field("puts", &self.puts)
      .field("removals", &self.removals)
      .field("evictions", &self.evictions)
      .finish()
  }
}
