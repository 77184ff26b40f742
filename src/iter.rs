//! Iteration over a cache's live entries.

use crate::cache::Cache;
use crate::error::CacheError;
use crate::stats::Stats;
use crate::store::SlotOp;
use crate::time;

use core::fmt;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;

enum Visit<V> {
  Gone,
  Expired(Arc<V>),
  Live(Arc<V>),
}

/// An iterator over the cache's live entries, shard by shard.
///
/// Keys are snapshotted one shard at a time, so entries inserted into an
/// already-visited shard are missed and a yielded value may have changed by
/// the time the caller looks at it. Expired entries encountered along the
/// way are removed in place, counted as evictions and EXPIRED-notified.
/// Yielded values are copies per the cache's copier.
pub struct CacheIter<'a, K, V> {
  cache: &'a Cache<K, V>,
  pending: VecDeque<K>,
  shard_index: usize,
  last_yielded: Option<K>,
}

impl<'a, K, V> CacheIter<'a, K, V>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn new(cache: &'a Cache<K, V>) -> Self {
    Self {
      cache,
      pending: VecDeque::new(),
      shard_index: 0,
      last_yielded: None,
    }
  }

  /// Removes the most recently yielded entry through the standard remove
  /// path: writer, REMOVED event, removal counter. Returns `false` when
  /// nothing has been yielded since the last removal.
  pub fn remove(&mut self) -> Result<bool, CacheError> {
    match self.last_yielded.take() {
      Some(key) => self.cache.remove(&key),
      None => Ok(false),
    }
  }

  /// Snapshots the keys of the next non-empty shard.
  fn load_next_shard(&mut self) -> bool {
    let num_shards = self.cache.shared.store.num_shards();
    while self.shard_index < num_shards {
      let keys = self.cache.shared.store.shard_keys(self.shard_index);
      self.shard_index += 1;
      if !keys.is_empty() {
        self.pending = keys.into();
        return true;
      }
    }
    false
  }
}

impl<K, V> Iterator for CacheIter<'_, K, V>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  type Item = (K, Arc<V>);

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let key = match self.pending.pop_front() {
        Some(key) => key,
        None => {
          if !self.load_next_shard() {
            return None;
          }
          continue;
        }
      };

      let now = time::now_millis();
      let visit = self.cache.shared.compute(&key, |existing| match existing {
        None => (SlotOp::Keep, Visit::Gone),
        Some(entry) if entry.is_expired(now) => {
          (SlotOp::Remove, Visit::Expired(entry.value()))
        }
        Some(entry) => (SlotOp::Keep, Visit::Live(entry.value())),
      });

      match visit {
        Visit::Gone => continue,
        Visit::Expired(old) => {
          self.cache.shared.record(Stats::record_eviction);
          self.cache.expired_event(&key, &old);
          continue;
        }
        Visit::Live(value) => match self.cache.shared.copy_out(&value) {
          Ok(copy) => {
            self.last_yielded = Some(key.clone());
            return Some((key, copy));
          }
          Err(error) => {
            // A copy failure only affects this position.
            tracing::warn!(%error, "skipping cache entry that could not be copied");
            continue;
          }
        },
      }
    }
  }
}
