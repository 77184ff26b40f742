use crate::entry::Expirable;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;

/// Weighs an entry for weight-bounded caches.
pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// What a compute closure decided to do with the slot it examined.
pub(crate) enum SlotOp<V> {
  /// Leave the slot as it is.
  Keep,
  /// Replace (or create) the slot with this entry.
  Install(Expirable<V>),
  /// Clear the slot.
  Remove,
}

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
fn hash_key<K: Hash, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// A single, independently locked partition of the store.
pub(crate) struct Shard<K, V> {
  pub(crate) map: RwLock<HashMap<K, Expirable<V>, ahash::RandomState>>,
}

/// Key to `Expirable` storage, partitioned into independently locked shards.
///
/// All mutation goes through [`ShardedStore::compute`], which holds the
/// shard's write lock for the duration of one pure decision: this is what
/// gives every cache operation its single-key atomicity. The store also
/// enforces the optional size or weight bound by evicting entries from the
/// shard that grew past it.
pub(crate) struct ShardedStore<K, V> {
  shards: Box<[CachePadded<Shard<K, V>>]>,
  hasher: ahash::RandomState,
  maximum_size: Option<u64>,
  maximum_weight: Option<u64>,
  weigher: Option<Weigher<K, V>>,
  len: CachePadded<AtomicU64>,
  weight: CachePadded<AtomicU64>,
}

impl<K, V> fmt::Debug for ShardedStore<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .field("len", &self.len.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<K, V> ShardedStore<K, V>
where
  K: Eq + Hash + Clone,
{
  /// Creates a store with `num_shards` partitions. The caller guarantees the
  /// count is a nonzero power of two, so shard selection can mask the hash.
  pub(crate) fn new(
    num_shards: usize,
    maximum_size: Option<u64>,
    maximum_weight: Option<u64>,
    weigher: Option<Weigher<K, V>>,
  ) -> Self {
    let hasher = ahash::RandomState::new();
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      shards.push(CachePadded::new(Shard {
        map: RwLock::new(HashMap::with_hasher(hasher.clone())),
      }));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
      maximum_size,
      maximum_weight,
      weigher,
      len: CachePadded::new(AtomicU64::new(0)),
      weight: CachePadded::new(AtomicU64::new(0)),
    }
  }

  #[inline]
  fn shard(&self, key: &K) -> &Shard<K, V> {
    let hash = hash_key(&self.hasher, key);
    let index = hash as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  pub(crate) fn len(&self) -> u64 {
    self.len.load(Ordering::Relaxed)
  }

  fn entry_weight(&self, key: &K, entry: &Expirable<V>) -> u64 {
    match &self.weigher {
      Some(weigher) => weigher(key, entry.value_ref()),
      None => 1,
    }
  }

  /// Runs `decide` against the current slot under the shard's write lock and
  /// applies the outcome atomically.
  ///
  /// `decide` must be pure: expiration checks, value comparisons and entry
  /// construction only. No user callbacks, no statistics, no copies.
  ///
  /// Returns the closure's result plus the number of entries evicted to keep
  /// the store within its size or weight bound.
  pub(crate) fn compute<R>(
    &self,
    key: &K,
    decide: impl FnOnce(Option<&Expirable<V>>) -> (SlotOp<V>, R),
  ) -> (R, u64) {
    let shard = self.shard(key);
    let mut guard = shard.map.write();

    let (op, result) = decide(guard.get(key));
    match op {
      SlotOp::Keep => (result, 0),
      SlotOp::Remove => {
        if let Some(old) = guard.remove(key) {
          self.len.fetch_sub(1, Ordering::Relaxed);
          self
            .weight
            .fetch_sub(self.entry_weight(key, &old), Ordering::Relaxed);
        }
        (result, 0)
      }
      SlotOp::Install(entry) => {
        let added = self.entry_weight(key, &entry);
        match guard.insert(key.clone(), entry) {
          Some(old) => {
            let removed = self.entry_weight(key, &old);
            self.weight.fetch_add(added, Ordering::Relaxed);
            self.weight.fetch_sub(removed, Ordering::Relaxed);
          }
          None => {
            self.len.fetch_add(1, Ordering::Relaxed);
            self.weight.fetch_add(added, Ordering::Relaxed);
          }
        }
        let evicted = self.evict_over_capacity(key, &mut guard);
        (result, evicted)
      }
    }
  }

  /// Evicts entries until the store is back under its bound. Victims are
  /// sampled at random from the shard that just grew; the freshly written
  /// key is never chosen.
  fn evict_over_capacity(
    &self,
    protect: &K,
    guard: &mut HashMap<K, Expirable<V>, ahash::RandomState>,
  ) -> u64 {
    let mut evicted = 0;
    let mut rng = rand::thread_rng();

    loop {
      let over = match (self.maximum_size, self.maximum_weight) {
        (Some(maximum), _) => self.len.load(Ordering::Relaxed) > maximum,
        (_, Some(maximum)) => self.weight.load(Ordering::Relaxed) > maximum,
        _ => false,
      };
      if !over {
        break;
      }

      let victim = guard
        .keys()
        .filter(|candidate| *candidate != protect)
        .choose(&mut rng)
        .cloned();
      let victim = match victim {
        Some(victim) => victim,
        None => break,
      };
      if let Some(old) = guard.remove(&victim) {
        self.len.fetch_sub(1, Ordering::Relaxed);
        self
          .weight
          .fetch_sub(self.entry_weight(&victim, &old), Ordering::Relaxed);
        evicted += 1;
      }
    }

    evicted
  }

  /// Reads the current slot without side effects.
  pub(crate) fn probe(&self, key: &K) -> Option<Expirable<V>> {
    self.shard(key).map.read().get(key).cloned()
  }

  /// Snapshots the keys of one shard.
  pub(crate) fn shard_keys(&self, shard_index: usize) -> Vec<K> {
    self.shards[shard_index].map.read().keys().cloned().collect()
  }

  /// Snapshots every key in the store, shard by shard.
  pub(crate) fn all_keys(&self) -> Vec<K> {
    let mut keys = Vec::new();
    for shard in self.shards.iter() {
      keys.extend(shard.map.read().keys().cloned());
    }
    keys
  }

  /// Discards every entry. All shards are locked before the wipe so no
  /// concurrent writer can land between them.
  pub(crate) fn clear(&self) {
    let mut guards: Vec<_> = self.shards.iter().map(|shard| shard.map.write()).collect();
    for guard in guards.iter_mut() {
      guard.clear();
    }
    self.len.store(0, Ordering::Relaxed);
    self.weight.store(0, Ordering::Relaxed);
  }
}
