use crate::entry::Expirable;
use crate::error::{CacheError, IntegrationError};
use crate::event::{ListenerConfig, ListenerId};
use crate::expiry::ExpiryDecision;
use crate::integration::CompletionListener;
use crate::iter::CacheIter;
use crate::processor::MutableEntry;
use crate::shared::{CacheShared, ProcessorScope};
use crate::stats::{Stats, StatsSnapshot};
use crate::store::SlotOp;
use crate::time::{self, ETERNAL};

use core::fmt;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use ahash::{HashMap, HashMapExt, HashSet};

/// What a read-style compute found in the slot.
enum Lookup<V> {
  Miss,
  Expired(Arc<V>),
  Hit(Arc<V>),
}

/// What a removing compute found in the slot.
enum Removal<V> {
  Miss,
  Expired(Arc<V>),
  Removed(Arc<V>),
}

/// What a replacing compute found in the slot.
enum Replacement<V> {
  Miss,
  Mismatch,
  Expired(Arc<V>),
  Replaced(Arc<V>),
}

/// How an unconditional install resolved.
enum Installed<V> {
  Created,
  Updated { old: Arc<V> },
}

struct InstallOutcome<V> {
  installed: Installed<V>,
  expired_old: Option<Arc<V>>,
}

/// The state transition an entry processor committed.
enum Commit<V> {
  None,
  Removed,
  Created(Arc<V>),
  Updated { new: Arc<V> },
}

struct Invoked<R, V> {
  result: Result<R, IntegrationError>,
  commit: Commit<V>,
  expired_old: Option<Arc<V>>,
  load_used: bool,
  original_exists: bool,
  original_value: Option<Arc<V>>,
  accessed: bool,
}

/// A thread-safe cache imposing contract semantics (lazy per-entry
/// expiration, by-value boundaries, events, statistics, read-through,
/// write-through and entry processors) on top of a sharded concurrent
/// store.
///
/// Handles are cheap to clone; all of them share one cache.
pub struct Cache<K, V> {
  pub(crate) shared: Arc<CacheShared<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
  K: Eq + Hash + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("name", &self.shared.name)
      .field("len", &self.shared.store.len())
      .field("closed", &self.shared.closed.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// A point-in-time statistics snapshot, or `None` when statistics are
  /// disabled.
  pub fn statistics(&self) -> Option<StatsSnapshot> {
    self.shared.stats.as_ref().map(|stats| stats.snapshot())
  }

  /// Resets every statistics counter to zero. A no-op when statistics are
  /// disabled.
  pub fn clear_statistics(&self) {
    if let Some(stats) = &self.shared.stats {
      stats.reset();
    }
  }

  /// Closes the cache and discards its entries. Every later operation fails
  /// with [`CacheError::Closed`]. Closing twice is a no-op.
  pub fn close(&self) {
    if self
      .shared
      .closed
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.shared.store.clear();
    }
  }

  pub fn is_closed(&self) -> bool {
    self.shared.closed.load(Ordering::Acquire)
  }

  /// Registers a listener; the returned id deregisters it again.
  pub fn register_listener(
    &self,
    config: ListenerConfig<K, V>,
  ) -> Result<ListenerId, CacheError> {
    self.shared.ensure_open()?;
    Ok(self.shared.dispatcher.register(config))
  }

  /// Deregisters a listener. Returns `false` if the id is unknown.
  pub fn deregister_listener(&self, id: ListenerId) -> Result<bool, CacheError> {
    self.shared.ensure_open()?;
    Ok(self.shared.dispatcher.deregister(id))
  }

  // --- Reads ---

  /// Looks up a key. On a miss (or an expired entry) with read-through
  /// configured, the loader is consulted and a loaded value installed.
  pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    if let Some(value) = self.lookup(key)? {
      return Ok(Some(value));
    }

    match self.shared.loader.clone() {
      Some(loader) => self.load_and_cache(key, loader.as_ref()),
      None => {
        self.shared.record(Stats::record_miss);
        Ok(None)
      }
    }
  }

  /// Looks up every key, loading the missing ones in one batch when
  /// read-through is configured.
  pub fn get_all(&self, keys: &[K]) -> Result<HashMap<K, Arc<V>>, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let mut found = HashMap::with_capacity(keys.len());
    let mut missing = Vec::new();
    for key in keys {
      match self.get_cached_only(key)? {
        Some(value) => {
          found.insert(key.clone(), value);
        }
        None => missing.push(key.clone()),
      }
    }

    if !missing.is_empty() {
      if let Some(loader) = self.shared.loader.clone() {
        let loaded = loader.load_all(&missing).map_err(CacheError::Loader)?;
        for (key, value) in loaded {
          let value = Arc::new(value);
          if self.install_loaded(&key, &value) {
            self.shared.record(Stats::record_put);
            self.created_event(&key, &value);
          }
          found.insert(key.clone(), self.shared.copy_out(&value)?);
        }
      }
    }

    Ok(found)
  }

  /// Whether a live entry exists for the key. Does not touch access expiry
  /// and records no hit or miss.
  pub fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let now = time::now_millis();
    let outcome = self.shared.compute(key, |existing| match existing {
      None => (SlotOp::Keep, Lookup::Miss),
      Some(entry) if entry.is_expired(now) => (SlotOp::Remove, Lookup::Expired(entry.value())),
      Some(entry) => (SlotOp::Keep, Lookup::Hit(entry.value())),
    });

    match outcome {
      Lookup::Hit(_) => Ok(true),
      Lookup::Expired(old) => {
        self.shared.record(Stats::record_eviction);
        self.expired_event(key, &old);
        Ok(false)
      }
      Lookup::Miss => Ok(false),
    }
  }

  // --- Writes ---

  /// Inserts or replaces the value for a key.
  pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let value = Arc::new(value);
    self.shared.write_through(&key, &value)?;
    self.put_after_writer(key, value);
    Ok(())
  }

  /// As [`Cache::put`], returning the previous value.
  pub fn get_and_put(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let value = Arc::new(value);
    self.shared.write_through(&key, &value)?;
    let outcome = self.install(&key, &value);

    if let Some(expired) = &outcome.expired_old {
      self.shared.record(Stats::record_eviction);
      self.expired_event(&key, expired);
    }

    match outcome.installed {
      Installed::Created => {
        self.created_event(&key, &value);
        self.shared.record(|stats| {
          stats.record_put();
          stats.record_miss();
        });
        Ok(None)
      }
      Installed::Updated { old } => {
        let previous = self.shared.copy_out(&old)?;
        self.updated_event(&key, &old, &value);
        self.shared.record(|stats| {
          stats.record_put();
          stats.record_hit();
        });
        Ok(Some(previous))
      }
    }
  }

  /// Inserts every entry. The batch is not atomic as a whole, but each key
  /// retains the full single-key semantics. With write-through configured
  /// the writer's batch hook runs once, first; keys it reports as failed are
  /// skipped and surface in the returned error.
  pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<(), CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let entries: Vec<(K, Arc<V>)> = entries
      .into_iter()
      .map(|(key, value)| (key, Arc::new(value)))
      .collect();

    let mut failure: Option<(HashSet<K>, Vec<String>, IntegrationError)> = None;
    if let Some(writer) = &self.shared.writer {
      let mut batch: Vec<(&K, &V)> = entries
        .iter()
        .map(|(key, value)| (key, value.as_ref()))
        .collect();
      if let Err(source) = writer.write_all(&mut batch) {
        let failed: HashSet<K> = batch.iter().map(|(key, _)| (*key).clone()).collect();
        let failed_keys = failed.iter().map(|key| format!("{key:?}")).collect();
        failure = Some((failed, failed_keys, source));
      }
    }

    match failure {
      None => {
        for (key, value) in entries {
          self.put_after_writer(key, value);
        }
        Ok(())
      }
      Some((failed, failed_keys, source)) => {
        for (key, value) in entries {
          if !failed.contains(&key) {
            self.put_after_writer(key, value);
          }
        }
        Err(CacheError::WriterBatch {
          failed_keys,
          source,
        })
      }
    }
  }

  /// Inserts only if no live entry exists. Returns whether the insert
  /// happened.
  ///
  /// With write-through configured, the writer runs up front when a probe
  /// says the key is absent; losing the race to a concurrent insert wastes
  /// that writer call, but the atomic compute still gates the cache state.
  pub fn put_if_absent(&self, key: K, value: V) -> Result<bool, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let value = Arc::new(value);
    if self.shared.writer.is_some() && !self.probe_live(&key) {
      self.shared.write_through(&key, &value)?;
    }

    let now = time::now_millis();
    let (inserted, expired_old) = self.shared.compute(&key, |existing| match existing {
      Some(entry) if !entry.is_expired(now) => (SlotOp::Keep, (false, None)),
      other => {
        let expired_old = other.filter(|entry| entry.is_expired(now)).map(|entry| entry.value());
        let entry = Expirable::new(value.clone(), self.shared.expiry.creation_expiry());
        (SlotOp::Install(entry), (true, expired_old))
      }
    });

    if let Some(expired) = &expired_old {
      self.shared.record(Stats::record_eviction);
      self.expired_event(&key, expired);
    }

    if inserted {
      self.created_event(&key, &value);
      self.shared.record(|stats| {
        stats.record_put();
        stats.record_miss();
      });
    } else {
      self.shared.record(Stats::record_hit);
    }
    Ok(inserted)
  }

  // --- Removals ---

  /// Removes the entry for a key. Returns whether a live entry was removed.
  pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    self.shared.delete_through(key)?;
    Ok(self.remove_after_writer(key))
  }

  /// Removes the entry only if its value equals `expected`.
  pub fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool, CacheError>
  where
    V: PartialEq,
  {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    // The writer only runs when the condition currently holds.
    if self.shared.writer.is_some() && self.probe_matches(key, expected) {
      self.shared.delete_through(key)?;
    }

    let now = time::now_millis();
    let outcome = self.shared.compute(key, |existing| match existing {
      None => (SlotOp::Keep, Removal::Miss),
      Some(entry) if entry.is_expired(now) => (SlotOp::Remove, Removal::Expired(entry.value())),
      Some(entry) if entry.value_ref() == expected => {
        (SlotOp::Remove, Removal::Removed(entry.value()))
      }
      Some(_) => (SlotOp::Keep, Removal::Miss),
    });

    match outcome {
      Removal::Expired(old) => {
        self.shared.record(|stats| {
          stats.record_eviction();
          stats.record_miss();
        });
        self.expired_event(key, &old);
        Ok(false)
      }
      Removal::Removed(old) => {
        self.removed_event(key, &old);
        self.shared.record(|stats| {
          stats.record_removal();
          stats.record_hit();
        });
        Ok(true)
      }
      Removal::Miss => {
        self.shared.record(Stats::record_miss);
        Ok(false)
      }
    }
  }

  /// Removes the entry for a key, returning the removed value.
  pub fn get_and_remove(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    self.shared.delete_through(key)?;

    let now = time::now_millis();
    let outcome = self.shared.compute(key, |existing| match existing {
      None => (SlotOp::Keep, Removal::Miss),
      Some(entry) if entry.is_expired(now) => (SlotOp::Remove, Removal::Expired(entry.value())),
      Some(entry) => (SlotOp::Remove, Removal::Removed(entry.value())),
    });

    match outcome {
      Removal::Expired(old) => {
        self.shared.record(|stats| {
          stats.record_eviction();
          stats.record_miss();
        });
        self.expired_event(key, &old);
        Ok(None)
      }
      Removal::Removed(old) => {
        let removed = self.shared.copy_out(&old)?;
        self.removed_event(key, &old);
        self.shared.record(|stats| {
          stats.record_removal();
          stats.record_hit();
        });
        Ok(Some(removed))
      }
      Removal::Miss => {
        self.shared.record(Stats::record_miss);
        Ok(None)
      }
    }
  }

  /// Removes the given keys, with the writer's batch delete hook invoked
  /// once up front. Keys the writer reports as failed are skipped and
  /// surface in the returned error.
  pub fn remove_all(&self, keys: &[K]) -> Result<(), CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let mut failure: Option<(HashSet<K>, Vec<String>, IntegrationError)> = None;
    if let Some(writer) = &self.shared.writer {
      let mut batch: Vec<&K> = keys.iter().collect();
      if let Err(source) = writer.delete_all(&mut batch) {
        let failed: HashSet<K> = batch.iter().map(|key| (*key).clone()).collect();
        let failed_keys = failed.iter().map(|key| format!("{key:?}")).collect();
        failure = Some((failed, failed_keys, source));
      }
    }

    match failure {
      None => {
        for key in keys {
          self.remove_after_writer(key);
        }
        Ok(())
      }
      Some((failed, failed_keys, source)) => {
        for key in keys {
          if !failed.contains(key) {
            self.remove_after_writer(key);
          }
        }
        Err(CacheError::WriterBatch {
          failed_keys,
          source,
        })
      }
    }
  }

  /// Removes every entry, firing a REMOVED event and counting a removal per
  /// live entry. Expired entries encountered on the way are evicted.
  pub fn remove_all_entries(&self) -> Result<(), CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    for key in self.shared.store.all_keys() {
      self.remove(&key)?;
    }
    Ok(())
  }

  /// Discards every entry. Emits no events and records no statistics: a
  /// bulk discard is neither a removal nor an eviction under the contract.
  pub fn clear(&self) -> Result<(), CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;
    self.shared.store.clear();
    Ok(())
  }

  // --- Replacements ---

  /// Replaces the value only if a live entry exists. Returns whether the
  /// replacement happened.
  pub fn replace(&self, key: &K, value: V) -> Result<bool, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let value = Arc::new(value);
    if self.shared.writer.is_some() && self.probe_live(key) {
      self.shared.write_through(key, &value)?;
    }

    let outcome = self.replace_compute(key, &value, |_| true);
    self.finish_replace(key, &value, outcome)
      .map(|previous| previous.is_some())
  }

  /// Replaces the value only if the current value equals `expected`.
  pub fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> Result<bool, CacheError>
  where
    V: PartialEq,
  {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let value = Arc::new(value);
    if self.shared.writer.is_some() && self.probe_matches(key, expected) {
      self.shared.write_through(key, &value)?;
    }

    let outcome = self.replace_compute(key, &value, |current| current == expected);
    self.finish_replace(key, &value, outcome)
      .map(|previous| previous.is_some())
  }

  /// As [`Cache::replace`], returning the previous value.
  pub fn get_and_replace(&self, key: &K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let value = Arc::new(value);
    if self.shared.writer.is_some() && self.probe_live(key) {
      self.shared.write_through(key, &value)?;
    }

    let outcome = self.replace_compute(key, &value, |_| true);
    match self.finish_replace(key, &value, outcome)? {
      Some(old) => Ok(Some(self.shared.copy_out(&old)?)),
      None => Ok(None),
    }
  }

  // --- Entry processors ---

  /// Runs an entry processor against one key, atomically.
  ///
  /// The processor expresses its intent through the [`MutableEntry`] it is
  /// handed; the cache commits that intent when the processor returns. On a
  /// processor error the slot is left exactly as the processor found it.
  /// Cache operations invoked from inside the processor fail with
  /// [`CacheError::Reentrant`].
  pub fn invoke<R>(
    &self,
    key: &K,
    processor: impl FnOnce(&mut MutableEntry<K, V>) -> Result<R, IntegrationError>,
  ) -> Result<R, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    // Phase A: if read-through applies, load outside the atomic compute.
    let mut loaded: Option<Arc<V>> = None;
    if let Some(loader) = &self.shared.loader {
      let now = time::now_millis();
      let needs_load = self
        .shared
        .store
        .probe(key)
        .map_or(true, |entry| entry.is_expired(now));
      if needs_load {
        loaded = loader.load(key).map_err(CacheError::Loader)?.map(Arc::new);
      }
    }

    // Phase B: run the processor against the latest slot state, under the
    // slot's compute. A fresh value that appeared since the probe wins over
    // the loaded one.
    let copier = self.shared.copier.clone();
    let expiry = &self.shared.expiry;
    let now = time::now_millis();

    let outcome = self.shared.compute(key, move |existing| {
      let mut expired_old = None;
      let mut load_used = false;

      let (original_value, original_exists) = match existing {
        Some(entry) if entry.is_expired(now) => {
          expired_old = Some(entry.value());
          match &loaded {
            Some(value) => {
              load_used = true;
              (Some(value.clone()), true)
            }
            None => (None, false),
          }
        }
        Some(entry) => (Some(entry.value()), true),
        None => match &loaded {
          Some(value) => {
            load_used = true;
            (Some(value.clone()), true)
          }
          None => (None, false),
        },
      };

      let mut view =
        MutableEntry::new(key, original_value.clone(), original_exists, copier.as_ref());
      let scope = ProcessorScope::enter();
      let result = processor(&mut view);
      drop(scope);

      if result.is_err() {
        // Failed processors leave the slot exactly as the probe found it.
        return (
          SlotOp::Keep,
          Invoked {
            result,
            commit: Commit::None,
            expired_old,
            load_used,
            original_exists,
            original_value,
            accessed: view.was_accessed(),
          },
        );
      }

      let accessed = view.was_accessed();

      if view.was_removed() {
        return (
          SlotOp::Remove,
          Invoked {
            result,
            commit: Commit::Removed,
            expired_old,
            load_used,
            original_exists,
            original_value,
            accessed,
          },
        );
      }

      if let Some(new_value) = view.staged_value() {
        let in_store_update = original_exists && !load_used;
        let expire_at = if in_store_update {
          let current = existing.map(|entry| entry.expire_at()).unwrap_or(ETERNAL);
          expiry.update_expiry().or_keep(current)
        } else {
          expiry.creation_expiry()
        };
        let commit = if in_store_update {
          Commit::Updated {
            new: new_value.clone(),
          }
        } else {
          Commit::Created(new_value.clone())
        };
        return (
          SlotOp::Install(Expirable::new(new_value, expire_at)),
          Invoked {
            result,
            commit,
            expired_old,
            load_used,
            original_exists,
            original_value,
            accessed,
          },
        );
      }

      if load_used {
        if let Some(value) = &loaded {
          // The processor only read; fold the loaded value into the store.
          let entry = Expirable::new(value.clone(), expiry.creation_expiry());
          return (
            SlotOp::Install(entry),
            Invoked {
              result,
              commit: Commit::Created(value.clone()),
              expired_old,
              load_used,
              original_exists,
              original_value,
              accessed,
            },
          );
        }
      }

      (
        SlotOp::Keep,
        Invoked {
          result,
          commit: Commit::None,
          expired_old,
          load_used,
          original_exists,
          original_value,
          accessed,
        },
      )
    });

    // An expired slot only counts as evicted once something actually
    // replaced or removed it.
    if let Some(expired) = &outcome.expired_old {
      if !matches!(outcome.commit, Commit::None) {
        self.shared.record(Stats::record_eviction);
        self.expired_event(key, expired);
      }
    }

    let result = outcome.result.map_err(CacheError::Processor)?;

    if outcome.accessed {
      if outcome.load_used || !outcome.original_exists {
        self.shared.record(Stats::record_miss);
      } else {
        self.shared.record(Stats::record_hit);
      }
    }

    match outcome.commit {
      Commit::Removed => {
        if outcome.original_exists {
          if let Some(original) = &outcome.original_value {
            self.removed_event(key, original);
          }
          self.shared.record(Stats::record_removal);
        }
      }
      Commit::Updated { new } => {
        if let Some(original) = &outcome.original_value {
          self.updated_event(key, original, &new);
        }
        self.shared.record(Stats::record_put);
      }
      Commit::Created(new) => {
        self.created_event(key, &new);
        self.shared.record(Stats::record_put);
      }
      Commit::None => {}
    }

    Ok(result)
  }

  /// Runs an entry processor against each key independently. A failure for
  /// one key is recorded in that key's result and does not stop the batch.
  pub fn invoke_all<R>(
    &self,
    keys: &[K],
    processor: impl Fn(&mut MutableEntry<K, V>) -> Result<R, IntegrationError>,
  ) -> Result<HashMap<K, Result<R, CacheError>>, CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let mut results = HashMap::with_capacity(keys.len());
    for key in keys {
      let result = self.invoke(key, &processor);
      results.insert(key.clone(), result);
    }
    Ok(results)
  }

  // --- Bulk loading ---

  /// Loads the given keys in the background, skipping live entries unless
  /// `replace_existing` is set. The completion listener is notified exactly
  /// once, after the whole batch finished or failed.
  pub fn load_all(
    &self,
    keys: Vec<K>,
    replace_existing: bool,
    completion: Option<Arc<dyn CompletionListener>>,
  ) -> Result<(), CacheError> {
    self.shared.ensure_open()?;
    self.shared.check_reentrant()?;

    let loader = match self.shared.loader.clone() {
      Some(loader) => loader,
      None => {
        if let Some(listener) = completion {
          listener.on_completion();
        }
        return Ok(());
      }
    };

    let cache = self.clone();
    thread::spawn(move || {
      let outcome = cache.run_load_all(loader.as_ref(), keys, replace_existing);
      match (outcome, completion) {
        (Ok(()), Some(listener)) => listener.on_completion(),
        (Ok(()), None) => {}
        (Err(error), Some(listener)) => listener.on_failure(error),
        (Err(error), None) => {
          tracing::warn!(cache = %cache.shared.name, %error, "background load failed");
        }
      }
    });
    Ok(())
  }

  fn run_load_all(
    &self,
    loader: &dyn crate::integration::CacheLoader<K, V>,
    keys: Vec<K>,
    replace_existing: bool,
  ) -> Result<(), IntegrationError> {
    let to_load: Vec<K> = keys
      .into_iter()
      .filter(|key| replace_existing || !self.probe_live(key))
      .collect();
    if to_load.is_empty() {
      return Ok(());
    }

    let loaded = loader.load_all(&to_load)?;
    for (key, value) in loaded {
      let value = Arc::new(value);
      if replace_existing {
        self.put_after_writer(key, value);
      } else if self.install_loaded(&key, &value) {
        self.shared.record(Stats::record_put);
        self.created_event(&key, &value);
      }
    }
    Ok(())
  }

  // --- Iteration ---

  /// Iterates over the live entries. Expired entries encountered along the
  /// way are removed in place, evicted and EXPIRED-notified; yielded values
  /// are copies per the configured copier.
  pub fn iter(&self) -> Result<CacheIter<'_, K, V>, CacheError> {
    self.shared.ensure_open()?;
    Ok(CacheIter::new(self))
  }

  // --- Shared internals ---

  /// Read-style compute shared by `get` and `get_all`: resolves the slot,
  /// applies access expiry on a hit and evicts an expired entry.
  fn lookup(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    let now = time::now_millis();
    let outcome = self.shared.compute(key, |existing| match existing {
      None => (SlotOp::Keep, Lookup::Miss),
      Some(entry) if entry.is_expired(now) => (SlotOp::Remove, Lookup::Expired(entry.value())),
      Some(entry) => {
        let value = entry.value();
        match self.shared.expiry.access_expiry() {
          ExpiryDecision::At(at) => (
            SlotOp::Install(entry.with_expire_at(at)),
            Lookup::Hit(value),
          ),
          ExpiryDecision::Unchanged => (SlotOp::Keep, Lookup::Hit(value)),
        }
      }
    });

    match outcome {
      Lookup::Hit(value) => {
        let copy = self.shared.copy_out(&value)?;
        self.shared.record(Stats::record_hit);
        Ok(Some(copy))
      }
      Lookup::Expired(old) => {
        self.shared.record(Stats::record_eviction);
        self.expired_event(key, &old);
        Ok(None)
      }
      Lookup::Miss => Ok(None),
    }
  }

  /// `get_all`'s per-key read: as [`Cache::lookup`], but a miss (absent or
  /// expired) is recorded immediately since the batch loader accounts for
  /// its installs separately.
  fn get_cached_only(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    let found = self.lookup(key)?;
    if found.is_none() {
      self.shared.record(Stats::record_miss);
    }
    Ok(found)
  }

  /// Read-through for `get`: loads outside any compute, then folds the
  /// result into the store with a second compute that re-validates.
  fn load_and_cache(
    &self,
    key: &K,
    loader: &dyn crate::integration::CacheLoader<K, V>,
  ) -> Result<Option<Arc<V>>, CacheError> {
    let loaded = loader.load(key).map_err(CacheError::Loader)?;
    let loaded = match loaded {
      Some(value) => Arc::new(value),
      None => {
        self.shared.record(Stats::record_miss);
        return Ok(None);
      }
    };

    if self.install_loaded(key, &loaded) {
      self.shared.record(|stats| {
        stats.record_miss();
        stats.record_put();
      });
      self.created_event(key, &loaded);
    } else {
      // Lost the race to a concurrent write: the loaded value is discarded
      // from the store but still returned to this caller.
      self.shared.record(Stats::record_miss);
    }

    Ok(Some(self.shared.copy_out(&loaded)?))
  }

  /// Second compute of the read-through protocol. Installs the loaded value
  /// unless a live entry has appeared in the meantime; returns whether the
  /// install happened.
  fn install_loaded(&self, key: &K, loaded: &Arc<V>) -> bool {
    let now = time::now_millis();
    self.shared.compute(key, |existing| {
      if let Some(entry) = existing {
        if !entry.is_expired(now) {
          return (SlotOp::Keep, false);
        }
      }
      let entry = Expirable::new(loaded.clone(), self.shared.expiry.creation_expiry());
      (SlotOp::Install(entry), true)
    })
  }

  /// Unconditional install shared by the put family: update semantics for a
  /// live entry, create semantics otherwise.
  fn install(&self, key: &K, value: &Arc<V>) -> InstallOutcome<V> {
    let now = time::now_millis();
    self.shared.compute(key, |existing| match existing {
      Some(entry) if !entry.is_expired(now) => {
        let expire_at = self.shared.expiry.update_expiry().or_keep(entry.expire_at());
        (
          SlotOp::Install(Expirable::new(value.clone(), expire_at)),
          InstallOutcome {
            installed: Installed::Updated { old: entry.value() },
            expired_old: None,
          },
        )
      }
      other => {
        let expired_old = other
          .filter(|entry| entry.is_expired(now))
          .map(|entry| entry.value());
        let entry = Expirable::new(value.clone(), self.shared.expiry.creation_expiry());
        (
          SlotOp::Install(entry),
          InstallOutcome {
            installed: Installed::Created,
            expired_old,
          },
        )
      }
    })
  }

  /// Install plus its side effects, used once the writer (if any) has run.
  pub(crate) fn put_after_writer(&self, key: K, value: Arc<V>) {
    let outcome = self.install(&key, &value);

    if let Some(expired) = &outcome.expired_old {
      self.shared.record(Stats::record_eviction);
      self.expired_event(&key, expired);
    }
    match &outcome.installed {
      Installed::Created => self.created_event(&key, &value),
      Installed::Updated { old } => self.updated_event(&key, old, &value),
    }
    self.shared.record(Stats::record_put);
  }

  /// Unconditional removal plus its side effects, used once the writer (if
  /// any) has run. Returns whether a live entry was removed.
  pub(crate) fn remove_after_writer(&self, key: &K) -> bool {
    let now = time::now_millis();
    let outcome = self.shared.compute(key, |existing| match existing {
      None => (SlotOp::Keep, Removal::Miss),
      Some(entry) if entry.is_expired(now) => (SlotOp::Remove, Removal::Expired(entry.value())),
      Some(entry) => (SlotOp::Remove, Removal::Removed(entry.value())),
    });

    match outcome {
      Removal::Expired(old) => {
        self.shared.record(Stats::record_eviction);
        self.expired_event(key, &old);
        false
      }
      Removal::Removed(old) => {
        self.removed_event(key, &old);
        self.shared.record(Stats::record_removal);
        true
      }
      Removal::Miss => false,
    }
  }

  /// Compute shared by the replace family. `matches` narrows the condition,
  /// e.g. to value equality for the conditional form.
  fn replace_compute(
    &self,
    key: &K,
    value: &Arc<V>,
    matches: impl FnOnce(&V) -> bool,
  ) -> Replacement<V> {
    let now = time::now_millis();
    self.shared.compute(key, |existing| match existing {
      None => (SlotOp::Keep, Replacement::Miss),
      Some(entry) if entry.is_expired(now) => {
        (SlotOp::Remove, Replacement::Expired(entry.value()))
      }
      Some(entry) => {
        if !matches(entry.value_ref()) {
          return (SlotOp::Keep, Replacement::Mismatch);
        }
        let expire_at = self.shared.expiry.update_expiry().or_keep(entry.expire_at());
        (
          SlotOp::Install(Expirable::new(value.clone(), expire_at)),
          Replacement::Replaced(entry.value()),
        )
      }
    })
  }

  /// Side effects of the replace family; returns the previous value when
  /// the replacement happened.
  fn finish_replace(
    &self,
    key: &K,
    value: &Arc<V>,
    outcome: Replacement<V>,
  ) -> Result<Option<Arc<V>>, CacheError> {
    match outcome {
      Replacement::Expired(old) => {
        self.shared.record(|stats| {
          stats.record_eviction();
          stats.record_miss();
        });
        self.expired_event(key, &old);
        Ok(None)
      }
      Replacement::Replaced(old) => {
        self.updated_event(key, &old, value);
        self.shared.record(|stats| {
          stats.record_put();
          stats.record_hit();
        });
        Ok(Some(old))
      }
      Replacement::Miss | Replacement::Mismatch => {
        self.shared.record(Stats::record_miss);
        Ok(None)
      }
    }
  }

  /// Whether a live (non-expired) entry currently exists. No side effects.
  pub(crate) fn probe_live(&self, key: &K) -> bool {
    let now = time::now_millis();
    self
      .shared
      .store
      .probe(key)
      .map_or(false, |entry| !entry.is_expired(now))
  }

  /// Whether a live entry currently holds `expected`. No side effects.
  fn probe_matches(&self, key: &K, expected: &V) -> bool
  where
    V: PartialEq,
  {
    let now = time::now_millis();
    match self.shared.store.probe(key) {
      Some(entry) if !entry.is_expired(now) => entry.value_ref() == expected,
      _ => false,
    }
  }

  // --- Event helpers ---
  //
  // Values handed to listeners are copies per the configured copier. A copy
  // failure at this boundary cannot roll back the committed transition, so
  // it is treated like a listener failure: logged and swallowed.

  pub(crate) fn created_event(&self, key: &K, value: &Arc<V>) {
    if !self.shared.dispatcher.has_listeners() {
      return;
    }
    match self.shared.copier.copy(value) {
      Ok(copy) => self.shared.dispatcher.created(key.clone(), copy),
      Err(error) => tracing::warn!(%error, "could not copy value for created event"),
    }
  }

  pub(crate) fn updated_event(&self, key: &K, old: &Arc<V>, new: &Arc<V>) {
    if !self.shared.dispatcher.has_listeners() {
      return;
    }
    match (self.shared.copier.copy(old), self.shared.copier.copy(new)) {
      (Ok(old), Ok(new)) => self.shared.dispatcher.updated(key.clone(), old, new),
      (Err(error), _) | (_, Err(error)) => {
        tracing::warn!(%error, "could not copy values for updated event");
      }
    }
  }

  pub(crate) fn removed_event(&self, key: &K, old: &Arc<V>) {
    if !self.shared.dispatcher.has_listeners() {
      return;
    }
    match self.shared.copier.copy(old) {
      Ok(copy) => self.shared.dispatcher.removed(key.clone(), copy),
      Err(error) => tracing::warn!(%error, "could not copy value for removed event"),
    }
  }

  pub(crate) fn expired_event(&self, key: &K, old: &Arc<V>) {
    if !self.shared.dispatcher.has_listeners() {
      return;
    }
    match self.shared.copier.copy(old) {
      Ok(copy) => self.shared.dispatcher.expired(key.clone(), copy),
      Err(error) => tracing::warn!(%error, "could not copy value for expired event"),
    }
  }
}
