//! External collaborator hooks: read-through loaders, write-through writers
//! and the completion callback for background bulk loads.

use crate::error::IntegrationError;

use std::hash::Hash;

use ahash::{HashMap, HashMapExt};

/// Source of values for read-through caching.
///
/// Implementations are assumed to be thread-safe; the cache may call them
/// from any caller thread and from background load tasks.
pub trait CacheLoader<K, V>: Send + Sync {
  /// Loads the value for a key, or `None` if the source has no entry.
  fn load(&self, key: &K) -> Result<Option<V>, IntegrationError>;

  /// Batch load hook. The default delegates to [`CacheLoader::load`] per
  /// key; sources with a cheaper bulk path should override it.
  fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, IntegrationError>
  where
    K: Eq + Hash + Clone,
  {
    let mut loaded = HashMap::with_capacity(keys.len());
    for key in keys {
      if let Some(value) = self.load(key)? {
        loaded.insert(key.clone(), value);
      }
    }
    Ok(loaded)
  }
}

/// Sink for write-through caching. The cache invokes the writer *before*
/// mutating its own state; a writer failure leaves the cache untouched.
pub trait CacheWriter<K, V>: Send + Sync {
  fn write(&self, key: &K, value: &V) -> Result<(), IntegrationError>;

  fn delete(&self, key: &K) -> Result<(), IntegrationError>;

  /// Batch write hook. On failure the vec must be left holding exactly the
  /// entries that were not written; the cache skips those keys and reports
  /// them to the caller. The default delegates to [`CacheWriter::write`],
  /// removing each entry as it succeeds.
  fn write_all(&self, entries: &mut Vec<(&K, &V)>) -> Result<(), IntegrationError> {
    while !entries.is_empty() {
      let (key, value) = entries[0];
      self.write(key, value)?;
      entries.remove(0);
    }
    Ok(())
  }

  /// Batch delete hook, with the same partial-failure contract as
  /// [`CacheWriter::write_all`].
  fn delete_all(&self, keys: &mut Vec<&K>) -> Result<(), IntegrationError> {
    while !keys.is_empty() {
      self.delete(keys[0])?;
      keys.remove(0);
    }
    Ok(())
  }
}

/// Notified exactly once when a background `load_all` finishes.
pub trait CompletionListener: Send + Sync {
  fn on_completion(&self);

  fn on_failure(&self, error: IntegrationError);
}
