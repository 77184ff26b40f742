use crate::copier::Copier;
use crate::entry::Expirable;
use crate::error::CacheError;
use crate::event::EventDispatcher;
use crate::expiry::ExpiryCalculator;
use crate::integration::{CacheLoader, CacheWriter};
use crate::stats::Stats;
use crate::store::{ShardedStore, SlotOp};

use std::cell::Cell;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
  // True while an entry processor body is executing on this thread.
  static IN_PROCESSOR: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running an entry processor. Dropping the
/// scope always clears the flag, including when the processor panics.
pub(crate) struct ProcessorScope;

impl ProcessorScope {
  pub(crate) fn enter() -> Self {
    IN_PROCESSOR.with(|flag| flag.set(true));
    ProcessorScope
  }
}

impl Drop for ProcessorScope {
  fn drop(&mut self) {
    IN_PROCESSOR.with(|flag| flag.set(false));
  }
}

/// The internal, thread-safe core of the cache, shared by every handle.
pub(crate) struct CacheShared<K, V> {
  pub(crate) name: String,
  pub(crate) store: ShardedStore<K, V>,
  pub(crate) copier: Arc<dyn Copier<V>>,
  pub(crate) expiry: ExpiryCalculator,
  pub(crate) stats: Option<Arc<Stats>>,
  pub(crate) dispatcher: EventDispatcher<K, V>,
  pub(crate) loader: Option<Arc<dyn CacheLoader<K, V>>>,
  pub(crate) writer: Option<Arc<dyn CacheWriter<K, V>>>,
  pub(crate) closed: AtomicBool,
}

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn ensure_open(&self) -> Result<(), CacheError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(CacheError::Closed);
    }
    Ok(())
  }

  pub(crate) fn check_reentrant(&self) -> Result<(), CacheError> {
    if IN_PROCESSOR.with(|flag| flag.get()) {
      return Err(CacheError::Reentrant);
    }
    Ok(())
  }

  /// Wraps the store's compute and folds any capacity evictions it reports
  /// into the eviction counter. Capacity evictions emit no events.
  pub(crate) fn compute<R>(
    &self,
    key: &K,
    decide: impl FnOnce(Option<&Expirable<V>>) -> (SlotOp<V>, R),
  ) -> R {
    let (result, evicted) = self.store.compute(key, decide);
    if evicted > 0 {
      if let Some(stats) = &self.stats {
        stats.record_evictions(evicted);
      }
    }
    result
  }

  /// Copies a stored value out across the cache boundary.
  pub(crate) fn copy_out(&self, value: &Arc<V>) -> Result<Arc<V>, CacheError> {
    self.copier.copy(value).map_err(CacheError::Serialization)
  }

  /// Records statistics when they are enabled; a no-op otherwise.
  #[inline]
  pub(crate) fn record<F: FnOnce(&Stats)>(&self, record: F) {
    if let Some(stats) = &self.stats {
      record(stats);
    }
  }

  /// Write-through hook for a pending write, invoked before any mutation.
  pub(crate) fn write_through(&self, key: &K, value: &Arc<V>) -> Result<(), CacheError> {
    if let Some(writer) = &self.writer {
      writer
        .write(key, value.as_ref())
        .map_err(CacheError::Writer)?;
    }
    Ok(())
  }

  /// Write-through hook for a pending removal, invoked before any mutation.
  pub(crate) fn delete_through(&self, key: &K) -> Result<(), CacheError> {
    if let Some(writer) = &self.writer {
      writer.delete(key).map_err(CacheError::Writer)?;
    }
    Ok(())
  }
}
