use crate::copier::Copier;
use crate::error::CacheError;

use std::sync::Arc;

/// The entry processor's view of a single slot.
///
/// The adapter records the processor's intent (read, set, remove) without
/// touching the store; the cache commits the recorded intent after the
/// processor body returns. `set_value` overrides a previous `remove` and
/// vice versa, so only the last write intent survives.
pub struct MutableEntry<'a, K, V> {
  key: &'a K,
  original_value: Option<Arc<V>>,
  original_exists: bool,
  copier: &'a dyn Copier<V>,
  accessed: bool,
  staged: Option<Arc<V>>,
  removed: bool,
}

impl<'a, K, V> MutableEntry<'a, K, V> {
  pub(crate) fn new(
    key: &'a K,
    original_value: Option<Arc<V>>,
    original_exists: bool,
    copier: &'a dyn Copier<V>,
  ) -> Self {
    Self {
      key,
      original_value,
      original_exists,
      copier,
      accessed: false,
      staged: None,
      removed: false,
    }
  }

  pub fn key(&self) -> &K {
    self.key
  }

  /// Whether the entry exists from the processor's point of view, taking
  /// staged writes and removals into account.
  pub fn exists(&self) -> bool {
    if self.removed {
      return false;
    }
    if self.staged.is_some() {
      return true;
    }
    self.original_exists
  }

  /// The current value as the processor sees it: the staged value if one
  /// was set, nothing after `remove`, otherwise a copy of the original.
  pub fn value(&mut self) -> Result<Option<Arc<V>>, CacheError> {
    self.accessed = true;
    if self.removed {
      return Ok(None);
    }
    if let Some(staged) = &self.staged {
      return Ok(Some(staged.clone()));
    }
    if !self.original_exists {
      return Ok(None);
    }
    match &self.original_value {
      Some(original) => {
        let copy = self
          .copier
          .copy(original)
          .map_err(CacheError::Serialization)?;
        Ok(Some(copy))
      }
      None => Ok(None),
    }
  }

  /// Stages a write for this slot, replacing any staged removal.
  pub fn set_value(&mut self, value: V) {
    self.removed = false;
    self.staged = Some(Arc::new(value));
  }

  /// Stages a removal for this slot, discarding any staged write.
  pub fn remove(&mut self) {
    self.removed = true;
    self.staged = None;
  }

  pub(crate) fn was_accessed(&self) -> bool {
    self.accessed
  }

  pub(crate) fn was_removed(&self) -> bool {
    self.removed
  }

  pub(crate) fn staged_value(&self) -> Option<Arc<V>> {
    self.staged.clone()
  }
}
