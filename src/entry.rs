use crate::time;

use core::fmt;
use std::sync::Arc;

/// Immutable pair of a cached value and its absolute expiration time.
///
/// A slot in the store never mutates an `Expirable` in place; every state
/// transition replaces it with a new one. The value itself is shared through
/// an `Arc` so that rewrapping with a new expiry never copies it.
pub(crate) struct Expirable<V> {
  value: Arc<V>,
  /// Milliseconds since the cache epoch. `time::ETERNAL` never expires.
  expire_at: u64,
}

impl<V> Clone for Expirable<V> {
  fn clone(&self) -> Self {
    Self {
      value: self.value.clone(),
      expire_at: self.expire_at,
    }
  }
}

impl<V> fmt::Debug for Expirable<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Expirable")
      .field("expire_at", &self.expire_at)
      .finish_non_exhaustive()
  }
}

impl<V> Expirable<V> {
  pub(crate) fn new(value: Arc<V>, expire_at: u64) -> Self {
    Self { value, expire_at }
  }

  pub(crate) fn eternal(value: Arc<V>) -> Self {
    Self::new(value, time::ETERNAL)
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn value_ref(&self) -> &V {
    &self.value
  }

  #[inline]
  pub(crate) fn expire_at(&self) -> u64 {
    self.expire_at
  }

  /// An entry is expired once the clock has moved strictly past its expiry.
  /// Eternal entries never expire.
  #[inline]
  pub(crate) fn is_expired(&self, now: u64) -> bool {
    self.expire_at != time::ETERNAL && now > self.expire_at
  }

  /// Rewraps the same value with a new expiration time. The value is shared,
  /// not copied.
  pub(crate) fn with_expire_at(&self, expire_at: u64) -> Self {
    Self {
      value: self.value.clone(),
      expire_at,
    }
  }
}
