//! Per-entry expiration policies and the calculator that turns their
//! durations into absolute timestamps.

use crate::time::{self, ETERNAL};

use std::sync::Arc;
use std::time::Duration;

/// A duration returned by an [`ExpiryPolicy`] callback.
///
/// `Of(Duration::ZERO)` means "expire immediately": the entry is written but
/// is already past its deadline on the next observed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDuration {
  /// The entry never expires.
  Eternal,
  /// The entry expires this long after the triggering event.
  Of(Duration),
}

/// Decides how long entries live, per event kind.
///
/// Each callback may return `None`, meaning "leave the current expiration
/// time unchanged". For creation there is no prior expiration to preserve,
/// so `None` is treated as eternal.
pub trait ExpiryPolicy: Send + Sync {
  fn expiry_for_creation(&self) -> Option<ExpiryDuration>;
  fn expiry_for_update(&self) -> Option<ExpiryDuration>;
  fn expiry_for_access(&self) -> Option<ExpiryDuration>;
}

/// Entries never expire. This is the default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct EternalExpiryPolicy;

impl ExpiryPolicy for EternalExpiryPolicy {
  fn expiry_for_creation(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Eternal)
  }

  fn expiry_for_update(&self) -> Option<ExpiryDuration> {
    None
  }

  fn expiry_for_access(&self) -> Option<ExpiryDuration> {
    None
  }
}

/// Entries expire a fixed duration after creation; updates and accesses do
/// not touch the deadline.
#[derive(Debug, Clone, Copy)]
pub struct CreatedExpiryPolicy {
  ttl: Duration,
}

impl CreatedExpiryPolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }
}

impl ExpiryPolicy for CreatedExpiryPolicy {
  fn expiry_for_creation(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }

  fn expiry_for_update(&self) -> Option<ExpiryDuration> {
    None
  }

  fn expiry_for_access(&self) -> Option<ExpiryDuration> {
    None
  }
}

/// Entries expire a fixed duration after creation or the latest update.
#[derive(Debug, Clone, Copy)]
pub struct ModifiedExpiryPolicy {
  ttl: Duration,
}

impl ModifiedExpiryPolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }
}

impl ExpiryPolicy for ModifiedExpiryPolicy {
  fn expiry_for_creation(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }

  fn expiry_for_update(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }

  fn expiry_for_access(&self) -> Option<ExpiryDuration> {
    None
  }
}

/// Entries expire a fixed duration after creation or the latest read.
#[derive(Debug, Clone, Copy)]
pub struct AccessedExpiryPolicy {
  ttl: Duration,
}

impl AccessedExpiryPolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }
}

impl ExpiryPolicy for AccessedExpiryPolicy {
  fn expiry_for_creation(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }

  fn expiry_for_update(&self) -> Option<ExpiryDuration> {
    None
  }

  fn expiry_for_access(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }
}

/// Entries expire a fixed duration after any touch: creation, update or read.
#[derive(Debug, Clone, Copy)]
pub struct TouchedExpiryPolicy {
  ttl: Duration,
}

impl TouchedExpiryPolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }
}

impl ExpiryPolicy for TouchedExpiryPolicy {
  fn expiry_for_creation(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }

  fn expiry_for_update(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }

  fn expiry_for_access(&self) -> Option<ExpiryDuration> {
    Some(ExpiryDuration::Of(self.ttl))
  }
}

/// Outcome of consulting the policy for an update or access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpiryDecision {
  /// The policy declined; keep whatever expiration the entry already has.
  Unchanged,
  /// Replace the expiration with this absolute timestamp.
  At(u64),
}

impl ExpiryDecision {
  /// Resolves the decision against the entry's current expiration.
  #[inline]
  pub(crate) fn or_keep(self, current: u64) -> u64 {
    match self {
      ExpiryDecision::Unchanged => current,
      ExpiryDecision::At(at) => at,
    }
  }
}

/// Maps policy callbacks to absolute expiration timestamps. The calculator
/// never consults the entry's existing expiry and never rounds.
pub(crate) struct ExpiryCalculator {
  policy: Arc<dyn ExpiryPolicy>,
}

impl ExpiryCalculator {
  pub(crate) fn new(policy: Arc<dyn ExpiryPolicy>) -> Self {
    Self { policy }
  }

  /// Expiration for a freshly created entry. A declining policy collapses
  /// to eternal here, since a new entry has no expiry to preserve.
  pub(crate) fn creation_expiry(&self) -> u64 {
    match self.policy.expiry_for_creation() {
      Some(duration) => to_expire_at(duration),
      None => ETERNAL,
    }
  }

  pub(crate) fn update_expiry(&self) -> ExpiryDecision {
    decide(self.policy.expiry_for_update())
  }

  pub(crate) fn access_expiry(&self) -> ExpiryDecision {
    decide(self.policy.expiry_for_access())
  }
}

fn decide(duration: Option<ExpiryDuration>) -> ExpiryDecision {
  match duration {
    Some(duration) => ExpiryDecision::At(to_expire_at(duration)),
    None => ExpiryDecision::Unchanged,
  }
}

fn to_expire_at(duration: ExpiryDuration) -> u64 {
  match duration {
    ExpiryDuration::Eternal => ETERNAL,
    ExpiryDuration::Of(duration) => {
      time::now_millis().saturating_add(duration.as_millis() as u64)
    }
  }
}
