//! Entry events, listener registration and dispatch.

use crate::task::notifier::Notifier;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// The four entry event kinds of the caching contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Created,
  Updated,
  Removed,
  Expired,
}

impl EventKind {
  pub(crate) const ALL: [EventKind; 4] = [
    EventKind::Created,
    EventKind::Updated,
    EventKind::Removed,
    EventKind::Expired,
  ];
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventKind::Created => write!(f, "created"),
      EventKind::Updated => write!(f, "updated"),
      EventKind::Removed => write!(f, "removed"),
      EventKind::Expired => write!(f, "expired"),
    }
  }
}

/// A single entry event. The values carried here are already copies per the
/// cache's copier; listeners may hold on to them freely.
pub struct EntryEvent<K, V> {
  pub kind: EventKind,
  pub key: K,
  /// The previous value: present for updates, removals and expirations when
  /// the listener registration requested old values.
  pub old_value: Option<Arc<V>>,
  /// The new value: present for creations and updates.
  pub new_value: Option<Arc<V>>,
}

impl<K: Clone, V> Clone for EntryEvent<K, V> {
  fn clone(&self) -> Self {
    Self {
      kind: self.kind,
      key: self.key.clone(),
      old_value: self.old_value.clone(),
      new_value: self.new_value.clone(),
    }
  }
}

impl<K: fmt::Debug, V> fmt::Debug for EntryEvent<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntryEvent")
      .field("kind", &self.kind)
      .field("key", &self.key)
      .field("has_old_value", &self.old_value.is_some())
      .field("has_new_value", &self.new_value.is_some())
      .finish()
  }
}

/// Receives entry events. Every method has an empty default body, so
/// listeners only implement the kinds they care about; the registration's
/// kind set controls which events are delivered at all.
pub trait EntryListener<K, V>: Send + Sync {
  fn on_created(&self, _events: &[EntryEvent<K, V>]) {}

  fn on_updated(&self, _events: &[EntryEvent<K, V>]) {}

  fn on_removed(&self, _events: &[EntryEvent<K, V>]) {}

  fn on_expired(&self, _events: &[EntryEvent<K, V>]) {}
}

/// Per-registration event filter. Filters run before delivery; an event the
/// filter rejects is simply not delivered to that listener.
pub type EventFilter<K, V> = Arc<dyn Fn(&EntryEvent<K, V>) -> bool + Send + Sync>;

/// Configuration for one listener registration.
pub struct ListenerConfig<K, V> {
  pub(crate) listener: Arc<dyn EntryListener<K, V>>,
  pub(crate) kinds: Vec<EventKind>,
  pub(crate) filter: Option<EventFilter<K, V>>,
  pub(crate) synchronous: bool,
  pub(crate) old_value_required: bool,
}

impl<K, V> ListenerConfig<K, V> {
  /// A registration for all event kinds, unfiltered, delivered synchronously
  /// on the calling thread, with old values supplied.
  pub fn new(listener: Arc<dyn EntryListener<K, V>>) -> Self {
    Self {
      listener,
      kinds: EventKind::ALL.to_vec(),
      filter: None,
      synchronous: true,
      old_value_required: true,
    }
  }

  /// Restricts the registration to the given event kinds.
  pub fn kinds(mut self, kinds: &[EventKind]) -> Self {
    self.kinds = kinds.to_vec();
    self
  }

  /// Restricts the registration to events the filter accepts.
  pub fn filter<F>(mut self, filter: F) -> Self
  where
    F: Fn(&EntryEvent<K, V>) -> bool + Send + Sync + 'static,
  {
    self.filter = Some(Arc::new(filter));
    self
  }

  /// Delivers events on a background thread instead of the calling thread.
  /// Delivery may complete after the triggering operation returns.
  pub fn asynchronous(mut self) -> Self {
    self.synchronous = false;
    self
  }

  /// Omits old values from delivered events.
  pub fn without_old_values(mut self) -> Self {
    self.old_value_required = false;
    self
  }
}

/// Token identifying a listener registration, used to deregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct Registration<K, V> {
  id: ListenerId,
  listener: Arc<dyn EntryListener<K, V>>,
  kinds: Vec<EventKind>,
  filter: Option<EventFilter<K, V>>,
  synchronous: bool,
  old_value_required: bool,
}

impl<K, V> Registration<K, V> {
  fn accepts(&self, event: &EntryEvent<K, V>) -> bool {
    if !self.kinds.contains(&event.kind) {
      return false;
    }
    match &self.filter {
      Some(filter) => filter(event),
      None => true,
    }
  }

  /// Delivers one event to this registration's listener. Listener panics
  /// are recorded and swallowed; they never fail the cache operation.
  pub(crate) fn deliver(&self, event: &EntryEvent<K, V>) {
    let events = std::slice::from_ref(event);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event.kind {
      EventKind::Created => self.listener.on_created(events),
      EventKind::Updated => self.listener.on_updated(events),
      EventKind::Removed => self.listener.on_removed(events),
      EventKind::Expired => self.listener.on_expired(events),
    }));
    if outcome.is_err() {
      tracing::warn!(kind = %event.kind, "cache listener panicked during event delivery");
    }
  }
}

/// Dispatches events to registered listeners, in registration order.
///
/// The registration list is copy-on-write: dispatch snapshots it once per
/// event, so registrations added or removed during delivery take effect on
/// the next event.
pub(crate) struct EventDispatcher<K, V> {
  registrations: RwLock<Arc<Vec<Arc<Registration<K, V>>>>>,
  next_id: AtomicU64,
  notifier: Mutex<Option<Notifier<K, V>>>,
}

impl<K, V> EventDispatcher<K, V>
where
  K: Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn new() -> Self {
    Self {
      registrations: RwLock::new(Arc::new(Vec::new())),
      next_id: AtomicU64::new(0),
      notifier: Mutex::new(None),
    }
  }

  pub(crate) fn register(&self, config: ListenerConfig<K, V>) -> ListenerId {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let registration = Arc::new(Registration {
      id,
      listener: config.listener,
      kinds: config.kinds,
      filter: config.filter,
      synchronous: config.synchronous,
      old_value_required: config.old_value_required,
    });

    let mut guard = self.registrations.write();
    let mut next = (**guard).clone();
    next.push(registration);
    *guard = Arc::new(next);
    id
  }

  pub(crate) fn deregister(&self, id: ListenerId) -> bool {
    let mut guard = self.registrations.write();
    if !guard.iter().any(|registration| registration.id == id) {
      return false;
    }
    let next: Vec<_> = guard
      .iter()
      .filter(|registration| registration.id != id)
      .cloned()
      .collect();
    *guard = Arc::new(next);
    true
  }

  pub(crate) fn has_listeners(&self) -> bool {
    !self.registrations.read().is_empty()
  }

  pub(crate) fn created(&self, key: K, new_value: Arc<V>) {
    self.dispatch(EntryEvent {
      kind: EventKind::Created,
      key,
      old_value: None,
      new_value: Some(new_value),
    });
  }

  pub(crate) fn updated(&self, key: K, old_value: Arc<V>, new_value: Arc<V>) {
    self.dispatch(EntryEvent {
      kind: EventKind::Updated,
      key,
      old_value: Some(old_value),
      new_value: Some(new_value),
    });
  }

  pub(crate) fn removed(&self, key: K, old_value: Arc<V>) {
    self.dispatch(EntryEvent {
      kind: EventKind::Removed,
      key,
      old_value: Some(old_value),
      new_value: None,
    });
  }

  pub(crate) fn expired(&self, key: K, old_value: Arc<V>) {
    self.dispatch(EntryEvent {
      kind: EventKind::Expired,
      key,
      old_value: Some(old_value),
      new_value: None,
    });
  }

  fn dispatch(&self, event: EntryEvent<K, V>) {
    let snapshot = self.registrations.read().clone();
    if snapshot.is_empty() {
      return;
    }

    for registration in snapshot.iter() {
      if !registration.accepts(&event) {
        continue;
      }
      let mut delivered = event.clone();
      if !registration.old_value_required {
        delivered.old_value = None;
      }
      if registration.synchronous {
        registration.deliver(&delivered);
      } else {
        self.enqueue(registration.clone(), delivered);
      }
    }
  }

  fn enqueue(&self, registration: Arc<Registration<K, V>>, event: EntryEvent<K, V>) {
    let mut guard = self.notifier.lock();
    let notifier = guard.get_or_insert_with(Notifier::spawn);
    notifier.send(registration, event);
  }
}
