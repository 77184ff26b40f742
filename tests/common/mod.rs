#![allow(dead_code)]

use pact_cache::{EntryEvent, EntryListener, EventKind};

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// One captured event: kind, key, old value, new value.
pub type Captured = (EventKind, String, Option<String>, Option<String>);

/// Listener that forwards every delivered event to an mpsc channel so tests
/// can assert on exact event sequences.
pub struct RecordingListener {
  sender: Sender<Captured>,
}

impl RecordingListener {
  pub fn new() -> (Arc<Self>, Receiver<Captured>) {
    let (sender, receiver) = channel();
    (Arc::new(Self { sender }), receiver)
  }

  fn capture(&self, events: &[EntryEvent<String, String>]) {
    for event in events {
      let _ = self.sender.send((
        event.kind,
        event.key.clone(),
        event.old_value.as_ref().map(|value| value.as_ref().clone()),
        event.new_value.as_ref().map(|value| value.as_ref().clone()),
      ));
    }
  }
}

impl EntryListener<String, String> for RecordingListener {
  fn on_created(&self, events: &[EntryEvent<String, String>]) {
    self.capture(events);
  }

  fn on_updated(&self, events: &[EntryEvent<String, String>]) {
    self.capture(events);
  }

  fn on_removed(&self, events: &[EntryEvent<String, String>]) {
    self.capture(events);
  }

  fn on_expired(&self, events: &[EntryEvent<String, String>]) {
    self.capture(events);
  }
}

/// Collects everything delivered so far without blocking.
pub fn drain(receiver: &Receiver<Captured>) -> Vec<Captured> {
  let mut events = Vec::new();
  while let Ok(event) = receiver.try_recv() {
    events.push(event);
  }
  events
}

/// Waits for the next event, failing the test after a generous timeout.
pub fn recv_one(receiver: &Receiver<Captured>) -> Captured {
  receiver
    .recv_timeout(Duration::from_secs(2))
    .expect("expected an event to be delivered")
}
