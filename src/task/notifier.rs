use crate::event::{EntryEvent, Registration};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};

pub(crate) type Delivery<K, V> = (Arc<Registration<K, V>>, EntryEvent<K, V>);

/// The background thread that delivers events to asynchronous listener
/// registrations. Events are delivered in send order.
pub(crate) struct Notifier<K, V> {
  _handle: JoinHandle<()>,
  sender: Sender<Delivery<K, V>>,
}

impl<K, V> Notifier<K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  /// Spawns the notifier thread. The loop ends when the owning dispatcher
  /// is dropped, which disconnects the channel.
  pub(crate) fn spawn() -> Self {
    let (sender, receiver) = unbounded::<Delivery<K, V>>();

    let handle = thread::spawn(move || {
      while let Ok((registration, event)) = receiver.recv() {
        registration.deliver(&event);
      }
    });

    Self {
      _handle: handle,
      sender,
    }
  }

  pub(crate) fn send(&self, registration: Arc<Registration<K, V>>, event: EntryEvent<K, V>) {
    let _ = self.sender.send((registration, event));
  }
}
