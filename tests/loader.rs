mod common;

use common::{drain, RecordingListener};
use pact_cache::{
  Cache, CacheBuilder, CacheError, CacheLoader, EventKind, IntegrationError, ListenerConfig,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

fn key(name: &str) -> String {
  name.to_string()
}

/// Loader that answers every key with `"loaded"` and counts its calls.
struct CountingLoader {
  calls: AtomicUsize,
}

impl CountingLoader {
  fn new() -> Self {
    Self {
      calls: AtomicUsize::new(0),
    }
  }
}

impl CacheLoader<String, String> for CountingLoader {
  fn load(&self, _key: &String) -> Result<Option<String>, IntegrationError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(Some("loaded".to_string()))
  }
}

struct EmptyLoader;

impl CacheLoader<String, String> for EmptyLoader {
  fn load(&self, _key: &String) -> Result<Option<String>, IntegrationError> {
    Ok(None)
  }
}

struct FailingLoader;

impl CacheLoader<String, String> for FailingLoader {
  fn load(&self, _key: &String) -> Result<Option<String>, IntegrationError> {
    Err("source unavailable".into())
  }
}

fn read_through_cache<L: CacheLoader<String, String> + 'static>(
  loader: L,
) -> (Cache<String, String>, Receiver<common::Captured>) {
  let (listener, events) = RecordingListener::new();
  let cache = CacheBuilder::new("loader")
    .statistics_enabled(true)
    .read_through(true)
    .loader(loader)
    .add_listener(ListenerConfig::new(listener))
    .build()
    .unwrap();
  (cache, events)
}

#[test]
fn test_miss_loads_and_caches() {
  let (cache, events) = read_through_cache(CountingLoader::new());

  assert_eq!(cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()), Some("loaded"));

  let captured = drain(&events);
  assert_eq!(captured.len(), 1);
  assert_eq!(captured[0].0, EventKind::Created);

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.puts, 1, "the loaded value counts as a put");
  assert_eq!(stats.hits, 0);
}

#[test]
fn test_hit_skips_the_loader() {
  let loader = Arc::new(CountingLoader::new());
  let (listener, _events) = RecordingListener::new();
  let cache: Cache<String, String> = CacheBuilder::new("loader")
    .statistics_enabled(true)
    .read_through(true)
    .loader(SharedLoader(loader.clone()))
    .add_listener(ListenerConfig::new(listener))
    .build()
    .unwrap();

  cache.put(key("k"), "cached".to_string()).unwrap();
  assert_eq!(cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()), Some("cached"));
  assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
}

/// Wrapper so a test can keep a handle on the loader it hands to the cache.
struct SharedLoader(Arc<CountingLoader>);

impl CacheLoader<String, String> for SharedLoader {
  fn load(&self, key: &String) -> Result<Option<String>, IntegrationError> {
    self.0.load(key)
  }
}

#[test]
fn test_loader_returning_none_caches_nothing() {
  let (cache, events) = read_through_cache(EmptyLoader);

  assert_eq!(cache.get(&key("k")).unwrap(), None);
  assert!(!cache.contains_key(&key("k")).unwrap());
  assert_eq!(drain(&events).len(), 0);

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.puts, 0);
}

#[test]
fn test_loader_failure_is_surfaced_and_counts_nothing() {
  let (cache, events) = read_through_cache(FailingLoader);

  assert!(matches!(cache.get(&key("k")), Err(CacheError::Loader(_))));
  assert_eq!(drain(&events).len(), 0);

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.gets, 0, "a loader failure records no counters");
  assert_eq!(stats.puts, 0);
}

#[test]
fn test_get_all_loads_missing_keys_in_one_batch() {
  struct BatchLoader {
    batch_calls: AtomicUsize,
  }

  impl CacheLoader<String, String> for BatchLoader {
    fn load(&self, key: &String) -> Result<Option<String>, IntegrationError> {
      Ok(Some(format!("loaded-{key}")))
    }

    fn load_all(
      &self,
      keys: &[String],
    ) -> Result<ahash::HashMap<String, String>, IntegrationError> {
      self.batch_calls.fetch_add(1, Ordering::SeqCst);
      let mut loaded = ahash::HashMap::default();
      for key in keys {
        loaded.insert(key.clone(), format!("loaded-{key}"));
      }
      Ok(loaded)
    }
  }

  let loader = BatchLoader {
    batch_calls: AtomicUsize::new(0),
  };
  let (cache, events) = read_through_cache(loader);

  cache.put(key("a"), "cached".to_string()).unwrap();
  let found = cache.get_all(&[key("a"), key("b"), key("c")]).unwrap();

  assert_eq!(found.get(&key("a")).map(|v| v.as_str()), Some("cached"));
  assert_eq!(found.get(&key("b")).map(|v| v.as_str()), Some("loaded-b"));
  assert_eq!(found.get(&key("c")).map(|v| v.as_str()), Some("loaded-c"));

  // b and c are now cached.
  assert!(cache.contains_key(&key("b")).unwrap());
  assert!(cache.contains_key(&key("c")).unwrap());

  let created = drain(&events)
    .into_iter()
    .filter(|(kind, _, _, _)| *kind == EventKind::Created)
    .count();
  assert_eq!(created, 3, "the put plus two loaded installs");

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.hits, 1);
  assert_eq!(stats.misses, 2);
  assert_eq!(stats.puts, 3);
}

/// Loader that parks inside `load` until the test releases it, so a
/// concurrent write can land between the two phases of read-through.
struct BlockingLoader {
  entered: Sender<()>,
  release: Mutex<Receiver<()>>,
}

impl CacheLoader<String, String> for BlockingLoader {
  fn load(&self, _key: &String) -> Result<Option<String>, IntegrationError> {
    self.entered.send(()).expect("test is listening");
    self
      .release
      .lock()
      .expect("release receiver")
      .recv()
      .expect("test releases the loader");
    Ok(Some("loaded".to_string()))
  }
}

#[test]
fn test_concurrent_write_discards_the_loaded_value() {
  let (entered_tx, entered_rx) = channel();
  let (release_tx, release_rx) = channel();
  let loader = BlockingLoader {
    entered: entered_tx,
    release: Mutex::new(release_rx),
  };
  let (cache, events) = read_through_cache(loader);

  let reader = {
    let cache = cache.clone();
    thread::spawn(move || cache.get(&key("k")).unwrap())
  };

  // Wait until the reader is inside the loader, then win the race.
  entered_rx.recv().expect("loader entered");
  cache.put(key("k"), "B".to_string()).unwrap();
  release_tx.send(()).expect("release the loader");

  let loaded = reader.join().expect("reader thread");
  assert_eq!(
    loaded.as_deref().map(|s| s.as_str()),
    Some("loaded"),
    "the reader still gets its caller-local loaded value"
  );
  assert_eq!(
    cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()),
    Some("B"),
    "the store keeps the concurrent write"
  );

  let created: Vec<_> = drain(&events)
    .into_iter()
    .filter(|(kind, _, _, _)| *kind == EventKind::Created)
    .collect();
  assert_eq!(created.len(), 1, "no second CREATED from the discarded load");
  assert_eq!(created[0].3.as_deref(), Some("B"));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.puts, 1, "the discarded load does not count as a put");
}
