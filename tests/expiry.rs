mod common;

use common::{drain, RecordingListener};
use pact_cache::{
  AccessedExpiryPolicy, Cache, CacheBuilder, CreatedExpiryPolicy, EternalExpiryPolicy, EventKind,
  ExpiryDuration, ExpiryPolicy, ListenerConfig, ModifiedExpiryPolicy,
};

use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;

const TINY_TTL: Duration = Duration::from_millis(80);
const SLEEP_MARGIN: Duration = Duration::from_millis(80);

fn key(name: &str) -> String {
  name.to_string()
}

fn cache_with_policy<P: ExpiryPolicy + 'static>(
  policy: P,
) -> (Cache<String, String>, Receiver<common::Captured>) {
  let (listener, events) = RecordingListener::new();
  let cache = CacheBuilder::new("expiry")
    .statistics_enabled(true)
    .expiry_policy(policy)
    .add_listener(ListenerConfig::new(listener))
    .build()
    .unwrap();
  (cache, events)
}

#[test]
fn test_lazy_eviction_on_access() {
  let (cache, events) = cache_with_policy(CreatedExpiryPolicy::new(TINY_TTL));

  cache.put(key("k"), "v".to_string()).unwrap();
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert_eq!(cache.get(&key("k")).unwrap(), None);

  let captured = drain(&events);
  assert_eq!(captured.len(), 2, "created, then expired");
  assert_eq!(captured[0].0, EventKind::Created);
  let (kind, event_key, old_value, _) = &captured[1];
  assert_eq!(*kind, EventKind::Expired);
  assert_eq!(event_key, "k");
  assert_eq!(old_value.as_deref(), Some("v"));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.evictions, 1);
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.hits, 0);
}

#[test]
fn test_eternal_entries_survive_the_clock() {
  let (cache, _events) = cache_with_policy(EternalExpiryPolicy);

  cache.put(key("k"), "v".to_string()).unwrap();
  thread::sleep(TINY_TTL + SLEEP_MARGIN);
  assert_eq!(cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()), Some("v"));
  assert_eq!(cache.statistics().unwrap().evictions, 0);
}

#[test]
fn test_zero_duration_entry_is_never_observable() {
  let (cache, events) = cache_with_policy(CreatedExpiryPolicy::new(Duration::ZERO));

  cache.put(key("k"), "v".to_string()).unwrap();
  thread::sleep(Duration::from_millis(10));

  assert_eq!(cache.get(&key("k")).unwrap(), None);

  let captured = drain(&events);
  assert!(captured
    .iter()
    .any(|(kind, _, _, _)| *kind == EventKind::Expired));
  let stats = cache.statistics().unwrap();
  assert_eq!(stats.evictions, 1);
  assert_eq!(stats.misses, 1);
}

#[test]
fn test_put_if_absent_treats_expired_as_absent() {
  let (cache, events) = cache_with_policy(CreatedExpiryPolicy::new(TINY_TTL));

  cache.put(key("k"), "old".to_string()).unwrap();
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert!(cache.put_if_absent(key("k"), "new".to_string()).unwrap());
  assert_eq!(cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()), Some("new"));

  let captured = drain(&events);
  let kinds: Vec<EventKind> = captured.iter().map(|(kind, _, _, _)| *kind).collect();
  assert_eq!(
    kinds,
    vec![
      EventKind::Created,
      EventKind::Expired,
      EventKind::Created
    ],
    "the expired entry is evicted before the insert"
  );

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.evictions, 1);
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.puts, 2);
}

#[test]
fn test_replace_on_expired_entry_misses() {
  let (cache, events) = cache_with_policy(CreatedExpiryPolicy::new(TINY_TTL));

  cache.put(key("k"), "old".to_string()).unwrap();
  thread::sleep(TINY_TTL + SLEEP_MARGIN);

  assert!(!cache.replace(&key("k"), "new".to_string()).unwrap());
  assert_eq!(cache.contains_key(&key("k")).unwrap(), false);

  let captured = drain(&events);
  assert!(captured
    .iter()
    .any(|(kind, _, _, _)| *kind == EventKind::Expired));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.evictions, 1);
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.puts, 1, "only the original put");
}

#[test]
fn test_access_expiry_extends_lifetime() {
  let ttl = Duration::from_millis(400);
  let (cache, _events) = cache_with_policy(AccessedExpiryPolicy::new(ttl));

  cache.put(key("k"), "v".to_string()).unwrap();
  thread::sleep(Duration::from_millis(200));
  assert!(cache.get(&key("k")).unwrap().is_some(), "refreshed at +200ms");
  thread::sleep(Duration::from_millis(200));
  assert!(
    cache.get(&key("k")).unwrap().is_some(),
    "still alive because the previous read refreshed it"
  );
  thread::sleep(Duration::from_millis(600));
  assert!(cache.get(&key("k")).unwrap().is_none(), "idle past the ttl");
}

#[test]
fn test_update_with_declining_policy_preserves_expiry() {
  // CreatedExpiryPolicy declines on update, so the second put must not
  // extend the original deadline.
  let (cache, _events) = cache_with_policy(CreatedExpiryPolicy::new(Duration::from_millis(300)));

  cache.put(key("k"), "one".to_string()).unwrap();
  thread::sleep(Duration::from_millis(150));
  cache.put(key("k"), "two".to_string()).unwrap();
  thread::sleep(Duration::from_millis(300));

  assert_eq!(
    cache.get(&key("k")).unwrap(),
    None,
    "the update kept the creation deadline"
  );
}

#[test]
fn test_modified_policy_resets_on_update() {
  let (cache, _events) = cache_with_policy(ModifiedExpiryPolicy::new(Duration::from_millis(200)));

  cache.put(key("k"), "one".to_string()).unwrap();
  thread::sleep(Duration::from_millis(120));
  cache.put(key("k"), "two".to_string()).unwrap();
  thread::sleep(Duration::from_millis(120));

  assert_eq!(
    cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()),
    Some("two"),
    "the update reset the deadline"
  );
}

#[test]
fn test_unchanged_sentinel_is_not_zero() {
  // A policy returning None must leave expiry untouched, not coerce it to
  // an immediate expiration.
  struct CreateEternalThenDecline;

  impl ExpiryPolicy for CreateEternalThenDecline {
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

  let (cache, _events) = cache_with_policy(CreateEternalThenDecline);
  cache.put(key("k"), "one".to_string()).unwrap();
  cache.put(key("k"), "two".to_string()).unwrap();
  thread::sleep(Duration::from_millis(20));
  assert_eq!(cache.get(&key("k")).unwrap().as_deref().map(|s| s.as_str()), Some("two"));
}
