use pact_cache::{Cache, CacheBuilder, CacheError};

use std::sync::Arc;

fn new_cache() -> Cache<String, i32> {
  CacheBuilder::new("basic")
    .statistics_enabled(true)
    .build()
    .unwrap()
}

fn key(name: &str) -> String {
  name.to_string()
}

#[test]
fn test_put_and_get_round_trip() {
  let cache = new_cache();
  cache.put(key("a"), 10).unwrap();

  assert_eq!(cache.get(&key("a")).unwrap().as_deref(), Some(&10));
  assert_eq!(cache.get(&key("missing")).unwrap(), None);

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.hits, 1);
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.puts, 1);
}

#[test]
fn test_second_put_counts_as_another_put() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();
  cache.put(key("a"), 1).unwrap();

  assert_eq!(cache.statistics().unwrap().puts, 2);
  assert_eq!(cache.get(&key("a")).unwrap().as_deref(), Some(&1));
}

#[test]
fn test_contains_key_records_no_reads() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();

  assert!(cache.contains_key(&key("a")).unwrap());
  assert!(!cache.contains_key(&key("b")).unwrap());

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.gets, 0, "contains_key must not count hits or misses");
}

#[test]
fn test_remove() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();

  assert!(cache.remove(&key("a")).unwrap());
  assert!(!cache.remove(&key("a")).unwrap(), "second remove misses");
  assert_eq!(cache.get(&key("a")).unwrap(), None);

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.removals, 1);
}

#[test]
fn test_get_and_put() {
  let cache = new_cache();

  assert_eq!(cache.get_and_put(key("a"), 1).unwrap(), None);
  assert_eq!(cache.get_and_put(key("a"), 2).unwrap().as_deref(), Some(&1));
  assert_eq!(cache.get(&key("a")).unwrap().as_deref(), Some(&2));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.puts, 2);
  assert_eq!(stats.misses, 1, "creating get_and_put counts a miss");
  assert_eq!(stats.hits, 2, "updating get_and_put counts a hit, plus the get");
}

#[test]
fn test_put_if_absent() {
  let cache = new_cache();

  assert!(cache.put_if_absent(key("a"), 1).unwrap());
  assert!(!cache.put_if_absent(key("a"), 2).unwrap());
  assert_eq!(cache.get(&key("a")).unwrap().as_deref(), Some(&1));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.puts, 1);
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.hits, 2, "present put_if_absent counts a hit, plus the get");
}

#[test]
fn test_remove_if_equals() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();

  assert!(!cache.remove_if_equals(&key("a"), &2).unwrap(), "mismatch");
  assert!(cache.contains_key(&key("a")).unwrap());
  assert!(cache.remove_if_equals(&key("a"), &1).unwrap());
  assert!(!cache.remove_if_equals(&key("a"), &1).unwrap(), "missing");

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.removals, 1);
  assert_eq!(stats.hits, 1);
  assert_eq!(stats.misses, 2, "mismatch and missing both count misses");
}

#[test]
fn test_get_and_remove() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();

  assert_eq!(cache.get_and_remove(&key("a")).unwrap().as_deref(), Some(&1));
  assert_eq!(cache.get_and_remove(&key("a")).unwrap(), None);

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.removals, 1);
  assert_eq!(stats.hits, 1);
  assert_eq!(stats.misses, 1);
}

#[test]
fn test_replace_family() {
  let cache = new_cache();

  assert!(!cache.replace(&key("a"), 1).unwrap(), "nothing to replace");
  cache.put(key("a"), 1).unwrap();
  assert!(cache.replace(&key("a"), 2).unwrap());

  assert!(!cache.replace_if_equals(&key("a"), &1, 3).unwrap(), "mismatch");
  assert!(cache.replace_if_equals(&key("a"), &2, 3).unwrap());

  assert_eq!(cache.get_and_replace(&key("a"), 4).unwrap().as_deref(), Some(&3));
  assert_eq!(cache.get_and_replace(&key("missing"), 9).unwrap(), None);
  assert_eq!(cache.get(&key("a")).unwrap().as_deref(), Some(&4));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.puts, 4, "one put plus three successful replacements");
}

#[test]
fn test_get_all_returns_only_present_keys() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();
  cache.put(key("b"), 2).unwrap();

  let found = cache
    .get_all(&[key("a"), key("b"), key("c")])
    .unwrap();
  assert_eq!(found.len(), 2);
  assert_eq!(found.get(&key("a")).map(|v| **v), Some(1));
  assert_eq!(found.get(&key("b")).map(|v| **v), Some(2));

  let stats = cache.statistics().unwrap();
  assert_eq!(stats.hits, 2);
  assert_eq!(stats.misses, 1);
}

#[test]
fn test_remove_all_with_keys() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();
  cache.put(key("b"), 2).unwrap();
  cache.put(key("c"), 3).unwrap();

  cache.remove_all(&[key("a"), key("b"), key("x")]).unwrap();
  assert!(!cache.contains_key(&key("a")).unwrap());
  assert!(!cache.contains_key(&key("b")).unwrap());
  assert!(cache.contains_key(&key("c")).unwrap());
  assert_eq!(cache.statistics().unwrap().removals, 2);
}

#[test]
fn test_remove_all_entries() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();
  cache.put(key("b"), 2).unwrap();

  cache.remove_all_entries().unwrap();
  assert_eq!(cache.get(&key("a")).unwrap(), None);
  assert_eq!(cache.get(&key("b")).unwrap(), None);
  assert_eq!(cache.statistics().unwrap().removals, 2);
}

#[test]
fn test_clear_counts_nothing() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();
  cache.clear().unwrap();

  assert_eq!(cache.get(&key("a")).unwrap(), None);
  let stats = cache.statistics().unwrap();
  assert_eq!(stats.removals, 0, "clear is not a removal");
  assert_eq!(stats.evictions, 0, "clear is not an eviction");
}

#[test]
fn test_close_rejects_every_operation() {
  let cache = new_cache();
  cache.put(key("a"), 1).unwrap();

  assert!(!cache.is_closed());
  cache.close();
  assert!(cache.is_closed());
  cache.close(); // closing twice is fine

  assert!(matches!(cache.get(&key("a")), Err(CacheError::Closed)));
  assert!(matches!(cache.put(key("b"), 2), Err(CacheError::Closed)));
  assert!(matches!(cache.remove(&key("a")), Err(CacheError::Closed)));
  assert!(matches!(cache.clear(), Err(CacheError::Closed)));
  assert!(matches!(
    cache.invoke(&key("a"), |_| Ok(())),
    Err(CacheError::Closed)
  ));
}

#[test]
fn test_handles_share_one_cache() {
  let cache = new_cache();
  let other = cache.clone();
  other.put(key("a"), 1).unwrap();
  assert_eq!(cache.get(&key("a")).unwrap().as_deref(), Some(&1));
  assert_eq!(cache.name(), "basic");
}

#[test]
fn test_store_by_reference_aliases_values() {
  let by_ref: Cache<String, String> = CacheBuilder::new("by-ref")
    .store_by_value(false)
    .build()
    .unwrap();
  by_ref.put(key("a"), "value".to_string()).unwrap();
  let first = by_ref.get(&key("a")).unwrap().unwrap();
  let second = by_ref.get(&key("a")).unwrap().unwrap();
  assert!(Arc::ptr_eq(&first, &second), "identity copier shares the Arc");

  let by_value: Cache<String, String> = CacheBuilder::new("by-value").build().unwrap();
  by_value.put(key("a"), "value".to_string()).unwrap();
  let first = by_value.get(&key("a")).unwrap().unwrap();
  let second = by_value.get(&key("a")).unwrap().unwrap();
  assert!(!Arc::ptr_eq(&first, &second), "cloning copier isolates reads");
  assert_eq!(*first, *second);
}
