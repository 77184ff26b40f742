use crate::cache::Cache;
use crate::copier::{CloningCopier, Copier, IdentityCopier};
use crate::error::BuildError;
use crate::event::{EventDispatcher, ListenerConfig};
use crate::expiry::{EternalExpiryPolicy, ExpiryCalculator, ExpiryPolicy};
use crate::integration::{CacheLoader, CacheWriter};
use crate::shared::CacheShared;
use crate::stats::Stats;
use crate::store::{ShardedStore, Weigher};

use core::fmt;
use std::hash::Hash;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A builder for [`Cache`] instances, covering every configuration option
/// of the caching contract.
pub struct CacheBuilder<K, V> {
  name: String,
  shards: usize,
  store_by_value: bool,
  copier: Option<Arc<dyn Copier<V>>>,
  expiry_policy: Arc<dyn ExpiryPolicy>,
  statistics_enabled: bool,
  read_through: bool,
  loader: Option<Arc<dyn CacheLoader<K, V>>>,
  write_through: bool,
  writer: Option<Arc<dyn CacheWriter<K, V>>>,
  maximum_size: Option<u64>,
  maximum_weight: Option<u64>,
  weigher: Option<Weigher<K, V>>,
  listeners: Vec<ListenerConfig<K, V>>,
}

impl<K, V> fmt::Debug for CacheBuilder<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("shards", &self.shards)
      .field("store_by_value", &self.store_by_value)
      .field("statistics_enabled", &self.statistics_enabled)
      .field("read_through", &self.read_through)
      .field("write_through", &self.write_through)
      .field("maximum_size", &self.maximum_size)
      .field("maximum_weight", &self.maximum_weight)
      .field("listeners", &self.listeners.len())
      .finish_non_exhaustive()
  }
}

impl<K, V> CacheBuilder<K, V> {
  /// Creates a builder with default settings: store-by-value, eternal
  /// expiry, statistics disabled, no loader, writer or listeners, and no
  /// size or weight bound.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      store_by_value: true,
      copier: None,
      expiry_policy: Arc::new(EternalExpiryPolicy),
      statistics_enabled: false,
      read_through: false,
      loader: None,
      write_through: false,
      writer: None,
      maximum_size: None,
      maximum_weight: None,
      weigher: None,
      listeners: Vec::new(),
    }
  }

  /// Sets the number of store shards; rounded up to a power of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Store-by-value (the default) copies values at every boundary;
  /// store-by-reference hands out the stored `Arc` itself.
  pub fn store_by_value(mut self, store_by_value: bool) -> Self {
    self.store_by_value = store_by_value;
    self
  }

  /// Overrides the copier chosen by [`CacheBuilder::store_by_value`].
  pub fn copier<C>(mut self, copier: C) -> Self
  where
    C: Copier<V> + 'static,
  {
    self.copier = Some(Arc::new(copier));
    self
  }

  /// Sets the expiry policy. Defaults to [`EternalExpiryPolicy`].
  pub fn expiry_policy<P>(mut self, policy: P) -> Self
  where
    P: ExpiryPolicy + 'static,
  {
    self.expiry_policy = Arc::new(policy);
    self
  }

  /// Enables statistics collection. Disabled statistics allocate no
  /// counters and skip every recording site.
  pub fn statistics_enabled(mut self, enabled: bool) -> Self {
    self.statistics_enabled = enabled;
    self
  }

  /// Enables read-through. A loader must also be configured.
  pub fn read_through(mut self, read_through: bool) -> Self {
    self.read_through = read_through;
    self
  }

  /// Sets the loader consulted on misses when read-through is enabled.
  pub fn loader<L>(mut self, loader: L) -> Self
  where
    L: CacheLoader<K, V> + 'static,
  {
    self.loader = Some(Arc::new(loader));
    self
  }

  /// Enables write-through. A writer must also be configured.
  pub fn write_through(mut self, write_through: bool) -> Self {
    self.write_through = write_through;
    self
  }

  /// Sets the writer invoked before every mutation when write-through is
  /// enabled.
  pub fn writer<W>(mut self, writer: W) -> Self
  where
    W: CacheWriter<K, V> + 'static,
  {
    self.writer = Some(Arc::new(writer));
    self
  }

  /// Bounds the cache by entry count. Mutually exclusive with
  /// [`CacheBuilder::maximum_weight`].
  pub fn maximum_size(mut self, maximum_size: u64) -> Self {
    self.maximum_size = Some(maximum_size);
    self
  }

  /// Bounds the cache by total weight; requires a weigher.
  pub fn maximum_weight(mut self, maximum_weight: u64) -> Self {
    self.maximum_weight = Some(maximum_weight);
    self
  }

  /// Sets the function that weighs entries for a weight-bounded cache.
  pub fn weigher<F>(mut self, weigher: F) -> Self
  where
    F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
  {
    self.weigher = Some(Arc::new(weigher));
    self
  }

  /// Adds a listener registration present from construction on.
  pub fn add_listener(mut self, config: ListenerConfig<K, V>) -> Self {
    self.listeners.push(config);
    self
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.read_through && self.loader.is_none() {
      return Err(BuildError::LoaderRequired);
    }
    if self.write_through && self.writer.is_none() {
      return Err(BuildError::WriterRequired);
    }
    if self.maximum_size.is_some() && self.maximum_weight.is_some() {
      return Err(BuildError::SizeAndWeightExclusive);
    }
    if self.maximum_size == Some(0) || self.maximum_weight == Some(0) {
      return Err(BuildError::ZeroMaximum);
    }
    if self.maximum_weight.is_some() && self.weigher.is_none() {
      return Err(BuildError::WeigherRequired);
    }
    Ok(())
  }

  /// Validates the configuration and builds the cache.
  pub fn build(self) -> Result<Cache<K, V>, BuildError>
  where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
  {
    self.validate()?;

    let copier: Arc<dyn Copier<V>> = match self.copier {
      Some(copier) => copier,
      None if self.store_by_value => Arc::new(CloningCopier),
      None => Arc::new(IdentityCopier),
    };

    let store = ShardedStore::new(
      self.shards,
      self.maximum_size,
      self.maximum_weight,
      self.weigher,
    );
    let stats = self.statistics_enabled.then(|| Arc::new(Stats::new()));

    let dispatcher = EventDispatcher::new();
    for config in self.listeners {
      dispatcher.register(config);
    }

    let loader = if self.read_through { self.loader } else { None };
    let writer = if self.write_through { self.writer } else { None };

    Ok(Cache {
      shared: Arc::new(CacheShared {
        name: self.name,
        store,
        copier,
        expiry: ExpiryCalculator::new(self.expiry_policy),
        stats,
        dispatcher,
        loader,
        writer,
        closed: AtomicBool::new(false),
      }),
    })
  }
}
