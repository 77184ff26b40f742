//! An in-process key/value cache with contract semantics: lazy per-entry
//! expiration, by-value boundaries, entry events, statistics, read-through
//! loading, write-through persistence and atomic entry processors, all on
//! top of a sharded concurrent store.
//!
//! Every mutation follows the same discipline: validate, write through (if
//! configured), decide the state transition inside a single-key atomic
//! compute, then run the side effects (events, statistics, copies) outside
//! of it.
//!
//! ```
//! use pact_cache::CacheBuilder;
//!
//! let cache = CacheBuilder::<String, u32>::new("sessions").build().unwrap();
//! cache.put("alice".to_string(), 7).unwrap();
//! assert_eq!(cache.get(&"alice".to_string()).unwrap().as_deref(), Some(&7));
//! ```

pub mod builder;
pub mod copier;
pub mod error;
pub mod event;
pub mod expiry;
pub mod integration;
pub mod iter;

mod cache;
mod entry;
mod processor;
mod shared;
mod stats;
mod store;
mod task;
mod time;

pub use builder::CacheBuilder;
pub use cache::Cache;
pub use copier::{CloningCopier, Copier, IdentityCopier, SerializingCopier};
pub use error::{BuildError, CacheError, IntegrationError};
pub use event::{EntryEvent, EntryListener, EventFilter, EventKind, ListenerConfig, ListenerId};
pub use expiry::{
  AccessedExpiryPolicy, CreatedExpiryPolicy, EternalExpiryPolicy, ExpiryDuration, ExpiryPolicy,
  ModifiedExpiryPolicy, TouchedExpiryPolicy,
};
pub use integration::{CacheLoader, CacheWriter, CompletionListener};
pub use iter::CacheIter;
pub use processor::MutableEntry;
pub use stats::StatsSnapshot;
