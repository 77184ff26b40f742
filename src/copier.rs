//! Value isolation strategies applied at the cache's boundaries.

use crate::error::IntegrationError;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Strategy for isolating values crossing the cache boundary.
///
/// The cache applies its copier whenever a stored value is handed out: on
/// `get` and the getAnd\* returns, on iterator yields, on listener old/new
/// values and on entry-processor reads. Writes transfer ownership into the
/// store, so no copy is needed on the way in.
pub trait Copier<V>: Send + Sync {
  fn copy(&self, value: &Arc<V>) -> Result<Arc<V>, IntegrationError>;
}

/// Hands out the stored `Arc` itself: callers share the stored value.
/// This is the store-by-reference strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCopier;

impl<V: Send + Sync> Copier<V> for IdentityCopier {
  fn copy(&self, value: &Arc<V>) -> Result<Arc<V>, IntegrationError> {
    Ok(Arc::clone(value))
  }
}

/// Produces an isolated structural copy via `Clone`. This is the default
/// store-by-value strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloningCopier;

impl<V: Clone + Send + Sync> Copier<V> for CloningCopier {
  fn copy(&self, value: &Arc<V>) -> Result<Arc<V>, IntegrationError> {
    Ok(Arc::new(V::clone(value)))
  }
}

/// Produces an isolated copy by round-tripping the value through its serde
/// representation. Unlike [`CloningCopier`] this can fail at runtime; the
/// cache surfaces such failures as serialization errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializingCopier;

impl<V> Copier<V> for SerializingCopier
where
  V: Serialize + DeserializeOwned + Send + Sync,
{
  fn copy(&self, value: &Arc<V>) -> Result<Arc<V>, IntegrationError> {
    let bytes = bincode::serialize(value.as_ref())?;
    let copy: V = bincode::deserialize(&bytes)?;
    Ok(Arc::new(copy))
  }
}
