use std::error::Error as StdError;
use std::fmt;

/// Boxed error produced by user-supplied collaborators: loaders, writers,
/// entry processors and copiers.
pub type IntegrationError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// Read-through was enabled without configuring a loader.
  LoaderRequired,
  /// Write-through was enabled without configuring a writer.
  WriterRequired,
  /// `maximum_size` and `maximum_weight` cannot both be set.
  SizeAndWeightExclusive,
  /// `maximum_weight` requires a weigher.
  WeigherRequired,
  /// A maximum size or weight of zero is not allowed.
  ZeroMaximum,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::LoaderRequired => {
        write!(f, "read-through requires a cache loader")
      }
      BuildError::WriterRequired => {
        write!(f, "write-through requires a cache writer")
      }
      BuildError::SizeAndWeightExclusive => {
        write!(f, "maximum_size and maximum_weight are mutually exclusive")
      }
      BuildError::WeigherRequired => {
        write!(f, "maximum_weight requires a weigher")
      }
      BuildError::ZeroMaximum => {
        write!(f, "maximum size or weight cannot be zero")
      }
    }
  }
}

impl StdError for BuildError {}

/// Errors raised by cache operations.
#[derive(Debug)]
pub enum CacheError {
  /// The cache has been closed.
  Closed,
  /// A cache operation was attempted from inside an entry processor.
  Reentrant,
  /// The configured loader failed.
  Loader(IntegrationError),
  /// The configured writer failed.
  Writer(IntegrationError),
  /// A batch writer hook failed for some keys; the cache was only mutated
  /// for the keys that were written or deleted successfully.
  WriterBatch {
    /// The keys the writer reported as failed, Debug-formatted.
    failed_keys: Vec<String>,
    source: IntegrationError,
  },
  /// An entry processor returned an error; the slot it ran against is
  /// unchanged.
  Processor(IntegrationError),
  /// The configured copier could not produce a copy of a value.
  Serialization(IntegrationError),
}

impl fmt::Display for CacheError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheError::Closed => write!(f, "cache is closed"),
      CacheError::Reentrant => write!(
        f,
        "cache operations are not allowed from inside an entry processor"
      ),
      CacheError::Loader(source) => write!(f, "cache loader failed: {source}"),
      CacheError::Writer(source) => write!(f, "cache writer failed: {source}"),
      CacheError::WriterBatch {
        failed_keys,
        source,
      } => write!(f, "cache writer failed for keys {failed_keys:?}: {source}"),
      CacheError::Processor(source) => write!(f, "entry processor failed: {source}"),
      CacheError::Serialization(source) => write!(f, "value copy failed: {source}"),
    }
  }
}

impl StdError for CacheError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      CacheError::Closed | CacheError::Reentrant => None,
      CacheError::Loader(source)
      | CacheError::Writer(source)
      | CacheError::WriterBatch { source, .. }
      | CacheError::Processor(source)
      | CacheError::Serialization(source) => Some(source.as_ref()),
    }
  }
}
