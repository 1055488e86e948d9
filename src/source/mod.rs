//! Where raw food records come from
//!
//! Records are either loaded from a cached snapshot or fetched page by page
//! from the upstream API. The pipeline only sees the resulting sequence.

pub mod cache;
pub mod fetcher;

use crate::error::{CacheError, FetchError};
use serde_json::Value;

pub use cache::{read_records, JsonFileCache};
pub use fetcher::{FdcClient, Fetcher, PageSource};

/// Produces the full raw record sequence
pub trait RecordSource {
    fn fetch(&self) -> Result<Vec<Value>, FetchError>;
}

/// Persists the raw record sequence between runs
pub trait RecordCache {
    /// The cached records, or None when there is no usable cache
    fn load_cached(&self) -> Result<Option<Vec<Value>>, CacheError>;

    /// Replace the cache with `records`, stored verbatim
    fn store_cache(&self, records: &[Value]) -> Result<(), CacheError>;
}
