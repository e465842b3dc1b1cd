//! Object-store usage gauge
//!
//! A bounded walk over the known folders, cached locally with a TTL.

mod scanner;
mod ttl_cache;

pub use scanner::StorageScanner;
pub use ttl_cache::TtlCache;
