//! Client-side caching for spending-analysis results.
//!
//! Three layers:
//! - `key`: the composite (user, period, account scope) address of a result
//! - `store`: TTL-bounded, mutex-guarded, memory-only key-value store
//! - `layer`: cache-first fetch orchestration with single-flight dedup

mod key;
mod layer;
mod store;

pub use key::{AccountScope, AnalysisKey, Period};
pub use layer::AnalysisCacheLayer;
pub use store::{AnalysisCache, CacheEntry};
