pub mod lru_set;
pub mod pressure;
pub mod simple_cache;

pub use lru_set::ConcurrentLruSet;
pub use pressure::MemoryPressureProbe;
pub use simple_cache::{CachedRequest, SimpleCache};
