//! Response caching: named versioned caches, per-request strategies, and the
//! install/activate lifecycle.

pub mod lifecycle;
pub mod router;
pub mod set;

pub use lifecycle::{LifecycleManager, LifecyclePhase};
pub use router::{Strategy, StrategyRouter};
pub use set::{CacheNames, CacheRole, CacheSet};
