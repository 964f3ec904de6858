//! Limiter resolution: contexts, traversal, caching, and the public
//! registry facade.

mod context;
#[allow(clippy::module_inception)]
mod limiter;
mod provider;
mod registry;
mod tree;

pub(crate) use context::resolve_contexts;
pub use context::{FallbackPolicy, LimiterContext, SubMatcher};
pub use limiter::{Limiter, RateLimiter};
pub use provider::RateLimiterProvider;
pub use registry::{RateLimiterRegistry, RateLimiterRegistryBuilder};
pub use tree::RateLimiterTree;
