pub mod clients;
pub mod duplicate;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod reconcile;
pub mod router;
pub mod scoping;
pub mod services;
pub mod session;
pub mod strategy;
pub mod throttle;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use engine::{EngineDeps, ExtractionEngine};
pub use error::{FetchError, TierError};
pub use strategy::{SourceStrategy, TierContext, TierMode, TierSpec};
