pub mod config;
pub mod error;
pub mod types;

pub use config::{EngineConfig, PlatformSettings, PlausibilityCeilings};
pub use error::{ConfigError, ExtractionFailure, FailureReason, TargetError};
pub use types::*;
