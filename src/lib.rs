// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod hub;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod snapshot;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{MergeValidationError, PipelineError, SourceError, StoreError};
pub use crate::hub::{Channel, Subscription};
pub use crate::pipeline::Pipeline;
pub use crate::snapshot::{QualityLevel, UnifiedSnapshot};
