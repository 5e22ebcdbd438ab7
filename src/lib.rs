//! Redline: resilience and decision engine for AI-assisted code review
//!
//! Decides whether a changeset is reviewable, recovers from malformed or
//! failed review-service calls, enforces quality gates on production
//! changes, and degrades gracefully when dependent services are unhealthy.
//! Transport, persistence, and rendering live behind the narrow traits in
//! [`pipeline`] and [`audit`].

pub mod audit;
pub mod config;
pub mod fallback;
pub mod gate;
pub mod health;
pub mod pipeline;
pub mod review;
pub mod size;
pub mod validate;

pub use config::EngineConfig;
pub use pipeline::{ChangeRequest, ReviewEngine, ReviewInvoker, ReviewOutcome};
