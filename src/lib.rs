//! A resource-aware job queueing and scheduling engine.
//!
//! The crate's core is [`engine::Engine`]: the job lifecycle state machine,
//! the per-queue scheduling/admission policy, and the counted-resource
//! lock/waitlist manager described module-by-module below. Client protocol,
//! wire serialization of job payloads, config file/env loading, and
//! telemetry aggregation are all treated as external collaborators and live
//! outside this crate.

pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod job;
pub mod queue;
pub mod resource;
pub mod store;
pub mod view;
pub mod worker;

pub use engine::{CompleteOptions, Engine, PutOptions, RetryOptions};
pub use error::{EngineError, EngineResult};
pub use view::JobView;
