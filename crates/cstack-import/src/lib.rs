//! The cstack import orchestration engine
//!
//! Replays an exported backup tree against a destination stack through the
//! Management API. The pipeline is dependency-ordered, checkpointed and
//! concurrency-controlled:
//!
//! - **Orchestrator** runs one module importer per content category in a
//!   fixed order, threading shared state (master locale, environment map,
//!   installed extensions) between them.
//! - **Transforms** (schema suppressor/restorer, reference resolver,
//!   JSON-RTE handling) are pure tree rewrites that make circular and
//!   forward references importable: constraints are stripped for the first
//!   creation pass and restored once data exists to satisfy them.
//! - **Checkpoints** (mapper files) make a re-run skip everything already
//!   imported instead of re-creating it.

pub mod modules;
pub mod orchestrator;
pub mod transform;

pub use orchestrator::{ImportOrchestrator, RunSummary};
