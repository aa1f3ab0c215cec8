//! Core types and traits for the cstack import system
//!
//! This crate provides the foundational abstractions the import engine is
//! built on:
//!
//! - **Context**: `ImportContext` carries configuration, the backup tree,
//!   the checkpoint store and the API handle into every module importer —
//!   no ambient global state anywhere in the pipeline.
//! - **Modules**: the module catalogue and its fixed dependency order.
//! - **Checkpoints**: the mapper files that make re-runs idempotent.
//! - **Batching**: the concurrency-controlled batch executor.
//! - **Errors**: unified error handling across all importers.

pub mod batch;
pub mod context;
pub mod error;
pub mod mapper;
pub mod modules;

pub use batch::{run_batched, BatchFailure, BatchReport};
pub use context::{EnvironmentTarget, ImportConfig, ImportContext, SharedState};
pub use error::{ImportError, ImportResult};
pub use mapper::{AuditRecord, MapperStore, UidMapper};
pub use modules::{ModuleKind, IMPORT_ORDER};
