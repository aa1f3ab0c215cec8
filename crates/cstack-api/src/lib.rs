//! Management API adapter for the cstack migration toolkit
//!
//! The import engine only ever talks to the destination stack through the
//! [`ManagementApi`] trait, which keeps every module importer testable
//! against hand-written mocks. [`CsClient`] is the production
//! implementation: a thin `reqwest` client with stack credentials, branch
//! scoping and bounded retry/backoff for rate limits and server errors.
//!
//! Vendor error codes never leak past this crate: importers reason about
//! [`ApiOutcome`] (`AlreadyExists` / `Transient` / `Fatal`) produced by the
//! per-resource classifiers in [`error`].

pub mod api;
pub mod client;
pub mod error;

pub use api::{AssetUpload, ManagementApi, PublishRequest};
pub use client::{CsClient, CsClientConfig};
pub use error::{ApiError, ApiOutcome, ApiResult};
