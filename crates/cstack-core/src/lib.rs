//! Shared foundations for the cstack migration toolkit
//!
//! This crate provides the pieces every other cstack crate leans on:
//!
//! - **Errors**: the common `CoreError` type used by file and data plumbing
//! - **File store**: the async adapter over the on-disk backup tree,
//!   including the chunked (index + numbered chunk files) JSON layout
//! - **Constants**: module names, file names and vendor error codes that
//!   form the on-disk and wire contracts

pub mod constants;
pub mod error;
pub mod file_store;

pub use error::{CoreError, CoreResult};
pub use file_store::FileStore;
