//! CSV export tools
//!
//! Pages stack resources (entries, taxonomies, users, teams) out of the
//! Management API and writes them as CSV files, one row per resource with
//! nested values serialized as JSON strings.

pub mod csv;
pub mod error;
pub mod exporters;

pub use error::{ExportError, ExportResult};
pub use exporters::{
    EntriesExporter, ExportOptions, TaxonomiesExporter, TeamsExporter, UsersExporter,
};
