//! Pure schema/document transforms
//!
//! Every transform here returns a new tree; nothing mutates its input.
//! That keeps suppress/restore/resolve independently testable and safe to
//! re-run after a partial failure.

pub mod resolver;
pub mod rte;
pub mod suppressor;

pub use resolver::{resolve_references, strip_entry_references, ReferenceMaps, ResolutionLog};
pub use rte::{resolve_embedded_entries, rewrite_asset_nodes, strip_embedded_entries};
pub use suppressor::{restore_schema, suppress_schema, SchemaFlags, UidReplacements};
