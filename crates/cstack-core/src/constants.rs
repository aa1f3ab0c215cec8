//! Names and codes that form the on-disk and wire contracts
//!
//! The backup tree layout and the mapper directory are a byte-compatible
//! contract with the export side; the file names here must not drift.

/// Directory holding all checkpoint state inside a backup tree
pub const MAPPER_DIR: &str = "mapper";

/// Per-module checkpoint file: source UID -> destination UID
pub const UID_MAPPING_FILE: &str = "uid-mapping.json";

/// Assets only: source URL -> destination URL
pub const URL_MAPPING_FILE: &str = "url-mapping.json";

/// Assets only: source folder UID -> destination folder UID
pub const FOLDER_MAPPING_FILE: &str = "folder-mapping.json";

/// Append-only audit log of successful items (informational)
pub const SUCCESS_FILE: &str = "success.json";

/// Append-only audit log of failed items (informational)
pub const FAILS_FILE: &str = "fails.json";

/// Side file listing items awaiting the deferred publish phase
pub const PENDING_PUBLISH_FILE: &str = "pending-publish.json";

/// Content types only: field rules deferred to a post-entries pass
pub const FIELD_RULES_FILE: &str = "field_rules_uid.json";

/// Optional full-response cache next to uid-mapping.json
pub const DETAILS_FILE: &str = "details.json";

/// Index file of a chunked module directory (chunk number -> item count)
pub const CHUNK_INDEX_FILE: &str = "index.json";

/// Vendor error codes the import protocol depends on
pub mod error_codes {
    /// Duplicate content type UID/title
    pub const DUPLICATE_CONTENT_TYPE: u32 = 115;
    /// Duplicate entry title
    pub const DUPLICATE_ENTRY_TITLE: u32 = 119;
    /// Duplicate locale code
    pub const DUPLICATE_LOCALE: u32 = 247;
}

/// Hard ceiling on schema/document walker recursion. User-authored schemas
/// can nest groups/blocks/global fields arbitrarily; anything deeper than
/// this is recorded as a per-item failure instead of recursing further.
pub const MAX_SCHEMA_DEPTH: usize = 32;
