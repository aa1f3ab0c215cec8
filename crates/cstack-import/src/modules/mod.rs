//! Module importers
//!
//! One importer per content category. Every importer follows the same
//! shape: read source JSON from the backup tree, filter out items already
//! recorded in the Checkpoint Store, transform, call the Management API
//! through the batch executor, then record results. Transient per-item
//! failures land in `fails.json` and never abort the module.

use async_trait::async_trait;
use serde_json::Value;

use cstack_import_types::{ImportContext, ImportResult, ModuleKind};

pub mod assets;
pub mod content_types;
pub mod custom_roles;
pub mod entries;
pub mod environments;
pub mod extensions;
pub mod global_fields;
pub mod labels;
pub mod locales;
pub mod marketplace_apps;
pub mod personalize;
pub mod publish;
pub mod releases;
pub mod webhooks;
pub mod workflows;

pub use assets::AssetsImporter;
pub use content_types::ContentTypesImporter;
pub use custom_roles::CustomRolesImporter;
pub use entries::EntriesImporter;
pub use environments::EnvironmentsImporter;
pub use extensions::ExtensionsImporter;
pub use global_fields::GlobalFieldsImporter;
pub use labels::LabelsImporter;
pub use locales::LocalesImporter;
pub use marketplace_apps::MarketplaceAppsImporter;
pub use personalize::PersonalizeImporter;
pub use publish::PublishImporter;
pub use releases::ReleasesImporter;
pub use webhooks::WebhooksImporter;
pub use workflows::WorkflowsImporter;

/// Per-module outcome counts for the final run summary
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ModuleSummary {
    pub fn merge(&mut self, other: ModuleSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created {}, updated {}, skipped {}, failed {}",
            self.created, self.updated, self.skipped, self.failed
        )
    }
}

/// One importable content category's import logic
#[async_trait]
pub trait ModuleImporter: Send + Sync {
    fn kind(&self) -> ModuleKind;

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary>;
}

/// Pull the created resource's UID out of an API response, whether the
/// response wraps it (`{"entry": {"uid": ...}}`) or not.
pub(crate) fn response_uid(response: &Value, wrapper: &str) -> Option<String> {
    response
        .get(wrapper)
        .and_then(|inner| inner.get("uid"))
        .or_else(|| response.get("uid"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Drop server-managed bookkeeping keys before sending a document to the
/// destination stack.
pub(crate) fn strip_system_fields(doc: &Value, keep_uid: bool) -> Value {
    const SYSTEM_KEYS: [&str; 8] = [
        "created_at",
        "updated_at",
        "created_by",
        "updated_by",
        "_version",
        "_in_progress",
        "ACL",
        "SYS_ACL",
    ];
    let mut out = doc.clone();
    if let Some(obj) = out.as_object_mut() {
        for key in SYSTEM_KEYS {
            obj.remove(key);
        }
        if !keep_uid {
            obj.remove("uid");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_uid_wrapped_and_flat() {
        assert_eq!(
            response_uid(&json!({"entry": {"uid": "blt1"}}), "entry"),
            Some("blt1".to_string())
        );
        assert_eq!(
            response_uid(&json!({"uid": "blt2"}), "entry"),
            Some("blt2".to_string())
        );
        assert_eq!(response_uid(&json!({"notice": "ok"}), "entry"), None);
    }

    #[test]
    fn test_strip_system_fields() {
        let doc = json!({
            "uid": "blt1", "title": "t", "created_at": "x", "_version": 3
        });
        let stripped = strip_system_fields(&doc, false);
        assert!(stripped.get("uid").is_none());
        assert!(stripped.get("created_at").is_none());
        assert_eq!(stripped["title"], "t");

        let kept = strip_system_fields(&doc, true);
        assert_eq!(kept["uid"], "blt1");
    }
}
