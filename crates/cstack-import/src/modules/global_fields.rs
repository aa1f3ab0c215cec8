//! Global fields importer
//!
//! Global fields are created before any content type exists, so reference
//! fields inside them cannot be validated by the destination yet. Those
//! fields are removed from the seeded schema and the affected global field
//! UIDs are parked in a side file; the content types importer replays the
//! full schema once the referenced content types are in place.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use crate::transform::{suppress_schema, UidReplacements};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

/// Side file naming the global fields whose schemas must be replayed after
/// content types exist.
pub const PENDING_GLOBAL_FIELDS_FILE: &str = "pending_global_fields.json";

pub struct GlobalFieldsImporter;

/// Removes reference fields at every nesting level, returning whether any
/// field was dropped.
fn drop_reference_fields(schema: &mut Vec<Value>) -> bool {
    let mut dropped = false;
    schema.retain(|field| {
        let is_reference = field.get("data_type").and_then(Value::as_str) == Some("reference");
        if is_reference {
            dropped = true;
        }
        !is_reference
    });
    for field in schema.iter_mut() {
        if let Some(Value::Array(nested)) = field.get_mut("schema") {
            let mut inner: Vec<Value> = nested.drain(..).collect();
            if drop_reference_fields(&mut inner) {
                dropped = true;
            }
            *nested = inner;
        }
        if let Some(Value::Array(blocks)) = field.get_mut("blocks") {
            for block in blocks.iter_mut() {
                if let Some(Value::Array(nested)) = block.get_mut("schema") {
                    let mut inner: Vec<Value> = nested.drain(..).collect();
                    if drop_reference_fields(&mut inner) {
                        dropped = true;
                    }
                    *nested = inner;
                }
            }
        }
    }
    dropped
}

#[async_trait]
impl ModuleImporter for GlobalFieldsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::GlobalFields
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let fields = ctx
            .store
            .read_chunked("global_fields", "globalfields.json")
            .await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::GlobalFields).await?;
        let mut failures = Vec::new();
        let mut pending: Vec<String> = ctx
            .mappers
            .read_side(ModuleKind::GlobalFields, PENDING_GLOBAL_FIELDS_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let extension_uids = ctx.state.read().await.extension_uids.clone();

        for (source_uid, field) in &fields {
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }

            let mut doc = strip_system_fields(field, true);
            let replacements = UidReplacements {
                extensions: Some(&extension_uids),
                global_fields: None,
            };
            if let Some(Value::Array(schema)) = doc.get("schema") {
                let mut schema = schema.clone();
                let dropped = drop_reference_fields(&mut schema);
                let (suppressed, _) =
                    suppress_schema(&Value::Array(schema), &replacements, source_uid)?;
                doc["schema"] = suppressed;
                if dropped && !pending.iter().any(|uid| uid == source_uid) {
                    pending.push(source_uid.clone());
                }
            }

            match ctx.api.create_global_field(json!({ "global_field": doc })).await {
                Ok(response) => {
                    let dest_uid =
                        response_uid(&response, "global_field").unwrap_or_else(|| source_uid.clone());
                    mapper.record(source_uid, &dest_uid);
                    summary.created += 1;
                }
                Err(err) => match classify_generic(&err) {
                    ApiOutcome::AlreadyExists => {
                        mapper.record(source_uid, source_uid);
                        summary.skipped += 1;
                    }
                    ApiOutcome::Fatal => return Err(err.into()),
                    ApiOutcome::Transient => {
                        warn!(global_field = %source_uid, error = %err, "Failed to create global field");
                        failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                        summary.failed += 1;
                    }
                },
            }
        }

        mapper.flush().await?;
        ctx.mappers
            .write_side(
                ModuleKind::GlobalFields,
                PENDING_GLOBAL_FIELDS_FILE,
                &serde_json::to_value(&pending)?,
            )
            .await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Global fields import finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_reference_fields_at_any_depth() {
        let mut schema = vec![
            json!({"uid": "title", "data_type": "text"}),
            json!({"uid": "related", "data_type": "reference", "reference_to": ["post"]}),
            json!({"uid": "group", "data_type": "group", "schema": [
                {"uid": "inner_ref", "data_type": "reference", "reference_to": ["post"]},
                {"uid": "label", "data_type": "text"}
            ]}),
        ];
        assert!(drop_reference_fields(&mut schema));
        assert_eq!(schema.len(), 2);
        let inner = schema[1]["schema"].as_array().unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0]["uid"], "label");
    }

    #[test]
    fn reports_untouched_schema() {
        let mut schema = vec![json!({"uid": "title", "data_type": "text"})];
        assert!(!drop_reference_fields(&mut schema));
    }
}
