//! Labels importer
//!
//! Labels form a shallow tree via `parent[]`. Parentless labels are
//! created first so child labels can have their parent UIDs remapped in
//! the same pass.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind, UidMapper};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct LabelsImporter;

fn has_parent(label: &Value) -> bool {
    label
        .get("parent")
        .and_then(Value::as_array)
        .map(|p| !p.is_empty())
        .unwrap_or(false)
}

/// Rewrite `parent[]` through the mapper; unmapped parents are dropped
/// rather than sent as dangling UIDs
fn remap_parents(label: &mut Value, mapper: &UidMapper) {
    let Some(Value::Array(parents)) = label.get_mut("parent") else {
        return;
    };
    let remapped: Vec<Value> = parents
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|p| mapper.get(p))
        .map(|p| Value::String(p.to_string()))
        .collect();
    *parents = remapped;
}

impl LabelsImporter {
    async fn create_one(
        &self,
        ctx: &ImportContext,
        source_uid: &str,
        label: &Value,
        mapper: &mut UidMapper,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let mut doc = strip_system_fields(label, false);
        remap_parents(&mut doc, mapper);

        match ctx.api.create_label(json!({ "label": doc })).await {
            Ok(response) => {
                let dest_uid =
                    response_uid(&response, "label").unwrap_or_else(|| source_uid.to_string());
                mapper.record(source_uid, dest_uid);
                summary.created += 1;
            }
            Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
            Err(err) => {
                warn!(label = %source_uid, error = %err, "Failed to create label");
                failures.push(AuditRecord::new(source_uid, err.to_string()));
                summary.failed += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ModuleImporter for LabelsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Labels
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let labels = ctx.store.read_chunked("labels", "labels.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Labels).await?;
        let mut failures = Vec::new();

        let (roots, children): (Vec<_>, Vec<_>) =
            labels.iter().partition(|(_, label)| !has_parent(label));

        for (source_uid, label) in roots.into_iter().chain(children) {
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }
            self.create_one(ctx, source_uid, label, &mut mapper, &mut summary, &mut failures)
                .await?;
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Labels import finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_parent() {
        assert!(has_parent(&json!({"parent": ["lbl1"]})));
        assert!(!has_parent(&json!({"parent": []})));
        assert!(!has_parent(&json!({"name": "tag"})));
    }
}
