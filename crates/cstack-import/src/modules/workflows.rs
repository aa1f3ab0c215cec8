//! Workflows importer
//!
//! Per-stage user assignments belong to the source organization and
//! cannot carry over, so stage ACLs are cleared before creation. Content
//! type UIDs are stable across stacks, but a workflow may name a content
//! type that failed to import; those are dropped from the scope list.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct WorkflowsImporter;

/// Drop source-organization user assignments from every stage
fn clear_stage_acls(workflow: &mut Value) {
    let Some(Value::Array(stages)) = workflow.get_mut("workflow_stages") else {
        return;
    };
    for stage in stages {
        let Some(obj) = stage.as_object_mut() else {
            continue;
        };
        obj.remove("SYS_ACL");
    }
}

/// Keep only content types that actually exist in the destination stack
fn retain_imported_content_types(uid: &str, workflow: &mut Value, imported: &HashSet<String>) {
    let Some(Value::Array(scoped)) = workflow.get_mut("content_types") else {
        return;
    };
    scoped.retain(|ct| match ct.as_str() {
        Some(ct_uid) if imported.contains(ct_uid) => true,
        Some(ct_uid) => {
            warn!(
                workflow = %uid,
                content_type = %ct_uid,
                "Dropping unimported content type from workflow scope"
            );
            false
        }
        None => false,
    });
}

#[async_trait]
impl ModuleImporter for WorkflowsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Workflows
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let workflows = ctx.store.read_chunked("workflows", "workflows.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Workflows).await?;
        let imported_cts: HashSet<String> = ctx
            .mappers
            .uid_mapper(ModuleKind::ContentTypes)
            .await?
            .mappings()
            .keys()
            .cloned()
            .collect();
        let mut failures = Vec::new();

        for (source_uid, workflow) in &workflows {
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }

            let mut doc = strip_system_fields(workflow, false);
            clear_stage_acls(&mut doc);
            retain_imported_content_types(source_uid, &mut doc, &imported_cts);

            match ctx.api.create_workflow(json!({ "workflow": doc })).await {
                Ok(response) => {
                    let dest_uid =
                        response_uid(&response, "workflow").unwrap_or_else(|| source_uid.clone());
                    mapper.record(source_uid, dest_uid);
                    summary.created += 1;
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(workflow = %source_uid, error = %err, "Failed to create workflow");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Workflows import finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_acls_and_missing_content_types_removed() {
        let mut workflow = json!({
            "name": "Editorial",
            "content_types": ["blog", "ghost"],
            "workflow_stages": [
                {"name": "Draft", "SYS_ACL": {"users": ["u1"]}},
                {"name": "Review"}
            ]
        });
        clear_stage_acls(&mut workflow);
        let imported: HashSet<String> = ["blog".to_string()].into_iter().collect();
        retain_imported_content_types("wf1", &mut workflow, &imported);

        assert!(workflow["workflow_stages"][0].get("SYS_ACL").is_none());
        assert_eq!(workflow["content_types"], json!(["blog"]));
    }
}
