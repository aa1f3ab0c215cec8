//! Personalize importer
//!
//! Creates the exported personalize project against the destination
//! organization and recreates its variant groups. The new project UID is
//! threaded through shared state so variant-carrying entries can point at
//! it.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct PersonalizeImporter;

#[async_trait]
impl ModuleImporter for PersonalizeImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Personalize
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Personalize).await?;
        let mut failures = Vec::new();

        let Some(project) = ctx
            .store
            .read_json_opt::<Value>("personalize/project.json")
            .await?
        else {
            info!("No personalize project in backup, skipping");
            return Ok(summary);
        };
        let source_uid = project
            .get("uid")
            .and_then(Value::as_str)
            .unwrap_or("project")
            .to_string();

        let project_uid = match mapper.get(&source_uid) {
            Some(existing) => {
                summary.skipped += 1;
                existing.to_string()
            }
            None => {
                let doc = strip_system_fields(&project, false);
                let response = ctx.api.create_personalize_project(doc).await?;
                let dest_uid = response_uid(&response, "project").ok_or_else(|| {
                    cstack_import_types::ImportError::Internal(
                        "personalize project response carried no uid".to_string(),
                    )
                })?;
                mapper.record(&source_uid, &dest_uid);
                summary.created += 1;
                dest_uid
            }
        };
        ctx.state.write().await.personalize_project_uid = Some(project_uid.clone());

        let variant_groups: Vec<Value> = ctx
            .store
            .read_json_opt("personalize/variant_groups.json")
            .await?
            .unwrap_or_default();
        for group in &variant_groups {
            let group_uid = group
                .get("uid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if mapper.has_imported(&group_uid) {
                summary.skipped += 1;
                continue;
            }

            let doc = strip_system_fields(group, false);
            match ctx.api.create_variant_group(&project_uid, doc).await {
                Ok(response) => {
                    let dest_uid = response_uid(&response, "variant_group")
                        .unwrap_or_else(|| group_uid.clone());
                    mapper.record(&group_uid, dest_uid);
                    summary.created += 1;
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(variant_group = %group_uid, error = %err, "Failed to create variant group");
                    failures.push(AuditRecord::new(group_uid, err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Personalize import finished");
        Ok(summary)
    }
}
