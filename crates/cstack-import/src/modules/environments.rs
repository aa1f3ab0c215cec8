//! Environments importer
//!
//! Creates destination environments and publishes the source-UID ->
//! destination mapping into shared state, where the deferred publish phase
//! resolves `publish_details` environment references.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, EnvironmentTarget, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct EnvironmentsImporter;

#[async_trait]
impl ModuleImporter for EnvironmentsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Environments
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let environments = ctx
            .store
            .read_chunked("environments", "environments.json")
            .await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Environments).await?;
        let mut failures = Vec::new();

        for (source_uid, environment) in &environments {
            let name = environment
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(source_uid)
                .to_string();

            if let Some(dest_uid) = mapper.get(source_uid) {
                // Resumed run: repopulate shared state from the checkpoint
                ctx.state.write().await.environments.insert(
                    source_uid.clone(),
                    EnvironmentTarget {
                        uid: dest_uid.to_string(),
                        name: name.clone(),
                    },
                );
                summary.skipped += 1;
                continue;
            }

            let payload = json!({"environment": strip_system_fields(environment, false)});
            match ctx.api.create_environment(payload).await {
                Ok(response) => {
                    let dest_uid =
                        response_uid(&response, "environment").unwrap_or_else(|| name.clone());
                    mapper.record(source_uid, &dest_uid);
                    ctx.state.write().await.environments.insert(
                        source_uid.clone(),
                        EnvironmentTarget {
                            uid: dest_uid,
                            name: name.clone(),
                        },
                    );
                    summary.created += 1;
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(%name, error = %err, "Failed to create environment");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Environments import finished");
        Ok(summary)
    }
}
