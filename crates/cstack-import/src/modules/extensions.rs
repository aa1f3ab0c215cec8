//! Extensions importer
//!
//! Extensions must exist before content types, whose field definitions
//! carry `extension_uid` pointers that the Schema Suppressor rewrites.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct ExtensionsImporter;

#[async_trait]
impl ModuleImporter for ExtensionsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Extensions
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let extensions = ctx.store.read_chunked("extensions", "extensions.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Extensions).await?;
        let mut failures = Vec::new();

        for (source_uid, extension) in &extensions {
            if let Some(dest_uid) = mapper.get(source_uid) {
                ctx.state
                    .write()
                    .await
                    .extension_uids
                    .insert(source_uid.clone(), dest_uid.to_string());
                summary.skipped += 1;
                continue;
            }

            let payload = json!({"extension": strip_system_fields(extension, false)});
            match ctx.api.create_extension(payload).await {
                Ok(response) => match response_uid(&response, "extension") {
                    Some(dest_uid) => {
                        mapper.record(source_uid, &dest_uid);
                        ctx.state
                            .write()
                            .await
                            .extension_uids
                            .insert(source_uid.clone(), dest_uid);
                        summary.created += 1;
                    }
                    None => {
                        failures.push(AuditRecord::new(
                            source_uid.clone(),
                            "extension response carried no uid",
                        ));
                        summary.failed += 1;
                    }
                },
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(extension = %source_uid, error = %err, "Failed to create extension");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Extensions import finished");
        Ok(summary)
    }
}
