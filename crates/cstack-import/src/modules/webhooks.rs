//! Webhooks importer
//!
//! Webhooks are recreated as exported, except that `disable_webhooks`
//! forces every imported webhook into a disabled state — importing into a
//! production stack should not start firing the source stack's hooks at
//! live endpoints.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct WebhooksImporter;

#[async_trait]
impl ModuleImporter for WebhooksImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Webhooks
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let webhooks = ctx.store.read_chunked("webhooks", "webhooks.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Webhooks).await?;
        let mut failures = Vec::new();

        for (source_uid, webhook) in &webhooks {
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }

            let mut doc = strip_system_fields(webhook, false);
            if ctx.config.disable_webhooks {
                doc["disabled"] = Value::Bool(true);
            }

            match ctx.api.create_webhook(json!({ "webhook": doc })).await {
                Ok(response) => {
                    let dest_uid =
                        response_uid(&response, "webhook").unwrap_or_else(|| source_uid.clone());
                    mapper.record(source_uid, dest_uid);
                    summary.created += 1;
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(webhook = %source_uid, error = %err, "Failed to create webhook");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Webhooks import finished");
        Ok(summary)
    }
}
