//! Locales importer
//!
//! Runs first: discovers the destination master locale (needed by every
//! per-locale loop later) and creates the non-master locales from the
//! backup tree. Duplicate locale codes (vendor error 247) are treated as
//! already present.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cstack_api::error::{classify_locale, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, ModuleImporter, ModuleSummary};

pub struct LocalesImporter;

#[async_trait]
impl ModuleImporter for LocalesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Locales
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();

        // Destination master locale wins; the source master file is only a
        // fallback when the stack response doesn't carry one.
        let stack = ctx.api.fetch_stack().await?;
        let dest_master = stack
            .get("stack")
            .and_then(|s| s.get("master_locale"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let source_master: Option<String> = ctx
            .store
            .read_json_opt::<Value>("locales/master-locale.json")
            .await?
            .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string));

        let master = dest_master
            .or(source_master)
            .unwrap_or_else(|| "en-us".to_string());
        info!(master = %master, "Resolved master locale");
        ctx.state.write().await.master_locale = master.clone();

        let locales = ctx.store.read_chunked("locales", "locales.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Locales).await?;
        let mut failures = Vec::new();

        for (source_uid, locale) in &locales {
            let code = locale
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(source_uid)
                .to_string();

            if code == master {
                debug!(%code, "Skipping master locale");
                summary.skipped += 1;
                continue;
            }
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }

            // The create endpoint only takes the code; name and fallback
            // are applied with a follow-up update.
            let details = json!({
                "locale": {
                    "name": locale.get("name").cloned().unwrap_or(Value::Null),
                    "fallback_locale": locale.get("fallback_locale").cloned().unwrap_or(Value::Null),
                }
            });

            match ctx.api.create_locale(json!({"locale": {"code": code}})).await {
                Ok(response) => {
                    let dest = response_uid(&response, "locale").unwrap_or_else(|| code.clone());
                    if let Err(err) = ctx.api.update_locale(&code, details).await {
                        warn!(%code, error = %err, "Created locale but failed to apply details");
                    }
                    mapper.record(source_uid, dest);
                    summary.created += 1;
                }
                Err(err) if classify_locale(&err) == ApiOutcome::AlreadyExists => {
                    debug!(%code, "Locale already exists, updating details");
                    if let Err(err) = ctx.api.update_locale(&code, details).await {
                        warn!(%code, error = %err, "Failed to update existing locale");
                    }
                    mapper.record(source_uid, code.clone());
                    summary.created += 1;
                }
                Err(err) if classify_locale(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(%code, error = %err, "Failed to create locale");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Locales import finished");
        Ok(summary)
    }
}
