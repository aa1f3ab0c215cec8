//! Marketplace apps importer
//!
//! Installs each exported app by manifest into the destination stack. The
//! new installation UID joins the extension UID map, since content type
//! fields reference app-provided extensions by installation UID.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, ModuleImporter, ModuleSummary};

pub struct MarketplaceAppsImporter;

#[async_trait]
impl ModuleImporter for MarketplaceAppsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::MarketplaceApps
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let apps = ctx
            .store
            .read_chunked("marketplace_apps", "marketplace_apps.json")
            .await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::MarketplaceApps).await?;
        let mut failures = Vec::new();

        for (source_uid, app) in &apps {
            if let Some(dest_uid) = mapper.get(source_uid) {
                ctx.state
                    .write()
                    .await
                    .extension_uids
                    .insert(source_uid.clone(), dest_uid.to_string());
                summary.skipped += 1;
                continue;
            }

            let manifest_uid = app
                .get("manifest")
                .and_then(|m| m.get("uid"))
                .and_then(Value::as_str);
            let Some(manifest_uid) = manifest_uid else {
                failures.push(AuditRecord::new(
                    source_uid.clone(),
                    "app export carries no manifest uid",
                ));
                summary.failed += 1;
                continue;
            };

            let payload = json!({
                "app_uid": manifest_uid,
                "configuration": app.get("configuration").cloned().unwrap_or(Value::Null),
            });

            match ctx.api.install_app(payload).await {
                Ok(response) => match response_uid(&response, "installation") {
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
                            "installation response carried no uid",
                        ));
                        summary.failed += 1;
                    }
                },
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(app = %manifest_uid, error = %err, "Failed to install app");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Marketplace apps import finished");
        Ok(summary)
    }
}
