//! Import orchestrator
//!
//! Runs the module importers in their fixed dependency order, threading
//! shared state between them through the `ImportContext`. A single-module
//! run first rehydrates the shared state earlier modules would normally
//! have produced (master locale, environment map, extension map) from the
//! stack and the checkpoint files, so e.g. `--module entries` works
//! against a previously imported stack.

use serde_json::Value;
use tracing::{error, info};

use cstack_import_types::{
    EnvironmentTarget, ImportContext, ImportError, ImportResult, ModuleKind, IMPORT_ORDER,
};

use crate::modules::{
    AssetsImporter, ContentTypesImporter, CustomRolesImporter, EntriesImporter,
    EnvironmentsImporter, ExtensionsImporter, GlobalFieldsImporter, LabelsImporter,
    LocalesImporter, MarketplaceAppsImporter, ModuleImporter, ModuleSummary, PersonalizeImporter,
    PublishImporter, ReleasesImporter, WebhooksImporter, WorkflowsImporter,
};

/// Outcome of one whole import run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub modules: Vec<(ModuleKind, ModuleSummary)>,
}

impl RunSummary {
    pub fn totals(&self) -> ModuleSummary {
        let mut total = ModuleSummary::default();
        for (_, summary) in &self.modules {
            total.merge(*summary);
        }
        total
    }

    pub fn has_failures(&self) -> bool {
        self.modules.iter().any(|(_, s)| s.failed > 0)
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (kind, summary) in &self.modules {
            writeln!(f, "{:<18} {}", kind.to_string(), summary)?;
        }
        write!(f, "{:<18} {}", "total", self.totals())
    }
}

fn importer_for(kind: ModuleKind) -> Box<dyn ModuleImporter> {
    match kind {
        ModuleKind::Locales => Box::new(LocalesImporter),
        ModuleKind::Environments => Box::new(EnvironmentsImporter),
        ModuleKind::Extensions => Box::new(ExtensionsImporter),
        ModuleKind::MarketplaceApps => Box::new(MarketplaceAppsImporter),
        ModuleKind::GlobalFields => Box::new(GlobalFieldsImporter),
        ModuleKind::ContentTypes => Box::new(ContentTypesImporter),
        ModuleKind::Workflows => Box::new(WorkflowsImporter),
        ModuleKind::Assets => Box::new(AssetsImporter),
        ModuleKind::Entries => Box::new(EntriesImporter),
        ModuleKind::Labels => Box::new(LabelsImporter),
        ModuleKind::CustomRoles => Box::new(CustomRolesImporter),
        ModuleKind::Webhooks => Box::new(WebhooksImporter),
        ModuleKind::Personalize => Box::new(PersonalizeImporter),
        ModuleKind::Releases => Box::new(ReleasesImporter),
        ModuleKind::Publish => Box::new(PublishImporter),
    }
}

pub struct ImportOrchestrator {
    ctx: ImportContext,
}

impl ImportOrchestrator {
    pub fn new(ctx: ImportContext) -> Self {
        Self { ctx }
    }

    /// Rehydrate shared state from the destination stack and the
    /// checkpoint files. Full runs produce this state module by module;
    /// single-module runs need it up front.
    async fn prepare_shared_state(&self) -> ImportResult<()> {
        let stack = self.ctx.api.fetch_stack().await?;
        let master = stack
            .get("stack")
            .and_then(|s| s.get("master_locale"))
            .and_then(Value::as_str)
            .unwrap_or("en-us")
            .to_string();

        let environments = self
            .ctx
            .store
            .read_chunked("environments", "environments.json")
            .await?;
        let env_mapper = self.ctx.mappers.uid_mapper(ModuleKind::Environments).await?;
        let ext_mapper = self.ctx.mappers.uid_mapper(ModuleKind::Extensions).await?;
        let app_mapper = self
            .ctx
            .mappers
            .uid_mapper(ModuleKind::MarketplaceApps)
            .await?;

        let mut state = self.ctx.state.write().await;
        state.master_locale = master;
        for (source_uid, dest_uid) in env_mapper.mappings() {
            let name = environments
                .get(source_uid)
                .and_then(|e| e.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(dest_uid)
                .to_string();
            state.environments.insert(
                source_uid.clone(),
                EnvironmentTarget {
                    uid: dest_uid.clone(),
                    name,
                },
            );
        }
        for mapper in [&ext_mapper, &app_mapper] {
            for (source_uid, dest_uid) in mapper.mappings() {
                state
                    .extension_uids
                    .insert(source_uid.clone(), dest_uid.clone());
            }
        }
        Ok(())
    }

    pub async fn run(&self) -> ImportResult<RunSummary> {
        let data_dir = &self.ctx.config.data_dir;
        if !tokio::fs::try_exists(data_dir).await.unwrap_or(false) {
            return Err(ImportError::MissingBackupDir(data_dir.clone()));
        }

        self.prepare_shared_state().await?;

        let mut run_summary = RunSummary::default();
        for kind in IMPORT_ORDER {
            if let Some(filter) = self.ctx.config.module_filter {
                if filter != kind {
                    continue;
                }
            }

            info!(module = %kind, "Importing module");
            match importer_for(kind).run(&self.ctx).await {
                Ok(summary) => run_summary.modules.push((kind, summary)),
                Err(err) => {
                    error!(module = %kind, error = %err, "Module import aborted the run");
                    return Err(err);
                }
            }
        }

        info!("Import run finished\n{}", run_summary);
        Ok(run_summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_summary_totals_and_display() {
        let mut summary = RunSummary::default();
        summary.modules.push((
            ModuleKind::Locales,
            ModuleSummary {
                created: 2,
                updated: 0,
                skipped: 1,
                failed: 0,
            },
        ));
        summary.modules.push((
            ModuleKind::Entries,
            ModuleSummary {
                created: 10,
                updated: 4,
                skipped: 0,
                failed: 1,
            },
        ));

        let totals = summary.totals();
        assert_eq!(totals.created, 12);
        assert_eq!(totals.failed, 1);
        assert!(summary.has_failures());
        let rendered = summary.to_string();
        assert!(rendered.contains("locales"));
        assert!(rendered.contains("total"));
    }
}
