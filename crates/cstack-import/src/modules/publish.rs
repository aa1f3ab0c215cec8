//! Deferred publish phase
//!
//! Runs last. The assets and entries importers only park *which* items
//! want publishing; the where/in-which-locale detail (`publish_details`)
//! is re-read from the backup tree here so publish metadata is never
//! stored twice. Environment references are source UIDs and resolve
//! through the environment map built by the environments importer.
//! Publish failures are recorded and retried on the next run; they never
//! block anything else, which is the point of deferring this phase.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use cstack_api::PublishRequest;
use cstack_core::constants::PENDING_PUBLISH_FILE;
use cstack_import_types::{
    run_batched, AuditRecord, BatchFailure, ImportContext, ImportResult, ModuleKind,
};

use super::entries::{read_entries, PendingEntry};
use super::{ModuleImporter, ModuleSummary};

pub struct PublishImporter;

/// Turn a `publish_details` array into one publish request, with source
/// environment UIDs mapped to destination environment names. Details whose
/// environment has no destination are dropped.
fn publish_request(
    details: &[Value],
    environments: &HashMap<String, String>,
) -> Option<PublishRequest> {
    let mut envs = Vec::new();
    let mut locales = Vec::new();
    for detail in details {
        let Some(env) = detail.get("environment").and_then(Value::as_str) else {
            continue;
        };
        let Some(dest_env) = environments.get(env) else {
            continue;
        };
        if !envs.contains(dest_env) {
            envs.push(dest_env.clone());
        }
        if let Some(locale) = detail.get("locale").and_then(Value::as_str) {
            let locale = locale.to_string();
            if !locales.contains(&locale) {
                locales.push(locale);
            }
        }
    }
    if envs.is_empty() {
        return None;
    }
    Some(PublishRequest {
        environments: envs,
        locales,
    })
}

impl PublishImporter {
    async fn publish_assets(
        &self,
        ctx: &ImportContext,
        environments: &HashMap<String, String>,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let pending: Vec<String> = ctx
            .mappers
            .read_side(ModuleKind::Assets, PENDING_PUBLISH_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if pending.is_empty() {
            return Ok(());
        }

        let assets = ctx.store.read_chunked("assets", "assets.json").await?;
        let asset_mapper = ctx.mappers.uid_mapper(ModuleKind::Assets).await?;

        let report = run_batched(pending.clone(), ctx.config.concurrency, |source_uid| {
            let assets = &assets;
            let asset_mapper = &asset_mapper;
            async move {
                let details = assets
                    .get(&source_uid)
                    .and_then(|a| a.get("publish_details"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let Some(request) = publish_request(&details, environments) else {
                    debug!(asset = %source_uid, "No publishable environments, dropping");
                    return Ok(source_uid);
                };
                let Some(dest_uid) = asset_mapper.get(&source_uid) else {
                    return Err(BatchFailure::new(source_uid, "asset has no destination mapping"));
                };
                ctx.api
                    .publish_asset(dest_uid, request)
                    .await
                    .map_err(|err| BatchFailure::new(source_uid.clone(), err.to_string()))?;
                Ok(source_uid)
            }
        })
        .await;

        summary.created += report.successes.len();
        let published = report.successes;
        for failure in report.failures {
            warn!(asset = %failure.item_id, error = %failure.message, "Failed to publish asset");
            failures.push(AuditRecord::new(failure.item_id, failure.message));
            summary.failed += 1;
        }

        let remaining: Vec<&String> = pending
            .iter()
            .filter(|uid| !published.contains(*uid))
            .collect();
        ctx.mappers
            .write_side(
                ModuleKind::Assets,
                PENDING_PUBLISH_FILE,
                &serde_json::to_value(&remaining)?,
            )
            .await?;
        Ok(())
    }

    async fn publish_entries(
        &self,
        ctx: &ImportContext,
        environments: &HashMap<String, String>,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let pending: Vec<PendingEntry> = ctx
            .mappers
            .read_side(ModuleKind::Entries, PENDING_PUBLISH_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if pending.is_empty() {
            return Ok(());
        }

        // Merge publish_details across every locale file the entry appears in
        let locale_docs = ctx.store.read_chunked("locales", "locales.json").await?;
        let master = ctx.state.read().await.master_locale.clone();
        let mut locales: Vec<String> = locale_docs
            .values()
            .filter_map(|l| l.get("code").and_then(Value::as_str).map(str::to_string))
            .collect();
        if !locales.contains(&master) {
            locales.push(master);
        }

        let mut details_by_entry: HashMap<String, Vec<Value>> = HashMap::new();
        for entry in &pending {
            for locale in &locales {
                let docs = read_entries(ctx, &entry.content_type, locale).await?;
                if let Some(details) = docs
                    .get(&entry.uid)
                    .and_then(|d| d.get("publish_details"))
                    .and_then(Value::as_array)
                {
                    details_by_entry
                        .entry(entry.uid.clone())
                        .or_default()
                        .extend(details.iter().cloned());
                }
            }
        }

        let entry_mapper = ctx.mappers.uid_mapper(ModuleKind::Entries).await?;
        let report = run_batched(pending.clone(), ctx.config.concurrency, |item| {
            let details_by_entry = &details_by_entry;
            let entry_mapper = &entry_mapper;
            async move {
                let details = details_by_entry
                    .get(&item.uid)
                    .cloned()
                    .unwrap_or_default();
                let Some(request) = publish_request(&details, environments) else {
                    debug!(entry = %item.uid, "No publishable environments, dropping");
                    return Ok(item);
                };
                let Some(dest_uid) = entry_mapper.get(&item.uid) else {
                    return Err(BatchFailure::new(
                        item.uid.clone(),
                        "entry has no destination mapping",
                    ));
                };
                ctx.api
                    .publish_entry(&item.content_type, dest_uid, request)
                    .await
                    .map_err(|err| BatchFailure::new(item.uid.clone(), err.to_string()))?;
                Ok(item)
            }
        })
        .await;

        summary.created += report.successes.len();
        let published = report.successes;
        for failure in report.failures {
            warn!(entry = %failure.item_id, error = %failure.message, "Failed to publish entry");
            failures.push(AuditRecord::new(failure.item_id, failure.message));
            summary.failed += 1;
        }

        let remaining: Vec<&PendingEntry> = pending
            .iter()
            .filter(|item| !published.contains(*item))
            .collect();
        ctx.mappers
            .write_side(
                ModuleKind::Entries,
                PENDING_PUBLISH_FILE,
                &serde_json::to_value(&remaining)?,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ModuleImporter for PublishImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Publish
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        if ctx.config.skip_publish {
            info!("Publish phase skipped by configuration");
            return Ok(summary);
        }
        let mut failures = Vec::new();

        let environments: HashMap<String, String> = ctx
            .state
            .read()
            .await
            .environments
            .iter()
            .map(|(src, target)| (src.clone(), target.name.clone()))
            .collect();

        self.publish_assets(ctx, &environments, &mut summary, &mut failures)
            .await?;
        self.publish_entries(ctx, &environments, &mut summary, &mut failures)
            .await?;

        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Publish phase finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_request_maps_environments_and_dedupes() {
        let details = vec![
            json!({"environment": "env_src", "locale": "en-us"}),
            json!({"environment": "env_src", "locale": "fr-fr"}),
            json!({"environment": "unknown_env", "locale": "en-us"}),
        ];
        let environments =
            HashMap::from([("env_src".to_string(), "production".to_string())]);

        let request = publish_request(&details, &environments).unwrap();
        assert_eq!(request.environments, vec!["production"]);
        assert_eq!(request.locales, vec!["en-us", "fr-fr"]);
    }

    #[test]
    fn test_publish_request_none_when_nothing_maps() {
        let details = vec![json!({"environment": "gone", "locale": "en-us"})];
        assert!(publish_request(&details, &HashMap::new()).is_none());
    }
}
