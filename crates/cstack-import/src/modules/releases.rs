//! Releases importer
//!
//! A release is created empty, then its items (entries and assets) are
//! attached with their UIDs remapped through the entries/assets mappers.
//! Items whose UID has no mapping (their create failed earlier) are left
//! out rather than attached dangling.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_core::constants::DETAILS_FILE;
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct ReleasesImporter;

/// Remap release item UIDs; items without a mapping are dropped
fn remap_items(
    items: &[Value],
    entries: &HashMap<String, String>,
    assets: &HashMap<String, String>,
) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| {
            let uid = item.get("uid").and_then(Value::as_str)?;
            let module = item.get("content_type_uid").is_some();
            let mapped = if module {
                entries.get(uid)
            } else {
                entries.get(uid).or_else(|| assets.get(uid))
            }?;
            let mut out = item.clone();
            out["uid"] = Value::String(mapped.clone());
            Some(out)
        })
        .collect()
}

#[async_trait]
impl ModuleImporter for ReleasesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Releases
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let releases = ctx.store.read_chunked("releases", "releases.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Releases).await?;
        let mut failures = Vec::new();

        let entry_map = ctx
            .mappers
            .uid_mapper(ModuleKind::Entries)
            .await?
            .mappings()
            .clone();
        let asset_map = ctx
            .mappers
            .uid_mapper(ModuleKind::Assets)
            .await?
            .mappings()
            .clone();
        let mut details: Vec<Value> = ctx
            .mappers
            .read_side(ModuleKind::Releases, DETAILS_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        for (source_uid, release) in &releases {
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }

            let mut doc = strip_system_fields(release, false);
            let items: Vec<Value> = doc
                .as_object_mut()
                .and_then(|obj| obj.remove("items"))
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();

            let dest_uid = match ctx.api.create_release(json!({ "release": doc })).await {
                Ok(response) => match response_uid(&response, "release") {
                    Some(dest_uid) => {
                        details.push(response);
                        dest_uid
                    }
                    None => {
                        failures.push(AuditRecord::new(
                            source_uid.clone(),
                            "release response carried no uid",
                        ));
                        summary.failed += 1;
                        continue;
                    }
                },
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(release = %source_uid, error = %err, "Failed to create release");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                    continue;
                }
            };

            let remapped = remap_items(&items, &entry_map, &asset_map);
            if remapped.len() < items.len() {
                warn!(
                    release = %source_uid,
                    dropped = items.len() - remapped.len(),
                    "Dropped release items with no destination mapping"
                );
            }
            if !remapped.is_empty() {
                if let Err(err) = ctx
                    .api
                    .add_release_items(&dest_uid, json!({ "items": remapped }))
                    .await
                {
                    if classify_generic(&err) == ApiOutcome::Fatal {
                        return Err(err.into());
                    }
                    warn!(release = %source_uid, error = %err, "Failed to attach release items");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                }
            }

            mapper.record(source_uid, dest_uid);
            summary.created += 1;
        }

        mapper.flush().await?;
        ctx.mappers
            .write_side(
                ModuleKind::Releases,
                DETAILS_FILE,
                &serde_json::to_value(&details)?,
            )
            .await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Releases import finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remap_items_drops_unmapped() {
        let items = vec![
            json!({"uid": "e1", "content_type_uid": "blog", "action": "publish"}),
            json!({"uid": "a1", "action": "publish"}),
            json!({"uid": "gone", "content_type_uid": "blog", "action": "publish"}),
        ];
        let entries = HashMap::from([("e1".to_string(), "dst_e1".to_string())]);
        let assets = HashMap::from([("a1".to_string(), "dst_a1".to_string())]);

        let remapped = remap_items(&items, &entries, &assets);
        assert_eq!(remapped.len(), 2);
        assert_eq!(remapped[0]["uid"], "dst_e1");
        assert_eq!(remapped[0]["content_type_uid"], "blog");
        assert_eq!(remapped[1]["uid"], "dst_a1");
    }
}
