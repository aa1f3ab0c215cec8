//! Assets importer
//!
//! Three stages. First the folder tree: the flat folder list from the
//! backup is grouped into levels (parents strictly before children) and
//! each level is created through the batch executor at the lower folder
//! concurrency. In `replace_existing` mode a fresh `Import-<timestamp>`
//! root is created and every top-level folder is re-parented under it, so
//! repeated imports into the same stack never collide.
//!
//! Then the binaries: each asset's versions are uploaded in original
//! order, the first via the multipart create call and the rest via
//! replace. Source-to-destination UID and URL mappings are recorded; the
//! URL map feeds the Reference Resolver when entries are imported.
//!
//! Finally the assets carrying `publish_details` are parked in the
//! pending-publish side file for the deferred publish phase.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cstack_api::error::{classify_generic, ApiError, ApiOutcome};
use cstack_api::AssetUpload;
use cstack_core::constants::{FOLDER_MAPPING_FILE, PENDING_PUBLISH_FILE, URL_MAPPING_FILE};
use cstack_import_types::{
    run_batched, AuditRecord, BatchFailure, ImportContext, ImportResult, ModuleKind,
};

use super::{response_uid, ModuleImporter, ModuleSummary};

/// Folder-mapper key for the synthesized replace-existing root
const IMPORT_ROOT_KEY: &str = "__import_root__";

pub struct AssetsImporter;

/// Group folders into creation levels: level 0 holds roots (no parent, or
/// a parent missing from the export), level n+1 holds children of level n.
fn folder_levels(folders: &[Value]) -> Vec<Vec<&Value>> {
    let known: Vec<&str> = folders
        .iter()
        .filter_map(|f| f.get("uid").and_then(Value::as_str))
        .collect();
    let parent_of = |folder: &Value| -> Option<String> {
        folder
            .get("parent_uid")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty() && known.contains(p))
            .map(str::to_string)
    };

    let mut levels: Vec<Vec<&Value>> = Vec::new();
    let mut placed: Vec<String> = Vec::new();
    let mut remaining: Vec<&Value> = folders.iter().collect();

    while !remaining.is_empty() {
        let (level, rest): (Vec<&Value>, Vec<&Value>) = remaining.into_iter().partition(|f| {
            match parent_of(f) {
                None => true,
                Some(parent) => placed.contains(&parent),
            }
        });
        if level.is_empty() {
            // Orphan cycle in the export; import what remains as roots
            warn!(count = rest.len(), "Folder parent cycle detected, importing as roots");
            levels.push(rest);
            break;
        }
        placed.extend(
            level
                .iter()
                .filter_map(|f| f.get("uid").and_then(Value::as_str).map(str::to_string)),
        );
        levels.push(level);
        remaining = rest;
    }

    levels
}

/// One asset version to upload, in order
struct AssetVersion {
    file_name: String,
    content_type: String,
}

/// Versions listed in the asset document, oldest first; a document without
/// a version list is a single-version asset.
fn asset_versions(asset: &Value) -> Vec<AssetVersion> {
    let content_type = asset
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();

    if let Some(Value::Array(versions)) = asset.get("versions") {
        let mut out: Vec<(u64, AssetVersion)> = versions
            .iter()
            .filter_map(|v| {
                let file_name = v.get("filename").and_then(Value::as_str)?;
                let number = v.get("_version").and_then(Value::as_u64).unwrap_or(1);
                Some((
                    number,
                    AssetVersion {
                        file_name: file_name.to_string(),
                        content_type: content_type.clone(),
                    },
                ))
            })
            .collect();
        out.sort_by_key(|(n, _)| *n);
        if !out.is_empty() {
            return out.into_iter().map(|(_, v)| v).collect();
        }
    }

    asset
        .get("filename")
        .and_then(Value::as_str)
        .map(|file_name| {
            vec![AssetVersion {
                file_name: file_name.to_string(),
                content_type,
            }]
        })
        .unwrap_or_default()
}

/// What one settled asset upload contributes to the mappers
enum UploadOutcome {
    Done {
        source_uid: String,
        dest_uid: String,
        url_mapping: Option<(String, String)>,
        wants_publish: bool,
    },
    Fatal(ApiError),
}

impl AssetsImporter {
    async fn import_folders(
        &self,
        ctx: &ImportContext,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let folders: Vec<Value> = ctx
            .store
            .read_json_opt("assets/folders.json")
            .await?
            .unwrap_or_default();
        if folders.is_empty() {
            return Ok(());
        }

        let mut folder_mapper = ctx
            .mappers
            .named_mapper(ModuleKind::Assets, FOLDER_MAPPING_FILE)
            .await?;

        // replace_existing re-roots the whole imported tree under a fresh
        // folder, created once per mapper directory
        let import_root = if ctx.config.replace_existing {
            match folder_mapper.get(IMPORT_ROOT_KEY) {
                Some(existing) => Some(existing.to_string()),
                None => {
                    let name = format!("Import-{}", Utc::now().format("%Y%m%d%H%M%S"));
                    let response = ctx
                        .api
                        .create_asset_folder(json!({"asset": {"name": name}}))
                        .await?;
                    let uid = response_uid(&response, "asset").ok_or_else(|| {
                        cstack_import_types::ImportError::Internal(
                            "asset folder response carried no uid".to_string(),
                        )
                    })?;
                    info!(folder = %name, uid = %uid, "Created import root folder");
                    folder_mapper.record(IMPORT_ROOT_KEY, &uid);
                    folder_mapper.flush().await?;
                    Some(uid)
                }
            }
        } else {
            None
        };

        for level in folder_levels(&folders) {
            let pending: Vec<Value> = level
                .into_iter()
                .filter(|f| {
                    f.get("uid")
                        .and_then(Value::as_str)
                        .map(|uid| !folder_mapper.has_imported(uid))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if pending.is_empty() {
                continue;
            }

            let mapping = folder_mapper.mappings().clone();
            let import_root = import_root.clone();
            let report = run_batched(pending, ctx.config.folder_concurrency, |folder| {
                let mapping = &mapping;
                let import_root = import_root.clone();
                async move {
                    let uid = folder
                        .get("uid")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = folder
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(&uid)
                        .to_string();
                    let parent = folder
                        .get("parent_uid")
                        .and_then(Value::as_str)
                        .and_then(|p| mapping.get(p).cloned())
                        .or(import_root);

                    let mut payload = json!({"asset": {"name": name}});
                    if let Some(parent) = &parent {
                        payload["asset"]["parent_uid"] = Value::String(parent.clone());
                    }

                    match ctx.api.create_asset_folder(payload).await {
                        Ok(response) => match response_uid(&response, "asset") {
                            Some(dest_uid) => Ok((uid, dest_uid)),
                            None => Err(BatchFailure::new(
                                uid,
                                "asset folder response carried no uid",
                            )),
                        },
                        Err(err) => Err(BatchFailure::new(uid, err.to_string())),
                    }
                }
            })
            .await;

            for (source_uid, dest_uid) in report.successes {
                folder_mapper.record(source_uid, dest_uid);
                summary.created += 1;
            }
            for failure in report.failures {
                warn!(folder = %failure.item_id, error = %failure.message, "Failed to create asset folder");
                failures.push(AuditRecord::new(failure.item_id, failure.message));
                summary.failed += 1;
            }
            // A child level must see this level's mappings on resume
            folder_mapper.flush().await?;
        }

        Ok(())
    }

    async fn upload_one(
        &self,
        ctx: &ImportContext,
        source_uid: &str,
        asset: &Value,
        folder_mapping: &HashMap<String, String>,
        import_root: Option<&String>,
    ) -> Result<UploadOutcome, BatchFailure> {
        let versions = asset_versions(asset);
        if versions.is_empty() {
            return Err(BatchFailure::new(source_uid, "asset carries no filename"));
        }

        let title = asset.get("title").and_then(Value::as_str).map(str::to_string);
        let description = asset
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        let parent_uid = asset
            .get("parent_uid")
            .and_then(Value::as_str)
            .and_then(|p| folder_mapping.get(p).cloned())
            .or_else(|| import_root.cloned());

        let mut dest_uid: Option<String> = None;
        let mut dest_url: Option<String> = None;

        for version in &versions {
            let rel = format!("assets/files/{}/{}", source_uid, version.file_name);
            let bytes = ctx
                .store
                .read_bytes(&rel)
                .await
                .map_err(|err| BatchFailure::new(source_uid, err.to_string()))?;
            let upload = AssetUpload {
                file_name: version.file_name.clone(),
                content_type: version.content_type.clone(),
                bytes,
                title: title.clone(),
                description: description.clone(),
                parent_uid: parent_uid.clone(),
            };

            let result = match &dest_uid {
                None => ctx.api.upload_asset(upload).await,
                Some(uid) => ctx.api.replace_asset(uid, upload).await,
            };
            match result {
                Ok(response) => {
                    if dest_uid.is_none() {
                        dest_uid = response_uid(&response, "asset");
                    }
                    dest_url = response
                        .get("asset")
                        .and_then(|a| a.get("url"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or(dest_url);
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => {
                    return Ok(UploadOutcome::Fatal(err))
                }
                Err(err) => return Err(BatchFailure::new(source_uid, err.to_string())),
            }
        }

        let dest_uid = dest_uid
            .ok_or_else(|| BatchFailure::new(source_uid, "asset response carried no uid"))?;
        let url_mapping = match (asset.get("url").and_then(Value::as_str), dest_url) {
            (Some(source_url), Some(dest_url)) => Some((source_url.to_string(), dest_url)),
            _ => None,
        };
        let wants_publish = asset
            .get("publish_details")
            .map(|d| !d.is_null() && d.as_array().map(|a| !a.is_empty()).unwrap_or(true))
            .unwrap_or(false);

        Ok(UploadOutcome::Done {
            source_uid: source_uid.to_string(),
            dest_uid,
            url_mapping,
            wants_publish,
        })
    }

    async fn import_assets(
        &self,
        ctx: &ImportContext,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let assets = ctx.store.read_chunked("assets", "assets.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::Assets).await?;
        let mut url_mapper = ctx
            .mappers
            .named_mapper(ModuleKind::Assets, URL_MAPPING_FILE)
            .await?;
        let folder_mapper = ctx
            .mappers
            .named_mapper(ModuleKind::Assets, FOLDER_MAPPING_FILE)
            .await?;
        let folder_mapping = folder_mapper.mappings().clone();
        let import_root = folder_mapper.get(IMPORT_ROOT_KEY).map(str::to_string);

        let mut pending_publish: Vec<String> = ctx
            .mappers
            .read_side(ModuleKind::Assets, PENDING_PUBLISH_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let pending: Vec<(String, Value)> = assets
            .iter()
            .filter(|(uid, _)| !mapper.has_imported(uid))
            .map(|(uid, asset)| (uid.clone(), asset.clone()))
            .collect();
        summary.skipped += assets.len() - pending.len();

        for chunk in pending.chunks(ctx.config.batch_limit.max(1)) {
            let folder_mapping = &folder_mapping;
            let import_root = import_root.as_ref();
            let report = run_batched(chunk.to_vec(), ctx.config.concurrency, |(uid, asset)| {
                async move { self.upload_one(ctx, &uid, &asset, folder_mapping, import_root).await }
            })
            .await;

            let mut fatal: Option<ApiError> = None;
            let mut created_audit = Vec::new();
            for outcome in report.successes {
                match outcome {
                    UploadOutcome::Done {
                        source_uid,
                        dest_uid,
                        url_mapping,
                        wants_publish,
                    } => {
                        debug!(asset = %source_uid, dest = %dest_uid, "Uploaded asset");
                        created_audit.push(AuditRecord::new(
                            source_uid.clone(),
                            format!("uploaded as {}", dest_uid),
                        ));
                        mapper.record(&source_uid, dest_uid);
                        if let Some((source_url, dest_url)) = url_mapping {
                            url_mapper.record(source_url, dest_url);
                        }
                        if wants_publish && !pending_publish.contains(&source_uid) {
                            pending_publish.push(source_uid);
                        }
                        summary.created += 1;
                    }
                    UploadOutcome::Fatal(err) => fatal = Some(err),
                }
            }
            for failure in report.failures {
                warn!(asset = %failure.item_id, error = %failure.message, "Failed to upload asset");
                failures.push(AuditRecord::new(failure.item_id, failure.message));
                summary.failed += 1;
            }

            mapper.flush().await?;
            url_mapper.flush().await?;
            ctx.mappers
                .record_success(ModuleKind::Assets, &created_audit)
                .await?;
            ctx.mappers
                .write_side(
                    ModuleKind::Assets,
                    PENDING_PUBLISH_FILE,
                    &serde_json::to_value(&pending_publish)?,
                )
                .await?;

            if let Some(err) = fatal {
                return Err(err.into());
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ModuleImporter for AssetsImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Assets
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let mut failures = Vec::new();

        self.import_folders(ctx, &mut summary, &mut failures).await?;
        self.import_assets(ctx, &mut summary, &mut failures).await?;

        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Assets import finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_folder_levels_parent_first() {
        let folders = vec![
            json!({"uid": "c", "name": "Grandchild", "parent_uid": "b"}),
            json!({"uid": "a", "name": "Root", "parent_uid": null}),
            json!({"uid": "b", "name": "Child", "parent_uid": "a"}),
            json!({"uid": "d", "name": "Other root"}),
        ];
        let levels = folder_levels(&folders);
        assert_eq!(levels.len(), 3);
        let uids: Vec<&str> = levels[0]
            .iter()
            .map(|f| f["uid"].as_str().unwrap())
            .collect();
        assert!(uids.contains(&"a"));
        assert!(uids.contains(&"d"));
        assert_eq!(levels[1][0]["uid"], "b");
        assert_eq!(levels[2][0]["uid"], "c");
    }

    #[test]
    fn test_folder_with_unknown_parent_is_root() {
        let folders = vec![json!({"uid": "x", "name": "Orphan", "parent_uid": "gone"})];
        let levels = folder_levels(&folders);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0][0]["uid"], "x");
    }

    #[test]
    fn test_asset_versions_ordered() {
        let asset = json!({
            "filename": "latest.png",
            "content_type": "image/png",
            "versions": [
                {"_version": 2, "filename": "v2.png"},
                {"_version": 1, "filename": "v1.png"}
            ]
        });
        let versions = asset_versions(&asset);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].file_name, "v1.png");
        assert_eq!(versions[1].file_name, "v2.png");
    }

    #[test]
    fn test_asset_without_version_list_is_single() {
        let asset = json!({"filename": "doc.pdf", "content_type": "application/pdf"});
        let versions = asset_versions(&asset);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].file_name, "doc.pdf");
    }
}
