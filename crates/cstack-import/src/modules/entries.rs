//! Entries importer
//!
//! Entries can reference each other and themselves arbitrarily, including
//! through embedded rich-text entry nodes, so no creation order satisfies
//! all references up front. The importer runs a fixed sequence of phases
//! that turns the unorderable reference graph into two ordered passes:
//!
//! 1. `suppress`: push relaxed schemas so constraint-violating entries can
//!    be created at all.
//! 2. `create`: per locale, per content type, per batch — strip entry
//!    references and embedded entries, resolve asset references, create
//!    (or localize when a destination UID already exists).
//! 3. `repost`: for content types with reference or RTE fields, rebuild
//!    each document from source with the now-complete entry UID map and
//!    update it. Every target exists by now, so cycles resolve.
//! 4. `unsuppress`: push the original schemas back.
//! 5. `remove bugged master entries`: delete master-locale copies the API
//!    auto-created for entries that only exist in other locales.
//! 6. `field rules`: replay the field rules parked by the content types
//!    importer, with entry UIDs mapped to their destination values.
//!
//! Publishing is deferred: entries with `publish_details` are parked in
//! the pending-publish side file for the publish phase.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use cstack_api::error::{classify_entry, classify_generic, ApiError, ApiOutcome};
use cstack_core::constants::{FIELD_RULES_FILE, PENDING_PUBLISH_FILE};
use cstack_import_types::{
    run_batched, AuditRecord, BatchFailure, ImportContext, ImportResult, ModuleKind, UidMapper,
};

use crate::transform::{
    resolve_embedded_entries, resolve_references, restore_schema, rewrite_asset_nodes,
    strip_embedded_entries, strip_entry_references, suppress_schema, ReferenceMaps, SchemaFlags,
    UidReplacements,
};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct EntriesImporter;

/// A content type's schemas as the entries phases need them
struct ContentTypeInfo {
    uid: String,
    doc: Value,
    schema: Value,
    suppressed: Value,
    flags: SchemaFlags,
}

/// One entry queued for the deferred publish phase
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct PendingEntry {
    pub uid: String,
    pub content_type: String,
}

enum CreateOutcome {
    Created {
        source_uid: String,
        dest_uid: String,
        wants_publish: bool,
    },
    Localized {
        source_uid: String,
        wants_publish: bool,
    },
    Fatal(ApiError),
}

enum RepostOutcome {
    Done { unmatched: Vec<String> },
    Fatal(ApiError),
}

fn wants_publish(entry: &Value) -> bool {
    entry
        .get("publish_details")
        .and_then(Value::as_array)
        .map(|d| !d.is_empty())
        .unwrap_or(false)
}

/// Read one content type's entries for one locale, chunked
/// (`<locale>-index.json` + `<locale>-<n>.json`) or single-file
/// (`<locale>.json`). Missing files mean no entries in that locale.
pub(crate) async fn read_entries(
    ctx: &ImportContext,
    ct_uid: &str,
    locale: &str,
) -> ImportResult<Map<String, Value>> {
    let dir = format!("entries/{}", ct_uid);
    let index_rel = format!("{}/{}-index.json", dir, locale);

    if ctx.store.exists(&index_rel).await {
        let index: std::collections::BTreeMap<String, Value> =
            ctx.store.read_json(&index_rel).await?;
        let mut merged = Map::new();
        for chunk_no in index.keys() {
            let chunk: Map<String, Value> = ctx
                .store
                .read_json(format!("{}/{}-{}.json", dir, locale, chunk_no))
                .await?;
            merged.extend(chunk);
        }
        return Ok(merged);
    }

    Ok(ctx
        .store
        .read_json_opt(format!("{}/{}.json", dir, locale))
        .await?
        .unwrap_or_default())
}

impl EntriesImporter {
    async fn content_type_infos(&self, ctx: &ImportContext) -> ImportResult<Vec<ContentTypeInfo>> {
        let content_types = ctx
            .store
            .read_chunked("content_types", "content_types.json")
            .await?;
        let extension_uids = ctx.state.read().await.extension_uids.clone();
        let global_field_uids: HashMap<String, String> = ctx
            .mappers
            .uid_mapper(ModuleKind::GlobalFields)
            .await?
            .mappings()
            .clone();
        let repl = UidReplacements {
            extensions: Some(&extension_uids),
            global_fields: Some(&global_field_uids),
        };

        let mut infos = Vec::with_capacity(content_types.len());
        for (uid, ct) in &content_types {
            let mut doc = strip_system_fields(ct, true);
            if let Some(obj) = doc.as_object_mut() {
                obj.remove("field_rules");
            }
            let schema = doc.get("schema").cloned().unwrap_or_else(|| json!([]));
            let (suppressed, flags) = suppress_schema(&schema, &repl, uid)?;
            infos.push(ContentTypeInfo {
                uid: uid.clone(),
                doc,
                schema,
                suppressed,
                flags,
            });
        }
        Ok(infos)
    }

    /// Locale codes to iterate, master first
    async fn locales(&self, ctx: &ImportContext) -> ImportResult<Vec<String>> {
        let master = ctx.state.read().await.master_locale.clone();
        let locale_docs = ctx.store.read_chunked("locales", "locales.json").await?;
        let mut codes: Vec<String> = locale_docs
            .values()
            .filter_map(|l| l.get("code").and_then(Value::as_str).map(str::to_string))
            .collect();
        if !codes.contains(&master) {
            codes.push(master);
        }
        Ok(ctx.ordered_locales(codes).await)
    }

    /// Phase 1: push relaxed schemas so unsatisfiable constraints don't
    /// block entry creation
    async fn suppress(&self, ctx: &ImportContext, infos: &[ContentTypeInfo]) -> ImportResult<()> {
        for info in infos {
            let mut doc = info.doc.clone();
            doc["schema"] = info.suppressed.clone();
            ctx.api
                .update_content_type(&info.uid, json!({ "content_type": doc }))
                .await?;
            debug!(content_type = %info.uid, "Pushed suppressed schema");
        }
        Ok(())
    }

    /// Phase 2: create (or localize) every entry, per locale, per content
    /// type, per batch
    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        ctx: &ImportContext,
        infos: &[ContentTypeInfo],
        locales: &[String],
        entry_mapper: &mut UidMapper,
        asset_maps: &(HashMap<String, String>, HashMap<String, String>),
        pending_publish: &mut Vec<PendingEntry>,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let (asset_uids, asset_urls) = asset_maps;

        for locale in locales {
            for info in infos {
                let entries = read_entries(ctx, &info.uid, locale).await?;
                if entries.is_empty() {
                    continue;
                }
                let mut locale_mapper = ctx
                    .mappers
                    .named_mapper(ModuleKind::Entries, &format!("{}/{}.json", info.uid, locale))
                    .await?;

                let pending: Vec<(String, Value)> = entries
                    .iter()
                    .filter(|(uid, _)| !locale_mapper.has_imported(uid))
                    .map(|(uid, entry)| (uid.clone(), entry.clone()))
                    .collect();
                summary.skipped += entries.len() - pending.len();

                for chunk in pending.chunks(ctx.config.entry_batch_size()) {
                    let known = entry_mapper.mappings().clone();
                    let known = &known;
                    let report =
                        run_batched(chunk.to_vec(), ctx.config.concurrency, |(uid, entry)| {
                            async move {
                                self.create_one(
                                    ctx, info, locale, &uid, &entry, known, asset_uids, asset_urls,
                                )
                                .await
                            }
                        })
                        .await;

                    let mut fatal: Option<ApiError> = None;
                    let mut created_audit = Vec::new();
                    for outcome in report.successes {
                        match outcome {
                            CreateOutcome::Created {
                                source_uid,
                                dest_uid,
                                wants_publish,
                            } => {
                                created_audit.push(AuditRecord::new(
                                    source_uid.clone(),
                                    format!("created as {} in {}", dest_uid, locale),
                                ));
                                entry_mapper.record(&source_uid, &dest_uid);
                                locale_mapper.record(&source_uid, dest_uid);
                                if wants_publish {
                                    let pending = PendingEntry {
                                        uid: source_uid,
                                        content_type: info.uid.clone(),
                                    };
                                    if !pending_publish.contains(&pending) {
                                        pending_publish.push(pending);
                                    }
                                }
                                summary.created += 1;
                            }
                            CreateOutcome::Localized {
                                source_uid,
                                wants_publish,
                            } => {
                                let dest = entry_mapper
                                    .get(&source_uid)
                                    .unwrap_or(source_uid.as_str())
                                    .to_string();
                                locale_mapper.record(&source_uid, dest);
                                if wants_publish {
                                    let pending = PendingEntry {
                                        uid: source_uid,
                                        content_type: info.uid.clone(),
                                    };
                                    if !pending_publish.contains(&pending) {
                                        pending_publish.push(pending);
                                    }
                                }
                                summary.updated += 1;
                            }
                            CreateOutcome::Fatal(err) => fatal = Some(err),
                        }
                    }
                    for failure in report.failures {
                        warn!(
                            content_type = %info.uid,
                            %locale,
                            entry = %failure.item_id,
                            error = %failure.message,
                            "Failed to create entry"
                        );
                        failures.push(AuditRecord::new(failure.item_id, failure.message));
                        summary.failed += 1;
                    }

                    entry_mapper.flush().await?;
                    locale_mapper.flush().await?;
                    ctx.mappers
                        .record_success(ModuleKind::Entries, &created_audit)
                        .await?;
                    ctx.mappers
                        .write_side(
                            ModuleKind::Entries,
                            PENDING_PUBLISH_FILE,
                            &serde_json::to_value(&pending_publish)?,
                        )
                        .await?;

                    if let Some(err) = fatal {
                        return Err(err.into());
                    }
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_one(
        &self,
        ctx: &ImportContext,
        info: &ContentTypeInfo,
        locale: &str,
        source_uid: &str,
        entry: &Value,
        known: &HashMap<String, String>,
        asset_uids: &HashMap<String, String>,
        asset_urls: &HashMap<String, String>,
    ) -> Result<CreateOutcome, BatchFailure> {
        let publish = wants_publish(entry);
        let doc = strip_system_fields(entry, false);

        // References cannot be satisfied yet; the repost phase restores them
        let doc = strip_entry_references(&info.schema, &doc, &info.uid)
            .map_err(|err| BatchFailure::new(source_uid, err.to_string()))?;
        let (doc, stripped_rte) = strip_embedded_entries(&doc);
        if stripped_rte > 0 {
            debug!(entry = %source_uid, nodes = stripped_rte, "Stripped embedded entry nodes");
        }
        // Asset references resolve now: assets imported before entries
        let maps = ReferenceMaps {
            entries: None,
            assets: Some(asset_uids),
            asset_urls: Some(asset_urls),
        };
        let (doc, _) = resolve_references(&info.schema, &doc, &maps, &info.uid)
            .map_err(|err| BatchFailure::new(source_uid, err.to_string()))?;
        let doc = rewrite_asset_nodes(&doc, asset_uids, asset_urls);

        // An earlier locale already created this entry; this pass localizes
        if let Some(dest_uid) = known.get(source_uid) {
            return match ctx
                .api
                .update_entry(&info.uid, locale, dest_uid, json!({ "entry": doc }))
                .await
            {
                Ok(_) => Ok(CreateOutcome::Localized {
                    source_uid: source_uid.to_string(),
                    wants_publish: publish,
                }),
                Err(err) if classify_entry(&err) == ApiOutcome::Fatal => {
                    Ok(CreateOutcome::Fatal(err))
                }
                Err(err) => Err(BatchFailure::new(source_uid, err.to_string())),
            };
        }

        match ctx
            .api
            .create_entry(&info.uid, locale, json!({ "entry": doc }))
            .await
        {
            Ok(response) => match response_uid(&response, "entry") {
                Some(dest_uid) => Ok(CreateOutcome::Created {
                    source_uid: source_uid.to_string(),
                    dest_uid,
                    wants_publish: publish,
                }),
                None => Err(BatchFailure::new(source_uid, "entry response carried no uid")),
            },
            Err(err) => match classify_entry(&err) {
                // Duplicate title: the entry exists from a partial run;
                // recover its UID by title lookup instead of failing
                ApiOutcome::AlreadyExists => {
                    let title = doc.get("title").and_then(Value::as_str).unwrap_or_default();
                    let found = ctx
                        .api
                        .find_entries(&info.uid, locale, json!({"title": title}))
                        .await
                        .map_err(|err| BatchFailure::new(source_uid, err.to_string()))?;
                    match found
                        .first()
                        .and_then(|e| e.get("uid"))
                        .and_then(Value::as_str)
                    {
                        Some(dest_uid) => Ok(CreateOutcome::Created {
                            source_uid: source_uid.to_string(),
                            dest_uid: dest_uid.to_string(),
                            wants_publish: publish,
                        }),
                        None => Err(BatchFailure::new(
                            source_uid,
                            "duplicate title but lookup found no entry",
                        )),
                    }
                }
                ApiOutcome::Fatal => Ok(CreateOutcome::Fatal(err)),
                ApiOutcome::Transient => Err(BatchFailure::new(source_uid, err.to_string())),
            },
        }
    }

    /// Phase 3: re-resolve references with the complete UID map and update
    /// every entry of reference/RTE content types
    async fn repost(
        &self,
        ctx: &ImportContext,
        infos: &[ContentTypeInfo],
        locales: &[String],
        entry_mapper: &UidMapper,
        asset_maps: &(HashMap<String, String>, HashMap<String, String>),
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let (asset_uids, asset_urls) = asset_maps;
        let entry_map = entry_mapper.mappings().clone();
        let mut unmatched_all: Vec<String> = Vec::new();

        for locale in locales {
            for info in infos {
                if !info.flags.has_reference_fields && !info.flags.has_rte_entry_refs {
                    continue;
                }
                let entries = read_entries(ctx, &info.uid, locale).await?;
                let items: Vec<(String, Value)> = entries
                    .iter()
                    .filter(|(uid, _)| entry_map.contains_key(*uid))
                    .map(|(uid, entry)| (uid.clone(), entry.clone()))
                    .collect();

                for chunk in items.chunks(ctx.config.entry_batch_size()) {
                    let report =
                        run_batched(chunk.to_vec(), ctx.config.concurrency, |(uid, entry)| {
                            let entry_map = &entry_map;
                            async move {
                                let dest_uid = entry_map
                                    .get(uid.as_str())
                                    .cloned()
                                    .ok_or_else(|| BatchFailure::new(uid.clone(), "no mapping"))?;

                                let doc = strip_system_fields(&entry, false);
                                let maps = ReferenceMaps {
                                    entries: Some(entry_map),
                                    assets: Some(asset_uids),
                                    asset_urls: Some(asset_urls),
                                };
                                let (doc, log) =
                                    resolve_references(&info.schema, &doc, &maps, &info.uid)
                                        .map_err(|err| {
                                            BatchFailure::new(uid.clone(), err.to_string())
                                        })?;
                                // Embedded entry nodes were stripped at create
                                // time; splice them back from the source doc
                                let (doc, unresolved) =
                                    resolve_embedded_entries(&doc, entry_map);
                                if unresolved > 0 {
                                    debug!(entry = %uid, nodes = unresolved, "Dropped unresolvable embedded entry nodes");
                                }
                                let doc = rewrite_asset_nodes(&doc, asset_uids, asset_urls);

                                match ctx
                                    .api
                                    .update_entry(&info.uid, locale, &dest_uid, json!({ "entry": doc }))
                                    .await
                                {
                                    Ok(_) => Ok(RepostOutcome::Done {
                                        unmatched: log.unmatched,
                                    }),
                                    Err(err) if classify_entry(&err) == ApiOutcome::Fatal => {
                                        Ok(RepostOutcome::Fatal(err))
                                    }
                                    Err(err) => Err(BatchFailure::new(uid.clone(), err.to_string())),
                                }
                            }
                        })
                        .await;

                    let mut fatal: Option<ApiError> = None;
                    for outcome in report.successes {
                        match outcome {
                            RepostOutcome::Done { unmatched, .. } => {
                                unmatched_all.extend(unmatched);
                                summary.updated += 1;
                            }
                            RepostOutcome::Fatal(err) => fatal = Some(err),
                        }
                    }
                    for failure in report.failures {
                        warn!(
                            content_type = %info.uid,
                            %locale,
                            entry = %failure.item_id,
                            error = %failure.message,
                            "Failed to repost entry references"
                        );
                        failures.push(AuditRecord::new(failure.item_id, failure.message));
                        summary.failed += 1;
                    }
                    if let Some(err) = fatal {
                        return Err(err.into());
                    }
                }
            }
        }

        if !unmatched_all.is_empty() {
            unmatched_all.sort();
            unmatched_all.dedup();
            warn!(count = unmatched_all.len(), "Some references stayed unresolved");
            ctx.mappers
                .write_side(
                    ModuleKind::Entries,
                    "unmatched-uids.json",
                    &serde_json::to_value(&unmatched_all)?,
                )
                .await?;
        }

        Ok(())
    }

    /// Phase 4: restore the original constraints. The suppressed schema
    /// carries the destination extension/global-field UIDs, so constraints
    /// are copied onto it rather than pushing the source schema verbatim.
    async fn unsuppress(&self, ctx: &ImportContext, infos: &[ContentTypeInfo]) -> ImportResult<()> {
        for info in infos {
            let mut doc = info.doc.clone();
            doc["schema"] = restore_schema(&info.suppressed, &info.schema);
            ctx.api
                .update_content_type(&info.uid, json!({ "content_type": doc }))
                .await?;
            debug!(content_type = %info.uid, "Restored original schema");
        }
        Ok(())
    }

    /// Phase 5: delete master-locale copies the API auto-created for
    /// entries that only exist in non-master locales
    async fn remove_bugged_master_entries(
        &self,
        ctx: &ImportContext,
        infos: &[ContentTypeInfo],
        locales: &[String],
        entry_mapper: &UidMapper,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let master = ctx.state.read().await.master_locale.clone();
        let mut removed_mapper = ctx
            .mappers
            .named_mapper(ModuleKind::Entries, "removed-master-entries.json")
            .await?;

        for info in infos {
            let master_uids: HashSet<String> = read_entries(ctx, &info.uid, &master)
                .await?
                .keys()
                .cloned()
                .collect();

            for locale in locales.iter().filter(|l| **l != master) {
                for source_uid in read_entries(ctx, &info.uid, locale).await?.keys() {
                    if master_uids.contains(source_uid)
                        || removed_mapper.has_imported(source_uid)
                    {
                        continue;
                    }
                    let Some(dest_uid) = entry_mapper.get(source_uid) else {
                        continue;
                    };
                    match ctx.api.delete_entry(&info.uid, &master, dest_uid).await {
                        Ok(_) => {
                            debug!(entry = %source_uid, "Removed auto-created master locale entry");
                            removed_mapper.record(source_uid, dest_uid.to_string());
                        }
                        Err(err) if classify_generic(&err) == ApiOutcome::Fatal => {
                            return Err(err.into())
                        }
                        Err(err) => {
                            warn!(entry = %source_uid, error = %err, "Failed to remove master locale entry");
                            failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                        }
                    }
                }
            }
        }

        removed_mapper.flush().await?;
        Ok(())
    }

    /// Phase 6: replay the parked field rules with entry UIDs mapped
    async fn update_field_rules(
        &self,
        ctx: &ImportContext,
        infos: &[ContentTypeInfo],
        entry_mapper: &UidMapper,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let Some(rules_by_ct) = ctx
            .mappers
            .read_side(ModuleKind::ContentTypes, FIELD_RULES_FILE)
            .await?
            .and_then(|v| v.as_object().cloned())
        else {
            return Ok(());
        };

        for info in infos {
            let Some(rules) = rules_by_ct.get(&info.uid) else {
                continue;
            };

            let mut serialized = serde_json::to_string(rules)?;
            for (source_uid, dest_uid) in entry_mapper.mappings() {
                if serialized.contains(source_uid.as_str()) {
                    serialized = serialized.replace(source_uid.as_str(), dest_uid);
                }
            }
            let resolved: Value = serde_json::from_str(&serialized)?;

            let mut doc = info.doc.clone();
            doc["schema"] = info.schema.clone();
            doc["field_rules"] = resolved;

            match ctx
                .api
                .update_content_type(&info.uid, json!({ "content_type": doc }))
                .await
            {
                Ok(_) => debug!(content_type = %info.uid, "Reapplied field rules"),
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(content_type = %info.uid, error = %err, "Failed to reapply field rules");
                    failures.push(AuditRecord::new(info.uid.clone(), err.to_string()));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ModuleImporter for EntriesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Entries
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let mut failures = Vec::new();

        let infos = self.content_type_infos(ctx).await?;
        let locales = self.locales(ctx).await?;
        let mut entry_mapper = ctx.mappers.uid_mapper(ModuleKind::Entries).await?;
        let asset_maps = (
            ctx.mappers
                .uid_mapper(ModuleKind::Assets)
                .await?
                .mappings()
                .clone(),
            ctx.mappers
                .named_mapper(ModuleKind::Assets, cstack_core::constants::URL_MAPPING_FILE)
                .await?
                .mappings()
                .clone(),
        );
        let mut pending_publish: Vec<PendingEntry> = ctx
            .mappers
            .read_side(ModuleKind::Entries, PENDING_PUBLISH_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        self.suppress(ctx, &infos).await?;
        self.create(
            ctx,
            &infos,
            &locales,
            &mut entry_mapper,
            &asset_maps,
            &mut pending_publish,
            &mut summary,
            &mut failures,
        )
        .await?;
        self.repost(
            ctx,
            &infos,
            &locales,
            &entry_mapper,
            &asset_maps,
            &mut summary,
            &mut failures,
        )
        .await?;
        self.unsuppress(ctx, &infos).await?;
        self.remove_bugged_master_entries(ctx, &infos, &locales, &entry_mapper, &mut failures)
            .await?;
        self.update_field_rules(ctx, &infos, &entry_mapper, &mut failures)
            .await?;

        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Entries import finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wants_publish() {
        assert!(wants_publish(&json!({
            "publish_details": [{"environment": "env1", "locale": "en-us"}]
        })));
        assert!(!wants_publish(&json!({"publish_details": []})));
        assert!(!wants_publish(&json!({"title": "no details"})));
    }

    #[test]
    fn test_pending_entry_round_trip() {
        let pending = vec![PendingEntry {
            uid: "blt1".to_string(),
            content_type: "blog".to_string(),
        }];
        let value = serde_json::to_value(&pending).unwrap();
        let back: Vec<PendingEntry> = serde_json::from_value(value).unwrap();
        assert_eq!(back, pending);
    }
}
