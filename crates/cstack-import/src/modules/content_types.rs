//! Content types importer
//!
//! Two-phase import. Phase one seeds every content type as a stub carrying
//! only the built-in `title`/`url` fields, so that by the end of the phase
//! every content type UID exists in the destination. Phase two updates
//! each stub with its real schema, run through the Schema Suppressor —
//! reference fields now validate because their targets were seeded, and
//! cyclic reference graphs import without any topological ordering.
//!
//! `field_rules` cannot be sent yet (their conditions can point at entry
//! UIDs that do not exist), so they are cut out of the schema and parked
//! in a side file for the entries importer. Global fields whose reference
//! fields were dropped at global-field time get their full schema replayed
//! here as a closing pass.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use cstack_api::error::{classify_content_type, classify_generic, ApiOutcome};
use cstack_core::constants::FIELD_RULES_FILE;
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use crate::transform::{suppress_schema, UidReplacements};

use super::global_fields::PENDING_GLOBAL_FIELDS_FILE;
use super::{strip_system_fields, ModuleImporter, ModuleSummary};

pub struct ContentTypesImporter;

/// The stub schema used to seed a content type before its real schema is
/// pushed. Matches the built-in fields every content type starts with.
fn seed_schema() -> Value {
    json!([
        {
            "display_name": "Title",
            "uid": "title",
            "data_type": "text",
            "mandatory": true,
            "unique": true,
            "field_metadata": {"_default": true}
        },
        {
            "display_name": "URL",
            "uid": "url",
            "data_type": "text",
            "mandatory": false,
            "field_metadata": {"_default": true}
        }
    ])
}

impl ContentTypesImporter {
    /// Phase one: make every content type UID exist
    async fn seed(
        &self,
        ctx: &ImportContext,
        content_types: &Map<String, Value>,
        done: &cstack_import_types::UidMapper,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<Vec<String>> {
        let mut seeded = Vec::new();

        for (uid, ct) in content_types {
            if done.has_imported(uid) {
                summary.skipped += 1;
                continue;
            }

            let payload = json!({
                "content_type": {
                    "uid": uid,
                    "title": ct.get("title").cloned().unwrap_or_else(|| Value::String(uid.clone())),
                    "schema": seed_schema(),
                }
            });

            match ctx.api.create_content_type(payload).await {
                Ok(_) => {
                    debug!(content_type = %uid, "Seeded content type stub");
                    seeded.push(uid.clone());
                }
                Err(err) => match classify_content_type(&err) {
                    // An earlier partial run (or a pre-existing type with
                    // the same UID) already created it; the update phase
                    // overwrites the schema either way.
                    ApiOutcome::AlreadyExists => seeded.push(uid.clone()),
                    ApiOutcome::Fatal => return Err(err.into()),
                    ApiOutcome::Transient => {
                        warn!(content_type = %uid, error = %err, "Failed to seed content type");
                        failures.push(AuditRecord::new(uid.clone(), err.to_string()));
                        summary.failed += 1;
                    }
                },
            }
        }

        Ok(seeded)
    }

    /// Phase two: push the real (suppressed) schema onto each stub
    async fn update(
        &self,
        ctx: &ImportContext,
        content_types: &Map<String, Value>,
        seeded: &[String],
        repl: &UidReplacements<'_>,
        mapper: &mut cstack_import_types::UidMapper,
        field_rules: &mut Map<String, Value>,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        for uid in seeded {
            let Some(ct) = content_types.get(uid) else {
                continue;
            };

            let mut doc = strip_system_fields(ct, true);
            if let Some(obj) = doc.as_object_mut() {
                if let Some(rules) = obj.remove("field_rules") {
                    field_rules.insert(uid.clone(), rules);
                }
            }
            let schema = doc.get("schema").cloned().unwrap_or_else(|| json!([]));
            let (suppressed, flags) = suppress_schema(&schema, repl, uid)?;
            doc["schema"] = suppressed;
            debug!(
                content_type = %uid,
                references = flags.has_reference_fields,
                rte = flags.has_rte_entry_refs,
                "Updating content type schema"
            );

            match ctx
                .api
                .update_content_type(uid, json!({ "content_type": doc }))
                .await
            {
                Ok(_) => {
                    // Content type UIDs are stable across stacks; the
                    // mapping exists for resume bookkeeping, not lookup.
                    mapper.record(uid, uid);
                    summary.created += 1;
                }
                Err(err) if classify_content_type(&err) == ApiOutcome::Fatal => {
                    return Err(err.into())
                }
                Err(err) => {
                    warn!(content_type = %uid, error = %err, "Failed to update content type");
                    failures.push(AuditRecord::new(uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        Ok(())
    }

    /// Closing pass: replay the full schema of global fields whose
    /// reference fields were dropped before content types existed
    async fn replay_pending_global_fields(
        &self,
        ctx: &ImportContext,
        repl: &UidReplacements<'_>,
        summary: &mut ModuleSummary,
        failures: &mut Vec<AuditRecord>,
    ) -> ImportResult<()> {
        let pending: Vec<String> = ctx
            .mappers
            .read_side(ModuleKind::GlobalFields, PENDING_GLOBAL_FIELDS_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if pending.is_empty() {
            return Ok(());
        }

        let global_fields = ctx
            .store
            .read_chunked("global_fields", "globalfields.json")
            .await?;
        let gf_mapper = ctx.mappers.uid_mapper(ModuleKind::GlobalFields).await?;
        let mut remaining = Vec::new();

        for uid in pending {
            let Some(field) = global_fields.get(&uid) else {
                continue;
            };
            let dest_uid = gf_mapper.get(&uid).unwrap_or(&uid).to_string();

            let mut doc = strip_system_fields(field, true);
            let schema = doc.get("schema").cloned().unwrap_or_else(|| json!([]));
            let (suppressed, _) = suppress_schema(&schema, repl, &uid)?;
            doc["schema"] = suppressed;

            match ctx
                .api
                .update_global_field(&dest_uid, json!({ "global_field": doc }))
                .await
            {
                Ok(_) => {
                    debug!(global_field = %uid, "Replayed full global field schema");
                    summary.updated += 1;
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(global_field = %uid, error = %err, "Failed to replay global field schema");
                    failures.push(AuditRecord::new(uid.clone(), err.to_string()));
                    summary.failed += 1;
                    remaining.push(uid);
                }
            }
        }

        ctx.mappers
            .write_side(
                ModuleKind::GlobalFields,
                PENDING_GLOBAL_FIELDS_FILE,
                &serde_json::to_value(&remaining)?,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ModuleImporter for ContentTypesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::ContentTypes
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let content_types = ctx
            .store
            .read_chunked("content_types", "content_types.json")
            .await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::ContentTypes).await?;
        let mut failures = Vec::new();

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

        let seeded = self
            .seed(ctx, &content_types, &mapper, &mut summary, &mut failures)
            .await?;

        let mut field_rules: Map<String, Value> = ctx
            .mappers
            .read_side(ModuleKind::ContentTypes, FIELD_RULES_FILE)
            .await?
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        self.update(
            ctx,
            &content_types,
            &seeded,
            &repl,
            &mut mapper,
            &mut field_rules,
            &mut summary,
            &mut failures,
        )
        .await?;
        ctx.mappers
            .write_side(
                ModuleKind::ContentTypes,
                FIELD_RULES_FILE,
                &Value::Object(field_rules),
            )
            .await?;

        self.replay_pending_global_fields(ctx, &repl, &mut summary, &mut failures)
            .await?;

        mapper.flush().await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Content types import finished");
        Ok(summary)
    }
}
