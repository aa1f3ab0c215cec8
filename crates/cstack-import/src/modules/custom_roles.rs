//! Custom roles importer
//!
//! Role rules can pin specific entries, assets and environments by UID;
//! those are rewritten through the other modules' mappers before creation.
//! Built-in roles (Admin, Developer, Content Manager) are never exported,
//! so everything in the backup file is created as-is.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use cstack_api::error::{classify_generic, ApiOutcome};
use cstack_core::constants::DETAILS_FILE;
use cstack_import_types::{AuditRecord, ImportContext, ImportResult, ModuleKind};

use super::{response_uid, strip_system_fields, ModuleImporter, ModuleSummary};

pub struct CustomRolesImporter;

/// UID tables a role's rules can point into
struct RuleMaps {
    entries: HashMap<String, String>,
    assets: HashMap<String, String>,
    environments: HashMap<String, String>,
}

/// Rewrite the UID arrays inside `rules[]` (`{module: "entry", entries:
/// [...]}` and friends) through the matching mapper
fn remap_rules(role: &mut Value, maps: &RuleMaps) {
    let Some(Value::Array(rules)) = role.get_mut("rules") else {
        return;
    };
    for rule in rules {
        let Some(obj) = rule.as_object_mut() else {
            continue;
        };
        let module = obj
            .get("module")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (key, map) = match module.as_str() {
            "entry" => ("entries", &maps.entries),
            "asset" => ("assets", &maps.assets),
            "environment" => ("environments", &maps.environments),
            _ => continue,
        };
        let Some(Value::Array(uids)) = obj.get_mut(key) else {
            continue;
        };
        for uid in uids.iter_mut() {
            if let Some(mapped) = uid.as_str().and_then(|u| map.get(u)) {
                *uid = Value::String(mapped.clone());
            }
        }
    }
}

#[async_trait]
impl ModuleImporter for CustomRolesImporter {
    fn kind(&self) -> ModuleKind {
        ModuleKind::CustomRoles
    }

    async fn run(&self, ctx: &ImportContext) -> ImportResult<ModuleSummary> {
        let mut summary = ModuleSummary::default();
        let roles = ctx.store.read_chunked("custom_roles", "custom_roles.json").await?;
        let mut mapper = ctx.mappers.uid_mapper(ModuleKind::CustomRoles).await?;
        let mut failures = Vec::new();

        let maps = RuleMaps {
            entries: ctx
                .mappers
                .uid_mapper(ModuleKind::Entries)
                .await?
                .mappings()
                .clone(),
            assets: ctx
                .mappers
                .uid_mapper(ModuleKind::Assets)
                .await?
                .mappings()
                .clone(),
            environments: ctx
                .state
                .read()
                .await
                .environments
                .iter()
                .map(|(src, target)| (src.clone(), target.uid.clone()))
                .collect(),
        };

        let mut details: Vec<Value> = ctx
            .mappers
            .read_side(ModuleKind::CustomRoles, DETAILS_FILE)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        for (source_uid, role) in &roles {
            if mapper.has_imported(source_uid) {
                summary.skipped += 1;
                continue;
            }

            let mut doc = strip_system_fields(role, false);
            remap_rules(&mut doc, &maps);

            match ctx.api.create_role(json!({ "role": doc })).await {
                Ok(response) => {
                    let dest_uid =
                        response_uid(&response, "role").unwrap_or_else(|| source_uid.clone());
                    mapper.record(source_uid, dest_uid);
                    details.push(response);
                    summary.created += 1;
                }
                Err(err) if classify_generic(&err) == ApiOutcome::Fatal => return Err(err.into()),
                Err(err) => {
                    warn!(role = %source_uid, error = %err, "Failed to create role");
                    failures.push(AuditRecord::new(source_uid.clone(), err.to_string()));
                    summary.failed += 1;
                }
            }
        }

        mapper.flush().await?;
        ctx.mappers
            .write_side(
                ModuleKind::CustomRoles,
                DETAILS_FILE,
                &serde_json::to_value(&details)?,
            )
            .await?;
        ctx.mappers.record_failure(self.kind(), &failures).await?;
        info!(%summary, "Custom roles import finished");
        Ok(summary)
    }
}
