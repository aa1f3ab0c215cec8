//! Reference Resolver
//!
//! Rewrites source UIDs and asset URLs embedded in an entry document to
//! their destination equivalents. The walk is schema-driven (field
//! semantics come from the content type, not the document shape), and the
//! substitution strategy is deliberately whole-document: after collecting
//! the reference UIDs a schema walk found, one serialize-and-replace pass
//! rewrites every exact-token occurrence of each mapped UID anywhere in the
//! document. A UID embedded inside a longer token is never rewritten.
//!
//! Resolution never fails on a missing mapping. Unmapped UIDs are recorded
//! in the [`ResolutionLog`] and left as-is, so one dangling reference never
//! blocks an entire entry.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use cstack_core::constants::MAX_SCHEMA_DEPTH;
use cstack_import_types::{ImportError, ImportResult};

/// Old -> new mapping tables consulted during resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceMaps<'a> {
    pub entries: Option<&'a HashMap<String, String>>,
    pub assets: Option<&'a HashMap<String, String>>,
    pub asset_urls: Option<&'a HashMap<String, String>>,
}

/// Side record of what resolution did, persisted for auditability
#[derive(Debug, Clone, Default)]
pub struct ResolutionLog {
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
}

fn push_uid(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(uid) => out.push(uid.clone()),
        Value::Object(obj) => {
            // Single-content-type legacy shape {uid} and multi-content-type
            // shape {uid, _content_type_uid} both carry the UID here
            if let Some(Value::String(uid)) = obj.get("uid") {
                out.push(uid.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                push_uid(item, out);
            }
        }
        _ => {}
    }
}

fn walk(
    schema: &Value,
    doc: &Value,
    entry_uids: &mut Vec<String>,
    asset_uids: &mut Vec<String>,
    ct_uid: &str,
    depth: usize,
) -> ImportResult<()> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(ImportError::SchemaTooDeep {
            content_type: ct_uid.to_string(),
            limit: MAX_SCHEMA_DEPTH,
        });
    }
    let Some(fields) = schema.as_array() else {
        return Ok(());
    };

    for field in fields {
        let Some(uid) = field.get("uid").and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = doc.get(uid) else {
            continue;
        };

        match field.get("data_type").and_then(Value::as_str) {
            Some("reference") => push_uid(value, entry_uids),
            Some("file") => push_uid(value, asset_uids),
            Some("group") | Some("global_field") => {
                if let Some(nested) = field.get("schema") {
                    match value {
                        Value::Array(items) => {
                            for item in items {
                                walk(nested, item, entry_uids, asset_uids, ct_uid, depth + 1)?;
                            }
                        }
                        other => {
                            walk(nested, other, entry_uids, asset_uids, ct_uid, depth + 1)?
                        }
                    }
                }
            }
            Some("blocks") => {
                let Some(blocks) = field.get("blocks").and_then(Value::as_array) else {
                    continue;
                };
                let Some(instances) = value.as_array() else {
                    continue;
                };
                for instance in instances {
                    let Some(obj) = instance.as_object() else {
                        continue;
                    };
                    for (block_uid, block_value) in obj {
                        let block_schema = blocks.iter().find_map(|b| {
                            (b.get("uid").and_then(Value::as_str) == Some(block_uid))
                                .then(|| b.get("schema"))
                                .flatten()
                        });
                        if let Some(block_schema) = block_schema {
                            walk(
                                block_schema,
                                block_value,
                                entry_uids,
                                asset_uids,
                                ct_uid,
                                depth + 1,
                            )?;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Empty out every `reference` field so the first creation pass cannot
/// dangle. The stripped values are re-derived from the source document in
/// the repost pass.
pub fn strip_entry_references(schema: &Value, doc: &Value, ct_uid: &str) -> ImportResult<Value> {
    fn strip(schema: &Value, doc: &Value, ct_uid: &str, depth: usize) -> ImportResult<Value> {
        if depth > MAX_SCHEMA_DEPTH {
            return Err(ImportError::SchemaTooDeep {
                content_type: ct_uid.to_string(),
                limit: MAX_SCHEMA_DEPTH,
            });
        }
        let mut out = doc.clone();
        let (Some(fields), Some(obj)) = (schema.as_array(), out.as_object_mut()) else {
            return Ok(out);
        };

        for field in fields {
            let Some(uid) = field.get("uid").and_then(Value::as_str) else {
                continue;
            };
            if !obj.contains_key(uid) {
                continue;
            }
            match field.get("data_type").and_then(Value::as_str) {
                Some("reference") => {
                    obj.insert(uid.to_string(), Value::Array(Vec::new()));
                }
                Some("group") | Some("global_field") => {
                    if let Some(nested) = field.get("schema") {
                        let value = obj[uid].clone();
                        let stripped = match value {
                            Value::Array(items) => Value::Array(
                                items
                                    .iter()
                                    .map(|item| strip(nested, item, ct_uid, depth + 1))
                                    .collect::<ImportResult<Vec<_>>>()?,
                            ),
                            other => strip(nested, &other, ct_uid, depth + 1)?,
                        };
                        obj.insert(uid.to_string(), stripped);
                    }
                }
                Some("blocks") => {
                    let blocks = field.get("blocks").and_then(Value::as_array).cloned();
                    let Some(blocks) = blocks else { continue };
                    let Some(Value::Array(instances)) = obj.get(uid).cloned() else {
                        continue;
                    };
                    let mut out_instances = Vec::with_capacity(instances.len());
                    for instance in &instances {
                        let mut out_instance = instance.clone();
                        if let Some(inst_obj) = out_instance.as_object_mut() {
                            let keys: Vec<String> = inst_obj.keys().cloned().collect();
                            for block_uid in keys {
                                let block_schema = blocks.iter().find_map(|b| {
                                    (b.get("uid").and_then(Value::as_str)
                                        == Some(block_uid.as_str()))
                                    .then(|| b.get("schema"))
                                    .flatten()
                                });
                                if let Some(block_schema) = block_schema {
                                    let stripped = strip(
                                        block_schema,
                                        &inst_obj[&block_uid],
                                        ct_uid,
                                        depth + 1,
                                    )?;
                                    inst_obj.insert(block_uid, stripped);
                                }
                            }
                        }
                        out_instances.push(out_instance);
                    }
                    obj.insert(uid.to_string(), Value::Array(out_instances));
                }
                _ => {}
            }
        }
        Ok(out)
    }
    strip(schema, doc, ct_uid, 0)
}

/// Contentstack asset download URLs (v2 upload and v3 asset shapes)
fn asset_url_regex() -> Regex {
    Regex::new(
        r"https://(?:(?:assets|images)\.contentstack\.io/v3/assets|api\.contentstack\.io/v2/uploads)/[A-Za-z0-9._/\-]+",
    )
    .expect("static asset URL pattern")
}

/// Resolve entry references, asset references and raw asset URLs in a
/// document. Returns the rewritten document plus the resolution log.
pub fn resolve_references(
    schema: &Value,
    doc: &Value,
    maps: &ReferenceMaps<'_>,
    ct_uid: &str,
) -> ImportResult<(Value, ResolutionLog)> {
    let mut entry_uids = Vec::new();
    let mut asset_uids = Vec::new();
    walk(schema, doc, &mut entry_uids, &mut asset_uids, ct_uid, 0)?;
    entry_uids.sort();
    entry_uids.dedup();
    asset_uids.sort();
    asset_uids.dedup();

    let mut log = ResolutionLog::default();
    let mut serialized = serde_json::to_string(doc)?;

    // One pass per unique UID over the whole serialized document
    for (uids, map) in [(&entry_uids, maps.entries), (&asset_uids, maps.assets)] {
        for uid in uids {
            match map.and_then(|m| m.get(uid)) {
                Some(dest) => {
                    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(uid)))
                        .map_err(|e| ImportError::Internal(e.to_string()))?;
                    serialized = pattern.replace_all(&serialized, dest.as_str()).into_owned();
                    log.matched.push(uid.clone());
                }
                None => log.unmatched.push(uid.clone()),
            }
        }
    }

    // Raw asset URLs in markdown/rich-text bodies
    if let Some(url_map) = maps.asset_urls {
        let url_pattern = asset_url_regex();
        let found: Vec<String> = url_pattern
            .find_iter(&serialized)
            .map(|m| m.as_str().to_string())
            .collect();
        for url in found {
            match url_map.get(&url) {
                Some(dest) => {
                    serialized = serialized.replace(&url, dest);
                    log.matched.push(url);
                }
                None => log.unmatched.push(url),
            }
        }
    }

    let resolved: Value = serde_json::from_str(&serialized)?;
    Ok((resolved, log))
}
