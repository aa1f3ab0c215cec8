//! Schema Suppressor / Restorer
//!
//! Content types can reference each other and themselves arbitrarily, so a
//! single-pass topological import is impossible in the general case. The
//! suppressor makes the first creation pass succeed anyway: it strips
//! `mandatory`/`unique` from every non-title field, records which content
//! types carry reference fields and JSON-RTE fields that can embed
//! entries, and rewrites extension/global-field UIDs to their destination
//! equivalents. Once all data exists, the restorer puts the original
//! constraints back.

use std::collections::HashMap;

use serde_json::Value;

use cstack_core::constants::MAX_SCHEMA_DEPTH;
use cstack_import_types::{ImportError, ImportResult};

/// What the suppressor learned about a schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaFlags {
    /// Schema contains at least one `reference` field
    pub has_reference_fields: bool,
    /// Schema contains a rich-text/JSON-RTE field that can embed entries
    pub has_rte_entry_refs: bool,
}

impl SchemaFlags {
    fn merge(&mut self, other: &SchemaFlags) {
        self.has_reference_fields |= other.has_reference_fields;
        self.has_rte_entry_refs |= other.has_rte_entry_refs;
    }
}

/// Destination UIDs to substitute while suppressing
#[derive(Debug, Clone, Copy, Default)]
pub struct UidReplacements<'a> {
    pub extensions: Option<&'a HashMap<String, String>>,
    pub global_fields: Option<&'a HashMap<String, String>>,
}

fn is_rte_field(field: &Value) -> bool {
    let data_type = field.get("data_type").and_then(Value::as_str);
    let metadata = field.get("field_metadata");
    let flag = |key: &str| {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    match data_type {
        // JSON-RTE
        Some("json") => flag("allow_json_rte") || flag("rich_text_type"),
        // HTML rich text
        Some("text") => flag("rich_text_type"),
        _ => false,
    }
}

fn suppress_field(
    field: &Value,
    repl: &UidReplacements<'_>,
    flags: &mut SchemaFlags,
    ct_uid: &str,
    depth: usize,
) -> ImportResult<Value> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(ImportError::SchemaTooDeep {
            content_type: ct_uid.to_string(),
            limit: MAX_SCHEMA_DEPTH,
        });
    }

    let mut out = field.clone();
    let Some(obj) = out.as_object_mut() else {
        return Ok(out);
    };

    let uid = obj.get("uid").and_then(Value::as_str).unwrap_or_default().to_string();
    if uid != "title" {
        if obj.contains_key("mandatory") {
            obj.insert("mandatory".to_string(), Value::Bool(false));
        }
        if obj.contains_key("unique") {
            obj.insert("unique".to_string(), Value::Bool(false));
        }
    }

    if let Some(ext_map) = repl.extensions {
        if let Some(ext_uid) = obj.get("extension_uid").and_then(Value::as_str) {
            if let Some(mapped) = ext_map.get(ext_uid) {
                obj.insert("extension_uid".to_string(), Value::String(mapped.clone()));
            }
        }
    }

    match obj.get("data_type").and_then(Value::as_str) {
        Some("reference") => flags.has_reference_fields = true,
        Some("global_field") => {
            if let Some(gf_map) = repl.global_fields {
                if let Some(target) = obj.get("reference_to").and_then(Value::as_str) {
                    if let Some(mapped) = gf_map.get(target) {
                        obj.insert("reference_to".to_string(), Value::String(mapped.clone()));
                    }
                }
            }
        }
        _ => {
            if is_rte_field(field) {
                flags.has_rte_entry_refs = true;
            }
        }
    }

    // Recurse into compound shapes
    if let Some(nested) = obj.get("schema").cloned() {
        let (suppressed, nested_flags) =
            suppress_fields(&nested, repl, ct_uid, depth + 1)?;
        flags.merge(&nested_flags);
        obj.insert("schema".to_string(), suppressed);
    }
    if let Some(Value::Array(blocks)) = obj.get("blocks").cloned() {
        let mut out_blocks = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let mut block_out = block.clone();
            if let Some(block_schema) = block.get("schema") {
                let (suppressed, nested_flags) =
                    suppress_fields(block_schema, repl, ct_uid, depth + 1)?;
                flags.merge(&nested_flags);
                if let Some(block_obj) = block_out.as_object_mut() {
                    block_obj.insert("schema".to_string(), suppressed);
                }
            }
            out_blocks.push(block_out);
        }
        obj.insert("blocks".to_string(), Value::Array(out_blocks));
    }

    Ok(out)
}

fn suppress_fields(
    schema: &Value,
    repl: &UidReplacements<'_>,
    ct_uid: &str,
    depth: usize,
) -> ImportResult<(Value, SchemaFlags)> {
    let mut flags = SchemaFlags::default();
    let Some(fields) = schema.as_array() else {
        return Ok((schema.clone(), flags));
    };
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        out.push(suppress_field(field, repl, &mut flags, ct_uid, depth)?);
    }
    Ok((Value::Array(out), flags))
}

/// Produce the suppressed schema (a new tree) plus what was found in it.
/// `schema` is the content type's field array.
pub fn suppress_schema(
    schema: &Value,
    repl: &UidReplacements<'_>,
    ct_uid: &str,
) -> ImportResult<(Value, SchemaFlags)> {
    suppress_fields(schema, repl, ct_uid, 0)
}

fn restore_field(suppressed: &Value, original: &Value) -> Value {
    let mut out = suppressed.clone();
    let (Some(obj), Some(orig)) = (out.as_object_mut(), original.as_object()) else {
        return out;
    };

    for key in ["mandatory", "unique"] {
        match orig.get(key) {
            Some(value) => {
                obj.insert(key.to_string(), value.clone());
            }
            None => {
                obj.remove(key);
            }
        }
    }

    if let (Some(sub), Some(orig_sub)) = (obj.get("schema").cloned(), orig.get("schema")) {
        obj.insert("schema".to_string(), restore_fields(&sub, orig_sub));
    }
    if let (Some(Value::Array(blocks)), Some(Value::Array(orig_blocks))) =
        (obj.get("blocks").cloned(), orig.get("blocks"))
    {
        let restored: Vec<Value> = blocks
            .iter()
            .enumerate()
            .map(|(i, block)| match orig_blocks.get(i) {
                Some(orig_block) => {
                    let mut block_out = block.clone();
                    if let (Some(bs), Some(obs)) = (block.get("schema"), orig_block.get("schema"))
                    {
                        if let Some(block_obj) = block_out.as_object_mut() {
                            block_obj.insert("schema".to_string(), restore_fields(bs, obs));
                        }
                    }
                    block_out
                }
                None => block.clone(),
            })
            .collect();
        obj.insert("blocks".to_string(), Value::Array(restored));
    }

    out
}

fn restore_fields(suppressed: &Value, original: &Value) -> Value {
    let (Some(fields), Some(orig_fields)) = (suppressed.as_array(), original.as_array()) else {
        return suppressed.clone();
    };
    Value::Array(
        fields
            .iter()
            .enumerate()
            .map(|(i, field)| match orig_fields.get(i) {
                Some(orig) => restore_field(field, orig),
                None => field.clone(),
            })
            .collect(),
    )
}

/// Walk a suppressed schema in lockstep with the original and copy
/// `mandatory`/`unique` back. Lossless modulo `field_rules`, which are
/// handled by their own deferred pass.
pub fn restore_schema(suppressed: &Value, original: &Value) -> Value {
    restore_fields(suppressed, original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> Value {
        json!([
            {"uid": "title", "data_type": "text", "mandatory": true, "unique": true},
            {"uid": "body", "data_type": "text", "mandatory": true,
             "field_metadata": {"rich_text_type": true}},
            {"uid": "author", "data_type": "reference", "reference_to": ["author"],
             "mandatory": true},
            {"uid": "meta", "data_type": "group", "schema": [
                {"uid": "slug", "data_type": "text", "mandatory": true, "unique": true}
            ]},
            {"uid": "sections", "data_type": "blocks", "blocks": [
                {"title": "Hero", "uid": "hero", "schema": [
                    {"uid": "headline", "data_type": "text", "mandatory": true}
                ]}
            ]}
        ])
    }

    #[test]
    fn test_suppress_strips_constraints_except_title() {
        let (suppressed, flags) =
            suppress_schema(&sample_schema(), &UidReplacements::default(), "blog").unwrap();

        let fields = suppressed.as_array().unwrap();
        // title keeps its constraints
        assert_eq!(fields[0]["mandatory"], true);
        assert_eq!(fields[0]["unique"], true);
        // everything else is relaxed, including nested groups and blocks
        assert_eq!(fields[1]["mandatory"], false);
        assert_eq!(fields[2]["mandatory"], false);
        assert_eq!(fields[3]["schema"][0]["mandatory"], false);
        assert_eq!(fields[3]["schema"][0]["unique"], false);
        assert_eq!(fields[4]["blocks"][0]["schema"][0]["mandatory"], false);

        assert!(flags.has_reference_fields);
        assert!(flags.has_rte_entry_refs);
    }

    #[test]
    fn test_suppress_restore_round_trip() {
        let original = sample_schema();
        let (suppressed, _) =
            suppress_schema(&original, &UidReplacements::default(), "blog").unwrap();
        assert_ne!(suppressed, original);

        let restored = restore_schema(&suppressed, &original);
        assert_eq!(restored, original);
    }

    #[test]
    fn test_suppress_rewrites_extension_and_global_field_uids() {
        let schema = json!([
            {"uid": "widget", "data_type": "text", "extension_uid": "old_ext"},
            {"uid": "seo", "data_type": "global_field", "reference_to": "old_gf"}
        ]);
        let extensions = HashMap::from([("old_ext".to_string(), "new_ext".to_string())]);
        let global_fields = HashMap::from([("old_gf".to_string(), "new_gf".to_string())]);
        let repl = UidReplacements {
            extensions: Some(&extensions),
            global_fields: Some(&global_fields),
        };

        let (suppressed, _) = suppress_schema(&schema, &repl, "page").unwrap();
        assert_eq!(suppressed[0]["extension_uid"], "new_ext");
        assert_eq!(suppressed[1]["reference_to"], "new_gf");
    }

    #[test]
    fn test_depth_limit_is_enforced() {
        // Build a group nested beyond the walker limit
        let mut schema = json!([{"uid": "leaf", "data_type": "text", "mandatory": true}]);
        for _ in 0..(MAX_SCHEMA_DEPTH + 2) {
            schema = json!([{"uid": "g", "data_type": "group", "schema": schema}]);
        }

        let result = suppress_schema(&schema, &UidReplacements::default(), "deep");
        assert!(matches!(result, Err(ImportError::SchemaTooDeep { .. })));
    }

    #[test]
    fn test_json_rte_flag_detected() {
        let schema = json!([
            {"uid": "rte", "data_type": "json",
             "field_metadata": {"allow_json_rte": true}, "mandatory": true}
        ]);
        let (_, flags) = suppress_schema(&schema, &UidReplacements::default(), "doc").unwrap();
        assert!(flags.has_rte_entry_refs);
        assert!(!flags.has_reference_fields);
    }

    #[test]
    fn test_fields_without_constraints_stay_untouched() {
        let schema = json!([{"uid": "plain", "data_type": "text"}]);
        let (suppressed, _) = suppress_schema(&schema, &UidReplacements::default(), "ct").unwrap();
        assert!(suppressed[0].get("mandatory").is_none());
        assert!(suppressed[0].get("unique").is_none());
    }
}
