//! JSON-RTE embedded reference handling
//!
//! Rich-text ASTs can embed entry and asset references as nodes of
//! `type: "reference"`. Embedded entries cannot exist before the entries
//! they point to, so they are stripped before the first creation pass and
//! resolved back in during the repost pass, once every entry in the locale
//! exists. Asset nodes are rewritten in place, since assets are imported
//! before entries.

use std::collections::HashMap;

use serde_json::Value;

fn node_ref_type(node: &Value) -> Option<&str> {
    if node.get("type").and_then(Value::as_str) != Some("reference") {
        return None;
    }
    node.get("attrs")
        .and_then(|attrs| attrs.get("type"))
        .and_then(Value::as_str)
}

fn is_entry_node(node: &Value) -> bool {
    node_ref_type(node) == Some("entry")
}

fn is_asset_node(node: &Value) -> bool {
    node_ref_type(node) == Some("asset")
}

/// Remove every embedded-entry reference node anywhere in the document,
/// returning the stripped document and how many nodes were dropped.
pub fn strip_embedded_entries(doc: &Value) -> (Value, usize) {
    fn strip(value: &Value, dropped: &mut usize) -> Value {
        match value {
            Value::Array(items) => {
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    if is_entry_node(item) {
                        *dropped += 1;
                    } else {
                        kept.push(strip(item, dropped));
                    }
                }
                Value::Array(kept)
            }
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), strip(v, dropped)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    let mut dropped = 0;
    let stripped = strip(doc, &mut dropped);
    (stripped, dropped)
}

/// Rewrite embedded-entry nodes whose UIDs are resolvable and strip the
/// ones that are not. Used in the repost pass, where the full entry UID
/// map has been accumulated. Returns the document plus the count of nodes
/// that still had no mapping.
pub fn resolve_embedded_entries(doc: &Value, entry_map: &HashMap<String, String>) -> (Value, usize) {
    fn resolve(value: &Value, entry_map: &HashMap<String, String>, unresolved: &mut usize) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .filter_map(|item| {
                        if is_entry_node(item) {
                            let uid = item
                                .get("attrs")
                                .and_then(|a| a.get("entry-uid"))
                                .and_then(Value::as_str);
                            match uid.and_then(|u| entry_map.get(u)) {
                                Some(dest) => {
                                    let mut node = item.clone();
                                    if let Some(attrs) =
                                        node.get_mut("attrs").and_then(Value::as_object_mut)
                                    {
                                        attrs.insert(
                                            "entry-uid".to_string(),
                                            Value::String(dest.clone()),
                                        );
                                    }
                                    Some(node)
                                }
                                None => {
                                    *unresolved += 1;
                                    None
                                }
                            }
                        } else {
                            Some(resolve(item, entry_map, unresolved))
                        }
                    })
                    .collect(),
            ),
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), resolve(v, entry_map, unresolved)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    let mut unresolved = 0;
    let resolved = resolve(doc, entry_map, &mut unresolved);
    (resolved, unresolved)
}

/// Rewrite embedded-asset nodes: `asset-uid` through the asset UID map and
/// `href`/`asset-link` through the asset URL map. Unmapped nodes are left
/// as-is.
pub fn rewrite_asset_nodes(
    doc: &Value,
    asset_uids: &HashMap<String, String>,
    asset_urls: &HashMap<String, String>,
) -> Value {
    fn rewrite(
        value: &Value,
        asset_uids: &HashMap<String, String>,
        asset_urls: &HashMap<String, String>,
    ) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| rewrite(item, asset_uids, asset_urls))
                    .collect(),
            ),
            Value::Object(_) if is_asset_node(value) => {
                let mut node = value.clone();
                if let Some(attrs) = node.get_mut("attrs").and_then(Value::as_object_mut) {
                    if let Some(Value::String(uid)) = attrs.get("asset-uid") {
                        if let Some(dest) = asset_uids.get(uid) {
                            attrs.insert("asset-uid".to_string(), Value::String(dest.clone()));
                        }
                    }
                    for key in ["href", "asset-link"] {
                        if let Some(Value::String(url)) = attrs.get(key) {
                            if let Some(dest) = asset_urls.get(url) {
                                attrs.insert(key.to_string(), Value::String(dest.clone()));
                            }
                        }
                    }
                }
                node
            }
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), rewrite(v, asset_uids, asset_urls)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    rewrite(doc, asset_uids, asset_urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rte_doc() -> Value {
        json!({
            "body": {
                "type": "doc",
                "children": [
                    {"type": "p", "children": [{"text": "hello"}]},
                    {"type": "reference", "attrs": {"type": "entry", "entry-uid": "blt_e1"}},
                    {"type": "reference", "attrs": {
                        "type": "asset",
                        "asset-uid": "blt_a1",
                        "asset-link": "https://images.contentstack.io/v3/assets/s1/blt_a1/f.png"
                    }}
                ]
            }
        })
    }

    #[test]
    fn test_strip_removes_only_entry_nodes() {
        let (stripped, dropped) = strip_embedded_entries(&rte_doc());
        assert_eq!(dropped, 1);

        let children = stripped["body"]["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|n| !is_entry_node(n)));
        // Asset node survives
        assert!(children.iter().any(is_asset_node));
    }

    #[test]
    fn test_resolve_rewrites_mapped_and_strips_unmapped() {
        let doc = json!({
            "body": {"children": [
                {"type": "reference", "attrs": {"type": "entry", "entry-uid": "blt_known"}},
                {"type": "reference", "attrs": {"type": "entry", "entry-uid": "blt_unknown"}}
            ]}
        });
        let map = HashMap::from([("blt_known".to_string(), "blt_dest".to_string())]);

        let (resolved, unresolved) = resolve_embedded_entries(&doc, &map);
        assert_eq!(unresolved, 1);

        let children = resolved["body"]["children"].as_array().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0]["attrs"]["entry-uid"], "blt_dest");
    }

    #[test]
    fn test_asset_nodes_rewritten_in_place() {
        let uids = HashMap::from([("blt_a1".to_string(), "blt_a9".to_string())]);
        let urls = HashMap::from([(
            "https://images.contentstack.io/v3/assets/s1/blt_a1/f.png".to_string(),
            "https://images.contentstack.io/v3/assets/s2/blt_a9/f.png".to_string(),
        )]);

        let rewritten = rewrite_asset_nodes(&rte_doc(), &uids, &urls);
        let children = rewritten["body"]["children"].as_array().unwrap();
        let asset = children.iter().find(|n| is_asset_node(n)).unwrap();
        assert_eq!(asset["attrs"]["asset-uid"], "blt_a9");
        assert!(asset["attrs"]["asset-link"]
            .as_str()
            .unwrap()
            .contains("s2/blt_a9"));
    }

    #[test]
    fn test_unmapped_asset_node_left_as_is() {
        let rewritten = rewrite_asset_nodes(&rte_doc(), &HashMap::new(), &HashMap::new());
        let children = rewritten["body"]["children"].as_array().unwrap();
        let asset = children.iter().find(|n| is_asset_node(n)).unwrap();
        assert_eq!(asset["attrs"]["asset-uid"], "blt_a1");
    }
}
