//! Paged resource-to-CSV exporters
//!
//! Each exporter pages through one Management API collection with
//! skip/limit, flattens every row (scalar values printed, nested values
//! serialized as JSON strings) and writes a single CSV file. Column order
//! is the sorted union of keys across all rows, so sparse documents line
//! up.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use cstack_api::ManagementApi;

use crate::csv::format_document;
use crate::error::{ExportError, ExportResult};

/// Settings shared by all exporters
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    pub page_size: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            page_size: 100,
        }
    }
}

fn flatten_row(doc: &Value) -> BTreeMap<String, String> {
    let mut row = BTreeMap::new();
    let Some(obj) = doc.as_object() else {
        return row;
    };
    for (key, value) in obj {
        let rendered = match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            // Nested structures stay inspectable as JSON text
            other => other.to_string(),
        };
        row.insert(key.clone(), rendered);
    }
    row
}

/// Pull the row array out of a paged response: `{"<resource>": [...]}`
/// with an `items` fallback
fn response_rows(response: &Value, resource: &str) -> ExportResult<Vec<Value>> {
    response
        .get(resource)
        .or_else(|| response.get("items"))
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            ExportError::UnexpectedResponse(format!("no '{}' array in response", resource))
        })
}

async fn fetch_all(
    api: &Arc<dyn ManagementApi>,
    resource: &str,
    params: Vec<(String, String)>,
    page_size: usize,
) -> ExportResult<Vec<Value>> {
    let mut rows = Vec::new();
    let mut skip = 0usize;
    loop {
        let mut page_params = params.clone();
        page_params.push(("skip".to_string(), skip.to_string()));
        page_params.push(("limit".to_string(), page_size.to_string()));
        page_params.push(("include_count".to_string(), "true".to_string()));

        let response = api.query(resource, page_params).await?;
        let page = response_rows(&response, resource)?;
        let fetched = page.len();
        rows.extend(page);
        if fetched < page_size {
            break;
        }
        skip += page_size;
    }
    Ok(rows)
}

async fn write_csv(path: &Path, rows: &[Value]) -> ExportResult<()> {
    let mut headers: BTreeSet<String> = BTreeSet::new();
    let flattened: Vec<BTreeMap<String, String>> = rows.iter().map(flatten_row).collect();
    for row in &flattened {
        headers.extend(row.keys().cloned());
    }
    let headers: Vec<String> = headers.into_iter().collect();
    let data: Vec<Vec<String>> = flattened
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(h).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    let document = format_document(&headers, &data);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, document)
        .await
        .map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Exports one content type's entries in one locale
pub struct EntriesExporter {
    pub api: Arc<dyn ManagementApi>,
    pub content_type: String,
    pub locale: String,
}

impl EntriesExporter {
    pub async fn run(&self, options: &ExportOptions) -> ExportResult<PathBuf> {
        let params = vec![
            ("content_type_uid".to_string(), self.content_type.clone()),
            ("locale".to_string(), self.locale.clone()),
        ];
        let rows = fetch_all(&self.api, "entries", params, options.page_size).await?;
        let path = options
            .output_dir
            .join(format!("{}_{}_entries.csv", self.content_type, self.locale));
        write_csv(&path, &rows).await?;
        info!(rows = rows.len(), path = %path.display(), "Exported entries");
        Ok(path)
    }
}

/// Exports the stack's taxonomies with their terms
pub struct TaxonomiesExporter {
    pub api: Arc<dyn ManagementApi>,
}

impl TaxonomiesExporter {
    pub async fn run(&self, options: &ExportOptions) -> ExportResult<PathBuf> {
        let rows = fetch_all(&self.api, "taxonomies", Vec::new(), options.page_size).await?;
        let path = options.output_dir.join("taxonomies.csv");
        write_csv(&path, &rows).await?;
        info!(rows = rows.len(), path = %path.display(), "Exported taxonomies");
        Ok(path)
    }
}

/// Exports the organization's users
pub struct UsersExporter {
    pub api: Arc<dyn ManagementApi>,
}

impl UsersExporter {
    pub async fn run(&self, options: &ExportOptions) -> ExportResult<PathBuf> {
        let rows = fetch_all(&self.api, "users", Vec::new(), options.page_size).await?;
        let path = options.output_dir.join("users.csv");
        write_csv(&path, &rows).await?;
        info!(rows = rows.len(), path = %path.display(), "Exported users");
        Ok(path)
    }
}

/// Exports the organization's teams
pub struct TeamsExporter {
    pub api: Arc<dyn ManagementApi>,
}

impl TeamsExporter {
    pub async fn run(&self, options: &ExportOptions) -> ExportResult<PathBuf> {
        let rows = fetch_all(&self.api, "teams", Vec::new(), options.page_size).await?;
        let path = options.output_dir.join("teams.csv");
        write_csv(&path, &rows).await?;
        info!(rows = rows.len(), path = %path.display(), "Exported teams");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cstack_api::error::ApiResult;
    use cstack_api::{AssetUpload, PublishRequest};

    /// Serves two pages of entries, then an empty page
    #[derive(Default)]
    struct PagedApi {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl ManagementApi for PagedApi {
        async fn query(&self, resource: &str, params: Vec<(String, String)>) -> ApiResult<Value> {
            assert_eq!(resource, "entries");
            let skip: usize = params
                .iter()
                .find(|(k, _)| k == "skip")
                .map(|(_, v)| v.parse().unwrap())
                .unwrap();
            self.queries.fetch_add(1, Ordering::SeqCst);
            let rows = match skip {
                0 => vec![
                    json!({"uid": "blt1", "title": "One", "tags": ["a", "b"]}),
                    json!({"uid": "blt2", "title": "Two, with comma"}),
                ],
                _ => vec![],
            };
            Ok(json!({"entries": rows}))
        }

        async fn find_entries(&self, _: &str, _: &str, _: Value) -> ApiResult<Vec<Value>> {
            unimplemented!()
        }

        async fn publish_entry(&self, _: &str, _: &str, _: PublishRequest) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn publish_asset(&self, _: &str, _: PublishRequest) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn upload_asset(&self, _: AssetUpload) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn replace_asset(&self, _: &str, _: AssetUpload) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn fetch_stack(&self) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_locale(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_environment(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_extension(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn install_app(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_global_field(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_content_type(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_asset_folder(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_label(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_webhook(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_workflow(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_role(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_release(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_personalize_project(&self, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn update_locale(&self, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn update_global_field(&self, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn update_content_type(&self, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_entry(&self, _: &str, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn update_entry(&self, _: &str, _: &str, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn delete_entry(&self, _: &str, _: &str, _: &str) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn add_release_items(&self, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }

        async fn create_variant_group(&self, _: &str, _: Value) -> ApiResult<Value> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_entries_export_pages_and_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(PagedApi::default());
        let exporter = EntriesExporter {
            api: api.clone() as Arc<dyn ManagementApi>,
            content_type: "blog".to_string(),
            locale: "en-us".to_string(),
        };
        let options = ExportOptions {
            output_dir: dir.path().to_path_buf(),
            page_size: 2,
        };

        let path = exporter.run(&options).await.unwrap();
        assert_eq!(api.queries.load(Ordering::SeqCst), 2);

        let csv = std::fs::read_to_string(path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("tags,title,uid"));
        // Nested array serialized as JSON, quoted because of the comma
        assert_eq!(lines.next(), Some("\"[\"\"a\"\",\"\"b\"\"]\",One,blt1"));
        assert_eq!(lines.next(), Some(",\"Two, with comma\",blt2"));
    }

    #[test]
    fn test_flatten_row_renders_scalars_and_nests() {
        let row = flatten_row(&json!({
            "uid": "blt1",
            "count": 3,
            "live": true,
            "empty": null,
            "nested": {"a": 1}
        }));
        assert_eq!(row["uid"], "blt1");
        assert_eq!(row["count"], "3");
        assert_eq!(row["live"], "true");
        assert_eq!(row["empty"], "");
        assert_eq!(row["nested"], "{\"a\":1}");
    }
}
