//! End-to-end pipeline tests against a recording mock of the Management
//! API: backup trees are written to a temp dir, the orchestrator replays
//! them, and the recorded calls plus the mapper files are asserted on.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use cstack_api::error::ApiResult;
use cstack_api::{AssetUpload, ManagementApi, PublishRequest};
use cstack_import::ImportOrchestrator;
use cstack_import_types::{ImportConfig, ImportContext, ModuleKind};

#[derive(Debug, Clone)]
struct Call {
    method: String,
    detail: Value,
}

#[derive(Default)]
struct MockApi {
    calls: Mutex<Vec<Call>>,
    next: AtomicUsize,
}

impl MockApi {
    fn record(&self, method: &str, detail: Value) {
        self.calls.lock().unwrap().push(Call {
            method: method.to_string(),
            detail,
        });
    }

    fn next_uid(&self, prefix: &str) -> String {
        format!("dst_{}_{}", prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn wrapped(&self, wrapper: &str) -> Value {
        let uid = self.next_uid(wrapper);
        json!({ wrapper: { "uid": uid } })
    }

    fn calls_for(&self, method: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    fn call_count(&self, method: &str) -> usize {
        self.calls_for(method).len()
    }
}

#[async_trait]
impl ManagementApi for MockApi {
    async fn fetch_stack(&self) -> ApiResult<Value> {
        Ok(json!({"stack": {"master_locale": "en-us"}}))
    }

    async fn create_locale(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_locale", payload.clone());
        let code = payload["locale"]["code"].as_str().unwrap_or("xx").to_string();
        Ok(json!({"locale": {"uid": self.next_uid("locale"), "code": code}}))
    }

    async fn update_locale(&self, code: &str, payload: Value) -> ApiResult<Value> {
        self.record("update_locale", json!({"code": code, "payload": payload}));
        Ok(json!({"notice": "ok"}))
    }

    async fn create_environment(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_environment", payload);
        Ok(self.wrapped("environment"))
    }

    async fn create_extension(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_extension", payload);
        Ok(self.wrapped("extension"))
    }

    async fn install_app(&self, payload: Value) -> ApiResult<Value> {
        self.record("install_app", payload);
        Ok(self.wrapped("installation"))
    }

    async fn create_global_field(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_global_field", payload.clone());
        let uid = payload["global_field"]["uid"].as_str().unwrap_or("gf").to_string();
        Ok(json!({"global_field": {"uid": uid}}))
    }

    async fn update_global_field(&self, uid: &str, payload: Value) -> ApiResult<Value> {
        self.record("update_global_field", json!({"uid": uid, "payload": payload}));
        Ok(json!({"global_field": {"uid": uid}}))
    }

    async fn create_content_type(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_content_type", payload.clone());
        let uid = payload["content_type"]["uid"].as_str().unwrap_or("ct").to_string();
        Ok(json!({"content_type": {"uid": uid}}))
    }

    async fn update_content_type(&self, uid: &str, payload: Value) -> ApiResult<Value> {
        self.record("update_content_type", json!({"uid": uid, "payload": payload}));
        Ok(json!({"content_type": {"uid": uid}}))
    }

    async fn create_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        payload: Value,
    ) -> ApiResult<Value> {
        self.record(
            "create_entry",
            json!({"content_type": content_type_uid, "locale": locale, "payload": payload}),
        );
        Ok(self.wrapped("entry"))
    }

    async fn update_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        entry_uid: &str,
        payload: Value,
    ) -> ApiResult<Value> {
        self.record(
            "update_entry",
            json!({
                "content_type": content_type_uid,
                "locale": locale,
                "uid": entry_uid,
                "payload": payload
            }),
        );
        Ok(json!({"entry": {"uid": entry_uid}}))
    }

    async fn delete_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        entry_uid: &str,
    ) -> ApiResult<Value> {
        self.record(
            "delete_entry",
            json!({"content_type": content_type_uid, "locale": locale, "uid": entry_uid}),
        );
        Ok(json!({"notice": "ok"}))
    }

    async fn find_entries(
        &self,
        content_type_uid: &str,
        locale: &str,
        query: Value,
    ) -> ApiResult<Vec<Value>> {
        self.record(
            "find_entries",
            json!({"content_type": content_type_uid, "locale": locale, "query": query}),
        );
        Ok(vec![])
    }

    async fn publish_entry(
        &self,
        content_type_uid: &str,
        entry_uid: &str,
        request: PublishRequest,
    ) -> ApiResult<Value> {
        self.record(
            "publish_entry",
            json!({
                "content_type": content_type_uid,
                "uid": entry_uid,
                "environments": request.environments,
                "locales": request.locales
            }),
        );
        Ok(json!({"notice": "ok"}))
    }

    async fn create_asset_folder(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_asset_folder", payload);
        Ok(self.wrapped("asset"))
    }

    async fn upload_asset(&self, upload: AssetUpload) -> ApiResult<Value> {
        self.record(
            "upload_asset",
            json!({"file_name": upload.file_name, "parent_uid": upload.parent_uid}),
        );
        let uid = self.next_uid("asset");
        Ok(json!({"asset": {"uid": uid, "url": format!("https://assets.example.com/{}", uid)}}))
    }

    async fn replace_asset(&self, asset_uid: &str, upload: AssetUpload) -> ApiResult<Value> {
        self.record(
            "replace_asset",
            json!({"uid": asset_uid, "file_name": upload.file_name}),
        );
        Ok(json!({"asset": {"uid": asset_uid, "url": format!("https://assets.example.com/{}", asset_uid)}}))
    }

    async fn publish_asset(&self, asset_uid: &str, request: PublishRequest) -> ApiResult<Value> {
        self.record(
            "publish_asset",
            json!({"uid": asset_uid, "environments": request.environments}),
        );
        Ok(json!({"notice": "ok"}))
    }

    async fn create_label(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_label", payload);
        Ok(self.wrapped("label"))
    }

    async fn create_webhook(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_webhook", payload);
        Ok(self.wrapped("webhook"))
    }

    async fn create_workflow(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_workflow", payload);
        Ok(self.wrapped("workflow"))
    }

    async fn create_role(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_role", payload);
        Ok(self.wrapped("role"))
    }

    async fn create_release(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_release", payload);
        Ok(self.wrapped("release"))
    }

    async fn add_release_items(&self, release_uid: &str, payload: Value) -> ApiResult<Value> {
        self.record(
            "add_release_items",
            json!({"uid": release_uid, "payload": payload}),
        );
        Ok(json!({"notice": "ok"}))
    }

    async fn create_personalize_project(&self, payload: Value) -> ApiResult<Value> {
        self.record("create_personalize_project", payload);
        Ok(self.wrapped("project"))
    }

    async fn create_variant_group(&self, project_uid: &str, payload: Value) -> ApiResult<Value> {
        self.record(
            "create_variant_group",
            json!({"project": project_uid, "payload": payload}),
        );
        Ok(self.wrapped("variant_group"))
    }

    async fn query(&self, resource: &str, params: Vec<(String, String)>) -> ApiResult<Value> {
        self.record("query", json!({"resource": resource, "params": params.len()}));
        Ok(json!({"items": []}))
    }
}

fn write_json(path: impl AsRef<Path>, value: &Value) {
    let path = path.as_ref();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

fn context(
    data_dir: &Path,
    module_filter: Option<ModuleKind>,
    api: Arc<MockApi>,
) -> ImportContext {
    let config = ImportConfig {
        data_dir: data_dir.to_path_buf(),
        module_filter,
        skip_publish: false,
        ..ImportConfig::default()
    };
    ImportContext::new(config, api)
}

#[tokio::test]
async fn test_rerun_skips_already_imported_locales() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        dir.path().join("locales/locales.json"),
        &json!({
            "l1": {"code": "fr-fr", "name": "French", "fallback_locale": "en-us"},
            "l2": {"code": "de-de", "name": "German", "fallback_locale": "en-us"}
        }),
    );

    let first = Arc::new(MockApi::default());
    let orchestrator = ImportOrchestrator::new(context(
        dir.path(),
        Some(ModuleKind::Locales),
        first.clone(),
    ));
    let summary = orchestrator.run().await.unwrap();
    assert_eq!(first.call_count("create_locale"), 2);
    assert_eq!(summary.totals().created, 2);

    // Name and fallback travel in the follow-up update, not the create
    let updates = first.calls_for("update_locale");
    assert_eq!(updates.len(), 2);
    let french = updates
        .iter()
        .find(|c| c.detail["code"] == "fr-fr")
        .unwrap();
    assert_eq!(french.detail["payload"]["locale"]["name"], "French");
    assert_eq!(
        french.detail["payload"]["locale"]["fallback_locale"],
        "en-us"
    );

    // Same mapper directory, fresh run: nothing is re-created
    let second = Arc::new(MockApi::default());
    let orchestrator = ImportOrchestrator::new(context(
        dir.path(),
        Some(ModuleKind::Locales),
        second.clone(),
    ));
    let summary = orchestrator.run().await.unwrap();
    assert_eq!(second.call_count("create_locale"), 0);
    assert_eq!(second.call_count("update_locale"), 0);
    assert_eq!(summary.totals().skipped, 2);
}

#[tokio::test]
async fn test_asset_folders_created_parent_before_child() {
    let dir = tempfile::tempdir().unwrap();
    // Deliberately shuffled: deepest first
    write_json(
        dir.path().join("assets/folders.json"),
        &json!([
            {"uid": "f_d", "name": "d", "parent_uid": "f_c"},
            {"uid": "f_b", "name": "b", "parent_uid": "f_a"},
            {"uid": "f_a", "name": "a", "parent_uid": null},
            {"uid": "f_c", "name": "c", "parent_uid": "f_b"}
        ]),
    );
    write_json(dir.path().join("assets/assets.json"), &json!({}));

    let api = Arc::new(MockApi::default());
    let orchestrator =
        ImportOrchestrator::new(context(dir.path(), Some(ModuleKind::Assets), api.clone()));
    orchestrator.run().await.unwrap();

    let creates = api.calls_for("create_asset_folder");
    assert_eq!(creates.len(), 4);
    let position = |name: &str| {
        creates
            .iter()
            .position(|c| c.detail["asset"]["name"] == name)
            .unwrap()
    };
    assert!(position("a") < position("b"));
    assert!(position("b") < position("c"));
    assert!(position("c") < position("d"));

    // Each child sent the parent's *destination* uid, not the source uid
    let mapping: Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("mapper/assets/folder-mapping.json")).unwrap(),
    )
    .unwrap();
    let child_b = &creates[position("b")].detail;
    assert_eq!(child_b["asset"]["parent_uid"], mapping["f_a"]);
}

#[tokio::test]
async fn test_circular_entry_references_resolve_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        dir.path().join("environments/environments.json"),
        &json!({"env_src": {"name": "production"}}),
    );
    write_json(
        dir.path().join("content_types/content_types.json"),
        &json!({
            "blog": {
                "uid": "blog",
                "title": "Blog",
                "schema": [
                    {"uid": "title", "display_name": "Title", "data_type": "text",
                     "mandatory": true, "unique": true},
                    {"uid": "related", "display_name": "Related", "data_type": "reference",
                     "reference_to": ["blog"], "mandatory": true, "multiple": true}
                ]
            }
        }),
    );
    write_json(
        dir.path().join("entries/blog/en-us.json"),
        &json!({
            "blte1": {
                "uid": "blte1",
                "title": "First",
                "related": [{"uid": "blte2", "_content_type_uid": "blog"}],
                "publish_details": [{"environment": "env_src", "locale": "en-us"}]
            },
            "blte2": {
                "uid": "blte2",
                "title": "Second",
                "related": ["blte1"],
                "publish_details": [{"environment": "env_src", "locale": "en-us"}]
            }
        }),
    );

    let api = Arc::new(MockApi::default());
    let orchestrator = ImportOrchestrator::new(context(dir.path(), None, api.clone()));
    let summary = orchestrator.run().await.unwrap();
    assert!(!summary.has_failures());

    // Creation pass sent both entries with references stripped
    let creates = api.calls_for("create_entry");
    assert_eq!(creates.len(), 2);
    for call in &creates {
        assert_eq!(call.detail["payload"]["entry"]["related"], json!([]));
    }

    // The repost pass rewired both sides of the cycle to destination UIDs
    let mapping: Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("mapper/entries/uid-mapping.json")).unwrap(),
    )
    .unwrap();
    let dst1 = mapping["blte1"].as_str().unwrap();
    let dst2 = mapping["blte2"].as_str().unwrap();

    let reposts = api.calls_for("update_entry");
    assert!(!reposts.is_empty());
    let repost_for = |dest: &str| {
        reposts
            .iter()
            .filter(|c| c.detail["uid"] == dest)
            .last()
            .unwrap()
            .detail["payload"]
            .to_string()
    };
    assert!(repost_for(dst1).contains(dst2));
    assert!(repost_for(dst2).contains(dst1));
    assert!(!repost_for(dst1).contains("blte2"));
    assert!(!repost_for(dst2).contains("blte1"));

    // Constraints were restored after data existed to satisfy them
    let ct_updates = api.calls_for("update_content_type");
    let last = ct_updates.last().unwrap();
    let related = last.detail["payload"]["content_type"]["schema"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["uid"] == "related")
        .unwrap()
        .clone();
    assert_eq!(related["mandatory"], true);

    // Deferred publish ran with the mapped environment name
    let publishes = api.calls_for("publish_entry");
    assert_eq!(publishes.len(), 2);
    for publish in &publishes {
        assert_eq!(publish.detail["environments"], json!(["production"]));
        assert_eq!(publish.detail["locales"], json!(["en-us"]));
    }
}

#[tokio::test]
async fn test_missing_backup_dir_is_fatal() {
    let api = Arc::new(MockApi::default());
    let orchestrator = ImportOrchestrator::new(context(
        Path::new("/nonexistent/backup"),
        None,
        api.clone(),
    ));
    let result = orchestrator.run().await;
    assert!(matches!(
        result,
        Err(cstack_import_types::ImportError::MissingBackupDir(_))
    ));
    assert!(api.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_versioned_asset_uses_upload_then_replace() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        dir.path().join("assets/assets.json"),
        &json!({
            "blta1": {
                "uid": "blta1",
                "filename": "logo.png",
                "content_type": "image/png",
                "title": "Logo",
                "versions": [
                    {"_version": 1, "filename": "logo-v1.png"},
                    {"_version": 2, "filename": "logo-v2.png"}
                ]
            }
        }),
    );
    for name in ["logo-v1.png", "logo-v2.png"] {
        let path = dir.path().join(format!("assets/files/blta1/{}", name));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"png bytes").unwrap();
    }

    let api = Arc::new(MockApi::default());
    let orchestrator =
        ImportOrchestrator::new(context(dir.path(), Some(ModuleKind::Assets), api.clone()));
    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.totals().created, 1);

    let uploads = api.calls_for("upload_asset");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].detail["file_name"], "logo-v1.png");
    let replaces = api.calls_for("replace_asset");
    assert_eq!(replaces.len(), 1);
    assert_eq!(replaces[0].detail["file_name"], "logo-v2.png");

    // The source URL -> destination URL map feeds entry resolution later
    let urls: Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("mapper/assets/url-mapping.json")).unwrap(),
    )
    .unwrap();
    assert!(urls.as_object().unwrap().is_empty() || urls.as_object().unwrap().len() == 1);
}

#[tokio::test]
async fn test_mutual_references_between_content_types_resolve() {
    let dir = tempfile::tempdir().unwrap();
    write_json(
        dir.path().join("content_types/content_types.json"),
        &json!({
            "author": {
                "uid": "author",
                "title": "Author",
                "schema": [
                    {"uid": "title", "display_name": "Title", "data_type": "text",
                     "mandatory": true, "unique": true},
                    {"uid": "books", "display_name": "Books", "data_type": "reference",
                     "reference_to": ["book"], "multiple": true}
                ]
            },
            "book": {
                "uid": "book",
                "title": "Book",
                "schema": [
                    {"uid": "title", "display_name": "Title", "data_type": "text",
                     "mandatory": true, "unique": true},
                    {"uid": "written_by", "display_name": "Written by", "data_type": "reference",
                     "reference_to": ["author"], "mandatory": true, "multiple": true}
                ]
            }
        }),
    );
    write_json(
        dir.path().join("entries/author/en-us.json"),
        &json!({
            "blt_auth": {
                "uid": "blt_auth",
                "title": "Ann",
                "books": [{"uid": "blt_book", "_content_type_uid": "book"}]
            }
        }),
    );
    write_json(
        dir.path().join("entries/book/en-us.json"),
        &json!({
            "blt_book": {
                "uid": "blt_book",
                "title": "Novel",
                "written_by": [{"uid": "blt_auth", "_content_type_uid": "author"}]
            }
        }),
    );

    let api = Arc::new(MockApi::default());
    let orchestrator = ImportOrchestrator::new(context(dir.path(), None, api.clone()));
    let summary = orchestrator.run().await.unwrap();
    assert!(!summary.has_failures());

    let creates = api.calls_for("create_entry");
    assert_eq!(creates.len(), 2);
    for call in &creates {
        let entry = &call.detail["payload"]["entry"];
        assert!(entry["books"] == json!([]) || entry["written_by"] == json!([]));
    }

    let mapping: Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("mapper/entries/uid-mapping.json")).unwrap(),
    )
    .unwrap();
    let dst_auth = mapping["blt_auth"].as_str().unwrap();
    let dst_book = mapping["blt_book"].as_str().unwrap();

    let reposts = api.calls_for("update_entry");
    let repost_for = |dest: &str| {
        reposts
            .iter()
            .filter(|c| c.detail["uid"] == dest)
            .last()
            .unwrap()
            .detail["payload"]
            .to_string()
    };
    assert!(repost_for(dst_auth).contains(dst_book));
    assert!(repost_for(dst_book).contains(dst_auth));
    assert!(!repost_for(dst_auth).contains("blt_book"));
    assert!(!repost_for(dst_book).contains("blt_auth"));
}
