//! The `ManagementApi` trait: the seam between the import engine and the
//! destination stack.
//!
//! Payloads are dynamic `serde_json::Value` trees because content type
//! schemas, entries and assets are user-authored documents with no fixed
//! shape. Importer implementations depend only on this trait; tests swap in
//! recording mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiResult;

/// Target environments and locales for a publish call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub environments: Vec<String>,
    pub locales: Vec<String>,
}

/// A binary asset upload (multipart on the wire)
#[derive(Debug, Clone)]
pub struct AssetUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Destination folder UID; `None` means stack root
    pub parent_uid: Option<String>,
}

/// Per-resource operations against the destination stack's Management API.
///
/// Error behavior contract: failures surface as [`crate::ApiError`] values
/// carrying the vendor `error_code` so callers can run them through the
/// classifiers in [`crate::error`].
#[async_trait]
pub trait ManagementApi: Send + Sync {
    // ---- stack ----------------------------------------------------------

    /// Fetch stack settings; used to discover the destination master locale
    async fn fetch_stack(&self) -> ApiResult<Value>;

    // ---- locales --------------------------------------------------------

    async fn create_locale(&self, payload: Value) -> ApiResult<Value>;
    async fn update_locale(&self, code: &str, payload: Value) -> ApiResult<Value>;

    // ---- environments ---------------------------------------------------

    async fn create_environment(&self, payload: Value) -> ApiResult<Value>;

    // ---- extensions & marketplace apps ----------------------------------

    async fn create_extension(&self, payload: Value) -> ApiResult<Value>;
    async fn install_app(&self, payload: Value) -> ApiResult<Value>;

    // ---- global fields --------------------------------------------------

    async fn create_global_field(&self, payload: Value) -> ApiResult<Value>;
    async fn update_global_field(&self, uid: &str, payload: Value) -> ApiResult<Value>;

    // ---- content types --------------------------------------------------

    async fn create_content_type(&self, payload: Value) -> ApiResult<Value>;
    async fn update_content_type(&self, uid: &str, payload: Value) -> ApiResult<Value>;

    // ---- entries --------------------------------------------------------

    async fn create_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        payload: Value,
    ) -> ApiResult<Value>;

    async fn update_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        entry_uid: &str,
        payload: Value,
    ) -> ApiResult<Value>;

    async fn delete_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        entry_uid: &str,
    ) -> ApiResult<Value>;

    /// Query entries of one content type in one locale; `query` is the
    /// filter document (e.g. `{"title": "..."}`).
    async fn find_entries(
        &self,
        content_type_uid: &str,
        locale: &str,
        query: Value,
    ) -> ApiResult<Vec<Value>>;

    async fn publish_entry(
        &self,
        content_type_uid: &str,
        entry_uid: &str,
        request: PublishRequest,
    ) -> ApiResult<Value>;

    // ---- assets ---------------------------------------------------------

    async fn create_asset_folder(&self, payload: Value) -> ApiResult<Value>;
    async fn upload_asset(&self, upload: AssetUpload) -> ApiResult<Value>;
    /// Replace an existing asset with a new version
    async fn replace_asset(&self, asset_uid: &str, upload: AssetUpload) -> ApiResult<Value>;
    async fn publish_asset(&self, asset_uid: &str, request: PublishRequest) -> ApiResult<Value>;

    // ---- single-pass modules --------------------------------------------

    async fn create_label(&self, payload: Value) -> ApiResult<Value>;
    async fn create_webhook(&self, payload: Value) -> ApiResult<Value>;
    async fn create_workflow(&self, payload: Value) -> ApiResult<Value>;
    async fn create_role(&self, payload: Value) -> ApiResult<Value>;
    async fn create_release(&self, payload: Value) -> ApiResult<Value>;
    async fn add_release_items(&self, release_uid: &str, payload: Value) -> ApiResult<Value>;
    async fn create_personalize_project(&self, payload: Value) -> ApiResult<Value>;
    async fn create_variant_group(&self, project_uid: &str, payload: Value) -> ApiResult<Value>;

    // ---- export-side queries --------------------------------------------

    /// Generic paged query for the export tools (`resource` is the REST
    /// collection name, e.g. "entries", "taxonomies", "users", "teams").
    async fn query(&self, resource: &str, params: Vec<(String, String)>) -> ApiResult<Value>;
}
