//! Production `reqwest` implementation of [`ManagementApi`]
//!
//! One client per destination stack. Retries are owned here: 429 and 5xx
//! responses (and transport failures) are retried with exponential backoff
//! up to a bounded attempt count, so the import engine above never has to
//! reason about rate limits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{AssetUpload, ManagementApi, PublishRequest};
use crate::error::{ApiError, ApiResult};

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 500;

/// Connection settings for one destination stack
#[derive(Debug, Clone)]
pub struct CsClientConfig {
    /// Management API base, e.g. `https://api.contentstack.io`
    pub base_url: String,
    /// Destination stack API key
    pub api_key: String,
    /// Management token (or a pre-authenticated session token)
    pub management_token: String,
    /// Optional branch to scope all calls to
    pub branch: Option<String>,
    pub timeout: Duration,
}

impl CsClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            management_token: token.into(),
            branch: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Management API client for one destination stack
pub struct CsClient {
    http: reqwest::Client,
    base_url: String,
}

impl CsClient {
    pub fn new(config: CsClientConfig) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "api_key",
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| ApiError::Transport(format!("invalid api key header: {}", e)))?,
        );
        headers.insert(
            "authorization",
            HeaderValue::from_str(&config.management_token)
                .map_err(|e| ApiError::Transport(format!("invalid token header: {}", e)))?,
        );
        if let Some(branch) = &config.branch {
            headers.insert(
                "branch",
                HeaderValue::from_str(branch)
                    .map_err(|e| ApiError::Transport(format!("invalid branch header: {}", e)))?,
            );
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v3/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn parse_response(response: reqwest::Response) -> ApiResult<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::UnexpectedResponse(e.to_string()))?;

        if status.is_success() {
            return Ok(body);
        }

        Err(ApiError::Api {
            status: status.as_u16(),
            code: body.get("error_code").and_then(Value::as_u64).map(|c| c as u32),
            message: body
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown API error")
                .to_string(),
            errors: body.get("errors").cloned().unwrap_or(Value::Null),
        })
    }

    /// Send a JSON request with bounded retry on 429/5xx and transport errors
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        params: &[(String, String)],
    ) -> ApiResult<Value> {
        let url = self.url(path);
        let mut last_status = 0u16;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_BACKOFF_MS * (1 << attempt));
                debug!(%url, attempt, ?delay, "Retrying request after backoff");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.http.request(method.clone(), &url);
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) if Self::is_retryable(response.status()) => {
                    last_status = response.status().as_u16();
                    warn!(%url, status = last_status, attempt, "Retryable API status");
                }
                Ok(response) => return Self::parse_response(response).await,
                Err(e) => {
                    last_status = 0;
                    warn!(%url, attempt, error = %e, "Transport error, will retry");
                }
            }
        }

        Err(ApiError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            status: last_status,
        })
    }

    async fn post(&self, path: &str, body: Value) -> ApiResult<Value> {
        self.send(Method::POST, path, Some(&body), &[]).await
    }

    async fn put(&self, path: &str, body: Value) -> ApiResult<Value> {
        self.send(Method::PUT, path, Some(&body), &[]).await
    }

    async fn get(&self, path: &str, params: &[(String, String)]) -> ApiResult<Value> {
        self.send(Method::GET, path, None, params).await
    }

    fn asset_form(upload: &AssetUpload) -> ApiResult<reqwest::multipart::Form> {
        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| ApiError::Transport(format!("invalid asset mime type: {}", e)))?;

        let mut form = reqwest::multipart::Form::new().part("asset[upload]", part);
        if let Some(parent) = &upload.parent_uid {
            form = form.text("asset[parent_uid]", parent.clone());
        }
        if let Some(title) = &upload.title {
            form = form.text("asset[title]", title.clone());
        }
        if let Some(description) = &upload.description {
            form = form.text("asset[description]", description.clone());
        }
        Ok(form)
    }

    /// Multipart requests rebuild the form per attempt; `reqwest` forms are
    /// consumed on send.
    async fn send_multipart(&self, method: Method, path: &str, upload: &AssetUpload) -> ApiResult<Value> {
        let url = self.url(path);
        let mut last_status = 0u16;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_BACKOFF_MS * (1 << attempt));
                tokio::time::sleep(delay).await;
            }

            let form = Self::asset_form(upload)?;
            match self
                .http
                .request(method.clone(), &url)
                .multipart(form)
                .send()
                .await
            {
                Ok(response) if Self::is_retryable(response.status()) => {
                    last_status = response.status().as_u16();
                    warn!(%url, status = last_status, attempt, "Retryable status on asset upload");
                }
                Ok(response) => return Self::parse_response(response).await,
                Err(e) => {
                    last_status = 0;
                    warn!(%url, attempt, error = %e, "Transport error on asset upload");
                }
            }
        }

        Err(ApiError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            status: last_status,
        })
    }
}

#[async_trait]
impl ManagementApi for CsClient {
    async fn fetch_stack(&self) -> ApiResult<Value> {
        self.get("stacks", &[]).await
    }

    async fn create_locale(&self, payload: Value) -> ApiResult<Value> {
        self.post("locales", payload).await
    }

    async fn update_locale(&self, code: &str, payload: Value) -> ApiResult<Value> {
        self.put(&format!("locales/{}", code), payload).await
    }

    async fn create_environment(&self, payload: Value) -> ApiResult<Value> {
        self.post("environments", payload).await
    }

    async fn create_extension(&self, payload: Value) -> ApiResult<Value> {
        self.post("extensions", payload).await
    }

    async fn install_app(&self, payload: Value) -> ApiResult<Value> {
        self.post("manifests/installations", payload).await
    }

    async fn create_global_field(&self, payload: Value) -> ApiResult<Value> {
        self.post("global_fields", payload).await
    }

    async fn update_global_field(&self, uid: &str, payload: Value) -> ApiResult<Value> {
        self.put(&format!("global_fields/{}", uid), payload).await
    }

    async fn create_content_type(&self, payload: Value) -> ApiResult<Value> {
        self.post("content_types", payload).await
    }

    async fn update_content_type(&self, uid: &str, payload: Value) -> ApiResult<Value> {
        self.put(&format!("content_types/{}", uid), payload).await
    }

    async fn create_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        payload: Value,
    ) -> ApiResult<Value> {
        self.send(
            Method::POST,
            &format!("content_types/{}/entries", content_type_uid),
            Some(&payload),
            &[("locale".to_string(), locale.to_string())],
        )
        .await
    }

    async fn update_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        entry_uid: &str,
        payload: Value,
    ) -> ApiResult<Value> {
        self.send(
            Method::PUT,
            &format!("content_types/{}/entries/{}", content_type_uid, entry_uid),
            Some(&payload),
            &[("locale".to_string(), locale.to_string())],
        )
        .await
    }

    async fn delete_entry(
        &self,
        content_type_uid: &str,
        locale: &str,
        entry_uid: &str,
    ) -> ApiResult<Value> {
        self.send(
            Method::DELETE,
            &format!("content_types/{}/entries/{}", content_type_uid, entry_uid),
            None,
            &[
                ("locale".to_string(), locale.to_string()),
                ("delete_all_localized".to_string(), "false".to_string()),
            ],
        )
        .await
    }

    async fn find_entries(
        &self,
        content_type_uid: &str,
        locale: &str,
        query: Value,
    ) -> ApiResult<Vec<Value>> {
        let body = self
            .get(
                &format!("content_types/{}/entries", content_type_uid),
                &[
                    ("locale".to_string(), locale.to_string()),
                    ("query".to_string(), query.to_string()),
                ],
            )
            .await?;
        match body.get("entries").and_then(Value::as_array) {
            Some(entries) => Ok(entries.clone()),
            None => Err(ApiError::UnexpectedResponse(
                "entry query response missing 'entries' array".to_string(),
            )),
        }
    }

    async fn publish_entry(
        &self,
        content_type_uid: &str,
        entry_uid: &str,
        request: PublishRequest,
    ) -> ApiResult<Value> {
        let body = serde_json::json!({
            "entry": {
                "environments": request.environments,
                "locales": request.locales,
            }
        });
        self.post(
            &format!("content_types/{}/entries/{}/publish", content_type_uid, entry_uid),
            body,
        )
        .await
    }

    async fn create_asset_folder(&self, payload: Value) -> ApiResult<Value> {
        self.post("assets/folders", payload).await
    }

    async fn upload_asset(&self, upload: AssetUpload) -> ApiResult<Value> {
        self.send_multipart(Method::POST, "assets", &upload).await
    }

    async fn replace_asset(&self, asset_uid: &str, upload: AssetUpload) -> ApiResult<Value> {
        self.send_multipart(Method::PUT, &format!("assets/{}", asset_uid), &upload)
            .await
    }

    async fn publish_asset(&self, asset_uid: &str, request: PublishRequest) -> ApiResult<Value> {
        let body = serde_json::json!({
            "asset": {
                "environments": request.environments,
                "locales": request.locales,
            }
        });
        self.post(&format!("assets/{}/publish", asset_uid), body).await
    }

    async fn create_label(&self, payload: Value) -> ApiResult<Value> {
        self.post("labels", payload).await
    }

    async fn create_webhook(&self, payload: Value) -> ApiResult<Value> {
        self.post("webhooks", payload).await
    }

    async fn create_workflow(&self, payload: Value) -> ApiResult<Value> {
        self.post("workflows", payload).await
    }

    async fn create_role(&self, payload: Value) -> ApiResult<Value> {
        self.post("roles", payload).await
    }

    async fn create_release(&self, payload: Value) -> ApiResult<Value> {
        self.post("releases", payload).await
    }

    async fn add_release_items(&self, release_uid: &str, payload: Value) -> ApiResult<Value> {
        self.post(&format!("releases/{}/items", release_uid), payload)
            .await
    }

    async fn create_personalize_project(&self, payload: Value) -> ApiResult<Value> {
        self.post("personalize/projects", payload).await
    }

    async fn create_variant_group(&self, project_uid: &str, payload: Value) -> ApiResult<Value> {
        self.post(
            &format!("personalize/projects/{}/variant_groups", project_uid),
            payload,
        )
        .await
    }

    async fn query(&self, resource: &str, params: Vec<(String, String)>) -> ApiResult<Value> {
        self.get(resource, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = CsClient::new(CsClientConfig::new(
            "https://api.example.com/",
            "key",
            "token",
        ))
        .unwrap();
        assert_eq!(client.url("/content_types"), "https://api.example.com/v3/content_types");
        assert_eq!(client.url("locales"), "https://api.example.com/v3/locales");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(CsClient::is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(CsClient::is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!CsClient::is_retryable(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!CsClient::is_retryable(StatusCode::UNAUTHORIZED));
    }
}
