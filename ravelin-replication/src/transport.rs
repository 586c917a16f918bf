use crate::types::OperationMetadata;
use ravelin::{RavelinError, Result};
use std::future::Future;
use std::time::Duration;

pub const API_KEY_HEADER: &str = "Api-Key";

/// How the informer reaches a server. It only ever reads documents; sending
/// the caller's own requests is the caller's business.
pub trait HttpTransport: Send + Sync + 'static {
    /// Fetch document `key` from the server at `operation.url`. A missing
    /// document is `Ok(None)`.
    fn get_document(
        &self,
        operation: &OperationMetadata,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>>> + Send;
}

/// HTTP transport backed by a shared `reqwest` client.
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http_client }
    }

    pub fn from_config(config: &ravelin::ClientConfig) -> Self {
        Self::new(config.request_timeout)
    }
}

/// Sort a `reqwest` failure into the client's error taxonomy.
pub fn classify_reqwest_error(url: &str, e: &reqwest::Error) -> RavelinError {
    if e.is_timeout() {
        RavelinError::Timeout {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else if e.is_decode() {
        RavelinError::Json(format!("Failed to parse response from {}: {}", url, e))
    } else if let Some(status) = e.status() {
        RavelinError::Http {
            url: url.to_string(),
            status,
            message: e.to_string(),
        }
    } else {
        RavelinError::Connection {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get_document(
        &self,
        operation: &OperationMetadata,
        key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/docs/{}", operation.url.trim_end_matches('/'), key);

        let mut request = self.http_client.get(&url);
        if let Some(api_key) = operation.credentials.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&operation.url, &e))?;

        let status = response.status();
        if status == http::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RavelinError::Http {
                url: operation.url.clone(),
                status,
                message: body.chars().take(512).collect(),
            });
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(&operation.url, &e))?;
        Ok(Some(document))
    }
}
