//! HTTP control backend
//!
//! REST implementation of [`ControlBackend`]:
//!
//! | Command      | Request                                     |
//! |--------------|---------------------------------------------|
//! | restart      | `POST   /api/v1/projects/{id}/restart`      |
//! | remove       | `DELETE /api/v1/projects/{id}`              |
//! | enable       | `PUT    /api/v1/projects/{id}/open`         |
//! | disable      | `PUT    /api/v1/projects/{id}/close`        |
//! | list         | `GET    /api/v1/projects`                   |
//! | capabilities | `GET    /api/v1/projects/{id}/capabilities` |

use async_trait::async_trait;
use projsync_core::{ControlBackend, ProjectCapabilities, ProjectSnapshot, StartMode, SyncError, SyncResult};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::config::TimeoutsConfig;
use crate::error::{ClientError, Result};

const PROJECTS_PATH: &str = "/api/v1/projects";

/// Encode a project ID as a single path segment
fn encode_path_segment(id: &str) -> String {
    id.replace('%', "%25").replace('/', "%2F")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestartRequest<'a> {
    start_mode: &'a str,
}

/// REST client for one control plane endpoint
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    stream_client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Backend with default timeouts and no credentials
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(base_url, &TimeoutsConfig::default(), None)
    }

    /// Backend with explicit timeouts and an optional bearer token
    pub fn with_config(base_url: &str, timeouts: &TimeoutsConfig, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ClientError::InvalidToken(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeouts.request())
            .connect_timeout(timeouts.connect())
            .default_headers(headers.clone())
            .build()?;

        // The event stream stays open indefinitely, so no overall timeout
        let stream_client = Client::builder()
            .connect_timeout(timeouts.connect())
            .default_headers(headers)
            .build()?;

        let base_url = Url::parse(base_url)?;

        Ok(Self {
            client,
            stream_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Client for long-lived streaming requests, sharing credentials
    pub fn stream_client(&self) -> Client {
        self.stream_client.clone()
    }

    /// Resolve the event stream path against the base URL
    pub fn events_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn project_url(&self, project_id: &str, suffix: &str) -> SyncResult<Url> {
        let path = format!("{}/{}{}", PROJECTS_PATH, encode_path_segment(project_id), suffix);
        self.base_url
            .join(&path)
            .map_err(|e| SyncError::Internal(format!("Invalid URL: {}", e)))
    }

    async fn execute(&self, request: RequestBuilder) -> SyncResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(extract_error(response).await)
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("Failed to parse response: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Transport(e.to_string())
    }
}

async fn extract_error(response: Response) -> SyncError {
    let status = response.status();
    let message = match response.json::<Value>().await {
        Ok(body) => error_message(&body).unwrap_or_else(|| format!("HTTP {}", status)),
        Err(_) => format!("HTTP {}", status),
    };
    SyncError::from_status(status.as_u16(), message)
}

fn error_message(body: &Value) -> Option<String> {
    ["error", "message", "msg"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl ControlBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn restart(&self, project_id: &str, mode: StartMode) -> SyncResult<()> {
        let url = self.project_url(project_id, "/restart")?;
        debug!("POST {}", url);
        let body = RestartRequest {
            start_mode: mode.as_str(),
        };
        self.execute(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, project_id: &str) -> SyncResult<()> {
        let url = self.project_url(project_id, "")?;
        debug!("DELETE {}", url);
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_enabled(&self, project_id: &str, enabled: bool) -> SyncResult<()> {
        let suffix = if enabled { "/open" } else { "/close" };
        let url = self.project_url(project_id, suffix)?;
        debug!("PUT {}", url);
        self.execute(self.client.put(url)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> SyncResult<Vec<ProjectSnapshot>> {
        let url = self
            .base_url
            .join(PROJECTS_PATH)
            .map_err(|e| SyncError::Internal(format!("Invalid URL: {}", e)))?;
        debug!("GET {}", url);
        self.handle_response(self.client.get(url)).await
    }

    #[instrument(skip(self))]
    async fn get_capabilities(&self, project_id: &str) -> SyncResult<ProjectCapabilities> {
        let url = self.project_url(project_id, "/capabilities")?;
        debug!("GET {}", url);
        self.handle_response(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_urls() {
        let backend = HttpBackend::new("http://localhost:9090").unwrap();
        assert_eq!(
            backend.project_url("p1", "/restart").unwrap().as_str(),
            "http://localhost:9090/api/v1/projects/p1/restart"
        );
        assert_eq!(
            backend.project_url("team/p1", "").unwrap().as_str(),
            "http://localhost:9090/api/v1/projects/team%2Fp1"
        );
        assert_eq!(
            backend.events_url("/api/v1/events").unwrap().as_str(),
            "http://localhost:9090/api/v1/events"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpBackend::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_invalid_token() {
        let result = HttpBackend::with_config(
            "http://localhost:9090",
            &TimeoutsConfig::default(),
            Some("bad\ntoken"),
        );
        assert!(matches!(result, Err(ClientError::InvalidToken(_))));
    }

    #[test]
    fn test_error_message_keys() {
        assert_eq!(error_message(&json!({"error": "nope"})).as_deref(), Some("nope"));
        assert_eq!(error_message(&json!({"message": "gone"})).as_deref(), Some("gone"));
        assert_eq!(error_message(&json!({"other": 1})), None);
    }

    #[test]
    fn test_restart_body() {
        let body = serde_json::to_value(RestartRequest {
            start_mode: StartMode::Debug.as_str(),
        })
        .unwrap();
        assert_eq!(body, json!({"startMode": "debug"}));
    }
}
