//! # HTTP Cloud Connection
//!
//! `CloudConnection` over `reqwest` for requests, plus an optional WebSocket
//! [`PushTransport`](crate::transport::PushTransport) for pushed updates.
//!
//! ## Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Response / failure           SyncError               Retryable        │
//! │  ──────────────────           ─────────               ─────────        │
//! │  2xx                          (decoded JSON body)                       │
//! │  400, 422                     BadRequest              no               │
//! │  401                          Unauthorized            no               │
//! │  403                          Forbidden               no               │
//! │  404                          NotFound                no               │
//! │  429, 5xx                     Http { status }         yes              │
//! │  other                        Http { status }         no               │
//! │  request deadline hit         Timeout                 yes              │
//! │  connect / DNS / TLS failure  ConnectionFailed        yes              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connectedness
//! With a push URL, `is_connected` follows the socket. Without one it follows
//! the last request, and after a failed one it asks `health_path` again
//! before answering, so an outage clears as soon as the cloud responds.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cloud::CloudConnection;
use crate::config::CloudSettings;
use crate::error::{SyncError, SyncResult};
use crate::transport::{PushConfig, PushHandle, PushTransport};

/// HTTP + WebSocket cloud client.
pub struct HttpCloudConnection {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    request_timeout: Duration,
    health_path: String,

    /// Outcome of the most recent request; optimistic before the first.
    /// Once false, `is_connected` rechecks the health endpoint.
    last_ok: AtomicBool,

    push: Option<PushHandle>,
}

impl HttpCloudConnection {
    /// Builds the client. When a push URL is configured the push socket is
    /// spawned immediately, so this must run inside a Tokio runtime.
    pub fn new(settings: &CloudSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = normalize_base(&settings.base_url)?;

        let push = settings.push_url.as_ref().map(|url| {
            PushTransport::spawn(PushConfig {
                url: url.clone(),
                api_key: settings.api_key.clone(),
                connect_timeout: settings.connect_timeout(),
                ..Default::default()
            })
        });

        Ok(HttpCloudConnection {
            client,
            base_url,
            api_key: settings.api_key.clone(),
            request_timeout: settings.request_timeout(),
            health_path: settings.health_path.clone(),
            last_ok: AtomicBool::new(true),
            push,
        })
    }

    /// Resolves `path` against the base URL.
    pub fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Closes the push socket, if any.
    pub async fn shutdown(&self) {
        if let Some(push) = &self.push {
            let _ = push.shutdown().await;
        }
    }

    async fn send(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        let url = self.endpoint(path)?;

        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout(self.request_timeout.as_secs())
            } else {
                SyncError::InvalidMessage(format!("Response body is not JSON: {}", e))
            }
        })
    }

    /// Hits the health endpoint and records whether the cloud answered.
    /// Any status counts except 429 and 5xx. The body is ignored.
    async fn recheck(&self) -> bool {
        let reachable = match self.endpoint(&self.health_path) {
            Ok(url) => {
                let mut request = self.client.get(url);
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key);
                }
                match request.send().await {
                    Ok(response) => {
                        let status = response.status();
                        status.is_success()
                            || !error_for_status(status, String::new()).is_retryable()
                    }
                    Err(e) => {
                        debug!(error = %e, "Health recheck failed");
                        false
                    }
                }
            }
            Err(_) => false,
        };

        if reachable {
            info!("Cloud reachable again");
        }
        self.last_ok.store(reachable, Ordering::SeqCst);
        reachable
    }

    fn transport_error(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout(self.request_timeout.as_secs())
        } else {
            SyncError::ConnectionFailed(e.to_string())
        }
    }
}

#[async_trait]
impl CloudConnection for HttpCloudConnection {
    async fn is_connected(&self) -> bool {
        match &self.push {
            Some(push) => push.is_connected().await,
            None if self.last_ok.load(Ordering::SeqCst) => true,
            None => self.recheck().await,
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        debug!(path, "GET");
        let result = self.send(path, query).await;

        let reachable = match &result {
            Ok(_) => true,
            Err(e) => !e.is_retryable(),
        };
        self.last_ok.store(reachable, Ordering::SeqCst);

        if let Err(e) = &result {
            warn!(path, error = %e, "Cloud request failed");
        }
        result
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<mpsc::Receiver<Value>> {
        match &self.push {
            Some(push) => push.subscribe(topic).await,
            None => Err(SyncError::InvalidConfig(
                "No push_url configured, cannot subscribe".into(),
            )),
        }
    }
}

/// Maps a non-success status to an error.
pub fn error_for_status(status: StatusCode, body: String) -> SyncError {
    match status.as_u16() {
        400 | 422 => SyncError::BadRequest(body),
        401 => SyncError::Unauthorized(body),
        403 => SyncError::Forbidden(body),
        404 => SyncError::NotFound(body),
        code => SyncError::Http {
            status: code,
            message: body,
        },
    }
}

/// `Url::join` drops the last segment unless the base ends with a slash.
pub(crate) fn normalize_base(raw: &str) -> SyncResult<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Ok(Url::parse(&with_slash)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_port, serve_json};

    fn settings(base: &str) -> CloudSettings {
        CloudSettings {
            base_url: base.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, String::new()),
            SyncError::Unauthorized(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, String::new()),
            SyncError::Forbidden(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            SyncError::BadRequest(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, String::new()),
            SyncError::NotFound(_)
        ));

        let unavailable = error_for_status(StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert!(unavailable.is_retryable());
        let throttled = error_for_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(throttled.is_retryable());
        assert!(!error_for_status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
    }

    #[tokio::test]
    async fn test_endpoint_joins_onto_base_path() {
        let conn = HttpCloudConnection::new(&settings("https://api.example.com/v1")).unwrap();
        assert_eq!(
            conn.endpoint("config/changes").unwrap().as_str(),
            "https://api.example.com/v1/config/changes"
        );
        assert_eq!(
            conn.endpoint("/health").unwrap().as_str(),
            "https://api.example.com/v1/health"
        );
    }

    #[tokio::test]
    async fn test_connected_is_optimistic_without_push() {
        let conn = HttpCloudConnection::new(&settings("https://api.example.com/")).unwrap();
        assert!(conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_subscribe_without_push_url_is_config_error() {
        let conn = HttpCloudConnection::new(&settings("https://api.example.com/")).unwrap();
        let err = conn.subscribe("config.updated").await.unwrap_err();
        assert!(err.is_config_error());
    }

    fn local_settings(port: u16) -> CloudSettings {
        CloudSettings {
            base_url: format!("http://127.0.0.1:{}/", port),
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_marks_disconnected() {
        let port = closed_port().await;
        let conn = HttpCloudConnection::new(&local_settings(port)).unwrap();

        let err = conn.get("config/full", &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_reconnects_once_cloud_comes_back() {
        let port = closed_port().await;
        let conn = HttpCloudConnection::new(&local_settings(port)).unwrap();

        assert!(conn.get("config/changes", &[]).await.is_err());
        assert!(!conn.is_connected().await);

        let server = serve_json(port, "{\"version\": 3, \"changes\": []}").await;

        assert!(conn.is_connected().await);
        let body = conn.get("config/changes", &[]).await.unwrap();
        assert_eq!(body["version"], 3);
        assert!(conn.is_connected().await);

        server.abort();
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(normalize_base("not a url").is_err());
    }
}
