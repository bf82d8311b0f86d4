//! HTTP client for the backend under test

use std::time::{Duration, Instant};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::session::Credentials;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend origin, e.g. `http://localhost:8080`
    pub base_url: String,
    /// Versioned REST prefix for resource paths
    pub api_prefix: String,
    pub request_timeout: Duration,
    /// Bearer token sent with every request
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api/v1".to_string(),
            request_timeout: Duration::from_secs(10),
            token: None,
        }
    }
}

/// Status and decoded body of a response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// JSON body; non-JSON bodies are kept as a string, empty ones as null
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Reply from the tool execution endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> E2eResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Same client, authenticated with `token`
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        let mut client = self.clone();
        client.config.token = Some(token.into());
        client
    }

    /// Full path of a resource under the API prefix
    pub fn api_path(&self, resource: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_prefix.trim_end_matches('/'),
            resource.trim_start_matches('/')
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send a request to `path` (relative to the backend origin)
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> E2eResult<ApiResponse> {
        let mut builder = self.http.request(method.clone(), self.url(path));
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("{} {} -> {}", method, path, status);

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse { status, body })
    }

    pub async fn get(&self, resource: &str) -> E2eResult<ApiResponse> {
        self.request(Method::GET, &self.api_path(resource), None).await
    }

    pub async fn post(&self, resource: &str, body: &Value) -> E2eResult<ApiResponse> {
        self.request(Method::POST, &self.api_path(resource), Some(body)).await
    }

    /// `GET /health`
    pub async fn health(&self) -> E2eResult<HealthStatus> {
        let response = self.request(Method::GET, "/health", None).await?;
        if !response.is_success() {
            return Err(E2eError::UnexpectedStatus {
                method: "GET".into(),
                path: "/health".into(),
                status: response.status,
            });
        }
        Ok(serde_json::from_value(response.body)?)
    }

    /// Poll `/health` until the backend reports healthy
    pub async fn wait_until_healthy(&self, timeout_duration: Duration) -> E2eResult<()> {
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            match self.health().await {
                Ok(health) if health.is_healthy() => {
                    info!("Backend is healthy at {}", self.config.base_url);
                    return Ok(());
                }
                Ok(health) => {
                    warn!("Health check reported {:?}", health.status);
                }
                Err(E2eError::Http(e)) if e.is_connect() => {
                    if attempts == 1 {
                        info!("Waiting for backend at {}...", self.config.base_url);
                    }
                }
                Err(e) => {
                    warn!("Health check error: {}", e);
                }
            }

            sleep(Duration::from_millis(250)).await;
        }

        Err(E2eError::BackendHealthCheck(attempts))
    }

    /// Log in over the API. Returns `None` when the backend issues no token,
    /// which is what an auth-disabled backend does.
    pub async fn login(&self, credentials: &Credentials) -> E2eResult<Option<String>> {
        let body = json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let response = self.post("auth/login", &body).await?;
        if response.status != 200 {
            debug!("API login returned {}", response.status);
            return Ok(None);
        }

        let token = ["token", "access_token"].iter().find_map(|key| {
            response
                .body
                .get(key)
                .or_else(|| response.body.get("data").and_then(|d| d.get(key)))
                .and_then(Value::as_str)
                .map(String::from)
        });
        Ok(token)
    }

    /// Run a backend tool by name
    pub async fn execute_tool(&self, tool_name: &str, input: &Value) -> E2eResult<ToolExecution> {
        let body = json!({ "tool_name": tool_name, "input": input });
        let path = self.api_path("tools/execute");
        let response = self.request(Method::POST, &path, Some(&body)).await?;
        if !response.is_success() {
            return Err(E2eError::UnexpectedStatus {
                method: "POST".into(),
                path,
                status: response.status,
            });
        }
        Ok(serde_json::from_value(response.body)?)
    }
}
