// # Marathon REST client
//
// ## API Reference
//
// - List applications with their tasks: GET `/v2/apps?embed=apps.tasks`
// - Response: `{"apps": [{"id", "env", "tasks": [{"id", "host", "ports", "startedAt"}]}]}`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discovery_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Path listing every application with its tasks embedded
const APPS_PATH: &str = "/v2/apps?embed=apps.tasks";

#[derive(Debug, Deserialize)]
pub struct AppList {
    #[serde(default)]
    pub apps: Vec<App>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct App {
    /// Application id, e.g. `/shop/frontend`
    pub id: String,

    /// Environment; values are strings or secret references
    #[serde(default)]
    pub env: HashMap<String, Value>,

    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl App {
    /// Plain string value of an environment variable
    ///
    /// Secret references and other non-string values count as absent.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    /// Agent the task runs on
    #[serde(default)]
    pub host: String,

    /// Host ports allocated to the task, in declaration order
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Unset while the task is staging
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Whether the task has started
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Host and host port for a declared port index
    pub fn host_and_port(&self, index: usize) -> Result<(String, u16)> {
        match self.ports.get(index) {
            Some(port) => Ok((self.host.clone(), *port)),
            None => Err(Error::PortIndex {
                task_id: self.id.clone(),
                index,
                available: self.ports.len(),
            }),
        }
    }
}

/// Decode a `/v2/apps` response body
pub fn parse_apps(body: &str) -> Result<Vec<App>> {
    let list: AppList = serde_json::from_str(body)
        .map_err(|e| Error::decode(format!("Invalid Marathon apps response: {}", e)))?;
    Ok(list.apps)
}

/// Application inventory as seen by the discoverer
#[async_trait]
pub trait MarathonApi: Send + Sync {
    /// Every application, tasks included
    async fn all_apps(&self) -> Result<Vec<App>>;
}

/// HTTP client for one Marathon endpoint
#[derive(Debug)]
pub struct MarathonClient {
    /// Base URL without trailing slash
    base_url: String,

    client: reqwest::Client,
}

impl MarathonClient {
    /// Create a client
    ///
    /// `host` may be a bare `host:port`, which is reached over plain HTTP.
    pub fn new(host: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url(host),
            client,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MarathonApi for MarathonClient {
    async fn all_apps(&self) -> Result<Vec<App>> {
        let url = format!("{}{}", self.base_url, APPS_PATH);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("Marathon request to {} failed: {}", url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read Marathon response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::http(format!(
                "Marathon returned {} for {}: {}",
                status,
                url,
                body.trim()
            )));
        }

        let apps = parse_apps(&body)?;
        debug!("Marathon listed {} application(s)", apps.len());
        Ok(apps)
    }
}

/// Normalise a configured host into a base URL
pub fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
