// # Marathon Discovery
//
// This crate discovers scrape targets from the applications running on a
// Marathon cluster.
//
// ## Opting In
//
// An application is monitored when its environment declares an endpoint,
// `PROMETHEUS_ENDPOINT=:<port-index><path>` by default (see [`EndpointSpec`]).
// Applications without the variable are ignored; a malformed value is logged
// and the application skipped for that cycle.
//
// ## Poll Cycle
//
// 1. List all applications with their tasks
// 2. Parse each application's endpoint declaration
// 3. For every started task, resolve `<host>:<port>` from the port index
// 4. One TargetGroup with source `marathon:<host>` where host is the
//    configured Marathon endpoint
//
// Only a failed listing fails the cycle. Bad declarations and unresolvable
// tasks drop just the affected application or task.

pub mod api;
pub mod endpoint;

use async_trait::async_trait;
use discovery_core::config::DiscoveryConfig;
use discovery_core::target::{LabelSet, METRICS_PATH_LABEL};
use discovery_core::{Discoverer, DiscovererFactory, DiscovererRegistry, Error, Result, TargetGroup};
use tracing::{debug, error, warn};

pub use api::{App, MarathonApi, MarathonClient, Task};
pub use endpoint::EndpointSpec;

/// Label carrying the Marathon application id
pub const APP_LABEL: &str = "app";

/// Label carrying the Marathon task id
pub const TASK_ID_LABEL: &str = "task_id";

/// Marathon discoverer for one cluster
pub struct MarathonDiscoverer {
    host: String,
    endpoint_env_var: String,
    api: Box<dyn MarathonApi>,
}

impl MarathonDiscoverer {
    /// Create a discoverer
    ///
    /// # Parameters
    ///
    /// - `host`: Marathon endpoint as configured; also names the source
    /// - `endpoint_env_var`: Application variable holding the endpoint declaration
    /// - `api`: Inventory implementation
    pub fn new(
        host: impl Into<String>,
        endpoint_env_var: impl Into<String>,
        api: Box<dyn MarathonApi>,
    ) -> Self {
        Self {
            host: host.into(),
            endpoint_env_var: endpoint_env_var.into(),
            api,
        }
    }

    /// Source identifier, `marathon:<host>`
    pub fn source(&self) -> String {
        format!("marathon:{}", self.host)
    }

    /// Targets of one application, empty when it is not monitored
    pub fn app_targets(&self, app: &App) -> Vec<LabelSet> {
        let Some(declared) = app
            .env_var(&self.endpoint_env_var)
            .filter(|value| !value.is_empty())
        else {
            return Vec::new();
        };

        let spec = match declared.parse::<EndpointSpec>() {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Skipping application {}: {}", app.id, e);
                return Vec::new();
            }
        };

        app.tasks
            .iter()
            .filter(|task| task.is_started())
            .filter_map(|task| match task.host_and_port(spec.port_index) {
                Ok((host, port)) => Some(
                    LabelSet::with_address(format!("{}:{}", host, port))
                        .with(METRICS_PATH_LABEL, spec.path.as_str())
                        .with(APP_LABEL, app.id.as_str())
                        .with(TASK_ID_LABEL, task.id.as_str()),
                ),
                Err(e) => {
                    error!("Skipping task of application {}: {}", app.id, e);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl Discoverer for MarathonDiscoverer {
    fn mechanism(&self) -> &'static str {
        "marathon"
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source()]
    }

    async fn refresh(&self) -> Result<TargetGroup> {
        let apps = self.api.all_apps().await?;

        let targets: Vec<LabelSet> = apps.iter().flat_map(|app| self.app_targets(app)).collect();
        debug!(
            "Resolved {} target(s) from {} application(s)",
            targets.len(),
            apps.len()
        );

        Ok(TargetGroup::new(self.source(), targets))
    }
}

/// Factory for creating Marathon discoverers
pub struct MarathonFactory;

impl DiscovererFactory for MarathonFactory {
    fn create(&self, config: &DiscoveryConfig) -> Result<Box<dyn Discoverer>> {
        match config {
            DiscoveryConfig::Marathon {
                host,
                endpoint_env_var,
                ..
            } => {
                let client = MarathonClient::new(host)?;
                Ok(Box::new(MarathonDiscoverer::new(
                    host.clone(),
                    endpoint_env_var.clone(),
                    Box::new(client),
                )))
            }
            _ => Err(Error::config("Invalid config for Marathon discoverer")),
        }
    }
}

/// Register the Marathon discoverer with a registry
pub fn register(registry: &DiscovererRegistry) {
    registry.register("marathon", Box::new(MarathonFactory));
}
