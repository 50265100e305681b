//! Configuration types for the discovery system
//!
//! This module defines the per-source configuration consumed by backend
//! factories. Values are read-only for the lifetime of a discovery instance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable Marathon applications use to opt into monitoring
pub const DEFAULT_MARATHON_ENDPOINT_ENV: &str = "PROMETHEUS_ENDPOINT";

/// Configuration of one discovery source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryConfig {
    /// EC2 instance inventory of one region
    Ec2 {
        /// AWS region (e.g., "us-east-1")
        region: String,
        /// Seconds between polls
        #[serde(default = "default_refresh_interval_secs")]
        refresh_interval_secs: u64,
        /// API endpoint override (defaults to the regional EC2 endpoint)
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// Marathon application inventory of one cluster
    Marathon {
        /// Marathon host, with or without scheme (e.g., "marathon.local:8080")
        host: String,
        /// Seconds between polls
        #[serde(default = "default_refresh_interval_secs")]
        refresh_interval_secs: u64,
        /// Application environment variable holding the endpoint declaration
        #[serde(default = "default_marathon_endpoint_env")]
        endpoint_env_var: String,
    },

    /// Custom discoverer
    Custom {
        /// Factory name to use
        factory: String,
        /// Seconds between polls
        #[serde(default = "default_refresh_interval_secs")]
        refresh_interval_secs: u64,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl DiscoveryConfig {
    /// EC2 source with default settings
    pub fn ec2(region: impl Into<String>) -> Self {
        DiscoveryConfig::Ec2 {
            region: region.into(),
            refresh_interval_secs: default_refresh_interval_secs(),
            endpoint: None,
        }
    }

    /// Marathon source with default settings
    pub fn marathon(host: impl Into<String>) -> Self {
        DiscoveryConfig::Marathon {
            host: host.into(),
            refresh_interval_secs: default_refresh_interval_secs(),
            endpoint_env_var: default_marathon_endpoint_env(),
        }
    }

    /// Override the refresh interval
    pub fn with_refresh_interval_secs(mut self, secs: u64) -> Self {
        match &mut self {
            DiscoveryConfig::Ec2 {
                refresh_interval_secs,
                ..
            }
            | DiscoveryConfig::Marathon {
                refresh_interval_secs,
                ..
            }
            | DiscoveryConfig::Custom {
                refresh_interval_secs,
                ..
            } => *refresh_interval_secs = secs,
        }
        self
    }

    /// Validate the discovery configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.refresh_interval().is_zero() {
            return Err(crate::Error::config(format!(
                "{} discovery refresh interval must be > 0",
                self.type_name()
            )));
        }

        match self {
            DiscoveryConfig::Ec2 {
                region, endpoint, ..
            } => {
                if region.trim().is_empty() {
                    return Err(crate::Error::config("EC2 region cannot be empty"));
                }
                if let Some(endpoint) = endpoint
                    && !endpoint.starts_with("https://")
                    && !endpoint.starts_with("http://")
                {
                    return Err(crate::Error::config(format!(
                        "EC2 endpoint must use HTTP or HTTPS scheme. Got: {}",
                        endpoint
                    )));
                }
                Ok(())
            }
            DiscoveryConfig::Marathon {
                host,
                endpoint_env_var,
                ..
            } => {
                if host.trim().is_empty() {
                    return Err(crate::Error::config("Marathon host cannot be empty"));
                }
                if endpoint_env_var.is_empty() {
                    return Err(crate::Error::config(
                        "Marathon endpoint environment variable cannot be empty",
                    ));
                }
                Ok(())
            }
            DiscoveryConfig::Custom {
                factory, config, ..
            } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom discoverer factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom discoverer config cannot be null",
                    ));
                }
                if config.as_object().is_some_and(|object| object.is_empty()) {
                    return Err(crate::Error::config(
                        "Custom discoverer config cannot be empty",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the discoverer type name
    pub fn type_name(&self) -> &str {
        match self {
            DiscoveryConfig::Ec2 { .. } => "ec2",
            DiscoveryConfig::Marathon { .. } => "marathon",
            DiscoveryConfig::Custom { factory, .. } => factory,
        }
    }

    /// Time between two polls
    pub fn refresh_interval(&self) -> Duration {
        let secs = match self {
            DiscoveryConfig::Ec2 {
                refresh_interval_secs,
                ..
            }
            | DiscoveryConfig::Marathon {
                refresh_interval_secs,
                ..
            }
            | DiscoveryConfig::Custom {
                refresh_interval_secs,
                ..
            } => *refresh_interval_secs,
        };

        Duration::from_secs(secs)
    }
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_marathon_endpoint_env() -> String {
    DEFAULT_MARATHON_ENDPOINT_ENV.to_string()
}
