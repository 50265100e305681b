//! Scrape endpoint declared by an application
//!
//! Applications opt into monitoring by setting an environment variable
//! (`PROMETHEUS_ENDPOINT` unless configured otherwise) to
//! `:<port-index><path>`, e.g. `:0/metrics`.

use discovery_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Parsed `:<port-index><path>` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Index into the task's port list
    pub port_index: usize,

    /// Metrics path, always starting with `/`
    pub path: String,
}

impl FromStr for EndpointSpec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let Some(rest) = value.strip_prefix(':') else {
            return Err(Error::invalid_endpoint(value, "must start with ':'"));
        };

        let Some(slash) = rest.find('/') else {
            return Err(Error::invalid_endpoint(value, "missing '/' before the path"));
        };

        let port_index = rest[..slash].parse::<usize>().map_err(|_| {
            Error::invalid_endpoint(
                value,
                format!("port index '{}' is not a non-negative integer", &rest[..slash]),
            )
        })?;

        Ok(Self {
            port_index,
            path: rest[slash..].to_string(),
        })
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}{}", self.port_index, self.path)
    }
}
