//! Plugin-based discoverer registry
//!
//! The registry allows discovery backends to be registered dynamically at
//! runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use discovery_core::registry::DiscovererRegistry;
//! use discovery_core::config::DiscoveryConfig;
//!
//! // Create a registry
//! let registry = DiscovererRegistry::new();
//!
//! // Register backends
//! discovery_ec2::register(&registry);
//! discovery_marathon::register(&registry);
//!
//! // Create a discoverer from config
//! let discoverer = registry.create(&DiscoveryConfig::ec2("us-east-1"))?;
//! ```

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::traits::{Discoverer, DiscovererFactory};
use std::collections::HashMap;
use std::sync::RwLock;

/// Registry for plugin-based discoverer creation
///
/// The registry maintains a map of discoverer type names to factory objects,
/// allowing dynamic instantiation of backends based on configuration.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct DiscovererRegistry {
    /// Registered discoverer factories
    factories: RwLock<HashMap<String, Box<dyn DiscovererFactory>>>,
}

impl DiscovererRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discoverer factory
    ///
    /// # Parameters
    ///
    /// - `name`: Discoverer type name (e.g., "ec2", "marathon")
    /// - `factory`: Factory object for creating discoverer instances
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register(&self, name: impl Into<String>, factory: Box<dyn DiscovererFactory>) {
        let name = name.into();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        factories.insert(name, factory);
    }

    /// Create a discoverer from configuration
    ///
    /// The configuration is validated before the factory is invoked.
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn Discoverer>)`: Created discoverer instance
    /// - `Err(Error)`: If the type is not registered, the config is invalid,
    ///   or creation fails
    pub fn create(&self, config: &DiscoveryConfig) -> Result<Box<dyn Discoverer>> {
        config.validate()?;

        let discoverer_type = config.type_name();
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let factory = factories.get(discoverer_type).ok_or_else(|| {
            Error::config(format!("Unknown discoverer type: {}", discoverer_type))
        })?;

        factory.create(config)
    }

    /// List all registered discoverer types, sorted
    pub fn list(&self) -> Vec<String> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a discoverer type is registered
    pub fn has(&self, name: &str) -> bool {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        factories.contains_key(name)
    }
}
