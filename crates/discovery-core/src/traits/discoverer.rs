// # Discoverer Trait
//
// Defines the interface every discovery backend implements.
//
// ## Implementations
//
// - EC2 instance inventory: `discovery-ec2` crate
// - Marathon application/task inventory: `discovery-marathon` crate
//
// ## Usage
//
// ```rust,ignore
// use discovery_core::{Discoverer, Discovery};
// use std::time::Duration;
//
// let discoverer: Box<dyn Discoverer> = /* backend */;
// let (discovery, stop) = Discovery::new(discoverer, Duration::from_secs(60))?;
//
// let (tx, mut rx) = tokio::sync::mpsc::channel(1);
// tokio::spawn(discovery.run(tx));
//
// while let Some(group) = rx.recv().await {
//     println!("{}: {} targets", group.source, group.targets.len());
// }
// ```

use async_trait::async_trait;

use crate::target::TargetGroup;

/// Trait for discovery backend implementations
///
/// A discoverer performs exactly one poll cycle per [`refresh`] call. It owns
/// its upstream client exclusively and never schedules itself; cadence,
/// cancellation and emission belong to [`crate::Discovery`].
///
/// # Error Policy
///
/// - Return `Err` only when the upstream listing itself fails. The engine logs
///   it and emits nothing for that cycle.
/// - Per-record problems (a malformed declaration, an unresolvable task) are
///   logged by the implementation and the record is left out. They never
///   fail the whole cycle.
/// - Do not retry. The next tick is the retry.
///
/// [`refresh`]: Discoverer::refresh
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Short mechanism name (e.g., "ec2", "marathon")
    fn mechanism(&self) -> &'static str;

    /// Source identifiers this instance will ever emit under
    ///
    /// Must be pure and stable for the lifetime of the instance. Typically a
    /// single entry such as `ec2:us-east-1`.
    fn sources(&self) -> Vec<String>;

    /// Run one fetch-and-extract pass
    ///
    /// # Returns
    ///
    /// - `Ok(TargetGroup)`: All targets found in this pass, possibly none
    /// - `Err(Error)`: The upstream listing failed
    async fn refresh(&self) -> Result<TargetGroup, crate::Error>;
}

/// Helper trait for constructing discoverers from configuration
pub trait DiscovererFactory: Send + Sync {
    /// Create a Discoverer instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration of one discovery source
    ///
    /// # Returns
    ///
    /// A boxed Discoverer trait object
    fn create(
        &self,
        config: &crate::config::DiscoveryConfig,
    ) -> Result<Box<dyn Discoverer>, crate::Error>;
}
