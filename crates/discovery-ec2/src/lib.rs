// # EC2 Discovery
//
// This crate discovers scrape targets from the EC2 instance inventory of one
// region.
//
// ## Poll Cycle
//
// 1. `DescribeInstances` (all pages) for the configured region
// 2. Skip instances without a private IP address
// 3. Target `<private-ip>:9100` with labels `region` and, when tagged, `name`
//    (the first `Name` tag wins)
// 4. One TargetGroup with source `ec2:<region>`
//
// A failed listing fails the whole cycle; the engine logs it and tries again
// on the next tick.
//
// ## Credentials
//
// Credentials are resolved per request through an ordered provider chain,
// environment first, then the instance role. See [`credentials`].

pub mod api;
pub mod credentials;
pub mod sigv4;

use async_trait::async_trait;
use discovery_core::config::DiscoveryConfig;
use discovery_core::target::LabelSet;
use discovery_core::{Discoverer, DiscovererFactory, DiscovererRegistry, Error, Result, TargetGroup};
use tracing::debug;

pub use api::{Ec2Api, Ec2Client, Instance, Reservation, Tag};
pub use credentials::{ChainProvider, CredentialProvider, Credentials, EnvProvider, InstanceRoleProvider};

/// Port of the node metrics agent every instance is expected to run
pub const DEFAULT_AGENT_PORT: u16 = 9100;

/// Label carrying the configured region
pub const REGION_LABEL: &str = "region";

/// Label carrying the value of the instance's `Name` tag
pub const NAME_LABEL: &str = "name";

/// Tag whose value becomes the `name` label
const NAME_TAG: &str = "Name";

/// EC2 discoverer for one region
pub struct Ec2Discoverer {
    region: String,
    api: Box<dyn Ec2Api>,
}

impl Ec2Discoverer {
    /// Create a discoverer over any inventory implementation
    pub fn new(region: impl Into<String>, api: Box<dyn Ec2Api>) -> Self {
        Self {
            region: region.into(),
            api,
        }
    }

    /// Create a discoverer talking to the EC2 API
    ///
    /// # Parameters
    ///
    /// - `region`: AWS region to list
    /// - `endpoint`: Optional endpoint override
    /// - `providers`: Credential providers, tried in order
    pub fn with_credentials(
        region: impl Into<String>,
        endpoint: Option<String>,
        providers: Vec<Box<dyn CredentialProvider>>,
    ) -> Result<Self> {
        let region = region.into();
        let client = Ec2Client::new(
            region.clone(),
            endpoint,
            Box::new(ChainProvider::new(providers)),
        )?;

        Ok(Self::new(region, Box::new(client)))
    }

    /// Source identifier, `ec2:<region>`
    pub fn source(&self) -> String {
        format!("ec2:{}", self.region)
    }
}

#[async_trait]
impl Discoverer for Ec2Discoverer {
    fn mechanism(&self) -> &'static str {
        "ec2"
    }

    fn sources(&self) -> Vec<String> {
        vec![self.source()]
    }

    async fn refresh(&self) -> Result<TargetGroup> {
        let reservations = self.api.describe_instances().await?;
        let targets = instance_targets(&reservations, &self.region);

        Ok(TargetGroup::new(self.source(), targets))
    }
}

/// Turn reservations into scrape targets, preserving inventory order
pub fn instance_targets(reservations: &[Reservation], region: &str) -> Vec<LabelSet> {
    reservations
        .iter()
        .flat_map(|reservation| &reservation.instances_set.items)
        .filter_map(|instance| instance_target(instance, region))
        .collect()
}

/// Target for a single instance, `None` when it has no private address yet
pub fn instance_target(instance: &Instance, region: &str) -> Option<LabelSet> {
    let Some(ip) = instance
        .private_ip_address
        .as_deref()
        .filter(|ip| !ip.is_empty())
    else {
        debug!("Skipping instance {} without private IP", instance.instance_id);
        return None;
    };

    let mut target = LabelSet::with_address(format!("{}:{}", ip, DEFAULT_AGENT_PORT))
        .with(REGION_LABEL, region);

    if let Some(tag) = instance.tag_set.items.iter().find(|tag| tag.key == NAME_TAG) {
        target.insert(NAME_LABEL, tag.value.as_str());
    }

    Some(target)
}

/// Factory for creating EC2 discoverers with the default credential chain
pub struct Ec2Factory;

impl DiscovererFactory for Ec2Factory {
    fn create(&self, config: &DiscoveryConfig) -> Result<Box<dyn Discoverer>> {
        match config {
            DiscoveryConfig::Ec2 {
                region, endpoint, ..
            } => {
                let client = Ec2Client::new(
                    region.clone(),
                    endpoint.clone(),
                    Box::new(ChainProvider::default_chain()?),
                )?;

                Ok(Box::new(Ec2Discoverer::new(region.clone(), Box::new(client))))
            }
            _ => Err(Error::config("Invalid config for EC2 discoverer")),
        }
    }
}

/// Register the EC2 discoverer with a registry
pub fn register(registry: &DiscovererRegistry) {
    registry.register("ec2", Box::new(Ec2Factory));
}
