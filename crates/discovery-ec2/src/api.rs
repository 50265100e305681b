// # EC2 Query API client
//
// Lists instances with `DescribeInstances` (API version 2016-11-15).
//
// ## API Reference
//
// - DescribeInstances: GET `/?Action=DescribeInstances&Version=2016-11-15[&NextToken=...]`
// - Responses are XML; large inventories are paginated through `nextToken`
// - Requests are signed with Signature Version 4 (service `ec2`)

use async_trait::async_trait;
use chrono::Utc;
use discovery_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::credentials::CredentialProvider;
use crate::sigv4::{SignableRequest, Signer, canonical_query};

/// Pinned Query API version
const API_VERSION: &str = "2016-11-15";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// EC2 wraps every list in `<xxxSet><item>..</item></xxxSet>`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ItemSet<T> {
    #[serde(rename = "item", default)]
    pub items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

/// One page of a DescribeInstances response
#[derive(Debug, Deserialize)]
pub struct DescribeInstancesResponse {
    #[serde(rename = "reservationSet", default)]
    pub reservation_set: ItemSet<Reservation>,

    #[serde(rename = "nextToken", default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reservation {
    #[serde(rename = "reservationId", default)]
    pub reservation_id: String,

    #[serde(rename = "instancesSet", default)]
    pub instances_set: ItemSet<Instance>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Instance {
    #[serde(rename = "instanceId", default)]
    pub instance_id: String,

    /// Absent until the instance has a network interface
    #[serde(rename = "privateIpAddress", default)]
    pub private_ip_address: Option<String>,

    #[serde(rename = "tagSet", default)]
    pub tag_set: ItemSet<Tag>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Decode one DescribeInstances response page
pub fn parse_describe_instances(body: &str) -> Result<DescribeInstancesResponse> {
    quick_xml::de::from_str(body)
        .map_err(|e| Error::decode(format!("Invalid DescribeInstances response: {}", e)))
}

/// Instance inventory as seen by the discoverer
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// All reservations visible to the account in this region, every page
    async fn describe_instances(&self) -> Result<Vec<Reservation>>;
}

/// Signed HTTP client for the EC2 Query API
pub struct Ec2Client {
    /// Endpoint without trailing slash, e.g. `https://ec2.us-east-1.amazonaws.com`
    endpoint: String,

    /// `host[:port]` of the endpoint, covered by the signature
    host: String,

    region: String,

    credentials: Box<dyn CredentialProvider>,

    client: reqwest::Client,
}

impl Ec2Client {
    /// Create a client
    ///
    /// # Parameters
    ///
    /// - `region`: AWS region, also used for signing
    /// - `endpoint`: Override of the regional endpoint
    /// - `credentials`: Provider (usually a chain) resolving credentials per request
    pub fn new(
        region: impl Into<String>,
        endpoint: Option<String>,
        credentials: Box<dyn CredentialProvider>,
    ) -> Result<Self> {
        let region = region.into();
        let endpoint = endpoint
            .unwrap_or_else(|| default_endpoint(&region))
            .trim_end_matches('/')
            .to_string();

        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| Error::config(format!("Invalid EC2 endpoint {}: {}", endpoint, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::config(format!(
                    "EC2 endpoint has no host: {}",
                    endpoint
                )));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            host,
            region,
            credentials,
            client,
        })
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn describe_page(&self, next_token: Option<&str>) -> Result<DescribeInstancesResponse> {
        let mut params = vec![("Action", "DescribeInstances"), ("Version", API_VERSION)];
        if let Some(token) = next_token {
            params.push(("NextToken", token));
        }
        let query = canonical_query(&params);

        let credentials = self.credentials.retrieve().await?;
        let signed = Signer::new(&credentials, &self.region, "ec2").sign(
            &SignableRequest {
                method: "GET",
                host: &self.host,
                path: "/",
                query: &query,
                headers: &[],
                payload: b"",
            },
            Utc::now(),
        )?;

        let mut request = self.client.get(format!("{}/?{}", self.endpoint, query));
        for (name, value) in signed {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("DescribeInstances request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read DescribeInstances response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::http(format!(
                "DescribeInstances returned {}: {}",
                status,
                body.trim()
            )));
        }

        parse_describe_instances(&body)
    }
}

#[async_trait]
impl Ec2Api for Ec2Client {
    async fn describe_instances(&self) -> Result<Vec<Reservation>> {
        let mut reservations = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.describe_page(next_token.as_deref()).await?;
            pages += 1;
            reservations.extend(page.reservation_set.items);

            match page.next_token.filter(|token| !token.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!(
            "DescribeInstances returned {} reservation(s) in {} page(s)",
            reservations.len(),
            pages
        );
        Ok(reservations)
    }
}

/// Regional EC2 endpoint
pub fn default_endpoint(region: &str) -> String {
    format!("https://ec2.{}.amazonaws.com", region)
}
