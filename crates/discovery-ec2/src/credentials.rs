// # AWS Credential Providers
//
// Credentials are resolved through an explicit, ordered chain of providers.
// The default chain is:
//
// 1. `EnvProvider`: `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (and the
//    legacy `AWS_ACCESS_KEY` / `AWS_SECRET_KEY` names)
// 2. `InstanceRoleProvider`: the role attached to the EC2 instance, read
//    from the instance metadata service
//
// The first provider that yields credentials wins, so environment
// credentials take precedence over the instance role when both exist.
//
// ## Security
//
// Secret keys and session tokens NEVER appear in logs or Debug output.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discovery_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default instance metadata service endpoint
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// The metadata service is link-local; anything slower means it is absent
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifetime requested for IMDSv2 session tokens
const IMDS_TOKEN_TTL_SECS: &str = "21600";

/// Role credentials are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Resolved AWS credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    /// ⚠️ NEVER log this value
    pub secret_access_key: String,
    /// ⚠️ NEVER log this value
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Static credentials without session token or expiry
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    /// Whether the credentials should be refreshed at `now`
    pub fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::seconds(EXPIRY_MARGIN_SECS);
        self.expires_at
            .is_some_and(|expires_at| expires_at - margin <= now)
    }
}

// Custom Debug implementation that hides the secrets
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<REDACTED>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of AWS credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Provider name (for logging)
    fn name(&self) -> &'static str;

    /// Resolve credentials, or explain why this provider has none
    async fn retrieve(&self) -> Result<Credentials>;
}

/// Reads credentials from environment variables
pub struct EnvProvider {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl EnvProvider {
    /// Provider reading the process environment
    pub fn new() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Provider reading variables through `lookup` instead of the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn first_of(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| (self.lookup)(name))
            .find(|value| !value.is_empty())
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let access_key_id = self
            .first_of(&["AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY"])
            .ok_or_else(|| Error::credentials("AWS_ACCESS_KEY_ID not set"))?;
        let secret_access_key = self
            .first_of(&["AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"])
            .ok_or_else(|| Error::credentials("AWS_SECRET_ACCESS_KEY not set"))?;

        Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token: self.first_of(&["AWS_SESSION_TOKEN"]),
            expires_at: None,
        })
    }
}

/// Role credentials document served by the metadata service
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials {
    code: String,
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

/// Parse the role credentials document returned by the metadata service
fn parse_role_credentials(body: &str) -> Result<Credentials> {
    let doc: RoleCredentials = serde_json::from_str(body)?;

    if doc.code != "Success" {
        return Err(Error::credentials(format!(
            "Instance metadata returned code {}",
            doc.code
        )));
    }

    Ok(Credentials {
        access_key_id: doc.access_key_id,
        secret_access_key: doc.secret_access_key,
        session_token: doc.token,
        expires_at: doc.expiration,
    })
}

/// Reads the instance role credentials from the EC2 metadata service
///
/// Tries an IMDSv2 session token first and falls back to IMDSv1 requests
/// when the token endpoint is unavailable. Credentials are cached until
/// shortly before they expire.
pub struct InstanceRoleProvider {
    endpoint: String,
    client: reqwest::Client,
    cached: Mutex<Option<Credentials>>,
}

impl InstanceRoleProvider {
    /// Provider using the default metadata endpoint
    pub fn new() -> Result<Self> {
        Self::with_endpoint(DEFAULT_IMDS_ENDPOINT)
    }

    /// Provider using a custom metadata endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(IMDS_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            cached: Mutex::new(None),
        })
    }

    async fn session_token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}/latest/api/token", self.endpoint))
            .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            debug!("IMDSv2 token request returned {}, using IMDSv1", response.status());
            return None;
        }

        response.text().await.ok()
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Result<String> {
        let mut request = self.client.get(format!("{}{}", self.endpoint, path));
        if let Some(token) = token {
            request = request.header("X-aws-ec2-metadata-token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::credentials(format!("Instance metadata unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::credentials(format!(
                "Instance metadata {} returned {}",
                path,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::credentials(format!("Failed to read instance metadata: {}", e)))
    }

    async fn fetch(&self) -> Result<Credentials> {
        const ROLES_PATH: &str = "/latest/meta-data/iam/security-credentials/";

        let token = self.session_token().await;

        let roles = self.get(ROLES_PATH, token.as_deref()).await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| Error::credentials("No IAM role attached to this instance"))?;

        let body = self
            .get(&format!("{}{}", ROLES_PATH, role), token.as_deref())
            .await?;

        debug!("Resolved credentials for instance role {}", role);
        parse_role_credentials(&body)
    }
}

#[async_trait]
impl CredentialProvider for InstanceRoleProvider {
    fn name(&self) -> &'static str {
        "instance_role"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let mut cached = self.cached.lock().await;

        if let Some(credentials) = cached.as_ref()
            && !credentials.is_expiring(Utc::now())
        {
            return Ok(credentials.clone());
        }

        let credentials = self.fetch().await?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }
}

/// Ordered chain of credential providers
///
/// Providers are tried in order; the first success wins.
pub struct ChainProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainProvider {
    /// Chain over the given providers, in priority order
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Environment first, then the instance role
    pub fn default_chain() -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(EnvProvider::new()),
            Box::new(InstanceRoleProvider::new()?),
        ]))
    }

    /// Names of the providers, in the order they are tried
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl CredentialProvider for ChainProvider {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let mut failures = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match provider.retrieve().await {
                Ok(credentials) => {
                    debug!("Using AWS credentials from {} provider", provider.name());
                    return Ok(credentials);
                }
                Err(e) => failures.push(format!("{}: {}", provider.name(), e)),
            }
        }

        Err(Error::credentials(format!(
            "No credential provider succeeded [{}]",
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    fn env(vars: &[(&str, &str)]) -> EnvProvider {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvProvider::from_lookup(move |name| vars.get(name).cloned())
    }

    struct Fixed(&'static str, Option<Credentials>);

    #[async_trait]
    impl CredentialProvider for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn retrieve(&self) -> Result<Credentials> {
            self.1
                .clone()
                .ok_or_else(|| Error::credentials(format!("{} has nothing", self.0)))
        }
    }

    #[tokio::test]
    async fn env_provider_reads_standard_names() {
        let provider = env(&[
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "SECRET"),
            ("AWS_SESSION_TOKEN", "TOKEN"),
        ]);

        let credentials = assert_ok!(provider.retrieve().await);
        assert_eq!(credentials.access_key_id, "AKID");
        assert_eq!(credentials.secret_access_key, "SECRET");
        assert_eq!(credentials.session_token.as_deref(), Some("TOKEN"));
    }

    #[tokio::test]
    async fn env_provider_accepts_legacy_names() {
        let provider = env(&[("AWS_ACCESS_KEY", "AKID"), ("AWS_SECRET_KEY", "SECRET")]);

        let credentials = assert_ok!(provider.retrieve().await);
        assert_eq!(credentials, Credentials::new("AKID", "SECRET"));
    }

    #[tokio::test]
    async fn env_provider_requires_both_keys() {
        assert_err!(env(&[("AWS_ACCESS_KEY_ID", "AKID")]).retrieve().await);
        assert_err!(
            env(&[("AWS_ACCESS_KEY_ID", ""), ("AWS_SECRET_ACCESS_KEY", "S")])
                .retrieve()
                .await
        );
    }

    #[tokio::test]
    async fn chain_prefers_earlier_providers() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed("environment", Some(Credentials::new("ENV", "s")))),
            Box::new(Fixed("instance_role", Some(Credentials::new("ROLE", "s")))),
        ]);

        let credentials = assert_ok!(chain.retrieve().await);
        assert_eq!(credentials.access_key_id, "ENV");
    }

    #[tokio::test]
    async fn chain_falls_through_failures() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed("environment", None)),
            Box::new(Fixed("instance_role", Some(Credentials::new("ROLE", "s")))),
        ]);

        let credentials = assert_ok!(chain.retrieve().await);
        assert_eq!(credentials.access_key_id, "ROLE");
    }

    #[tokio::test]
    async fn chain_reports_every_failure() {
        let chain = ChainProvider::new(vec![
            Box::new(Fixed("environment", None)),
            Box::new(Fixed("instance_role", None)),
        ]);

        let err = assert_err!(chain.retrieve().await).to_string();
        assert!(err.contains("environment"), "{}", err);
        assert!(err.contains("instance_role"), "{}", err);
    }

    #[test]
    fn default_chain_order_is_environment_then_role() {
        let chain = ChainProvider::default_chain().unwrap();
        assert_eq!(chain.provider_names(), vec!["environment", "instance_role"]);
    }

    #[test]
    fn parses_role_credentials_document() {
        let credentials = parse_role_credentials(
            r#"{
                "Code": "Success",
                "LastUpdated": "2024-05-01T10:00:00Z",
                "Type": "AWS-HMAC",
                "AccessKeyId": "ASIAEXAMPLE",
                "SecretAccessKey": "secret",
                "Token": "session",
                "Expiration": "2024-05-01T16:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(credentials.session_token.as_deref(), Some("session"));
        assert_eq!(
            credentials.expires_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T16:00:00+00:00".to_string())
        );
    }

    #[test]
    fn rejects_unsuccessful_role_document() {
        let result = parse_role_credentials(
            r#"{"Code": "Failure", "AccessKeyId": "", "SecretAccessKey": ""}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn expiring_credentials_are_refreshed_early() {
        let now = Utc::now();
        let mut credentials = Credentials::new("a", "b");
        assert!(!credentials.is_expiring(now));

        credentials.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(credentials.is_expiring(now));

        credentials.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(!credentials.is_expiring(now));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut credentials = Credentials::new("AKID", "very-secret");
        credentials.session_token = Some("also-secret".to_string());

        let debug = format!("{:?}", credentials);
        assert!(debug.contains("AKID"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("also-secret"));
    }

    mod instance_role {
        use super::*;
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const ROLES_PATH: &str = "/latest/meta-data/iam/security-credentials/";

        fn role_document(expires_at: DateTime<Utc>) -> serde_json::Value {
            serde_json::json!({
                "Code": "Success",
                "Type": "AWS-HMAC",
                "AccessKeyId": "ASIAROLE",
                "SecretAccessKey": "role-secret",
                "Token": "role-session",
                "Expiration": expires_at.to_rfc3339(),
            })
        }

        #[tokio::test]
        async fn resolves_role_with_session_token() {
            let server = MockServer::start().await;

            Mock::given(method("PUT"))
                .and(path("/latest/api/token"))
                .and(header("X-aws-ec2-metadata-token-ttl-seconds", "21600"))
                .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(ROLES_PATH))
                .and(header("X-aws-ec2-metadata-token", "imds-token"))
                .respond_with(ResponseTemplate::new(200).set_body_string("web-role\n"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("{}web-role", ROLES_PATH)))
                .and(header("X-aws-ec2-metadata-token", "imds-token"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(role_document(Utc::now() + chrono::Duration::hours(6))),
                )
                .mount(&server)
                .await;

            let provider = InstanceRoleProvider::with_endpoint(server.uri()).unwrap();
            let credentials = assert_ok!(provider.retrieve().await);

            assert_eq!(credentials.access_key_id, "ASIAROLE");
            assert_eq!(credentials.secret_access_key, "role-secret");
            assert_eq!(credentials.session_token.as_deref(), Some("role-session"));
        }

        #[tokio::test]
        async fn falls_back_to_v1_when_token_endpoint_is_missing() {
            let server = MockServer::start().await;

            Mock::given(method("PUT"))
                .and(path("/latest/api/token"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(ROLES_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_string("web-role"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("{}web-role", ROLES_PATH)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(role_document(Utc::now() + chrono::Duration::hours(6))),
                )
                .mount(&server)
                .await;

            let provider = InstanceRoleProvider::with_endpoint(server.uri()).unwrap();
            let credentials = assert_ok!(provider.retrieve().await);
            assert_eq!(credentials.access_key_id, "ASIAROLE");

            let requests = server.received_requests().await.unwrap();
            assert!(
                requests
                    .iter()
                    .filter(|r| r.method.as_str() == "GET")
                    .all(|r| !r.headers.contains_key("x-aws-ec2-metadata-token"))
            );
        }

        #[tokio::test]
        async fn caches_until_close_to_expiry() {
            let server = MockServer::start().await;

            Mock::given(method("PUT"))
                .and(path("/latest/api/token"))
                .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(ROLES_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_string("web-role"))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("{}web-role", ROLES_PATH)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(role_document(Utc::now() + chrono::Duration::hours(6))),
                )
                .expect(1)
                .mount(&server)
                .await;

            let provider = InstanceRoleProvider::with_endpoint(server.uri()).unwrap();
            let first = assert_ok!(provider.retrieve().await);
            let second = assert_ok!(provider.retrieve().await);
            assert_eq!(first, second);
        }

        #[tokio::test]
        async fn refetches_expiring_credentials() {
            let server = MockServer::start().await;

            Mock::given(method("PUT"))
                .and(path("/latest/api/token"))
                .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(ROLES_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_string("web-role"))
                .expect(2)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("{}web-role", ROLES_PATH)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(role_document(Utc::now() + chrono::Duration::seconds(60))),
                )
                .expect(2)
                .mount(&server)
                .await;

            let provider = InstanceRoleProvider::with_endpoint(server.uri()).unwrap();
            assert_ok!(provider.retrieve().await);
            assert_ok!(provider.retrieve().await);
        }

        #[tokio::test]
        async fn missing_role_is_a_credentials_error() {
            let server = MockServer::start().await;

            Mock::given(method("PUT"))
                .and(path("/latest/api/token"))
                .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(ROLES_PATH))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;

            let provider = InstanceRoleProvider::with_endpoint(server.uri()).unwrap();
            let err = assert_err!(provider.retrieve().await);
            assert!(matches!(err, Error::Credentials(_)), "{err}");
        }
    }
}
