//! AWS Signature Version 4 request signing
//!
//! Only what the EC2 Query API needs: a request with a query string, a
//! handful of headers and an (often empty) payload.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;
use discovery_core::{Error, Result};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Everything except the RFC 3986 unreserved characters is escaped
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a query key or value the way SigV4 expects
pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Canonical (sorted, encoded) form of a query string
///
/// The same string must be used in the request URL, otherwise the server
/// computes a different signature.
pub fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// The parts of an HTTP request covered by the signature
pub struct SignableRequest<'a> {
    pub method: &'a str,
    /// `host[:port]` exactly as sent in the Host header
    pub host: &'a str,
    pub path: &'a str,
    /// Already canonical, see [`canonical_query`]
    pub query: &'a str,
    /// Extra headers to sign besides host, x-amz-date and the session token
    pub headers: &'a [(&'a str, &'a str)],
    pub payload: &'a [u8],
}

/// Signs requests for one region and service
pub struct Signer<'a> {
    credentials: &'a Credentials,
    region: &'a str,
    service: &'a str,
}

impl<'a> Signer<'a> {
    pub fn new(credentials: &'a Credentials, region: &'a str, service: &'a str) -> Self {
        Self {
            credentials,
            region,
            service,
        }
    }

    /// Compute the headers to attach to the request
    ///
    /// Returns `x-amz-date`, `x-amz-security-token` (when the credentials
    /// carry a session token) and `authorization`.
    pub fn sign(
        &self,
        request: &SignableRequest<'_>,
        time: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        let amz_date = time.format("%Y%m%dT%H%M%SZ").to_string();
        let date = time.format("%Y%m%d").to_string();

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        headers.push(("host".to_string(), request.host.to_string()));
        headers.push(("x-amz-date".to_string(), amz_date.clone()));
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = canonical_request(request, &headers, &signed_headers);
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = signing_key(
            &self.credentials.secret_access_key,
            &date,
            self.region,
            self.service,
        )?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        let mut out = vec![("x-amz-date".to_string(), amz_date)];
        if let Some(token) = &self.credentials.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out.push((
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.credentials.access_key_id, scope, signed_headers, signature
            ),
        ));
        Ok(out)
    }
}

fn canonical_request(
    request: &SignableRequest<'_>,
    sorted_headers: &[(String, String)],
    signed_headers: &str,
) -> String {
    let canonical_headers: String = sorted_headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        request.query,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(request.payload))
    )
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::credentials(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    #[test]
    fn derives_documented_signing_key() {
        let key = signing_key(SECRET, "20150830", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn signs_documented_example_request() {
        let credentials = Credentials::new("AKIDEXAMPLE", SECRET);
        let signer = Signer::new(&credentials, "us-east-1", "iam");
        let query = canonical_query(&[("Version", "2010-05-08"), ("Action", "ListUsers")]);

        let headers = signer.sign(
            &SignableRequest {
                method: "GET",
                host: "iam.amazonaws.com",
                path: "/",
                query: &query,
                headers: &[(
                    "Content-Type",
                    "application/x-www-form-urlencoded; charset=utf-8",
                )],
                payload: b"",
            },
            example_time(),
        )
        .unwrap();

        assert_eq!(headers[0], ("x-amz-date".to_string(), "20150830T123600Z".to_string()));
        assert_eq!(
            headers[1].1,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
    }

    #[test]
    fn session_token_is_signed_and_returned() {
        let mut credentials = Credentials::new("AKIDEXAMPLE", SECRET);
        credentials.session_token = Some("token".to_string());
        let signer = Signer::new(&credentials, "us-east-1", "ec2");

        let headers = signer.sign(
            &SignableRequest {
                method: "GET",
                host: "ec2.us-east-1.amazonaws.com",
                path: "/",
                query: "Action=DescribeInstances",
                headers: &[],
                payload: b"",
            },
            example_time(),
        )
        .unwrap();

        let names: Vec<&str> = headers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["x-amz-date", "x-amz-security-token", "authorization"]);
        assert!(headers[2].1.contains("SignedHeaders=host;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn any_secret_length_produces_a_signature() {
        let long = "x".repeat(200);
        for secret in ["", "k", long.as_str()] {
            let credentials = Credentials::new("AKIDEXAMPLE", secret);
            let headers = Signer::new(&credentials, "us-east-1", "ec2")
                .sign(
                    &SignableRequest {
                        method: "GET",
                        host: "ec2.us-east-1.amazonaws.com",
                        path: "/",
                        query: "Action=DescribeInstances",
                        headers: &[],
                        payload: b"",
                    },
                    example_time(),
                )
                .unwrap();

            assert!(headers.last().unwrap().1.contains("Signature="));
        }
    }

    #[test]
    fn canonical_query_sorts_and_escapes() {
        assert_eq!(
            canonical_query(&[
                ("Version", "2016-11-15"),
                ("NextToken", "a b/c=="),
                ("Action", "DescribeInstances"),
            ]),
            "Action=DescribeInstances&NextToken=a%20b%2Fc%3D%3D&Version=2016-11-15"
        );
    }
}
