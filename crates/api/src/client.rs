//! Shared HTTP plumbing for the boundary clients.
//!
//! [`ServiceClient`] owns a configured `reqwest::Client` bound to one validated base URL.
//! It provides:
//!
//! - default `Accept`/`User-Agent` headers and an optional bearer token
//! - base URL validation (any scheme on localhost, `https` elsewhere)
//! - JSON POST helpers that map transport and status failures to [`BoundaryError`]

use std::env;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, header};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;
use zkflow_util::redact_sensitive;

use crate::BoundaryError;

/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]"];

/// Upper bound for a single HTTP exchange. Step timeouts are enforced separately by the engine.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServiceClient {
    pub base_url: Url,
    pub http: Client,
    pub user_agent: String,
}

impl ServiceClient {
    /// Build a client for `base_url`, sending `Authorization: Bearer <token>` when a token is given.
    pub fn new(base_url: &str, api_token: Option<&str>) -> Result<Self, BoundaryError> {
        let base_url = validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        if let Some(api_token) = api_token.filter(|token| !token.trim().is_empty()) {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_token.trim()))
                .map_err(|_| BoundaryError::configuration("api token contains characters not allowed in a header"))?;
            default_headers.insert(header::AUTHORIZATION, value);
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| BoundaryError::configuration(format!("build http client: {error}")))?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("zkflow/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Resolve an API-relative path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, BoundaryError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|error| BoundaryError::configuration(format!("invalid endpoint '{path}': {error}")))
    }

    pub fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        debug!(url = %redact_sensitive(url.as_str()), %method, "building request");
        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    /// POST a JSON body and decode a JSON answer. Non-2xx statuses become [`BoundaryError::Rejected`].
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        extra_headers: &[(&str, &str)],
    ) -> Result<JsonValue, BoundaryError> {
        let url = self.endpoint(path)?;
        let mut request = self.request(reqwest::Method::POST, url).json(body);
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(BoundaryError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(BoundaryError::from)?;
        if !status.is_success() {
            return Err(BoundaryError::rejected(status.as_u16(), text));
        }
        if text.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_json::from_str(&text).map_err(|error| BoundaryError::malformed(format!("decode response from {path}: {error}")))
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - the URL must parse and include a host
/// - `localhost`, `127.0.0.1` and `::1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
///
/// A trailing slash is appended so relative endpoints join under the base path.
pub fn validate_base_url(base: &str) -> Result<Url, BoundaryError> {
    let mut parsed = Url::parse(base.trim())
        .map_err(|error| BoundaryError::configuration(format!("invalid base URL '{}': {}", redact_sensitive(base), error)))?;

    let host_name = parsed
        .host_str()
        .ok_or_else(|| BoundaryError::configuration(format!("base URL '{base}' must include a host")))?;

    let is_local = LOCALHOST_DOMAINS.iter().any(|allowed| host_name.eq_ignore_ascii_case(allowed));
    if !is_local && parsed.scheme() != "https" {
        return Err(BoundaryError::configuration(format!(
            "base URL must use https for non-localhost hosts; got '{}://{}'",
            parsed.scheme(),
            host_name
        )));
    }

    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_may_use_plain_http() {
        let url = validate_base_url("http://localhost:8001").expect("localhost allowed");
        assert_eq!(url.as_str(), "http://localhost:8001/");
        assert!(validate_base_url("http://127.0.0.1:9000/api").is_ok());
    }

    #[test]
    fn remote_hosts_require_https() {
        assert!(matches!(
            validate_base_url("http://proofs.example.com"),
            Err(BoundaryError::Configuration { .. })
        ));
        assert!(validate_base_url("https://proofs.example.com").is_ok());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn endpoints_join_under_the_base_path() {
        let client = ServiceClient::new("https://rail.example.com/v1", Some("secret")).expect("client");
        assert_eq!(
            client.endpoint("/transfers").expect("endpoint").as_str(),
            "https://rail.example.com/v1/transfers"
        );
    }

    #[tokio::test]
    async fn https_endpoints_reach_the_transport() {
        let client = ServiceClient::new("https://127.0.0.1:1", None).expect("client");
        let url = client.endpoint("proofs").expect("endpoint");
        let error = client
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .expect_err("nothing listens on port 1");

        let mut chain = error.to_string();
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            chain.push_str(&format!(": {cause}"));
            source = cause.source();
        }
        assert!(error.is_connect(), "{chain}");
        assert!(!chain.contains("scheme is not http"), "{chain}");
        assert!(BoundaryError::from(error).is_unreachable());
    }

    #[test]
    fn blank_tokens_are_ignored() {
        assert!(ServiceClient::new("http://localhost:8002", Some("  ")).is_ok());
        assert!(matches!(
            ServiceClient::new("http://localhost:8002", Some("bad\ntoken")),
            Err(BoundaryError::Configuration { .. })
        ));
    }
}
