//! Endpoint resolution: derive the signaling API endpoint and stream name
//! from a play page URL.
//!
//! SRS-style players embed the play API endpoint in the page script, either
//! as a `var url = "..."` assignment or an object literal field. The resolver
//! fetches the page once and scans for those patterns; the page content is
//! assumed static for the session, so resolution is never retried.

use crate::{Error, Result};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Endpoint patterns probed against the page text, in priority order.
const ENDPOINT_PATTERNS: &[&str] = &[
    r#"var\s+url\s*=\s*"([^"]+)""#,
    r#"url\s*:\s*"([^"]+)""#,
    r#"api_server\s*=\s*"([^"]+)""#,
    r#"'([^']*/rtc/[^']*?)'"#,
];

/// Default stream name when neither the flag nor the page URL carries one
const DEFAULT_STREAM_NAME: &str = "livestream";

/// Resolved signaling target, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// The play page (or direct API) URL the run was started with
    pub page_url: String,
    /// Resolved play API endpoint, always non-empty
    pub api_endpoint: String,
    /// Stream name to request from the server
    pub stream_name: String,
}

/// Resolves a play page URL into a [`StreamTarget`]
pub struct EndpointResolver {
    client: reqwest::Client,
}

impl EndpointResolver {
    /// Create a resolver. Certificate verification is disabled because SRS
    /// deployments commonly serve the play page with self-signed TLS.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Resolution(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Resolve the signaling endpoint and stream name for `page_url`.
    ///
    /// A URL whose path already contains `/rtc/` is treated as a direct API
    /// endpoint and used without fetching anything. Otherwise the page is
    /// fetched and scanned; an unreachable page or a page without any
    /// recognizable endpoint pattern is a terminal [`Error::Resolution`].
    pub async fn resolve(&self, page_url: &str, stream_override: Option<&str>) -> Result<StreamTarget> {
        let parsed = Url::parse(page_url)
            .map_err(|e| Error::Resolution(format!("invalid page URL {page_url}: {e}")))?;

        let stream_name = stream_override
            .map(str::to_string)
            .or_else(|| stream_name_from_url(&parsed))
            .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string());

        if parsed.path().contains("/rtc/") {
            info!("Using {} as a direct API endpoint", page_url);
            return Ok(StreamTarget {
                page_url: page_url.to_string(),
                api_endpoint: page_url.to_string(),
                stream_name,
            });
        }

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("failed to fetch play page: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Resolution(format!(
                "play page returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Resolution(format!("failed to read play page body: {e}")))?;

        let endpoint = scan_for_endpoint(&body)
            .ok_or_else(|| Error::Resolution("no API endpoint pattern found in page".to_string()))?;

        let api_endpoint = absolutize(&parsed, &endpoint)?;
        info!("Resolved API endpoint {} for stream {}", api_endpoint, stream_name);

        Ok(StreamTarget {
            page_url: page_url.to_string(),
            api_endpoint,
            stream_name,
        })
    }
}

/// Scan page text for the first matching endpoint pattern
fn scan_for_endpoint(body: &str) -> Option<String> {
    for pattern in ENDPOINT_PATTERNS {
        // Patterns are fixed literals, so compilation cannot fail.
        let re = Regex::new(pattern).expect("invalid endpoint pattern");
        if let Some(captures) = re.captures(body) {
            let endpoint = captures.get(1)?.as_str().to_string();
            debug!("Pattern {:?} matched endpoint {}", pattern, endpoint);
            return Some(endpoint);
        }
    }
    None
}

/// Join a possibly-relative endpoint against the page origin
fn absolutize(page: &Url, endpoint: &str) -> Result<String> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.to_string());
    }

    page.join(endpoint)
        .map(|u| u.to_string())
        .map_err(|e| Error::Resolution(format!("cannot join endpoint {endpoint}: {e}")))
}

/// Pull a `stream=` query parameter off the page URL
fn stream_name_from_url(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "stream")
        .map(|(_, value)| value.into_owned())
        .filter(|name| !name.is_empty())
}
