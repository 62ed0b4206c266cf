//! HTTP transport and package download.
//!
//! One GET per call, hard timeout, no retries. Non-2xx responses are
//! rejected at the transport instead of being handed on as payload.

use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Thin blocking HTTP client shared by the manifest and package fetchers
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// GET `url` and return the body, or a one-line reason
    pub fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, String> {
        let client = Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(timeout)
            .build()
            .map_err(|e| format!("client build failed: {}", e))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| format!("request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} returned HTTP {}", url, status));
        }

        let bytes = response
            .bytes()
            .map_err(|e| format!("reading body from {} failed: {}", url, e))?;
        debug!("fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(format!("upkeep/{}", env!("CARGO_PKG_VERSION")))
    }
}

/// Downloads package archives
#[derive(Debug, Clone, Default)]
pub struct PackageFetcher {
    http: HttpFetcher,
}

impl PackageFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// Package bytes, or `None` on any failure (including an empty body)
    pub fn fetch(&self, url: &str, timeout: Duration) -> Option<Vec<u8>> {
        match self.http.get(url, timeout) {
            Ok(bytes) if bytes.is_empty() => {
                warn!("package download from {} returned an empty body", url);
                None
            }
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("package download failed: {}", e);
                None
            }
        }
    }
}

/// File name for a downloaded package, taken from the URL path.
///
/// Keeps the extension so extraction can dispatch on it. Query strings and
/// fragments are dropped. Returns `None` when the path has no final segment.
pub fn package_file_name(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => without_query,
    };

    let name = path.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}
