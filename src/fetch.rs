//! Plain-text HTTP fetching for update probes and script downloads.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::UpdatesConfig;

/// Errors fetching a remote script or probe
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Source of remote script text
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    /// Fetch `url` and return the response body as text
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// [`ScriptFetcher`] backed by `reqwest`
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(config: &UpdatesConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScriptFetcher for ReqwestFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let parsed = validate_url(url)?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            reason: format!("Failed to read response: {}", e),
        })
    }
}

/// Only absolute http(s) URLs are fetched
pub fn validate_url(url: &str) -> Result<url::Url, FetchError> {
    let parsed = url::Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/a.meta.js").is_ok());
        assert!(validate_url(" http://example.com/a.js ").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/a.js"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(validate_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_fetch_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/draw.meta.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("// @version 2.0"))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new(&UpdatesConfig::default()).unwrap();
        let body = fetcher
            .fetch_text(&format!("{}/draw.meta.js", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "// @version 2.0");
    }

    #[tokio::test]
    async fn test_fetch_text_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = ReqwestFetcher::new(&UpdatesConfig::default()).unwrap();
        let err = fetcher
            .fetch_text(&format!("{}/missing.js", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
}
