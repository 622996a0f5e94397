//! Outbound HTTP for the metadata and snapshot sites.
//!
//! Every page the pipeline reads goes through [`PageSource`], so tests can
//! substitute [`StaticPages`](crate::fakes::StaticPages) for the network.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Failures while fetching a page.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} timed out")]
    Timeout { url: String },

    #[error("GET {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Source of page bodies addressed by URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// GET `url` and return the body as text.
    async fn get_text(&self, url: &str) -> Result<String, HttpError>;
}

/// `reqwest`-backed page source with a per-request timeout.
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("debrepro/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(HttpError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        debug!(url = %url, "GET");
        let classify = |source: reqwest::Error| {
            if source.is_timeout() {
                HttpError::Timeout {
                    url: url.to_string(),
                }
            } else {
                HttpError::Request {
                    url: url.to_string(),
                    source,
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(classify)
    }
}

/// Resolve a possibly relative `href` found on the page at `page_url`.
pub fn resolve_url(page_url: &str, href: &str) -> Result<String, HttpError> {
    let base =
        reqwest::Url::parse(page_url).map_err(|_| HttpError::InvalidUrl(page_url.to_string()))?;
    base.join(href)
        .map(|u| u.to_string())
        .map_err(|_| HttpError::InvalidUrl(href.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_path() {
        let url = resolve_url(
            "https://tests.reproducible-builds.org/debian/rb-pkg/testing/amd64/sed.html",
            "/debian/testing/amd64/sed_4.4-1_amd64.buildinfo",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://tests.reproducible-builds.org/debian/testing/amd64/sed_4.4-1_amd64.buildinfo"
        );
    }

    #[test]
    fn test_resolve_relative_and_full() {
        let page = "https://example.org/a/b/page.html";
        assert_eq!(
            resolve_url(page, "info.html").unwrap(),
            "https://example.org/a/b/info.html"
        );
        assert_eq!(
            resolve_url(page, "https://other.org/x").unwrap(),
            "https://other.org/x"
        );
    }

    #[test]
    fn test_resolve_rejects_bad_base() {
        assert!(matches!(
            resolve_url("not a url", "x"),
            Err(HttpError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpPageSource::new(Duration::from_secs(5)).is_ok());
    }
}
