use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use tracing::{debug, warn};

use crate::{Error, Result};

const BOT_USER_AGENT: &str = "Mozilla/5.0 (compatible; LidomScrape/0.1)";
const BOT_ACCEPT_LANGUAGE: &str = "es-DO,es;q=0.9,en;q=0.8";
/// Pause before the single retry of a one-off page fetch.
const RETRY_PAUSE: Duration = Duration::from_millis(1500);

/// Given a URL, returns the document text or a transport error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    // Client uses Arc internally so we can clone cheaply
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BOT_USER_AGENT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(BOT_ACCEPT_LANGUAGE));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// Requests a page and returns a `Result<String>` containing the HTML.
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "GET");
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::Transport {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: status
                    .canonical_reason()
                    .unwrap_or("non-success status")
                    .to_string(),
            });
        }
        let html = res.text().await?;
        Ok(html)
    }
}

/// Fetch used for one-off pages: a transport failure is retried once after a short
/// pause, any other outcome is returned as is.
pub async fn fetch_with_retry(fetcher: &dyn Fetcher, url: &str) -> Result<String> {
    match fetcher.fetch(url).await {
        Err(err @ Error::Transport { .. }) => {
            warn!(%err, "fetch failed, retrying once");
            tokio::time::sleep(RETRY_PAUSE).await;
            fetcher.fetch(url).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for Flaky {
        async fn fetch(&self, url: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::Transport {
                    url: url.to_string(),
                    status: Some(503),
                    reason: "Service Unavailable".into(),
                });
            }
            Ok("<html></html>".into())
        }
    }

    #[tokio::test]
    async fn transport_errors_are_retried_once() {
        let flaky = Flaky {
            calls: AtomicUsize::new(0),
        };
        let html = fetch_with_retry(&flaky, "http://example.test/").await.unwrap();
        assert_eq!(html, "<html></html>");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }
}
