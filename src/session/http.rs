//! reqwest-backed browsing session.
//!
//! Pages are fetched with the imported cookie jar and a browser User-Agent,
//! and queried with `scraper`. This backend cannot execute a client-side
//! challenge; re-reading the page (`snapshot`) re-fetches it, which is enough
//! to wait out interstitials that clear on their own or once cookies are
//! accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::{debug, instrument};
use url::Url;

use super::dom::{ElementData, ElementQuery, extract_elements};
use super::filename::{filename_from_url, parse_content_disposition, sanitize_filename};
use super::{BrowserSession, DownloadTarget, DownloadedFile, PageSnapshot, SessionError};

/// Browser User-Agent sent with every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default ceiling for a single downloaded artifact (16 MiB).
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// HTTP implementation of [`BrowserSession`].
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    current: Option<PageSnapshot>,
    max_download_bytes: u64,
}

impl HttpSession {
    /// Creates a session that sends the cookies in `cookie_jar`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Client`] if the HTTP client cannot be built.
    pub fn new(cookie_jar: Arc<Jar>) -> Result<Self, SessionError> {
        Self::with_timeouts(
            cookie_jar,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )
    }

    /// Creates a session with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Client`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip(cookie_jar))]
    pub fn with_timeouts(
        cookie_jar: Arc<Jar>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT)
            .cookie_provider(cookie_jar)
            .build()
            .map_err(|e| SessionError::Client(e.to_string()))?;

        Ok(Self {
            client,
            current: None,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
        })
    }

    /// Sets the largest artifact the session will accept.
    #[must_use]
    pub fn with_max_download_bytes(mut self, limit: u64) -> Self {
        self.max_download_bytes = limit;
        self
    }

    fn current_page(&self) -> Result<&PageSnapshot, SessionError> {
        self.current.as_ref().ok_or(SessionError::NoPage)
    }

    async fn fetch_page(&self, url: &str) -> Result<PageSnapshot, SessionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::from_reqwest(url, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content = response
            .text()
            .await
            .map_err(|e| SessionError::from_reqwest(url, &e))?;

        debug!(url = %url, final_url = %final_url, status, bytes = content.len(), "page loaded");
        Ok(PageSnapshot {
            url: final_url,
            status,
            content,
        })
    }

    /// Resolves a download target to an absolute URL.
    fn resolve_target(&self, target: &DownloadTarget) -> Result<Url, SessionError> {
        match target {
            DownloadTarget::Url(url) => {
                Url::parse(url).map_err(|_| SessionError::InvalidUrl { url: url.clone() })
            }
            DownloadTarget::Selector(selector) => {
                let page = self.current_page()?;
                let href = extract_elements(&page.content, &ElementQuery::new(selector.clone()))?
                    .into_iter()
                    .find_map(|element| element.attr("href").map(str::to_string))
                    .ok_or_else(|| SessionError::ElementNotFound {
                        selector: selector.clone(),
                    })?;
                let base = Url::parse(&page.url).map_err(|_| SessionError::InvalidUrl {
                    url: page.url.clone(),
                })?;
                base.join(&href)
                    .map_err(|_| SessionError::InvalidUrl { url: href })
            }
        }
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<PageSnapshot, SessionError> {
        let page = self.fetch_page(url).await?;
        self.current = Some(page.clone());
        Ok(page)
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, SessionError> {
        let url = self.current_page()?.url.clone();
        let page = self.fetch_page(&url).await?;
        self.current = Some(page.clone());
        Ok(page)
    }

    async fn query(&mut self, query: &ElementQuery) -> Result<Vec<ElementData>, SessionError> {
        extract_elements(&self.current_page()?.content, query)
    }

    #[instrument(skip(self))]
    async fn trigger_download(
        &mut self,
        target: &DownloadTarget,
    ) -> Result<DownloadedFile, SessionError> {
        let url = self.resolve_target(target)?;
        let url_str = url.to_string();

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SessionError::from_reqwest(&url_str, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::HttpStatus {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type.to_ascii_lowercase().contains("text/html") {
            return Err(SessionError::NotAFile {
                url: url_str,
                content_type,
            });
        }

        let suggested_filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition)
            .or_else(|| filename_from_url(response.url()))
            .map(|name| sanitize_filename(&name));

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SessionError::from_reqwest(&url_str, &e))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_download_bytes {
                return Err(SessionError::TooLarge {
                    url: url_str,
                    limit: self.max_download_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(url = %url_str, bytes = bytes.len(), "download complete");
        Ok(DownloadedFile {
            bytes,
            suggested_filename,
        })
    }

    async fn close(&mut self) {
        self.current = None;
        debug!("http session closed");
    }
}
