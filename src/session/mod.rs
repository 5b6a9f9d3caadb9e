//! Browsing-session capability used by the crawler and item processor.
//!
//! The pipeline never talks to an automation backend directly. Everything it
//! needs from the single, stateful session is expressed by [`BrowserSession`]:
//! navigate to a URL, re-read the current page, query elements on it, and
//! trigger a file download. [`HttpSession`] is the bundled backend; tests
//! substitute scripted sessions.
//!
//! A session has exactly one current page, so calls must never overlap.
//! Every method takes `&mut self` to make that a compile-time property.

mod dom;
mod error;
mod filename;
mod http;

pub use dom::{ElementData, ElementQuery, extract_elements};
pub use error::SessionError;
pub use http::{BROWSER_USER_AGENT, HttpSession};

use async_trait::async_trait;

/// Rendered content of the session's current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    /// Location after redirects.
    pub url: String,
    /// HTTP status of the response that produced the page.
    pub status: u16,
    /// Raw page markup.
    pub content: String,
}

impl PageSnapshot {
    /// Returns true for 2xx responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What to download: a control on the current page, or an explicit URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// First element matching this selector on the current page.
    Selector(String),
    /// Absolute URL.
    Url(String),
}

/// Bytes of a completed download.
#[derive(Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    /// Filename offered by the server, if any.
    pub suggested_filename: Option<String>,
}

impl std::fmt::Debug for DownloadedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedFile")
            .field("bytes", &self.bytes.len())
            .field("suggested_filename", &self.suggested_filename)
            .finish()
    }
}

/// Capability interface over a controlled browser or HTTP session.
///
/// Implementations must be usable behind `&mut dyn BrowserSession`; this
/// trait uses `async_trait` because native async trait methods are not
/// object-safe.
#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `url` and makes it the current page.
    ///
    /// Non-2xx responses are still pages (challenge interstitials are often
    /// served as 403/503); only transport failures are errors.
    async fn navigate(&mut self, url: &str) -> Result<PageSnapshot, SessionError>;

    /// Re-reads the current page.
    async fn snapshot(&mut self) -> Result<PageSnapshot, SessionError>;

    /// Queries elements on the current page.
    async fn query(&mut self, query: &ElementQuery) -> Result<Vec<ElementData>, SessionError>;

    /// Triggers a download and waits for the file bytes.
    async fn trigger_download(
        &mut self,
        target: &DownloadTarget,
    ) -> Result<DownloadedFile, SessionError>;

    /// Releases the session. Called exactly once, on every exit path.
    async fn close(&mut self);
}
