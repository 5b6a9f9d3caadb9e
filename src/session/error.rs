//! Error types for browsing-session operations.

use thiserror::Error;

/// Errors raised by a [`BrowserSession`](super::BrowserSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport-level failure (DNS, connection, TLS, body read).
    #[error("network error loading {url}: {message}")]
    Network {
        /// The URL being loaded.
        url: String,
        /// Underlying error text.
        message: String,
    },

    /// Request did not complete in time.
    #[error("timeout loading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// A download request returned a non-success status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The download URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The download returned a page instead of a file (login redirect or interstitial).
    #[error("expected a file from {url} but got {content_type}")]
    NotAFile {
        /// The download URL.
        url: String,
        /// Content type the server sent.
        content_type: String,
    },

    /// The download exceeded the configured size ceiling.
    #[error("download from {url} exceeds {limit} bytes")]
    TooLarge {
        /// The download URL.
        url: String,
        /// Configured ceiling.
        limit: u64,
    },

    /// A selector could not be parsed.
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector {
        /// The selector text.
        selector: String,
        /// Parser message.
        message: String,
    },

    /// A download selector matched nothing usable on the current page.
    #[error("no downloadable element matches '{selector}'")]
    ElementNotFound {
        /// The selector text.
        selector: String,
    },

    /// A URL could not be parsed or resolved.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
    },

    /// An operation needed a current page but nothing has been loaded.
    #[error("no page loaded in session")]
    NoPage,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl SessionError {
    /// Maps a reqwest error, distinguishing timeouts.
    pub(crate) fn from_reqwest(url: impl Into<String>, error: &reqwest::Error) -> Self {
        let url = url.into();
        if error.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network {
                url,
                message: error.to_string(),
            }
        }
    }
}
