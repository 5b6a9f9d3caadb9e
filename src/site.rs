//! Site-specific URLs and selectors.
//!
//! Everything that ties the pipeline to one site's markup lives here, so the
//! crawler and item processor only speak in terms of "listing page N",
//! "item detail page" and "download endpoint".

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Captures the numeric item ID from an item link href.
static ITEM_ID_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"/g/(\d+)/?"));

/// Captures the page number from a pagination href.
static PAGE_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"[?&]page=(\d+)"));

/// Compiles a regex literal known to be valid at build time.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Error building a [`SiteLayout`].
#[derive(Debug, Error)]
pub enum SiteError {
    /// The base URL is not an absolute http(s) URL.
    #[error("invalid base URL '{0}': expected an absolute http(s) URL")]
    InvalidBaseUrl(String),
}

/// URLs, markers and selectors for the target site.
#[derive(Debug, Clone)]
pub struct SiteLayout {
    base_url: String,
    /// Path of the saved-items listing, with trailing slash.
    pub listing_path: String,
    /// Substring of the resulting URL that means "redirected to login".
    pub login_marker: String,
    /// Terminal pagination link on the listing page.
    pub last_page_selector: String,
    /// Item links on a listing page.
    pub item_link_selector: String,
    /// Direct download control on an item page.
    pub download_selector: String,
    pub title_primary_selector: String,
    pub title_secondary_selector: String,
    /// One element per tag group on an item page.
    pub tag_group_selector: String,
    /// Member values inside a tag group.
    pub tag_member_selector: String,
}

impl SiteLayout {
    /// Creates a layout for `base_url` with the default paths and selectors.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::InvalidBaseUrl`] unless `base_url` is an absolute
    /// http or https URL.
    pub fn new(base_url: &str) -> Result<Self, SiteError> {
        let parsed =
            Url::parse(base_url).map_err(|_| SiteError::InvalidBaseUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(SiteError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            listing_path: "/favorites/".to_string(),
            login_marker: "login".to_string(),
            last_page_selector: ".pagination a.last".to_string(),
            item_link_selector: r#"a[href*="/g/"]"#.to_string(),
            download_selector: r#"a[href*="/download"]"#.to_string(),
            title_primary_selector: "h1.title".to_string(),
            title_secondary_selector: "h2.title".to_string(),
            tag_group_selector: ".tag-container".to_string(),
            tag_member_selector: ".tags .name".to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the listing root (page 1).
    #[must_use]
    pub fn listing_url(&self) -> String {
        format!("{}{}", self.base_url, self.listing_path)
    }

    /// URL of listing page `page`; page 1 is the bare root.
    #[must_use]
    pub fn listing_page_url(&self, page: u32) -> String {
        if page <= 1 {
            self.listing_url()
        } else {
            format!("{}?page={page}", self.listing_url())
        }
    }

    #[must_use]
    pub fn item_url(&self, id: &str) -> String {
        format!("{}/g/{id}/", self.base_url)
    }

    /// Download endpoint used when the item page has no download control.
    #[must_use]
    pub fn download_url(&self, id: &str) -> String {
        format!("{}/g/{id}/download", self.base_url)
    }

    /// True when a resulting location means the session is not logged in.
    #[must_use]
    pub fn is_login_location(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains(&self.login_marker)
    }

    /// Extracts the item ID from an item link href.
    ///
    /// Download links are not item links.
    #[must_use]
    pub fn item_id_from_href(href: &str) -> Option<String> {
        if href.contains("/download") {
            return None;
        }
        ITEM_ID_RE
            .captures(href)
            .map(|captures| captures[1].to_string())
    }

    /// Extracts the page number from a pagination href.
    #[must_use]
    pub fn page_number_from_href(href: &str) -> Option<u32> {
        PAGE_PARAM_RE
            .captures(href)
            .and_then(|captures| captures[1].parse().ok())
    }
}
