//! Paginated discovery of item IDs from the saved-items listing.
//!
//! The crawler verifies the session against the listing root, reads the
//! total page count from the pagination control, then walks the requested
//! page range. Every ID is written to the [`ProgressStore`] as soon as its
//! page is parsed, so an interrupted crawl keeps what it found.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::diagnostics::{truncate_diagnostic, write_page_snapshot};
use crate::gate::{ChallengeGate, GateOutcome};
use crate::pacing::PacingPolicy;
use crate::session::{BrowserSession, ElementQuery, PageSnapshot, SessionError};
use crate::site::SiteLayout;
use crate::store::ProgressStore;

/// Fatal discovery errors. Everything else is logged per page.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The listing root redirected to a login page.
    #[error("not logged in: listing redirected to {url} (cookies invalid or expired)")]
    NotAuthenticated { url: String },

    /// The listing root stayed behind the challenge page.
    #[error("challenge page did not clear at {url} within {timeout_secs}s")]
    ChallengeTimeout { url: String, timeout_secs: u64 },

    /// The requested start page is past the last listing page.
    #[error("start page {start} is beyond the last page ({total})")]
    StartPageOutOfRange { start: u32, total: u32 },

    /// The session failed while verifying the listing root.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Which listing pages to visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    /// First page to visit (1-based).
    pub start_page: u32,
    /// Visit only `start_page`.
    pub single_page: bool,
    /// Visit at most this many pages.
    pub max_pages: Option<u32>,
    /// Stop once this many distinct IDs have been found.
    pub max_items: Option<usize>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            single_page: false,
            max_pages: None,
            max_items: None,
        }
    }
}

/// What a crawl found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub total_pages: u32,
    pub pages_visited: u32,
    /// Distinct IDs in the order they were found.
    pub ids: Vec<String>,
    /// IDs that were not in the store before this crawl.
    pub new_records: usize,
    /// Pages that yielded no IDs.
    pub empty_pages: Vec<u32>,
    /// True when the crawl stopped at the item cap.
    pub reached_max: bool,
}

/// Computes the pages to visit given the total page count.
///
/// # Errors
///
/// Returns [`CrawlError::StartPageOutOfRange`] if `start_page` is past `total_pages`.
pub fn page_range(
    total_pages: u32,
    options: &CrawlOptions,
) -> Result<RangeInclusive<u32>, CrawlError> {
    let total = total_pages.max(1);
    let start = options.start_page.max(1);
    if start > total {
        return Err(CrawlError::StartPageOutOfRange { start, total });
    }

    let end = if options.single_page {
        start
    } else {
        match options.max_pages {
            Some(cap) => total.min(start.saturating_add(cap.max(1) - 1)),
            None => total,
        }
    };
    Ok(start..=end)
}

/// Walks listing pages and records item IDs.
#[derive(Debug)]
pub struct ListingCrawler<'a> {
    site: &'a SiteLayout,
    gate: &'a ChallengeGate,
    pacing: &'a PacingPolicy,
    store: &'a ProgressStore,
    snapshot_dir: Option<PathBuf>,
}

impl<'a> ListingCrawler<'a> {
    #[must_use]
    pub fn new(
        site: &'a SiteLayout,
        gate: &'a ChallengeGate,
        pacing: &'a PacingPolicy,
        store: &'a ProgressStore,
    ) -> Self {
        Self {
            site,
            gate,
            pacing,
            store,
            snapshot_dir: None,
        }
    }

    /// Saves the raw content of pages with no IDs into `dir`.
    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Loads the listing root, verifies the session, and reads the page count.
    ///
    /// # Errors
    ///
    /// - [`CrawlError::ChallengeTimeout`] if the challenge never clears.
    /// - [`CrawlError::NotAuthenticated`] if the listing redirects to login.
    /// - [`CrawlError::Session`] if the page cannot be loaded at all.
    #[instrument(skip(self, session))]
    pub async fn discover_total_pages(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Result<u32, CrawlError> {
        let url = self.site.listing_url();
        info!(url = %url, "checking login");

        let landed = session.navigate(&url).await?;
        if self.site.is_login_location(&landed.url) {
            return Err(CrawlError::NotAuthenticated { url: landed.url });
        }
        self.pacing.settle().await;

        let outcome = self.gate.wait(session, landed).await?;
        if self.site.is_login_location(&outcome.page().url) {
            return Err(CrawlError::NotAuthenticated {
                url: outcome.into_page().url,
            });
        }
        if let GateOutcome::TimedOut(page) = outcome {
            return Err(CrawlError::ChallengeTimeout {
                url: page.url,
                timeout_secs: self.gate.timeout().as_secs(),
            });
        }
        info!("logged in");

        let last_links = session
            .query(&ElementQuery::new(self.site.last_page_selector.as_str()))
            .await?;
        let total = last_links
            .iter()
            .filter_map(|link| link.attr("href"))
            .find_map(SiteLayout::page_number_from_href)
            .unwrap_or(1)
            .max(1);

        info!(total_pages = total, "found listing pages");
        Ok(total)
    }

    /// Discovers the page count, then walks the requested pages.
    ///
    /// Page-level failures (navigation errors, challenge timeouts, empty
    /// pages, store write failures) are logged and the crawl moves on.
    ///
    /// # Errors
    ///
    /// Returns the fatal errors of [`discover_total_pages`](Self::discover_total_pages)
    /// and [`page_range`].
    #[instrument(skip(self, session))]
    pub async fn crawl(
        &self,
        session: &mut dyn BrowserSession,
        options: &CrawlOptions,
    ) -> Result<DiscoveryReport, CrawlError> {
        let total_pages = self.discover_total_pages(session).await?;
        let range = page_range(total_pages, options)?;
        info!(
            start = range.start(),
            end = range.end(),
            total_pages,
            "crawling listing pages"
        );

        let mut report = DiscoveryReport {
            total_pages,
            ..DiscoveryReport::default()
        };
        let mut seen = HashSet::new();

        for page_number in range {
            self.pacing.pause_short().await;
            report.pages_visited += 1;

            let Some(page) = self.load_page(session, page_number).await else {
                continue;
            };
            let page_ids = self.extract_ids(session, page_number).await;

            if page_ids.is_empty() {
                warn!(page = page_number, "no item IDs found on listing page");
                report.empty_pages.push(page_number);
                if let Some(dir) = &self.snapshot_dir {
                    write_page_snapshot(dir, page_number, &page.content).await;
                }
                continue;
            }

            let mut fresh = 0_usize;
            for id in page_ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                match self.store.record_discovered(&id).await {
                    Ok(true) => report.new_records += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        item_id = %id,
                        kind = ?e.database_kind(),
                        error = %truncate_diagnostic(&e.to_string()),
                        "failed to record discovered item"
                    ),
                }
                report.ids.push(id);
                fresh += 1;
            }
            info!(
                page = page_number,
                found = fresh,
                total = report.ids.len(),
                "listing page parsed"
            );

            if options.max_items.is_some_and(|max| report.ids.len() >= max) {
                info!(max = ?options.max_items, "reached item limit, stopping discovery");
                report.reached_max = true;
                break;
            }
        }

        Ok(report)
    }

    /// Navigates to a listing page and waits at the gate.
    ///
    /// A challenge timeout is not fatal here; the page is parsed as-is.
    async fn load_page(
        &self,
        session: &mut dyn BrowserSession,
        page_number: u32,
    ) -> Option<PageSnapshot> {
        let url = self.site.listing_page_url(page_number);
        debug!(page = page_number, url = %url, "loading listing page");

        match self.navigate_gated(session, &url).await {
            Ok(outcome) => {
                if !outcome.is_passed() {
                    warn!(
                        page = page_number,
                        "challenge still showing, parsing page anyway"
                    );
                }
                Some(outcome.into_page())
            }
            Err(e) => {
                warn!(
                    page = page_number,
                    error = %truncate_diagnostic(&e.to_string()),
                    "failed to load listing page"
                );
                None
            }
        }
    }

    async fn navigate_gated(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<GateOutcome, SessionError> {
        let page = session.navigate(url).await?;
        self.pacing.settle().await;
        self.gate.wait(session, page).await
    }

    /// Item IDs on the current page, deduplicated, in document order.
    async fn extract_ids(&self, session: &mut dyn BrowserSession, page_number: u32) -> Vec<String> {
        let links = match session
            .query(&ElementQuery::new(self.site.item_link_selector.as_str()))
            .await
        {
            Ok(links) => links,
            Err(e) => {
                warn!(
                    page = page_number,
                    error = %truncate_diagnostic(&e.to_string()),
                    "failed to query item links"
                );
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        links
            .iter()
            .filter_map(|link| link.attr("href"))
            .filter_map(SiteLayout::item_id_from_href)
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }
}
