//! Run orchestration: bootstrap, discovery, item loop, export.
//!
//! [`harvest`] is the whole job: it loads cookies, opens the store and an
//! [`HttpSession`], and hands them to [`Pipeline::execute`]. The pipeline
//! itself only sees a `&mut dyn BrowserSession`, so tests drive it with a
//! scripted session.
//!
//! The item loop is strictly sequential. The counter of completed items that
//! drives the cooldown cadence lives in [`Pipeline::run`] and nowhere else.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::auth::{CookieError, load_cookie_file, load_cookies_into_jar};
use crate::crawler::{CrawlError, CrawlOptions, ListingCrawler};
use crate::db::{Database, DbError};
use crate::export::{ExportError, write_export};
use crate::gate::ChallengeGate;
use crate::pacing::PacingPolicy;
use crate::processor::{FailureStage, ItemOutcome, ItemProcessor, ProcessorConfig};
use crate::session::{BrowserSession, HttpSession, SessionError};
use crate::site::SiteLayout;
use crate::store::{ProgressStore, StoreError};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The cookie file held no usable cookies.
    #[error("no usable cookies in {path}")]
    NoCookies { path: PathBuf },

    #[error("failed to load cookies: {0}")]
    Cookies(#[from] CookieError),

    #[error("failed to open progress store: {0}")]
    Db(#[from] DbError),

    #[error("progress store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error("failed to start session: {0}")]
    Session(#[from] SessionError),

    #[error("failed to write export: {0}")]
    Export(#[from] ExportError),
}

/// Per-run switches. Fixed for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// First listing page (1-based).
    pub start_page: u32,
    /// Cap on items discovered and processed.
    pub max_items: Option<usize>,
    /// Cap on listing pages visited.
    pub max_pages: Option<u32>,
    /// Visit only `start_page`.
    pub single_page: bool,
    /// Process IDs already in the store instead of crawling.
    pub skip_discovery: bool,
    /// Do not fetch artifacts.
    pub metadata_only: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_page: 1,
            max_items: None,
            max_pages: None,
            single_page: false,
            skip_discovery: false,
            metadata_only: false,
        }
    }
}

impl RunConfig {
    fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            start_page: self.start_page,
            single_page: self.single_page,
            max_pages: self.max_pages,
            max_items: self.max_items,
        }
    }
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Distinct IDs found by discovery (or loaded from the store).
    pub discovered: usize,
    /// Of those, IDs that were new to the store.
    pub new_records: usize,
    /// Items that went through the network (not skipped).
    pub processed: usize,
    /// Items whose result was committed.
    pub completed: usize,
    /// Completed items with a saved artifact.
    pub artifacts: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Failed items whose store commit failed.
    pub commit_failures: usize,
    /// Records written to the export document.
    pub exported: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Completed { artifact_acquired } => {
                self.processed += 1;
                self.completed += 1;
                if *artifact_acquired {
                    self.artifacts += 1;
                }
            }
            ItemOutcome::Failed { stage, .. } => {
                self.processed += 1;
                self.failed += 1;
                if *stage == FailureStage::Commit {
                    self.commit_failures += 1;
                }
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "discovered {}, processed {}, completed {} ({} with artifact), skipped {}, failed {}",
            self.discovered,
            self.processed,
            self.completed,
            self.artifacts,
            self.skipped,
            self.failed
        )
    }
}

/// Everything a run needs besides the store and the session.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub site: SiteLayout,
    pub gate: ChallengeGate,
    pub pacing: PacingPolicy,
    pub processor: ProcessorConfig,
    /// Where to write the export document; `None` skips export.
    pub export_path: Option<PathBuf>,
    /// Where to save snapshots of listing pages with no IDs.
    pub snapshot_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Defaults rooted at `output_dir`: artifacts, snapshots and
    /// `export.json` all go there.
    #[must_use]
    pub fn new(site: SiteLayout, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            site,
            gate: ChallengeGate::default(),
            pacing: PacingPolicy::default(),
            export_path: Some(output_dir.join(crate::export::DEFAULT_EXPORT_FILENAME)),
            snapshot_dir: Some(output_dir.clone()),
            processor: ProcessorConfig::new(output_dir),
        }
    }
}

/// Sequences discovery, item processing and export.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    store: ProgressStore,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: PipelineConfig, store: ProgressStore) -> Self {
        Self { config, store }
    }

    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Runs the pipeline and closes the session on every exit path.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn execute(
        &self,
        session: &mut dyn BrowserSession,
        run: &RunConfig,
    ) -> Result<RunSummary, PipelineError> {
        let result = self.run(session, run).await;
        session.close().await;
        result
    }

    /// Runs discovery, the item loop and export. Does not close the session.
    ///
    /// # Errors
    ///
    /// Returns fatal crawl errors (not logged in, challenge never cleared,
    /// start page out of range), store read failures when loading IDs, and
    /// export failures. Per-page and per-item failures are counted, not
    /// returned.
    #[instrument(skip(self, session))]
    pub async fn run(
        &self,
        session: &mut dyn BrowserSession,
        run: &RunConfig,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let config = &self.config;

        let mut ids = if run.skip_discovery {
            let ids = self.store.list_ids().await?;
            info!(count = ids.len(), "discovery skipped, using stored IDs");
            ids
        } else {
            let mut crawler =
                ListingCrawler::new(&config.site, &config.gate, &config.pacing, &self.store);
            if let Some(dir) = &config.snapshot_dir {
                crawler = crawler.with_snapshot_dir(dir);
            }
            let report = crawler.crawl(session, &run.crawl_options()).await?;
            summary.new_records = report.new_records;
            report.ids
        };
        summary.discovered = ids.len();

        if ids.is_empty() {
            if self.store.count().await? == 0 {
                warn!("no items found; check that:");
                warn!("  1. the cookies are valid and not expired");
                warn!("  2. the saved-items listing is not empty");
                if let Some(dir) = &config.snapshot_dir {
                    warn!("  3. the page snapshots in {} look right", dir.display());
                }
                return Ok(summary);
            }
            info!("no new items found on the requested pages");
        }

        if let Some(max) = run.max_items
            && ids.len() > max
        {
            debug!(max, found = ids.len(), "truncating to item limit");
            ids.truncate(max);
        }

        let processor_config = ProcessorConfig {
            metadata_only: run.metadata_only,
            ..config.processor.clone()
        };
        let processor = ItemProcessor::new(
            &config.site,
            &config.gate,
            &config.pacing,
            &self.store,
            &processor_config,
        );

        info!(
            count = ids.len(),
            metadata_only = run.metadata_only,
            "processing items"
        );
        let total = ids.len();
        let mut completed: u32 = 0;

        for (index, id) in ids.iter().enumerate() {
            info!(item_id = %id, position = index + 1, total, "processing item");
            let outcome = processor.process(session, id).await;
            if let ItemOutcome::Failed { stage, message } = &outcome {
                warn!(item_id = %id, %stage, error = %message, "item failed");
            }
            summary.record(&outcome);

            if !outcome.used_network() || index + 1 == total {
                continue;
            }
            // Only a fresh completion can land on a cooldown boundary.
            let cadence = if outcome.is_completed() {
                completed += 1;
                completed
            } else {
                0
            };
            config.pacing.pause_after(cadence).await;
        }

        if let Some(path) = &config.export_path {
            let records = self.store.export_all().await?;
            write_export(path, &records)?;
            summary.exported = records.len();
            info!(path = %path.display(), records = records.len(), "export written");
        }

        info!(%summary, "run complete");
        Ok(summary)
    }
}

/// Runs a complete job against the live site.
///
/// Loads the cookie file (an empty cookie set is fatal), opens the progress
/// store at `db_path`, and runs the pipeline over an [`HttpSession`].
///
/// # Errors
///
/// Returns [`PipelineError`] for fatal preconditions and run-aborting
/// failures. The session is closed before any error is returned.
#[instrument(skip(config, run), fields(cookies = %cookies_file.display(), db = %db_path.display()))]
pub async fn harvest(
    cookies_file: &Path,
    db_path: &Path,
    config: PipelineConfig,
    run: &RunConfig,
) -> Result<RunSummary, PipelineError> {
    let parsed = load_cookie_file(cookies_file)?;
    if parsed.cookies.is_empty() {
        return Err(PipelineError::NoCookies {
            path: cookies_file.to_path_buf(),
        });
    }
    info!(
        count = parsed.cookies.len(),
        skipped_lines = parsed.warnings.len(),
        "loaded cookies"
    );

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DbError::Connection(sqlx::Error::Io(e)))?;
    }
    let store = ProgressStore::new(Database::new(db_path).await?);

    let jar = load_cookies_into_jar(&parsed.cookies);
    let mut session = HttpSession::new(jar)?;

    Pipeline::new(config, store)
        .execute(&mut session, run)
        .await
}
