//! Per-item processing: detail page, metadata, artifact, commit.
//!
//! Each item moves through a fixed sequence of states:
//!
//! 1. **Skip** when the store says the artifact is already on disk (or, in
//!    metadata-only runs, when metadata is already committed). No network.
//! 2. **Fetch detail** under the challenge gate. A navigation failure ends
//!    the item as [`ItemOutcome::Failed`].
//! 3. **Extract metadata.** Missing elements become empty fields and a
//!    malformed page count becomes `0`; neither fails the item.
//! 4. **Fetch artifact** (not in metadata-only runs). Timeouts and fetch
//!    errors only clear `artifact_acquired`.
//! 5. **Commit** metadata and artifact state. A commit failure is surfaced
//!    as [`ItemOutcome::Failed`] at [`FailureStage::Commit`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::diagnostics::truncate_diagnostic;
use crate::gate::ChallengeGate;
use crate::pacing::PacingPolicy;
use crate::session::{BrowserSession, DownloadTarget, ElementData, ElementQuery, SessionError};
use crate::site::SiteLayout;
use crate::store::{ItemMetadata, ProgressStore};

/// Default bound on waiting for a download to finish.
pub const DEFAULT_ARTIFACT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default artifact file extension.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "torrent";

/// Tag-group categories that carry the page count instead of tags.
const PAGE_COUNT_CATEGORIES: [&str; 3] = ["pages", "page count", "length"];

/// Where an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The detail page could not be loaded.
    Detail,
    /// The result could not be written to the store.
    Commit,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detail => write!(f, "detail"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Already done; nothing was fetched.
    Skipped,
    /// Metadata committed, with or without the artifact.
    Completed { artifact_acquired: bool },
    /// The item was abandoned. `message` is a truncated diagnostic.
    Failed {
        stage: FailureStage,
        message: String,
    },
}

impl ItemOutcome {
    /// Returns true if the item touched the network.
    #[must_use]
    pub fn used_network(&self) -> bool {
        !matches!(self, Self::Skipped)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Settings for [`ItemProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Directory artifacts are saved into.
    pub output_dir: PathBuf,
    /// Artifact extension, without the dot.
    pub artifact_extension: String,
    pub artifact_timeout: Duration,
    /// Skip artifact fetching entirely.
    pub metadata_only: bool,
}

impl ProcessorConfig {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            artifact_timeout: DEFAULT_ARTIFACT_TIMEOUT,
            metadata_only: false,
        }
    }

    /// Final location of the artifact for `id`.
    #[must_use]
    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.output_dir.join(format!("{id}.{}", self.artifact_extension))
    }
}

/// Runs the per-item state machine.
#[derive(Debug)]
pub struct ItemProcessor<'a> {
    site: &'a SiteLayout,
    gate: &'a ChallengeGate,
    pacing: &'a PacingPolicy,
    store: &'a ProgressStore,
    config: &'a ProcessorConfig,
}

impl<'a> ItemProcessor<'a> {
    #[must_use]
    pub fn new(
        site: &'a SiteLayout,
        gate: &'a ChallengeGate,
        pacing: &'a PacingPolicy,
        store: &'a ProgressStore,
        config: &'a ProcessorConfig,
    ) -> Self {
        Self {
            site,
            gate,
            pacing,
            store,
            config,
        }
    }

    /// Processes one item. Never returns an error; every failure is folded
    /// into the outcome and logged.
    #[instrument(skip(self, session), fields(item_id = %id))]
    pub async fn process(&self, session: &mut dyn BrowserSession, id: &str) -> ItemOutcome {
        if self.already_done(id).await {
            info!(item_id = %id, "skipped: already processed");
            return ItemOutcome::Skipped;
        }

        if let Err(e) = self.load_detail(session, id).await {
            let message = truncate_diagnostic(&e.to_string());
            warn!(item_id = %id, error = %message, "failed to load item page");
            return ItemOutcome::Failed {
                stage: FailureStage::Detail,
                message,
            };
        }

        let metadata = extract_metadata(session, self.site).await;
        debug!(
            item_id = %id,
            title = %metadata.title_primary,
            tags = metadata.tags.len(),
            page_count = metadata.page_count,
            "extracted metadata"
        );

        let artifact_path = if self.config.metadata_only {
            None
        } else {
            self.fetch_artifact(session, id).await
        };
        let artifact_acquired = artifact_path.is_some();

        if let Err(e) = self
            .store
            .commit_result(id, &metadata, artifact_acquired, artifact_path.as_deref())
            .await
        {
            let message = truncate_diagnostic(&e.to_string());
            error!(
                item_id = %id,
                artifact = ?artifact_path,
                kind = ?e.database_kind(),
                error = %message,
                "failed to commit item result"
            );
            return ItemOutcome::Failed {
                stage: FailureStage::Commit,
                message,
            };
        }

        if artifact_acquired {
            info!(item_id = %id, "completed with artifact");
        } else {
            info!(item_id = %id, "completed without artifact");
        }
        ItemOutcome::Completed { artifact_acquired }
    }

    async fn already_done(&self, id: &str) -> bool {
        let check = if self.config.metadata_only {
            self.store.has_metadata(id).await
        } else {
            self.store.is_artifact_acquired(id).await
        };
        check.unwrap_or_else(|e| {
            warn!(
                item_id = %id,
                error = %truncate_diagnostic(&e.to_string()),
                "progress lookup failed; processing anyway"
            );
            false
        })
    }

    async fn load_detail(
        &self,
        session: &mut dyn BrowserSession,
        id: &str,
    ) -> Result<(), SessionError> {
        let url = self.site.item_url(id);
        let page = session.navigate(&url).await?;
        self.pacing.settle().await;

        let outcome = self.gate.wait(session, page).await?;
        if !outcome.is_passed() {
            warn!(item_id = %id, "challenge still showing on item page, continuing");
        }
        let page = outcome.page();
        if !page.is_success() {
            return Err(SessionError::HttpStatus {
                url: page.url.clone(),
                status: page.status,
            });
        }
        Ok(())
    }

    /// Fetches and saves the artifact. Returns its path only after a
    /// verified, non-empty save.
    async fn fetch_artifact(&self, session: &mut dyn BrowserSession, id: &str) -> Option<PathBuf> {
        let target = self.download_target(session, id).await;
        debug!(item_id = %id, target = ?target, "requesting artifact");

        let file = match tokio::time::timeout(
            self.config.artifact_timeout,
            session.trigger_download(&target),
        )
        .await
        {
            Ok(Ok(file)) => file,
            Ok(Err(e)) => {
                warn!(
                    item_id = %id,
                    error = %truncate_diagnostic(&e.to_string()),
                    "artifact fetch failed"
                );
                return None;
            }
            Err(_) => {
                warn!(
                    item_id = %id,
                    timeout_secs = self.config.artifact_timeout.as_secs(),
                    "artifact fetch timed out"
                );
                return None;
            }
        };

        if file.bytes.is_empty() {
            warn!(item_id = %id, "artifact download was empty");
            return None;
        }
        debug!(
            item_id = %id,
            bytes = file.bytes.len(),
            suggested = ?file.suggested_filename,
            "artifact received"
        );

        let path = self.config.artifact_path(id);
        match save_artifact(&path, &file.bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(
                    item_id = %id,
                    path = %path.display(),
                    error = %truncate_diagnostic(&e.to_string()),
                    "failed to save artifact"
                );
                None
            }
        }
    }

    /// Uses the page's download control when present, else the endpoint URL.
    async fn download_target(&self, session: &mut dyn BrowserSession, id: &str) -> DownloadTarget {
        let selector = self.site.download_selector.as_str();
        let has_control = session
            .query(&ElementQuery::new(selector))
            .await
            .is_ok_and(|found| found.iter().any(|element| element.attr("href").is_some()));

        if has_control {
            DownloadTarget::Selector(selector.to_string())
        } else {
            DownloadTarget::Url(self.site.download_url(id))
        }
    }
}

/// Writes `bytes` to `path` via a `.part` file and confirms the result is a
/// non-empty file.
async fn save_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, bytes).await?;
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "saved artifact is empty"));
    }
    Ok(())
}

/// Reads titles and tag groups from the current page.
///
/// Query failures are logged and read as "element absent".
pub async fn extract_metadata(session: &mut dyn BrowserSession, site: &SiteLayout) -> ItemMetadata {
    let primary = query_or_empty(
        session,
        ElementQuery::new(site.title_primary_selector.as_str()),
    )
    .await;
    let secondary = query_or_empty(
        session,
        ElementQuery::new(site.title_secondary_selector.as_str()),
    )
    .await;
    let groups = query_or_empty(
        session,
        ElementQuery::new(site.tag_group_selector.as_str())
            .with_members(site.tag_member_selector.as_str()),
    )
    .await;

    parse_metadata(&primary, &secondary, &groups)
}

async fn query_or_empty(session: &mut dyn BrowserSession, query: ElementQuery) -> Vec<ElementData> {
    session.query(&query).await.unwrap_or_else(|e| {
        warn!(
            selector = query.selector(),
            error = %truncate_diagnostic(&e.to_string()),
            "element query failed"
        );
        Vec::new()
    })
}

/// Builds item metadata from extracted title and tag-group elements.
#[must_use]
pub fn parse_metadata(
    primary: &[ElementData],
    secondary: &[ElementData],
    groups: &[ElementData],
) -> ItemMetadata {
    let mut metadata = ItemMetadata {
        title_primary: title_text(primary),
        title_secondary: title_text(secondary),
        ..ItemMetadata::default()
    };

    for group in groups {
        let category = group
            .first_line()
            .map(normalize_category)
            .unwrap_or_default();
        if category.is_empty() {
            continue;
        }

        if PAGE_COUNT_CATEGORIES.contains(&category.as_str()) {
            metadata.page_count = parse_page_count(group);
            continue;
        }

        metadata.tags.extend(
            group
                .members
                .iter()
                .map(|member| format!("{category}:{}", member.trim())),
        );
    }

    metadata
}

fn title_text(elements: &[ElementData]) -> String {
    elements
        .first()
        .map(|element| element.text.lines().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

/// Lower-cases a group label and strips punctuation: `"Tags:"` becomes `"tags"`.
fn normalize_category(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// First member parsed as an integer, else the second text line, else `0`.
fn parse_page_count(group: &ElementData) -> u32 {
    let raw = group
        .members
        .first()
        .map(String::as_str)
        .or_else(|| group.text.lines().nth(1))
        .unwrap_or("");
    raw.trim().parse().unwrap_or(0)
}
