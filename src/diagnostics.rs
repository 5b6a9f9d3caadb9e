//! Short diagnostics for logs and offline snapshots for empty pages.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Longest diagnostic message carried into logs and item outcomes.
pub const MAX_DIAGNOSTIC_CHARS: usize = 120;

/// Reduces an error message to its first line, capped at
/// [`MAX_DIAGNOSTIC_CHARS`] characters.
#[must_use]
pub fn truncate_diagnostic(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return first_line.to_string();
    }
    let mut shortened: String = first_line.chars().take(MAX_DIAGNOSTIC_CHARS - 3).collect();
    shortened.push_str("...");
    shortened
}

/// Path of the snapshot for listing page `page` under `dir`.
#[must_use]
pub fn page_snapshot_path(dir: &Path, page: u32) -> PathBuf {
    dir.join(format!("debug_page{page}.html"))
}

/// Saves raw page content for offline inspection.
///
/// Failures are logged and otherwise ignored; a missing snapshot never
/// affects the run.
pub async fn write_page_snapshot(dir: &Path, page: u32, content: &str) -> Option<PathBuf> {
    let path = page_snapshot_path(dir, page);
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "cannot create snapshot directory");
        return None;
    }
    match tokio::fs::write(&path, content).await {
        Ok(()) => {
            debug!(page, path = %path.display(), bytes = content.len(), "saved page snapshot");
            Some(path)
        }
        Err(e) => {
            warn!(page, path = %path.display(), error = %e, "cannot save page snapshot");
            None
        }
    }
}
