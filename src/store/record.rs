//! Item record types stored in and exported from the progress store.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use sqlx::FromRow;

/// Metadata scraped from an item's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMetadata {
    /// Primary display title (empty when the page had none).
    pub title_primary: String,
    /// Secondary display title (empty when the page had none).
    pub title_secondary: String,
    /// Ordered `"category:value"` tags.
    pub tags: Vec<String>,
    /// Page count, `0` when unknown.
    pub page_count: u32,
}

/// A stored item row.
///
/// A row with every optional field empty and `last_updated == None` is the
/// discovered-but-not-processed state.
#[derive(Debug, Clone, FromRow)]
pub struct ItemRecord {
    /// Stable item identifier (primary key).
    pub id: String,
    pub title_primary: Option<String>,
    pub title_secondary: Option<String>,
    /// Tags as a JSON array (parsed via `tags()`).
    #[sqlx(rename = "tags")]
    pub tags_json: String,
    pub page_count: i64,
    /// Saved artifact location, if a fetch ever succeeded.
    pub artifact_path: Option<String>,
    /// True only after a verified, non-empty save.
    pub artifact_acquired: bool,
    /// When the ID was first seen on a listing page.
    pub discovered_at: String,
    /// When metadata/artifact state was last committed.
    pub last_updated: Option<String>,
}

impl ItemRecord {
    /// Parses the stored tag list.
    ///
    /// Returns an empty vector when the column holds invalid JSON.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        serde_json::from_str(&self.tags_json).unwrap_or_default()
    }

    /// Returns true once the item processor has committed a result.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.last_updated.is_some()
    }

    /// Converts the row into its external document form.
    #[must_use]
    pub fn to_export(&self) -> ExportRecord {
        ExportRecord {
            id: self.id.clone(),
            title_primary: self.title_primary.clone().unwrap_or_default(),
            title_secondary: self.title_secondary.clone().unwrap_or_default(),
            tags: self.tags(),
            page_count: u32::try_from(self.page_count).unwrap_or(0),
            artifact_path: self.artifact_path.as_ref().map(PathBuf::from),
            artifact_acquired: self.artifact_acquired,
            last_updated: self.last_updated.clone(),
        }
    }

    pub(crate) fn encode_tags(tags: &[String]) -> Result<String, serde_json::Error> {
        serde_json::to_string(tags)
    }
}

impl fmt::Display for ItemRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ItemRecord {{ id: {}, processed: {}, artifact: {} }}",
            self.id,
            self.is_processed(),
            self.artifact_acquired
        )
    }
}

/// External-facing form of a committed item, as written to the export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRecord {
    pub id: String,
    pub title_primary: String,
    pub title_secondary: String,
    pub tags: Vec<String>,
    pub page_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    pub artifact_acquired: bool,
    pub last_updated: Option<String>,
}
