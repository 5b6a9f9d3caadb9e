//! Durable progress tracking for discovered items.
//!
//! The store is the single source of truth for resumption: an ID is inserted
//! as soon as a listing page shows it, and upserted once the item processor
//! commits metadata and artifact state. Nothing is ever deleted.
//!
//! # Example
//!
//! ```ignore
//! use harvester_core::{Database, ItemMetadata, ProgressStore};
//!
//! let store = ProgressStore::new(Database::new(Path::new("progress.db")).await?);
//! store.record_discovered("177013").await?;
//! store
//!     .commit_result("177013", &ItemMetadata::default(), false, None)
//!     .await?;
//! ```

mod error;
mod record;

pub use error::{StoreDbErrorKind, StoreError};
pub use record::{ExportRecord, ItemMetadata, ItemRecord};

use std::path::Path;

use sqlx::Row;
use tracing::{debug, instrument, warn};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed progress store.
///
/// Single-writer: the pipeline never issues two writes concurrently, and
/// every write is a single statement so readers see either the old or the
/// new row.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    db: Database,
}

impl ProgressStore {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a bare record for `id` unless one already exists.
    ///
    /// Returns `true` when a new row was created. Calling this repeatedly
    /// for the same ID is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn record_discovered(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(r"INSERT INTO items (id) VALUES (?) ON CONFLICT(id) DO NOTHING")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns true when the stored flag is set and the artifact file is
    /// still present and non-empty.
    ///
    /// A set flag whose file has vanished is reported as not acquired so the
    /// item is fetched again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn is_artifact_acquired(&self, id: &str) -> Result<bool> {
        let row = sqlx::query(r"SELECT artifact_acquired, artifact_path FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        let acquired: bool = row.get("artifact_acquired");
        let artifact_path: Option<String> = row.get("artifact_path");
        if !acquired {
            return Ok(false);
        }

        let on_disk = match artifact_path.as_deref() {
            Some(path) => is_non_empty_file(Path::new(path)).await,
            None => false,
        };
        if !on_disk {
            warn!(
                item_id = %id,
                path = ?artifact_path,
                "artifact marked acquired but file is missing or empty; will refetch"
            );
        }

        Ok(on_disk)
    }

    /// Returns true when a result (metadata, with or without artifact) has
    /// been committed for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn has_metadata(&self, id: &str) -> Result<bool> {
        let row =
            sqlx::query(r"SELECT last_updated IS NOT NULL AS processed FROM items WHERE id = ?")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.is_some_and(|row| row.get::<bool, _>("processed")))
    }

    /// Upserts metadata and artifact state for `id` and refreshes `last_updated`.
    ///
    /// The discovery timestamp of an existing row is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TagEncoding`] if the tags cannot be encoded,
    /// [`StoreError::ArtifactPath`] if the artifact path is not valid UTF-8,
    /// or [`StoreError::Database`] if the write fails. Callers that have just
    /// saved an artifact must not swallow this error.
    #[instrument(skip(self, metadata, artifact_path), fields(item_id = %id, artifact_acquired))]
    pub async fn commit_result(
        &self,
        id: &str,
        metadata: &ItemMetadata,
        artifact_acquired: bool,
        artifact_path: Option<&Path>,
    ) -> Result<()> {
        let tags_json =
            ItemRecord::encode_tags(&metadata.tags).map_err(|e| StoreError::TagEncoding {
                id: id.to_string(),
                message: e.to_string(),
            })?;
        let artifact_path = artifact_path
            .map(|path| stored_artifact_path(id, path))
            .transpose()?;

        sqlx::query(
            r"INSERT INTO items (
                id,
                title_primary,
                title_secondary,
                tags,
                page_count,
                artifact_path,
                artifact_acquired,
                last_updated
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))
              ON CONFLICT(id) DO UPDATE SET
                title_primary = excluded.title_primary,
                title_secondary = excluded.title_secondary,
                tags = excluded.tags,
                page_count = excluded.page_count,
                artifact_path = excluded.artifact_path,
                artifact_acquired = excluded.artifact_acquired,
                last_updated = excluded.last_updated",
        )
        .bind(id)
        .bind(&metadata.title_primary)
        .bind(&metadata.title_secondary)
        .bind(tags_json)
        .bind(i64::from(metadata.page_count))
        .bind(artifact_path)
        .bind(artifact_acquired)
        .execute(self.db.pool())
        .await?;

        debug!(item_id = %id, tags = metadata.tags.len(), "committed item result");
        Ok(())
    }

    /// Gets a record by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn get(&self, id: &str) -> Result<Option<ItemRecord>> {
        let item = sqlx::query_as::<_, ItemRecord>(r"SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(item)
    }

    /// Counts all stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64> {
        let result = sqlx::query(r"SELECT COUNT(*) AS count FROM items")
            .fetch_one(self.db.pool())
            .await?;

        Ok(result.get("count"))
    }

    /// Lists every stored ID in discovery order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(r"SELECT id FROM items ORDER BY rowid ASC")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Returns every committed record, in discovery order, in export form.
    ///
    /// Discovered-but-unprocessed rows carry no metadata and are left out.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn export_all(&self) -> Result<Vec<ExportRecord>> {
        let items = sqlx::query_as::<_, ItemRecord>(
            r"SELECT * FROM items WHERE last_updated IS NOT NULL ORDER BY rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(items.iter().map(ItemRecord::to_export).collect())
    }
}

/// Absolute, UTF-8 form of an artifact path, so a resumed run finds the file
/// regardless of its working directory.
fn stored_artifact_path(id: &str, path: &Path) -> Result<String> {
    let invalid = |message: String| StoreError::ArtifactPath {
        id: id.to_string(),
        path: path.display().to_string(),
        message,
    };
    let absolute = std::path::absolute(path).map_err(|e| invalid(e.to_string()))?;
    absolute
        .into_os_string()
        .into_string()
        .map_err(|_| invalid("path is not valid UTF-8".to_string()))
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}
