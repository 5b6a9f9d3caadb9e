//! JSON export of committed items.
//!
//! Writes every record from [`ProgressStore::export_all`](crate::ProgressStore::export_all)
//! as one pretty-printed UTF-8 JSON array. The document is written to a
//! temporary sibling and renamed into place, so a reader never sees a
//! half-written export.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::store::ExportRecord;

/// Default export filename inside the output directory.
pub const DEFAULT_EXPORT_FILENAME: &str = "export.json";

/// Errors produced while writing the export document.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error writing export {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes `records` to `path` as an indented JSON array.
///
/// # Errors
///
/// Returns [`ExportError`] on I/O or serialization failure. The previous
/// export, if any, is left untouched on error.
#[instrument(skip_all, fields(path = %path.display(), records = records.len()))]
pub fn write_export(path: &Path, records: &[ExportRecord]) -> Result<(), ExportError> {
    let io_err = |source: std::io::Error| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = path.with_extension("json.tmp");
    let write_result = fs::File::create(&tmp)
        .map_err(io_err)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.write_all(b"\n").map_err(io_err)?;
            writer.flush().map_err(io_err)
        });
    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(source));
    }

    debug!(path = %path.display(), "export written");
    Ok(())
}
