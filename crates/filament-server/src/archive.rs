//! ZIP archives of a storage directory.
//!
//! The archive is assembled in an anonymous temporary file so the response
//! can announce its length and the session is released before the client
//! starts downloading.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};

use chrono::{Datelike, Timelike};
use filament_core::{listing_order, walk_unlimited, FileInfo, StorageBackend};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FrontendError, Result};

/// Formats under `.filament/` that are recognised but not produced.
pub const UNSUPPORTED_ARCHIVES: &[&str] = &[
    "archive.tar",
    "archive.tar.gz",
    "archive.tar.bz2",
    "archive.tar.xz",
    "archive.tar.7z",
    "archive.7z",
];

fn zip_error(err: zip::result::ZipError) -> FrontendError {
    FrontendError::Internal(format!("zip: {}", err))
}

fn io_error(err: io::Error) -> FrontendError {
    FrontendError::Internal(format!("archive spool: {}", err))
}

fn options_for(info: &FileInfo) -> SimpleFileOptions {
    let method = if info.is_dir {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let options = SimpleFileOptions::default().compression_method(method);

    let timestamp = info.modified.and_then(|t| {
        zip::DateTime::from_date_and_time(
            t.year().try_into().ok()?,
            t.month() as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
        )
        .ok()
    });
    match timestamp {
        Some(timestamp) => options.last_modified_time(timestamp),
        None => options,
    }
}

/// Collect the tree under `dir` as (relative path, info), in listing order.
async fn collect_entries(
    storage: &mut dyn StorageBackend,
    dir: &str,
) -> Result<Vec<(String, FileInfo)>> {
    let mut entries = Vec::new();
    walk_unlimited(&mut *storage, dir, |path, info| {
        let relative = path.strip_prefix(dir).unwrap_or(path).trim_start_matches('/');
        entries.push((relative.to_string(), info.clone()));
        Ok(())
    })
    .await?;

    entries.sort_by(|(a_path, a), (b_path, b)| listing_order(a.is_dir, a_path, b.is_dir, b_path));
    Ok(entries)
}

/// Run zip and spool file work on the blocking pool.
async fn blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| FrontendError::Internal(format!("archive worker failed: {}", e)))?
}

/// Build a ZIP of the directory `dir` (with trailing slash).
///
/// Content is fetched from storage on the async side; compression happens on
/// the blocking pool. Returns the archive file rewound to the start, and its
/// length.
pub async fn build_zip(storage: &mut dyn StorageBackend, dir: &str) -> Result<(File, u64)> {
    let entries = collect_entries(&mut *storage, dir).await?;
    let mut zip = blocking(|| Ok(ZipWriter::new(tempfile::tempfile().map_err(io_error)?))).await?;

    for (relative, info) in &entries {
        let options = options_for(info);
        let name = relative.clone();

        if info.is_dir {
            zip = blocking(move || {
                zip.add_directory(name, options).map_err(zip_error)?;
                Ok(zip)
            })
            .await?;
            continue;
        }

        // Spool through a temporary file so large entries never sit in memory.
        let spool = blocking(|| tempfile::tempfile().map_err(io_error)).await?;
        let mut spool = tokio::fs::File::from_std(spool);
        let source = format!("{}{}", dir, relative);
        storage.retrieve(&source, &mut spool).await?;
        let mut spool = spool.into_std().await;

        zip = blocking(move || {
            spool.seek(SeekFrom::Start(0)).map_err(io_error)?;
            zip.start_file(name, options).map_err(zip_error)?;
            io::copy(&mut spool, &mut zip).map_err(io_error)?;
            Ok(zip)
        })
        .await?;
    }

    let (file, length) = blocking(move || {
        let mut file = zip.finish().map_err(zip_error)?;
        let length = file.seek(SeekFrom::End(0)).map_err(io_error)?;
        file.seek(SeekFrom::Start(0)).map_err(io_error)?;
        Ok((file, length))
    })
    .await?;

    debug!("Built archive of {} ({} entries, {} bytes)", dir, entries.len(), length);
    Ok((file, length))
}
