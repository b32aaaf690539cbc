//! Breadth-first traversal of a storage tree.

use std::collections::VecDeque;

use tracing::debug;

use crate::backend::Storage;
use crate::error::BackendError;
use crate::file_info::{join_path, FileInfo};

/// Walk the tree under `root` breadth-first, calling `callback` for every
/// entry found with the entry's own path (its directory joined with its
/// name, not the directory alone) and its info.
///
/// `max_depth` bounds the number of directory levels listed: 1 lists `root`
/// only, 2 also lists its direct subdirectories, and 0 means no limit.
/// The first error, from the storage or the callback, stops the walk.
pub async fn walk<S, F>(
    storage: &mut S,
    root: &str,
    max_depth: usize,
    mut callback: F,
) -> Result<(), BackendError>
where
    S: Storage + ?Sized,
    F: FnMut(&str, &FileInfo) -> Result<(), BackendError> + Send,
{
    let mut queue = VecDeque::new();
    queue.push_back((root.to_string(), 1usize));

    while let Some((dir, level)) = queue.pop_front() {
        debug!("Walking {} (level {})", dir, level);
        let entries = storage.read_dir(&dir).await?;
        for entry in entries {
            let path = join_path(&dir, &entry.name);
            callback(&path, &entry)?;
            if entry.is_dir && (max_depth == 0 || level < max_depth) {
                queue.push_back((path, level + 1));
            }
        }
    }

    Ok(())
}

/// [`walk`] without a depth limit.
pub async fn walk_unlimited<S, F>(storage: &mut S, root: &str, callback: F) -> Result<(), BackendError>
where
    S: Storage + ?Sized,
    F: FnMut(&str, &FileInfo) -> Result<(), BackendError> + Send,
{
    walk(storage, root, 0, callback).await
}
