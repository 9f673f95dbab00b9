// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::fs::FileSystem;
use std::{io::Write, path::Path};

/// Magic bytes prefixed to every object blob written by the durable store.
pub const MAGIC_BYTES: [u8; 4] = [b'S', b'P', b'D', 1];

pub const OBJECTS_FOLDER: &str = "objects";
pub const INDEX_FOLDER: &str = "index";

/// Atomically rewrites a file: write to a sibling temp file, fsync, then
/// rename it over the target. Used by the object store when persisting
/// blobs and index rows so a crash never leaves a half-written object.
pub fn rewrite_atomic<F: FileSystem>(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("object paths always have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = F::open(path)?;
        file.sync_all()?;

        #[allow(clippy::expect_used)]
        let folder = path.parent().expect("object paths always have a parent");
        fsync_directory::<F>(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory<F: FileSystem>(path: &Path) -> std::io::Result<()> {
    let file = F::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory<F: FileSystem>(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
