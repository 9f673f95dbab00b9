// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The L3 durable object store (§4.8): a blob store keyed by
//! [`keys::object_key`], plus the `s3-index` secondary table that tracks
//! which version and ingest job wrote each object. Backed by a
//! [`FileSystem`] the same way the cache layers are backed by an
//! in-process map, so the durable tier can be swapped or faked in tests.

use crate::config::{MAX_BACKOFF_RETRIES, MAX_ID_SET_SIZE};
use crate::cuboid::codec;
use crate::error::{Error, Result};
use crate::file::{self, OBJECTS_FOLDER};
use crate::fs::{FileSystem, StdFileSystem};
use crate::indices::ObjectIndices;
use crate::keys;
use crate::kv_cache::KvCache;
use crate::state::State;
use log::warn;
use rand::Rng;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// One row of the `s3-index` table: which write last produced an object.
#[derive(Clone, Debug)]
struct S3IndexRow {
    version_node: u32,
    ingest_job: u32,
}

/// The durable object store and its `s3-index`/id-index secondary
/// tables (§3.5, §4.8). Generic over [`FileSystem`] so tests can run
/// against an in-memory or fault-injecting backend; defaults to
/// [`StdFileSystem`].
pub struct ObjectStore<F: FileSystem = StdFileSystem> {
    base_dir: PathBuf,
    s3_index: Mutex<HashMap<String, S3IndexRow, FxBuildHasher>>,
    /// The id-index / id-count tables (§4.7, §4.9), composed in rather
    /// than duplicated — both live in the same durable tier.
    pub indices: ObjectIndices,
    _fs: PhantomData<F>,
}

impl<F: FileSystem> ObjectStore<F> {
    /// Opens (creating if necessary) an object store rooted at `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        F::create_dir_all(&base_dir.join(OBJECTS_FOLDER)).map_err(|e| Error::ObjectStore(e.to_string()))?;

        Ok(Self {
            base_dir,
            s3_index: Mutex::new(HashMap::default()),
            indices: ObjectIndices::new(),
            _fs: PhantomData,
        })
    }

    fn object_path(&self, object_key: &str) -> PathBuf {
        self.base_dir.join(OBJECTS_FOLDER).join(object_key)
    }

    /// Splits `keys` into the indices that already have a durable object
    /// and those that don't, restricted to `subset_idx` if given (§4.8).
    pub fn cuboids_exist(&self, object_keys: &[String], subset_idx: Option<&[usize]>) -> Result<(Vec<usize>, Vec<usize>)> {
        let mut exists_idx = Vec::new();
        let mut missing_idx = Vec::new();

        let indices: Box<dyn Iterator<Item = usize>> = match subset_idx {
            Some(subset) => Box::new(subset.iter().copied()),
            None => Box::new(0..object_keys.len()),
        };

        for idx in indices {
            let key = &object_keys[idx];
            let present = F::exists(&self.object_path(key)).map_err(|e| Error::ObjectStore(e.to_string()))?;
            if present {
                exists_idx.push(idx);
            } else {
                missing_idx.push(idx);
            }
        }

        Ok((exists_idx, missing_idx))
    }

    /// Records that `object_key` was last written by `ingest_job` at
    /// `version_node` (§4.8: the `s3-index` row used to detect stale
    /// concurrent writers).
    pub fn add_cuboid_to_index(&self, object_key: &str, version_node: u32, ingest_job: u32) {
        self.s3_index
            .lock()
            .expect("s3-index lock poisoned")
            .insert(object_key.to_owned(), S3IndexRow { version_node, ingest_job });
    }

    /// The `(version_node, ingest_job)` last recorded for `object_key`.
    #[must_use]
    pub fn index_row(&self, object_key: &str) -> Option<(u32, u32)> {
        self.s3_index
            .lock()
            .expect("s3-index lock poisoned")
            .get(object_key)
            .map(|row| (row.version_node, row.ingest_job))
    }

    /// Reads one object's raw (blosc-enveloped) bytes.
    pub fn get_single_object(&self, object_key: &str) -> Result<Vec<u8>> {
        F::read(&self.object_path(object_key)).map_err(|e| Error::ObjectStore(format!("{object_key}: {e}")))
    }

    /// Reads several objects, in the order given.
    pub fn get_objects(&self, object_keys: &[String]) -> Result<Vec<Vec<u8>>> {
        object_keys.iter().map(|k| self.get_single_object(k)).collect()
    }

    /// Atomically writes one object's raw (already-enveloped) bytes.
    pub fn put_single_object(&self, object_key: &str, blob: &[u8]) -> Result<()> {
        let path = self.object_path(object_key);
        file::rewrite_atomic::<F>(&path, blob).map_err(|e| Error::ObjectStore(format!("{object_key}: {e}")))
    }

    /// Atomically writes several objects, in the order given.
    pub fn put_objects(&self, object_keys: &[String], blobs: &[Vec<u8>]) -> Result<()> {
        debug_assert_eq!(object_keys.len(), blobs.len());
        for (key, blob) in object_keys.iter().zip(blobs.iter()) {
            self.put_single_object(key, blob)?;
        }
        Ok(())
    }

    /// Loads each of `cache_keys` from the durable store into the L1
    /// cache and notifies `page_in_channel` once every key has landed
    /// (§4.6). Stands in for the original's asynchronous worker pool: the
    /// work happens synchronously here since this store has no network
    /// boundary to hide latency behind.
    pub fn page_in_objects(
        &self,
        cache_keys: &[String],
        object_keys: &[String],
        cache: &KvCache,
        state: &State,
        page_in_channel: &str,
        read_timeout: Duration,
    ) -> Result<Vec<String>> {
        debug_assert_eq!(cache_keys.len(), object_keys.len());

        for (cache_key, object_key) in cache_keys.iter().zip(object_keys.iter()) {
            let blob = self.get_single_object(object_key)?;
            cache.put_cubes(std::slice::from_ref(cache_key), std::slice::from_ref(&blob), read_timeout);
            state.notify_page_in_complete(page_in_channel, object_key);
        }

        Ok(object_keys.to_vec())
    }

    /// Flushes one write-buffer entry to the durable store: writes the
    /// object, records its `s3-index` row, updates the id-index if the
    /// channel carries annotations, and clears the cuboid from the
    /// page-out set (§4.6 step 4, §4.8).
    #[allow(clippy::too_many_arguments)]
    pub fn trigger_page_out(
        &self,
        write_key: &str,
        lookup_key: &str,
        resolution: u32,
        t: u32,
        morton: u64,
        iso: bool,
        is_annotation: bool,
        ingest_job: u32,
        blob: Vec<u8>,
        cache: &KvCache,
        state: &State,
    ) -> Result<String> {
        let object_key = keys::object_key(lookup_key, resolution, t, morton, iso);

        self.put_single_object(&object_key, &blob)?;
        self.add_cuboid_to_index(&object_key, 0, ingest_job);

        if is_annotation {
            self.update_id_indices(lookup_key, resolution, &[object_key.clone()], &[blob])?;
        }

        cache.flush_write_buffer_entry(write_key, lookup_key, resolution, t, morton);
        state.remove_from_page_out(lookup_key, resolution, morton, t);

        Ok(object_key)
    }

    /// Decodes each annotation blob and records every distinct id it
    /// carries against the cuboid's Morton id (§4.9), retrying a
    /// simulated throttled conditional update the same way
    /// [`Self::reserve_ids_with_backoff`] does. An id-set that would grow
    /// past [`MAX_ID_SET_SIZE`] is logged and skipped (§4.8's `413`
    /// condition) rather than applied; the cuboid stays queryable via the
    /// cutout fallback, just without that id in its index.
    pub fn update_id_indices(&self, lookup_key: &str, resolution: u32, object_keys: &[String], blobs: &[Vec<u8>]) -> Result<()> {
        debug_assert_eq!(object_keys.len(), blobs.len());

        for (object_key, blob) in object_keys.iter().zip(blobs.iter()) {
            let morton: u64 = object_key
                .rsplit('&')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::ObjectStore(format!("malformed object key {object_key}")))?;

            let payload = codec::from_blosc(blob)?;
            for chunk in payload.chunks_exact(8) {
                let id = u64::from_le_bytes(chunk.try_into().expect("chunks_exact(8) yields 8 bytes"));
                if id == 0 {
                    continue;
                }
                self.add_morton_to_id_with_backoff(lookup_key, resolution, id, morton, object_key);
            }
        }

        Ok(())
    }

    /// Applies one `add_morton_to_id_checked` update, retrying on a
    /// simulated throttled conditional update (mirroring
    /// [`Self::reserve_ids_with_backoff`]'s backoff schedule) and
    /// `warn!`-logging a skip once the id-set size limit is hit.
    fn add_morton_to_id_with_backoff(&self, lookup_key: &str, resolution: u32, id: u64, morton: u64, object_key: &str) {
        let mut attempt = 0;
        loop {
            if self.indices.add_morton_to_id_checked(lookup_key, resolution, id, morton, MAX_ID_SET_SIZE) {
                return;
            }
            if attempt >= MAX_BACKOFF_RETRIES {
                warn!("update_id_indices: {object_key}'s id-set is at the {MAX_ID_SET_SIZE}-id limit, skipping id {id}");
                return;
            }
            let jitter_ms = rand::rng().random_range(0..50);
            let backoff = Duration::from_millis((2u64.pow(attempt) + jitter_ms) / 10);
            std::thread::sleep(backoff);
            attempt += 1;
        }
    }

    /// Reserves a fresh id block, retrying a simulated throttled
    /// conditional update with exponential backoff and jitter (§4.7,
    /// §7): `sleep = (2^k + jitter_ms) / 10` on the `k`-th retry, capped
    /// at [`MAX_BACKOFF_RETRIES`].
    pub fn reserve_ids_with_backoff(&self, lookup_key: &str, resolution: u32, num_ids: u64, deadline: Duration) -> Result<u64> {
        let mut attempt = 0;
        loop {
            match self.indices.reserve_ids(lookup_key, resolution, num_ids, deadline) {
                Ok(id) => return Ok(id),
                Err(err) if attempt < MAX_BACKOFF_RETRIES => {
                    warn!("reserve_ids_with_backoff: retry {attempt} for {lookup_key} after {err}");
                    let jitter_ms = rand::rng().random_range(0..50);
                    let backoff = Duration::from_millis((2u64.pow(attempt) + jitter_ms) / 10);
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Re-scans every object key under `base_dir` and rebuilds the in-memory
/// `s3-index`/id-index rows from scratch (§B supplemented maintenance
/// routine): a recovery path for when the secondary indices have drifted
/// from the objects folder's actual contents, without touching the blobs
/// themselves.
pub fn backfill_lookup_keys<F: FileSystem>(store: &ObjectStore<F>) -> Result<usize> {
    let objects_dir = store.base_dir.join(OBJECTS_FOLDER);
    let mut rebuilt = 0;

    for entry in F::read_dir(&objects_dir).map_err(|e| Error::ObjectStore(e.to_string()))? {
        if entry.is_dir() {
            continue;
        }
        let Some(object_key) = entry.file_name().to_str() else {
            continue;
        };
        store.add_cuboid_to_index(object_key, 0, 0);
        rebuilt += 1;
    }

    Ok(rebuilt)
}

/// Returns `true` if `object_key` names a file under `base_dir`'s objects
/// folder, without going through an [`ObjectStore`] instance. Used by
/// maintenance tooling that only has a bare directory to inspect.
pub fn object_exists_on_disk<F: FileSystem>(base_dir: &Path, object_key: &str) -> Result<bool> {
    F::exists(&base_dir.join(OBJECTS_FOLDER).join(object_key)).map_err(|e| Error::ObjectStore(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuboid::codec::{to_blosc, CompressionType};
    use test_log::test;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::<StdFileSystem>::open(dir.path()).unwrap();

        let key = keys::object_key("coll&exp&chan", 0, 0, 5, false);
        let blob = to_blosc(b"hello cuboid", CompressionType::None);
        store.put_single_object(&key, &blob).unwrap();

        assert_eq!(store.get_single_object(&key).unwrap(), blob);
    }

    #[test]
    fn cuboids_exist_splits_present_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::<StdFileSystem>::open(dir.path()).unwrap();

        let present = keys::object_key("coll&exp&chan", 0, 0, 1, false);
        let missing = keys::object_key("coll&exp&chan", 0, 0, 2, false);
        store.put_single_object(&present, b"data").unwrap();

        let (exists_idx, missing_idx) = store.cuboids_exist(&[present, missing], None).unwrap();
        assert_eq!(exists_idx, vec![0]);
        assert_eq!(missing_idx, vec![1]);
    }

    #[test]
    fn update_id_indices_records_every_distinct_nonzero_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::<StdFileSystem>::open(dir.path()).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&7u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&9u64.to_le_bytes());
        let blob = to_blosc(&payload, CompressionType::None);

        let morton = 42;
        let object_key = keys::object_key("coll&exp&chan", 0, 0, morton, false);
        store.update_id_indices("coll&exp&chan", 0, &[object_key], &[blob]).unwrap();

        assert_eq!(store.indices.mortons_for_id("coll&exp&chan", 0, 7).unwrap(), vec![morton]);
        assert_eq!(store.indices.mortons_for_id("coll&exp&chan", 0, 9).unwrap(), vec![morton]);
        assert!(store.indices.mortons_for_id("coll&exp&chan", 0, 0).is_none());
    }

    #[test]
    fn trigger_page_out_writes_object_and_clears_write_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::<StdFileSystem>::open(dir.path()).unwrap();
        let cache = KvCache::new();
        let state = State::new();

        let base = keys::write_cuboid_key("coll&exp&chan", 0, 0, 5, false);
        let write_key = cache.insert_cube_in_write_buffer(&base, "coll&exp&chan", 0, 0, 5, b"blob".to_vec());
        state.add_to_page_out("coll&exp&chan", 0, 5, 0);

        let object_key = store
            .trigger_page_out(&write_key, "coll&exp&chan", 0, 0, 5, false, false, 1, b"blob".to_vec(), &cache, &state)
            .unwrap();

        assert!(store.get_single_object(&object_key).is_ok());
        assert!(!cache.is_dirty("coll&exp&chan", 0, 0, 5));
        assert!(!state.in_page_out("coll&exp&chan", 0, 5, 0));
    }
}
