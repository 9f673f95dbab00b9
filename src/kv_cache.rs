// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The L1 read cache and L2 write buffer (§4.5): a flat, TTL'd keyspace
//! backed by a single in-process store, playing the role the original
//! system gives to a Redis-compatible engine.

use crate::error::{Error, Result};
use crate::keys;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// `(t, morton)` pair identifying one cuboid slot, used as the dirty
/// counter key (§9 design note: O(1) dirty tracking instead of a `KEYS`
/// scan).
type DirtyPrefix = String;

/// The L1/L2 KV cache. Thread-safe; every operation takes `&self`.
pub struct KvCache {
    store: Mutex<HashMap<String, Entry, FxBuildHasher>>,
    dirty_counts: Mutex<HashMap<DirtyPrefix, u32, FxBuildHasher>>,
    /// The most recently inserted write-buffer key for each `(L, r, t, m)`,
    /// so a cutout's dirty check (O2) can read the latest uncommitted
    /// write directly instead of only knowing *that* one is pending.
    latest_write_key: Mutex<HashMap<DirtyPrefix, String, FxBuildHasher>>,
}

impl Default for KvCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KvCache {
    /// Builds an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::default()),
            dirty_counts: Mutex::new(HashMap::default()),
            latest_write_key: Mutex::new(HashMap::default()),
        }
    }

    /// Computes `CACHED-CUBOID` keys for `t_range x morton_list` (t outer,
    /// morton inner), refreshes the TTL on every key, and reports which
    /// already existed.
    ///
    /// Returns `(missing_idx, cached_idx, all_keys)`.
    pub fn get_missing_read_cache_keys(
        &self,
        lookup_key: &str,
        resolution: u32,
        t_range: (u32, u32),
        morton_list: &[u64],
        iso: bool,
        read_timeout: Duration,
    ) -> (Vec<usize>, Vec<usize>, Vec<String>) {
        let mut all_keys = Vec::with_capacity(morton_list.len() * (t_range.1 - t_range.0) as usize);
        let mut missing_idx = Vec::new();
        let mut cached_idx = Vec::new();

        let mut store = self.store.lock().expect("kv cache store lock poisoned");

        let mut idx = 0;
        for t in t_range.0..t_range.1 {
            for &morton in morton_list {
                let key = keys::cached_cuboid_key(lookup_key, resolution, t, morton, iso);

                if let Some(entry) = store.get_mut(&key) {
                    entry.expires_at = Some(Instant::now() + read_timeout);
                    cached_idx.push(idx);
                } else {
                    missing_idx.push(idx);
                }

                all_keys.push(key);
                idx += 1;
            }
        }

        (missing_idx, cached_idx, all_keys)
    }

    /// Multi-get. Fails with [`Error::Redis`] if any key is missing.
    /// Returns `(time_sample, morton, bytes)` parsed from each key's last
    /// two ampersand-delimited fields.
    pub fn get_cubes(&self, key_list: &[String]) -> Result<Vec<(u32, u64, Vec<u8>)>> {
        let store = self.store.lock().expect("kv cache store lock poisoned");
        let mut out = Vec::with_capacity(key_list.len());

        for key in key_list {
            let entry = store.get(key).ok_or_else(|| {
                Error::Redis(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("missing cache key {key}"),
                ))
            })?;

            let (t, m) = parse_trailing_t_m(key)?;
            out.push((t, m, entry.value.clone()));
        }

        Ok(out)
    }

    /// Multi-set, refreshing the TTL on each key.
    pub fn put_cubes(&self, keys: &[String], blobs: &[Vec<u8>], read_timeout: Duration) {
        debug_assert_eq!(keys.len(), blobs.len());
        let mut store = self.store.lock().expect("kv cache store lock poisoned");
        let expires_at = Some(Instant::now() + read_timeout);

        for (key, blob) in keys.iter().zip(blobs.iter()) {
            store.insert(
                key.clone(),
                Entry {
                    value: blob.clone(),
                    expires_at,
                },
            );
        }
    }

    /// Refreshes the TTL and reports whether `key` exists.
    pub fn cube_exists(&self, key: &str, read_timeout: Duration) -> bool {
        let mut store = self.store.lock().expect("kv cache store lock poisoned");
        if let Some(entry) = store.get_mut(key) {
            entry.expires_at = Some(Instant::now() + read_timeout);
            true
        } else {
            false
        }
    }

    /// Deletes a cache entry, if present.
    pub fn delete_cube(&self, key: &str) {
        self.store.lock().expect("kv cache store lock poisoned").remove(key);
    }

    /// Appends `&t&m&uuid` to `base_key`, inserts the blob with no TTL
    /// (the write buffer is append-only until the flusher removes
    /// entries), and bumps the dirty counter for `(L, r, t, m)`.
    pub fn insert_cube_in_write_buffer(
        &self,
        base_key: &str,
        lookup_key: &str,
        resolution: u32,
        t: u32,
        morton: u64,
        blob: Vec<u8>,
    ) -> String {
        let uuid = uuid::Uuid::new_v4();
        let full_key = format!("{base_key}&{t}&{morton}&{uuid}");

        self.store.lock().expect("kv cache store lock poisoned").insert(
            full_key.clone(),
            Entry {
                value: blob,
                expires_at: None,
            },
        );

        let prefix = dirty_prefix(lookup_key, resolution, t, morton);
        *self
            .dirty_counts
            .lock()
            .expect("dirty counter lock poisoned")
            .entry(prefix.clone())
            .or_insert(0) += 1;

        self.latest_write_key
            .lock()
            .expect("latest write-key map poisoned")
            .insert(prefix, full_key.clone());

        full_key
    }

    /// The blob most recently written to the write buffer for `(L, r, t,
    /// m)`, if it is still dirty (O2 read-your-writes).
    pub fn latest_dirty_value(&self, lookup_key: &str, resolution: u32, t: u32, morton: u64) -> Result<Option<Vec<u8>>> {
        if !self.is_dirty(lookup_key, resolution, t, morton) {
            return Ok(None);
        }

        let prefix = dirty_prefix(lookup_key, resolution, t, morton);
        let key = self
            .latest_write_key
            .lock()
            .expect("latest write-key map poisoned")
            .get(&prefix)
            .cloned();

        match key {
            Some(key) => self.get_cube_from_write_buffer(&key).map(Some),
            None => Ok(None),
        }
    }

    /// Reads a write-buffer entry previously returned by
    /// [`Self::insert_cube_in_write_buffer`].
    pub fn get_cube_from_write_buffer(&self, key: &str) -> Result<Vec<u8>> {
        self.store
            .lock()
            .expect("kv cache store lock poisoned")
            .get(key)
            .map(|e| e.value.clone())
            .ok_or_else(|| {
                Error::Redis(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("missing write-buffer key {key}"),
                ))
            })
    }

    /// Removes a flushed write-buffer entry and decrements its dirty
    /// counter (the O(1) replacement for the original's `KEYS` scan,
    /// per the design note in §9).
    pub fn flush_write_buffer_entry(&self, write_key: &str, lookup_key: &str, resolution: u32, t: u32, morton: u64) {
        self.store.lock().expect("kv cache store lock poisoned").remove(write_key);

        let prefix = dirty_prefix(lookup_key, resolution, t, morton);
        let mut counts = self.dirty_counts.lock().expect("dirty counter lock poisoned");
        if let Some(count) = counts.get_mut(&prefix) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&prefix);
            }
        }

        let mut latest = self.latest_write_key.lock().expect("latest write-key map poisoned");
        if latest.get(&prefix).is_some_and(|k| k == write_key) {
            latest.remove(&prefix);
        }
    }

    /// `true` iff the `(L, r, t, m)` cuboid has at least one pending
    /// write-buffer entry.
    #[must_use]
    pub fn is_dirty(&self, lookup_key: &str, resolution: u32, t: u32, morton: u64) -> bool {
        let prefix = dirty_prefix(lookup_key, resolution, t, morton);
        self.dirty_counts
            .lock()
            .expect("dirty counter lock poisoned")
            .get(&prefix)
            .is_some_and(|count| *count > 0)
    }
}

fn dirty_prefix(lookup_key: &str, resolution: u32, t: u32, morton: u64) -> String {
    format!("{lookup_key}&{resolution}&{t}&{morton}")
}

fn parse_trailing_t_m(key: &str) -> Result<(u32, u64)> {
    let mut parts = key.rsplitn(3, '&');
    let morton = parts.next().ok_or_else(|| malformed_key(key))?;
    let t = parts.next().ok_or_else(|| malformed_key(key))?;

    let morton: u64 = morton.parse().map_err(|_| malformed_key(key))?;
    let t: u32 = t.parse().map_err(|_| malformed_key(key))?;

    Ok((t, morton))
}

fn malformed_key(key: &str) -> Error {
    Error::Redis(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("malformed cache key {key}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn missing_read_cache_keys_orders_t_outer_morton_inner() {
        let cache = KvCache::new();
        let (missing, cached, keys) = cache.get_missing_read_cache_keys(
            "coll&exp&chan",
            0,
            (0, 2),
            &[1, 2],
            false,
            Duration::from_secs(60),
        );
        assert_eq!(keys.len(), 4);
        assert_eq!(missing, vec![0, 1, 2, 3]);
        assert!(cached.is_empty());
        assert!(keys[0].ends_with("&0&1"));
        assert!(keys[1].ends_with("&0&2"));
        assert!(keys[2].ends_with("&1&1"));
        assert!(keys[3].ends_with("&1&2"));
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = KvCache::new();
        let key = keys::cached_cuboid_key("coll&exp&chan", 0, 0, 5, false);
        cache.put_cubes(&[key.clone()], &[vec![1, 2, 3]], Duration::from_secs(60));

        let (_, cached, _) =
            cache.get_missing_read_cache_keys("coll&exp&chan", 0, (0, 1), &[5], false, Duration::from_secs(60));
        assert_eq!(cached, vec![0]);

        let cubes = cache.get_cubes(&[key]).unwrap();
        assert_eq!(cubes, vec![(0, 5, vec![1, 2, 3])]);
    }

    #[test]
    fn get_cubes_fails_on_missing_key() {
        let cache = KvCache::new();
        let key = keys::cached_cuboid_key("coll&exp&chan", 0, 0, 5, false);
        assert!(cache.get_cubes(&[key]).is_err());
    }

    #[test]
    fn write_buffer_insert_marks_dirty_and_flush_clears_it() {
        let cache = KvCache::new();
        let base = "WRITE-CUBOID&coll&exp&chan&0";
        let write_key = cache.insert_cube_in_write_buffer(base, "coll&exp&chan", 0, 1, 7, vec![9]);

        assert!(cache.is_dirty("coll&exp&chan", 0, 1, 7));
        assert_eq!(cache.get_cube_from_write_buffer(&write_key).unwrap(), vec![9]);

        cache.flush_write_buffer_entry(&write_key, "coll&exp&chan", 0, 1, 7);
        assert!(!cache.is_dirty("coll&exp&chan", 0, 1, 7));
        assert!(cache.get_cube_from_write_buffer(&write_key).is_err());
    }

    #[test]
    fn cube_exists_refreshes_without_requiring_a_separate_refresh_call() {
        let cache = KvCache::new();
        let key = keys::cached_cuboid_key("coll&exp&chan", 0, 0, 1, false);
        assert!(!cache.cube_exists(&key, Duration::from_secs(60)));

        cache.put_cubes(&[key.clone()], &[vec![1]], Duration::from_secs(60));
        assert!(cache.cube_exists(&key, Duration::from_secs(60)));
    }
}
