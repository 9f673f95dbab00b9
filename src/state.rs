// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Coordination state (§4.6, §5): project write-locks, the page-in
//! pub/sub fan-out, the page-out set, the delayed-write queue, and the
//! cache-miss list. Backed by the same kind of single-threaded
//! cooperative store the cache uses, kept as a logically separate
//! database.

use crate::error::{Error, Result};
use log::{debug, trace};
use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// One pending or in-flight write, identified by `(t, morton)` within a
/// `(lookup_key, resolution)` scope.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct CuboidSlot {
    lookup_key: String,
    resolution: u32,
    t: u32,
    morton: u64,
}

/// The delayed-write queue's entry: a lookup key paired with the
/// write-buffer key it couldn't immediately enqueue for page-out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DelayedWrite {
    /// The channel the write targets.
    pub lookup_key: String,
    /// The `WRITE-CUBOID`/`BLACK-CUBOID` key waiting to be flushed.
    pub write_key: String,
}

/// Coordination state shared across concurrent cutouts and writes.
pub struct State {
    project_locks: Mutex<HashSet<String>>,
    page_out: Mutex<HashSet<CuboidSlot>>,
    delayed_write: Mutex<VecDeque<DelayedWrite>>,
    cache_miss: Mutex<Vec<String>>,
    page_in_senders: Mutex<std::collections::HashMap<String, Sender<String>>>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Builds an empty state store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            project_locks: Mutex::new(HashSet::new()),
            page_out: Mutex::new(HashSet::new()),
            delayed_write: Mutex::new(VecDeque::new()),
            cache_miss: Mutex::new(Vec::new()),
            page_in_senders: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Sets or clears the write-lock on channel `lookup_key`.
    pub fn set_project_lock(&self, lookup_key: &str, locked: bool) {
        let mut locks = self.project_locks.lock().expect("project lock set poisoned");
        if locked {
            locks.insert(lookup_key.to_owned());
        } else {
            locks.remove(lookup_key);
        }
    }

    /// `true` if `lookup_key` is currently write-locked.
    #[must_use]
    pub fn project_locked(&self, lookup_key: &str) -> bool {
        self.project_locks.lock().expect("project lock set poisoned").contains(lookup_key)
    }

    /// Allocates a fresh `PAGE-IN-CHANNEL&U` name and subscribes the
    /// caller to it, returning the channel name and the receiving end.
    pub fn create_page_in_channel(&self) -> (String, Receiver<String>) {
        let name = format!("PAGE-IN-CHANNEL&{}", uuid::Uuid::new_v4());
        let (tx, rx) = channel();
        self.page_in_senders
            .lock()
            .expect("page-in sender map poisoned")
            .insert(name.clone(), tx);
        debug!("create_page_in_channel: dispatched {name}");
        (name, rx)
    }

    /// Publishes `object_key` on `channel`, if anyone is still
    /// subscribed (subscribers that already timed out are silently
    /// dropped — page-in worker leaks are tolerated per §5).
    pub fn notify_page_in_complete(&self, channel: &str, object_key: &str) {
        if let Some(tx) = self.page_in_senders.lock().expect("page-in sender map poisoned").get(channel) {
            trace!("notify_page_in_complete: {object_key} on {channel}");
            let _ = tx.send(object_key.to_owned());
        } else {
            debug!("notify_page_in_complete: {channel} has no subscriber left for {object_key}");
        }
    }

    /// Blocks consuming messages from `receiver`, removing each one from
    /// `expected_keys`, until the set empties (success) or `timeout`
    /// elapses ([`Error::Async`]).
    pub fn wait_for_page_in(
        &self,
        expected_keys: &mut HashSet<String>,
        receiver: &Receiver<String>,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = std::time::Instant::now() + timeout;

        while !expected_keys.is_empty() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Async(format!(
                    "page-in timed out waiting for {} key(s)",
                    expected_keys.len()
                )));
            }

            match receiver.recv_timeout(remaining) {
                Ok(key) => {
                    expected_keys.remove(&key);
                }
                Err(RecvTimeoutError::Timeout) => {
                    debug!("wait_for_page_in: timed out with {} key(s) still outstanding", expected_keys.len());
                    return Err(Error::Async(format!(
                        "page-in timed out waiting for {} key(s)",
                        expected_keys.len()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("wait_for_page_in: sender disconnected with {} key(s) still outstanding", expected_keys.len());
                    return Err(Error::Async("page-in channel disconnected".into()));
                }
            }
        }

        Ok(())
    }

    /// Atomically adds `(t, morton)` to the page-out set for
    /// `(lookup_key, resolution)`. Returns `(added, already_present)`.
    pub fn add_to_page_out(&self, lookup_key: &str, resolution: u32, morton: u64, t: u32) -> (bool, bool) {
        let slot = CuboidSlot {
            lookup_key: lookup_key.to_owned(),
            resolution,
            t,
            morton,
        };
        let mut set = self.page_out.lock().expect("page-out set poisoned");
        let already_present = set.contains(&slot);
        let added = set.insert(slot);
        trace!("add_to_page_out: {lookup_key}&{resolution}&{morton}&{t} (already_present={already_present})");
        (added, already_present)
    }

    /// `true` if `(lookup_key, resolution, t, morton)` is currently
    /// paging out.
    #[must_use]
    pub fn in_page_out(&self, lookup_key: &str, resolution: u32, morton: u64, t: u32) -> bool {
        let slot = CuboidSlot {
            lookup_key: lookup_key.to_owned(),
            resolution,
            t,
            morton,
        };
        self.page_out.lock().expect("page-out set poisoned").contains(&slot)
    }

    /// Removes `(lookup_key, resolution, t, morton)` from the page-out
    /// set once its flush has committed.
    pub fn remove_from_page_out(&self, lookup_key: &str, resolution: u32, morton: u64, t: u32) {
        let slot = CuboidSlot {
            lookup_key: lookup_key.to_owned(),
            resolution,
            t,
            morton,
        };
        self.page_out.lock().expect("page-out set poisoned").remove(&slot);
        trace!("remove_from_page_out: {lookup_key}&{resolution}&{morton}&{t} flushed");
    }

    /// Queues a write-buffer key that couldn't be enqueued for page-out
    /// because its cuboid was already flushing.
    pub fn add_to_delayed_write(&self, lookup_key: &str, write_key: &str) {
        self.delayed_write.lock().expect("delayed-write queue poisoned").push_back(DelayedWrite {
            lookup_key: lookup_key.to_owned(),
            write_key: write_key.to_owned(),
        });
        debug!("add_to_delayed_write: {lookup_key} queued retry for {write_key}");
    }

    /// Dequeues and returns one delayed write, if any are queued.
    pub fn get_delayed_write_key(&self) -> Option<DelayedWrite> {
        let popped = self.delayed_write.lock().expect("delayed-write queue poisoned").pop_front();
        if let Some(ref delayed) = popped {
            trace!("get_delayed_write_key: retrying {} for {}", delayed.write_key, delayed.lookup_key);
        }
        popped
    }

    /// Appends `keys` to the cache-miss list (optional pre-fetch hint).
    pub fn add_cache_misses(&self, keys: &[String]) {
        self.cache_miss.lock().expect("cache-miss list poisoned").extend_from_slice(keys);
    }

    /// Current contents of the cache-miss list.
    #[must_use]
    pub fn cache_misses(&self) -> Vec<String> {
        self.cache_miss.lock().expect("cache-miss list poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn project_lock_round_trips() {
        let state = State::new();
        assert!(!state.project_locked("L"));
        state.set_project_lock("L", true);
        assert!(state.project_locked("L"));
        state.set_project_lock("L", false);
        assert!(!state.project_locked("L"));
    }

    #[test]
    fn page_in_channel_delivers_notifications() {
        let state = State::new();
        let (channel, rx) = state.create_page_in_channel();

        state.notify_page_in_complete(&channel, "obj-key-1");

        let mut expected: HashSet<String> = ["obj-key-1".to_owned()].into_iter().collect();
        state.wait_for_page_in(&mut expected, &rx, Duration::from_secs(1)).unwrap();
        assert!(expected.is_empty());
    }

    #[test]
    fn wait_for_page_in_times_out() {
        let state = State::new();
        let (_channel, rx) = state.create_page_in_channel();
        let mut expected: HashSet<String> = ["never-comes".to_owned()].into_iter().collect();
        let err = state.wait_for_page_in(&mut expected, &rx, Duration::from_millis(20));
        assert!(err.is_err());
    }

    #[test]
    fn page_out_add_reports_already_present() {
        let state = State::new();
        let (added, present) = state.add_to_page_out("L", 0, 5, 0);
        assert!(added);
        assert!(!present);

        let (added_again, present_again) = state.add_to_page_out("L", 0, 5, 0);
        assert!(added_again);
        assert!(present_again);
    }

    #[test]
    fn delayed_write_is_fifo() {
        let state = State::new();
        state.add_to_delayed_write("L", "write-key-1");
        state.add_to_delayed_write("L", "write-key-2");

        assert_eq!(state.get_delayed_write_key().unwrap().write_key, "write-key-1");
        assert_eq!(state.get_delayed_write_key().unwrap().write_key, "write-key-2");
        assert!(state.get_delayed_write_key().is_none());
    }
}
