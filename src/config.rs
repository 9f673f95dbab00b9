// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Builder-style configuration (§3.2, §4.7, §4.8), in the shape of the
//! teacher's `config/mod.rs`: construct with [`SpatialDbConfig::new`],
//! chain setters, finish with [`SpatialDbConfig::build`].

use std::time::Duration;

/// Fixed spatial dimensions of one cuboid at a resolution, `[x, y, z]`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CubeDims {
    /// X extent.
    pub x: u32,
    /// Y extent.
    pub y: u32,
    /// Z extent.
    pub z: u32,
}

impl CubeDims {
    /// The default base-resolution cuboid size used throughout the test
    /// scenarios: 512x512x16.
    #[must_use]
    pub const fn default_base() -> Self {
        Self { x: 512, y: 512, z: 16 }
    }
}

/// Per-resolution cuboid dimension table. Resolution 0 is the base
/// (writable) resolution; later entries are the downsample pyramid.
#[derive(Clone, Debug)]
pub struct CubeDimsTable {
    levels: Vec<CubeDims>,
}

impl CubeDimsTable {
    /// Builds a table where every resolution shares the same cuboid
    /// dimensions — the common case in practice.
    #[must_use]
    pub fn uniform(dims: CubeDims, num_resolutions: usize) -> Self {
        Self {
            levels: vec![dims; num_resolutions.max(1)],
        }
    }

    /// Builds a table from explicit per-resolution entries.
    #[must_use]
    pub fn new(levels: Vec<CubeDims>) -> Self {
        Self { levels }
    }

    /// The cuboid dimensions at `resolution`, clamped to the deepest
    /// configured level (the pyramid stops shrinking once a dimension
    /// would go below 1).
    #[must_use]
    pub fn get(&self, resolution: u32) -> CubeDims {
        let idx = (resolution as usize).min(self.levels.len().saturating_sub(1));
        self.levels[idx]
    }
}

/// Reserve-ids deadline (§4.7): the compare-and-swap loop gives up after
/// this much wall-clock time and surfaces an error.
pub const RESERVE_IDS_DEADLINE: Duration = Duration::from_secs(10);

/// Maximum DynamoDB-style conditional-update retries before a throttled
/// write is surfaced to the caller (§4.8, §7).
pub const MAX_BACKOFF_RETRIES: u32 = 6;

/// Spread factor for lookup-key and ingest-id-hash GSI attributes (§3.5):
/// a random suffix in `[0, LOOKUP_KEY_MAX_N)` is appended during ingest to
/// avoid hot-partitioning a single channel's writes.
pub const LOOKUP_KEY_MAX_N: u32 = 100;

/// Maximum distinct ids tracked against a single cuboid's `id-set` (§4.8).
/// A DynamoDB item caps out around 400KB; at 8 bytes per id this is the
/// same order of magnitude. An update that would push a cuboid's id-set
/// past this is logged and skipped rather than applied.
pub const MAX_ID_SET_SIZE: usize = 50_000;

/// Builder for every tunable the core needs beyond what a [`crate::resource::Resource`]
/// already reports.
#[derive(Clone, Debug)]
pub struct SpatialDbConfig {
    cube_dims_table: CubeDimsTable,
    read_timeout: Duration,
    page_in_timeout: Duration,
    reserve_ids_deadline: Duration,
    max_backoff_retries: u32,
    lookup_key_max_n: u32,
}

impl Default for SpatialDbConfig {
    fn default() -> Self {
        Self {
            cube_dims_table: CubeDimsTable::uniform(CubeDims::default_base(), 1),
            read_timeout: Duration::from_secs(30 * 24 * 60 * 60),
            page_in_timeout: Duration::from_secs(30),
            reserve_ids_deadline: RESERVE_IDS_DEADLINE,
            max_backoff_retries: MAX_BACKOFF_RETRIES,
            lookup_key_max_n: LOOKUP_KEY_MAX_N,
        }
    }
}

impl SpatialDbConfig {
    /// Starts a new config with the scenario defaults (§8): 512x512x16
    /// cuboids, a 30-day cache TTL, a 30 s page-in timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-resolution cuboid dimension table.
    #[must_use]
    pub fn cube_dims_table(mut self, table: CubeDimsTable) -> Self {
        self.cube_dims_table = table;
        self
    }

    /// Sets the L1 cache TTL (`EXPIRE` value on every `CACHED-CUBOID` key).
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets how long `wait_for_page_in` blocks before raising
    /// [`crate::error::Error::Async`].
    #[must_use]
    pub fn page_in_timeout(mut self, timeout: Duration) -> Self {
        self.page_in_timeout = timeout;
        self
    }

    /// Overrides the reserve-ids compare-and-swap deadline (default 10 s).
    #[must_use]
    pub fn reserve_ids_deadline(mut self, deadline: Duration) -> Self {
        self.reserve_ids_deadline = deadline;
        self
    }

    /// Overrides the DynamoDB-style throttling backoff retry cap (default 6).
    #[must_use]
    pub fn max_backoff_retries(mut self, retries: u32) -> Self {
        self.max_backoff_retries = retries;
        self
    }

    /// Overrides the lookup-key GSI spread factor (default 100).
    #[must_use]
    pub fn lookup_key_max_n(mut self, n: u32) -> Self {
        self.lookup_key_max_n = n;
        self
    }

    /// The configured cuboid dimension table.
    #[must_use]
    pub fn cube_dims(&self) -> &CubeDimsTable {
        &self.cube_dims_table
    }

    /// The configured L1 cache TTL.
    #[must_use]
    pub fn get_read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// The configured page-in wait timeout.
    #[must_use]
    pub fn get_page_in_timeout(&self) -> Duration {
        self.page_in_timeout
    }

    /// The configured reserve-ids deadline.
    #[must_use]
    pub fn get_reserve_ids_deadline(&self) -> Duration {
        self.reserve_ids_deadline
    }

    /// The configured backoff retry cap.
    #[must_use]
    pub fn get_max_backoff_retries(&self) -> u32 {
        self.max_backoff_retries
    }

    /// The configured lookup-key spread factor.
    #[must_use]
    pub fn get_lookup_key_max_n(&self) -> u32 {
        self.lookup_key_max_n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn default_cube_dims_match_scenario_fixtures() {
        let config = SpatialDbConfig::new();
        let dims = config.cube_dims().get(0);
        assert_eq!(dims, CubeDims { x: 512, y: 512, z: 16 });
    }

    #[test]
    fn cube_dims_table_clamps_to_deepest_level() {
        let table = CubeDimsTable::new(vec![
            CubeDims { x: 512, y: 512, z: 16 },
            CubeDims { x: 256, y: 256, z: 16 },
        ]);
        assert_eq!(table.get(5), CubeDims { x: 256, y: 256, z: 16 });
    }

    #[test]
    fn builder_overrides_take_effect() {
        let config = SpatialDbConfig::new()
            .read_timeout(Duration::from_secs(60))
            .max_backoff_retries(3);
        assert_eq!(config.get_read_timeout(), Duration::from_secs(60));
        assert_eq!(config.get_max_backoff_retries(), 3);
    }
}
