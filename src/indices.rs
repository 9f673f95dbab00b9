// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Secondary indices over annotation ids (§4.7 `reserve_ids`, §4.9 object
//! indices): which cuboids carry a given id, and the id-count table used
//! to hand out fresh id blocks.

use crate::config::CubeDims;
use crate::error::{Error, Result};
use crate::keys;
use crate::morton;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One entry in an id-index row's `cuboid-set` attribute. Rows written by
/// the pre-Morton generation of the system carry the cuboid's full object
/// key instead of its bare Morton id; both shapes must be supported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IdIndexEntry {
    /// Current form: a bare Morton id.
    Morton(u64),
    /// Legacy form: a full object-store key, `H&L&r&t&m[&ISO...]`.
    LegacyObjectKey(String),
}

impl IdIndexEntry {
    /// Parses a raw `cuboid-set` member, detecting the legacy shape by
    /// string length/content (a bare Morton is a short decimal string; a
    /// legacy object key is long and ampersand-delimited).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.len() <= 20 && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(morton) = raw.parse() {
                return Self::Morton(morton);
            }
        }
        Self::LegacyObjectKey(raw.to_owned())
    }

    /// Recovers the Morton id this entry refers to, parsing it out of
    /// the trailing field of a legacy object key if necessary.
    #[must_use]
    pub fn to_morton(&self) -> Option<u64> {
        match self {
            Self::Morton(m) => Some(*m),
            Self::LegacyObjectKey(key) => key.rsplit('&').next()?.parse().ok(),
        }
    }
}

#[derive(Default)]
struct IdIndexRow {
    cuboid_set: Vec<IdIndexEntry>,
}

/// A voxel-space bounding box: half-open ranges on every axis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoundingBox {
    /// X range.
    pub x: Range<u64>,
    /// Y range.
    pub y: Range<u64>,
    /// Z range.
    pub z: Range<u64>,
    /// Time-sample range.
    pub t: Range<u64>,
}

/// Kind of bounding box query (§B supplemented `bounding_box` wrapper).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoundingBoxKind {
    /// Cuboid-grid-aligned, derived purely from the id-index.
    Loose,
    /// Voxel-exact, refined via face-wise cutout scans.
    Tight,
}

/// The id-index, id-count, and reverse cuboid-id-set tables (§3.5, §4.7,
/// §4.9).
pub struct ObjectIndices {
    id_index: Mutex<HashMap<String, IdIndexRow, FxBuildHasher>>,
    id_count: Mutex<HashMap<String, u64, FxBuildHasher>>,
    /// Morton → distinct ids, the reverse of `id_index`. Kept alongside it
    /// so `ids_in_region`'s interior fast path can read a cuboid's ids
    /// directly instead of cutting it out.
    cuboid_ids: Mutex<HashMap<String, Vec<u64>, FxBuildHasher>>,
}

impl Default for ObjectIndices {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIndices {
    /// Builds empty id-index/id-count tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id_index: Mutex::new(HashMap::default()),
            id_count: Mutex::new(HashMap::default()),
            cuboid_ids: Mutex::new(HashMap::default()),
        }
    }

    /// Adds `morton` to `id`'s `cuboid-set` row for `(lookup_key, resolution)`.
    pub fn add_morton_to_id(&self, lookup_key: &str, resolution: u32, id: u64, morton: u64) {
        let key = keys::id_index_key(lookup_key, resolution, id);
        let mut table = self.id_index.lock().expect("id-index lock poisoned");
        let row = table.entry(key).or_default();
        if !row.cuboid_set.iter().any(|e| e.to_morton() == Some(morton)) {
            row.cuboid_set.push(IdIndexEntry::Morton(morton));
        }
        drop(table);

        let reverse_key = keys::cuboid_id_set_key(lookup_key, resolution, morton);
        let mut reverse = self.cuboid_ids.lock().expect("cuboid-id-set lock poisoned");
        let row = reverse.entry(reverse_key).or_default();
        if !row.contains(&id) {
            row.push(id);
        }
    }

    /// Like [`Self::add_morton_to_id`], but refuses to grow a cuboid's
    /// `id-set` row past `max_id_set_size` (§4.8's `413` condition).
    /// Returns `false` (without mutating anything) when the row is
    /// already at the limit and `id` isn't already a member of it.
    pub fn add_morton_to_id_checked(&self, lookup_key: &str, resolution: u32, id: u64, morton: u64, max_id_set_size: usize) -> bool {
        let reverse_key = keys::cuboid_id_set_key(lookup_key, resolution, morton);
        {
            let reverse = self.cuboid_ids.lock().expect("cuboid-id-set lock poisoned");
            if let Some(row) = reverse.get(&reverse_key) {
                if row.len() >= max_id_set_size && !row.contains(&id) {
                    return false;
                }
            }
        }
        self.add_morton_to_id(lookup_key, resolution, id, morton);
        true
    }

    /// The distinct ids recorded against `morton` for `(lookup_key,
    /// resolution)`, or empty if none have been indexed there.
    #[must_use]
    pub fn ids_for_morton(&self, lookup_key: &str, resolution: u32, morton: u64) -> Vec<u64> {
        let key = keys::cuboid_id_set_key(lookup_key, resolution, morton);
        self.cuboid_ids
            .lock()
            .expect("cuboid-id-set lock poisoned")
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// The distinct Morton ids containing `id`, or `None` if `id` has no
    /// cuboids indexed.
    #[must_use]
    pub fn mortons_for_id(&self, lookup_key: &str, resolution: u32, id: u64) -> Option<Vec<u64>> {
        let key = keys::id_index_key(lookup_key, resolution, id);
        let table = self.id_index.lock().expect("id-index lock poisoned");
        let row = table.get(&key)?;
        if row.cuboid_set.is_empty() {
            return None;
        }
        Some(row.cuboid_set.iter().filter_map(IdIndexEntry::to_morton).collect())
    }

    /// Reserves a block of `num_ids` annotation ids for `(lookup_key,
    /// resolution)`, returning the first id in the reserved block.
    /// Retries the compare-and-swap for up to `deadline` (§4.7).
    pub fn reserve_ids(&self, lookup_key: &str, resolution: u32, num_ids: u64, deadline: Duration) -> Result<u64> {
        let key = format!("{}&{resolution}", keys::id_count_key(lookup_key));
        let start = Instant::now();

        loop {
            if start.elapsed() > deadline {
                return Err(Error::Spdb(format!(
                    "reserve_ids timed out after {:?} for {lookup_key}",
                    deadline
                )));
            }

            let mut table = self.id_count.lock().expect("id-count lock poisoned");
            let observed = *table.entry(key.clone()).or_insert(1);
            table.insert(key.clone(), observed + num_ids);
            return Ok(observed);
        }
    }

    /// The cuboid-grid-aligned enclosing box for `id`, derived purely
    /// from the id-index (§4.9 loose bbox). `None` if `id` has no
    /// indexed cuboids.
    #[must_use]
    pub fn loose_bounding_box(&self, lookup_key: &str, resolution: u32, id: u64, dims: CubeDims) -> Option<BoundingBox> {
        let mortons = self.mortons_for_id(lookup_key, resolution, id)?;

        let mut x_min = u64::MAX;
        let mut x_max = 0;
        let mut y_min = u64::MAX;
        let mut y_max = 0;
        let mut z_min = u64::MAX;
        let mut z_max = 0;

        for m in mortons {
            let (gx, gy, gz) = morton::morton_to_xyz(m);
            let (x, y, z) = (gx * u64::from(dims.x), gy * u64::from(dims.y), gz * u64::from(dims.z));
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
            z_min = z_min.min(z);
            z_max = z_max.max(z);
        }

        Some(BoundingBox {
            x: x_min..(x_max + u64::from(dims.x)),
            y: y_min..(y_max + u64::from(dims.y)),
            z: z_min..(z_max + u64::from(dims.z)),
            t: 0..1,
        })
    }

    /// Narrows `loose` to the voxel-exact bounding box of `id` by
    /// face-scanning each of the six faces of the loose box (§4.9.1).
    /// `cutout` decodes the annotation voxels covering `(corner, extent)`.
    pub fn tight_bounding_box(
        &self,
        loose: &BoundingBox,
        id: u64,
        dims: CubeDims,
        mut cutout: impl FnMut((u64, u64, u64), (u64, u64, u64)) -> Result<Vec<u64>>,
    ) -> Result<BoundingBox> {
        let corner = (loose.x.start, loose.y.start, loose.z.start);
        let full_extent = (
            loose.x.end - loose.x.start,
            loose.y.end - loose.y.start,
            loose.z.end - loose.z.start,
        );

        let mut x_range = loose.x.clone();
        let mut y_range = loose.y.clone();
        let mut z_range = loose.z.clone();

        // x axis: near face then far face. Both always run, even when the
        // loose box is only one cuboid wide on this axis — a single near
        // scan only ever narrows the start, so the far scan is what
        // narrows the end down from the untouched loose value.
        scan_axis_extreme(
            &mut cutout,
            id,
            (corner.0, corner.1, corner.2),
            (u64::from(dims.x).min(full_extent.0), full_extent.1, full_extent.2),
            0,
            &mut x_range,
            true,
        )?;
        let far_corner = (loose.x.end - u64::from(dims.x).min(full_extent.0), corner.1, corner.2);
        scan_axis_extreme(
            &mut cutout,
            id,
            far_corner,
            (u64::from(dims.x).min(full_extent.0), full_extent.1, full_extent.2),
            0,
            &mut x_range,
            false,
        )?;

        // y axis.
        scan_axis_extreme(
            &mut cutout,
            id,
            (corner.0, corner.1, corner.2),
            (full_extent.0, u64::from(dims.y).min(full_extent.1), full_extent.2),
            1,
            &mut y_range,
            true,
        )?;
        let far_corner = (corner.0, loose.y.end - u64::from(dims.y).min(full_extent.1), corner.2);
        scan_axis_extreme(
            &mut cutout,
            id,
            far_corner,
            (full_extent.0, u64::from(dims.y).min(full_extent.1), full_extent.2),
            1,
            &mut y_range,
            false,
        )?;

        // z axis.
        scan_axis_extreme(
            &mut cutout,
            id,
            (corner.0, corner.1, corner.2),
            (full_extent.0, full_extent.1, u64::from(dims.z).min(full_extent.2)),
            2,
            &mut z_range,
            true,
        )?;
        let far_corner = (corner.0, corner.1, loose.z.end - u64::from(dims.z).min(full_extent.2));
        scan_axis_extreme(
            &mut cutout,
            id,
            far_corner,
            (full_extent.0, full_extent.1, u64::from(dims.z).min(full_extent.2)),
            2,
            &mut z_range,
            false,
        )?;

        Ok(BoundingBox {
            x: x_range,
            y: y_range,
            z: z_range,
            t: loose.t.clone(),
        })
    }

    /// Convenience wrapper dispatching to [`Self::loose_bounding_box`] or
    /// the loose+tight pair, per `kind`.
    pub fn bounding_box(
        &self,
        kind: BoundingBoxKind,
        lookup_key: &str,
        resolution: u32,
        id: u64,
        dims: CubeDims,
        cutout: impl FnMut((u64, u64, u64), (u64, u64, u64)) -> Result<Vec<u64>>,
    ) -> Result<Option<BoundingBox>> {
        let Some(loose) = self.loose_bounding_box(lookup_key, resolution, id, dims) else {
            return Ok(None);
        };

        match kind {
            BoundingBoxKind::Loose => Ok(Some(loose)),
            BoundingBoxKind::Tight => Ok(Some(self.tight_bounding_box(&loose, id, dims, cutout)?)),
        }
    }
}

/// Scans a face cutout for positions where the voxel equals `id` along
/// `axis` (0=x, 1=y, 2=z), narrowing `range`'s near or far end.
fn scan_axis_extreme(
    cutout: &mut impl FnMut((u64, u64, u64), (u64, u64, u64)) -> Result<Vec<u64>>,
    id: u64,
    corner: (u64, u64, u64),
    extent: (u64, u64, u64),
    axis: usize,
    range: &mut Range<u64>,
    is_near: bool,
) -> Result<()> {
    let voxels = cutout(corner, extent)?;
    let (ex, ey, ez) = extent;
    if ex == 0 || ey == 0 || ez == 0 {
        return Ok(());
    }

    let mut found: Option<u64> = None;
    for zi in 0..ez {
        for yi in 0..ey {
            for xi in 0..ex {
                let idx = ((zi * ey + yi) * ex + xi) as usize;
                if voxels.get(idx).copied() == Some(id) {
                    let axis_local = match axis {
                        0 => xi,
                        1 => yi,
                        _ => zi,
                    };
                    found = Some(match found {
                        Some(f) if is_near => f.min(axis_local),
                        Some(f) => f.max(axis_local),
                        None => axis_local,
                    });
                }
            }
        }
    }

    let Some(local) = found else {
        return Ok(());
    };
    let global = match axis {
        0 => corner.0 + local,
        1 => corner.1 + local,
        _ => corner.2 + local,
    };

    if is_near {
        range.start = global;
    } else {
        range.end = global + 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const DIMS: CubeDims = CubeDims { x: 512, y: 512, z: 16 };

    #[test]
    fn id_index_entry_detects_legacy_object_keys() {
        assert_eq!(IdIndexEntry::parse("42"), IdIndexEntry::Morton(42));
        let legacy = IdIndexEntry::parse("abcd1234&coll&exp&chan&0&0&42");
        assert_eq!(legacy.to_morton(), Some(42));
    }

    #[test]
    fn loose_bounding_box_spans_all_indexed_mortons() {
        let indices = ObjectIndices::new();
        indices.add_morton_to_id("L", 0, 7, morton::xyz_to_morton(0, 0, 0));
        indices.add_morton_to_id("L", 0, 7, morton::xyz_to_morton(1, 0, 0));

        let bbox = indices.loose_bounding_box("L", 0, 7, DIMS).unwrap();
        assert_eq!(bbox.x, 0..1024);
        assert_eq!(bbox.y, 0..512);
        assert_eq!(bbox.z, 0..16);
    }

    #[test]
    fn loose_bounding_box_none_when_unindexed() {
        let indices = ObjectIndices::new();
        assert!(indices.loose_bounding_box("L", 0, 999, DIMS).is_none());
    }

    #[test]
    fn ids_for_morton_tracks_the_reverse_of_add_morton_to_id() {
        let indices = ObjectIndices::new();
        let morton = morton::xyz_to_morton(0, 0, 0);
        indices.add_morton_to_id("L", 0, 7, morton);
        indices.add_morton_to_id("L", 0, 9, morton);
        indices.add_morton_to_id("L", 0, 7, morton); // duplicate, should not repeat

        let mut ids = indices.ids_for_morton("L", 0, morton);
        ids.sort_unstable();
        assert_eq!(ids, vec![7, 9]);
        assert!(indices.ids_for_morton("L", 0, morton::xyz_to_morton(1, 0, 0)).is_empty());
    }

    #[test]
    fn add_morton_to_id_checked_refuses_past_the_size_limit() {
        let indices = ObjectIndices::new();
        let morton = morton::xyz_to_morton(0, 0, 0);

        assert!(indices.add_morton_to_id_checked("L", 0, 1, morton, 2));
        assert!(indices.add_morton_to_id_checked("L", 0, 2, morton, 2));
        // Row is now at the limit; a third distinct id is refused.
        assert!(!indices.add_morton_to_id_checked("L", 0, 3, morton, 2));
        // An id already in the row is still accepted (idempotent).
        assert!(indices.add_morton_to_id_checked("L", 0, 1, morton, 2));

        let mut ids = indices.ids_for_morton("L", 0, morton);
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn reserve_ids_hands_out_disjoint_blocks() {
        let indices = ObjectIndices::new();
        let a = indices.reserve_ids("L", 0, 10, Duration::from_secs(1)).unwrap();
        let b = indices.reserve_ids("L", 0, 10, Duration::from_secs(1)).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 11);
    }

    #[test]
    fn tight_bounding_box_narrows_loose_box() {
        let indices = ObjectIndices::new();
        indices.add_morton_to_id("L", 0, 7, morton::xyz_to_morton(0, 0, 0));
        let loose = indices.loose_bounding_box("L", 0, 7, DIMS).unwrap();

        // Pretend the id only occupies voxel (5, 5, 2) inside this single cuboid.
        let cutout = |corner: (u64, u64, u64), extent: (u64, u64, u64)| -> Result<Vec<u64>> {
            let (ex, ey, ez) = extent;
            let mut data = vec![0u64; (ex * ey * ez) as usize];
            let (tx, ty, tz) = (5u64, 5u64, 2u64);
            if tx >= corner.0 && tx < corner.0 + ex && ty >= corner.1 && ty < corner.1 + ey && tz >= corner.2 && tz < corner.2 + ez {
                let (lx, ly, lz) = (tx - corner.0, ty - corner.1, tz - corner.2);
                data[((lz * ey + ly) * ex + lx) as usize] = 7;
            }
            Ok(data)
        };

        let tight = indices.tight_bounding_box(&loose, 7, DIMS, cutout).unwrap();
        assert_eq!(tight.x, 5..6);
        assert_eq!(tight.y, 5..6);
        assert_eq!(tight.z, 2..3);
    }
}
