// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level orchestrator (§4.7): `cutout`, `write_cuboid`, `get_cubes`,
//! `reserve_ids`. Wires the KV cache, state store, and durable object store
//! together the way `fjall-rs`'s `tree.rs` wires its memtable, block cache,
//! and segment levels behind one `Tree` facade.

use crate::config::SpatialDbConfig;
use crate::cuboid::codec::{self, CompressionType};
use crate::cuboid::kernels;
use crate::cuboid::{Cuboid, CuboidData, CuboidOps};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, StdFileSystem};
use crate::indices::{BoundingBox, BoundingBoxKind};
use crate::keys;
use crate::kv_cache::KvCache;
use crate::morton;
use crate::object_store::ObjectStore;
use crate::region;
use crate::resource::{ChannelType, Resource};
use crate::state::State;
use log::{debug, trace};
use std::collections::HashSet;

/// How a cutout should source its cuboids (§4.7 step 4).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMode {
    /// Consult the L1 cache first, paging in durable-store misses.
    Cache,
    /// Skip the cache, read the durable store directly.
    NoCache,
    /// Like `NoCache`, but also skips the dirty-key/write-buffer check.
    Raw,
}

/// The assembled cutout/write orchestrator, composing the three storage
/// tiers (§2) behind one facade.
pub struct SpatialDb<F: FileSystem = StdFileSystem> {
    cache: KvCache,
    store: ObjectStore<F>,
    state: State,
    config: SpatialDbConfig,
}

impl<F: FileSystem> SpatialDb<F> {
    /// Builds an orchestrator over a durable store rooted at `base_dir`.
    pub fn open(base_dir: impl Into<std::path::PathBuf>, config: SpatialDbConfig) -> Result<Self> {
        Ok(Self {
            cache: KvCache::new(),
            store: ObjectStore::open(base_dir)?,
            state: State::new(),
            config,
        })
    }

    /// `cutout(resource, corner, extent, resolution, t_range, iso,
    /// filter_ids, access_mode) -> Cuboid` (§4.7).
    #[allow(clippy::too_many_arguments)]
    pub fn cutout(
        &self,
        resource: &Resource,
        corner: (u64, u64, u64),
        extent: (u64, u64, u64),
        resolution: u32,
        t_range: (u32, u32),
        iso: bool,
        filter_ids: Option<&[u64]>,
        access_mode: AccessMode,
    ) -> Result<CuboidData> {
        let base_res = resource.channel().base_resolution;
        let data_type = resource.data_type();

        let (read_resolution, read_corner, read_extent, post) = if resolution == base_res {
            (base_res, corner, extent, Resample::None)
        } else if resource.channel().channel_type == ChannelType::Annotation && base_res > resolution {
            let d = base_res - resolution;
            let factor = 1u64 << d;
            (base_res, descale(corner, factor), descale(extent, factor), Resample::ZoomIn(d))
        } else if base_res < resolution && !resource.is_downsampled() {
            let d = resolution - base_res;
            let factor = 1u64 << d;
            (base_res, scale(corner, factor), scale(extent, factor), Resample::ZoomOut(d))
        } else {
            (resolution, corner, extent, Resample::None)
        };

        let dims = self.config.cube_dims().get(read_resolution);
        let (dx, dy, dz) = (u64::from(dims.x), u64::from(dims.y), u64::from(dims.z));

        let x_range = grid_range(read_corner.0, read_extent.0, dx);
        let y_range = grid_range(read_corner.1, read_extent.1, dy);
        let z_range = grid_range(read_corner.2, read_extent.2, dz);

        let mut mortons = Vec::new();
        for gz in z_range.clone() {
            for gy in y_range.clone() {
                for gx in x_range.clone() {
                    mortons.push((morton::xyz_to_morton(gx, gy, gz), gx, gy, gz));
                }
            }
        }
        mortons.sort_unstable_by_key(|(m, ..)| *m);

        let lookup_key = resource.lookup_key();
        let num_t = t_range.1.saturating_sub(t_range.0) as usize;
        let out_shape = (
            num_t.max(1),
            z_range.len() * dz as usize,
            y_range.len() * dy as usize,
            x_range.len() * dx as usize,
        );
        let mut out = CuboidData::zeros(out_shape, data_type);

        let gx_lo = x_range.start;
        let gy_lo = y_range.start;
        let gz_lo = z_range.start;
        let zero_len = (dx * dy * dz) as usize * data_type.byte_width();

        let morton_ids: Vec<u64> = mortons.iter().map(|(m, ..)| *m).collect();
        let blobs = self.read_many(lookup_key, read_resolution, t_range, &morton_ids, iso, access_mode, zero_len)?;

        let mut blob_idx = 0;
        for t in t_range.0..t_range.1 {
            for &(_, gx, gy, gz) in &mortons {
                let mut cuboid = CuboidData::from_raw_bytes(
                    (1, dz as usize, dy as usize, dx as usize),
                    data_type,
                    &codec::from_blosc(&blobs[blob_idx])?,
                )?;
                blob_idx += 1;

                if let Some(ids) = filter_ids {
                    apply_filter(&mut cuboid, ids)?;
                }

                let index = ((gx - gx_lo) as usize, (gy - gy_lo) as usize, (gz - gz_lo) as usize);
                add_data_into(&mut out, &cuboid, index, (t - t_range.0) as usize)?;
            }
        }

        let resampled = apply_resample(out, post, dims)?;

        // The assembled block's origin was computed in the *read*
        // resolution's grid; translate it into the *target* resolution's
        // space before trimming, matching whichever zoom `post` applied.
        let origin = match post {
            Resample::None => (x_range.start * dx, y_range.start * dy, z_range.start * dz),
            Resample::ZoomIn(d) => {
                let factor = 1u64 << d;
                (x_range.start * dx * factor, y_range.start * dy * factor, z_range.start * dz * factor)
            }
            Resample::ZoomOut(d) => {
                let factor = 1u64 << d;
                (x_range.start * dx / factor, y_range.start * dy / factor, z_range.start * dz / factor)
            }
        };
        let local_corner = (
            (corner.0 - origin.0) as usize,
            (corner.1 - origin.1) as usize,
            (corner.2 - origin.2) as usize,
        );
        trim(resampled, local_corner, extent)
    }

    /// Reads every cuboid's raw (blosc-enveloped) bytes for `t_range x
    /// mortons` (t outer, morton inner — the same order [`KvCache::get_missing_read_cache_keys`]
    /// uses), falling back to all-zero cuboids of `zero_len` bytes for
    /// coordinates that were never written (§4.3). Batches the cache-miss
    /// check, the durable-store existence check, and the page-in/zero-seed
    /// calls across the whole cutout instead of round-tripping per cuboid
    /// (§4.3's `KV cache.get_missing -> Object store.page_in_objects`
    /// data flow).
    #[allow(clippy::too_many_arguments)]
    fn read_many(
        &self,
        lookup_key: &str,
        resolution: u32,
        t_range: (u32, u32),
        mortons: &[u64],
        iso: bool,
        access_mode: AccessMode,
        zero_len: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let num_t = t_range.1.saturating_sub(t_range.0) as usize;
        let mut out: Vec<Option<Vec<u8>>> = vec![None; num_t * mortons.len()];
        let mut pending_idx = Vec::new();

        // Read-your-writes: anything still sitting in the write buffer is
        // served straight from there, bypassing the cache entirely.
        let mut idx = 0;
        for t in t_range.0..t_range.1 {
            for &morton_id in mortons {
                if access_mode != AccessMode::Raw {
                    if let Some(pending) = self.cache.latest_dirty_value(lookup_key, resolution, t, morton_id)? {
                        trace!("cutout: serving {lookup_key}&{resolution}&{t}&{morton_id} from the write buffer (dirty)");
                        out[idx] = Some(pending);
                        idx += 1;
                        continue;
                    }
                }
                pending_idx.push(idx);
                idx += 1;
            }
        }

        if pending_idx.is_empty() {
            return Ok(out.into_iter().map(|v| v.expect("every index filled")).collect());
        }

        let object_key_for = |i: usize| {
            let t = t_range.0 + (i / mortons.len()) as u32;
            keys::object_key(lookup_key, resolution, t, mortons[i % mortons.len()], iso)
        };

        match access_mode {
            AccessMode::Cache => {
                let read_timeout = self.config.get_read_timeout();
                let (missing, _cached, all_keys) =
                    self.cache.get_missing_read_cache_keys(lookup_key, resolution, t_range, mortons, iso, read_timeout);

                let pending_set: HashSet<usize> = pending_idx.iter().copied().collect();
                let still_missing: Vec<usize> = missing.into_iter().filter(|i| pending_set.contains(i)).collect();

                if !still_missing.is_empty() {
                    let missing_object_keys: Vec<String> = still_missing.iter().map(|&i| object_key_for(i)).collect();
                    let missing_cache_keys: Vec<String> = still_missing.iter().map(|&i| all_keys[i].clone()).collect();

                    let (exists_rel, missing_rel) = self.store.cuboids_exist(&missing_object_keys, None)?;

                    if !exists_rel.is_empty() {
                        let page_in_object_keys: Vec<String> = exists_rel.iter().map(|&r| missing_object_keys[r].clone()).collect();
                        let page_in_cache_keys: Vec<String> = exists_rel.iter().map(|&r| missing_cache_keys[r].clone()).collect();

                        let (channel, rx) = self.state.create_page_in_channel();
                        debug!("cutout: paging in {} object(s) on {channel}", page_in_object_keys.len());

                        self.store.page_in_objects(&page_in_cache_keys, &page_in_object_keys, &self.cache, &self.state, &channel, read_timeout)?;

                        let mut expected: HashSet<String> = page_in_object_keys.into_iter().collect();
                        self.state.wait_for_page_in(&mut expected, &rx, self.config.get_page_in_timeout())?;
                    }

                    if !missing_rel.is_empty() {
                        let seed_cache_keys: Vec<String> = missing_rel.iter().map(|&r| missing_cache_keys[r].clone()).collect();
                        trace!("cutout: {} object(s) have no durable object yet, seeding cache with zeros", seed_cache_keys.len());
                        let zero_blobs: Vec<Vec<u8>> = seed_cache_keys.iter().map(|_| codec::to_blosc(&vec![0u8; zero_len], CompressionType::None)).collect();
                        self.cache.put_cubes(&seed_cache_keys, &zero_blobs, read_timeout);
                    }
                }

                let pending_cache_keys: Vec<String> = pending_idx.iter().map(|&i| all_keys[i].clone()).collect();
                let blobs = self.cache.get_cubes(&pending_cache_keys)?;
                for (&i, (_, _, blob)) in pending_idx.iter().zip(blobs) {
                    out[i] = Some(blob);
                }
            }
            AccessMode::NoCache | AccessMode::Raw => {
                let object_keys: Vec<String> = pending_idx.iter().map(|&i| object_key_for(i)).collect();
                let (exists_rel, missing_rel) = self.store.cuboids_exist(&object_keys, None)?;

                if !exists_rel.is_empty() {
                    let present_keys: Vec<String> = exists_rel.iter().map(|&r| object_keys[r].clone()).collect();
                    let blobs = self.store.get_objects(&present_keys)?;
                    for (&r, blob) in exists_rel.iter().zip(blobs) {
                        out[pending_idx[r]] = Some(blob);
                    }
                }
                if !missing_rel.is_empty() {
                    let zero_blob = codec::to_blosc(&vec![0u8; zero_len], CompressionType::None);
                    for &r in &missing_rel {
                        out[pending_idx[r]] = Some(zero_blob.clone());
                    }
                }
            }
        }

        Ok(out.into_iter().map(|v| v.expect("every index filled")).collect())
    }

    /// `write_cuboid(resource, corner, resolution, data, time_sample_start,
    /// iso, to_black)` (§4.7).
    #[allow(clippy::too_many_arguments)]
    pub fn write_cuboid(
        &self,
        resource: &Resource,
        corner: (u64, u64, u64),
        resolution: u32,
        data: &CuboidData,
        time_sample_start: u32,
        iso: bool,
        to_black: bool,
    ) -> Result<()> {
        let base_res = resource.channel().base_resolution;
        if resolution != base_res {
            return Err(Error::ResolutionMismatch { base: base_res, got: resolution });
        }

        let lookup_key = resource.lookup_key();
        if self.state.project_locked(lookup_key) {
            return Err(Error::ResourceLocked(lookup_key.to_owned()));
        }

        let dims = self.config.cube_dims().get(resolution);
        let (dx, dy, dz) = (u64::from(dims.x), u64::from(dims.y), u64::from(dims.z));
        let (num_t, input_z, input_y, input_x) = data_shape(data);

        let x_range = grid_range(corner.0, input_x as u64, dx);
        let y_range = grid_range(corner.1, input_y as u64, dy);
        let z_range = grid_range(corner.2, input_z as u64, dz);

        for (ti, t) in (time_sample_start..time_sample_start + num_t as u32).enumerate() {
            for gz in z_range.clone() {
                for gy in y_range.clone() {
                    for gx in x_range.clone() {
                        let morton_id = morton::xyz_to_morton(gx, gy, gz);

                        let cuboid_corner = (gx * dx, gy * dy, gz * dz);
                        let cuboid_extent = (dx, dy, dz);
                        let mut current = self.cutout(
                            resource,
                            cuboid_corner,
                            cuboid_extent,
                            resolution,
                            (t, t + 1),
                            iso,
                            None,
                            AccessMode::Cache,
                        )?;

                        let local = (
                            gx as i64 * dx as i64 - corner.0 as i64,
                            gy as i64 * dy as i64 - corner.1 as i64,
                            gz as i64 * dz as i64 - corner.2 as i64,
                        );
                        let slice = extract_slice(data, local, (dx as usize, dy as usize, dz as usize), ti)?;

                        apply_overwrite(&mut current, &slice, to_black)?;

                        let blob = codec::to_blosc(&cuboid_raw_bytes(&current), CompressionType::None);
                        let base_key = if to_black {
                            format!("BLACK-CUBOID&{lookup_key}&{resolution}")
                        } else {
                            format!("WRITE-CUBOID&{lookup_key}&{resolution}")
                        };
                        let write_key = self.cache.insert_cube_in_write_buffer(&base_key, lookup_key, resolution, t, morton_id, blob);

                        let (_added, already_present) = self.state.add_to_page_out(lookup_key, resolution, morton_id, t);
                        if already_present {
                            self.state.add_to_delayed_write(lookup_key, &write_key);
                        } else {
                            let is_annotation = resource.channel().channel_type == ChannelType::Annotation;
                            let write_blob = self.cache.get_cube_from_write_buffer(&write_key)?;
                            self.store.trigger_page_out(
                                &write_key,
                                lookup_key,
                                resolution,
                                t,
                                morton_id,
                                iso,
                                is_annotation,
                                0,
                                write_blob,
                                &self.cache,
                                &self.state,
                            )?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Decodes a list of `CACHED-CUBOID` keys against `resource`, in order.
    pub fn get_cubes(&self, resource: &Resource, resolution: u32, keys: &[String]) -> Result<Vec<CuboidData>> {
        let dims = self.config.cube_dims().get(resolution);
        let shape = (1, dims.z as usize, dims.y as usize, dims.x as usize);

        self.cache
            .get_cubes(keys)?
            .into_iter()
            .map(|(_, _, blob)| CuboidData::from_raw_bytes(shape, resource.data_type(), &codec::from_blosc(&blob)?))
            .collect()
    }

    /// Reserves a block of annotation ids (§4.7). Image channels →
    /// [`Error::DatatypeNotSupported`].
    pub fn reserve_ids(&self, resource: &Resource, num_ids: u64) -> Result<u64> {
        if resource.channel().channel_type != ChannelType::Annotation {
            return Err(Error::DatatypeNotSupported(format!(
                "reserve_ids is only valid for annotation channels, got {:?}",
                resource.channel().channel_type
            )));
        }

        let id = self
            .store
            .reserve_ids_with_backoff(resource.lookup_key(), resource.channel().base_resolution, num_ids, self.config.get_reserve_ids_deadline())?;
        debug!("reserve_ids: {} reserved [{id}, {})", resource.lookup_key(), id + num_ids);
        Ok(id)
    }

    /// The enclosing box of an annotation `id`, loose (cuboid-grid-aligned,
    /// from the id-index alone) or tight (voxel-exact, refined by
    /// face-scanning cutouts) (§4.9). `None` if `id` has never been
    /// indexed.
    pub fn bounding_box(&self, resource: &Resource, resolution: u32, id: u64, kind: BoundingBoxKind) -> Result<Option<BoundingBox>> {
        let dims = self.config.cube_dims().get(resolution);
        let lookup_key = resource.lookup_key();

        self.store.indices.bounding_box(kind, lookup_key, resolution, id, dims, |corner, extent| {
            let cuboid = self.cutout(resource, corner, extent, resolution, (0, 1), false, None, AccessMode::Cache)?;
            to_u64_voxels(&cuboid)
        })
    }

    /// Every distinct nonzero annotation id touching `(corner, extent)`,
    /// as decimal strings (§4.9). Splits the region via §4.10 into a
    /// fully-aligned interior plus up to six partial faces: partial faces
    /// are resolved with a cutout and [`kernels::unique`], while the
    /// interior's ids come straight out of each covered cuboid's indexed
    /// id-set, which is cheaper than cutting it out.
    pub fn ids_in_region(&self, resource: &Resource, resolution: u32, corner: (u64, u64, u64), extent: (u64, u64, u64)) -> Result<Vec<String>> {
        let dims = self.config.cube_dims().get(resolution);
        let lookup_key = resource.lookup_key();
        let mut ids: HashSet<u64> = HashSet::new();

        for bounds in region::all_partial_sub_regions(corner, extent, dims) {
            if bounds.extent.0 == 0 || bounds.extent.1 == 0 || bounds.extent.2 == 0 {
                continue;
            }
            let cuboid = self.cutout(resource, bounds.corner, bounds.extent, resolution, (0, 1), false, None, AccessMode::Cache)?;
            ids.extend(kernels::unique(&to_u64_voxels(&cuboid)?));
        }

        let ranges = region::cuboid_aligned_sub_region(corner, extent, dims);
        if !ranges.x.is_empty() && !ranges.y.is_empty() && !ranges.z.is_empty() {
            for gz in ranges.z.clone() {
                for gy in ranges.y.clone() {
                    for gx in ranges.x.clone() {
                        let morton_id = morton::xyz_to_morton(gx, gy, gz);
                        ids.extend(self.store.indices.ids_for_morton(lookup_key, resolution, morton_id));
                    }
                }
            }
        }

        ids.remove(&0);
        let mut out: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
        out.sort_unstable();
        Ok(out)
    }
}

fn to_u64_voxels(data: &CuboidData) -> Result<Vec<u64>> {
    match data {
        CuboidData::Uint64(c) => Ok(c.data().to_vec()),
        _ => Err(Error::DatatypeMismatch { expected: "uint64", got: "other" }),
    }
}

#[derive(Copy, Clone, Debug)]
enum Resample {
    None,
    ZoomIn(u32),
    ZoomOut(u32),
}

fn scale(v: (u64, u64, u64), factor: u64) -> (u64, u64, u64) {
    (v.0 * factor, v.1 * factor, v.2 * factor)
}

fn descale(v: (u64, u64, u64), factor: u64) -> (u64, u64, u64) {
    (v.0 / factor, v.1 / factor, v.2 / factor)
}

fn grid_range(corner: u64, extent: u64, dim: u64) -> std::ops::Range<u64> {
    if extent == 0 {
        return corner / dim..corner / dim;
    }
    corner / dim..(corner + extent - 1) / dim + 1
}

fn data_shape(data: &CuboidData) -> (usize, usize, usize, usize) {
    CuboidOps::shape(data)
}

fn apply_filter(cuboid: &mut CuboidData, ids: &[u64]) -> Result<()> {
    let CuboidData::Uint64(c) = cuboid else {
        return Err(Error::DatatypeMismatch { expected: "uint64", got: "other" });
    };
    let shape = c.shape();
    let filtered = kernels::filter(c.data(), ids);
    *c = Cuboid::from_data(shape, filtered)?;
    Ok(())
}

fn add_data_into(out: &mut CuboidData, input: &CuboidData, index: (usize, usize, usize), t_offset: usize) -> Result<()> {
    match (out, input) {
        (CuboidData::Uint8(o), CuboidData::Uint8(i)) => o.add_data_at_time(i, index, t_offset),
        (CuboidData::Uint16(o), CuboidData::Uint16(i)) => o.add_data_at_time(i, index, t_offset),
        (CuboidData::Uint32(o), CuboidData::Uint32(i)) => o.add_data_at_time(i, index, t_offset),
        (CuboidData::Uint64(o), CuboidData::Uint64(i)) => o.add_data_at_time(i, index, t_offset),
        (CuboidData::Float32(o), CuboidData::Float32(i)) => o.add_data_at_time(i, index, t_offset),
        _ => Err(Error::DatatypeMismatch { expected: "matching cuboid type", got: "mismatched cuboid type" }),
    }
}

fn apply_overwrite(target: &mut CuboidData, input: &CuboidData, to_black: bool) -> Result<()> {
    match (target, input) {
        (CuboidData::Uint8(t), CuboidData::Uint8(i)) => overwrite_one(t, i, to_black),
        (CuboidData::Uint16(t), CuboidData::Uint16(i)) => overwrite_one(t, i, to_black),
        (CuboidData::Uint32(t), CuboidData::Uint32(i)) => overwrite_one(t, i, to_black),
        (CuboidData::Uint64(t), CuboidData::Uint64(i)) => overwrite_one(t, i, to_black),
        (CuboidData::Float32(t), CuboidData::Float32(i)) => overwrite_one(t, i, to_black),
        _ => Err(Error::DatatypeMismatch { expected: "matching cuboid type", got: "mismatched cuboid type" }),
    }
}

fn overwrite_one<T: crate::cuboid::datatype::VoxelType>(target: &mut Cuboid<T>, input: &Cuboid<T>, to_black: bool) -> Result<()> {
    if to_black {
        target.overwrite_to_black(input)
    } else {
        target.overwrite(input)
    }
}

/// Pulls the `(dx, dy, dz)` sub-block of `data` (whose own corner is the
/// write request's `corner`) that lands at target cuboid-relative offset
/// `local`, zero-padding where the write doesn't fully cover the cuboid.
fn extract_slice(data: &CuboidData, local: (i64, i64, i64), cuboid_dims: (usize, usize, usize), t: usize) -> Result<CuboidData> {
    let (dx, dy, dz) = cuboid_dims;
    let (_, iz, iy, ix) = CuboidOps::shape(data);

    macro_rules! build {
        ($variant:ident, $ty:ty) => {{
            let CuboidData::$variant(src) = data else { unreachable!() };
            let mut out = vec![<$ty>::default(); dx * dy * dz];
            for z in 0..dz {
                let sz = local.2 + z as i64;
                if sz < 0 || sz as usize >= iz {
                    continue;
                }
                for y in 0..dy {
                    let sy = local.1 + y as i64;
                    if sy < 0 || sy as usize >= iy {
                        continue;
                    }
                    for x in 0..dx {
                        let sx = local.0 + x as i64;
                        if sx < 0 || sx as usize >= ix {
                            continue;
                        }
                        let src_idx = ((t * iz + sz as usize) * iy + sy as usize) * ix + sx as usize;
                        let dst_idx = (z * dy + y) * dx + x;
                        out[dst_idx] = src.data()[src_idx];
                    }
                }
            }
            Ok(CuboidData::$variant(Cuboid::from_data((1, dz, dy, dx), out)?))
        }};
    }

    match data {
        CuboidData::Uint8(_) => build!(Uint8, u8),
        CuboidData::Uint16(_) => build!(Uint16, u16),
        CuboidData::Uint32(_) => build!(Uint32, u32),
        CuboidData::Uint64(_) => build!(Uint64, u64),
        CuboidData::Float32(_) => build!(Float32, f32),
    }
}

fn cuboid_raw_bytes(data: &CuboidData) -> Vec<u8> {
    CuboidOps::to_raw_bytes(data)
}

fn apply_resample(data: CuboidData, resample: Resample, _dims: crate::config::CubeDims) -> Result<CuboidData> {
    let steps = match resample {
        Resample::None => return Ok(data),
        Resample::ZoomIn(d) | Resample::ZoomOut(d) => d,
    };

    macro_rules! zoom {
        ($variant:ident, $fn:ident) => {{
            let CuboidData::$variant(c) = &data else { unreachable!() };
            let (t, z, y, x) = c.shape();
            let mut cur = c.data().to_vec();
            let mut cur_dims = (z, y, x);
            for _ in 0..steps {
                let (next, next_dims) = kernels::$fn(&cur, cur_dims, true);
                cur = next;
                cur_dims = next_dims;
            }
            let (nz, ny, nx) = cur_dims;
            CuboidData::$variant(Cuboid::from_data((t, nz, ny, nx), cur)?)
        }};
    }

    Ok(match (resample, &data) {
        (Resample::ZoomIn(_), CuboidData::Uint8(_)) => zoom!(Uint8, zoom_in_2x),
        (Resample::ZoomIn(_), CuboidData::Uint16(_)) => zoom!(Uint16, zoom_in_2x),
        (Resample::ZoomIn(_), CuboidData::Uint32(_)) => zoom!(Uint32, zoom_in_2x),
        (Resample::ZoomIn(_), CuboidData::Uint64(_)) => zoom!(Uint64, zoom_in_2x),
        (Resample::ZoomIn(_), CuboidData::Float32(_)) => zoom!(Float32, zoom_in_2x),
        (Resample::ZoomOut(_), CuboidData::Uint8(_)) => zoom!(Uint8, zoom_out_2x),
        (Resample::ZoomOut(_), CuboidData::Uint16(_)) => zoom!(Uint16, zoom_out_2x),
        (Resample::ZoomOut(_), CuboidData::Uint32(_)) => zoom!(Uint32, zoom_out_2x),
        (Resample::ZoomOut(_), CuboidData::Uint64(_)) => zoom!(Uint64, zoom_out_2x),
        (Resample::ZoomOut(_), CuboidData::Float32(_)) => zoom!(Float32, zoom_out_2x),
        (Resample::None, _) => unreachable!(),
    })
}

fn trim(data: CuboidData, local_corner: (usize, usize, usize), extent: (u64, u64, u64)) -> Result<CuboidData> {
    let (x_off, y_off, z_off) = local_corner;
    let (ex, ey, ez) = (extent.0 as usize, extent.1 as usize, extent.2 as usize);

    Ok(match data {
        CuboidData::Uint8(c) => CuboidData::Uint8(c.trim(z_off, ez, y_off, ey, x_off, ex)),
        CuboidData::Uint16(c) => CuboidData::Uint16(c.trim(z_off, ez, y_off, ey, x_off, ex)),
        CuboidData::Uint32(c) => CuboidData::Uint32(c.trim(z_off, ez, y_off, ey, x_off, ex)),
        CuboidData::Uint64(c) => CuboidData::Uint64(c.trim(z_off, ez, y_off, ey, x_off, ex)),
        CuboidData::Float32(c) => CuboidData::Float32(c.trim(z_off, ez, y_off, ey, x_off, ex)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CubeDims, CubeDimsTable};
    use crate::cuboid::datatype::DataType;
    use crate::fs::StdFileSystem;
    use crate::resource::{Channel, ChannelType, Dims, StorageType};
    use test_log::test;

    const SMALL: CubeDims = CubeDims { x: 8, y: 8, z: 4 };

    fn image_resource() -> Resource {
        let channel = Channel {
            name: "chan".into(),
            channel_type: ChannelType::Image,
            datatype: DataType::Uint8,
            base_resolution: 0,
            sources: vec![],
            related: vec![],
            default_time_sample: 0,
            downsample_status: "NOT_DOWNSAMPLED".into(),
            storage_type: StorageType::Spdb,
            bucket: None,
            cv_path: None,
        };
        Resource::new(
            "coll".into(),
            "exp".into(),
            "frame".into(),
            channel,
            vec![Dims { xyz: [8, 8, 4] }],
            vec![Dims { xyz: [8, 8, 4] }],
            vec![Dims { xyz: [8, 8, 4] }],
            vec![Dims { xyz: [8, 8, 4] }],
            0,
        )
    }

    fn annotation_resource() -> Resource {
        let channel = Channel {
            name: "ann".into(),
            channel_type: ChannelType::Annotation,
            datatype: DataType::Uint64,
            base_resolution: 0,
            sources: vec![],
            related: vec![],
            default_time_sample: 0,
            downsample_status: "NOT_DOWNSAMPLED".into(),
            storage_type: StorageType::Spdb,
            bucket: None,
            cv_path: None,
        };
        Resource::new(
            "coll".into(),
            "exp".into(),
            "ann".into(),
            channel,
            vec![Dims { xyz: [8, 8, 4] }],
            vec![Dims { xyz: [8, 8, 4] }],
            vec![Dims { xyz: [8, 8, 4] }],
            vec![Dims { xyz: [8, 8, 4] }],
            0,
        )
    }

    fn db() -> (tempfile::TempDir, SpatialDb<StdFileSystem>) {
        let dir = tempfile::tempdir().unwrap();
        let config = SpatialDbConfig::new().cube_dims_table(CubeDimsTable::uniform(SMALL, 1));
        let db = SpatialDb::open(dir.path(), config).unwrap();
        (dir, db)
    }

    #[test]
    fn write_then_cutout_round_trips_single_cuboid() {
        let (_dir, db) = db();
        let resource = image_resource();

        let data: Vec<u8> = (0u8..=255).cycle().take(8 * 8 * 4).collect();
        let cuboid = CuboidData::Uint8(Cuboid::from_data((1, 4, 8, 8), data.clone()).unwrap());

        db.write_cuboid(&resource, (0, 0, 0), 0, &cuboid, 0, false, false).unwrap();

        let back = db
            .cutout(&resource, (0, 0, 0), (8, 8, 4), 0, (0, 1), false, None, AccessMode::Cache)
            .unwrap();

        assert_eq!(CuboidOps::to_raw_bytes(&back), CuboidOps::to_raw_bytes(&cuboid));
    }

    #[test]
    fn cutout_reads_unwritten_region_as_zeros() {
        let (_dir, db) = db();
        let resource = image_resource();

        let back = db
            .cutout(&resource, (0, 0, 0), (8, 8, 4), 0, (0, 1), false, None, AccessMode::Cache)
            .unwrap();

        assert!(CuboidOps::is_zeros(&back));
    }

    #[test]
    fn write_rejects_non_base_resolution() {
        let (_dir, db) = db();
        let resource = image_resource();
        let cuboid = CuboidData::zeros((1, 4, 8, 8), DataType::Uint8);
        let err = db.write_cuboid(&resource, (0, 0, 0), 1, &cuboid, 0, false, false).unwrap_err();
        assert!(matches!(err, Error::ResolutionMismatch { base: 0, got: 1 }));
    }

    #[test]
    fn reserve_ids_rejects_image_channels() {
        let (_dir, db) = db();
        let resource = image_resource();
        let err = db.reserve_ids(&resource, 10).unwrap_err();
        assert!(matches!(err, Error::DatatypeNotSupported(_)));
    }

    fn single_voxel_annotation_cuboid(x: usize, y: usize, z: usize, id: u64) -> CuboidData {
        let mut data = vec![0u64; 8 * 8 * 4];
        data[(z * 8 + y) * 8 + x] = id;
        CuboidData::Uint64(Cuboid::from_data((1, 4, 8, 8), data).unwrap())
    }

    #[test]
    fn tight_bounding_box_narrows_to_the_single_written_voxel() {
        use crate::indices::BoundingBoxKind;

        let (_dir, db) = db();
        let resource = annotation_resource();
        let cuboid = single_voxel_annotation_cuboid(5, 5, 2, 7);
        db.write_cuboid(&resource, (0, 0, 0), 0, &cuboid, 0, false, false).unwrap();

        let bbox = db.bounding_box(&resource, 0, 7, BoundingBoxKind::Tight).unwrap().unwrap();
        assert_eq!(bbox.x, 5..6);
        assert_eq!(bbox.y, 5..6);
        assert_eq!(bbox.z, 2..3);
    }

    #[test]
    fn bounding_box_is_none_for_an_unindexed_id() {
        use crate::indices::BoundingBoxKind;

        let (_dir, db) = db();
        let resource = annotation_resource();
        assert!(db.bounding_box(&resource, 0, 999, BoundingBoxKind::Loose).unwrap().is_none());
    }

    #[test]
    fn ids_in_region_finds_an_id_confined_to_the_interior() {
        let (_dir, db) = db();
        let resource = annotation_resource();
        let cuboid = single_voxel_annotation_cuboid(5, 5, 2, 7);
        db.write_cuboid(&resource, (0, 0, 0), 0, &cuboid, 0, false, false).unwrap();

        let ids = db.ids_in_region(&resource, 0, (0, 0, 0), (8, 8, 4)).unwrap();
        assert_eq!(ids, vec!["7".to_string()]);
    }

    #[test]
    fn ids_in_region_is_empty_over_unwritten_space() {
        let (_dir, db) = db();
        let resource = annotation_resource();
        let ids = db.ids_in_region(&resource, 0, (0, 0, 0), (8, 8, 4)).unwrap();
        assert!(ids.is_empty());
    }
}
