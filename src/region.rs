// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Splits an arbitrary axis-aligned region into a cuboid-aligned interior
//! plus up to six partial "face" sub-regions (§4.10). Every coordinate
//! here is in the working resolution's voxel grid, `(x, y, z)` ordered.

use crate::config::CubeDims;
use std::ops::Range;

/// `(x, y, z)` voxel corner of a region.
pub type Corner = (u64, u64, u64);
/// `(x, y, z)` voxel extent of a region.
pub type Extent = (u64, u64, u64);

/// Ranges of fully-contained cuboid indices on each axis, returned by
/// [`cuboid_aligned_sub_region`]. An empty range means no axis has any
/// fully-contained cuboid inside the queried region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CuboidRanges {
    /// Fully-contained cuboid indices along x.
    pub x: Range<u64>,
    /// Fully-contained cuboid indices along y.
    pub y: Range<u64>,
    /// Fully-contained cuboid indices along z.
    pub z: Range<u64>,
}

/// A partial face sub-region: a voxel corner and extent. `extent == 0`
/// on every axis but this face's own means the face is absent and the
/// caller should skip it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Bounds {
    /// Voxel corner.
    pub corner: Corner,
    /// Voxel extent.
    pub extent: Extent,
}

fn first_cuboid(start: u64, cube_dim: u64) -> u64 {
    if start % cube_dim != 0 {
        1 + start / cube_dim
    } else {
        start / cube_dim
    }
}

fn last_cuboid(start: u64, extent: u64, cube_dim: u64) -> u64 {
    let end = start + extent;
    let mut end_cube = end / cube_dim;
    if end % cube_dim != 0 {
        let aligned_end = (end / cube_dim) * cube_dim;
        if aligned_end < start + cube_dim {
            end_cube = end_cube.saturating_sub(1);
        }
    }
    end_cube
}

/// Ranges of cuboid indices fully contained by `(corner, extent)` at
/// `dims`.
#[must_use]
pub fn cuboid_aligned_sub_region(corner: Corner, extent: Extent, dims: CubeDims) -> CuboidRanges {
    let x_start = first_cuboid(corner.0, u64::from(dims.x));
    let y_start = first_cuboid(corner.1, u64::from(dims.y));
    let z_start = first_cuboid(corner.2, u64::from(dims.z));

    let x_end = last_cuboid(corner.0, extent.0, u64::from(dims.x));
    let y_end = last_cuboid(corner.1, extent.1, u64::from(dims.y));
    let z_end = last_cuboid(corner.2, extent.2, u64::from(dims.z));

    CuboidRanges {
        x: x_start..x_end,
        y: y_start..y_end,
        z: z_start..z_end,
    }
}

fn near_face(axis_corner: u64, axis_extent: u64, cube_dim: u64) -> (u64, u64) {
    if axis_corner % cube_dim == 0 && axis_extent >= cube_dim {
        return (axis_corner, 0);
    }

    let mut end = (1 + axis_corner / cube_dim) * cube_dim;
    let far_end = axis_corner + axis_extent;
    if end + cube_dim > far_end {
        end = far_end;
    } else {
        end = end.min(far_end);
    }

    (axis_corner, end - axis_corner)
}

fn far_face(axis_corner: u64, axis_extent: u64, cube_dim: u64) -> (u64, u64) {
    let far_end = axis_corner + axis_extent;
    let mut start = far_end;
    let mut extent = 0;

    if far_end % cube_dim != 0 {
        start = (far_end / cube_dim) * cube_dim;
        if start > axis_corner {
            extent = far_end - start;
        }
    }

    (start, extent)
}

/// Non-cuboid-aligned slab in the x-y plane nearest the origin (the
/// "bottom" z slab).
#[must_use]
pub fn sub_region_xy_block_near_side(corner: Corner, extent: Extent, dims: CubeDims) -> Bounds {
    let (z, z_extent) = near_face(corner.2, extent.2, u64::from(dims.z));
    Bounds {
        corner: (corner.0, corner.1, z),
        extent: (extent.0, extent.1, z_extent),
    }
}

/// Non-cuboid-aligned slab in the x-y plane farthest from the origin
/// (the "top" z slab).
#[must_use]
pub fn sub_region_xy_block_far_side(corner: Corner, extent: Extent, dims: CubeDims) -> Bounds {
    let (z, z_extent) = far_face(corner.2, extent.2, u64::from(dims.z));
    Bounds {
        corner: (corner.0, corner.1, z),
        extent: (extent.0, extent.1, z_extent),
    }
}

/// Non-cuboid-aligned slab in the x-z plane nearest the origin (cuboid
/// aligned in z already).
#[must_use]
pub fn sub_region_xz_block_near_side(corner: Corner, extent: Extent, dims: CubeDims) -> Bounds {
    let (y, y_extent) = near_face(corner.1, extent.1, u64::from(dims.y));
    Bounds {
        corner: (corner.0, y, corner.2),
        extent: (extent.0, y_extent, extent.2),
    }
}

/// Non-cuboid-aligned slab in the x-z plane farthest from the origin.
#[must_use]
pub fn sub_region_xz_block_far_side(corner: Corner, extent: Extent, dims: CubeDims) -> Bounds {
    let (y, y_extent) = far_face(corner.1, extent.1, u64::from(dims.y));
    Bounds {
        corner: (corner.0, y, corner.2),
        extent: (extent.0, y_extent, extent.2),
    }
}

/// Non-cuboid-aligned slab in the y-z plane nearest the origin (cuboid
/// aligned in y and z already).
#[must_use]
pub fn sub_region_yz_block_near_side(corner: Corner, extent: Extent, dims: CubeDims) -> Bounds {
    let (x, x_extent) = near_face(corner.0, extent.0, u64::from(dims.x));
    Bounds {
        corner: (x, corner.1, corner.2),
        extent: (x_extent, extent.1, extent.2),
    }
}

/// Non-cuboid-aligned slab in the y-z plane farthest from the origin.
#[must_use]
pub fn sub_region_yz_block_far_side(corner: Corner, extent: Extent, dims: CubeDims) -> Bounds {
    let (x, x_extent) = far_face(corner.0, extent.0, u64::from(dims.x));
    Bounds {
        corner: (x, corner.1, corner.2),
        extent: (x_extent, extent.1, extent.2),
    }
}

/// All six partial face sub-regions, in the fixed order: x-y near, x-y
/// far, x-z near, x-z far, y-z near, y-z far.
#[must_use]
pub fn all_partial_sub_regions(corner: Corner, extent: Extent, dims: CubeDims) -> [Bounds; 6] {
    [
        sub_region_xy_block_near_side(corner, extent, dims),
        sub_region_xy_block_far_side(corner, extent, dims),
        sub_region_xz_block_near_side(corner, extent, dims),
        sub_region_xz_block_far_side(corner, extent, dims),
        sub_region_yz_block_near_side(corner, extent, dims),
        sub_region_yz_block_far_side(corner, extent, dims),
    ]
}
