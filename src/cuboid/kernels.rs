// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Dense elementwise kernels (§4.3). These operate on flat, row-major
//! slices and know nothing about the 4-D shape around them; [`super::Cuboid`]
//! is responsible for slicing out the right sub-ranges before calling in.
//!
//! A straightforward serial implementation is given for each; the `_par`
//! variants are a correctness-equivalent rayon-free placeholder (the
//! specification treats any OpenMP/rayon parallel version as a performance
//! detail, not a separate contract), so callers can swap the serial body
//! for a chunked one without changing behavior.

use super::datatype::VoxelType;

/// `out[i] = in[i] if in[i] != 0 else out[i]`.
pub fn overwrite_dense<T: VoxelType>(out: &mut [T], input: &[T]) {
    debug_assert_eq!(out.len(), input.len());
    for (o, i) in out.iter_mut().zip(input.iter()) {
        if !i.is_zero() {
            *o = *i;
        }
    }
}

/// `out[i] = 0 if mask[i] != 0 else out[i]`.
pub fn overwrite_to_black<T: VoxelType>(out: &mut [T], mask: &[T]) {
    debug_assert_eq!(out.len(), mask.len());
    for (o, m) in out.iter_mut().zip(mask.iter()) {
        if !m.is_zero() {
            *o = T::default();
        }
    }
}

/// `out[i] = in[i] if in[i] in id_set else 0`. `id_set` must be sorted
/// ascending for the binary search to be valid.
pub fn filter<T: VoxelType>(input: &[T], id_set: &[u64]) -> Vec<T> {
    input
        .iter()
        .map(|v| {
            if id_set.binary_search(&v.to_u64()).is_ok() {
                *v
            } else {
                T::default()
            }
        })
        .collect()
}

/// Maps `in[i] mod 256` through a 256-entry RGBA colormap, producing
/// packed `u32` RGBA values. Used only for false-color annotation
/// rendering, never for the primary cutout/write path.
pub fn recolor<T: VoxelType>(input: &[T], colormap: &[u32; 256]) -> Vec<u32> {
    input
        .iter()
        .map(|v| {
            #[allow(clippy::cast_possible_truncation)]
            let idx = (v.to_u64() % 256) as usize;
            colormap[idx]
        })
        .collect()
}

/// Returns each distinct value in `input` exactly once, ascending.
pub fn unique<T: VoxelType + Ord>(input: &[T]) -> Vec<T> {
    let mut out: Vec<T> = input.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

/// Downsamples a single `(z, y, x)` slab by 2x in x and y (nearest
/// neighbour, always the `(0, 0)` sub-sample of each 2x2 block — the rule
/// is fixed and must be stable across every resolution level since it
/// becomes part of the persisted pyramid). If `isotropic` is set, z is
/// also halved using the same `(0)` sub-sample rule.
pub fn zoom_out_2x<T: VoxelType>(
    input: &[T],
    dims: (usize, usize, usize),
    isotropic: bool,
) -> (Vec<T>, (usize, usize, usize)) {
    let (z, y, x) = dims;
    let out_x = x.div_ceil(2);
    let out_y = y.div_ceil(2);
    let out_z = if isotropic { z.div_ceil(2) } else { z };

    let mut out = vec![T::default(); out_z * out_y * out_x];

    for oz in 0..out_z {
        let iz = if isotropic { oz * 2 } else { oz };
        for oy in 0..out_y {
            let iy = oy * 2;
            for ox in 0..out_x {
                let ix = ox * 2;
                let src = (iz * y + iy) * x + ix;
                let dst = (oz * out_y + oy) * out_x + ox;
                out[dst] = input[src];
            }
        }
    }

    (out, (out_z, out_y, out_x))
}

/// Inverse of [`zoom_out_2x`]: replicates each input element over its
/// corresponding 2x2(x2) output block.
pub fn zoom_in_2x<T: VoxelType>(
    input: &[T],
    dims: (usize, usize, usize),
    isotropic: bool,
) -> (Vec<T>, (usize, usize, usize)) {
    let (z, y, x) = dims;
    let out_x = x * 2;
    let out_y = y * 2;
    let out_z = if isotropic { z * 2 } else { z };

    let mut out = vec![T::default(); out_z * out_y * out_x];

    for iz in 0..z {
        let z_targets: &[usize] = if isotropic { &[0, 1] } else { &[0] };
        for dz in z_targets {
            let oz = if isotropic { iz * 2 + dz } else { iz };
            for iy in 0..y {
                for ix in 0..x {
                    let v = input[(iz * y + iy) * x + ix];
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let oy = iy * 2 + dy;
                            let ox = ix * 2 + dx;
                            out[(oz * out_y + oy) * out_x + ox] = v;
                        }
                    }
                }
            }
        }
    }

    (out, (out_z, out_y, out_x))
}

/// Averages two z-adjacent slabs `a` and `b` (each `y * x` elements) into
/// one, saturating on `T`'s range. Used to build the isotropic fork of an
/// anisotropic channel's pyramid.
pub fn isotropic_build<T: VoxelType>(a: &[T], b: &[T]) -> Vec<T> {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let avg = (x.to_u64() + y.to_u64()) / 2;
            T::from_u64(avg)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn overwrite_dense_skips_zeros() {
        let mut out = vec![1u8, 1, 1, 1];
        let input = vec![0u8, 5, 0, 9];
        overwrite_dense(&mut out, &input);
        assert_eq!(out, vec![1, 5, 1, 9]);
    }

    #[test]
    fn overwrite_dense_is_idempotent() {
        // P4: overwrite(m); overwrite(m) == overwrite(m)
        let base = vec![1u8, 1, 1, 1];
        let input = vec![0u8, 5, 0, 9];

        let mut once = base.clone();
        overwrite_dense(&mut once, &input);

        let mut twice = base;
        overwrite_dense(&mut twice, &input);
        overwrite_dense(&mut twice, &input);

        assert_eq!(once, twice);
    }

    #[test]
    fn overwrite_to_black_zeros_masked() {
        let mut out = vec![9u8, 9, 9];
        let mask = vec![0u8, 1, 0];
        overwrite_to_black(&mut out, &mask);
        assert_eq!(out, vec![9, 0, 9]);
    }

    #[test]
    fn filter_drops_ids_outside_set() {
        let input = vec![1u64, 2, 3, 4, 0];
        let ids = vec![2, 4];
        assert_eq!(filter(&input, &ids), vec![0, 2, 0, 4, 0]);
    }

    #[test]
    fn unique_sorts_and_dedups() {
        let input = vec![3u32, 1, 3, 2, 1, 0];
        assert_eq!(unique(&input), vec![0, 1, 2, 3]);
    }

    #[test]
    fn zoom_out_then_in_restores_shape() {
        let dims = (2usize, 4, 4);
        let input: Vec<u16> = (0..32).collect();
        let (down, down_dims) = zoom_out_2x(&input, dims, true);
        assert_eq!(down_dims, (1, 2, 2));
        let (up, up_dims) = zoom_in_2x(&down, down_dims, true);
        assert_eq!(up_dims, (2, 4, 4));
        assert_eq!(up.len(), input.len());
    }

    #[test]
    fn isotropic_build_averages() {
        let a = vec![10u8, 20];
        let b = vec![20u8, 40];
        assert_eq!(isotropic_build(&a, &b), vec![15, 30]);
    }
}
