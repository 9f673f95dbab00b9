// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The in-memory 4-D `(t, z, y, x)` dense block of voxel data that moves
//! through every layer of the cache/storage pipeline (§4.2).

pub mod codec;
pub mod datatype;
pub mod kernels;

use crate::error::{Error, Result};
use datatype::{DataType, VoxelType};
use enum_dispatch::enum_dispatch;

/// Shape of a cuboid's data matrix, always `(t, z, y, x)`.
pub type Shape = (usize, usize, usize, usize);

/// A dense, datatype-polymorphic `(t, z, y, x)` block of voxel data.
///
/// Every element-touching operation is generic over [`VoxelType`]; a
/// caller holding an untyped [`CuboidData`] downcasts via
/// [`CuboidData::as_typed`]/[`CuboidData::into_typed`] once it knows the
/// channel's [`DataType`].
#[derive(Clone, Debug)]
pub struct Cuboid<T: VoxelType> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: VoxelType> Cuboid<T> {
    /// Builds a cuboid of all-zero voxels with the given `(t, z, y, x)` shape.
    #[must_use]
    pub fn zeros(shape: Shape) -> Self {
        let (t, z, y, x) = shape;
        Self {
            shape,
            data: vec![T::default(); t * z * y * x],
        }
    }

    /// Wraps pre-built row-major data. `data.len()` must equal the product
    /// of `shape`'s four dimensions.
    pub fn from_data(shape: Shape, data: Vec<T>) -> Result<Self> {
        let (t, z, y, x) = shape;
        if data.len() != t * z * y * x {
            return Err(Error::Spdb(format!(
                "cuboid shape {shape:?} does not match data length {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// The `(t, z, y, x)` shape of this cuboid.
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Row-major `(t, z, y, x)` voxel data.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// `true` if every voxel is zero (P3: a cuboid "from zeros" stays
    /// all-zero until the first non-trivial write).
    #[must_use]
    pub fn is_zeros(&self) -> bool {
        self.data.iter().all(|v| v.is_zero())
    }

    fn index_of(&self, t: usize, z: usize, y: usize, x: usize) -> usize {
        let (_, zd, yd, xd) = self.shape;
        ((t * zd + z) * yd + y) * xd + x
    }

    /// Copies `input`'s data into `self` at the grid-relative offset given
    /// by `index` (an `(x, y, z)` multiple of `input`'s shape), covering
    /// every time sample present in both cuboids (§4.2 `add_data`).
    pub fn add_data(&mut self, input: &Self, index: (usize, usize, usize)) -> Result<()> {
        self.add_data_at_time(input, index, 0)
    }

    /// As [`Self::add_data`], but places `input`'s time samples starting at
    /// `t_offset` in `self` instead of at the same index — used when
    /// assembling a cutout spanning more than one time sample, where each
    /// decoded cuboid is a single-time-sample block destined for a
    /// specific slot in the output.
    pub fn add_data_at_time(&mut self, input: &Self, index: (usize, usize, usize), t_offset: usize) -> Result<()> {
        if input.shape.1 == 0 || input.shape.2 == 0 || input.shape.3 == 0 {
            return Ok(());
        }

        let (ix, iy, iz) = index;
        let (it, izd, iyd, ixd) = input.shape;
        let (st, szd, syd, sxd) = self.shape;

        let x_off = ix * ixd;
        let y_off = iy * iyd;
        let z_off = iz * izd;

        if x_off + ixd > sxd || y_off + iyd > syd || z_off + izd > szd || t_offset + it > st {
            return Err(Error::Spdb(format!(
                "add_data: input shape {:?} at index {index:?}, t_offset {t_offset} does not fit in target shape {:?}",
                input.shape, self.shape
            )));
        }

        for t in 0..it {
            for z in 0..izd {
                for y in 0..iyd {
                    for x in 0..ixd {
                        let dst = self.index_of(t_offset + t, z_off + z, y_off + y, x_off + x);
                        let src = input.index_of(t, z, y, x);
                        self.data[dst] = input.data[src];
                    }
                }
            }
        }

        Ok(())
    }

    /// Overwrites every non-zero voxel of `input` into `self` (§4.2
    /// `overwrite`). `self` and `input` must share a shape. Idempotent
    /// (P4).
    pub fn overwrite(&mut self, input: &Self) -> Result<()> {
        if self.shape != input.shape {
            return Err(Error::Spdb(format!(
                "overwrite: shape mismatch {:?} vs {:?}",
                self.shape, input.shape
            )));
        }
        kernels::overwrite_dense(&mut self.data, &input.data);
        Ok(())
    }

    /// Zeroes every voxel of `self` where the matching voxel of `mask` is
    /// non-zero (§4.2 `overwrite_to_black`).
    pub fn overwrite_to_black(&mut self, mask: &Self) -> Result<()> {
        if self.shape != mask.shape {
            return Err(Error::Spdb(format!(
                "overwrite_to_black: shape mismatch {:?} vs {:?}",
                self.shape, mask.shape
            )));
        }
        kernels::overwrite_to_black(&mut self.data, &mask.data);
        Ok(())
    }

    /// Trims to the given `(z, y, x)` sub-box, applied identically across
    /// every time sample. Non-aliasing: returns a freshly owned cuboid.
    #[must_use]
    pub fn trim(&self, z_offset: usize, z_size: usize, y_offset: usize, y_size: usize, x_offset: usize, x_size: usize) -> Self {
        let (t, _, _, _) = self.shape;
        let mut out = Self::zeros((t, z_size, y_size, x_size));

        for ti in 0..t {
            for z in 0..z_size {
                for y in 0..y_size {
                    for x in 0..x_size {
                        let src = self.index_of(ti, z_offset + z, y_offset + y, x_offset + x);
                        let dst = out.index_of(ti, z, y, x);
                        out.data[dst] = self.data[src];
                    }
                }
            }
        }

        out
    }

    /// Serializes the raw little-endian element bytes (no compression
    /// envelope — see [`codec::to_blosc`] for the wire format).
    #[must_use]
    pub fn to_raw_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.data.len() * T::WIDTH];
        for (i, v) in self.data.iter().enumerate() {
            v.write_le(&mut out[i * T::WIDTH..(i + 1) * T::WIDTH]);
        }
        out
    }

    /// Inverse of [`Self::to_raw_bytes`].
    pub fn from_raw_bytes(shape: Shape, bytes: &[u8]) -> Result<Self> {
        let (t, z, y, x) = shape;
        let count = t * z * y * x;
        if bytes.len() != count * T::WIDTH {
            return Err(Error::Serialization(crate::error::SerializationError::Decode(
                crate::coding::DecodeError::InvalidHeader("Cuboid raw payload length mismatch"),
            )));
        }

        let mut data = Vec::with_capacity(count);
        for i in 0..count {
            data.push(T::read_le(&bytes[i * T::WIDTH..(i + 1) * T::WIDTH]));
        }

        Ok(Self { shape, data })
    }
}

/// Operations common to every concrete [`Cuboid<T>`], exposed on the
/// type-erased [`CuboidData`] enum via `enum_dispatch`.
#[enum_dispatch]
pub trait CuboidOps {
    /// The `(t, z, y, x)` shape of this cuboid.
    fn shape(&self) -> Shape;

    /// The runtime [`DataType`] tag backing this cuboid.
    fn data_type(&self) -> DataType;

    /// `true` if every voxel is zero.
    fn is_zeros(&self) -> bool;

    /// Raw little-endian element bytes.
    fn to_raw_bytes(&self) -> Vec<u8>;
}

impl<T: VoxelType> CuboidOps for Cuboid<T> {
    fn shape(&self) -> Shape {
        self.shape
    }

    fn data_type(&self) -> DataType {
        T::DATA_TYPE
    }

    fn is_zeros(&self) -> bool {
        Cuboid::is_zeros(self)
    }

    fn to_raw_bytes(&self) -> Vec<u8> {
        Cuboid::to_raw_bytes(self)
    }
}

/// A runtime-datatype-erased cuboid, used wherever a caller only knows a
/// channel's [`DataType`] at runtime (cache/store boundaries). Construct
/// with [`CuboidData::zeros`] and recover the concrete type with
/// [`CuboidData::as_typed`]/[`CuboidData::into_typed`].
#[enum_dispatch(CuboidOps)]
#[derive(Clone, Debug)]
pub enum CuboidData {
    /// Backed by `u8` voxels.
    Uint8(Cuboid<u8>),
    /// Backed by `u16` voxels.
    Uint16(Cuboid<u16>),
    /// Backed by `u32` voxels.
    Uint32(Cuboid<u32>),
    /// Backed by `u64` voxels.
    Uint64(Cuboid<u64>),
    /// Backed by `f32` voxels.
    Float32(Cuboid<f32>),
}

impl CuboidData {
    /// Builds an all-zero cuboid of the given shape and datatype.
    #[must_use]
    pub fn zeros(shape: Shape, data_type: DataType) -> Self {
        match data_type {
            DataType::Uint8 => Self::Uint8(Cuboid::zeros(shape)),
            DataType::Uint16 => Self::Uint16(Cuboid::zeros(shape)),
            DataType::Uint32 => Self::Uint32(Cuboid::zeros(shape)),
            DataType::Uint64 => Self::Uint64(Cuboid::zeros(shape)),
            DataType::Float32 => Self::Float32(Cuboid::zeros(shape)),
        }
    }

    /// Deserializes raw little-endian element bytes for the given shape
    /// and datatype.
    pub fn from_raw_bytes(shape: Shape, data_type: DataType, bytes: &[u8]) -> Result<Self> {
        Ok(match data_type {
            DataType::Uint8 => Self::Uint8(Cuboid::from_raw_bytes(shape, bytes)?),
            DataType::Uint16 => Self::Uint16(Cuboid::from_raw_bytes(shape, bytes)?),
            DataType::Uint32 => Self::Uint32(Cuboid::from_raw_bytes(shape, bytes)?),
            DataType::Uint64 => Self::Uint64(Cuboid::from_raw_bytes(shape, bytes)?),
            DataType::Float32 => Self::Float32(Cuboid::from_raw_bytes(shape, bytes)?),
        })
    }

    /// Borrows the concrete `u64`-backed cuboid, if that's what this
    /// value holds. Annotation channels are always `u64` (§3).
    #[must_use]
    pub fn as_annotation(&self) -> Option<&Cuboid<u64>> {
        match self {
            Self::Uint64(c) => Some(c),
            _ => None,
        }
    }

    /// Mutably borrows the concrete `u64`-backed cuboid, if that's what
    /// this value holds.
    pub fn as_annotation_mut(&mut self) -> Option<&mut Cuboid<u64>> {
        match self {
            Self::Uint64(c) => Some(c),
            _ => None,
        }
    }
}

/// An annotation (id-label) cuboid, always backed by `u64` voxels. Wraps
/// [`Cuboid<u64>`] with a memoized [`Self::ids`] — annotation id-sets are
/// recomputed often (bounding-box refinement, `ids_in_region`) and the
/// underlying data never changes shape once built, so caching pays off.
#[derive(Clone, Debug)]
pub struct AnnotationCuboid {
    cuboid: Cuboid<u64>,
    ids: std::sync::OnceLock<Vec<u64>>,
}

impl AnnotationCuboid {
    /// Wraps an existing annotation cuboid.
    #[must_use]
    pub fn new(cuboid: Cuboid<u64>) -> Self {
        Self {
            cuboid,
            ids: std::sync::OnceLock::new(),
        }
    }

    /// The wrapped cuboid.
    #[must_use]
    pub fn cuboid(&self) -> &Cuboid<u64> {
        &self.cuboid
    }

    /// The distinct, ascending, non-zero annotation ids present in this
    /// cuboid, computed once and cached for the lifetime of the value.
    #[must_use]
    pub fn ids(&self) -> &[u64] {
        self.ids.get_or_init(|| {
            let mut ids = kernels::unique(self.cuboid.data());
            ids.retain(|id| *id != 0);
            ids
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn zeros_cuboid_is_zeros() {
        let c = Cuboid::<u8>::zeros((1, 4, 4, 4));
        assert!(c.is_zeros());
    }

    #[test]
    fn add_data_places_subcube() {
        let mut big = Cuboid::<u8>::zeros((1, 4, 4, 4));
        let small = Cuboid::from_data((1, 2, 2, 2), vec![9; 8]).unwrap();
        big.add_data(&small, (1, 1, 1)).unwrap();
        assert_eq!(big.data()[big.index_of(0, 2, 2, 2)], 9);
        assert_eq!(big.data()[big.index_of(0, 0, 0, 0)], 0);
    }

    #[test]
    fn overwrite_requires_matching_shape() {
        let mut a = Cuboid::<u8>::zeros((1, 2, 2, 2));
        let b = Cuboid::<u8>::zeros((1, 2, 2, 4));
        assert!(a.overwrite(&b).is_err());
    }

    #[test]
    fn trim_is_non_aliasing() {
        let c = Cuboid::from_data((1, 2, 2, 2), vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let trimmed = c.trim(0, 1, 0, 1, 0, 1);
        assert_eq!(trimmed.shape(), (1, 1, 1, 1));
        assert_eq!(trimmed.data(), &[1]);
    }

    #[test]
    fn raw_bytes_roundtrip() {
        let c = Cuboid::from_data((1, 1, 1, 2), vec![300u16, 65535]).unwrap();
        let bytes = c.to_raw_bytes();
        let back = Cuboid::<u16>::from_raw_bytes((1, 1, 1, 2), &bytes).unwrap();
        assert_eq!(back.data(), c.data());
    }

    #[test]
    fn cuboid_data_dispatches_shape_and_type() {
        let data = CuboidData::zeros((1, 2, 2, 2), DataType::Uint32);
        assert_eq!(CuboidOps::shape(&data), (1, 2, 2, 2));
        assert_eq!(data.data_type(), DataType::Uint32);
    }

    #[test]
    fn overwrite_single_voxel_leaves_rest_untouched() {
        // S3: a (1,16,20,10) all-ones cuboid overwritten with a buffer
        // that's all zero except a single 5 at (z=2, y=7, x=5).
        let mut cuboid = Cuboid::from_data((1, 16, 20, 10), vec![1u8; 16 * 20 * 10]).unwrap();
        let mut input = vec![0u8; 16 * 20 * 10];
        let target = cuboid.index_of(0, 2, 7, 5);
        input[target] = 5;
        let input = Cuboid::from_data((1, 16, 20, 10), input).unwrap();

        cuboid.overwrite(&input).unwrap();

        for (idx, &v) in cuboid.data().iter().enumerate() {
            if idx == target {
                assert_eq!(v, 5);
            } else {
                assert_eq!(v, 1);
            }
        }
    }

    #[test]
    fn annotation_cuboid_memoizes_ids() {
        let c = Cuboid::from_data((1, 1, 1, 4), vec![0u64, 5, 5, 2]).unwrap();
        let anno = AnnotationCuboid::new(c);
        assert_eq!(anno.ids(), &[2, 5]);
        // Second call hits the memo; same result.
        assert_eq!(anno.ids(), &[2, 5]);
    }
}
