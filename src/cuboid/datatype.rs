// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The primitive element types a [`super::Cuboid`] can be built over, and
//! the channel-facing [`DataType`] tag used to pick one at runtime.

use byteorder::{ByteOrder, LittleEndian};

/// A channel's declared element type, as reported by
/// [`crate::resource::Resource::data_type`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 8-bit unsigned integer.
    Uint8,
    /// 16-bit unsigned integer.
    Uint16,
    /// 32-bit unsigned integer.
    Uint32,
    /// 64-bit unsigned integer; the only type annotation channels use.
    Uint64,
    /// 32-bit IEEE float.
    Float32,
}

impl DataType {
    /// Bit depth of one element, as passed to the compressor's `typesize`
    /// parameter (§6: "the element size in bits").
    #[must_use]
    pub fn bit_depth(self) -> u32 {
        match self {
            Self::Uint8 => 8,
            Self::Uint16 => 16,
            Self::Uint32 | Self::Float32 => 32,
            Self::Uint64 => 64,
        }
    }

    /// Size of one element in bytes.
    #[must_use]
    pub fn byte_width(self) -> usize {
        (self.bit_depth() / 8) as usize
    }
}

/// A single voxel's primitive type.
///
/// Implemented for `u8`, `u16`, `u32`, `u64`, `f32` — the five types the
/// specification enumerates. Every elementwise cuboid operation is generic
/// over this trait rather than over a dynamic numeric type, matching how
/// the rest of the system keeps datatype polymorphism at compile time and
/// only erases it at the [`super::CuboidData`] enum boundary.
pub trait VoxelType:
    Copy + Default + PartialEq + PartialOrd + Send + Sync + std::fmt::Debug + 'static
{
    /// The [`DataType`] tag this Rust type corresponds to.
    const DATA_TYPE: DataType;

    /// Size of one element in bytes on the wire.
    const WIDTH: usize;

    /// `true` if this is the representation of the numeric value zero.
    fn is_zero(self) -> bool {
        self == Self::default()
    }

    /// Widens to `u64`, for id-set and colormap-index computations.
    /// Saturates rather than panicking for `f32`.
    fn to_u64(self) -> u64;

    /// Narrows from `u64`, truncating as the underlying integer width would.
    fn from_u64(v: u64) -> Self;

    /// Writes this value in little-endian order.
    fn write_le(self, out: &mut [u8]);

    /// Reads one value in little-endian order.
    fn read_le(bytes: &[u8]) -> Self;
}

impl VoxelType for u8 {
    const DATA_TYPE: DataType = DataType::Uint8;
    const WIDTH: usize = 1;

    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    fn from_u64(v: u64) -> Self {
        v as Self
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl VoxelType for u16 {
    const DATA_TYPE: DataType = DataType::Uint16;
    const WIDTH: usize = 2;

    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    fn from_u64(v: u64) -> Self {
        v as Self
    }

    fn write_le(self, out: &mut [u8]) {
        LittleEndian::write_u16(out, self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        LittleEndian::read_u16(bytes)
    }
}

impl VoxelType for u32 {
    const DATA_TYPE: DataType = DataType::Uint32;
    const WIDTH: usize = 4;

    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    fn from_u64(v: u64) -> Self {
        v as Self
    }

    fn write_le(self, out: &mut [u8]) {
        LittleEndian::write_u32(out, self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        LittleEndian::read_u32(bytes)
    }
}

impl VoxelType for u64 {
    const DATA_TYPE: DataType = DataType::Uint64;
    const WIDTH: usize = 8;

    fn to_u64(self) -> u64 {
        self
    }

    fn from_u64(v: u64) -> Self {
        v
    }

    fn write_le(self, out: &mut [u8]) {
        LittleEndian::write_u64(out, self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        LittleEndian::read_u64(bytes)
    }
}

impl VoxelType for f32 {
    const DATA_TYPE: DataType = DataType::Float32;
    const WIDTH: usize = 4;

    fn to_u64(self) -> u64 {
        // Used only for colormap/id-set paths, which are annotation-only
        // (always u64 in practice). Saturating cast keeps this total.
        self.max(0.0) as u64
    }

    fn from_u64(v: u64) -> Self {
        v as Self
    }

    fn write_le(self, out: &mut [u8]) {
        LittleEndian::write_f32(out, self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        LittleEndian::read_f32(bytes)
    }
}
