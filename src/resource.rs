// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Read-only channel/resource metadata consumed from the rest of the
//! system (§6). The core never constructs a [`Resource`] from scratch in
//! production — it is handed one by the caller — but needs a concrete,
//! serializable shape to test against.

use crate::cuboid::datatype::DataType;
use serde::{Deserialize, Serialize};

/// Whether a channel holds image intensities or annotation (id-label)
/// data.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Image intensity data.
    Image,
    /// Annotation (id-label) data, always `u64`.
    Annotation,
}

/// Where a channel's cuboids physically live.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// This crate's own cache/object-store pipeline.
    Spdb,
    /// An external CloudVolume-backed dataset (read-through only).
    Cloudvol,
}

/// A channel's static descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name.
    pub name: String,
    /// Image vs. annotation.
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Element type.
    pub datatype: DataType,
    /// The only resolution writes may target.
    pub base_resolution: u32,
    /// Channels this one was derived from (annotation "sources").
    pub sources: Vec<String>,
    /// Channels derived from this one.
    pub related: Vec<String>,
    /// Default time sample index for requests that omit one.
    pub default_time_sample: u32,
    /// Whether the downsample pyramid has finished building.
    pub downsample_status: String,
    /// Where this channel's cuboids live.
    pub storage_type: StorageType,
    /// Bucket name, when `storage_type` is [`StorageType::Cloudvol`].
    pub bucket: Option<String>,
    /// CloudVolume path, when `storage_type` is [`StorageType::Cloudvol`].
    pub cv_path: Option<String>,
}

/// Per-resolution voxel and extent dimensions, as reported by
/// [`Resource::downsampled_voxel_dims`]/[`Resource::downsampled_extent_dims`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Dims {
    /// X, Y, Z in that order, matching the resource's native convention.
    pub xyz: [u64; 3],
}

/// Read-only resource/channel metadata (§6). Round-trips through JSON
/// with the five top-level keys `collection, experiment, coord_frame,
/// channel, boss_key, lookup_key`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    collection: String,
    experiment: String,
    coord_frame: String,
    channel: Channel,
    boss_key: String,
    lookup_key: String,

    #[serde(skip)]
    voxel_dims: Vec<Dims>,
    #[serde(skip)]
    extent_dims: Vec<Dims>,
    #[serde(skip)]
    iso_voxel_dims: Vec<Dims>,
    #[serde(skip)]
    iso_extent_dims: Vec<Dims>,
    #[serde(skip)]
    isotropic_level: i32,
}

impl Resource {
    /// Builds a resource descriptor. `voxel_dims`/`extent_dims` are
    /// per-resolution (index 0 = base resolution); their isotropic
    /// variants reuse the same vectors above `isotropic_level`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collection: String,
        experiment: String,
        coord_frame: String,
        channel: Channel,
        voxel_dims: Vec<Dims>,
        extent_dims: Vec<Dims>,
        iso_voxel_dims: Vec<Dims>,
        iso_extent_dims: Vec<Dims>,
        isotropic_level: i32,
    ) -> Self {
        let boss_key = format!("{collection}&{experiment}&{}", channel.name);
        let lookup_key = format!("{collection}&{experiment}&{}", channel.name);
        Self {
            collection,
            experiment,
            coord_frame,
            channel,
            boss_key,
            lookup_key,
            voxel_dims,
            extent_dims,
            iso_voxel_dims,
            iso_extent_dims,
            isotropic_level,
        }
    }

    /// `"C&E&N"`.
    #[must_use]
    pub fn lookup_key(&self) -> &str {
        &self.lookup_key
    }

    /// The boss-internal identifier, also `"C&E&N"` in this implementation.
    #[must_use]
    pub fn boss_key(&self) -> &str {
        &self.boss_key
    }

    /// The channel name.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel.name
    }

    /// The coordinate frame name.
    #[must_use]
    pub fn coord_frame(&self) -> &str {
        &self.coord_frame
    }

    /// The experiment name.
    #[must_use]
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// The collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The channel descriptor.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The channel's element type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.channel.datatype
    }

    /// Bits per element: 8/16/32/64.
    #[must_use]
    pub fn bit_depth(&self) -> u32 {
        self.channel.datatype.bit_depth()
    }

    /// `true` if a downsample pyramid exists for this channel.
    #[must_use]
    pub fn is_downsampled(&self) -> bool {
        self.channel.downsample_status == "DOWNSAMPLED"
    }

    /// The resolution level at which the isotropic fork begins (below it,
    /// the anisotropic and isotropic pyramids are identical).
    #[must_use]
    pub fn isotropic_level(&self) -> i32 {
        self.isotropic_level
    }

    /// Voxel dimensions `[x, y, z]` at `resolution`, optionally the
    /// isotropic fork.
    #[must_use]
    pub fn downsampled_voxel_dims(&self, resolution: usize, iso: bool) -> Option<Dims> {
        let dims = if iso { &self.iso_voxel_dims } else { &self.voxel_dims };
        dims.get(resolution).copied()
    }

    /// Extent (total volume size) `[x, y, z]` at `resolution`, optionally
    /// the isotropic fork.
    #[must_use]
    pub fn downsampled_extent_dims(&self, resolution: usize, iso: bool) -> Option<Dims> {
        let dims = if iso { &self.iso_extent_dims } else { &self.extent_dims };
        dims.get(resolution).copied()
    }
}
