// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A cache and storage engine for very large 3-D/4-D imaging and
//! annotation volumes.
//!
//! ##### About
//!
//! Volumes are chunked into fixed-size cuboids and addressed by a
//! Morton (Z-order) code over a resolution-aware voxel grid. A
//! three-tier pipeline sits between callers and durable storage:
//!
//! - **L1** ([`kv_cache`]) — an in-process read cache for recently
//!   accessed cuboids.
//! - **L2** ([`kv_cache`]) — a write buffer holding cuboids that have
//!   been modified but not yet paged out to durable storage.
//! - **L3** ([`object_store`]) — the durable object store, plus
//!   secondary indices ([`indices`]) mapping annotation object IDs to
//!   the Mortons of the cuboids that reference them.
//!
//! [`SpatialDb`] ties the tiers together behind two operations:
//! cutting an arbitrary axis-aligned region out of the grid
//! (resampling across resolutions as needed), and writing a region
//! back into the cuboids it overlaps.
//!
//! This crate only provides the storage engine itself. It does not
//! ship a network frontend, authentication, or a request scheduler —
//! those are expected to live in front of it.
//!
//! # Example usage
//!
//! ```
//! use spdb_core::config::{CubeDims, CubeDimsTable, SpatialDbConfig};
//! use spdb_core::cuboid::datatype::DataType;
//! use spdb_core::cuboid::{CuboidData, CuboidOps};
//! use spdb_core::resource::{Channel, ChannelType, Dims, Resource, StorageType};
//! use spdb_core::{AccessMode, SpatialDb};
//! #
//! # let dir = tempfile::tempdir()?;
//!
//! let config = SpatialDbConfig::new()
//!     .cube_dims_table(CubeDimsTable::uniform(CubeDims { x: 8, y: 8, z: 4 }, 1));
//! let db: SpatialDb = SpatialDb::open(dir.path(), config)?;
//!
//! let channel = Channel {
//!     name: "chan".into(),
//!     channel_type: ChannelType::Image,
//!     datatype: DataType::Uint8,
//!     base_resolution: 0,
//!     sources: vec![],
//!     related: vec![],
//!     default_time_sample: 0,
//!     downsample_status: "NOT_DOWNSAMPLED".into(),
//!     storage_type: StorageType::Spdb,
//!     bucket: None,
//!     cv_path: None,
//! };
//! let resource = Resource::new(
//!     "coll".into(), "exp".into(), "frame".into(), channel,
//!     vec![Dims { xyz: [512, 512, 16] }], vec![Dims { xyz: [512, 512, 16] }],
//!     vec![Dims { xyz: [512, 512, 16] }], vec![Dims { xyz: [512, 512, 16] }],
//!     0,
//! );
//!
//! let data = CuboidData::zeros((1, 4, 8, 8), DataType::Uint8);
//! db.write_cuboid(&resource, (0, 0, 0), 0, &data, 0, false, false)?;
//!
//! let cutout = db.cutout(&resource, (0, 0, 0), (8, 8, 4), 0, (0, 1), false, None, AccessMode::Cache)?;
//! assert_eq!(cutout.shape(), data.shape());
//! # Ok::<(), spdb_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod checksum;
pub mod coding;
pub mod config;
pub mod cuboid;
pub mod error;
pub mod file;
pub mod fs;
pub mod indices;
pub mod keys;
pub mod kv_cache;
pub mod morton;
pub mod object_store;
pub mod region;
pub mod resource;
pub mod spatialdb;
pub mod state;

pub use crate::cuboid::{Cuboid, CuboidData, CuboidOps};
pub use crate::error::{Error, Result};
pub use crate::fs::{FileSystem, StdFileSystem};
pub use crate::indices::{BoundingBox, BoundingBoxKind};
pub use crate::object_store::ObjectStore;
pub use crate::spatialdb::{AccessMode, SpatialDb};
