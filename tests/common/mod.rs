use spdb_core::config::{CubeDims, CubeDimsTable, SpatialDbConfig};
use spdb_core::cuboid::datatype::DataType;
use spdb_core::resource::{Channel, ChannelType, Dims, Resource, StorageType};
use spdb_core::SpatialDb;

/// A small deterministic PRNG (no external crate needed) so the
/// round-trip scenarios exercise non-trivial data without depending on
/// test order or wall-clock entropy.
#[must_use]
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) as u8
        })
        .collect()
}

fn channel(name: &str, channel_type: ChannelType, datatype: DataType) -> Channel {
    Channel {
        name: name.into(),
        channel_type,
        datatype,
        base_resolution: 0,
        sources: vec![],
        related: vec![],
        default_time_sample: 0,
        downsample_status: "NOT_DOWNSAMPLED".into(),
        storage_type: StorageType::Spdb,
        bucket: None,
        cv_path: None,
    }
}

fn resource(channel: Channel, dims: [u64; 3]) -> Resource {
    let d = Dims { xyz: dims };
    Resource::new(
        "coll".into(),
        "exp".into(),
        "frame".into(),
        channel,
        vec![d],
        vec![d],
        vec![d],
        vec![d],
        0,
    )
}

/// An 8-bit image channel at the scenario-default 512x512x16 cuboid size.
#[must_use]
pub fn image_resource() -> Resource {
    resource(channel("chan", ChannelType::Image, DataType::Uint8), [512, 512, 16])
}

/// A 64-bit annotation channel at the scenario-default 512x512x16 cuboid size.
#[must_use]
pub fn annotation_resource() -> Resource {
    resource(channel("ann", ChannelType::Annotation, DataType::Uint64), [512, 512, 16])
}

/// An 8-bit image channel sized for the small, 8x8x4-cuboid property tests.
#[must_use]
pub fn small_image_resource() -> Resource {
    resource(channel("chan", ChannelType::Image, DataType::Uint8), [8, 8, 4])
}

/// A fresh database with the scenario-default 512x512x16 cuboid table.
pub fn db() -> (tempfile::TempDir, SpatialDb) {
    let dir = tempfile::tempdir().unwrap();
    let db = SpatialDb::open(dir.path(), SpatialDbConfig::new()).unwrap();
    (dir, db)
}

/// A fresh database with a small 8x8x4 cuboid table, for property tests
/// where the full 512x512x16 scenario size is unnecessarily slow.
pub fn small_db() -> (tempfile::TempDir, SpatialDb) {
    let dir = tempfile::tempdir().unwrap();
    let config = SpatialDbConfig::new().cube_dims_table(CubeDimsTable::uniform(CubeDims { x: 8, y: 8, z: 4 }, 1));
    let db = SpatialDb::open(dir.path(), config).unwrap();
    (dir, db)
}
