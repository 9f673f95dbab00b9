mod common;

use spdb_core::config::{CubeDims, CubeDimsTable, SpatialDbConfig};
use spdb_core::cuboid::datatype::DataType;
use spdb_core::cuboid::{Cuboid, CuboidData, CuboidOps};
use spdb_core::resource::{Channel, ChannelType, Dims, Resource, StorageType};
use spdb_core::{AccessMode, Result, SpatialDb};
use test_log::test;

fn scenario_resource() -> Resource {
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
    let d = Dims { xyz: [10, 20, 16] };
    Resource::new("coll".into(), "exp".into(), "frame".into(), channel, vec![d], vec![d], vec![d], vec![d], 0)
}

fn scenario_db() -> (tempfile::TempDir, SpatialDb) {
    let dir = tempfile::tempdir().unwrap();
    let config = SpatialDbConfig::new().cube_dims_table(CubeDimsTable::uniform(CubeDims { x: 10, y: 20, z: 16 }, 1));
    let db = SpatialDb::open(dir.path(), config).unwrap();
    (dir, db)
}

/// S3: a `(1,16,20,10)` all-ones cuboid overwritten with a buffer that's
/// all zero except a single `5` at `[0,2,7,5]` (t,z,y,x). After the call,
/// every cell is 1 except that one, which is 5.
#[test]
fn s3_overwrite_single_voxel_leaves_rest_untouched() -> Result<()> {
    let (_dir, db) = scenario_db();
    let resource = scenario_resource();

    let ones = CuboidData::Uint8(Cuboid::from_data((1, 16, 20, 10), vec![1u8; 16 * 20 * 10])?);
    db.write_cuboid(&resource, (0, 0, 0), 0, &ones, 0, false, false)?;

    let mut overlay = vec![0u8; 16 * 20 * 10];
    let target_index = (2 * 20 + 7) * 10 + 5;
    overlay[target_index] = 5;
    let overlay = CuboidData::Uint8(Cuboid::from_data((1, 16, 20, 10), overlay)?);
    db.write_cuboid(&resource, (0, 0, 0), 0, &overlay, 0, false, false)?;

    let back = db.cutout(&resource, (0, 0, 0), (10, 20, 16), 0, (0, 1), false, None, AccessMode::Cache)?;
    let CuboidData::Uint8(back) = &back else { panic!("expected uint8 cuboid") };

    for (idx, &v) in back.data().iter().enumerate() {
        if idx == target_index {
            assert_eq!(v, 5);
        } else {
            assert_eq!(v, 1);
        }
    }

    Ok(())
}
