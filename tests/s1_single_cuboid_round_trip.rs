mod common;

use common::{image_resource, pseudo_random_bytes};
use spdb_core::cuboid::{Cuboid, CuboidData, CuboidOps};
use spdb_core::{AccessMode, Result};
use test_log::test;

#[test]
fn s1_single_cuboid_round_trip() -> Result<()> {
    let (_dir, db) = common::db();
    let resource = image_resource();

    let data = pseudo_random_bytes(16 * 512 * 512, 1);
    let cuboid = CuboidData::Uint8(Cuboid::from_data((1, 16, 512, 512), data)?);

    db.write_cuboid(&resource, (0, 0, 0), 0, &cuboid, 0, false, false)?;
    let back = db.cutout(&resource, (0, 0, 0), (512, 512, 16), 0, (0, 1), false, None, AccessMode::Cache)?;

    assert_eq!(back.to_raw_bytes(), cuboid.to_raw_bytes());
    Ok(())
}
