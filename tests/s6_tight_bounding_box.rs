mod common;

use common::annotation_resource;
use spdb_core::cuboid::{Cuboid, CuboidData};
use spdb_core::indices::BoundingBoxKind;
use spdb_core::Result;
use test_log::test;

/// S6: write u64 annotation id 33333 at four voxels in one cuboid at
/// grid `(10,15,2)`; `get_tight_bounding_box(33333)` narrows to exactly
/// the voxels touched.
#[test]
fn s6_tight_bounding_box_single_cuboid() -> Result<()> {
    let (_dir, db) = common::db();
    let resource = annotation_resource();

    let pos = (10u64 * 512, 15u64 * 512, 2u64 * 16);
    let id = 33_333u64;

    let mut data = vec![0u64; 16 * 512 * 512];
    let voxel_index = |z: usize, y: usize, x: usize| (z * 512 + y) * 512 + x;
    for &(z, y, x) in &[(14usize, 500usize, 104usize), (15, 501, 105), (15, 502, 104), (14, 503, 105)] {
        data[voxel_index(z, y, x)] = id;
    }
    let cuboid = CuboidData::Uint64(Cuboid::from_data((1, 16, 512, 512), data)?);
    db.write_cuboid(&resource, pos, 0, &cuboid, 0, false, false)?;

    let bbox = db.bounding_box(&resource, 0, id, BoundingBoxKind::Tight)?.expect("id should be indexed");

    assert_eq!(bbox.x, (pos.0 + 104)..(pos.0 + 106));
    assert_eq!(bbox.y, (pos.1 + 500)..(pos.1 + 504));
    assert_eq!(bbox.z, (pos.2 + 14)..(pos.2 + 16));
    assert_eq!(bbox.t, 0..1);

    Ok(())
}
