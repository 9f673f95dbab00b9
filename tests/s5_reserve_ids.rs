mod common;

use common::annotation_resource;
use spdb_core::Result;
use test_log::test;

/// S5: on a fresh annotation channel, `reserve_ids(10)` returns 1; a
/// subsequent `reserve_ids(5)` returns 11.
#[test]
fn s5_reserve_ids_returns_sequential_disjoint_ranges() -> Result<()> {
    let (_dir, db) = common::db();
    let resource = annotation_resource();

    let first = db.reserve_ids(&resource, 10)?;
    let second = db.reserve_ids(&resource, 5)?;

    assert_eq!(first, 1);
    assert_eq!(second, 11);
    Ok(())
}
