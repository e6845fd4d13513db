use hzblocks_core::prelude::*;
use hzblocks_storage::prelude::*;
use utilities::data_sets::{cube_idx_file, temp_dataset};

use pretty_assertions::assert_eq;
use std::collections::HashSet;

#[test]
fn block_locations_are_unique_per_field_and_time() {
    let idxfile = IdxFile::new(
        BoxNi::new(PointNi::zero(3), PointNi::fill(3, 32)),
        vec![
            Field::new("a", DType::scalar(BaseType::F32)),
            Field::new("b", DType::new(BaseType::U8, 3)),
        ],
    )
    .with_bitsperblock(6)
    .with_blocksperfile(8)
    .with_timesteps(vec![0.0, 1.0]);
    let (_dir, dataset) = temp_dataset(idxfile);
    let access = dataset.create_access().unwrap();
    let idx = dataset.idxfile();

    for field in dataset.fields() {
        for &time in dataset.timesteps() {
            let mut seen = HashSet::new();
            for blockid in 0..idx.total_blocks() {
                let filename = access.filename(field, time, blockid);
                assert_eq!(filename, idx.filename(field, time, blockid));
                assert!(seen.insert((filename, idx.block_position_in_file(blockid))));
            }
            assert_eq!(seen.len() as u64, idx.total_blocks());
        }
    }
}

#[test]
fn layout_survives_both_formats() {
    let idxfile = cube_idx_file(PointNi::fill(3, 16), DType::new(BaseType::I16, 2), 8)
        .with_timesteps(vec![0.0, 1.0, 2.0])
        .with_missing_blocks(true);
    let (dir, dataset) = temp_dataset(idxfile);

    let json = dir.path().join("copy.json");
    dataset.idxfile().save(&json).unwrap();
    assert_eq!(&IdxFile::load(&json).unwrap(), dataset.idxfile());

    let reopened = Dataset::open(dir.path().join("dataset.idx")).unwrap();
    assert_eq!(reopened.idxfile(), dataset.idxfile());
    assert!(reopened.missing_blocks());
}
