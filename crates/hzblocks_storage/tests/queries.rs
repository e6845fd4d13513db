use hzblocks_core::prelude::*;
use hzblocks_storage::prelude::*;
use hzblocks_storage::{Aborted, BlockCompression, ABORTED_MESSAGE, COMPRESSED_SUFFIX};
use utilities::counting_access::CountingAccess;
use utilities::data_sets::{cube_idx_file, ramp_array, temp_dataset};
use utilities::test::init_tracing;

use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::atomic::Ordering;

// 16^3 with the guessed V bitmask: 12 levels in 64 blocks of 64 samples, 16 blocks per file.
fn cube_dataset() -> (tempfile::TempDir, Dataset) {
    let idxfile = cube_idx_file(PointNi::fill(3, 16), DType::scalar(BaseType::U32), 6)
        .with_blocksperfile(16);

    temp_dataset(idxfile)
}

fn write_ramp(dataset: &Dataset) {
    let mut access = dataset
        .create_access_with(&AccessConfig::read_write())
        .unwrap();
    let field = dataset.default_field().clone();
    let full = *dataset.logic_box();
    dataset
        .write(&mut access, &field, 0.0, full, ramp_array(full.shape(), field.dtype))
        .unwrap();
}

#[test]
fn write_once_then_read_z_slices() {
    init_tracing();
    let (_dir, dataset) = cube_dataset();
    assert_eq!(dataset.max_resolution(), 12);
    write_ramp(&dataset);

    let mut access = dataset.create_access().unwrap();
    let field = dataset.default_field().clone();
    for z in 0..16 {
        let slice = BoxNi::new(PointNi::from_slice(&[0, 0, z]), PointNi::from_slice(&[16, 16, z + 1]));
        let buffer = dataset.read(&mut access, &field, 0.0, slice, 12).unwrap();

        assert_eq!(buffer.dims(), PointNi::from_slice(&[16, 16, 1]));
        let expected: Vec<u32> = (0..256).map(|i| i + z as u32 * 256).collect();
        assert_eq!(buffer.as_slice::<u32>(), expected.as_slice());
    }
    assert_eq!(access.info().statistics.rfail(), 0);
}

#[test]
fn progressive_read_ends_with_the_direct_read() {
    let (_dir, dataset) = cube_dataset();
    write_ramp(&dataset);
    let mut access = dataset.create_access().unwrap();

    let mut query = dataset.create_query(IoMode::Read).resolution_range(8, 12);
    assert!(dataset.begin(&mut query));

    assert!(dataset.execute(&mut access, &mut query));
    assert_eq!(query.current_resolution(), 8);
    assert_eq!(query.buffer.dims(), PointNi::from_slice(&[8, 8, 4]));
    assert!(dataset.next(&mut query));

    assert!(dataset.execute(&mut access, &mut query));
    assert_eq!(query.current_resolution(), 12);
    assert!(!dataset.next(&mut query));
    assert!(query.ok());

    let field = dataset.default_field().clone();
    let direct = dataset
        .read(&mut access, &field, 0.0, *dataset.logic_box(), 12)
        .unwrap();
    assert_eq!(query.buffer, direct);
}

#[test]
fn abort_stops_dispatching_blocks() {
    let (_dir, dataset) = cube_dataset();
    write_ramp(&dataset);

    let aborted = Aborted::new();
    let mut access =
        CountingAccess::new(dataset.create_access().unwrap()).abort_after(3, aborted.clone());
    let reads = access.reads();

    let mut query = dataset.create_query(IoMode::Read).aborted(aborted);
    assert!(dataset.begin(&mut query));
    assert!(!dataset.execute(&mut access, &mut query));

    assert!(query.failed());
    assert!(query.was_aborted());
    assert_eq!(query.error_message(), ABORTED_MESSAGE);
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    assert!(!dataset.execute(&mut access, &mut query));
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

#[test]
fn filtered_read_reconstructs_the_written_samples() {
    init_tracing();
    let idxfile = IdxFile::new(
        BoxNi::new(PointNi::zero(2), PointNi::fill(2, 8)),
        vec![Field::new("data", DType::scalar(BaseType::F64)).with_filter("wavelet")],
    )
    .with_bitsperblock(2);
    let (_dir, dataset) = temp_dataset(idxfile);
    let mut access = dataset
        .create_access_with(&AccessConfig::read_write())
        .unwrap();
    let field = dataset.default_field().clone();
    let full = *dataset.logic_box();
    let written = ramp_array(full.shape(), field.dtype);
    dataset
        .write(&mut access, &field, 0.0, full, written.clone())
        .unwrap();

    dataset
        .compute_filter(&mut access, &field, 0.0, PointNi::fill(2, 8))
        .unwrap();

    // Stored samples are now coarse averages and details.
    let stored = dataset.read(&mut access, &field, 0.0, full, 6).unwrap();
    assert_ne!(stored, written);
    assert_eq!(stored.as_slice::<f64>()[0], 31.5);

    let mut coarse = dataset
        .create_query(IoMode::Read)
        .end_resolutions(vec![0])
        .enable_filters();
    assert!(dataset.begin(&mut coarse));
    assert!(dataset.execute(&mut access, &mut coarse));
    assert_eq!(coarse.buffer.as_slice::<f64>(), &[31.5]);

    let mut fine = dataset.create_query(IoMode::Read).enable_filters();
    assert!(dataset.begin(&mut fine));
    assert!(dataset.execute(&mut access, &mut fine), "{}", fine.error_message());
    assert_eq!(fine.buffer, written);
}

#[test]
fn point_reads_match_the_box_read() {
    let (_dir, dataset) = cube_dataset();
    write_ramp(&dataset);
    let mut access = dataset.create_access().unwrap();
    let field = dataset.default_field().clone();

    let points = vec![
        PointNi::from_slice(&[0, 0, 0]),
        PointNi::from_slice(&[15, 15, 15]),
        PointNi::from_slice(&[3, 7, 11]),
        PointNi::from_slice(&[16, 3, 3]),
    ];
    let values = dataset.read_points(&mut access, &field, 0.0, points, 12).unwrap();

    assert_eq!(values.dims(), PointNi::from_slice(&[4]));
    assert_eq!(values.as_slice::<u32>(), &[0, 4095, 3 + 7 * 16 + 11 * 256, 0]);
}

#[test]
fn coarse_point_reads_land_on_coarse_samples() {
    let (_dir, dataset) = cube_dataset();
    write_ramp(&dataset);
    let mut access = dataset.create_access().unwrap();
    let field = dataset.default_field().clone();

    let coarse = dataset
        .read(&mut access, &field, 0.0, *dataset.logic_box(), 6)
        .unwrap();
    let grid = PointQuery::grid_points(dataset.logic_box(), PointNi::fill(3, 3));
    let mut query = dataset.create_point_query(grid).end_resolutions(vec![6, 12]);
    assert!(dataset.begin_point_query(&mut query));

    assert!(dataset.execute_point_query(&mut access, &mut query));
    assert_eq!(query.current_resolution(), 6);
    for v in query.buffer.as_slice::<u32>() {
        assert!(coarse.as_slice::<u32>().contains(v), "{} is not a level 6 sample", v);
    }

    assert!(dataset.next_point_query(&mut query));
    assert!(dataset.execute_point_query(&mut access, &mut query));
    assert!(!dataset.next_point_query(&mut query));
    assert!(query.ok());
    for (v, p) in query.buffer.as_slice::<u32>().iter().zip(&query.points) {
        assert_eq!(*v as i64, p[0] + p[1] * 16 + p[2] * 256);
    }
}

#[test]
fn copy_into_a_dataset_with_another_layout() {
    let (_src_dir, src) = cube_dataset();
    write_ramp(&src);
    let (_dst_dir, dst) = temp_dataset(cube_idx_file(
        PointNi::fill(3, 16),
        DType::scalar(BaseType::U32),
        4,
    ));

    let mut src_access = src.create_access().unwrap();
    let mut dst_access = dst
        .create_access_with(&AccessConfig::read_write())
        .unwrap();
    let src_field = src.default_field().clone();
    let dst_field = dst.default_field().clone();
    dst.copy_dataset(&mut dst_access, &dst_field, 0.0, &src, &mut src_access, &src_field, 0.0)
        .unwrap();

    let full = *dst.logic_box();
    let copied = dst.read(&mut dst_access, &dst_field, 0.0, full, 12).unwrap();
    assert_eq!(copied, ramp_array(full.shape(), dst_field.dtype));

    let other = Field::new("data", DType::scalar(BaseType::F32));
    assert!(matches!(
        dst.copy_dataset(&mut dst_access, &other, 0.0, &src, &mut src_access, &src_field, 0.0),
        Err(IdxError::Config(_))
    ));
}

fn files_under(dir: &Path) -> Vec<(String, u64)> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push((path.display().to_string(), entry.metadata().unwrap().len()));
        }
    }
    files
}

#[test]
fn recompressing_drops_rewritten_blocks() {
    let (dir, mut dataset) = cube_dataset();
    write_ramp(&dataset);
    write_ramp(&dataset);
    let block_bytes = |dir: &Path| -> u64 {
        files_under(dir)
            .iter()
            .filter(|(name, _)| !name.ends_with(".idx"))
            .map(|(_, len)| len)
            .sum()
    };
    let before = block_bytes(dir.path());

    assert_eq!(dataset.compress_dataset(BlockCompression::Raw).unwrap(), 64);

    // Every block was stored twice before.
    assert!(block_bytes(dir.path()) < before);
    assert!(files_under(dir.path())
        .iter()
        .all(|(name, _)| !name.ends_with(COMPRESSED_SUFFIX)));

    let reopened = Dataset::open(dir.path().join("dataset.idx")).unwrap();
    assert_eq!(reopened.default_field().default_compression, "raw");
    let mut access = reopened.create_access().unwrap();
    let field = reopened.default_field().clone();
    let full = *reopened.logic_box();
    assert_eq!(
        reopened.read(&mut access, &field, 0.0, full, 12).unwrap(),
        ramp_array(full.shape(), field.dtype)
    );
}

#[cfg(feature = "lz4")]
#[test]
fn recompressed_blocks_read_back() {
    let (dir, mut dataset) = cube_dataset();
    write_ramp(&dataset);
    dataset.compress_dataset(BlockCompression::Lz4).unwrap();

    let reopened = Dataset::open(dir.path().join("dataset.idx")).unwrap();
    assert_eq!(reopened.default_field().default_compression, "lz4");
    let mut access = reopened.create_access().unwrap();
    let field = reopened.default_field().clone();
    let full = *reopened.logic_box();
    assert_eq!(
        reopened.read(&mut access, &field, 0.0, full, 12).unwrap(),
        ramp_array(full.shape(), field.dtype)
    );
}
