use hzblocks_core::prelude::*;
use hzblocks_storage::access::RamCache;
use hzblocks_storage::prelude::*;
use utilities::data_sets::{cube_idx_file, random_array, temp_dataset};

use pretty_assertions::assert_eq;

// 16x16 bytes in 16 blocks of 16 samples.
fn small_dataset() -> (tempfile::TempDir, Dataset) {
    temp_dataset(cube_idx_file(PointNi::fill(2, 16), DType::scalar(BaseType::U8), 4))
}

#[test]
fn ram_cache_keeps_the_most_recent_blocks() {
    let (_dir, dataset) = small_dataset();
    let config = AccessConfig {
        available_memory: 64,
        ..AccessConfig::read_write().with_kind(AccessKind::Ram)
    };
    let mut access = dataset.create_access_with(&config).unwrap();
    let field = dataset.default_field().clone();
    let full = *dataset.logic_box();
    dataset
        .write(&mut access, &field, 0.0, full, random_array(full.shape(), field.dtype, 7))
        .unwrap();

    {
        let cache = dataset.ram_cache().lock().unwrap();
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.used_memory(), 64);
        assert!(cache.contains(&RamCache::key(&field, 0.0, 15)));
        assert!(!cache.contains(&RamCache::key(&field, 0.0, 0)));
    }

    let err = dataset.read(&mut access, &field, 0.0, full, 8).unwrap_err();
    assert!(err.to_string().contains("not in memory"), "{}", err);
}

#[test]
fn batching_access_round_trip() {
    let (_dir, dataset) = small_dataset();
    let config = AccessConfig {
        batch_size: 5,
        ..AccessConfig::read_write().with_kind(AccessKind::Batching)
    };
    let mut access = dataset.create_access_with(&config).unwrap();
    let field = dataset.default_field().clone();
    let full = *dataset.logic_box();
    let written = random_array(full.shape(), field.dtype, 11);

    dataset
        .write(&mut access, &field, 0.0, full, written.clone())
        .unwrap();
    assert_eq!(access.info().statistics.wok(), 16);

    let read = dataset.read(&mut access, &field, 0.0, full, 8).unwrap();
    assert_eq!(read, written);
    assert_eq!(access.info().statistics.rok(), 16);
    assert!(access.info().mode.is_none());
}

#[test]
fn read_only_access_rejects_writes() {
    let (_dir, dataset) = small_dataset();
    let mut access = dataset.create_access().unwrap();
    let field = dataset.default_field().clone();
    let full = *dataset.logic_box();
    let buffer = random_array(full.shape(), field.dtype, 3);

    let err = dataset
        .write(&mut access, &field, 0.0, full, buffer.clone())
        .unwrap_err();
    assert!(matches!(err, IdxError::NotSupported(_)));

    let mut query = dataset
        .create_query(IoMode::Write)
        .with_buffer(buffer);
    assert!(dataset.begin(&mut query));
    assert!(!dataset.execute(&mut access, &mut query));
    assert!(query.error_message().starts_with("not supported"));
    assert_eq!(access.info().statistics.wok(), 0);
}

#[test]
fn missing_blocks_keep_the_default_value() {
    let idxfile = cube_idx_file(PointNi::fill(2, 16), DType::scalar(BaseType::U8), 4)
        .with_missing_blocks(true);
    let (_dir, dataset) = temp_dataset(idxfile);
    let mut access = dataset.create_access().unwrap();
    let field = dataset.default_field().clone();

    let read = dataset
        .read(&mut access, &field, 0.0, *dataset.logic_box(), 8)
        .unwrap();
    assert!(read.as_slice::<u8>().iter().all(|v| *v == 0));
    assert_eq!(access.info().statistics.rfail(), 16);
}

#[test]
fn cached_access_serves_blocks_it_has_read() {
    let (dir, dataset) = small_dataset();
    let mut writer = dataset
        .create_access_with(&AccessConfig::read_write())
        .unwrap();
    let field = dataset.default_field().clone();
    let full = *dataset.logic_box();
    let written = random_array(full.shape(), field.dtype, 5);
    dataset
        .write(&mut writer, &field, 0.0, full, written.clone())
        .unwrap();

    let mut cached = dataset
        .create_access_with(&AccessConfig::read_only().with_kind(AccessKind::Cached))
        .unwrap();
    assert_eq!(cached.info().name, "multiplex(ram,disk)");
    assert!(!cached.info().can_write);
    assert_eq!(dataset.read(&mut cached, &field, 0.0, full, 8).unwrap(), written);
    assert_eq!(dataset.ram_cache().lock().unwrap().len(), 16);

    // Only the RAM copies remain.
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            std::fs::remove_dir_all(path).unwrap();
        } else if path.extension().map_or(true, |e| e != "idx") {
            std::fs::remove_file(path).unwrap();
        }
    }
    let mut disk = dataset.create_access().unwrap();
    assert!(dataset.read(&mut disk, &field, 0.0, full, 8).is_err());
    assert_eq!(dataset.read(&mut cached, &field, 0.0, full, 8).unwrap(), written);
    assert_eq!(cached.info().statistics.rfail(), 0);
}
