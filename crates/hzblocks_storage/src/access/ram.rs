use super::{Access, AccessInfo, AccessStatistics};
use crate::{AccessConfig, Array, BlockQuery, Field, Result, SharedBlockQuery, SmallKeyLruCache};

use std::sync::{Arc, Mutex, MutexGuard};

/// `(field index, time bits, blockid)`
pub type RamKey = (usize, u64, u64);

/// A `RamCache` shared by every `RamAccess` of a dataset.
pub type SharedRamCache = Arc<Mutex<RamCache>>;

/// Decoded blocks in memory, evicted least recently used first once they take more than `available_memory` bytes.
#[derive(Debug)]
pub struct RamCache {
    blocks: SmallKeyLruCache<RamKey, Array>,
    used_memory: usize,
    available_memory: usize,
}

impl RamCache {
    pub fn new(available_memory: usize) -> Self {
        Self {
            blocks: Default::default(),
            used_memory: 0,
            available_memory,
        }
    }

    pub fn shared(self) -> SharedRamCache {
        Arc::new(Mutex::new(self))
    }

    pub fn key(field: &Field, time: f64, blockid: u64) -> RamKey {
        (field.index, time.to_bits(), blockid)
    }

    /// A copy of the block, now the most recently used.
    pub fn get(&mut self, key: &RamKey) -> Option<Array> {
        self.blocks.get_and_touch(key).cloned()
    }

    pub fn contains(&self, key: &RamKey) -> bool {
        self.blocks.get(key).is_some()
    }

    pub fn insert(&mut self, key: RamKey, block: Array) {
        self.used_memory += block.nbytes();
        if let Some(old) = self.blocks.insert(key, block) {
            self.used_memory -= old.nbytes();
        }
        self.evict();
    }

    pub fn remove(&mut self, key: &RamKey) -> Option<Array> {
        let block = self.blocks.remove(key)?;
        self.used_memory -= block.nbytes();

        Some(block)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.used_memory = 0;
    }

    pub fn set_available_memory(&mut self, available_memory: usize) {
        self.available_memory = available_memory;
        self.evict();
    }

    #[inline]
    pub fn used_memory(&self) -> usize {
        self.used_memory
    }

    #[inline]
    pub fn available_memory(&self) -> usize {
        self.available_memory
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn evict(&mut self) {
        while self.used_memory > self.available_memory {
            match self.blocks.remove_lru() {
                Some((key, block)) => {
                    tracing::trace!(?key, nbytes = block.nbytes(), "evicted block");
                    self.used_memory -= block.nbytes();
                }
                None => break,
            }
        }
    }
}

/// Blocks in a `RamCache`. A block that was never written, or was evicted, fails to read.
///
/// The cache mutex serializes writers, so no write locks are taken.
pub struct RamAccess {
    info: AccessInfo,
    cache: SharedRamCache,
}

impl RamAccess {
    pub fn new(bitsperblock: usize, cache: SharedRamCache, config: &AccessConfig) -> Self {
        let mut info = AccessInfo::new("ram", bitsperblock);
        info.can_read = config.can_read;
        info.can_write = config.can_write;
        info.disable_write_locks = config.disable_write_locks;
        info.statistics = AccessStatistics::new("ram", config.verbose);

        Self { info, cache }
    }

    pub fn cache(&self) -> &SharedRamCache {
        &self.cache
    }

    fn lock_cache(&self) -> MutexGuard<'_, RamCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Access for RamAccess {
    fn info(&self) -> &AccessInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut AccessInfo {
        &mut self.info
    }

    fn read_block(&mut self, query: SharedBlockQuery) {
        if !self.info.check_can_read(&query) {
            return;
        }

        let key = RamCache::key(&query.field, query.time, query.blockid);
        let cached = self.lock_cache().get(&key);
        match cached {
            Some(block) => {
                query.set_buffer(block);
                self.info.statistics.read_ok(&query);
            }
            None => self
                .info
                .statistics
                .read_failed(&query, format!("block {} is not in memory", query.blockid)),
        }
    }

    fn write_block(&mut self, query: SharedBlockQuery) {
        if !self.info.check_can_write(&query) {
            return;
        }

        let block = query.buffer().clone();
        if !block.valid() {
            self.info
                .statistics
                .write_failed(&query, format!("block {} has no buffer to write", query.blockid));
            return;
        }
        let key = RamCache::key(&query.field, query.time, query.blockid);
        self.lock_cache().insert(key, block);
        self.info.statistics.write_ok(&query);
    }

    fn acquire_write_lock(&mut self, _query: &BlockQuery) -> Result<()> {
        Ok(())
    }

    fn release_write_lock(&mut self, _query: &BlockQuery) -> Result<()> {
        Ok(())
    }

    fn filename(&self, field: &Field, time: f64, blockid: u64) -> String {
        format!("ram://{}/{}/{:x}", field.name, time, blockid)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Aborted, BaseType, DType, IoMode};

    use hzblocks_core::{BoxNi, LogicSamples, PointNi};

    fn field() -> Field {
        Field::new("data", DType::scalar(BaseType::U32))
    }

    fn block(blockid: u64, mode: IoMode) -> SharedBlockQuery {
        let samples = LogicSamples::new(
            BoxNi::new(PointNi::zero(1), PointNi::fill(1, 4)),
            PointNi::one(1),
        );

        BlockQuery::new(field(), 0.0, mode, blockid, samples, Aborted::new()).shared()
    }

    #[test]
    fn evicts_least_recently_used() {
        // Each block is 16 bytes.
        let mut cache = RamCache::new(40);
        let dims = PointNi::fill(1, 4);
        let dtype = DType::scalar(BaseType::U32);
        cache.insert((0, 0, 1), Array::filled(dims, dtype, 1.0));
        cache.insert((0, 0, 2), Array::filled(dims, dtype, 2.0));
        assert!(cache.get(&(0, 0, 1)).is_some());

        cache.insert((0, 0, 3), Array::filled(dims, dtype, 3.0));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.used_memory(), 32);
        assert!(cache.contains(&(0, 0, 1)));
        assert!(!cache.contains(&(0, 0, 2)));
        assert!(cache.contains(&(0, 0, 3)));

        cache.set_available_memory(16);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&(0, 0, 3)));
    }

    #[test]
    fn replacing_a_block_keeps_the_byte_count() {
        let mut cache = RamCache::new(1024);
        let dtype = DType::scalar(BaseType::U8);
        cache.insert((0, 0, 0), Array::new(PointNi::fill(1, 8), dtype));
        cache.insert((0, 0, 0), Array::new(PointNi::fill(1, 4), dtype));

        assert_eq!(cache.used_memory(), 4);
        assert_eq!(cache.remove(&(0, 0, 0)).map(|b| b.nbytes()), Some(4));
        assert!(cache.is_empty());
        assert_eq!(cache.used_memory(), 0);
    }

    #[test]
    fn write_then_read() {
        let cache = RamCache::new(1024).shared();
        let mut access = RamAccess::new(2, cache.clone(), &AccessConfig::read_write());

        let write = block(5, IoMode::Write);
        write.allocate_buffer_if_needed();
        write.buffer().fill(9.0);
        access.acquire_write_lock(&write).unwrap();
        access.write_block(write.clone());
        access.release_write_lock(&write).unwrap();
        assert!(write.ok());

        let read = block(5, IoMode::Read);
        access.read_block(read.clone());
        assert!(read.ok());
        assert_eq!(read.take_buffer().as_slice::<u32>(), &[9, 9, 9, 9]);

        let missing = block(6, IoMode::Read);
        access.read_block(missing.clone());
        assert!(missing.failed());
        assert_eq!(cache.lock().unwrap().len(), 1);
    }
}
