use super::{Access, AccessInfo, AccessStatistics};
use crate::{
    AccessConfig, Array, BlockCompression, BlockQuery, Field, IdxError, Layout, Result,
    SharedBlockQuery,
};

use sled::Tree;

/// Blocks stored compressed in a `sled` tree.
///
/// Keys are the big-endian `(field index: u32, time bits: u64, blockid: u64)`, so the blocks of one field and time are
/// contiguous and ordered by id. Values are a compression code, a layout code, then the encoded samples. Blocks are kept
/// row-major since `sled` has no use for the HZ layout.
pub struct SledAccess {
    info: AccessInfo,
    tree: Tree,
}

impl SledAccess {
    pub fn new(tree: Tree, bitsperblock: usize, config: &AccessConfig) -> Result<Self> {
        let mut info = AccessInfo::new("sled", bitsperblock);
        info.can_read = config.can_read;
        info.can_write = config.can_write;
        info.disable_write_locks = config.disable_write_locks;
        info.statistics = AccessStatistics::new("sled", config.verbose);
        info.compression = config
            .compression
            .as_deref()
            .map(BlockCompression::from_token)
            .transpose()?;

        Ok(Self { info, tree })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn key(field: &Field, time: f64, blockid: u64) -> [u8; 20] {
        let mut key = [0; 20];
        key[0..4].copy_from_slice(&(field.index as u32).to_be_bytes());
        key[4..12].copy_from_slice(&time.to_bits().to_be_bytes());
        key[12..20].copy_from_slice(&blockid.to_be_bytes());

        key
    }

    fn read(&self, query: &BlockQuery) -> Result<Array> {
        let key = Self::key(&query.field, query.time, query.blockid);
        let value = self
            .tree
            .get(key)
            .map_err(sled_error)?
            .ok_or_else(|| IdxError::backend(format!("block {} is missing", query.blockid)))?;
        if value.len() < 2 || Layout::from_code(value[1]) != Some(Layout::RowMajor) {
            return Err(IdxError::backend(format!(
                "block {} has a corrupt header",
                query.blockid
            )));
        }

        let compression = BlockCompression::from_code(value[0])?;
        let bytes = compression.decode(&value[2..], query.nbytes())?;

        Array::from_bytes(query.nsamples(), query.field.dtype, &bytes)
    }

    fn write(&self, query: &BlockQuery) -> Result<()> {
        let compression = self.info.compression_for(&query.field)?;
        let mut value = vec![compression.code(), Layout::RowMajor.code()];
        {
            let buffer = query.buffer();
            if !buffer.valid() {
                return Err(IdxError::backend(format!(
                    "block {} has no buffer to write",
                    query.blockid
                )));
            }
            value.extend(compression.encode(buffer.as_bytes())?);
        }

        let key = Self::key(&query.field, query.time, query.blockid);
        self.tree.insert(key, value).map_err(sled_error)?;

        Ok(())
    }
}

fn sled_error(e: sled::Error) -> IdxError {
    IdxError::backend(format!("sled: {}", e))
}

impl Access for SledAccess {
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
        match self.read(&query) {
            Ok(buffer) => {
                query.set_buffer(buffer);
                self.info.statistics.read_ok(&query);
            }
            Err(e) => self.info.statistics.read_failed(&query, e.to_string()),
        }
    }

    fn write_block(&mut self, query: SharedBlockQuery) {
        if !self.info.check_can_write(&query) {
            return;
        }
        match self.write(&query) {
            Ok(()) => self.info.statistics.write_ok(&query),
            Err(e) => self.info.statistics.write_failed(&query, e.to_string()),
        }
    }

    fn end_io(&mut self) {
        if self.is_writing() {
            if let Err(e) = self.tree.flush() {
                tracing::error!(error = %e, "failed to flush sled tree");
            }
        }
        self.info.mode = None;
    }

    // Single-key inserts are atomic.
    fn acquire_write_lock(&mut self, _query: &BlockQuery) -> Result<()> {
        Ok(())
    }

    fn release_write_lock(&mut self, _query: &BlockQuery) -> Result<()> {
        Ok(())
    }

    fn filename(&self, field: &Field, time: f64, blockid: u64) -> String {
        let key: String = Self::key(field, time, blockid)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        format!("sled://{}", key)
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

    fn block(field: &Field, blockid: u64, mode: IoMode) -> SharedBlockQuery {
        let samples = LogicSamples::new(
            BoxNi::new(PointNi::zero(2), PointNi::fill(2, 4)),
            PointNi::fill(2, 2),
        );

        BlockQuery::new(field.clone(), 1.0, mode, blockid, samples, Aborted::new()).shared()
    }

    #[test]
    fn keys_sort_by_field_time_then_block() {
        let a = Field::new("a", DType::scalar(BaseType::U8));
        let mut b = a.clone();
        b.index = 1;

        assert!(SledAccess::key(&a, 0.0, 255) < SledAccess::key(&a, 0.0, 256));
        assert!(SledAccess::key(&a, 0.0, u64::MAX) < SledAccess::key(&a, 1.0, 0));
        assert!(SledAccess::key(&a, 9.0, 0) < SledAccess::key(&b, 0.0, 0));
    }

    #[test]
    fn round_trip() -> sled::Result<()> {
        let db = sled::Config::default()
            .temporary(true)
            .mode(sled::Mode::LowSpace)
            .open()?;
        let tree = db.open_tree("blocks")?;
        let mut access = SledAccess::new(tree, 2, &AccessConfig::read_write()).unwrap();
        let field = Field::new("data", DType::scalar(BaseType::I16));

        access.begin_io(IoMode::Write);
        let write = block(&field, 3, IoMode::Write);
        write.allocate_buffer_if_needed();
        write.buffer().as_mut_slice::<i16>().copy_from_slice(&[-1, 2, -3, 4]);
        access.write_block(write.clone());
        access.end_io();
        assert!(write.ok());

        access.begin_io(IoMode::Read);
        let read = block(&field, 3, IoMode::Read);
        access.read_block(read.clone());
        let missing = block(&field, 4, IoMode::Read);
        access.read_block(missing.clone());
        access.end_io();

        assert_eq!(read.take_buffer().as_slice::<i16>(), &[-1, 2, -3, 4]);
        assert!(missing.failed());

        Ok(())
    }
}
