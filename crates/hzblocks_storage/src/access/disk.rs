use super::{Access, AccessInfo, AccessStatistics};
use crate::block::{block_samples, decode_layout, encode_layout};
use crate::{
    AccessConfig, Array, BlockCompression, BlockQuery, Field, IdxError, IdxFile, Layout, Result,
    SharedBlockQuery, ABORTED_MESSAGE,
};

use ahash::AHashMap;
use futures::executor::ThreadPool;
use hzblocks_core::HzOrder;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Bytes before the first header entry: version, number of fields, blocks per file and a reserved word, all big-endian `u32`.
pub const HEADER_PREFIX: u64 = 16;

/// Bytes of one header entry: offset, encoded size and flags (`compression | layout << 8`), all big-endian `u64`.
pub const ENTRY_SIZE: u64 = 24;

const LOCK_RETRIES: usize = 500;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Blocks in files named by the idx file's filename template.
///
/// Each file starts with a header of `nfields * blocksperfile` entries, followed by the encoded blocks in the order they were
/// written. A rewritten block is appended and its entry repointed, so files only grow.
pub struct DiskAccess {
    info: AccessInfo,
    files: Arc<BlockFiles>,
    pool: Option<ThreadPool>,
    // Lock files we hold, with the number of blocks holding each.
    locks: AHashMap<PathBuf, usize>,
}

impl DiskAccess {
    pub fn new(
        idxfile: Arc<IdxFile>,
        hzorder: HzOrder,
        directory: impl Into<PathBuf>,
        config: &AccessConfig,
    ) -> Result<Self> {
        let mut info = AccessInfo::new("disk", idxfile.bitsperblock);
        info.can_read = config.can_read;
        info.can_write = config.can_write;
        info.disable_write_locks = config.disable_write_locks;
        info.statistics = AccessStatistics::new("disk", config.verbose);
        info.compression = config
            .compression
            .as_deref()
            .map(BlockCompression::from_token)
            .transpose()?;

        let pool = if config.num_threads > 0 {
            Some(
                ThreadPool::builder()
                    .pool_size(config.num_threads)
                    .name_prefix("hzblocks-disk-")
                    .create()?,
            )
        } else {
            None
        };

        Ok(Self {
            info,
            files: Arc::new(BlockFiles {
                idxfile,
                hzorder,
                directory: directory.into(),
            }),
            pool,
            locks: AHashMap::new(),
        })
    }

    /// The block file holding `blockid`, resolved against the dataset directory.
    pub fn block_path(&self, field: &Field, time: f64, blockid: u64) -> PathBuf {
        self.files.path(field, time, blockid)
    }

    fn lock_path(&self, query: &BlockQuery) -> PathBuf {
        let mut path = self
            .block_path(&query.field, query.time, query.blockid)
            .into_os_string();
        path.push(".lock");

        PathBuf::from(path)
    }
}

impl Access for DiskAccess {
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

        let files = self.files.clone();
        let statistics = self.info.statistics.clone();
        match &self.pool {
            Some(pool) => pool.spawn_ok(async move { files.read_and_complete(&query, &statistics) }),
            None => files.read_and_complete(&query, &statistics),
        }
    }

    fn write_block(&mut self, query: SharedBlockQuery) {
        if !self.info.check_can_write(&query) {
            return;
        }

        #[cfg(feature = "trace")]
        let _span = tracing::debug_span!("disk_write", blockid = query.blockid).entered();

        let result = self
            .info
            .compression_for(&query.field)
            .and_then(|compression| self.files.write(&query, compression));
        match result {
            Ok(()) => self.info.statistics.write_ok(&query),
            Err(e) => self.info.statistics.write_failed(&query, e.to_string()),
        }
    }

    fn acquire_write_lock(&mut self, query: &BlockQuery) -> Result<()> {
        if self.info.disable_write_locks {
            return Ok(());
        }

        let path = self.lock_path(query);
        if let Some(count) = self.locks.get_mut(&path) {
            *count += 1;
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for _ in 0..LOCK_RETRIES {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    self.locks.insert(path, 1);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => std::thread::sleep(LOCK_RETRY_DELAY),
                Err(e) => return Err(e.into()),
            }
        }

        Err(IdxError::backend(format!(
            "timed out waiting for the write lock {}",
            path.display()
        )))
    }

    fn release_write_lock(&mut self, query: &BlockQuery) -> Result<()> {
        if self.info.disable_write_locks {
            return Ok(());
        }

        let path = self.lock_path(query);
        match self.locks.get_mut(&path) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                self.locks.remove(&path);
                std::fs::remove_file(&path)?;
                Ok(())
            }
            None => Err(IdxError::backend(format!(
                "write lock {} is not held",
                path.display()
            ))),
        }
    }

    fn filename(&self, field: &Field, time: f64, blockid: u64) -> String {
        self.files.idxfile.filename(field, time, blockid)
    }
}

impl Drop for DiskAccess {
    fn drop(&mut self) {
        for (path, _) in self.locks.drain() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// The part of a `DiskAccess` that worker threads need.
struct BlockFiles {
    idxfile: Arc<IdxFile>,
    hzorder: HzOrder,
    directory: PathBuf,
}

impl BlockFiles {
    /// `./` and other relative names are relative to the directory of the idx file.
    fn path(&self, field: &Field, time: f64, blockid: u64) -> PathBuf {
        let name = self.idxfile.filename(field, time, blockid);
        let relative = name.strip_prefix("./").unwrap_or(&name);
        if Path::new(relative).is_absolute() {
            PathBuf::from(relative)
        } else {
            self.directory.join(relative)
        }
    }

    fn entry_offset(&self, field: &Field, blockid: u64) -> u64 {
        let bpf = self.idxfile.blocksperfile as u64;
        let position = self.idxfile.block_position_in_file(blockid);

        HEADER_PREFIX + (field.index as u64 * bpf + position) * ENTRY_SIZE
    }

    fn read_and_complete(&self, query: &BlockQuery, statistics: &AccessStatistics) {
        #[cfg(feature = "trace")]
        let _span = tracing::debug_span!("disk_read", blockid = query.blockid).entered();

        if query.aborted.is_aborted() {
            statistics.read_failed(query, ABORTED_MESSAGE);
            return;
        }
        match self.read(query) {
            Ok(buffer) => {
                query.set_buffer(buffer);
                statistics.read_ok(query);
            }
            Err(e) => statistics.read_failed(query, e.to_string()),
        }
    }

    fn read(&self, query: &BlockQuery) -> Result<Array> {
        let path = self.path(&query.field, query.time, query.blockid);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IdxError::backend(format!(
                    "block {} is missing: no file {}",
                    query.blockid,
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entry = [0; ENTRY_SIZE as usize];
        file.seek(SeekFrom::Start(self.entry_offset(&query.field, query.blockid)))?;
        file.read_exact(&mut entry)?;
        let (offset, size, flags) = decode_entry(&entry);
        if size == 0 {
            return Err(IdxError::backend(format!(
                "block {} is missing from {}",
                query.blockid,
                path.display()
            )));
        }

        let mut encoded = vec![0; size as usize];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut encoded)?;

        let compression = BlockCompression::from_code((flags & 0xff) as u8)?;
        let layout = Layout::from_code(((flags >> 8) & 0xff) as u8).ok_or_else(|| {
            IdxError::backend(format!("block {} has an unknown layout", query.blockid))
        })?;

        let samples = block_samples(&self.hzorder, self.idxfile.bitsperblock, query.blockid);
        let dtype = query.field.dtype;
        let bytes = compression.decode(&encoded, dtype.byte_size(samples.nsamples.product() as usize))?;
        let bytes = decode_layout(
            layout,
            &self.hzorder,
            self.idxfile.bitsperblock,
            query.blockid,
            &samples,
            dtype.bytes_per_sample(),
            &bytes,
        );

        Array::from_bytes(samples.nsamples, dtype, &bytes)
    }

    fn write(&self, query: &BlockQuery, compression: BlockCompression) -> Result<()> {
        let samples = block_samples(&self.hzorder, self.idxfile.bitsperblock, query.blockid);
        let layout = query.field.default_layout;
        let encoded = {
            let buffer = query.buffer();
            if !buffer.valid() || buffer.dims() != samples.nsamples {
                return Err(IdxError::backend(format!(
                    "block {} has no buffer to write",
                    query.blockid
                )));
            }
            let ordered = encode_layout(
                layout,
                &self.hzorder,
                self.idxfile.bitsperblock,
                query.blockid,
                &samples,
                query.field.dtype.bytes_per_sample(),
                buffer.as_bytes(),
            );
            compression.encode(&ordered)?
        };

        let path = self.path(&query.field, query.time, query.blockid);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut end = file.seek(SeekFrom::End(0))?;
        if end == 0 {
            let header = self.empty_header();
            file.write_all(&header)?;
            end = header.len() as u64;
        }
        file.write_all(&encoded)?;

        let flags = compression.code() as u64 | (layout.code() as u64) << 8;
        file.seek(SeekFrom::Start(self.entry_offset(&query.field, query.blockid)))?;
        file.write_all(&encode_entry(end, encoded.len() as u64, flags))?;
        file.flush()?;

        Ok(())
    }

    fn empty_header(&self) -> Vec<u8> {
        let nfields = self.idxfile.fields.len() as u64;
        let bpf = self.idxfile.blocksperfile as u64;
        let mut header = Vec::with_capacity((HEADER_PREFIX + nfields * bpf * ENTRY_SIZE) as usize);
        for word in [self.idxfile.version as u32, nfields as u32, bpf as u32, 0].iter() {
            header.extend_from_slice(&word.to_be_bytes());
        }
        header.resize((HEADER_PREFIX + nfields * bpf * ENTRY_SIZE) as usize, 0);

        header
    }
}

fn encode_entry(offset: u64, size: u64, flags: u64) -> [u8; ENTRY_SIZE as usize] {
    let mut entry = [0; ENTRY_SIZE as usize];
    entry[0..8].copy_from_slice(&offset.to_be_bytes());
    entry[8..16].copy_from_slice(&size.to_be_bytes());
    entry[16..24].copy_from_slice(&flags.to_be_bytes());

    entry
}

fn decode_entry(entry: &[u8; ENTRY_SIZE as usize]) -> (u64, u64, u64) {
    let word = |i: usize| {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(&entry[8 * i..8 * i + 8]);
        u64::from_be_bytes(bytes)
    };

    (word(0), word(1), word(2))
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
