use crate::access::{BatchingAccess, DiskAccess, MultiplexAccess, RamAccess, RamCache, SharedRamCache};
use crate::executor;
use crate::{
    create_filter, Aborted, Access, AccessConfig, AccessKind, Array, BlockCompression, DatasetConfig,
    Field, Filter, IdxError, IdxFile, IoMode, PointQuery, Query, Result,
};

use hzblocks_core::{align_left, is_aligned, Bitmask, BoxNi, HzOrder, LogicSamples, PointNi};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suffix of the block files `Dataset::compress_dataset` writes before moving them over the originals.
pub const COMPRESSED_SUFFIX: &str = ".~compressed";

// Samples per slab moved by `Dataset::copy_dataset`.
const COPY_SLAB_SAMPLES: i64 = 1 << 22;

/// An opened IDX dataset: its layout, the address arithmetic of its bitmask, and the means to create accesses and queries.
///
/// A `Dataset` holds no open files. Each `Access` created from it is an independent session, and the dataset methods that run
/// queries take the access to use, so one dataset can serve any number of threads, each with its own access.
pub struct Dataset {
    idxfile: Arc<IdxFile>,
    hzorder: HzOrder,
    directory: PathBuf,
    idx_path: Option<PathBuf>,
    config: DatasetConfig,
    missing_blocks: bool,
    ram_cache: SharedRamCache,
    #[cfg(feature = "sled")]
    sled_db: std::sync::Mutex<Option<sled::Db>>,
}

impl Dataset {
    /// Opens the idx file at `path` with the default configuration. Block files are resolved against its directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, DatasetConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: DatasetConfig) -> Result<Self> {
        let path = path.as_ref();
        let idxfile = IdxFile::load(path)?;
        tracing::info!(path = %path.display(), bitmask = %idxfile.bitmask, "opened dataset");

        let mut dataset = Self::from_idx_file(idxfile, parent_directory(path), config)?;
        dataset.idx_path = Some(path.to_path_buf());

        Ok(dataset)
    }

    /// Validates `idxfile`, saves it at `path` and opens it. Existing block files are left alone.
    pub fn create(path: impl AsRef<Path>, mut idxfile: IdxFile) -> Result<Self> {
        let path = path.as_ref();
        idxfile.validate(&path.to_string_lossy())?;
        idxfile.save(path)?;
        tracing::info!(path = %path.display(), "created dataset");

        let mut dataset = Self::from_idx_file(idxfile, parent_directory(path), DatasetConfig::default())?;
        dataset.idx_path = Some(path.to_path_buf());

        Ok(dataset)
    }

    /// A dataset over an in-memory layout, with block files relative to `directory`.
    pub fn from_idx_file(
        mut idxfile: IdxFile,
        directory: impl Into<PathBuf>,
        config: DatasetConfig,
    ) -> Result<Self> {
        config.validate()?;
        idxfile.validate("")?;

        let hzorder = HzOrder::new(&idxfile.bitmask);
        let missing_blocks = config
            .missing_blocks_override
            .unwrap_or(idxfile.missing_blocks);
        let ram_cache = RamCache::new(config.default_access.available_memory).shared();

        Ok(Self {
            idxfile: Arc::new(idxfile),
            hzorder,
            directory: directory.into(),
            idx_path: None,
            config,
            missing_blocks,
            ram_cache,
            #[cfg(feature = "sled")]
            sled_db: std::sync::Mutex::new(None),
        })
    }

    #[inline]
    pub fn idxfile(&self) -> &IdxFile {
        &self.idxfile
    }

    #[inline]
    pub fn bitmask(&self) -> &Bitmask {
        &self.idxfile.bitmask
    }

    #[inline]
    pub fn hzorder(&self) -> &HzOrder {
        &self.hzorder
    }

    /// The box of the stored samples. It may be smaller than the power-of-2 box of the bitmask.
    #[inline]
    pub fn logic_box(&self) -> &BoxNi {
        &self.idxfile.logic_box
    }

    #[inline]
    pub fn pdim(&self) -> usize {
        self.idxfile.logic_box.pdim()
    }

    #[inline]
    pub fn max_resolution(&self) -> usize {
        self.idxfile.max_resolution()
    }

    #[inline]
    pub fn bitsperblock(&self) -> usize {
        self.idxfile.bitsperblock
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The idx file this dataset was opened from or created at.
    #[inline]
    pub fn idx_path(&self) -> Option<&Path> {
        self.idx_path.as_deref()
    }

    #[inline]
    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Whether reads tolerate blocks that were never written.
    #[inline]
    pub fn missing_blocks(&self) -> bool {
        self.missing_blocks
    }

    pub fn fields(&self) -> &[Field] {
        &self.idxfile.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.idxfile.field(name)
    }

    /// The first field.
    pub fn default_field(&self) -> &Field {
        &self.idxfile.fields[0]
    }

    pub fn timesteps(&self) -> &[f64] {
        &self.idxfile.timesteps
    }

    pub fn default_time(&self) -> f64 {
        self.idxfile.timesteps[0]
    }

    /// The samples of level `h` over the whole power-of-2 box.
    pub fn level_samples(&self, h: usize) -> LogicSamples {
        self.hzorder.level_samples(h)
    }

    /// The blocks cached by every RAM access of this dataset. Creating a RAM access resizes it to the access's budget.
    pub fn ram_cache(&self) -> &SharedRamCache {
        &self.ram_cache
    }

    /// An access configured by `DatasetConfig::default_access`.
    pub fn create_access(&self) -> Result<Box<dyn Access>> {
        self.create_access_with(&self.config.default_access)
    }

    pub fn create_access_with(&self, config: &AccessConfig) -> Result<Box<dyn Access>> {
        config.validate()?;

        let access: Box<dyn Access> = match config.kind {
            AccessKind::Disk => Box::new(self.disk_access(config)?),
            AccessKind::Ram => {
                self.ram_cache
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .set_available_memory(config.available_memory);
                Box::new(RamAccess::new(
                    self.bitsperblock(),
                    self.ram_cache.clone(),
                    config,
                ))
            }
            AccessKind::Batching => Box::new(BatchingAccess::new(
                Box::new(self.disk_access(config)?),
                config.batch_size,
            )),
            AccessKind::Sled => self.sled_access(config)?,
            AccessKind::Cached => {
                let ram = AccessConfig {
                    kind: AccessKind::Ram,
                    can_read: true,
                    can_write: true,
                    ..config.clone()
                };
                Box::new(MultiplexAccess::new(vec![
                    self.create_access_with(&ram)?,
                    Box::new(self.disk_access(config)?),
                ]))
            }
        };
        tracing::debug!(access = %access.info().name, "created access");

        Ok(access)
    }

    fn disk_access(&self, config: &AccessConfig) -> Result<DiskAccess> {
        DiskAccess::new(
            self.idxfile.clone(),
            self.hzorder.clone(),
            self.directory.clone(),
            config,
        )
    }

    #[cfg(feature = "sled")]
    fn sled_access(&self, config: &AccessConfig) -> Result<Box<dyn Access>> {
        use crate::access::SledAccess;

        let mut db = self
            .sled_db
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if db.is_none() {
            // Next to the block files: "./name/%04x.bin" gives "name.sled".
            let stem = Path::new(&self.idxfile.filename_template)
                .components()
                .find_map(|c| match c {
                    std::path::Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .filter(|s| !s.contains('%'))
                .unwrap_or("visus_data")
                .to_string();
            let path = self.directory.join(format!("{}.sled", stem));
            let opened = sled::open(&path)
                .map_err(|e| IdxError::backend(format!("sled {}: {}", path.display(), e)))?;
            *db = Some(opened);
        }
        let tree = match db.as_ref() {
            Some(db) => db
                .open_tree("blocks")
                .map_err(|e| IdxError::backend(format!("sled: {}", e)))?,
            None => return Err(IdxError::backend("sled database is not open")),
        };

        Ok(Box::new(SledAccess::new(tree, self.bitsperblock(), config)?))
    }

    #[cfg(not(feature = "sled"))]
    fn sled_access(&self, _config: &AccessConfig) -> Result<Box<dyn Access>> {
        Err(IdxError::not_supported(
            "sled access needs the `sled` feature",
        ))
    }

    /// A query of the default field and time over the whole dataset at the maximum resolution.
    pub fn create_query(&self, mode: IoMode) -> Query {
        Query::new(
            mode,
            self.default_field().clone(),
            self.default_time(),
            *self.logic_box(),
            *self.logic_box(),
        )
    }

    /// The filter of `field`, if it names one that supports its dtype.
    pub fn create_filter(&self, field: &Field) -> Option<Arc<dyn Filter>> {
        create_filter(field, self.bitmask())
    }

    /// Validates the query and positions it on its first end resolution. Returns `true` iff the query is running.
    pub fn begin(&self, query: &mut Query) -> bool {
        executor::begin(self, query)
    }

    /// Reads or writes the blocks of the query's current end resolution. Returns `false` when there is nothing to execute or
    /// the query failed.
    pub fn execute(&self, access: &mut dyn Access, query: &mut Query) -> bool {
        executor::execute(self, access, query)
    }

    /// Moves on to the next end resolution, or finishes the query after the last one.
    pub fn next(&self, query: &mut Query) -> bool {
        executor::next(self, query)
    }

    /// A point query of the default field and time at the maximum resolution.
    pub fn create_point_query(&self, points: Vec<PointNi>) -> PointQuery {
        PointQuery::new(self.default_field().clone(), self.default_time(), points)
    }

    pub fn begin_point_query(&self, query: &mut PointQuery) -> bool {
        executor::begin_points(self, query)
    }

    /// Reads the sample of every point at the query's current end resolution.
    pub fn execute_point_query(&self, access: &mut dyn Access, query: &mut PointQuery) -> bool {
        executor::execute_points(self, access, query)
    }

    pub fn next_point_query(&self, query: &mut PointQuery) -> bool {
        executor::next_points(query)
    }

    /// Reads the samples of `field` at `time` at each of `points`, up to `end_resolution`. The result has one sample per point.
    pub fn read_points(
        &self,
        access: &mut dyn Access,
        field: &Field,
        time: f64,
        points: Vec<PointNi>,
        end_resolution: usize,
    ) -> Result<Array> {
        let mut query = self
            .create_point_query(points)
            .field(field.clone())
            .time(time)
            .end_resolutions(vec![end_resolution]);
        if !self.begin_point_query(&mut query) {
            return Err(if query.was_aborted() {
                IdxError::Aborted
            } else {
                IdxError::config(query.error_message())
            });
        }
        if !self.execute_point_query(access, &mut query) {
            return Err(classify_failure(query.was_aborted(), query.error_message()));
        }

        Ok(query.buffer)
    }

    /// Reads `logic_box` of `field` at `time`, up to `end_resolution`.
    pub fn read(
        &self,
        access: &mut dyn Access,
        field: &Field,
        time: f64,
        logic_box: BoxNi,
        end_resolution: usize,
    ) -> Result<Array> {
        let mut query = self
            .create_query(IoMode::Read)
            .field(field.clone())
            .time(time)
            .logic_box(logic_box)
            .end_resolutions(vec![end_resolution]);
        self.run(access, &mut query)?;

        Ok(query.buffer)
    }

    /// Writes `buffer`, the samples of `logic_box` at full resolution, into `field` at `time`.
    pub fn write(
        &self,
        access: &mut dyn Access,
        field: &Field,
        time: f64,
        logic_box: BoxNi,
        buffer: Array,
    ) -> Result<()> {
        if !access.info().can_write {
            return Err(IdxError::not_supported(format!(
                "{} is read-only",
                access.info().name
            )));
        }

        let mut query = self
            .create_query(IoMode::Write)
            .field(field.clone())
            .time(time)
            .logic_box(logic_box)
            .with_buffer(buffer);

        self.run(access, &mut query)
    }

    /// Begins and executes one step of `query`. A query rejected by `begin`, or a write whose buffer does not match the query
    /// lattice, is a `Config` error; a failed execution is a `Backend` (or `NotSupported`) error.
    fn run(&self, access: &mut dyn Access, query: &mut Query) -> Result<()> {
        if !self.begin(query) {
            return Err(begin_error(query));
        }
        if query.mode.is_write() && !query.buffer.valid() {
            return Err(IdxError::config("write buffer not set"));
        }
        if query.mode.is_write()
            && (query.buffer.dims() != query.nsamples() || query.buffer.dtype() != query.field.dtype)
        {
            return Err(IdxError::config(format!(
                "write buffer is {} {} but the query needs {} {}",
                query.buffer.dims(),
                query.buffer.dtype(),
                query.nsamples(),
                query.field.dtype
            )));
        }
        if !self.execute(access, query) {
            return Err(execute_error(query));
        }

        Ok(())
    }

    /// Applies the forward filter of `field` to the stored samples at `time`, finest level first.
    ///
    /// Each level is processed in windows of `window` samples, which are moved by whole windows over the dataset box. The
    /// window doubles along the refined axis after each level so every window keeps the same number of samples.
    pub fn compute_filter(
        &self,
        access: &mut dyn Access,
        field: &Field,
        time: f64,
        window: PointNi,
    ) -> Result<()> {
        let filter = self.create_filter(field).ok_or_else(|| {
            IdxError::not_supported(format!(
                "field {:?} has no filter for {}",
                field.name, field.dtype
            ))
        })?;
        if window.pdim() != self.pdim()
            || !window
                .as_slice()
                .iter()
                .all(|&w| w == 1 || (w > 1 && is_aligned(w, 0, 2)))
        {
            return Err(IdxError::config(format!(
                "filter window {} must be 1 or even on every axis",
                window
            )));
        }

        let bitmask = self.bitmask();
        let dataset_box = *self.logic_box();
        let mut window = window;
        for h in (1..=self.max_resolution()).rev() {
            let bit = bitmask[h];
            let filterstep = filter.filter_step(h)[bit];
            tracing::info!(filter = filter.name(), resolution = h, "applying filter");

            let mut from = dataset_box.p1;
            if !is_aligned(from[bit], 0, filterstep) {
                from[bit] = align_left(from[bit], 0, filterstep) + filterstep;
            }

            for p in PointNi::iter_range(from, dataset_box.p2, window) {
                let piece = BoxNi::new(p, p + window).intersection(&dataset_box);
                if !piece.is_full_dim() {
                    continue;
                }

                let mut read = self
                    .create_query(IoMode::Read)
                    .field(field.clone())
                    .time(time)
                    .logic_box(piece)
                    .end_resolutions(vec![h]);
                // Pieces without samples of this level fail to begin.
                if !self.begin(&mut read) {
                    if read.was_aborted() {
                        return Err(IdxError::Aborted);
                    }
                    continue;
                }
                if !self.execute(access, &mut read) {
                    return Err(execute_error(&read));
                }
                if !filter.compute_filter(&mut read, false) {
                    return Err(IdxError::Aborted);
                }

                let mut write = self
                    .create_query(IoMode::Write)
                    .field(field.clone())
                    .time(time)
                    .logic_box(piece)
                    .end_resolutions(vec![h])
                    .with_buffer(std::mem::take(&mut read.buffer));
                self.run(access, &mut write)?;
            }

            window[bit] <<= 1;
        }

        Ok(())
    }

    /// Copies `src_field` at `src_time` of `src` into `field` at `time` of this dataset, over the box both datasets cover.
    ///
    /// The box moves in slabs along its last axis, each read from `src_access` at full resolution and written through
    /// `access`.
    pub fn copy_dataset(
        &self,
        access: &mut dyn Access,
        field: &Field,
        time: f64,
        src: &Dataset,
        src_access: &mut dyn Access,
        src_field: &Field,
        src_time: f64,
    ) -> Result<()> {
        if field.dtype != src_field.dtype {
            return Err(IdxError::config(format!(
                "cannot copy {} samples into {}",
                src_field.dtype, field.dtype
            )));
        }
        let logic_box = self.logic_box().intersection(src.logic_box());
        if !logic_box.is_full_dim() {
            return Err(IdxError::config("the datasets do not overlap"));
        }

        let last = logic_box.pdim() - 1;
        let shape = logic_box.shape();
        let mut slab = shape;
        slab[last] = (COPY_SLAB_SAMPLES / (shape.product() / shape[last]).max(1)).max(1);

        let mut nslabs = 0;
        for p in PointNi::iter_range(logic_box.p1, logic_box.p2, slab) {
            let piece = BoxNi::new(p, p + slab).intersection(&logic_box);
            let buffer = src.read(src_access, src_field, src_time, piece, src.max_resolution())?;
            self.write(access, field, time, piece, buffer)?;
            nslabs += 1;
        }
        tracing::info!(
            from = %src_field.name,
            to = %field.name,
            %logic_box,
            nslabs,
            "copied dataset"
        );

        Ok(())
    }

    /// Re-encodes every stored block with `compression`, which also becomes the default compression of every field.
    ///
    /// Each block file is rewritten next to itself with `COMPRESSED_SUFFIX` appended, then moved over the original once every
    /// block is in, so the rewritten files hold no stale blocks. The idx file is saved again when the dataset has one. Returns
    /// the number of blocks rewritten.
    pub fn compress_dataset(&mut self, compression: BlockCompression) -> Result<u64> {
        let mut compressed = (*self.idxfile).clone();
        compressed.filename_template.push_str(COMPRESSED_SUFFIX);

        let mut reader = self.disk_access(&AccessConfig {
            disable_write_locks: true,
            ..AccessConfig::read_only()
        })?;
        let mut writer = DiskAccess::new(
            Arc::new(compressed),
            self.hzorder.clone(),
            self.directory.clone(),
            &AccessConfig {
                disable_write_locks: true,
                compression: Some(compression.token().to_string()),
                ..AccessConfig::read_write()
            },
        )?;

        let aborted = Aborted::new();
        let mut rewritten: BTreeSet<(PathBuf, PathBuf)> = BTreeSet::new();
        let mut nblocks = 0;
        reader.begin_io(IoMode::Read);
        writer.begin_io(IoMode::Write);
        for &time in self.timesteps() {
            for blockid in 0..self.idxfile.total_blocks() {
                for field in self.fields() {
                    let read = executor::new_block_query(self, field, time, IoMode::Read, blockid, &aborted);
                    // Blocks that were never written stay missing.
                    if !executor::execute_block_and_wait(&mut reader, &read) {
                        continue;
                    }

                    let target = writer.block_path(field, time, blockid);
                    let original = reader.block_path(field, time, blockid);
                    if rewritten.insert((original, target.clone())) {
                        remove_if_exists(&target)?;
                    }

                    let write = executor::new_block_query(self, field, time, IoMode::Write, blockid, &aborted);
                    write.set_buffer(read.take_buffer());
                    if !executor::execute_block_and_wait(&mut writer, &write) {
                        return Err(IdxError::backend(write.error_message()));
                    }
                    nblocks += 1;
                }
            }
        }
        reader.end_io();
        writer.end_io();

        for (original, target) in &rewritten {
            std::fs::rename(target, original)?;
            tracing::debug!(path = %original.display(), "replaced block file");
        }

        let token = compression.token();
        for field in Arc::make_mut(&mut self.idxfile).fields.iter_mut() {
            field.default_compression = token.to_string();
        }
        if let Some(path) = &self.idx_path {
            self.idxfile.save(path)?;
        }
        tracing::info!(compression = token, nblocks, nfiles = rewritten.len(), "compressed dataset");

        Ok(nblocks)
    }
}

impl core::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dataset")
            .field("directory", &self.directory)
            .field("bitmask", &self.idxfile.bitmask)
            .field("logic_box", &self.idxfile.logic_box)
            .field("missing_blocks", &self.missing_blocks)
            .finish()
    }
}

fn parent_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn begin_error(query: &Query) -> IdxError {
    if query.was_aborted() {
        IdxError::Aborted
    } else {
        IdxError::config(query.error_message())
    }
}

fn execute_error(query: &Query) -> IdxError {
    classify_failure(query.was_aborted(), query.error_message())
}

fn classify_failure(aborted: bool, message: String) -> IdxError {
    if aborted {
        return IdxError::Aborted;
    }
    match message.strip_prefix("not supported: ") {
        Some(rest) => IdxError::not_supported(rest),
        None => IdxError::backend(message),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
