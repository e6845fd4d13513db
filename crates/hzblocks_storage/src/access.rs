//! Block storage backends.
//!
//! An `Access` is a session with one backend. The executor brackets every burst of block operations with `begin_io` and
//! `end_io`, sends `BlockQuery`s through `read_block` and `write_block`, and waits on their completions. A backend may complete
//! a block before returning, on a worker thread, or only when it is flushed; the executor does not care which.
//!
//! | backend           | storage                                         |
//! |-------------------|-------------------------------------------------|
//! | `DiskAccess`      | block files next to the idx file                |
//! | `RamAccess`       | an LRU cache of decoded blocks, shared per dataset |
//! | `BatchingAccess`  | any access, fed in bursts                       |
//! | `MultiplexAccess` | several accesses, read first to last            |
//! | `SledAccess`      | a `sled` tree (feature `sled`)                  |

mod batching;
mod disk;
mod multiplex;
mod ram;
#[cfg(feature = "sled")]
mod sled_access;

pub use batching::BatchingAccess;
pub use disk::{DiskAccess, ENTRY_SIZE, HEADER_PREFIX};
pub use multiplex::MultiplexAccess;
pub use ram::{RamAccess, RamCache, SharedRamCache};
#[cfg(feature = "sled")]
pub use sled_access::SledAccess;

use crate::{BlockCompression, BlockQuery, Field, IdxError, IoMode, Result, SharedBlockQuery};

use auto_impl::auto_impl;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A session with a block storage backend.
#[auto_impl(&mut, Box)]
pub trait Access: Send {
    fn info(&self) -> &AccessInfo;

    fn info_mut(&mut self) -> &mut AccessInfo;

    /// Starts reading the block. The query completes, now or later, with its buffer holding the decoded row-major samples.
    fn read_block(&mut self, query: SharedBlockQuery);

    /// Starts writing the row-major samples in the query buffer.
    fn write_block(&mut self, query: SharedBlockQuery);

    fn begin_io(&mut self, mode: IoMode) {
        debug_assert!(self.info().mode.is_none(), "begin_io inside an open session");
        self.info_mut().mode = Some(mode);
    }

    /// Flushes pending work and closes the session.
    fn end_io(&mut self) {
        self.flush();
        self.info_mut().mode = None;
    }

    #[inline]
    fn is_reading(&self) -> bool {
        self.info().mode == Some(IoMode::Read)
    }

    #[inline]
    fn is_writing(&self) -> bool {
        self.info().mode == Some(IoMode::Write)
    }

    /// Pushes queued operations to the backend. Every block dispatched before the call completes eventually.
    fn flush(&mut self) {}

    /// Serializes writers of the block. Backends without locks only allow writes when locks are disabled.
    fn acquire_write_lock(&mut self, query: &BlockQuery) -> Result<()> {
        if self.info().disable_write_locks {
            Ok(())
        } else {
            Err(IdxError::not_supported(format!(
                "{} has no write locks (block {})",
                self.info().name,
                query.blockid
            )))
        }
    }

    fn release_write_lock(&mut self, query: &BlockQuery) -> Result<()> {
        self.acquire_write_lock(query)
    }

    /// Where the block lives on the backend. Has no side effects.
    fn filename(&self, field: &Field, time: f64, blockid: u64) -> String;

    fn print_statistics(&self) {
        let info = self.info();
        let s = &info.statistics;
        tracing::info!(
            access = %info.name,
            rok = s.rok(),
            rfail = s.rfail(),
            wok = s.wok(),
            wfail = s.wfail(),
            "access statistics"
        );
    }
}

/// The state every backend carries.
#[derive(Clone, Debug)]
pub struct AccessInfo {
    pub name: String,
    pub can_read: bool,
    pub can_write: bool,
    pub bitsperblock: usize,
    /// Overrides the field's default compression of written blocks.
    pub compression: Option<BlockCompression>,
    pub disable_write_locks: bool,
    pub statistics: AccessStatistics,
    pub mode: Option<IoMode>,
}

impl AccessInfo {
    pub fn new(name: impl Into<String>, bitsperblock: usize) -> Self {
        let name = name.into();

        Self {
            statistics: AccessStatistics::new(name.clone(), false),
            name,
            can_read: true,
            can_write: false,
            bitsperblock,
            compression: None,
            disable_write_locks: false,
            mode: None,
        }
    }

    /// The compression of blocks written for `field`.
    pub fn compression_for(&self, field: &Field) -> Result<BlockCompression> {
        match self.compression {
            Some(compression) => Ok(compression),
            None => BlockCompression::from_token(&field.default_compression),
        }
    }

    /// Fails a write on a session that cannot write. Returns `true` when the write may go ahead.
    pub fn check_can_write(&self, query: &BlockQuery) -> bool {
        if self.can_write {
            return true;
        }
        self.statistics.write_failed(
            query,
            IdxError::not_supported(format!("{} is read-only", self.name)).to_string(),
        );

        false
    }

    pub fn check_can_read(&self, query: &BlockQuery) -> bool {
        if self.can_read {
            return true;
        }
        self.statistics.read_failed(
            query,
            IdxError::not_supported(format!("{} is write-only", self.name)).to_string(),
        );

        false
    }
}

/// Block counters shared by an access and its worker threads. Updating them also completes the block.
#[derive(Clone, Debug)]
pub struct AccessStatistics {
    name: Arc<str>,
    verbose: bool,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    rok: AtomicU64,
    rfail: AtomicU64,
    wok: AtomicU64,
    wfail: AtomicU64,
}

impl AccessStatistics {
    pub fn new(name: impl Into<String>, verbose: bool) -> Self {
        Self {
            name: Arc::from(name.into()),
            verbose,
            counters: Default::default(),
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn read_ok(&self, query: &BlockQuery) {
        self.counters.rok.fetch_add(1, Ordering::Relaxed);
        if self.verbose {
            tracing::info!(access = %self.name, blockid = query.blockid, "read ok");
        } else {
            tracing::trace!(access = %self.name, blockid = query.blockid, "read ok");
        }
        query.set_ok();
    }

    pub fn read_failed(&self, query: &BlockQuery, message: impl Into<String>) {
        let message = message.into();
        self.counters.rfail.fetch_add(1, Ordering::Relaxed);
        if self.verbose {
            tracing::info!(access = %self.name, blockid = query.blockid, %message, "read failed");
        } else {
            tracing::debug!(access = %self.name, blockid = query.blockid, %message, "read failed");
        }
        query.set_failed(message);
    }

    pub fn write_ok(&self, query: &BlockQuery) {
        self.counters.wok.fetch_add(1, Ordering::Relaxed);
        if self.verbose {
            tracing::info!(access = %self.name, blockid = query.blockid, "write ok");
        } else {
            tracing::trace!(access = %self.name, blockid = query.blockid, "write ok");
        }
        query.set_ok();
    }

    pub fn write_failed(&self, query: &BlockQuery, message: impl Into<String>) {
        let message = message.into();
        self.counters.wfail.fetch_add(1, Ordering::Relaxed);
        tracing::error!(access = %self.name, blockid = query.blockid, %message, "write failed");
        query.set_failed(message);
    }

    pub fn rok(&self) -> u64 {
        self.counters.rok.load(Ordering::Relaxed)
    }

    pub fn rfail(&self) -> u64 {
        self.counters.rfail.load(Ordering::Relaxed)
    }

    pub fn wok(&self) -> u64 {
        self.counters.wok.load(Ordering::Relaxed)
    }

    pub fn wfail(&self) -> u64 {
        self.counters.wfail.load(Ordering::Relaxed)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
