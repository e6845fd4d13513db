//! Configuration for datasets and their block accesses.
//!
//! Nothing here is global: a `DatasetConfig` is built by the caller (by hand, from `Default`, or from the environment) and
//! passed to `Dataset::open_with_config`.

use crate::{IdxError, Result};

use serde::{Deserialize, Serialize};

/// Which storage backend an access talks to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// Block files next to the idx file.
    Disk,
    /// An in-memory LRU cache of blocks.
    Ram,
    /// Disk access behind a request queue that is flushed in bursts.
    Batching,
    /// A `sled` key-value tree.
    Sled,
    /// The dataset's RAM cache in front of disk, filled by reads.
    Cached,
}

impl Default for AccessKind {
    fn default() -> Self {
        Self::Disk
    }
}

impl AccessKind {
    /// Parse from string (case-insensitive). Unknown names fall back to `Disk`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ram" | "memory" => Self::Ram,
            "batching" | "batch" => Self::Batching,
            "sled" => Self::Sled,
            "cached" | "multiplex" => Self::Cached,
            _ => Self::Disk,
        }
    }
}

/// Configuration of one access session.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AccessConfig {
    pub kind: AccessKind,

    pub can_read: bool,
    pub can_write: bool,

    /// Skip the per-block write locks. Only safe when a single writer exists.
    pub disable_write_locks: bool,

    /// Log every block read and write at `info` level.
    pub verbose: bool,

    /// Compression for written blocks, overriding the field's default compression.
    pub compression: Option<String>,

    /// Worker threads for disk reads. 0 reads on the calling thread.
    pub num_threads: usize,

    /// Memory budget of the RAM cache in bytes.
    pub available_memory: usize,

    /// Number of queued requests after which a batching access flushes on its own.
    pub batch_size: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            kind: AccessKind::Disk,
            can_read: true,
            can_write: false,
            disable_write_locks: false,
            verbose: false,
            compression: None,
            num_threads: 0,
            available_memory: 128 * 1024 * 1024,
            batch_size: 64,
        }
    }
}

impl AccessConfig {
    /// A read-only disk access.
    pub fn read_only() -> Self {
        Self::default()
    }

    /// A read-write disk access.
    pub fn read_write() -> Self {
        Self {
            can_write: true,
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: AccessKind) -> Self {
        self.kind = kind;
        self
    }

    /// Load configuration from `HZBLOCKS_*` environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HZBLOCKS_ACCESS") {
            config.kind = AccessKind::from_str(&val);
        }

        if let Ok(val) = std::env::var("HZBLOCKS_ACCESS_MODE") {
            config.can_read = val.contains('r');
            config.can_write = val.contains('w');
        }

        if let Ok(val) = std::env::var("HZBLOCKS_DISABLE_WRITE_LOCKS") {
            config.disable_write_locks = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("HZBLOCKS_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("HZBLOCKS_COMPRESSION") {
            config.compression = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var("HZBLOCKS_NUM_THREADS") {
            if let Ok(n) = val.parse() {
                config.num_threads = n;
            }
        }

        if let Ok(val) = std::env::var("HZBLOCKS_AVAILABLE_MEMORY_MB") {
            if let Ok(mb) = val.parse::<usize>() {
                config.available_memory = mb * 1024 * 1024;
            }
        }

        if let Ok(val) = std::env::var("HZBLOCKS_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.batch_size = n;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.can_read && !self.can_write {
            return Err(IdxError::config("an access must be able to read or write"));
        }

        if matches!(self.kind, AccessKind::Ram | AccessKind::Cached) && self.available_memory == 0 {
            return Err(IdxError::config("available_memory must be > 0"));
        }

        if self.kind == AccessKind::Batching && self.batch_size == 0 {
            return Err(IdxError::config("batch_size must be > 0"));
        }

        Ok(())
    }
}

/// Configuration of an opened dataset.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DatasetConfig {
    /// Overrides the idx file's `missing_blocks` tolerance when set.
    pub missing_blocks_override: Option<bool>,

    /// Used by `Dataset::create_access`.
    pub default_access: AccessConfig,
}

impl DatasetConfig {
    /// Load configuration from `HZBLOCKS_*` environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            missing_blocks_override: None,
            default_access: AccessConfig::from_env(),
        };

        if let Ok(val) = std::env::var("HZBLOCKS_MISSING_BLOCKS") {
            config.missing_blocks_override = Some(parse_flag(&val));
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.default_access.validate()
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
