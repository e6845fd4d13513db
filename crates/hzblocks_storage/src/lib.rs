#![allow(clippy::too_many_arguments, clippy::new_without_default)]

//! Block-addressed storage and progressive queries for multiresolution IDX datasets.
//!
//! A dataset is a box of samples, one or more typed fields per sample, stored in blocks of `2^bitsperblock` consecutive HZ
//! addresses. Coarse resolutions are prefixes of the HZ order, so reading a box at a low resolution touches few blocks, and
//! refining it only fetches the blocks of the new levels.
//!
//! The main types are:
//!   - `IdxFile`: the layout of a dataset, as read from and written to `.idx` files
//!   - `Dataset`: an opened layout, which creates accesses and runs queries
//!   - `Access`: a session with a block storage backend (disk files, a RAM cache, a batching queue, a `sled` tree), or
//!     several of them read in turn
//!   - `Query`: a request for a box at a progression of resolutions, with its buffer, status and abort token
//!   - `PointQuery`: the same for a list of scattered points
//!   - `Array`: a dense, dynamically typed sample buffer
//!
//! Fields may carry a `Filter` (min, max, de Haar wavelets) that `Dataset::compute_filter` applies to the stored samples and
//! that filtered reads invert level by level.

pub mod access;
pub mod array;
pub mod block;
pub mod caching;
pub mod compression;
pub mod config;
pub mod dataset;
pub mod dtype;
pub mod error;
mod executor;
pub mod field;
pub mod filter;
pub mod idx_file;
pub mod query;

pub use access::{Access, AccessInfo, AccessStatistics};
pub use array::*;
pub use caching::*;
pub use compression::*;
pub use config::*;
pub use dataset::*;
pub use dtype::*;
pub use error::*;
pub use field::*;
pub use filter::{create_filter, Filter, FilterKernel};
pub use idx_file::*;
pub use query::*;

pub use hzblocks_core;

// Hash type to use for small keys like block addresses.
pub type SmallKeyBuildHasher = ahash::RandomState;

pub mod prelude {
    pub use super::{
        Access, AccessConfig, AccessKind, Array, BaseType, DType, Dataset, DatasetConfig, Field,
        IdxError, IdxFile, IoMode, MergeMode, PointQuery, Query, QueryStatus,
    };
}
