//! Storage and progressive queries for multiresolution datasets in the IDX layout.
//!
//! This library is organized into two crates:
//! - **core**: runtime-dimension points and boxes, bitmasks, and the hierarchical Z-order (HZ) addressing built on them
//! - **storage**: idx files, block storage backends, and the queries that read and write boxes of samples at any resolution
//!
//! To learn the basics, start with these types:
//!
//! - [`Bitmask`](crate::core::Bitmask) and [`HzOrder`](crate::core::HzOrder)
//! - [`IdxFile`](crate::storage::IdxFile)
//! - [`Dataset`](crate::storage::Dataset) and [`Query`](crate::storage::Query)
//! - [`Access`](crate::storage::Access) and its backends in [`storage::access`](crate::storage::access)

pub use hzblocks_core as core;
pub use hzblocks_storage as storage;

pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::storage::prelude::*;
}
