//! Queries: the request objects a dataset executes.
//!
//! A `Query` asks for the samples of a box of the dataset at one or more resolutions. Executing it splits the work into one
//! `BlockQuery` per required block, sends those to an `Access` and merges what comes back into the query buffer. A
//! `PointQuery` does the same for a scattered list of points.
//!
//! Every kind of query carries a `StatusCell`, so callers on any thread can watch them finish:
//!
//! ```text
//! Created --begin--> Running --execute/next...--> Ok
//!                        \--------------------> Failed ("query aborted" when cancelled)
//! ```

mod block_query;
mod box_query;
mod point_query;
pub mod status;

pub use block_query::{BlockQuery, SharedBlockQuery};
pub use box_query::{FilterState, MergeMode, Query};
pub use point_query::PointQuery;
pub use status::{Aborted, Completion, QueryStatus, StatusCell, ABORTED_MESSAGE};

use serde::{Deserialize, Serialize};

/// Whether a query reads or writes samples.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    Read,
    Write,
}

impl IoMode {
    #[inline]
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write)
    }
}
