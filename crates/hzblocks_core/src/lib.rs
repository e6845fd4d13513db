//! The core data types for addressing multiresolution datasets:
//! - `PointNi`: a point with a runtime number of axes
//! - `BoxNi`: a half-open box of `PointNi`s
//! - `Bitmask`: the sequence of axis refinements that defines the resolution hierarchy
//! - `HzOrder`: conversions between points and hierarchical Z-order addresses
//! - `LogicSamples`: a power-of-2 sub-lattice of the logical space, as covered by a query or a block

pub mod bitmask;
pub mod extent;
pub mod hz_order;
pub mod int_math;
pub mod logic_samples;
pub mod point;

pub use bitmask::{Bitmask, MAX_BITMASK_LEN};
pub use extent::BoxNi;
pub use hz_order::HzOrder;
pub use int_math::{
    align_left, align_right, is_aligned, is_power_of_2, least_common_multiple, log2_exact,
    power_of_2_ceil,
};
pub use logic_samples::LogicSamples;
pub use point::{PointNi, PointRangeIter, MAX_PDIM};

pub use num;

pub mod prelude {
    pub use super::{Bitmask, BoxNi, HzOrder, LogicSamples, PointNi};
}
