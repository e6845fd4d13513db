use crate::PointNi;

use core::fmt;
use serde::{Deserialize, Serialize};

/// An axis-aligned box over the runtime-dimension lattice. This is the Cartesian product of a half-closed interval `[p1, p2)`
/// in each dimension, the primary structure used to describe the region of a query and the extent of a dataset.
///
/// ```
/// use hzblocks_core::{BoxNi, PointNi};
///
/// let a = BoxNi::from_min_and_shape(PointNi::zero(2), PointNi::fill(2, 4));
/// let b = BoxNi::new(PointNi::fill(2, 2), PointNi::fill(2, 8));
///
/// assert_eq!(a.intersection(&b), BoxNi::new(PointNi::fill(2, 2), PointNi::fill(2, 4)));
/// assert!(a.strictly_intersects(&b));
/// ```
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct BoxNi {
    pub p1: PointNi,
    pub p2: PointNi,
}

impl BoxNi {
    #[inline]
    pub fn new(p1: PointNi, p2: PointNi) -> Self {
        debug_assert_eq!(p1.pdim(), p2.pdim());

        Self { p1, p2 }
    }

    #[inline]
    pub fn from_min_and_shape(minimum: PointNi, shape: PointNi) -> Self {
        Self::new(minimum, minimum + shape)
    }

    /// The box with zero dimensions, which is never `valid`.
    #[inline]
    pub fn invalid() -> Self {
        Self::default()
    }

    #[inline]
    pub fn pdim(&self) -> usize {
        self.p1.pdim()
    }

    #[inline]
    pub fn shape(&self) -> PointNi {
        self.p2 - self.p1
    }

    #[inline]
    pub fn volume(&self) -> i64 {
        self.shape().product()
    }

    /// A box with at least one axis and `p1 <= p2`. Empty boxes are valid.
    #[inline]
    pub fn valid(&self) -> bool {
        self.pdim() > 0 && self.p1 <= self.p2
    }

    /// Returns `true` iff the box contains at least one point, i.e. `p1 < p2` on every axis.
    #[inline]
    pub fn is_full_dim(&self) -> bool {
        self.pdim() > 0 && self.p1 < self.p2
    }

    #[inline]
    pub fn intersection(&self, other: &Self) -> Self {
        Self::new(self.p1.join(&other.p1), self.p2.meet(&other.p2))
    }

    /// Returns `true` iff the interiors overlap.
    #[inline]
    pub fn strictly_intersects(&self, other: &Self) -> bool {
        self.p1 < other.p2 && other.p1 < self.p2
    }

    /// The smallest box containing both. An invalid box is the identity.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        if !self.valid() {
            return *other;
        }
        if !other.valid() {
            return *self;
        }

        Self::new(self.p1.meet(&other.p1), self.p2.join(&other.p2))
    }

    #[inline]
    pub fn contains(&self, p: &PointNi) -> bool {
        self.p1 <= *p && *p < self.p2
    }

    #[inline]
    pub fn contains_box(&self, other: &Self) -> bool {
        self.p1 <= other.p1 && other.p2 <= self.p2
    }

    #[inline]
    pub fn with_pdim(&self, pdim: usize) -> Self {
        Self::new(self.p1.with_pdim(pdim), self.p2.with_pdim(pdim))
    }

    #[inline]
    pub fn translate(&self, offset: PointNi) -> Self {
        Self::new(self.p1 + offset, self.p2 + offset)
    }
}

impl fmt::Debug for BoxNi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxNi([{}], [{}])", self.p1, self.p2)
    }
}

impl fmt::Display for BoxNi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.p1, self.p2)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
