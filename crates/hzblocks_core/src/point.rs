use core::cmp::Ordering;
use core::convert::TryFrom;
use core::fmt;
use core::ops::{Add, AddAssign, Index, IndexMut, Mul, Sub, SubAssign};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The largest number of axes a dataset may have.
pub const MAX_PDIM: usize = 5;

/// An integer point whose dimension is only known at runtime (`pdim <= MAX_PDIM`).
///
/// The dimension of a multiresolution dataset is decided by its bitmask, so unlike a `[T; N]` array point, the number of
/// axes is a value carried by the point. Unused trailing coordinates are always zero, which keeps derived equality and
/// hashing consistent.
///
/// ```
/// use hzblocks_core::PointNi;
///
/// let p1 = PointNi::from_slice(&[1, 2]);
/// let p2 = PointNi::from_slice(&[3, 4]);
///
/// assert_eq!(p1 + p2, PointNi::from_slice(&[4, 6]));
/// assert_eq!(p2 - p1, PointNi::fill(2, 2));
/// assert_eq!(p1.pdim(), 2);
/// ```
///
/// As with lattice points in general, the partial order says that A < B if and only if every component of A is less than the
/// corresponding component of B.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(into = "Vec<i64>", try_from = "Vec<i64>")]
pub struct PointNi {
    coords: [i64; MAX_PDIM],
    pdim: usize,
}

impl PointNi {
    /// The origin with `pdim` axes.
    #[inline]
    pub fn zero(pdim: usize) -> Self {
        Self::fill(pdim, 0)
    }

    /// A point of all ones with `pdim` axes.
    #[inline]
    pub fn one(pdim: usize) -> Self {
        Self::fill(pdim, 1)
    }

    #[inline]
    pub fn fill(pdim: usize, value: i64) -> Self {
        assert!(pdim <= MAX_PDIM);
        let mut coords = [0; MAX_PDIM];
        for c in coords.iter_mut().take(pdim) {
            *c = value;
        }

        Self { coords, pdim }
    }

    #[inline]
    pub fn from_slice(values: &[i64]) -> Self {
        assert!(values.len() <= MAX_PDIM);
        let mut coords = [0; MAX_PDIM];
        coords[..values.len()].copy_from_slice(values);

        Self {
            coords,
            pdim: values.len(),
        }
    }

    #[inline]
    pub fn pdim(&self) -> usize {
        self.pdim
    }

    #[inline]
    pub fn as_slice(&self) -> &[i64] {
        &self.coords[..self.pdim]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i64] {
        &mut self.coords[..self.pdim]
    }

    /// Returns the same point truncated or zero-extended to `pdim` axes.
    #[inline]
    pub fn with_pdim(&self, pdim: usize) -> Self {
        assert!(pdim <= MAX_PDIM);
        let mut coords = self.coords;
        for c in coords.iter_mut().skip(pdim) {
            *c = 0;
        }

        Self { coords, pdim }
    }

    /// Returns the point after applying `f` component-wise.
    #[inline]
    pub fn map_components(&self, f: impl Fn(i64) -> i64) -> Self {
        let mut out = *self;
        for c in out.as_mut_slice() {
            *c = f(*c);
        }

        out
    }

    /// Combines two points of equal dimension component-wise.
    #[inline]
    pub fn zip_map(&self, other: &Self, f: impl Fn(i64, i64) -> i64) -> Self {
        debug_assert_eq!(self.pdim, other.pdim);
        let mut out = *self;
        for (c, o) in out.as_mut_slice().iter_mut().zip(other.as_slice()) {
            *c = f(*c, *o);
        }

        out
    }

    /// Returns `true` iff `f` holds for every pair of components.
    #[inline]
    pub fn all(&self, other: &Self, f: impl Fn(i64, i64) -> bool) -> bool {
        self.pdim == other.pdim
            && self
                .as_slice()
                .iter()
                .zip(other.as_slice())
                .all(|(a, b)| f(*a, *b))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn join(&self, other: &Self) -> Self {
        self.zip_map(other, i64::max)
    }

    /// Component-wise minimum.
    #[inline]
    pub fn meet(&self, other: &Self) -> Self {
        self.zip_map(other, i64::min)
    }

    /// Left bitshifts each dimension by the corresponding component of `shift_by`.
    #[inline]
    pub fn left_shift(&self, shift_by: &Self) -> Self {
        self.zip_map(shift_by, |a, s| a << s)
    }

    /// Right bitshifts each dimension by the corresponding component of `shift_by`.
    #[inline]
    pub fn right_shift(&self, shift_by: &Self) -> Self {
        self.zip_map(shift_by, |a, s| a >> s)
    }

    /// The product of all components; the number of samples when the point is a shape.
    #[inline]
    pub fn product(&self) -> i64 {
        self.as_slice().iter().product()
    }

    #[inline]
    pub fn inner_product(&self, other: &Self) -> i64 {
        self.as_slice()
            .iter()
            .zip(other.as_slice())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Row-major strides for an array with this shape (axis 0 is contiguous).
    #[inline]
    pub fn stride(&self) -> Self {
        let mut out = Self::zero(self.pdim);
        let mut acc = 1;
        for d in 0..self.pdim {
            out[d] = acc;
            acc *= self.coords[d];
        }

        out
    }

    /// Returns `true` iff all dimensions are powers of 2.
    #[inline]
    pub fn dimensions_are_powers_of_2(&self) -> bool {
        self.as_slice().iter().all(|&c| c > 0 && c & (c - 1) == 0)
    }

    #[inline]
    pub fn clamp(&self, min: &Self, max: &Self) -> Self {
        self.join(min).meet(max)
    }

    /// Iterate over all points in `[from, to)` with the given `step`, axis 0 fastest.
    #[inline]
    pub fn iter_range(from: Self, to: Self, step: Self) -> PointRangeIter {
        PointRangeIter::new(from, to, step)
    }
}

impl Index<usize> for PointNi {
    type Output = i64;

    #[inline]
    fn index(&self, i: usize) -> &i64 {
        &self.as_slice()[i]
    }
}

impl IndexMut<usize> for PointNi {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut i64 {
        &mut self.as_mut_slice()[i]
    }
}

impl Add for PointNi {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.zip_map(&rhs, |a, b| a + b)
    }
}

impl Sub for PointNi {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.zip_map(&rhs, |a, b| a - b)
    }
}

impl Mul for PointNi {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.zip_map(&rhs, |a, b| a * b)
    }
}

impl Mul<i64> for PointNi {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i64) -> Self {
        self.map_components(|a| a * rhs)
    }
}

impl AddAssign for PointNi {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for PointNi {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl PartialOrd for PointNi {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.lt(other) {
            Some(Ordering::Less)
        } else if self.gt(other) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        self.all(other, |a, b| a < b)
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        self.all(other, |a, b| a > b)
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        self.all(other, |a, b| a <= b)
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        self.all(other, |a, b| a >= b)
    }
}

impl fmt::Debug for PointNi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PointNi({})", self.as_slice().iter().join(", "))
    }
}

impl fmt::Display for PointNi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_slice().iter().join(" "))
    }
}

impl From<PointNi> for Vec<i64> {
    fn from(p: PointNi) -> Self {
        p.as_slice().to_vec()
    }
}

impl TryFrom<Vec<i64>> for PointNi {
    type Error = String;

    fn try_from(values: Vec<i64>) -> Result<Self, Self::Error> {
        if values.len() > MAX_PDIM {
            return Err(format!(
                "point has {} coordinates, at most {} are supported",
                values.len(),
                MAX_PDIM
            ));
        }

        Ok(Self::from_slice(&values))
    }
}

/// Row-major iteration over `[from, to)` with a per-axis `step`.
pub struct PointRangeIter {
    from: PointNi,
    to: PointNi,
    step: PointNi,
    next: Option<PointNi>,
}

impl PointRangeIter {
    fn new(from: PointNi, to: PointNi, step: PointNi) -> Self {
        let empty = from.pdim() == 0 || !from.lt(&to);

        Self {
            from,
            to,
            step,
            next: if empty { None } else { Some(from) },
        }
    }
}

impl Iterator for PointRangeIter {
    type Item = PointNi;

    fn next(&mut self) -> Option<PointNi> {
        let current = self.next?;

        let mut advanced = current;
        let mut d = 0;
        loop {
            if d == advanced.pdim() {
                self.next = None;
                break;
            }
            advanced[d] += self.step[d];
            if advanced[d] < self.to[d] {
                self.next = Some(advanced);
                break;
            }
            advanced[d] = self.from[d];
            d += 1;
        }

        Some(current)
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

    #[test]
    fn partial_ord_is_component_wise() {
        let a = PointNi::from_slice(&[0, 1]);
        let b = PointNi::from_slice(&[0, 2]);

        assert!(a <= b);
        assert!(!(a < b));
        assert!(PointNi::from_slice(&[1, 1]) < PointNi::from_slice(&[2, 3]));
        assert_eq!(
            PointNi::from_slice(&[3, 0]).partial_cmp(&PointNi::from_slice(&[0, 3])),
            None
        );
    }

    #[test]
    fn row_major_stride() {
        let dims = PointNi::from_slice(&[4, 8, 2]);

        assert_eq!(dims.stride(), PointNi::from_slice(&[1, 4, 32]));
        assert_eq!(dims.product(), 64);
    }

    #[test]
    fn range_iter_visits_axis_zero_first() {
        let points: Vec<_> = PointNi::iter_range(
            PointNi::from_slice(&[0, 0]),
            PointNi::from_slice(&[4, 3]),
            PointNi::from_slice(&[2, 2]),
        )
        .map(Vec::from)
        .collect();

        assert_eq!(
            points,
            vec![vec![0, 0], vec![2, 0], vec![0, 2], vec![2, 2]]
        );
    }

    #[test]
    fn with_pdim_clears_trailing_coordinates() {
        let p = PointNi::from_slice(&[1, 2, 3]).with_pdim(2);

        assert_eq!(p, PointNi::from_slice(&[1, 2]));
        assert_eq!(p.with_pdim(3), PointNi::from_slice(&[1, 2, 0]));
    }
}
