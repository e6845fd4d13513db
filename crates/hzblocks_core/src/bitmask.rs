use crate::{power_of_2_ceil, BoxNi, PointNi, MAX_PDIM};

use core::convert::TryFrom;
use core::fmt;
use core::ops::Index;
use serde::{Deserialize, Serialize};

/// The longest sequence of refinement steps, including the leading traversal letter. HZ addresses are `u64`, so a bitmask can
/// never refine more than 63 times.
pub const MAX_BITMASK_LEN: usize = 64;

/// The ordered sequence of axis-refinement steps that defines a multiresolution hierarchy.
///
/// A pattern like `V012012` starts with the traversal letter `V`, then each digit `D` says "axis `D` gets one more bit of
/// resolution at this step". The number of digits is the maximum resolution, and each axis ends up with extent
/// `2^(count of its digit)`.
///
/// A trailing `{digits}*` group repeats forever. Those virtual steps are visible through indexing beyond the maximum
/// resolution (see `upgrade_box`) but do not contribute to `pow2_dims`.
///
/// ```
/// use hzblocks_core::{Bitmask, PointNi};
///
/// let bitmask = Bitmask::from_pattern("V0101");
/// assert!(bitmask.valid());
/// assert_eq!(bitmask.pdim(), 2);
/// assert_eq!(bitmask.max_resolution(), 4);
/// assert_eq!(bitmask.pow2_dims(), PointNi::from_slice(&[4, 4]));
/// assert_eq!(bitmask[1], 0);
/// assert_eq!(bitmask[2], 1);
/// ```
#[derive(Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(into = "String", try_from = "String")]
pub struct Bitmask {
    pattern: String,
    // `exploded[0]` stands in for the traversal letter and is always 0.
    exploded: Vec<usize>,
    pdim: usize,
    max_resolution: usize,
    pow2_dims: PointNi,
}

impl Bitmask {
    /// Parses a pattern. Any malformed input yields an invalid (empty) bitmask.
    pub fn from_pattern(pattern: &str) -> Self {
        Self::parse(pattern).unwrap_or_default()
    }

    fn parse(pattern: &str) -> Option<Self> {
        if !pattern.starts_with('V') {
            return None;
        }

        let (regular, repeated) = match pattern.find('{') {
            Some(open) => {
                if !pattern.ends_with("}*") || open + 3 >= pattern.len() {
                    return None;
                }
                (&pattern[..open], &pattern[open + 1..pattern.len() - 2])
            }
            None => (pattern, ""),
        };

        let parse_digits = |s: &str| -> Option<Vec<usize>> {
            s.chars()
                .map(|c| c.to_digit(10).map(|d| d as usize))
                .collect()
        };
        let regular_bits = parse_digits(&regular[1..])?;
        let repeated_bits = parse_digits(repeated)?;
        if regular_bits.len() + 1 > MAX_BITMASK_LEN {
            return None;
        }

        let pdim = regular_bits
            .iter()
            .chain(repeated_bits.iter())
            .map(|&b| b + 1)
            .max()
            .unwrap_or(0);
        if pdim == 0 || pdim > MAX_PDIM {
            return None;
        }

        let mut pow2_dims = PointNi::one(pdim);
        for &bit in regular_bits.iter() {
            pow2_dims[bit] <<= 1;
        }

        let mut exploded = Vec::with_capacity(MAX_BITMASK_LEN);
        exploded.push(0);
        exploded.extend_from_slice(&regular_bits);
        let max_resolution = regular_bits.len();
        if !repeated_bits.is_empty() {
            for &bit in repeated_bits.iter().cycle() {
                if exploded.len() >= MAX_BITMASK_LEN {
                    break;
                }
                exploded.push(bit);
            }
        }

        Some(Self {
            pattern: pattern.to_string(),
            exploded,
            pdim,
            max_resolution,
            pow2_dims,
        })
    }

    /// Synthesizes a default pattern for an array with shape `dims` (each axis rounded up to a power of 2).
    ///
    /// With `make_regular_as_soon_as_possible`, each step emits the axes in descending order and the whole sequence is
    /// reversed at the end, so the coarse levels refine every axis evenly and the leftover bits of the longer axes come last in
    /// the finest levels. Otherwise each step emits the axes in ascending order with no reversal.
    ///
    /// The caller must check `valid()` on the result: a bad traversal letter or an all-ones `dims` yields an invalid bitmask.
    pub fn guess(letter: char, dims: &PointNi, make_regular_as_soon_as_possible: bool) -> Self {
        let pdim = dims.pdim();
        let mut remaining = dims.map_components(power_of_2_ceil);
        let done = PointNi::one(pdim);

        let mut digits = String::new();
        if make_regular_as_soon_as_possible {
            while remaining != done {
                for d in (0..pdim).rev() {
                    if remaining[d] > 1 {
                        digits.push(digit_char(d));
                        remaining[d] >>= 1;
                    }
                }
            }
            digits = digits.chars().rev().collect();
        } else {
            while remaining != done {
                for d in 0..pdim {
                    if remaining[d] > 1 {
                        digits.push(digit_char(d));
                        remaining[d] >>= 1;
                    }
                }
            }
        }

        Self::from_pattern(&format!("{}{}", letter, digits))
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.pdim > 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[inline]
    pub fn pdim(&self) -> usize {
        self.pdim
    }

    #[inline]
    pub fn max_resolution(&self) -> usize {
        self.max_resolution
    }

    /// The number of steps available through indexing, including repeated steps.
    #[inline]
    pub fn exploded_len(&self) -> usize {
        self.exploded.len()
    }

    #[inline]
    pub fn has_repeated_tail(&self) -> bool {
        self.pattern.contains('{')
    }

    #[inline]
    pub fn pow2_dims(&self) -> PointNi {
        self.pow2_dims
    }

    #[inline]
    pub fn pow2_box(&self) -> BoxNi {
        BoxNi::new(PointNi::zero(self.pdim), self.pow2_dims)
    }

    /// Scales `bx` by the repeated steps between the maximum resolution and `maxh`.
    pub fn upgrade_box(&self, mut bx: BoxNi, maxh: usize) -> BoxNi {
        debug_assert!(maxh >= self.max_resolution);
        for m in (self.max_resolution + 1)..=maxh.min(self.exploded.len() - 1) {
            let bit = self.exploded[m];
            bx.p1[bit] <<= 1;
            bx.p2[bit] <<= 1;
        }

        bx
    }
}

fn digit_char(d: usize) -> char {
    (b'0' + d as u8) as char
}

impl Index<usize> for Bitmask {
    type Output = usize;

    #[inline]
    fn index(&self, i: usize) -> &usize {
        &self.exploded[i]
    }
}

impl fmt::Debug for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmask({:?})", self.pattern)
    }
}

impl fmt::Display for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl From<Bitmask> for String {
    fn from(bitmask: Bitmask) -> Self {
        bitmask.pattern
    }
}

impl TryFrom<String> for Bitmask {
    type Error = String;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        if pattern.is_empty() {
            return Ok(Self::default());
        }
        let bitmask = Self::from_pattern(&pattern);
        if bitmask.valid() {
            Ok(bitmask)
        } else {
            Err(format!("invalid bitmask pattern {:?}", pattern))
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
