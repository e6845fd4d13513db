//! Hierarchical Z-order (HZ) addressing.
//!
//! The Z address of a point interleaves its coordinate bits in the order given by a `Bitmask`, read from the finest step
//! (least significant Z bit) to the coarsest. The HZ address reorders the Z space so that every resolution level is a
//! contiguous range: level 0 is address 0 and level `H >= 1` is `[2^(H-1), 2^H)`. Using the `V0101` bitmask (`maxh = 4`):
//!
//! ```text
//!   H   z pattern   level p1     hz range
//!   0   0000        (0, 0)       [0, 1)
//!   1   1000        (2, 0)       [1, 2)
//!   2   x100        (0, 2)       [2, 4)
//!   3   xx10        (1, 0)       [4, 8)
//!   4   xxx1        (0, 1)       [8, 16)
//! ```

use crate::{Bitmask, BoxNi, LogicSamples, PointNi};

/// Address conversions for one bitmask at one maximum resolution.
///
/// Per-level axis counts are precomputed at construction, so `level_delta` and friends never re-walk the pattern.
#[derive(Clone, Debug)]
pub struct HzOrder {
    bitmask: Bitmask,
    maxh: usize,
    pdim: usize,
    // `counts[h][d]` is the number of refinements of axis `d` in steps `1..=h`.
    counts: Vec<PointNi>,
}

impl HzOrder {
    pub fn new(bitmask: &Bitmask) -> Self {
        Self::with_max_resolution(bitmask, bitmask.max_resolution())
    }

    /// Addresses at a resolution beyond the bitmask's own, using its repeated steps.
    pub fn with_max_resolution(bitmask: &Bitmask, maxh: usize) -> Self {
        debug_assert!(bitmask.valid());
        debug_assert!(maxh < bitmask.exploded_len());

        let pdim = bitmask.pdim();
        let mut counts = Vec::with_capacity(maxh + 1);
        let mut acc = PointNi::zero(pdim);
        counts.push(acc);
        for h in 1..=maxh {
            acc[bitmask[h]] += 1;
            counts.push(acc);
        }

        Self {
            bitmask: bitmask.clone(),
            maxh,
            pdim,
            counts,
        }
    }

    #[inline]
    pub fn bitmask(&self) -> &Bitmask {
        &self.bitmask
    }

    #[inline]
    pub fn max_resolution(&self) -> usize {
        self.maxh
    }

    #[inline]
    pub fn pdim(&self) -> usize {
        self.pdim
    }

    /// Point to Z address.
    pub fn interleave(&self, mut p: PointNi) -> u64 {
        let zero = PointNi::zero(self.pdim);
        let mut z = 0u64;
        let mut h = self.maxh;
        let mut shift = 0;
        while p != zero {
            let bit = self.bitmask[h];
            z |= ((p[bit] & 1) as u64) << shift;
            p[bit] >>= 1;
            shift += 1;
            h -= 1;
        }

        z
    }

    /// Z address to point.
    pub fn deinterleave(&self, mut z: u64) -> PointNi {
        let mut p = PointNi::zero(self.pdim);
        let mut shift = PointNi::zero(self.pdim);
        let mut h = self.maxh;
        while z != 0 {
            let bit = self.bitmask[h];
            if z & 1 == 1 {
                p[bit] |= 1 << shift[bit];
            }
            shift[bit] += 1;
            z >>= 1;
            h -= 1;
        }

        p
    }

    /// The Z address of the first sample of level `h` (the `..xxx..` bits set to 0).
    #[inline]
    pub fn z_start(&self, h: usize) -> u64 {
        debug_assert!(h <= self.maxh);
        if h == 0 {
            0
        } else {
            1 << (self.maxh - h)
        }
    }

    /// The Z address of the last sample of level `h` (the `..xxx..` bits set to 1).
    #[inline]
    pub fn z_end(&self, h: usize) -> u64 {
        debug_assert!(h <= self.maxh);
        if h == 0 {
            0
        } else {
            (1 << self.maxh) - self.z_start(h)
        }
    }

    pub fn z_to_hz(&self, mut z: u64) -> u64 {
        // A "1" enters on the left; shift until a "1" exits on the right.
        z |= 1 << self.maxh;
        while z & 1 == 0 {
            z >>= 1;
        }
        z >> 1
    }

    pub fn hz_to_z(&self, mut hz: u64) -> u64 {
        let last = 1u64 << self.maxh;
        hz = (hz << 1) | 1;
        while hz & last == 0 {
            hz <<= 1;
        }
        hz & (last - 1)
    }

    /// Point to HZ address.
    #[inline]
    pub fn address(&self, p: &PointNi) -> u64 {
        self.z_to_hz(self.interleave(*p))
    }

    /// HZ address to point.
    #[inline]
    pub fn point(&self, hz: u64) -> PointNi {
        self.deinterleave(self.hz_to_z(hz))
    }

    /// The resolution level an HZ address belongs to: its bit length.
    #[inline]
    pub fn address_resolution(hz: u64) -> usize {
        (64 - hz.leading_zeros()) as usize
    }

    pub fn level_p1(&self, h: usize) -> PointNi {
        if h == 0 {
            PointNi::zero(self.pdim)
        } else {
            self.deinterleave(self.z_start(h))
        }
    }

    pub fn level_p2_included(&self, h: usize) -> PointNi {
        if h == 0 {
            PointNi::zero(self.pdim)
        } else {
            self.deinterleave(self.z_end(h))
        }
    }

    /// The distance between neighbouring samples of level `h`: each axis steps by 2 to the number of its refinements that
    /// are still to come after level `h`, counting level `h` itself. Level 0 shares the delta of level 1.
    pub fn level_delta(&self, h: usize) -> PointNi {
        let from = h.max(1) - 1;
        let finest = &self.counts[self.maxh];
        let coarse = &self.counts[from];

        finest.zip_map(coarse, |f, c| 1 << (f - c))
    }

    /// All samples of level `h` as a lattice.
    pub fn level_samples(&self, h: usize) -> LogicSamples {
        let delta = self.level_delta(h);
        let logic_box = BoxNi::new(self.level_p1(h), self.level_p2_included(h) + delta);

        LogicSamples::new(logic_box, delta)
    }

    /// Number of refinements of each axis in steps `1..=h`.
    #[inline]
    pub fn refinements_up_to(&self, h: usize) -> PointNi {
        self.counts[h]
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
