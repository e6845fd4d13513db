//! Block addressing.
//!
//! Block `b` holds the HZ addresses `[b << bitsperblock, (b + 1) << bitsperblock)`. Since level `H >= 1` is the HZ range
//! `[2^(H-1), 2^H)`, block 0 holds every level up to `bitsperblock` and every other block lies on a single level. Using the
//! `V0101` bitmask with 2 bits per block:
//!
//! ```text
//!   block   hz range   levels   samples
//!   0       [0, 4)     0 1 2    (0,0) (2,0) (0,2) (2,2)
//!   1       [4, 8)     3        (1,0) (3,0) (1,2) (3,2)
//!   2       [8, 12)    4        (0,1) (1,1) (0,3) (1,3)
//!   3       [12, 16)   4        (2,1) (3,1) (2,3) (3,3)
//! ```
//!
//! Each block is a dense lattice (see `block_samples`), so a decoded block is a plain row-major `Array`. On storage the samples
//! may instead be kept in HZ order, and `hz_permutation` maps between the two.

use crate::{Aborted, IdxError, Layout, Result};

use hzblocks_core::{BoxNi, HzOrder, LogicSamples};

/// The lattice of samples held by `blockid`.
pub fn block_samples(hzorder: &HzOrder, bitsperblock: usize, blockid: u64) -> LogicSamples {
    let hzfrom = blockid << bitsperblock;
    let hzto = (blockid + 1) << bitsperblock;

    let delta = if blockid == 0 {
        // Levels 0..=bitsperblock interleave into one lattice, finer than the last of them along its axis.
        let mut delta = hzorder.level_delta(bitsperblock);
        if bitsperblock > 0 {
            let bit = hzorder.bitmask()[bitsperblock];
            delta[bit] >>= 1;
        }
        delta
    } else {
        hzorder.level_delta(HzOrder::address_resolution(hzfrom))
    };

    let logic_box = BoxNi::new(hzorder.point(hzfrom), hzorder.point(hzto - 1) + delta);

    LogicSamples::new(logic_box, delta)
}

/// For each encoded position `i` of a block stored in HZ order, the row-major index of the same sample.
pub fn hz_permutation(
    hzorder: &HzOrder,
    bitsperblock: usize,
    blockid: u64,
    samples: &LogicSamples,
) -> Vec<usize> {
    let hzfrom = blockid << bitsperblock;
    let stride = samples.nsamples.stride();

    (0..1u64 << bitsperblock)
        .map(|i| {
            let pixel = samples.logic_to_pixel(&hzorder.point(hzfrom + i));
            pixel.inner_product(&stride) as usize
        })
        .collect()
}

/// Reorders the samples of a row-major block into `layout`.
pub fn encode_layout(
    layout: Layout,
    hzorder: &HzOrder,
    bitsperblock: usize,
    blockid: u64,
    samples: &LogicSamples,
    bytes_per_sample: usize,
    row_major: &[u8],
) -> Vec<u8> {
    match layout {
        Layout::RowMajor => row_major.to_vec(),
        Layout::HzOrder => {
            let permutation = hz_permutation(hzorder, bitsperblock, blockid, samples);
            let mut encoded = vec![0; row_major.len()];
            for (dst, src) in encoded.chunks_exact_mut(bytes_per_sample).zip(permutation) {
                let src = src * bytes_per_sample;
                dst.copy_from_slice(&row_major[src..src + bytes_per_sample]);
            }
            encoded
        }
    }
}

/// Reorders the samples of a block stored in `layout` into row-major order.
pub fn decode_layout(
    layout: Layout,
    hzorder: &HzOrder,
    bitsperblock: usize,
    blockid: u64,
    samples: &LogicSamples,
    bytes_per_sample: usize,
    encoded: &[u8],
) -> Vec<u8> {
    match layout {
        Layout::RowMajor => encoded.to_vec(),
        Layout::HzOrder => {
            let permutation = hz_permutation(hzorder, bitsperblock, blockid, samples);
            let mut row_major = vec![0; encoded.len()];
            for (src, dst) in encoded.chunks_exact(bytes_per_sample).zip(permutation) {
                let dst = dst * bytes_per_sample;
                row_major[dst..dst + bytes_per_sample].copy_from_slice(src);
            }
            row_major
        }
    }
}

/// The blocks holding the samples of levels `from_resolution..=end_resolution` inside `logic_box`, in increasing order.
///
/// Each level is a binary kd-tree over its HZ range, split along `bitmask[h]` at depth `h`. Subtrees that miss the box are
/// skipped whole; a subtree of `bitsperblock` levels is exactly one block. Block 0 covers every level up to `bitsperblock`, so
/// finding it moves the traversal past them.
pub fn required_blocks(
    hzorder: &HzOrder,
    bitsperblock: usize,
    logic_box: &BoxNi,
    from_resolution: usize,
    end_resolution: usize,
    aborted: &Aborted,
) -> Result<Vec<u64>> {
    let bitmask = hzorder.bitmask();

    let half_deltas: Vec<i64> = (0..=end_resolution)
        .map(|h| {
            if h > 0 {
                hzorder.level_delta(h)[bitmask[h]] >> 1
            } else {
                0
            }
        })
        .collect();

    let mut blocks = Vec::new();
    let mut stack: Vec<(BoxNi, usize)> = Vec::new();
    let mut level = from_resolution;
    while level <= end_resolution {
        if aborted.is_aborted() {
            return Err(IdxError::Aborted);
        }

        let samples = hzorder.level_samples(level);
        let user_box = samples.align_box(logic_box);
        if !user_box.is_full_dim() {
            level += 1;
            continue;
        }

        let mut hz = hzorder.address(&samples.logic_box.p1);
        stack.clear();
        stack.push((samples.logic_box, if level > 0 { 1 } else { 0 }));
        while let Some((bx, h)) = stack.pop() {
            if !bx.strictly_intersects(&user_box) {
                hz += 1 << (level - h);
                continue;
            }

            if level - h <= bitsperblock {
                let blockid = hz >> bitsperblock;
                blocks.push(blockid);
                if blockid == 0 {
                    level = bitsperblock;
                    break;
                }
                hz += 1 << (level - h);
                continue;
            }

            let bit = bitmask[h];
            let d = half_deltas[h];
            let mut upper = bx;
            upper.p1[bit] += d;
            let mut lower = bx;
            lower.p2[bit] -= d;
            stack.push((upper, h + 1));
            stack.push((lower, h + 1));
        }

        level += 1;
    }

    Ok(blocks)
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

    use hzblocks_core::{Bitmask, PointNi};
    use pretty_assertions::assert_eq;

    fn v0101() -> HzOrder {
        HzOrder::new(&Bitmask::from_pattern("V0101"))
    }

    fn bx(p1: &[i64], p2: &[i64]) -> BoxNi {
        BoxNi::new(PointNi::from_slice(p1), PointNi::from_slice(p2))
    }

    #[test]
    fn block_lattices() {
        let hz = v0101();

        let b0 = block_samples(&hz, 2, 0);
        assert_eq!(b0.logic_box, bx(&[0, 0], &[4, 4]));
        assert_eq!(b0.delta, PointNi::from_slice(&[2, 2]));

        let b1 = block_samples(&hz, 2, 1);
        assert_eq!(b1.logic_box, bx(&[1, 0], &[5, 4]));
        assert_eq!(b1.delta, PointNi::from_slice(&[2, 2]));

        let b2 = block_samples(&hz, 2, 2);
        assert_eq!(b2.logic_box, bx(&[0, 1], &[2, 5]));
        assert_eq!(b2.delta, PointNi::from_slice(&[1, 2]));

        for b in 0..4 {
            assert_eq!(block_samples(&hz, 2, b).nsamples.product(), 4);
        }
    }

    #[test]
    fn every_block_sample_is_listed_once() {
        let bitmask = Bitmask::from_pattern("V012012012");
        let hz = HzOrder::new(&bitmask);
        let bpb = 4;
        let mut seen = vec![false; 512];
        for b in 0..(1 << (9 - bpb)) {
            let samples = block_samples(&hz, bpb, b);
            let mut pixels: Vec<usize> = hz_permutation(&hz, bpb, b, &samples);
            pixels.sort_unstable();
            assert_eq!(pixels, (0..16).collect::<Vec<_>>());

            for i in 0..16 {
                let p = hz.point((b << bpb) + i);
                let z = (p[0] + 8 * p[1] + 64 * p[2]) as usize;
                assert!(!seen[z]);
                seen[z] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn layouts_are_inverse() {
        let hz = HzOrder::new(&Bitmask::from_pattern("V0011"));
        let samples = block_samples(&hz, 3, 1);
        let row_major: Vec<u8> = (0..16).collect();

        let encoded = encode_layout(Layout::HzOrder, &hz, 3, 1, &samples, 2, &row_major);
        assert_ne!(encoded, row_major);
        assert_eq!(
            decode_layout(Layout::HzOrder, &hz, 3, 1, &samples, 2, &encoded),
            row_major
        );
        assert_eq!(
            encode_layout(Layout::RowMajor, &hz, 3, 1, &samples, 2, &row_major),
            row_major
        );
    }

    #[test]
    fn full_box_needs_every_block() {
        let hz = v0101();
        let blocks = required_blocks(&hz, 2, &bx(&[0, 0], &[4, 4]), 0, 4, &Aborted::new()).unwrap();

        assert_eq!(blocks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn thin_box_skips_blocks() {
        let hz = v0101();
        let blocks = required_blocks(&hz, 2, &bx(&[0, 0], &[1, 4]), 0, 4, &Aborted::new()).unwrap();

        assert_eq!(blocks, vec![0, 2]);
    }

    #[test]
    fn coarse_levels_stop_at_block_zero() {
        let hz = v0101();
        let all = bx(&[0, 0], &[4, 4]);

        assert_eq!(required_blocks(&hz, 2, &all, 0, 2, &Aborted::new()).unwrap(), vec![0]);
        assert_eq!(required_blocks(&hz, 2, &all, 3, 3, &Aborted::new()).unwrap(), vec![1]);
        assert_eq!(required_blocks(&hz, 2, &all, 4, 4, &Aborted::new()).unwrap(), vec![2, 3]);
    }

    #[test]
    fn abort_stops_traversal() {
        let hz = v0101();
        let aborted = Aborted::new();
        aborted.abort();

        assert!(matches!(
            required_blocks(&hz, 2, &bx(&[0, 0], &[4, 4]), 0, 4, &aborted),
            Err(IdxError::Aborted)
        ));
    }
}
