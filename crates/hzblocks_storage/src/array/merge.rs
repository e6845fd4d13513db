use crate::{Aborted, Array};

use hzblocks_core::{align_right, is_aligned, least_common_multiple, LogicSamples, PointNi};

/// Copies into `write` every sample of `read` whose logic position also lies on the `write` lattice.
///
/// Both arrays must have the same dtype and match the sample counts of their lattices. Returns `false` when the lattices have no
/// point in common, when the inputs are inconsistent, or when `aborted` fires midway (then `write` is partially updated).
pub fn insert_samples(
    write: &mut Array,
    wsamples: &LogicSamples,
    read: &Array,
    rsamples: &LogicSamples,
    aborted: &Aborted,
) -> bool {
    if !buffers_match(write, wsamples, read, rsamples) {
        return false;
    }

    let pdim = wsamples.pdim();
    let mut common = wsamples.logic_box.intersection(&rsamples.logic_box);
    if !common.is_full_dim() {
        return false;
    }

    // Walk each axis to the first point on both lattices; from there they meet every lcm.
    let mut delta = PointNi::zero(pdim);
    for d in 0..pdim {
        let (w0, wd) = (wsamples.logic_box.p1[d], wsamples.delta[d]);
        let (r0, rd) = (rsamples.logic_box.p1[d], rsamples.delta[d]);
        let lcm = least_common_multiple(wd, rd);

        let start = common.p1[d];
        let end = common.p2[d];
        let mut p1 = start;
        while !is_aligned(p1, w0, wd) || !is_aligned(p1, r0, rd) {
            p1 = align_right(p1, w0, wd);
            p1 = align_right(p1, r0, rd);
            if p1 >= end || p1 - start >= lcm {
                return false;
            }
        }
        if p1 >= end {
            return false;
        }

        common.p1[d] = p1;
        common.p2[d] = align_right(end, p1, lcm);
        delta[d] = lcm;
    }

    let wdims = write.dims();
    let rdims = read.dims();
    let wfrom = wsamples.logic_to_pixel(&common.p1);
    let wto = wsamples.logic_to_pixel(&common.p2).meet(&wdims);
    let wstep = delta.right_shift(&wsamples.shift).meet(&wdims);
    let rfrom = rsamples.logic_to_pixel(&common.p1);
    let rto = rsamples.logic_to_pixel(&common.p2).meet(&rdims);
    let rstep = delta.right_shift(&rsamples.shift).meet(&rdims);

    let count = |from: i64, to: i64, step: i64| (to - from + step - 1) / step;
    let mut n = PointNi::zero(pdim);
    for d in 0..pdim {
        n[d] = count(wfrom[d], wto[d], wstep[d]).min(count(rfrom[d], rto[d], rstep[d]));
        if n[d] <= 0 {
            return false;
        }
    }

    let bps = write.dtype().bytes_per_sample() as i64;
    let wstride = wdims.stride();
    let rstride = rdims.stride();
    let contiguous = wstep[0] == 1 && rstep[0] == 1;

    let mut rows = n;
    rows[0] = 1;
    let src = read.as_bytes();
    let dst = write.as_bytes_mut();
    for k in PointNi::iter_range(PointNi::zero(pdim), rows, PointNi::one(pdim)) {
        if aborted.is_aborted() {
            return false;
        }

        let wrow = (wfrom + k * wstep).inner_product(&wstride);
        let rrow = (rfrom + k * rstep).inner_product(&rstride);
        if contiguous {
            let (w, r, len) = ((wrow * bps) as usize, (rrow * bps) as usize, (n[0] * bps) as usize);
            dst[w..w + len].copy_from_slice(&src[r..r + len]);
        } else {
            for i in 0..n[0] {
                let w = ((wrow + i * wstep[0]) * bps) as usize;
                let r = ((rrow + i * rstep[0]) * bps) as usize;
                let bps = bps as usize;
                dst[w..w + bps].copy_from_slice(&src[r..r + bps]);
            }
        }
    }

    true
}

/// Fills all of `write` from `read` by nearest neighbour: each write pixel takes the read sample at or just before its logic
/// position, clamped to the read buffer.
pub fn interpolate_samples(
    write: &mut Array,
    wsamples: &LogicSamples,
    read: &Array,
    rsamples: &LogicSamples,
    aborted: &Aborted,
) -> bool {
    if !buffers_match(write, wsamples, read, rsamples) {
        return false;
    }

    let pdim = wsamples.pdim();
    let wdims = write.dims();
    let rdims = read.dims();

    // The mapping is separable, so precompute it per axis.
    let maps: Vec<Vec<i64>> = (0..pdim)
        .map(|d| {
            (0..wdims[d])
                .map(|wpix| {
                    let logic = wsamples.logic_box.p1[d] + (wpix << wsamples.shift[d]);
                    ((logic - rsamples.logic_box.p1[d]) >> rsamples.shift[d])
                        .max(0)
                        .min(rdims[d] - 1)
                })
                .collect()
        })
        .collect();

    let bps = write.dtype().bytes_per_sample();
    let rstride = rdims.stride();
    let mut rows = wdims;
    rows[0] = 1;
    let src = read.as_bytes();
    let dst = write.as_bytes_mut();
    let mut w = 0;
    for k in PointNi::iter_range(PointNi::zero(pdim), rows, PointNi::one(pdim)) {
        if aborted.is_aborted() {
            return false;
        }

        let mut rrow = 0;
        for d in 1..pdim {
            rrow += maps[d][k[d] as usize] * rstride[d];
        }
        for &rx in maps[0].iter() {
            let r = (rrow + rx) as usize * bps;
            dst[w..w + bps].copy_from_slice(&src[r..r + bps]);
            w += bps;
        }
    }

    true
}

fn buffers_match(
    write: &Array,
    wsamples: &LogicSamples,
    read: &Array,
    rsamples: &LogicSamples,
) -> bool {
    write.valid()
        && read.valid()
        && write.dtype() == read.dtype()
        && wsamples.valid()
        && rsamples.valid()
        && write.dims() == wsamples.nsamples
        && read.dims() == rsamples.nsamples
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
