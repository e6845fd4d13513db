//! Filters that turn pairs of neighbouring samples into a coarse value and a detail.
//!
//! When a field carries a filter, the dataset is transformed fine to coarse (`Dataset::compute_filter`): at each level `H`
//! every pair of samples one level-`H` step apart along `bitmask[H]` becomes `(coarse, detail)`, with the coarse value at the
//! position of the coarser level. A filtered read then rebuilds the original samples level by level with the inverse
//! transform, so a coarse read of a filtered dataset gets averages (or minima, maxima...) instead of subsampled values.
//!
//! The pair transform is a `FilterKernel` over the Rust sample type. `KernelFilter` walks a query buffer and applies a kernel
//! to every pair of the current level, and is what `create_filter` hands out behind the object-safe `Filter`.

use crate::{Array, BaseType, Field, Query, Sample};

use hzblocks_core::{align_left, Bitmask, BoxNi, PointNi};
use std::convert::TryFrom;
use std::marker::PhantomData;
use std::sync::Arc;

/// A transform of one pair of samples. `va` and `vb` hold every component of one sample each.
pub trait FilterKernel<T>: Send + Sync {
    fn apply_direct(&self, va: &mut [T], vb: &mut [T]);

    fn apply_inverse(&self, va: &mut [T], vb: &mut [T]);
}

/// A filter bound to the bitmask of a dataset and the dtype of a field.
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Samples per filter window.
    fn size(&self) -> usize {
        2
    }

    /// Returns `true` iff the last component of every sample is reserved for the filter's bookkeeping.
    fn needs_extra_component(&self) -> bool;

    /// Per axis, the extent in logic coordinates of one filter window at level `h`.
    fn filter_step(&self, h: usize) -> PointNi;

    /// Transforms every complete window of the query's current resolution inside its filter domain. Returns `false` when the
    /// query was aborted midway.
    fn compute_filter(&self, query: &mut Query, inverse: bool) -> bool;

    fn drop_extra_component_if_exists(&self, array: &Array) -> Array {
        if self.needs_extra_component() {
            array.drop_last_component()
        } else {
            array.clone()
        }
    }
}

/// The filter named by `field.filter`, or `None` when the field has no filter or the filter does not support its dtype.
pub fn create_filter(field: &Field, bitmask: &Bitmask) -> Option<Arc<dyn Filter>> {
    let name = field.filter.trim();
    if name.is_empty() {
        return None;
    }

    let base = field.dtype.base();
    let ncomponents = field.dtype.ncomponents();
    let filter: Option<Arc<dyn Filter>> = match (name, base) {
        ("identity", BaseType::U8) => Some(kernel_filter::<u8, _>("identity", bitmask, Identity, false)),
        ("identity", BaseType::U16) => Some(kernel_filter::<u16, _>("identity", bitmask, Identity, false)),
        ("identity", BaseType::I64) => Some(kernel_filter::<i64, _>("identity", bitmask, Identity, false)),
        ("identity", BaseType::F32) => Some(kernel_filter::<f32, _>("identity", bitmask, Identity, false)),
        ("identity", BaseType::F64) => Some(kernel_filter::<f64, _>("identity", bitmask, Identity, false)),

        ("min", _) | ("max", _) if !has_sign_component(base, ncomponents) => None,
        ("min", BaseType::U8) => Some(kernel_filter::<u8, _>("min", bitmask, Min::new(ncomponents), true)),
        ("min", BaseType::U16) => Some(kernel_filter::<u16, _>("min", bitmask, Min::new(ncomponents), true)),
        ("min", BaseType::I64) => Some(kernel_filter::<i64, _>("min", bitmask, Min::new(ncomponents), true)),
        ("min", BaseType::F32) => Some(kernel_filter::<f32, _>("min", bitmask, Min::new(ncomponents), true)),
        ("min", BaseType::F64) => Some(kernel_filter::<f64, _>("min", bitmask, Min::new(ncomponents), true)),
        ("max", BaseType::U8) => Some(kernel_filter::<u8, _>("max", bitmask, Max::new(ncomponents), true)),
        ("max", BaseType::U16) => Some(kernel_filter::<u16, _>("max", bitmask, Max::new(ncomponents), true)),
        ("max", BaseType::I64) => Some(kernel_filter::<i64, _>("max", bitmask, Max::new(ncomponents), true)),
        ("max", BaseType::F32) => Some(kernel_filter::<f32, _>("max", bitmask, Max::new(ncomponents), true)),
        ("max", BaseType::F64) => Some(kernel_filter::<f64, _>("max", bitmask, Max::new(ncomponents), true)),

        ("wavelet", _) | ("dehaar", _) | ("discretedehaar", _)
            if !base.is_float() && !has_sign_component(base, ncomponents) =>
        {
            None
        }
        ("wavelet", BaseType::U8) | ("dehaar", BaseType::U8) | ("discretedehaar", BaseType::U8) => Some(
            kernel_filter::<u8, _>("discretedehaar", bitmask, DeHaarDiscrete::new(ncomponents), true),
        ),
        ("wavelet", BaseType::U16) | ("dehaar", BaseType::U16) | ("discretedehaar", BaseType::U16) => Some(
            kernel_filter::<u16, _>("discretedehaar", bitmask, DeHaarDiscrete::new(ncomponents), true),
        ),
        ("wavelet", BaseType::F32) | ("dehaar", BaseType::F32) | ("continuousdehaar", BaseType::F32) => Some(
            kernel_filter::<f32, _>("continuousdehaar", bitmask, DeHaarContinuous, false),
        ),
        ("wavelet", BaseType::F64) | ("dehaar", BaseType::F64) | ("continuousdehaar", BaseType::F64) => Some(
            kernel_filter::<f64, _>("continuousdehaar", bitmask, DeHaarContinuous, false),
        ),
        _ => None,
    };

    if filter.is_none() {
        tracing::warn!(
            filter = name,
            field = %field.name,
            dtype = %field.dtype,
            "cannot create filter, disabling filters"
        );
    }

    filter
}

/// Filters with a sign component need one bit of it per data component.
fn has_sign_component(base: BaseType, ncomponents: usize) -> bool {
    ncomponents >= 2 && ncomponents - 1 <= 8 * base.size_in_bytes()
}

fn kernel_filter<T, K>(name: &'static str, bitmask: &Bitmask, kernel: K, extra_component: bool) -> Arc<dyn Filter>
where
    T: Sample,
    K: FilterKernel<T> + 'static,
{
    Arc::new(KernelFilter::<T, K>::new(name, bitmask.clone(), kernel, extra_component))
}

/// Grows `user_box` to whole filter windows of level `h`, within `domain`.
pub fn adjust_filter_box(filter: &dyn Filter, domain: &BoxNi, user_box: &BoxNi, h: usize) -> BoxNi {
    let mut bx = user_box.intersection(domain);
    if !bx.is_full_dim() {
        return bx;
    }

    let filterstep = filter.filter_step(h);
    for d in 0..bx.pdim() {
        let fs = filterstep[d];
        if fs == 1 {
            continue;
        }
        bx.p1[d] = align_left(bx.p1[d], 0, fs);
        bx.p2[d] = align_left(bx.p2[d] - 1, 0, fs) + fs;
    }

    bx.intersection(domain)
}

/// Applies a `FilterKernel` to the windows of a query buffer holding samples of type `T`.
pub struct KernelFilter<T, K> {
    name: &'static str,
    bitmask: Bitmask,
    kernel: K,
    extra_component: bool,
    marker: PhantomData<fn() -> T>,
}

impl<T, K> KernelFilter<T, K> {
    pub fn new(name: &'static str, bitmask: Bitmask, kernel: K, extra_component: bool) -> Self {
        Self {
            name,
            bitmask,
            kernel,
            extra_component,
            marker: PhantomData,
        }
    }
}

impl<T, K> Filter for KernelFilter<T, K>
where
    T: Sample,
    K: FilterKernel<T>,
{
    fn name(&self) -> &str {
        self.name
    }

    fn needs_extra_component(&self) -> bool {
        self.extra_component
    }

    /// ```text
    /// V000, size 2 ('-' joins a window)
    ///   H=0  step 8  filterstep 16   00
    ///   H=1  step 4  filterstep 8    00----------04
    ///   H=2  step 2  filterstep 4    00----02    04----06
    ///   H=3  step 1  filterstep 2    00-01 02-03 04-05 06-07
    /// ```
    fn filter_step(&self, h: usize) -> PointNi {
        let pdim = self.bitmask.pdim();
        let maxh = self.bitmask.max_resolution();
        let mut step = self
            .bitmask
            .upgrade_box(self.bitmask.pow2_box(), maxh)
            .shape();
        for k in 0..h {
            if k == 0 {
                step = step.right_shift(&PointNi::one(pdim));
            } else {
                step[self.bitmask[k]] >>= 1;
            }
        }

        let size = self.size() as i64;
        step.map_components(|s| (s * size).max(1))
    }

    fn compute_filter(&self, query: &mut Query, inverse: bool) -> bool {
        if query.cur_resolution <= 0 || !query.buffer.valid() {
            return true;
        }
        debug_assert_eq!(query.buffer.dtype().base(), T::BASE);

        let h = query.cur_resolution as usize;
        let bit = self.bitmask[h];
        let size = self.size() as i64;
        let samples = *query.logic_samples();
        let dims = samples.nsamples;
        if dims[bit] < size {
            return true;
        }

        // Only whole windows inside the domain take part.
        let filterstep = self.filter_step(h);
        let mut bx = samples.logic_box.intersection(&query.filter.domain);
        if !bx.is_full_dim() {
            return true;
        }
        for d in 0..bx.pdim() {
            let fs = filterstep[d];
            if fs == 1 {
                continue;
            }
            let mut p1 = align_left(bx.p1[d], 0, fs);
            let mut p2_incl = align_left(bx.p2[d] - 1, 0, fs);
            if d == bit {
                p2_incl += fs - fs / size;
            }
            if p1 < bx.p1[d] {
                p1 += fs;
            }
            if p2_incl >= bx.p2[d] {
                p2_incl -= fs;
            }
            bx.p1[d] = p1;
            bx.p2[d] = p2_incl + samples.delta[d];
        }
        if !bx.is_full_dim() {
            return true;
        }

        let from = samples.logic_to_pixel(&bx.p1);
        let mut to = samples.logic_to_pixel(&bx.p2);
        let mut step = filterstep
            .right_shift(&samples.shift)
            .map_components(|s| s.max(1));

        // The loop along the filtered axis is innermost.
        let (from_bit, to_bit, step_bit) = (from[bit], to[bit], step[bit]);
        to[bit] = from_bit + 1;
        step[bit] = 1;

        let ncomponents = query.field.dtype.ncomponents();
        let stride = dims.stride();
        let window = step_bit as usize * ncomponents * stride[bit] as usize;
        let next = window / size as usize;

        let aborted = query.aborted.clone();
        let values = query.buffer.as_mut_slice::<T>();
        for loc in PointNi::iter_range(from, to, step) {
            if aborted.is_aborted() {
                return false;
            }

            let mut va = ncomponents * stride.inner_product(&loc) as usize;
            let mut l = from_bit;
            while l < to_bit {
                let (head, tail) = values.split_at_mut(va + next);
                let a = &mut head[va..va + ncomponents];
                let b = &mut tail[..ncomponents];
                if inverse {
                    self.kernel.apply_inverse(a, b);
                } else {
                    self.kernel.apply_direct(a, b);
                }
                va += window;
                l += step_bit;
            }
        }

        true
    }
}

/// Leaves both samples unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<T: Sample> FilterKernel<T> for Identity {
    fn apply_direct(&self, _va: &mut [T], _vb: &mut [T]) {}

    fn apply_inverse(&self, _va: &mut [T], _vb: &mut [T]) {}
}

/// Keeps the minimum in `va` and the maximum in `vb`. Bit `n` of the last component of `vb` records a swap of component `n`.
#[derive(Clone, Copy, Debug)]
pub struct Min {
    ncomponents: usize,
}

impl Min {
    pub fn new(ncomponents: usize) -> Self {
        Self { ncomponents }
    }
}

/// Keeps the maximum in `va` and the minimum in `vb`, recording swaps like `Min`.
#[derive(Clone, Copy, Debug)]
pub struct Max {
    ncomponents: usize,
}

impl Max {
    pub fn new(ncomponents: usize) -> Self {
        Self { ncomponents }
    }
}

fn sort_pair<T: Sample>(ncomponents: usize, va: &mut [T], vb: &mut [T], min_first: bool) {
    let last = ncomponents - 1;
    let mut sign_b = T::default();
    for n in 0..last {
        let (a, b) = (va[n], vb[n]);
        let (lo, hi) = if b < a { (b, a) } else { (a, b) };
        let (first, second) = if min_first { (lo, hi) } else { (hi, lo) };
        if first != a {
            set_bit(&mut sign_b, n);
        }
        va[n] = first;
        vb[n] = second;
    }
    va[last] = T::default();
    vb[last] = sign_b;
}

fn unsort_pair<T: Sample>(ncomponents: usize, va: &mut [T], vb: &mut [T]) {
    let last = ncomponents - 1;
    let sign_b = vb[last];
    for n in 0..last {
        if get_bit(&sign_b, n) {
            std::mem::swap(&mut va[n], &mut vb[n]);
        }
    }
    va[last] = T::default();
    vb[last] = T::default();
}

impl<T: Sample> FilterKernel<T> for Min {
    fn apply_direct(&self, va: &mut [T], vb: &mut [T]) {
        sort_pair(self.ncomponents, va, vb, true);
    }

    fn apply_inverse(&self, va: &mut [T], vb: &mut [T]) {
        unsort_pair(self.ncomponents, va, vb);
    }
}

impl<T: Sample> FilterKernel<T> for Max {
    fn apply_direct(&self, va: &mut [T], vb: &mut [T]) {
        sort_pair(self.ncomponents, va, vb, false);
    }

    fn apply_inverse(&self, va: &mut [T], vb: &mut [T]) {
        unsort_pair(self.ncomponents, va, vb);
    }
}

/// Lossless integer Haar transform: `va = (a + b) >> 1`, `vb = |a - b|`, with the sign of `a - b` in bit `n` of the last
/// component of `vb`.
#[derive(Clone, Copy, Debug)]
pub struct DeHaarDiscrete {
    ncomponents: usize,
}

impl DeHaarDiscrete {
    pub fn new(ncomponents: usize) -> Self {
        Self { ncomponents }
    }
}

impl<T> FilterKernel<T> for DeHaarDiscrete
where
    T: Sample + Into<i32> + TryFrom<i32>,
{
    fn apply_direct(&self, va: &mut [T], vb: &mut [T]) {
        let last = self.ncomponents - 1;
        let mut sign_b = T::default();
        for n in 0..last {
            let a: i32 = va[n].into();
            let b: i32 = vb[n].into();
            let low = (a + b) >> 1;
            let mut high = a - b;
            if high < 0 {
                high = -high;
                set_bit(&mut sign_b, n);
            }
            va[n] = T::try_from(low).unwrap_or_default();
            vb[n] = T::try_from(high).unwrap_or_default();
        }
        va[last] = T::default();
        vb[last] = sign_b;
    }

    fn apply_inverse(&self, va: &mut [T], vb: &mut [T]) {
        let last = self.ncomponents - 1;
        let sign_b = vb[last];
        for n in 0..last {
            let low: i32 = va[n].into();
            let high: i32 = vb[n].into();
            let signed = if get_bit(&sign_b, n) { -high } else { high };
            let twice = (low << 1) + (high & 1);
            va[n] = T::try_from((twice + signed) >> 1).unwrap_or_default();
            vb[n] = T::try_from((twice - signed) >> 1).unwrap_or_default();
        }
        va[last] = T::default();
        vb[last] = T::default();
    }
}

/// Floating point Haar transform: `va = (a + b) / 2`, `vb = (a - b) / 2`, on every component.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeHaarContinuous;

macro_rules! impl_dehaar_continuous {
    ($t:ty) => {
        impl FilterKernel<$t> for DeHaarContinuous {
            fn apply_direct(&self, va: &mut [$t], vb: &mut [$t]) {
                for (a, b) in va.iter_mut().zip(vb.iter_mut()) {
                    let (low, high) = (0.5 * (*a + *b), 0.5 * (*a - *b));
                    *a = low;
                    *b = high;
                }
            }

            fn apply_inverse(&self, va: &mut [$t], vb: &mut [$t]) {
                for (a, b) in va.iter_mut().zip(vb.iter_mut()) {
                    let (low, high) = (*a, *b);
                    *a = low + high;
                    *b = low - high;
                }
            }
        }
    };
}

impl_dehaar_continuous!(f32);
impl_dehaar_continuous!(f64);

fn set_bit<T: Sample>(value: &mut T, n: usize) {
    bytemuck::bytes_of_mut(value)[n >> 3] |= 1 << (n & 7);
}

fn get_bit<T: Sample>(value: &T, n: usize) -> bool {
    bytemuck::bytes_of(value)[n >> 3] & (1 << (n & 7)) != 0
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
    use crate::{DType, IoMode};

    use hzblocks_core::LogicSamples;
    use pretty_assertions::assert_eq;

    fn field(dtype: &str, filter: &str) -> Field {
        Field::new("data", dtype.parse().unwrap()).with_filter(filter)
    }

    #[test]
    fn filter_names_and_dtypes() {
        let bitmask = Bitmask::from_pattern("V01");
        let name = |dtype: &str, filter: &str| create_filter(&field(dtype, filter), &bitmask).map(|f| f.name().to_string());

        assert_eq!(name("uint8", ""), None);
        assert_eq!(name("uint8", "identity").as_deref(), Some("identity"));
        assert_eq!(name("uint8[2]", "dehaar").as_deref(), Some("discretedehaar"));
        assert_eq!(name("float32", "wavelet").as_deref(), Some("continuousdehaar"));
        assert_eq!(name("float64", "continuousdehaar").as_deref(), Some("continuousdehaar"));
        assert_eq!(name("uint16[3]", "max").as_deref(), Some("max"));
        assert_eq!(name("int64", "identity").as_deref(), Some("identity"));
        assert_eq!(name("int64[2]", "min").as_deref(), Some("min"));
        assert_eq!(name("int64[2]", "max").as_deref(), Some("max"));
        assert_eq!(name("int64[2]", "dehaar"), None);

        // No room for the sign bits.
        assert_eq!(name("uint8", "dehaar"), None);
        assert_eq!(name("uint8", "min"), None);
        // Unsupported dtypes and unknown names.
        assert_eq!(name("int32", "identity"), None);
        assert_eq!(name("float32", "discretedehaar"), None);
        assert_eq!(name("uint8", "lanczos"), None);
    }

    #[test]
    fn filter_steps_of_v0101() {
        let filter = create_filter(&field("uint8", "identity"), &Bitmask::from_pattern("V0101")).unwrap();
        let step = |h| Vec::<i64>::from(filter.filter_step(h));

        assert_eq!(step(0), vec![8, 8]);
        assert_eq!(step(1), vec![4, 4]);
        assert_eq!(step(2), vec![2, 4]);
        assert_eq!(step(3), vec![2, 2]);
        assert_eq!(step(4), vec![1, 2]);
    }

    #[test]
    fn discrete_dehaar_is_lossless() {
        let kernel = DeHaarDiscrete::new(3);
        for &(a0, b0, a1, b1) in [(3u8, 6u8, 200u8, 7u8), (0, 255, 255, 0), (9, 9, 1, 2)].iter() {
            let mut va = [a0, a1, 0];
            let mut vb = [b0, b1, 0];
            FilterKernel::<u8>::apply_direct(&kernel, &mut va, &mut vb);
            assert_eq!(va[0], ((a0 as i32 + b0 as i32) >> 1) as u8);
            FilterKernel::<u8>::apply_inverse(&kernel, &mut va, &mut vb);
            assert_eq!((va, vb), ([a0, a1, 0], [b0, b1, 0]));
        }
    }

    #[test]
    fn min_max_remember_swaps() {
        let mut va = [5u16, 1, 0];
        let mut vb = [2u16, 8, 0];
        FilterKernel::<u16>::apply_direct(&Min::new(3), &mut va, &mut vb);
        assert_eq!(va, [2, 1, 0]);
        assert_eq!(vb, [5, 8, 0b01]);
        FilterKernel::<u16>::apply_inverse(&Min::new(3), &mut va, &mut vb);
        assert_eq!((va, vb), ([5, 1, 0], [2, 8, 0]));

        let mut va = [-9i64, 0];
        let mut vb = [-7i64, 0];
        FilterKernel::<i64>::apply_direct(&Max::new(2), &mut va, &mut vb);
        assert_eq!((va, vb), ([-7, 0], [-9, 1]));
        FilterKernel::<i64>::apply_inverse(&Max::new(2), &mut va, &mut vb);
        assert_eq!((va, vb), ([-9, 0], [-7, 0]));

        let mut va = [5.0f32, 1.0];
        let mut vb = [2.0f32, 0.0];
        FilterKernel::<f32>::apply_direct(&Max::new(2), &mut va, &mut vb);
        assert_eq!(va[0], 5.0);
        assert_eq!(vb[0], 2.0);
        FilterKernel::<f32>::apply_inverse(&Max::new(2), &mut va, &mut vb);
        assert_eq!((va, vb), ([5.0, 0.0], [2.0, 0.0]));
    }

    #[test]
    fn direct_then_inverse_restores_a_query_buffer() {
        // V01 over 2x2; level 2 refines axis 1.
        let bitmask = Bitmask::from_pattern("V01");
        let filter = create_filter(&field("float64", "dehaar"), &bitmask).unwrap();
        let bx = BoxNi::new(PointNi::zero(2), PointNi::fill(2, 2));

        let mut query = Query::new(IoMode::Read, field("float64", "dehaar"), 0.0, bx, bx);
        query.logic_samples = LogicSamples::new(bx, PointNi::one(2));
        query.cur_resolution = 2;
        query.buffer = Array::from_bytes(
            PointNi::fill(2, 2),
            DType::scalar(BaseType::F64),
            bytemuck::cast_slice(&[1.0f64, 2.0, 5.0, 8.0]),
        )
        .unwrap();

        assert!(filter.compute_filter(&mut query, false));
        // Pairs run along axis 1: (1, 5) and (2, 8).
        assert_eq!(query.buffer.as_slice::<f64>(), &[3.0, 5.0, -2.0, -3.0]);

        assert!(filter.compute_filter(&mut query, true));
        assert_eq!(query.buffer.as_slice::<f64>(), &[1.0, 2.0, 5.0, 8.0]);
    }

    #[test]
    fn adjusted_boxes_cover_whole_windows() {
        let bitmask = Bitmask::from_pattern("V000");
        let filter = create_filter(&field("uint8", "identity"), &bitmask).unwrap();
        let domain = BoxNi::new(PointNi::zero(1), PointNi::fill(1, 8));
        let user = BoxNi::new(PointNi::fill(1, 3), PointNi::fill(1, 5));

        let adjusted = |h| adjust_filter_box(filter.as_ref(), &domain, &user, h);
        assert_eq!(adjusted(3), BoxNi::new(PointNi::fill(1, 2), PointNi::fill(1, 6)));
        assert_eq!(adjusted(2), BoxNi::new(PointNi::fill(1, 0), PointNi::fill(1, 8)));
    }
}
