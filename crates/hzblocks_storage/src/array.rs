//! Dense, dynamically typed sample buffers.
//!
//! An `Array` holds `dims.product()` samples of one `DType`, in row-major order with axis 0 contiguous. Both query buffers and
//! block buffers are arrays; a `LogicSamples` says where each pixel of an array lives in the dataset.
//!
//! ```
//! use hzblocks_core::PointNi;
//! use hzblocks_storage::{Array, BaseType, DType};
//!
//! let mut array = Array::filled(PointNi::from_slice(&[4, 2]), DType::scalar(BaseType::I32), 7.0);
//! array.as_mut_slice::<i32>()[5] = 1;
//!
//! assert_eq!(array.nsamples(), 8);
//! assert_eq!(array.as_slice::<i32>()[..6], [7, 7, 7, 7, 7, 1]);
//! ```
//!
//! # Merging
//!
//! `insert_samples` copies every sample that two lattices have in common, and `interpolate_samples` fills a finer lattice from
//! a coarser one by nearest neighbour. Both work on raw sample bytes, so they are independent of the dtype.

mod merge;

pub use merge::{insert_samples, interpolate_samples};

use crate::{with_base_type, DType, IdxError, Result, Sample};

use hzblocks_core::PointNi;

/// A dense row-major buffer of samples with a runtime dtype.
///
/// Storage is a `Vec<u64>` so that typed views of every `BaseType` are always aligned.
#[derive(Clone, Default, PartialEq)]
pub struct Array {
    dims: PointNi,
    dtype: Option<DType>,
    words: Vec<u64>,
    nbytes: usize,
}

impl Array {
    /// A zeroed array.
    pub fn new(dims: PointNi, dtype: DType) -> Self {
        debug_assert!(dims.pdim() > 0 && dims.all(&dims, |d, _| d >= 0));

        let nbytes = dtype.byte_size(dims.product() as usize);
        let nwords = (nbytes + 7) / 8;

        Self {
            dims,
            dtype: Some(dtype),
            words: vec![0; nwords],
            nbytes,
        }
    }

    /// An array with every component set to `value`.
    pub fn filled(dims: PointNi, dtype: DType, value: f64) -> Self {
        let mut array = Self::new(dims, dtype);
        if value != 0.0 {
            array.fill(value);
        }

        array
    }

    /// Copies `bytes`, which must hold exactly `dims.product()` samples.
    pub fn from_bytes(dims: PointNi, dtype: DType, bytes: &[u8]) -> Result<Self> {
        let mut array = Self::new(dims, dtype);
        if bytes.len() != array.nbytes {
            return Err(IdxError::backend(format!(
                "expected {} bytes for {} samples of {}, got {}",
                array.nbytes,
                dims.product(),
                dtype,
                bytes.len()
            )));
        }
        array.as_bytes_mut().copy_from_slice(bytes);

        Ok(array)
    }

    /// An array with dimensions and a dtype. The default array is not valid.
    #[inline]
    pub fn valid(&self) -> bool {
        self.dtype.is_some() && self.dims.pdim() > 0
    }

    #[inline]
    pub fn dims(&self) -> PointNi {
        self.dims
    }

    /// # Panics
    ///
    /// If the array is not `valid`.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype.expect("dtype of an invalid array")
    }

    #[inline]
    pub fn nsamples(&self) -> usize {
        if self.valid() {
            self.dims.product() as usize
        } else {
            0
        }
    }

    #[inline]
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.nbytes]
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let nbytes = self.nbytes;

        &mut bytemuck::cast_slice_mut(&mut self.words)[..nbytes]
    }

    /// All components of all samples, interleaved.
    #[inline]
    pub fn as_slice<T: Sample>(&self) -> &[T] {
        debug_assert_eq!(self.dtype().base(), T::BASE);
        let len = self.nbytes / std::mem::size_of::<T>();

        &bytemuck::cast_slice(&self.words)[..len]
    }

    #[inline]
    pub fn as_mut_slice<T: Sample>(&mut self) -> &mut [T] {
        debug_assert_eq!(self.dtype().base(), T::BASE);
        let len = self.nbytes / std::mem::size_of::<T>();

        &mut bytemuck::cast_slice_mut(&mut self.words)[..len]
    }

    /// Sets every component of every sample.
    pub fn fill(&mut self, value: f64) {
        let base = self.dtype().base();
        with_base_type!(base, T => {
            let v = T::from_f64(value);
            for x in self.as_mut_slice::<T>().iter_mut() {
                *x = v;
            }
        })
    }

    /// Reads component `c` of the sample at row-major index `i`.
    pub fn component_f64(&self, i: usize, c: usize) -> f64 {
        let dtype = self.dtype();
        let n = dtype.ncomponents();
        debug_assert!(c < n);

        with_base_type!(dtype.base(), T => self.as_slice::<T>()[i * n + c].to_f64())
    }

    pub fn set_component_f64(&mut self, i: usize, c: usize, value: f64) {
        let dtype = self.dtype();
        let n = dtype.ncomponents();
        debug_assert!(c < n);

        with_base_type!(dtype.base(), T => self.as_mut_slice::<T>()[i * n + c] = T::from_f64(value))
    }

    /// Reads component `c` of the sample at pixel `p`.
    pub fn get_f64(&self, p: &PointNi, c: usize) -> f64 {
        self.component_f64(self.dims.stride().inner_product(p) as usize, c)
    }

    /// A copy without the last component. Arrays with a single component are returned unchanged.
    pub fn drop_last_component(&self) -> Self {
        let dtype = self.dtype();
        let n = dtype.ncomponents();
        if n <= 1 {
            return self.clone();
        }

        let mut out = Self::new(self.dims, dtype.with_ncomponents(n - 1));
        let src_sample = dtype.bytes_per_sample();
        let dst_sample = out.dtype().bytes_per_sample();
        let src = self.as_bytes();
        for (i, dst) in out.as_bytes_mut().chunks_exact_mut(dst_sample).enumerate() {
            dst.copy_from_slice(&src[i * src_sample..i * src_sample + dst_sample]);
        }

        out
    }
}

impl core::fmt::Debug for Array {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Array")
            .field("dims", &self.dims)
            .field("dtype", &self.dtype)
            .field("nbytes", &self.nbytes)
            .finish()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
