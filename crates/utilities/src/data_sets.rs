use hzblocks_core::prelude::*;
use hzblocks_storage::{Array, DType, Dataset, Field, IdxFile};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;

/// A layout of one field over `[0, dims)`, with the bitmask guessed from the dims.
pub fn cube_idx_file(dims: PointNi, dtype: DType, bitsperblock: usize) -> IdxFile {
    IdxFile::new(
        BoxNi::new(PointNi::zero(dims.pdim()), dims),
        vec![Field::new("data", dtype)],
    )
    .with_bitsperblock(bitsperblock)
}

/// Saves `idxfile` as `dataset.idx` in a fresh temporary directory and opens it. The dataset lives as long as the directory.
pub fn temp_dataset(idxfile: IdxFile) -> (TempDir, Dataset) {
    let dir = tempfile::tempdir().expect("temporary directory");
    let dataset = Dataset::create(dir.path().join("dataset.idx"), idxfile).expect("dataset");

    (dir, dataset)
}

/// Sample `i` (row-major) holds `i`, wrapped to the range of the dtype.
pub fn ramp_array(dims: PointNi, dtype: DType) -> Array {
    let mut array = Array::new(dims, dtype);
    let modulus = if dtype.base().is_float() {
        f64::MAX
    } else {
        2f64.powi(8 * dtype.base().size_in_bytes() as i32 - 1)
    };
    for i in 0..array.nsamples() {
        for c in 0..dtype.ncomponents() {
            array.set_component_f64(i, c, (i as f64) % modulus);
        }
    }

    array
}

/// Uniform samples in `[0, 100)`, reproducible from `seed`.
pub fn random_array(dims: PointNi, dtype: DType, seed: u64) -> Array {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut array = Array::new(dims, dtype);
    for i in 0..array.nsamples() {
        for c in 0..dtype.ncomponents() {
            let v: f64 = rng.gen_range(0.0..100.0);
            let v = if dtype.base().is_float() { v } else { v.floor() };
            array.set_component_f64(i, c, v);
        }
    }

    array
}
