use hzblocks::storage::{prelude::*, BlockCompression};

fn main() {
    let args: Vec<_> = std::env::args().collect();
    let idx_path = &args[1];

    println!("Loading {}", idx_path);

    let dataset = Dataset::open(idx_path).unwrap();
    let mut access = dataset.create_access().unwrap();
    let field = dataset.default_field().clone();
    let samples = dataset
        .read(
            &mut access,
            &field,
            dataset.default_time(),
            *dataset.logic_box(),
            dataset.max_resolution(),
        )
        .unwrap();
    let block_bytes = field.dtype.byte_size(1 << dataset.bitsperblock());

    for compression in [BlockCompression::Lz4, BlockCompression::Snappy].iter() {
        println!("Compressing with {}: \n", compression.token());
        measure_compression_rate(*compression, samples.as_bytes(), block_bytes);
    }
}

fn measure_compression_rate(compression: BlockCompression, bytes: &[u8], block_bytes: usize) {
    let mut compressed_size_bytes = 0;
    for block in bytes.chunks(block_bytes) {
        match compression.encode(block) {
            Ok(compressed) => compressed_size_bytes += compressed.len(),
            Err(e) => {
                println!("{}\n", e);
                return;
            }
        }
    }

    println!(
        "source = {} bytes, compressed = {} bytes; rate = {:.1}%\n",
        bytes.len(),
        compressed_size_bytes,
        100.0 * (compressed_size_bytes as f32 / bytes.len() as f32)
    );
}
