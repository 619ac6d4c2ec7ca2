// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

pub mod rom;
pub mod session;

pub use rom::decompress::{
    compressed_size_code, decompress, decompress_to_vec, get_compressed_size, measure, BlockSize,
    DecompressError, DecompressErrorKind,
};
pub use rom::reverse_bits::REVERSED_BYTES;
pub use rom::Rom;
pub use session::RomSession;
