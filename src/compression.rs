//! (De)compression support.

use crate::error::MatrixStoreError;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use zune_inflate::{DeflateDecoder, DeflateOptions};

/// Upper bound on the expansion of deflate data: at most 258 output bytes per 2 input bits.
pub const MAX_DEFLATE_RATIO: usize = 1032;

/// Compresses some bytes with zlib and returns the compressed data.
///
/// # Arguments
///
/// * `data`: Uncompressed data
pub fn compress_zlib(data: &[u8]) -> Result<Vec<u8>, MatrixStoreError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses zlib data and returns the uncompressed data.
///
/// # Arguments
///
/// * `data`: Compressed data
/// * `expected`: Expected uncompressed size. Output beyond it is an error, and the output buffer
///   is never sized beyond what `data` could possibly expand to.
pub fn decompress_zlib(data: &[u8], expected: usize) -> Result<Vec<u8>, MatrixStoreError> {
    let options = DeflateOptions::default()
        .set_size_hint(expected.min(data.len().saturating_mul(MAX_DEFLATE_RATIO)))
        .set_limit(expected);
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    Ok(decoder.decode_zlib()?)
}
