//! Raw deflate streams (no zlib or gzip wrapper).

use super::zip::ZipError;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;

/// Compresses the concatenation of `parts` into a raw deflate stream.
pub(crate) fn compress(parts: &[&[u8]]) -> Result<Vec<u8>, ZipError> {
    let total: usize = parts.iter().map(|part| part.len()).sum();
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(total / 2), Compression::default());
    for part in parts {
        encoder.write_all(part)?;
    }
    Ok(encoder.finish()?)
}

/// Inflates `data`, which must be one complete raw deflate stream that
/// expands to exactly `uncompressed_len` bytes.
pub(crate) fn decompress(data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>, ZipError> {
    let mut inflater = Decompress::new(false);
    // One spare byte so that overlong output is detected rather than cut off.
    let mut out = Vec::with_capacity(uncompressed_len.saturating_add(1));
    let status = inflater
        .decompress_vec(data, &mut out, FlushDecompress::Finish)
        .map_err(|err| ZipError::Corrupt(format!("invalid deflate stream: {}", err)))?;
    if status != Status::StreamEnd {
        return Err(ZipError::Corrupt(format!(
            "deflate stream did not terminate ({:?})",
            status
        )));
    }
    if inflater.total_in() != data.len() as u64 {
        return Err(ZipError::Corrupt(format!(
            "deflate stream ended after {} of {} bytes",
            inflater.total_in(),
            data.len()
        )));
    }
    if out.len() != uncompressed_len {
        return Err(ZipError::Corrupt(format!(
            "inflated to {} bytes, expected {}",
            out.len(),
            uncompressed_len
        )));
    }
    Ok(out)
}
