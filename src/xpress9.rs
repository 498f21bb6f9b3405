//! XPress9 decompression: raw `DataModel` bytes -> decompressed ABF stream (spec §4.1).

use crate::error::{PbixError, Result};

/// A runtime-linked XPress9 codec. The host links the real implementation;
/// this crate only drives it through this boundary (spec §6).
pub trait Xpress9Codec {
    /// Returns `false` if initialization failed.
    fn init(&mut self) -> bool;
    /// Decompresses `src` into `dst`, returning the number of bytes written.
    /// A non-positive return means the block failed to decompress.
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> i64;
    fn free(&mut self);
}

const HEADER_SIZE: usize = 102;
const MULTITHREADED_MARKER: &str = "multithreaded";

/// Decodes the UTF-16LE, null-terminated ASCII signature at the start of the stream.
fn read_header_signature(raw: &[u8]) -> Result<String> {
    if raw.len() < HEADER_SIZE {
        return Err(malformed_err!("XPress9 header shorter than 102 bytes"));
    }
    let mut out = String::new();
    let mut i = 0;
    while i + 1 < HEADER_SIZE {
        let unit = u16::from_le_bytes([raw[i], raw[i + 1]]);
        if unit == 0 {
            break;
        }
        if let Some(c) = char::from_u32(unit as u32) {
            out.push(c);
        }
        i += 2;
    }
    Ok(out)
}

/// Decompresses the raw `DataModel` blob into a contiguous ABF byte stream.
pub fn decompress(raw: &[u8], codec: &mut dyn Xpress9Codec) -> Result<Vec<u8>> {
    let signature = read_header_signature(raw)?;
    if signature.contains(MULTITHREADED_MARKER) {
        decompress_multithreaded(raw, codec)
    } else {
        decompress_single_threaded(raw, codec)
    }
}

fn read_u32(raw: &[u8], offset: usize) -> Option<u32> {
    raw.get(offset..offset + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

fn read_u64(raw: &[u8], offset: usize) -> Option<u64> {
    raw.get(offset..offset + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

/// Decompresses one `{uncompSize, compSize, data}` block starting at `offset`.
/// Returns the decompressed bytes and the offset just past the block, or
/// `None` if the block is absent/short/overflowing (a stop condition, not an error).
fn decompress_block(
    raw: &[u8],
    offset: usize,
    codec: &mut dyn Xpress9Codec,
) -> Option<(Vec<u8>, usize)> {
    let uncomp_size = read_u32(raw, offset)? as usize;
    let comp_size = read_u32(raw, offset + 4)? as usize;
    if uncomp_size == 0 || comp_size == 0 {
        return None;
    }
    let data_start = offset + 8;
    let data_end = data_start.checked_add(comp_size)?;
    if data_end > raw.len() {
        return None;
    }
    let mut dst = vec![0u8; uncomp_size];
    let n = codec.decompress(&raw[data_start..data_end], &mut dst);
    if n <= 0 {
        // tolerate corrupt blocks: skip, matching reference tolerance
        return Some((Vec::new(), data_end));
    }
    dst.truncate(n as usize);
    Some((dst, data_end))
}

fn decompress_single_threaded(raw: &[u8], codec: &mut dyn Xpress9Codec) -> Result<Vec<u8>> {
    if !codec.init() {
        return Err(PbixError::DecompressInit);
    }
    let mut out = Vec::new();
    let mut offset = HEADER_SIZE;
    loop {
        match decompress_block(raw, offset, codec) {
            Some((chunk, next_offset)) => {
                if next_offset <= offset {
                    break; // runaway block guard
                }
                out.extend_from_slice(&chunk);
                offset = next_offset;
            }
            None => break,
        }
    }
    codec.free();
    log::debug!(
        "xpress9: single-threaded decompress produced {} bytes from {} input bytes",
        out.len(),
        raw.len()
    );
    Ok(out)
}

fn decompress_multithreaded(raw: &[u8], codec: &mut dyn Xpress9Codec) -> Result<Vec<u8>> {
    let main_chunks = read_u64(raw, HEADER_SIZE).ok_or_else(|| malformed_err!("missing mainChunks"))?;
    let prefix_chunks =
        read_u64(raw, HEADER_SIZE + 8).ok_or_else(|| malformed_err!("missing prefixChunks"))?;
    let prefix_threads =
        read_u64(raw, HEADER_SIZE + 16).ok_or_else(|| malformed_err!("missing prefixThreads"))?;
    let main_threads =
        read_u64(raw, HEADER_SIZE + 24).ok_or_else(|| malformed_err!("missing mainThreads"))?;
    // chunkSize at HEADER_SIZE + 32 is consumed but unused.

    let mut groups: Vec<u64> = Vec::new();
    groups.extend(std::iter::repeat(prefix_chunks).take(prefix_threads as usize));
    groups.extend(std::iter::repeat(main_chunks).take(main_threads as usize));

    let mut out = Vec::new();
    let mut offset = HEADER_SIZE + 40;
    for group_block_count in groups {
        codec.free();
        if !codec.init() {
            return Err(PbixError::DecompressInit);
        }
        for _ in 0..group_block_count {
            match decompress_block(raw, offset, codec) {
                Some((chunk, next_offset)) => {
                    if next_offset <= offset {
                        break;
                    }
                    out.extend_from_slice(&chunk);
                    offset = next_offset;
                }
                None => break,
            }
        }
    }
    codec.free();
    log::debug!(
        "xpress9: multithreaded decompress produced {} bytes across {} thread groups",
        out.len(),
        prefix_threads + main_threads
    );
    Ok(out)
}
