//! XPress8 decompression: a chunked LZ77-like stream used per-file within the ABF (spec §4.2).

use crate::error::Result;

/// Decodes a full XPress8 stream: repeated `{uncompSize:u32le, compSize:u32le, data}` blocks.
pub fn decompress_blocks(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset + 8 <= raw.len() {
        let uncomp_size = u32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap()) as usize;
        let comp_size = u32::from_le_bytes(raw[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let data_start = offset + 8;
        let data_end = match data_start.checked_add(comp_size) {
            Some(end) if end <= raw.len() => end,
            _ => break,
        };
        out.extend(decompress_block(&raw[data_start..data_end], uncomp_size)?);
        offset = data_end;
    }
    Ok(out)
}

/// Decodes a single block. If `comp_size == uncomp_size` the block is stored raw.
pub fn decompress_block(data: &[u8], uncomp_size: usize) -> Result<Vec<u8>> {
    if data.len() == uncomp_size {
        return Ok(data.to_vec());
    }

    let mut out = Vec::with_capacity(uncomp_size);
    let mut si = 0usize;

    while si < data.len() && out.len() < uncomp_size {
        let flags = data[si];
        si += 1;
        for bit in 0..8 {
            if si >= data.len() || out.len() >= uncomp_size {
                break;
            }
            if flags & (1 << bit) == 0 {
                out.push(data[si]);
                si += 1;
            } else {
                if si + 1 >= data.len() {
                    break;
                }
                let b0 = data[si];
                let b1 = data[si + 1];
                si += 2;
                let match_offset = (((b1 & 0xF8) as usize) << 5) | (b0 as usize) | 1;
                let mut match_len = ((b1 & 0x07) as usize) + 3;
                if match_len == 10 {
                    if si >= data.len() {
                        break;
                    }
                    let extra = data[si];
                    si += 1;
                    match_len = extra as usize + 10;
                    if match_len == 265 {
                        if si + 1 >= data.len() {
                            break;
                        }
                        match_len = u16::from_le_bytes([data[si], data[si + 1]]) as usize;
                        si += 2;
                    }
                }
                let di = out.len();
                if match_offset > di {
                    // malformed back-reference; stop rather than panic.
                    return Ok(out);
                }
                for k in 0..match_len {
                    if out.len() >= uncomp_size {
                        break;
                    }
                    let byte = out[di - match_offset + k];
                    out.push(byte);
                }
            }
        }
    }
    Ok(out)
}
