//! IDF decoding: primary RLE segment + bit-packed sub-segment (spec §4.8).

use crate::error::Result;
use crate::vertipaq::idf_meta::IdfMeta;

struct PrimaryEntry {
    data_value: u32,
    repeat_value: u32,
}

fn read_primary_segment(bytes: &[u8]) -> Result<(Vec<PrimaryEntry>, usize)> {
    if bytes.len() < 8 {
        return Err(out_of_spec_err!("idf: truncated primary segment size"));
    }
    let count = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
    let mut cursor = 8usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let entry_bytes = bytes
            .get(cursor..cursor + 8)
            .ok_or_else(|| out_of_spec_err!("idf: truncated primary entry"))?;
        let data_value = u32::from_le_bytes(entry_bytes[0..4].try_into().unwrap());
        let repeat_value = u32::from_le_bytes(entry_bytes[4..8].try_into().unwrap());
        entries.push(PrimaryEntry {
            data_value,
            repeat_value,
        });
        cursor += 8;
    }
    Ok((entries, cursor))
}

fn read_sub_segment(bytes: &[u8]) -> Result<Vec<u64>> {
    if bytes.len() < 8 {
        return Ok(Vec::new());
    }
    let count = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
    let mut words = Vec::with_capacity(count);
    let mut cursor = 8usize;
    for _ in 0..count {
        let word_bytes = bytes
            .get(cursor..cursor + 8)
            .ok_or_else(|| out_of_spec_err!("idf: truncated sub-segment word"))?;
        words.push(u64::from_le_bytes(word_bytes.try_into().unwrap()));
        cursor += 8;
    }
    Ok(words)
}

/// Expands the bit-packed sub-segment into `countBitPacked` dictionary indices.
fn expand_bit_packed(words: &[u64], meta: &IdfMeta) -> Vec<u32> {
    let count_bit_packed = meta.count_bit_packed as usize;
    if count_bit_packed == 0 || words.is_empty() {
        return Vec::new();
    }

    // Special case: a single zero word means every bit-packed value is minDataId.
    if words.len() == 1 && words[0] == 0 {
        return vec![meta.min_data_id; count_bit_packed];
    }

    let bit_width = meta.bit_width;
    if bit_width == 0 || bit_width > 64 {
        return Vec::new();
    }
    let mask: u64 = if bit_width == 64 {
        u64::MAX
    } else {
        (1u64 << bit_width) - 1
    };
    let values_per_word = 64 / bit_width;

    let mut out = Vec::with_capacity(words.len() * values_per_word);
    'outer: for &word in words {
        let mut remaining = word;
        for _ in 0..values_per_word {
            let v = (remaining & mask) as u32;
            out.push(v.wrapping_add(meta.min_data_id));
            remaining >>= bit_width;
            if out.len() >= count_bit_packed {
                break 'outer;
            }
        }
    }
    out
}

/// Decodes one column's `.idf` file into a length-`rowCount` sequence of
/// dictionary indices, per spec §4.8. Only the first segment is read; a
/// multi-segment column is out of scope and should surface as
/// `ColumnDecodeSkipped` by the caller.
pub fn decode_idf(bytes: &[u8], meta: &IdfMeta) -> Result<Vec<u32>> {
    let (primary, primary_end) = read_primary_segment(bytes)?;
    let sub_bytes = bytes.get(primary_end..).unwrap_or(&[]);
    let sub_words = read_sub_segment(sub_bytes)?;
    let bit_packed = expand_bit_packed(&sub_words, meta);

    let mut out = Vec::with_capacity(meta.row_count as usize);
    let mut bp_offset = 0usize;

    for entry in &primary {
        let wrapped = (entry.data_value as u64 + bp_offset as u64) & 0xFFFF_FFFF;
        if wrapped == 0xFFFF_FFFF {
            let end = (bp_offset + entry.repeat_value as usize).min(bit_packed.len());
            if bp_offset < end {
                out.extend_from_slice(&bit_packed[bp_offset..end]);
            }
            bp_offset += entry.repeat_value as usize;
        } else {
            out.extend(std::iter::repeat(entry.data_value).take(entry.repeat_value as usize));
        }
    }

    if out.len() != meta.row_count as usize {
        return Err(out_of_spec_err!(
            "idf: decoded {} values, expected rowCount {}",
            out.len(),
            meta.row_count
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(row_count: u64, min_data_id: u32, count_bit_packed: u64, bit_width: usize) -> IdfMeta {
        IdfMeta {
            version: 0,
            records: 0,
            one: 0,
            aba5a: 0,
            iterator: 0,
            bookmark_bits: 0,
            storage_alloc_size: 0,
            storage_used_size: 0,
            segment_needs_resizing: 0,
            compression_info: 0,
            distinct_states: 0,
            min_data_id,
            max_data_id: 0,
            original_min_segment_data_id: 0,
            rle_sort_order: 0,
            row_count,
            has_nulls: 0,
            rle_runs: 0,
            others_rle_runs: 0,
            has_bit_packed_sub_seg: 0,
            count_bit_packed,
            bit_width,
        }
    }

    fn build_idf(primary: &[(u32, u32)], sub_words: &[u64]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(primary.len() as u64).to_le_bytes());
        for (dv, rv) in primary {
            buf.extend_from_slice(&dv.to_le_bytes());
            buf.extend_from_slice(&rv.to_le_bytes());
        }
        buf.extend_from_slice(&(sub_words.len() as u64).to_le_bytes());
        for w in sub_words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf
    }

    #[test]
    fn scenario_tiny_all_integer_column() {
        let meta = meta_with(4, 10, 0, 0);
        let bytes = build_idf(&[(10, 4)], &[]);
        let result = decode_idf(&bytes, &meta).unwrap();
        assert_eq!(result, vec![10, 10, 10, 10]);
    }

    #[test]
    fn scenario_rle_plus_bit_packed_mixed() {
        // primary = [{100,3},{0xFFFFFFFF,2},{200,1}], sub-segment: one u64
        // encoding two values 1,2 at bitWidth=32, minDataId=0.
        // Expect [100,100,100,1,2,200].
        let meta = meta_with(6, 0, 2, 32);
        let word: u64 = 1u64 | (2u64 << 32);
        let bytes = build_idf(&[(100, 3), (0xFFFF_FFFF, 2), (200, 1)], &[word]);
        let result = decode_idf(&bytes, &meta).unwrap();
        assert_eq!(result, vec![100, 100, 100, 1, 2, 200]);
    }

    #[test]
    fn all_zero_word_special_case() {
        let meta = meta_with(3, 7, 3, 8);
        let bytes = build_idf(&[(0xFFFF_FFFF, 3)], &[0]);
        let result = decode_idf(&bytes, &meta).unwrap();
        assert_eq!(result, vec![7, 7, 7]);
    }

    #[test]
    fn row_count_mismatch_is_an_error() {
        let meta = meta_with(5, 0, 0, 0);
        let bytes = build_idf(&[(1, 2)], &[]);
        assert!(decode_idf(&bytes, &meta).is_err());
    }
}
