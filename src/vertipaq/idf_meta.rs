//! `.idfmeta` header parsing (spec §4.7).

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct IdfMeta {
    pub version: u64,
    pub records: u64,
    pub one: u64,
    pub aba5a: u32,
    pub iterator: u32,
    pub bookmark_bits: u64,
    pub storage_alloc_size: u64,
    pub storage_used_size: u64,
    pub segment_needs_resizing: u8,
    pub compression_info: u32,
    pub distinct_states: u64,
    pub min_data_id: u32,
    pub max_data_id: u32,
    pub original_min_segment_data_id: u32,
    pub rle_sort_order: i64,
    pub row_count: u64,
    pub has_nulls: u8,
    pub rle_runs: u64,
    pub others_rle_runs: u64,
    pub has_bit_packed_sub_seg: u8,
    pub count_bit_packed: u64,
    /// `(36 - aba5a) + iterator`, the bit width used by the IDF decoder's
    /// bit-packed sub-segment (spec §4.7).
    pub bit_width: usize,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| malformed_err!("idfmeta: unexpected end of stream at offset {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn tag(&mut self) -> Result<()> {
        self.take(6)?;
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

pub fn read_idf_meta(bytes: &[u8]) -> Result<IdfMeta> {
    let mut c = Cursor::new(bytes);

    c.tag()?; // <1:CP\0
    let version = c.u64()?;

    c.tag()?; // <1:CS\0
    let records = c.u64()?;
    let one = c.u64()?;
    let aba5a = c.u32()?;
    let iterator = c.u32()?;
    let bookmark_bits = c.u64()?;
    let storage_alloc_size = c.u64()?;
    let storage_used_size = c.u64()?;
    let segment_needs_resizing = c.u8()?;
    let compression_info = c.u32()?;

    c.tag()?; // <1:SS\0
    let distinct_states = c.u64()?;
    let min_data_id = c.u32()?;
    let max_data_id = c.u32()?;
    let original_min_segment_data_id = c.u32()?;
    let rle_sort_order = c.i64()?;
    let row_count = c.u64()?;
    let has_nulls = c.u8()?;
    let rle_runs = c.u64()?;
    let others_rle_runs = c.u64()?;
    c.tag()?; // closing tag

    let has_bit_packed_sub_seg = c.u8()?;
    c.tag()?; // <1:CS\0
    let count_bit_packed = c.u64()?;

    let bit_width = (36i64 - aba5a as i64 + iterator as i64) as usize;

    Ok(IdfMeta {
        version,
        records,
        one,
        aba5a,
        iterator,
        bookmark_bits,
        storage_alloc_size,
        storage_used_size,
        segment_needs_resizing,
        compression_info,
        distinct_states,
        min_data_id,
        max_data_id,
        original_min_segment_data_id,
        rle_sort_order,
        row_count,
        has_nulls,
        rle_runs,
        others_rle_runs,
        has_bit_packed_sub_seg,
        count_bit_packed,
        bit_width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_fixture(min_data_id: u32, row_count: u64, count_bit_packed: u64, aba5a: u32, iterator: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"<1:CP\0");
        buf.extend_from_slice(&1u64.to_le_bytes()); // version

        buf.extend_from_slice(b"<1:CS\0");
        buf.extend_from_slice(&0u64.to_le_bytes()); // records
        buf.extend_from_slice(&0u64.to_le_bytes()); // one
        buf.extend_from_slice(&aba5a.to_le_bytes());
        buf.extend_from_slice(&iterator.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // bookmarkBits
        buf.extend_from_slice(&0u64.to_le_bytes()); // storageAllocSize
        buf.extend_from_slice(&0u64.to_le_bytes()); // storageUsedSize
        buf.push(0); // segmentNeedsResizing
        buf.extend_from_slice(&0u32.to_le_bytes()); // compressionInfo

        buf.extend_from_slice(b"<1:SS\0");
        buf.extend_from_slice(&0u64.to_le_bytes()); // distinctStates
        buf.extend_from_slice(&min_data_id.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // maxDataId
        buf.extend_from_slice(&0u32.to_le_bytes()); // originalMinSegmentDataId
        buf.extend_from_slice(&0i64.to_le_bytes()); // rleSortOrder
        buf.extend_from_slice(&row_count.to_le_bytes());
        buf.push(0); // hasNulls
        buf.extend_from_slice(&0u64.to_le_bytes()); // rleRuns
        buf.extend_from_slice(&0u64.to_le_bytes()); // othersRleRuns
        buf.extend_from_slice(b"CLOSE\0");

        buf.push(1); // hasBitPackedSubSeg
        buf.extend_from_slice(b"<1:CS\0");
        buf.extend_from_slice(&count_bit_packed.to_le_bytes());
        buf
    }

    #[test]
    fn parses_fixed_layout_fields() {
        let bytes = build_fixture(10, 4, 0, 4, 0);
        let meta = read_idf_meta(&bytes).unwrap();
        assert_eq!(meta.min_data_id, 10);
        assert_eq!(meta.row_count, 4);
        assert_eq!(meta.count_bit_packed, 0);
        assert_eq!(meta.bit_width, 32);
    }

    #[test]
    fn bit_width_formula() {
        let bytes = build_fixture(0, 6, 1, 4, 0);
        let meta = read_idf_meta(&bytes).unwrap();
        // bitWidth = (36 - aba5a) + iterator = (36-4)+0 = 32
        assert_eq!(meta.bit_width, 32);
    }
}
