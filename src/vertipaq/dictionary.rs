//! Dictionary reading: long/real numeric dictionaries and string dictionaries
//! backed by uncompressed UTF-16LE pages or Huffman-compressed pages (spec §4.9).

use std::collections::HashMap;

use crate::error::Result;
use crate::vertipaq::huffman::{build_canonical_tree, decode_bits};

#[derive(Debug, Clone, PartialEq)]
pub enum DictValue {
    Long(i64),
    Real(f64),
    Str(String),
}

pub type Dictionary = HashMap<u32, DictValue>;

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
            .ok_or_else(|| out_of_spec_err!("dictionary: unexpected end of stream at offset {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

const PAGE_BEGIN_MARKER: u32 = 0xDDCC_BBAA;
const PAGE_END_MARKER: u32 = 0xCDAB_CDAB;

pub fn read_dictionary(bytes: &[u8], min_data_id: u32) -> Result<Dictionary> {
    let mut c = Cursor::new(bytes);
    let dictionary_type = c.i32()?;
    for _ in 0..6 {
        c.i32()?; // hash information, unread
    }

    match dictionary_type {
        0 => read_numeric_dictionary(&mut c, min_data_id, false),
        1 => read_numeric_dictionary(&mut c, min_data_id, true),
        2 => read_string_dictionary(&mut c, min_data_id),
        other => Err(out_of_spec_err!("dictionary: unknown dictionaryType {}", other)),
    }
}

fn read_numeric_dictionary(c: &mut Cursor, min_data_id: u32, is_real: bool) -> Result<Dictionary> {
    let count = c.u64()?;
    let element_size = c.u32()?;
    let mut out = HashMap::with_capacity(count as usize);
    for i in 0..count {
        let value = if is_real {
            DictValue::Real(c.f64()?)
        } else if element_size == 8 {
            DictValue::Long(c.i64()?)
        } else {
            DictValue::Long(c.i32()? as i64)
        };
        out.insert(min_data_id.wrapping_add(i as u32), value);
    }
    Ok(out)
}

enum PageBody {
    Uncompressed(Vec<String>),
    Compressed {
        tree: crate::vertipaq::huffman::HuffmanTree,
        payload: Vec<u8>,
        store_total_bits: usize,
    },
}

struct PageRecord {
    page_id: u32,
    body: PageBody,
}

fn read_string_dictionary(c: &mut Cursor, min_data_id: u32) -> Result<Dictionary> {
    let _store_string_count = c.i64()?;
    let _f_store_compressed = c.i8()?;
    let _store_longest_string = c.i64()?;
    let store_page_count = c.i64()?;

    let mut pages = Vec::with_capacity(store_page_count.max(0) as usize);

    for page_id in 0..store_page_count {
        let _page_mask = c.u64()?;
        let _page_contains_nulls = c.u8()?;
        let _page_start_index = c.u64()?;
        let page_string_count = c.u64()?;
        let page_compressed = c.u8()?;
        let begin_marker = c.u32()?;
        if begin_marker != PAGE_BEGIN_MARKER {
            return Err(out_of_spec_err!(
                "dictionary: bad page begin marker {:#x}",
                begin_marker
            ));
        }

        let body = if page_compressed != 0 {
            read_compressed_page(c)?
        } else {
            PageBody::Uncompressed(read_uncompressed_page(c, page_string_count as usize)?)
        };

        let end_marker = c.u32()?;
        if end_marker != PAGE_END_MARKER {
            return Err(out_of_spec_err!(
                "dictionary: bad page end marker {:#x}",
                end_marker
            ));
        }

        pages.push(PageRecord {
            page_id: page_id as u32,
            body,
        });
    }

    let handle_count = c.u64()?;
    let _handle_element_size = c.u32()?;
    let mut handles_by_page: HashMap<u32, Vec<u32>> = HashMap::new();
    for _ in 0..handle_count {
        let offset = c.u32()?;
        let page_id = c.u32()?;
        handles_by_page.entry(page_id).or_default().push(offset);
    }

    let mut out = HashMap::new();
    let mut next_index = min_data_id;
    for page in &pages {
        match &page.body {
            PageBody::Uncompressed(strings) => {
                for s in strings {
                    out.insert(next_index, DictValue::Str(s.clone()));
                    next_index = next_index.wrapping_add(1);
                }
            }
            PageBody::Compressed {
                tree,
                payload,
                store_total_bits,
            } => {
                let mut offsets = handles_by_page.remove(&page.page_id).unwrap_or_default();
                offsets.sort_unstable();
                for (i, &start) in offsets.iter().enumerate() {
                    let end = offsets
                        .get(i + 1)
                        .copied()
                        .unwrap_or(*store_total_bits as u32);
                    let decoded = decode_bits(tree, payload, start as usize, end as usize);
                    out.insert(next_index, DictValue::Str(decoded));
                    next_index = next_index.wrapping_add(1);
                }
            }
        }
    }
    Ok(out)
}

fn read_uncompressed_page(c: &mut Cursor, _page_string_count: usize) -> Result<Vec<String>> {
    let _remaining = c.u64()?;
    let _used = c.u64()?;
    let alloc_size = c.u64()? as usize;
    let raw = c.take(alloc_size)?;

    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let mut strings = Vec::new();
    let mut current = Vec::new();
    for unit in units {
        if unit == 0 {
            strings.push(String::from_utf16_lossy(&current));
            current.clear();
        } else {
            current.push(unit);
        }
    }
    if !current.is_empty() {
        strings.push(String::from_utf16_lossy(&current));
    }
    Ok(strings)
}

fn read_compressed_page(c: &mut Cursor) -> Result<PageBody> {
    let store_total_bits = c.u32()? as usize;
    let _char_set_id = c.u32()?;
    let alloc_size = c.u64()? as usize;
    let _char_set_used = c.u8()?;
    let _ui_decode_bits = c.u32()?;
    let encode_array: [u8; 128] = c.take(128)?.try_into().unwrap();
    let _buffer_size = c.u64()?;
    let payload = c.take(alloc_size)?.to_vec();

    let tree = build_canonical_tree(&encode_array);
    Ok(PageBody::Compressed {
        tree,
        payload,
        store_total_bits,
    })
}
