//! Minimal, read-only embedded SQLite reader (spec §4.4).
//!
//! Handles exactly enough of the file format to traverse `metadata.sqlitedb`:
//! the 100-byte header, B-tree leaf/interior table pages, varints, the
//! record serial-type encoding, and payload overflow chains. Writes and
//! indices are out of scope.

mod varint;

use std::collections::HashMap;

use crate::error::{PbixError, Result};

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const HEADER_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> bool {
        matches!(self.as_i64(), Some(v) if v != 0)
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub rowid: i64,
    pub values: Vec<SqlValue>,
}

impl Row {
    /// Column access by the fixed positional index used throughout the
    /// schema/column builders (spec §4.5/§4.6 reference columns as `Table[2]` etc).
    pub fn get(&self, index: usize) -> &SqlValue {
        self.values.get(index).unwrap_or(&SqlValue::Null)
    }
}

pub struct SqliteDb<'a> {
    data: &'a [u8],
    page_size: usize,
    usable_size: usize,
    table_map: HashMap<String, u32>,
}

impl<'a> SqliteDb<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE || &data[0..16] != SQLITE_MAGIC {
            return Err(PbixError::InvalidSqlite(
                "missing SQLite magic header".to_string(),
            ));
        }
        let raw_page_size = u16::from_be_bytes([data[16], data[17]]);
        let page_size = if raw_page_size == 0 {
            65536
        } else {
            raw_page_size as usize
        };
        let reserved = data[20] as usize;
        let usable_size = page_size - reserved;

        let mut db = SqliteDb {
            data,
            page_size,
            usable_size,
            table_map: HashMap::new(),
        };
        db.table_map = db.build_table_map()?;
        Ok(db)
    }

    fn page_offset(&self, page_number: u32) -> usize {
        (page_number as usize - 1) * self.page_size
    }

    fn page_bytes(&self, page_number: u32) -> Result<&'a [u8]> {
        let start = self.page_offset(page_number);
        let end = start
            .checked_add(self.page_size)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| out_of_spec_err!("page {} out of bounds", page_number))?;
        Ok(&self.data[start..end])
    }

    /// `sqlite_master` lives on page 1; build `name -> root_page`.
    fn build_table_map(&mut self) -> Result<HashMap<String, u32>> {
        let rows = self.read_table_rows(1)?;
        let mut map = HashMap::new();
        for row in rows {
            // sqlite_master columns: type, name, tbl_name, rootpage, sql
            if let (Some(SqlValue::Text(type_)), Some(SqlValue::Text(name)), Some(rootpage)) = (
                row.values.first(),
                row.values.get(1),
                row.values.get(3).and_then(SqlValue::as_i64),
            ) {
                if type_ == "table" {
                    map.insert(name.clone(), rootpage as u32);
                }
            }
        }
        Ok(map)
    }

    pub fn table_map(&self) -> &HashMap<String, u32> {
        &self.table_map
    }

    /// Reads every row of the named table, tolerating corrupt cells by skipping them.
    pub fn get_table_rows(&self, name: &str) -> Result<Vec<Row>> {
        let root = *self
            .table_map
            .get(name)
            .ok_or_else(|| PbixError::IncompleteMetadata(format!("no such table: {name}")))?;
        self.read_table_rows(root)
    }

    fn read_table_rows(&self, root_page: u32) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        self.walk_page(root_page, &mut out);
        Ok(out)
    }

    fn walk_page(&self, page_number: u32, out: &mut Vec<Row>) {
        let page = match self.page_bytes(page_number) {
            Ok(p) => p,
            Err(_) => return,
        };
        let header_offset = if page_number == 1 { HEADER_SIZE } else { 0 };
        if header_offset + 8 > page.len() {
            return;
        }
        let page_type = page[header_offset];
        let cell_count = u16::from_be_bytes([
            page[header_offset + 3],
            page[header_offset + 4],
        ]) as usize;
        let cell_header_size = match page_type {
            0x05 => 12, // interior table b-tree
            0x0D => 8,  // leaf table b-tree
            _ => return,
        };
        if header_offset + cell_header_size > page.len() {
            return;
        }
        let cell_pointer_array = header_offset + cell_header_size;

        for i in 0..cell_count {
            let ptr_offset = cell_pointer_array + i * 2;
            if ptr_offset + 2 > page.len() {
                continue;
            }
            let cell_offset =
                u16::from_be_bytes([page[ptr_offset], page[ptr_offset + 1]]) as usize;
            if cell_offset >= page.len() {
                continue;
            }
            match page_type {
                0x05 => self.walk_interior_cell(page, cell_offset, out),
                0x0D => {
                    if let Some(row) = self.parse_leaf_cell(page, cell_offset) {
                        out.push(row);
                    }
                }
                _ => {}
            }
        }

        if page_type == 0x05 {
            let right_ptr_offset = header_offset + 8;
            if right_ptr_offset + 4 <= page.len() {
                let right_page = u32::from_be_bytes(
                    page[right_ptr_offset..right_ptr_offset + 4]
                        .try_into()
                        .unwrap(),
                );
                self.walk_page(right_page, out);
            }
        }
    }

    fn walk_interior_cell(&self, page: &[u8], offset: usize, out: &mut Vec<Row>) {
        if offset + 4 > page.len() {
            return;
        }
        let child_page = u32::from_be_bytes(page[offset..offset + 4].try_into().unwrap());
        self.walk_page(child_page, out);
    }

    /// Leaf cell: `varint payloadSize, varint rowid, payload[, overflow page]`.
    fn parse_leaf_cell(&self, page: &[u8], offset: usize) -> Option<Row> {
        let (payload_size, n1) = varint::decode(page.get(offset..)?);
        let (rowid, n2) = varint::decode(page.get(offset + n1..)?);
        let payload_start = offset + n1 + n2;
        let payload_size = payload_size as usize;

        let max_local = self.usable_size - 35;
        let min_local = (self.usable_size - 12) * 32 / 255 - 23;

        let local_size = if payload_size <= max_local {
            payload_size
        } else {
            let k = min_local + (payload_size - min_local) % (self.usable_size - 4);
            if k <= max_local {
                k
            } else {
                min_local
            }
        };

        let mut payload = page.get(payload_start..payload_start + local_size)?.to_vec();

        if local_size < payload_size {
            let overflow_ptr_offset = payload_start + local_size;
            let mut next_page = u32::from_be_bytes(
                page.get(overflow_ptr_offset..overflow_ptr_offset + 4)?
                    .try_into()
                    .ok()?,
            );
            let mut remaining = payload_size - local_size;
            while next_page != 0 && remaining > 0 {
                let overflow_page = self.page_bytes(next_page).ok()?;
                if overflow_page.len() < 4 {
                    break;
                }
                next_page =
                    u32::from_be_bytes(overflow_page[0..4].try_into().unwrap());
                let usable = (self.usable_size - 4).min(remaining);
                let chunk = overflow_page.get(4..4 + usable)?;
                payload.extend_from_slice(chunk);
                remaining -= usable;
            }
        }

        let values = decode_record(&payload)?;
        Some(Row { rowid, values })
    }
}

/// Decodes a SQLite record-format payload into typed values. Returns `None`
/// on any structural inconsistency so the caller can silently skip the cell.
fn decode_record(payload: &[u8]) -> Option<Vec<SqlValue>> {
    let (header_size, n) = varint::decode(payload);
    let header_size = header_size as usize;
    if header_size > payload.len() {
        return None;
    }
    let mut serial_types = Vec::new();
    let mut cursor = n;
    while cursor < header_size {
        let (serial_type, consumed) = varint::decode(payload.get(cursor..)?);
        serial_types.push(serial_type);
        cursor += consumed;
    }

    let mut values = Vec::with_capacity(serial_types.len());
    let mut body_offset = header_size;
    for st in serial_types {
        let (value, len) = decode_serial_value(payload.get(body_offset..)?, st)?;
        values.push(value);
        body_offset += len;
    }
    Some(values)
}

fn decode_serial_value(bytes: &[u8], serial_type: i64) -> Option<(SqlValue, usize)> {
    match serial_type {
        0 => Some((SqlValue::Null, 0)),
        1..=6 => {
            let n = match serial_type {
                1 => 1,
                2 => 2,
                3 => 3,
                4 => 4,
                5 => 6,
                6 => 8,
                _ => unreachable!(),
            };
            let raw = bytes.get(..n)?;
            let sign_extend = raw[0] & 0x80 != 0;
            let mut buf = [if sign_extend { 0xFFu8 } else { 0u8 }; 8];
            buf[8 - n..].copy_from_slice(raw);
            Some((SqlValue::Int(i64::from_be_bytes(buf)), n))
        }
        7 => {
            let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
            Some((SqlValue::Real(f64::from_be_bytes(raw)), 8))
        }
        8 => Some((SqlValue::Int(0), 0)),
        9 => Some((SqlValue::Int(1), 0)),
        n if n >= 12 && n % 2 == 0 => {
            let len = ((n - 12) / 2) as usize;
            let raw = bytes.get(..len)?;
            Some((SqlValue::Blob(raw.to_vec()), len))
        }
        n if n >= 13 => {
            let len = ((n - 13) / 2) as usize;
            let raw = bytes.get(..len)?;
            let text = String::from_utf8_lossy(raw).into_owned();
            Some((SqlValue::Text(text), len))
        }
        _ => None,
    }
}
