//! ABF (Analysis-services Backup File) container parsing (spec §4.3).
//!
//! Decomposes the decompressed XPress9 stream into named file slices by
//! walking three nested XML documents: `BackupLogHeader`, `VirtualDirectory`,
//! and `BackupLog`.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{PbixError, Result};
use crate::xpress8;

const HEADER_XML_START: usize = 72;
const HEADER_XML_SCAN_WINDOW: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct FileEntry {
    pub offset: usize,
    pub size: usize,
    pub size_from_log: usize,
}

#[derive(Debug)]
pub struct AbfIndex {
    buffer: Vec<u8>,
    file_log: HashMap<String, FileEntry>,
    error_code: bool,
    apply_compression: bool,
}

impl AbfIndex {
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.file_log.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.file_log.contains_key(name)
    }

    /// Returns the post-processed bytes for `name` (§4.3 `getDataSlice`).
    pub fn get_data_slice(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .file_log
            .get(name)
            .ok_or_else(|| PbixError::FileNotFound(name.to_string()))?;
        let end = entry.offset + entry.size;
        if end > self.buffer.len() {
            return Err(out_of_spec_err!(
                "file '{}' slice [{}, {}) exceeds buffer length {}",
                name,
                entry.offset,
                end,
                self.buffer.len()
            ));
        }
        let mut slice = self.buffer[entry.offset..end].to_vec();
        if self.error_code && slice.len() >= 4 {
            slice.truncate(slice.len() - 4);
        }
        if self.apply_compression {
            slice = xpress8::decompress_blocks(&slice)?;
        }
        Ok(slice)
    }

    /// Releases the large decompressed buffer; only valid once every file this
    /// index will ever serve has been copied into a file cache (spec §5).
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Flattens a simple XML document's leaf element text into a `tag -> text` map.
/// Sufficient for the flat `BackupLogHeader` fields this stage needs.
fn flatten_leaf_text(xml: &[u8]) -> HashMap<String, String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut map = HashMap::new();
    let mut buf = Vec::new();
    let mut current_tag: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_tag = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Text(t)) => {
                if let Some(tag) = &current_tag {
                    if let Ok(text) = t.decode() {
                        map.insert(tag.clone(), text.into_owned());
                    }
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    map
}

struct BackupLogHeaderInfo {
    vd_offset: usize,
    vd_size: usize,
    error_code: bool,
    apply_compression: bool,
}

/// Step 1: locate the UTF-16LE `BackupLogHeader` XML at offset 72 and parse it.
fn parse_backup_log_header(buffer: &[u8]) -> Result<BackupLogHeaderInfo> {
    if buffer.len() <= HEADER_XML_START {
        return Err(malformed_err!("buffer too short for BackupLogHeader"));
    }
    let window_end = (HEADER_XML_START + HEADER_XML_SCAN_WINDOW).min(buffer.len());
    let window = &buffer[HEADER_XML_START..window_end];

    let mut text = String::new();
    let mut i = 0;
    while i + 1 < window.len() {
        let unit = u16::from_le_bytes([window[i], window[i + 1]]);
        if unit == 0 {
            break;
        }
        if let Some(c) = char::from_u32(unit as u32) {
            text.push(c);
        }
        i += 2;
    }

    let fields = flatten_leaf_text(text.as_bytes());
    let vd_offset: usize = fields
        .get("m_cbOffsetHeader")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed_err!("BackupLogHeader missing m_cbOffsetHeader"))?;
    let vd_size: usize = fields
        .get("DataSize")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed_err!("BackupLogHeader missing DataSize"))?;
    if vd_offset == 0 || vd_size == 0 {
        return Err(PbixError::MalformedHeader(
            "BackupLogHeader offset/size must be positive".to_string(),
        ));
    }
    let error_code = fields
        .get("ErrorCode")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);
    let apply_compression = fields
        .get("ApplyCompression")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    Ok(BackupLogHeaderInfo {
        vd_offset,
        vd_size,
        error_code,
        apply_compression,
    })
}

struct VdEntry {
    size: usize,
    offset: usize,
}

/// Step 2: parse the `VirtualDirectory` XML into `storagePath -> {size, offset}`,
/// keeping track of the textually-last `<Path>` (the BackupLog's own path).
fn parse_virtual_directory(xml: &[u8]) -> Result<(HashMap<String, VdEntry>, Option<String>)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut map = HashMap::new();
    let mut last_path: Option<String> = None;

    let mut cur_path: Option<String> = None;
    let mut cur_size: Option<usize> = None;
    let mut cur_offset: Option<usize> = None;
    let mut tag_stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                tag_stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Text(t)) => {
                if let Some(tag) = tag_stack.last() {
                    if let Ok(text) = t.decode() {
                        match tag.as_str() {
                            "Path" => cur_path = Some(text.into_owned()),
                            "Size" => cur_size = text.parse().ok(),
                            "m_cbOffsetHeader" => cur_offset = text.parse().ok(),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "BackupFile" {
                    if let (Some(path), Some(size), Some(offset)) =
                        (cur_path.take(), cur_size.take(), cur_offset.take())
                    {
                        last_path = Some(path.clone());
                        map.insert(path, VdEntry { size, offset });
                    }
                }
                tag_stack.pop();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    Ok((map, last_path))
}

/// BOM/heuristic-based decode of the `BackupLog` document (spec §4.3 step 3).
fn decode_backup_log(bytes: &[u8]) -> String {
    let is_utf16le = bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE
        || bytes
            .chunks(2)
            .take(bytes.len() / 2)
            .any(|pair| pair.len() == 2 && pair[1] == 0);
    if is_utf16le {
        let start = if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
            2
        } else {
            0
        };
        let units: Vec<u16> = bytes[start..]
            .chunks(2)
            .filter(|c| c.len() == 2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

struct LogEntry {
    path: String,
    storage_path: String,
    size: Option<usize>,
}

/// Step 3b: parse `<BackupFile><Path>/<StoragePath>/<Size>` entries from the log.
fn parse_backup_log_entries(xml: &str) -> Vec<LogEntry> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut entries = Vec::new();
    let mut tag_stack: Vec<String> = Vec::new();
    let mut cur_path: Option<String> = None;
    let mut cur_storage_path: Option<String> = None;
    let mut cur_size: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                tag_stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Text(t)) => {
                if let Some(tag) = tag_stack.last() {
                    if let Ok(text) = t.decode() {
                        match tag.as_str() {
                            "Path" => cur_path = Some(text.into_owned()),
                            "StoragePath" => cur_storage_path = Some(text.into_owned()),
                            "Size" => cur_size = text.parse().ok(),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "BackupFile" {
                    if let (Some(path), Some(storage_path)) =
                        (cur_path.take(), cur_storage_path.take())
                    {
                        entries.push(LogEntry {
                            path,
                            storage_path,
                            size: cur_size.take(),
                        });
                    }
                    cur_size = None;
                }
                tag_stack.pop();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    entries
}

fn basename(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

/// Parses the decompressed ABF stream into a logical file index.
pub fn parse(buffer: Vec<u8>) -> Result<AbfIndex> {
    let header = parse_backup_log_header(&buffer)?;

    let vd_end = header
        .vd_offset
        .checked_add(header.vd_size)
        .filter(|&e| e <= buffer.len())
        .ok_or_else(|| malformed_err!("VirtualDirectory range out of bounds"))?;
    let (vd_map, backup_log_path) =
        parse_virtual_directory(&buffer[header.vd_offset..vd_end])?;

    let backup_log_path = backup_log_path
        .ok_or_else(|| malformed_err!("VirtualDirectory has no BackupFile entries"))?;
    let log_vd_entry = vd_map
        .get(&backup_log_path)
        .ok_or_else(|| malformed_err!("BackupLog path not present in VirtualDirectory"))?;

    let log_end = log_vd_entry
        .offset
        .checked_add(log_vd_entry.size)
        .filter(|&e| e <= buffer.len())
        .ok_or_else(|| malformed_err!("BackupLog range out of bounds"))?;
    let mut log_bytes = buffer[log_vd_entry.offset..log_end].to_vec();
    if header.error_code && log_bytes.len() >= 4 {
        let new_len = log_bytes.len() - 4;
        log_bytes.truncate(new_len);
    }
    let log_xml = decode_backup_log(&log_bytes);
    let log_entries = parse_backup_log_entries(&log_xml);

    let mut file_log = HashMap::new();
    for entry in log_entries {
        if let Some(vd_entry) = vd_map.get(&entry.storage_path) {
            let name = basename(&entry.path).to_string();
            file_log.insert(
                name,
                FileEntry {
                    offset: vd_entry.offset,
                    size: vd_entry.size,
                    size_from_log: entry.size.unwrap_or(vd_entry.size),
                },
            );
        }
    }

    log::debug!("abf: indexed {} files", file_log.len());

    Ok(AbfIndex {
        buffer,
        file_log,
        error_code: header.error_code,
        apply_compression: header.apply_compression,
    })
}
