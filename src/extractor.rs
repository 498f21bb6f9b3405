//! Table Extractor façade (spec §4.11): binds column schemas to a pre-built
//! file cache and decodes tables column-by-column, either synchronously or
//! with a cooperative yield point between columns (spec §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PbixError, Result};
use crate::schema::ColumnDescriptor;
use crate::vertipaq::{dictionary, idf, idf_meta, value};

#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub column_data: Vec<Vec<value::Value>>,
    pub row_count: usize,
}

pub struct ColumnProgress<'a> {
    pub col_index: usize,
    pub total: usize,
    pub column_name: &'a str,
}

pub struct TableExtractor {
    schemas_by_table: HashMap<String, Vec<ColumnDescriptor>>,
    file_cache: HashMap<String, Vec<u8>>,
    table_names: Vec<String>,
}

impl TableExtractor {
    pub fn new(schemas: Vec<ColumnDescriptor>, file_cache: HashMap<String, Vec<u8>>) -> Self {
        let mut schemas_by_table: HashMap<String, Vec<ColumnDescriptor>> = HashMap::new();
        for col in schemas {
            schemas_by_table
                .entry(col.table_name.clone())
                .or_default()
                .push(col);
        }
        let mut table_names: Vec<String> = schemas_by_table.keys().cloned().collect();
        table_names.sort();

        TableExtractor {
            schemas_by_table,
            file_cache,
            table_names,
        }
    }

    pub fn table_names(&self) -> &[String] {
        &self.table_names
    }

    pub fn get_table(&self, name: &str) -> Result<TableData> {
        let columns = self
            .schemas_by_table
            .get(name)
            .ok_or_else(|| PbixError::IncompleteMetadata(format!("no such table: {name}")))?;

        let mut out_names = Vec::with_capacity(columns.len());
        let mut out_data = Vec::with_capacity(columns.len());
        for col in columns {
            match decode_column(col, &self.file_cache) {
                Ok(values) => {
                    out_names.push(col.name.clone());
                    out_data.push(values);
                }
                Err(e) => {
                    log::warn!("column '{}'.'{}' skipped: {e}", col.table_name, col.name);
                }
            }
        }
        let row_count = out_data.iter().map(Vec::len).max().unwrap_or(0);
        Ok(TableData {
            columns: out_names,
            column_data: out_data,
            row_count,
        })
    }

    /// Identical result to [`TableExtractor::get_table`], but calls
    /// `on_progress` once before decoding each column and checks `epoch`
    /// against `current_epoch` at that same point, terminating with
    /// [`PbixError::Cancelled`] on mismatch (spec §5).
    pub fn get_table_streaming<F>(
        &self,
        name: &str,
        epoch: u64,
        current_epoch: &AtomicU64,
        mut on_progress: F,
    ) -> Result<TableData>
    where
        F: FnMut(ColumnProgress),
    {
        let columns = self
            .schemas_by_table
            .get(name)
            .ok_or_else(|| PbixError::IncompleteMetadata(format!("no such table: {name}")))?;

        let total = columns.len();
        let mut out_names = Vec::with_capacity(total);
        let mut out_data = Vec::with_capacity(total);
        for (col_index, col) in columns.iter().enumerate() {
            if current_epoch.load(Ordering::SeqCst) != epoch {
                return Err(PbixError::Cancelled);
            }
            on_progress(ColumnProgress {
                col_index,
                total,
                column_name: &col.name,
            });
            match decode_column(col, &self.file_cache) {
                Ok(values) => {
                    out_names.push(col.name.clone());
                    out_data.push(values);
                }
                Err(e) => {
                    log::warn!("column '{}'.'{}' skipped: {e}", col.table_name, col.name);
                }
            }
        }
        let row_count = out_data.iter().map(Vec::len).max().unwrap_or(0);
        Ok(TableData {
            columns: out_names,
            column_data: out_data,
            row_count,
        })
    }
}

fn decode_column(
    col: &ColumnDescriptor,
    file_cache: &HashMap<String, Vec<u8>>,
) -> Result<Vec<value::Value>> {
    let idf_bytes = file_cache
        .get(&col.idf)
        .ok_or_else(|| PbixError::ColumnDecodeSkipped(format!("missing idf file {}", col.idf)))?;
    let idfmeta_bytes = file_cache.get(&col.idfmeta).ok_or_else(|| {
        PbixError::ColumnDecodeSkipped(format!("missing idfmeta file {}", col.idfmeta))
    })?;

    let meta = idf_meta::read_idf_meta(idfmeta_bytes)
        .map_err(|e| PbixError::ColumnDecodeSkipped(e.to_string()))?;
    let indices =
        idf::decode_idf(idf_bytes, &meta).map_err(|e| PbixError::ColumnDecodeSkipped(e.to_string()))?;

    let dict = match &col.dictionary {
        Some(dict_name) => {
            let dict_bytes = file_cache.get(dict_name).ok_or_else(|| {
                PbixError::ColumnDecodeSkipped(format!("missing dictionary file {dict_name}"))
            })?;
            Some(
                dictionary::read_dictionary(dict_bytes, meta.min_data_id)
                    .map_err(|e| PbixError::ColumnDecodeSkipped(e.to_string()))?,
            )
        }
        None => None,
    };

    let values = indices
        .iter()
        .map(|idx| {
            let raw = dict.as_ref().and_then(|d| d.get(idx));
            value::convert_value(raw, *idx, col)
        })
        .collect();

    Ok(values)
}
