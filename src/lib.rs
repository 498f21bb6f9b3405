#![forbid(unsafe_code)]
//! Decoder for the VertiPaq `DataModel` stream embedded in Power BI `.pbix`
//! files: XPress9/XPress8 decompression, ABF container parsing, an embedded
//! SQLite metadata reader, and VertiPaq columnar decode (IDF + dictionary +
//! Huffman + value conversion).

#[macro_use]
pub mod error;
pub mod abf;
pub mod extractor;
pub mod model;
pub mod schema;
pub mod sqlite;
pub mod vertipaq;
pub mod xpress8;
pub mod xpress9;

use std::collections::HashMap;

use error::Result;
use extractor::TableExtractor;
use model::SemanticModel;
use xpress9::Xpress9Codec;

/// Runs the full decode pipeline: XPress9 decompress, ABF parse, metadata
/// read, schema assembly, file-cache construction. Returns the normalized
/// semantic model plus a ready table extractor.
///
/// The large decompressed ABF buffer is retained only for the duration of
/// this call; once it returns, every file any column depends on has been
/// copied into an owned cache and the buffer is dropped (spec §5).
pub fn parse_pbix_data_model(
    raw: &[u8],
    codec: &mut dyn Xpress9Codec,
) -> Result<(SemanticModel, TableExtractor)> {
    let decompressed = xpress9::decompress(raw, codec)?;
    let abf_index = abf::parse(decompressed)?;

    let metadata_bytes = abf_index.get_data_slice("metadata.sqlitedb")?;
    let db = sqlite::SqliteDb::open(&metadata_bytes)?;

    let model = schema::build_semantic_model(&db)?;
    let column_schemas = schema::build_column_schemas(&db, &model)?;

    let mut file_cache: HashMap<String, Vec<u8>> = HashMap::new();
    for col in &column_schemas {
        for filename in [Some(&col.idf), Some(&col.idfmeta), col.dictionary.as_ref()]
            .into_iter()
            .flatten()
        {
            if file_cache.contains_key(filename) {
                continue;
            }
            if let Ok(bytes) = abf_index.get_data_slice(filename) {
                file_cache.insert(filename.clone(), bytes);
            }
        }
    }

    log::info!(
        "parse_pbix_data_model: {} tables, {} columns, {} cached files",
        model.tables.len(),
        column_schemas.len(),
        file_cache.len()
    );

    let extractor = TableExtractor::new(column_schemas, file_cache);
    Ok((model, extractor))
}
