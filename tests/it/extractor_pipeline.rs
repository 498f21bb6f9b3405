//! Drives a single datetime column through the whole column pipeline —
//! `.idfmeta` header, `.idf` RLE segment, a long dictionary, value
//! conversion — via [`TableExtractor`], rather than unit-testing each stage
//! in isolation.

use std::collections::HashMap;

use pbix_datamodel::extractor::TableExtractor;
use pbix_datamodel::schema::ColumnDescriptor;
use pbix_datamodel::vertipaq::value::Value;

const DATA_TYPE_DATETIME: i32 = 9;

fn build_idfmeta(min_data_id: u32, row_count: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"<1:CP\0");
    buf.extend_from_slice(&1u64.to_le_bytes()); // version

    buf.extend_from_slice(b"<1:CS\0");
    buf.extend_from_slice(&0u64.to_le_bytes()); // records
    buf.extend_from_slice(&0u64.to_le_bytes()); // one
    buf.extend_from_slice(&4u32.to_le_bytes()); // aba5a
    buf.extend_from_slice(&0u32.to_le_bytes()); // iterator
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

    buf.push(0); // hasBitPackedSubSeg
    buf.extend_from_slice(b"<1:CS\0");
    buf.extend_from_slice(&0u64.to_le_bytes()); // countBitPacked
    buf
}

fn build_idf(primary: &[(u32, u32)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(primary.len() as u64).to_le_bytes());
    for (data_value, repeat_value) in primary {
        buf.extend_from_slice(&data_value.to_le_bytes());
        buf.extend_from_slice(&repeat_value.to_le_bytes());
    }
    buf.extend_from_slice(&0u64.to_le_bytes()); // empty sub-segment
    buf
}

fn build_long_dictionary(min_data_id: u32, values: &[i64]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0i32.to_le_bytes()); // dictionaryType = long
    for _ in 0..6 {
        buf.extend_from_slice(&0i32.to_le_bytes()); // hash information, unread
    }
    buf.extend_from_slice(&(values.len() as u64).to_le_bytes());
    buf.extend_from_slice(&8u32.to_le_bytes()); // element size: 8-byte longs
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    let _ = min_data_id; // indices are min_data_id + position, asserted via the extractor below
    buf
}

#[test]
fn datetime_column_round_trips_through_idf_dictionary_and_value_conversion() {
    let min_data_id = 100u32;
    let idfmeta = build_idfmeta(min_data_id, 3);
    let idf = build_idf(&[(100, 1), (101, 1), (102, 1)]);
    // OLE serials for 2022-01-01, 2022-01-02, 2022-01-03.
    let dictionary = build_long_dictionary(min_data_id, &[44562, 44563, 44564]);

    let descriptor = ColumnDescriptor {
        table_name: "Sales".to_string(),
        name: "Date".to_string(),
        idf: "Sales_Date.col.idf".to_string(),
        idfmeta: "Sales_Date.col.idfmeta".to_string(),
        dictionary: Some("Sales_Date.dictionary".to_string()),
        hidx: None,
        data_type: DATA_TYPE_DATETIME,
        base_id: 0,
        magnitude: 1,
        is_nullable: true,
        cardinality: 3,
    };

    let mut file_cache: HashMap<String, Vec<u8>> = HashMap::new();
    file_cache.insert("Sales_Date.col.idf".to_string(), idf);
    file_cache.insert("Sales_Date.col.idfmeta".to_string(), idfmeta);
    file_cache.insert("Sales_Date.dictionary".to_string(), dictionary);

    let extractor = TableExtractor::new(vec![descriptor], file_cache);
    let table = extractor.get_table("Sales").expect("single decodable column");

    assert_eq!(table.columns, vec!["Date".to_string()]);
    assert_eq!(table.row_count, 3);
    assert_eq!(
        table.column_data[0],
        vec![
            Value::Int(1_640_995_200_000),
            Value::Int(1_641_081_600_000),
            Value::Int(1_641_168_000_000),
        ]
    );
}
