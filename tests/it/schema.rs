//! Builds a minimal, real `metadata.sqlitedb` byte layout (one leaf page per
//! application table) and drives it through the SQLite reader and the
//! Semantic Schema Builder together, exercising the internal-table filter
//! end to end rather than against hand-built `Row`s.

use pbix_datamodel::schema::build_semantic_model;
use pbix_datamodel::sqlite::SqliteDb;

const PAGE_SIZE: usize = 512;

enum Field {
    Null,
    Int(i64),
    Text(String),
}

fn text(s: &str) -> Field {
    Field::Text(s.to_string())
}

fn build_record(values: &[Field]) -> Vec<u8> {
    let mut serials = Vec::new();
    let mut bodies = Vec::new();
    for v in values {
        match v {
            Field::Null => serials.push(0u8),
            Field::Int(n) => {
                assert!((0..128).contains(n));
                serials.push(1u8);
                bodies.push(*n as u8);
            }
            Field::Text(s) => {
                let serial_type = 13 + 2 * s.len();
                assert!(serial_type < 128);
                serials.push(serial_type as u8);
                bodies.extend_from_slice(s.as_bytes());
            }
        }
    }
    let header_size = 1 + serials.len();
    assert!(header_size < 128);
    let mut out = vec![header_size as u8];
    out.extend(serials);
    out.extend(bodies);
    out
}

fn build_cell(rowid: i64, record: &[u8]) -> Vec<u8> {
    assert!(record.len() < 128 && (0..128).contains(&rowid));
    let mut out = vec![record.len() as u8, rowid as u8];
    out.extend_from_slice(record);
    out
}

/// A leaf table b-tree page (type 0x0D); `header_offset` is 100 for page 1
/// (which carries the file header in its first 100 bytes), 0 otherwise.
fn build_leaf_page(header_offset: usize, cells: &[Vec<u8>]) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    page[header_offset] = 0x0D;
    let cell_count = cells.len() as u16;
    page[header_offset + 3..header_offset + 5].copy_from_slice(&cell_count.to_be_bytes());
    let pointer_array_start = header_offset + 8;
    let mut cursor = pointer_array_start + cells.len() * 2;
    for (i, cell) in cells.iter().enumerate() {
        let ptr_off = pointer_array_start + i * 2;
        page[ptr_off..ptr_off + 2].copy_from_slice(&(cursor as u16).to_be_bytes());
        page[cursor..cursor + cell.len()].copy_from_slice(cell);
        cursor += cell.len();
    }
    assert!(cursor <= PAGE_SIZE);
    page
}

/// page1 = sqlite_master{Table->rootpage2, Column->rootpage3}
/// page2 = "Table" rows: Sales, LocalDateTable_abc, H$Sales
/// page3 = "Column", empty
fn build_fixture_db() -> Vec<u8> {
    let mut file_header = vec![0u8; 100];
    file_header[0..16].copy_from_slice(b"SQLite format 3\0");
    file_header[16..18].copy_from_slice(&(PAGE_SIZE as u16).to_be_bytes());

    let master_table_row = build_record(&[text("table"), text("Table"), text("Table"), Field::Int(2), Field::Null]);
    let master_column_row =
        build_record(&[text("table"), text("Column"), text("Column"), Field::Int(3), Field::Null]);
    let mut page1 = build_leaf_page(
        100,
        &[
            build_cell(1, &master_table_row),
            build_cell(2, &master_column_row),
        ],
    );
    page1[0..100].copy_from_slice(&file_header);

    let table_row = |rowid: i64, name: &str| {
        build_cell(
            rowid,
            &build_record(&[Field::Null, Field::Null, text(name), Field::Null, text(""), Field::Int(0)]),
        )
    };
    let page2 = build_leaf_page(
        0,
        &[
            table_row(1, "Sales"),
            table_row(2, "LocalDateTable_abc"),
            table_row(3, "H$Sales"),
        ],
    );

    let page3 = build_leaf_page(0, &[]);

    let mut db = Vec::with_capacity(PAGE_SIZE * 3);
    db.extend_from_slice(&page1);
    db.extend_from_slice(&page2);
    db.extend_from_slice(&page3);
    db
}

#[test]
fn internal_tables_are_filtered_from_semantic_model() {
    let bytes = build_fixture_db();
    let db = SqliteDb::open(&bytes).expect("valid fixture header");
    let model = build_semantic_model(&db).expect("Table/Column present");

    assert_eq!(model.tables.len(), 1);
    assert_eq!(model.tables[0].name, "Sales");
    assert!(model.relationships.is_empty());
}
