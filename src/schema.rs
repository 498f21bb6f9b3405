//! Semantic Schema Builder and Column Schema Builder (spec §4.5, §4.6): joins
//! rows from `metadata.sqlitedb` into the normalized semantic model and the
//! per-column VertiPaq storage descriptors.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::{
    amo_data_type_label, is_internal_table_name, CalculationItem, Cardinality, Column,
    CrossFilterDirection, Hierarchy, Measure, Partition, Relationship, Role, SemanticModel, Table,
    TablePermission, TableType,
};
use crate::sqlite::SqliteDb;

/// One physical user column's VertiPaq storage coordinates (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub table_name: String,
    pub name: String,
    pub idf: String,
    pub idfmeta: String,
    pub dictionary: Option<String>,
    pub hidx: Option<String>,
    pub data_type: i32,
    pub base_id: i64,
    pub magnitude: i64,
    pub is_nullable: bool,
    pub cardinality: i64,
}

fn column_type_is_rownumber(type_code: i64) -> bool {
    type_code == 3
}

pub fn build_semantic_model(db: &SqliteDb) -> Result<SemanticModel> {
    let table_rows = db.get_table_rows("Table")?;
    let column_rows = db.get_table_rows("Column")?;
    let measure_rows = db.get_table_rows("Measure").unwrap_or_default();
    let relationship_rows = db.get_table_rows("Relationship").unwrap_or_default();
    let role_rows = db.get_table_rows("Role").unwrap_or_default();
    let permission_rows = db.get_table_rows("TablePermission").unwrap_or_default();

    let mut table_names: HashMap<i64, String> = HashMap::new();
    let mut tables: HashMap<i64, Table> = HashMap::new();
    for row in &table_rows {
        let name = row.get(2).as_str().unwrap_or_default().to_string();
        if is_internal_table_name(&name) {
            continue;
        }
        let description = row.get(4).as_str().unwrap_or_default().to_string();
        let is_hidden = row.get(5).as_bool();
        table_names.insert(row.rowid, name.clone());
        tables.insert(
            row.rowid,
            Table {
                name,
                table_type: TableType::Import,
                is_hidden,
                description,
                columns: Vec::new(),
                measures: Vec::new(),
                hierarchies: Vec::new(),
                partitions: Vec::new(),
                calculation_items: Vec::new(),
            },
        );
    }

    let mut column_names: HashMap<i64, (i64, String)> = HashMap::new();
    for row in &column_rows {
        let table_id = row.get(1).as_i64().unwrap_or(-1);
        if !tables.contains_key(&table_id) {
            continue;
        }
        let type_code = row.get(19).as_i64().unwrap_or(1);
        if column_type_is_rownumber(type_code) {
            continue;
        }
        let name = row.get(2).as_str().unwrap_or_default().to_string();
        column_names.insert(row.rowid, (table_id, name.clone()));

        let data_type = amo_data_type_label(row.get(4).as_i64().unwrap_or(0));
        let description = row.get(7).as_str().unwrap_or_default().to_string();
        let is_hidden = row.get(8).as_bool();
        let is_calculated = type_code == 2;
        let expression = if is_calculated {
            row.get(22).as_str().map(str::to_string)
        } else {
            None
        };

        if let Some(table) = tables.get_mut(&table_id) {
            table.columns.push(Column {
                name,
                data_type,
                description,
                is_hidden,
                is_calculated,
                expression,
            });
        }
    }

    for row in &measure_rows {
        let table_id = row.get(1).as_i64().unwrap_or(-1);
        if let Some(table) = tables.get_mut(&table_id) {
            table.measures.push(Measure {
                name: row.get(2).as_str().unwrap_or_default().to_string(),
                description: row.get(3).as_str().unwrap_or_default().to_string(),
                expression: row.get(5).as_str().unwrap_or_default().to_string(),
                format_string: row.get(6).as_str().unwrap_or_default().to_string(),
                is_hidden: row.get(7).as_bool(),
            });
        }
    }

    let mut relationships = Vec::new();
    for row in &relationship_rows {
        let is_active = row.get(3).as_bool();
        let cross_filter_direction = if row.get(5).as_i64().unwrap_or(1) == 2 {
            CrossFilterDirection::Both
        } else {
            CrossFilterDirection::Single
        };
        let from_table_id = row.get(8).as_i64().unwrap_or(-1);
        let to_table_id = row.get(11).as_i64().unwrap_or(-1);
        let from_column_id = row.get(9).as_i64().unwrap_or(-1);
        let to_column_id = row.get(12).as_i64().unwrap_or(-1);
        let from_many = row.get(10).as_i64().unwrap_or(2) == 2;
        let to_many = row.get(13).as_i64().unwrap_or(1) == 2;

        let (Some(from_table), Some(to_table)) =
            (table_names.get(&from_table_id), table_names.get(&to_table_id))
        else {
            continue;
        };
        let (Some((_, from_column)), Some((_, to_column))) = (
            column_names.get(&from_column_id),
            column_names.get(&to_column_id),
        ) else {
            continue;
        };

        let cardinality = match (from_many, to_many) {
            (true, false) => Cardinality::ManyToOne,
            (false, true) => Cardinality::OneToMany,
            (false, false) => Cardinality::OneToOne,
            (true, true) => Cardinality::ManyToMany,
        };

        relationships.push(Relationship {
            from_table: from_table.clone(),
            from_column: from_column.clone(),
            to_table: to_table.clone(),
            to_column: to_column.clone(),
            cardinality,
            cross_filter_direction,
            is_active,
        });
    }

    let mut roles: Vec<Role> = Vec::new();
    let mut role_names: HashMap<i64, usize> = HashMap::new();
    for row in &role_rows {
        let name = row.get(2).as_str().unwrap_or_default().to_string();
        role_names.insert(row.rowid, roles.len());
        roles.push(Role {
            name,
            table_permissions: Vec::new(),
        });
    }
    for row in &permission_rows {
        let role_id = row.get(1).as_i64().unwrap_or(-1);
        let table_id = row.get(2).as_i64().unwrap_or(-1);
        let Some(&role_idx) = role_names.get(&role_id) else {
            continue;
        };
        let Some(table) = table_names.get(&table_id) else {
            continue;
        };
        roles[role_idx].table_permissions.push(TablePermission {
            table: table.clone(),
            filter_expression: row.get(3).as_str().unwrap_or_default().to_string(),
        });
    }

    let mut table_id_order: Vec<i64> = tables.keys().copied().collect();
    table_id_order.sort_unstable();
    let ordered_tables: Vec<Table> = table_id_order
        .into_iter()
        .map(|id| tables.remove(&id).unwrap())
        .collect();

    Ok(SemanticModel {
        name: String::new(),
        compatibility_level: 0,
        culture: String::new(),
        source_format: "pbix".to_string(),
        tables: ordered_tables,
        relationships,
        roles,
    })
}

pub fn build_column_schemas(db: &SqliteDb, model: &SemanticModel) -> Result<Vec<ColumnDescriptor>> {
    let table_rows = db.get_table_rows("Table")?;
    let column_rows = db.get_table_rows("Column")?;
    let column_storage_rows = db.get_table_rows("ColumnStorage").unwrap_or_default();
    let dictionary_storage_rows = db.get_table_rows("DictionaryStorage").unwrap_or_default();
    let partition_storage_rows = db.get_table_rows("ColumnPartitionStorage").unwrap_or_default();
    let storage_file_rows = db.get_table_rows("StorageFile").unwrap_or_default();
    let attr_hierarchy_rows = db.get_table_rows("AttributeHierarchy").unwrap_or_default();
    let attr_hierarchy_storage_rows = db
        .get_table_rows("AttributeHierarchyStorage")
        .unwrap_or_default();

    let surviving_tables: std::collections::HashSet<&str> =
        model.tables.iter().map(|t| t.name.as_str()).collect();

    let mut table_names: HashMap<i64, String> = HashMap::new();
    for row in &table_rows {
        let name = row.get(2).as_str().unwrap_or_default().to_string();
        table_names.insert(row.rowid, name);
    }

    let mut storage_file_names: HashMap<i64, String> = HashMap::new();
    for row in &storage_file_rows {
        storage_file_names.insert(row.rowid, row.get(4).as_str().unwrap_or_default().to_string());
    }

    struct DictInfo {
        base_id: i64,
        magnitude: i64,
        is_nullable: bool,
        filename: Option<String>,
    }
    let mut dict_by_id: HashMap<i64, DictInfo> = HashMap::new();
    for row in &dictionary_storage_rows {
        let storage_file_id = row.get(12).as_i64();
        let filename = storage_file_id.and_then(|id| storage_file_names.get(&id).cloned());
        dict_by_id.insert(
            row.rowid,
            DictInfo {
                base_id: row.get(5).as_i64().unwrap_or(0),
                magnitude: row.get(6).as_i64().unwrap_or(1),
                is_nullable: row.get(8).as_bool(),
                filename,
            },
        );
    }

    // ColumnPartitionStorage.[1] matches a ColumnStorage id, [6] is the StorageFileID
    let mut idf_by_column_storage: HashMap<i64, String> = HashMap::new();
    for row in &partition_storage_rows {
        let column_storage_id = row.get(1).as_i64().unwrap_or(-1);
        let storage_file_id = row.get(6).as_i64();
        if let Some(filename) = storage_file_id.and_then(|id| storage_file_names.get(&id)) {
            idf_by_column_storage.insert(column_storage_id, filename.clone());
        }
    }

    struct ColumnStorageInfo {
        dictionary_storage_id: Option<i64>,
        idf: Option<String>,
        distinct_states: i64,
    }
    let mut column_storage_by_id: HashMap<i64, ColumnStorageInfo> = HashMap::new();
    for row in &column_storage_rows {
        let dictionary_storage_id = row.get(4).as_i64();
        let idf = idf_by_column_storage.get(&row.rowid).cloned();
        column_storage_by_id.insert(
            row.rowid,
            ColumnStorageInfo {
                dictionary_storage_id,
                idf,
                distinct_states: row.get(11).as_i64().unwrap_or(0),
            },
        );
    }

    // AttributeHierarchy.[1]=ColumnID, [3]=AttributeHierarchyStorageID -> AttributeHierarchyStorage[9]=StorageFileID
    let mut attr_storage_file: HashMap<i64, String> = HashMap::new();
    for row in &attr_hierarchy_storage_rows {
        let storage_file_id = row.get(9).as_i64();
        if let Some(filename) = storage_file_id.and_then(|id| storage_file_names.get(&id)) {
            attr_storage_file.insert(row.rowid, filename.clone());
        }
    }
    let mut hidx_by_column: HashMap<i64, String> = HashMap::new();
    for row in &attr_hierarchy_rows {
        let column_id = row.get(1).as_i64().unwrap_or(-1);
        let storage_id = row.get(3).as_i64();
        if let Some(filename) = storage_id.and_then(|id| attr_storage_file.get(&id)) {
            hidx_by_column.insert(column_id, filename.clone());
        }
    }

    let mut out = Vec::new();
    for row in &column_rows {
        let type_code = row.get(19).as_i64().unwrap_or(1);
        if type_code != 1 && type_code != 2 {
            continue;
        }
        let table_id = row.get(1).as_i64().unwrap_or(-1);
        let Some(table_name) = table_names.get(&table_id) else {
            continue;
        };
        if !surviving_tables.contains(table_name.as_str()) {
            continue;
        }

        let column_storage_id = row.get(18).as_i64();
        let Some(storage) =
            column_storage_id.and_then(|id| column_storage_by_id.get(&id))
        else {
            continue;
        };
        let Some(idf) = storage.idf.clone() else {
            continue;
        };
        let idfmeta = format!("{idf}meta");

        let dict_info = storage
            .dictionary_storage_id
            .and_then(|id| dict_by_id.get(&id));

        let name = row.get(2).as_str().unwrap_or_default().to_string();
        let hidx = hidx_by_column.get(&row.rowid).cloned();

        out.push(ColumnDescriptor {
            table_name: table_name.clone(),
            name,
            idf,
            idfmeta,
            dictionary: dict_info.and_then(|d| d.filename.clone()),
            hidx,
            data_type: row.get(4).as_i64().unwrap_or(0) as i32,
            base_id: dict_info.map(|d| d.base_id).unwrap_or(0),
            magnitude: dict_info.map(|d| d.magnitude).unwrap_or(1),
            is_nullable: dict_info.map(|d| d.is_nullable).unwrap_or(true),
            cardinality: storage.distinct_states,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{is_internal_table_name, amo_data_type_label};

    #[test]
    fn internal_table_prefixes_are_recognized() {
        assert!(is_internal_table_name("LocalDateTable_abc"));
        assert!(is_internal_table_name("H$Sales"));
        assert!(!is_internal_table_name("Sales"));
    }

    #[test]
    fn amo_type_labels_match_spec_codes() {
        assert_eq!(amo_data_type_label(2), "string");
        assert_eq!(amo_data_type_label(9), "dateTime");
        assert_eq!(amo_data_type_label(10), "decimal");
    }
}
