//! The normalized semantic-model surface (spec §3): tables, columns,
//! measures, relationships, and roles, independent of VertiPaq storage.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Import,
    DirectQuery,
    Dual,
    Calculated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossFilterDirection {
    Single,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub description: String,
    pub is_hidden: bool,
    pub is_calculated: bool,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub name: String,
    pub description: String,
    pub expression: String,
    pub format_string: String,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hierarchy {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Partition {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalculationItem {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub table_type: TableType,
    pub is_hidden: bool,
    pub description: String,
    pub columns: Vec<Column>,
    pub measures: Vec<Measure>,
    pub hierarchies: Vec<Hierarchy>,
    pub partitions: Vec<Partition>,
    pub calculation_items: Vec<CalculationItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality: Cardinality,
    pub cross_filter_direction: CrossFilterDirection,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TablePermission {
    pub table: String,
    pub filter_expression: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub name: String,
    pub table_permissions: Vec<TablePermission>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticModel {
    pub name: String,
    pub compatibility_level: i64,
    pub culture: String,
    pub source_format: String,
    pub tables: Vec<Table>,
    pub relationships: Vec<Relationship>,
    pub roles: Vec<Role>,
}

/// Internal-object name prefixes hidden from the emitted semantic model (spec §3).
pub const INTERNAL_TABLE_PREFIXES: &[&str] =
    &["LocalDateTable_", "DateTableTemplate_", "H$", "R$", "U$"];

pub fn is_internal_table_name(name: &str) -> bool {
    INTERNAL_TABLE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Maps an AMO data-type code to its textual label (spec §3).
pub fn amo_data_type_label(code: i64) -> String {
    match code {
        2 => "string",
        6 => "int64",
        8 => "double",
        9 => "dateTime",
        10 => "decimal",
        11 => "boolean",
        17 => "binary",
        _ => "unknown",
    }
    .to_string()
}
