//! Value conversion: affine-mapped raw indices and dictionary values to typed
//! output values per a column's AMO data type (spec §4.10).

use crate::schema::ColumnDescriptor;
use crate::vertipaq::dictionary::DictValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
}

const DATA_TYPE_DATETIME: i32 = 9;
const DATA_TYPE_DECIMAL: i32 = 10;
const DATA_TYPE_BOOLEAN: i32 = 11;
const DATA_TYPE_INT64: i32 = 6;

/// OLE Automation epoch (1899-12-30) expressed in days-since-Unix-epoch.
const OLE_EPOCH_OFFSET_DAYS: f64 = 25569.0;
const MS_PER_DAY: f64 = 86_400_000.0;

pub fn convert_value(raw: Option<&DictValue>, index: u32, col: &ColumnDescriptor) -> Value {
    if col.dictionary.is_some() {
        match raw {
            None => Value::Null,
            Some(DictValue::Str(s)) => Value::Str(s.clone()),
            Some(DictValue::Long(v)) => apply_data_type(*v as f64, col.data_type),
            Some(DictValue::Real(v)) => apply_data_type(*v, col.data_type),
        }
    } else {
        let numeric = (index as i64 + col.base_id) as f64 / col.magnitude as f64;
        apply_data_type(numeric, col.data_type)
    }
}

fn apply_data_type(value: f64, data_type: i32) -> Value {
    match data_type {
        DATA_TYPE_DATETIME => {
            let ms = (value - OLE_EPOCH_OFFSET_DAYS) * MS_PER_DAY;
            Value::Int(ms.round() as i64)
        }
        DATA_TYPE_DECIMAL => Value::Real(value / 10_000.0),
        DATA_TYPE_BOOLEAN => Value::Bool(value != 0.0),
        DATA_TYPE_INT64 => Value::Int(value.round() as i64),
        _ => Value::Real(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(data_type: i32, dictionary: Option<&str>, base_id: i64, magnitude: i64) -> ColumnDescriptor {
        ColumnDescriptor {
            table_name: "T".to_string(),
            name: "C".to_string(),
            idf: "T_C.col.idf".to_string(),
            idfmeta: "T_C.col.idfmeta".to_string(),
            dictionary: dictionary.map(str::to_string),
            hidx: None,
            data_type,
            base_id,
            magnitude,
            is_nullable: true,
            cardinality: 0,
        }
    }

    #[test]
    fn datetime_conversion_matches_ole_epoch_shift() {
        let c = col(DATA_TYPE_DATETIME, Some("dict"), 0, 1);
        let raw = DictValue::Long(44562);
        let v = convert_value(Some(&raw), 0, &c);
        assert_eq!(v, Value::Int(1_640_995_200_000));
    }

    #[test]
    fn decimal_conversion_scales_by_10000() {
        let c = col(DATA_TYPE_DECIMAL, Some("dict"), 0, 1);
        let raw = DictValue::Long(12345);
        let v = convert_value(Some(&raw), 0, &c);
        assert_eq!(v, Value::Real(1.2345));
    }

    #[test]
    fn dictionary_less_column_uses_affine_map() {
        let c = col(DATA_TYPE_INT64, None, 5, 1);
        let v = convert_value(None, 3, &c);
        assert_eq!(v, Value::Int(8));
    }

    #[test]
    fn missing_dictionary_entry_is_null() {
        let c = col(DATA_TYPE_INT64, Some("dict"), 0, 1);
        let v = convert_value(None, 0, &c);
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn string_dictionary_value_passes_through() {
        let c = col(2, Some("dict"), 0, 1);
        let raw = DictValue::Str("hello".to_string());
        let v = convert_value(Some(&raw), 0, &c);
        assert_eq!(v, Value::Str("hello".to_string()));
    }
}
