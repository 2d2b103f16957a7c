use crate::backend::{ColumnFilter, FilterMatch};
use crate::catalog::MetaModel;
use crate::catalog::schema::EntityDescriptor;
use crate::catalog::types::{ColumnType, Value};
use crate::error::OrmError;
use serde::Deserialize;
use std::sync::Arc;

/// `{"KeyID":<id>,"Columns":[v1,v2,...]}` addressing rows through one key.
/// Null entries do not filter; strings match text columns by prefix and
/// other columns exactly.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CompactKeyDescription {
    #[serde(rename = "KeyID")]
    pub key_id: u32,
    #[serde(rename = "Columns", default)]
    pub columns: Vec<serde_json::Value>,
}

impl CompactKeyDescription {
    pub fn parse(json: &str) -> Result<Self, OrmError> {
        serde_json::from_str(json).map_err(|e| OrmError::Decode(e.to_string()))
    }

    pub fn resolve(
        &self,
        model: &MetaModel,
    ) -> Result<(Arc<EntityDescriptor>, Vec<ColumnFilter>), OrmError> {
        let (descriptor, key) = model.key(self.key_id)?;
        if self.columns.len() > key.columns.len() {
            return Err(OrmError::Validation(format!(
                "key {} has {} columns, description supplies {}",
                key.name,
                key.columns.len(),
                self.columns.len()
            )));
        }
        let mut filters = Vec::new();
        for (column, raw) in key.columns.iter().zip(&self.columns) {
            if raw.is_null() {
                continue;
            }
            let index = descriptor.column_index(column).ok_or_else(|| {
                OrmError::UnknownColumn {
                    entity: descriptor.name.clone(),
                    column: column.clone(),
                }
            })?;
            let col_type = descriptor.columns[index].col_type;
            let (value, mode) = match raw {
                serde_json::Value::String(s) if col_type == ColumnType::Text => {
                    (Value::Text(s.as_str().into()), FilterMatch::Prefix)
                }
                serde_json::Value::String(s) => {
                    (parse_exact(s, col_type, column)?, FilterMatch::Equals)
                }
                other => (coerce(Value::from_json(other)?, col_type), FilterMatch::Equals),
            };
            filters.push(ColumnFilter {
                column: column.clone(),
                index,
                value,
                mode,
            });
        }
        Ok((descriptor, filters))
    }
}

/// A string supplied for a non-text column must spell a value of that type.
fn parse_exact(text: &str, col_type: ColumnType, column: &str) -> Result<Value, OrmError> {
    match Value::parse(col_type, text) {
        Ok(Value::Null) | Err(_) => Err(OrmError::Validation(format!(
            "'{text}' is not a {} value for key column {column}",
            col_type.as_str()
        ))),
        Ok(value) => Ok(value),
    }
}

fn coerce(value: Value, col_type: ColumnType) -> Value {
    match (value, col_type) {
        (Value::Integer(v), ColumnType::Float) => Value::Float(v as f64),
        (Value::Integer(v), ColumnType::Timestamp) => Value::Timestamp(v),
        (Value::Integer(v), ColumnType::Boolean) => Value::Boolean(v != 0),
        (Value::Integer(v), ColumnType::Text) => Value::Text(v.to_string().into()),
        (value, _) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::CompactKeyDescription;
    use crate::backend::FilterMatch;
    use crate::catalog::MetaModel;
    use crate::catalog::schema::EntitySpec;
    use crate::catalog::types::{ColumnType, Value};
    use crate::error::OrmError;

    fn model() -> MetaModel {
        MetaModel::new(vec![
            EntitySpec::new("Column")
                .column("entity_id", ColumnType::Integer, false)
                .column("name", ColumnType::Text, false)
                .column("weight", ColumnType::Float, true)
                .primary_key(10, &["entity_id", "name"])
                .key(11, "IX_Column_weight", &["weight"], false)
                .build(),
        ])
        .expect("model")
    }

    #[test]
    fn nulls_skip_and_strings_match_by_prefix() {
        let desc = CompactKeyDescription::parse(r#"{"KeyID":10,"Columns":[null,"Na"]}"#)
            .expect("parse");
        let (entity, filters) = desc.resolve(&model()).expect("resolve");
        assert_eq!(entity.name, "Column");
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].column, "name");
        assert_eq!(filters[0].index, 1);
        assert_eq!(filters[0].mode, FilterMatch::Prefix);
    }

    #[test]
    fn numbers_are_coerced_to_column_type() {
        let desc = CompactKeyDescription::parse(r#"{"KeyID":11,"Columns":[2]}"#).expect("parse");
        let (_, filters) = desc.resolve(&model()).expect("resolve");
        assert_eq!(filters[0].value, Value::Float(2.0));
        assert_eq!(filters[0].mode, FilterMatch::Equals);
    }

    #[test]
    fn strings_for_non_text_columns_match_exactly() {
        let desc = CompactKeyDescription::parse(r#"{"KeyID":10,"Columns":["42"]}"#)
            .expect("parse");
        let (_, filters) = desc.resolve(&model()).expect("resolve");
        assert_eq!(filters[0].column, "entity_id");
        assert_eq!(filters[0].value, Value::Integer(42));
        assert_eq!(filters[0].mode, FilterMatch::Equals);

        let err = CompactKeyDescription::parse(r#"{"KeyID":11,"Columns":["heavy"]}"#)
            .expect("parse")
            .resolve(&model())
            .expect_err("not a float");
        assert!(matches!(err, OrmError::Validation(_)));
    }

    #[test]
    fn rejects_unknown_key_and_surplus_columns() {
        let err = CompactKeyDescription::parse(r#"{"KeyID":99,"Columns":[]}"#)
            .expect("parse")
            .resolve(&model())
            .expect_err("unknown key");
        assert!(matches!(err, OrmError::Configuration { .. }));

        let err = CompactKeyDescription::parse(r#"{"KeyID":11,"Columns":[1,2]}"#)
            .expect("parse")
            .resolve(&model())
            .expect_err("surplus");
        assert!(matches!(err, OrmError::Validation(_)));

        assert!(CompactKeyDescription::parse("{\"Columns\":[]}").is_err());
    }
}
