use crate::catalog::schema::EntityDescriptor;
use crate::store::Entity;
use serde_json::{Value, json};

/// `{"Columns":[{"Name":..,"Type":..}, ...]}`
pub fn schema_view(descriptor: &EntityDescriptor) -> Value {
    let columns = descriptor
        .columns
        .iter()
        .map(|c| json!({ "Name": c.name, "Type": c.col_type.as_str() }))
        .collect::<Vec<_>>();
    json!({ "Columns": columns })
}

/// `{"Entities":[{col:val, ...}, ...]}`
pub fn page_view<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> Value {
    let rows = entities.into_iter().map(Entity::to_json).collect::<Vec<_>>();
    json!({ "Entities": rows })
}

#[cfg(test)]
mod tests {
    use super::{page_view, schema_view};
    use crate::catalog::schema::EntitySpec;
    use crate::catalog::types::{ColumnType, Value};
    use crate::store::{EntityOwner, EntityStore};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn views_follow_column_order() {
        let desc = Arc::new(
            EntitySpec::new("Tag")
                .column("id", ColumnType::Integer, false)
                .column("label", ColumnType::Text, true)
                .primary_key(1, &["id"])
                .build(),
        );
        assert_eq!(
            schema_view(&desc),
            json!({"Columns":[{"Name":"id","Type":"Integer"},{"Name":"label","Type":"Text"}]})
        );

        let mut store = EntityStore::default();
        let h = store
            .materialize(
                &desc,
                vec![Value::Integer(4), Value::Null],
                EntityOwner::Store,
            )
            .expect("materialize");
        let entity = store.get(h).expect("entity");
        assert_eq!(
            page_view([entity]),
            json!({"Entities":[{"id":4,"label":null}]})
        );
    }
}
