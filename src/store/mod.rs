use crate::catalog::schema::EntityDescriptor;
use crate::catalog::types::{Row, Value};
use crate::error::OrmError;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

pub type SharedStore = Arc<Mutex<EntityStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorId(u64);

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor-{}", self.0)
    }
}

/// Exactly one owner per entity. A cursor-owned entity may be handed to the
/// store, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOwner {
    Store,
    Cursor(CursorId),
}

#[derive(Debug, Clone)]
pub struct Entity {
    descriptor: Arc<EntityDescriptor>,
    values: Vec<Value>,
    owner: EntityOwner,
    persisted: bool,
}

impl Entity {
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn owner(&self) -> EntityOwner {
        self.owner
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn get(&self, column: &str) -> Result<&Value, OrmError> {
        self.descriptor
            .column_index(column)
            .map(|idx| &self.values[idx])
            .ok_or_else(|| OrmError::UnknownColumn {
                entity: self.descriptor.name.clone(),
                column: column.to_string(),
            })
    }

    /// Primary key values in key-column order.
    pub fn primary_key(&self) -> Vec<Value> {
        self.descriptor
            .primary_key_indices()
            .into_iter()
            .map(|idx| self.values[idx].clone())
            .collect()
    }

    /// `None` until every primary key column holds a value.
    fn identity(&self) -> Option<(String, Vec<Value>)> {
        let key = self.primary_key();
        if key.is_empty() || key.iter().any(Value::is_null) {
            return None;
        }
        Some((self.descriptor.name.clone(), key))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .descriptor
            .columns
            .iter()
            .zip(&self.values)
            .map(|(col, value)| (col.name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Arena of materialized entities with an identity map and destroy
/// notifications for cursors that reference them.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<EntityHandle, Entity>,
    identities: HashMap<(String, Vec<Value>), EntityHandle>,
    watchers: HashMap<EntityHandle, BTreeSet<CursorId>>,
    invalidated: HashMap<CursorId, Vec<EntityHandle>>,
    next_id: u64,
    next_cursor_id: u64,
}

impl EntityStore {
    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn register_cursor(&mut self) -> CursorId {
        self.next_cursor_id += 1;
        let id = CursorId(self.next_cursor_id);
        self.invalidated.insert(id, Vec::new());
        id
    }

    /// Unregisters `cursor`. Entities it still owns at this point have
    /// outlived their owner.
    pub fn release_cursor(&mut self, cursor: CursorId) -> Result<(), OrmError> {
        self.invalidated.remove(&cursor);
        self.watchers.retain(|_, set| {
            set.remove(&cursor);
            !set.is_empty()
        });
        let leaked = self.owned_by(cursor);
        if !leaked.is_empty() {
            return Err(OrmError::ResourceLeak {
                message: format!("{cursor} released while owning {} entities", leaked.len()),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle)
    }

    /// Creates an entity with every column NULL.
    pub fn create(
        &mut self,
        descriptor: Arc<EntityDescriptor>,
        owner: EntityOwner,
    ) -> EntityHandle {
        let values = vec![Value::Null; descriptor.columns.len()];
        self.insert(Entity {
            descriptor,
            values,
            owner,
            persisted: false,
        })
    }

    pub fn check_row(descriptor: &EntityDescriptor, row: &Row) -> Result<(), OrmError> {
        if row.len() != descriptor.columns.len() {
            return Err(OrmError::Decode(format!(
                "row for '{}' has {} values, expected {}",
                descriptor.name,
                row.len(),
                descriptor.columns.len()
            )));
        }
        Ok(())
    }

    /// Turns a backend row into an entity. A row whose primary key is already
    /// present reuses that entity and refreshes its values. Loading it as
    /// store-owned promotes a cursor-owned entity to the store; any other
    /// recorded owner is left as is.
    pub fn materialize(
        &mut self,
        descriptor: &Arc<EntityDescriptor>,
        row: Row,
        owner: EntityOwner,
    ) -> Result<EntityHandle, OrmError> {
        Self::check_row(descriptor, &row)?;
        let entity = Entity {
            descriptor: Arc::clone(descriptor),
            values: row,
            owner,
            persisted: true,
        };
        if let Some(identity) = entity.identity()
            && let Some(&existing) = self.identities.get(&identity)
            && let Some(current) = self.entities.get_mut(&existing)
        {
            current.values = entity.values;
            current.persisted = true;
            if owner == EntityOwner::Store {
                current.owner = EntityOwner::Store;
            }
            return Ok(existing);
        }
        let handle = self.insert(entity);
        self.index_identity(handle);
        Ok(handle)
    }

    fn insert(&mut self, entity: Entity) -> EntityHandle {
        self.next_id += 1;
        let handle = EntityHandle(self.next_id);
        self.entities.insert(handle, entity);
        handle
    }

    /// Records `handle` under its primary key unless another live entity
    /// already holds that identity.
    fn index_identity(&mut self, handle: EntityHandle) {
        let Some(identity) = self.entities.get(&handle).and_then(Entity::identity) else {
            return;
        };
        let held = self
            .identities
            .get(&identity)
            .is_some_and(|other| *other != handle && self.entities.contains_key(other));
        if !held {
            self.identities.insert(identity, handle);
        }
    }

    pub fn get(&self, handle: EntityHandle) -> Result<&Entity, OrmError> {
        self.entities
            .get(&handle)
            .ok_or(OrmError::EntityNotFound { handle })
    }

    pub fn find(&self, entity: &str, primary_key: &[Value]) -> Option<EntityHandle> {
        self.identities
            .get(&(entity.to_string(), primary_key.to_vec()))
            .copied()
    }

    pub fn set(
        &mut self,
        handle: EntityHandle,
        column: &str,
        value: Value,
    ) -> Result<(), OrmError> {
        let entity = self
            .entities
            .get_mut(&handle)
            .ok_or(OrmError::EntityNotFound { handle })?;
        let idx = entity
            .descriptor
            .column_index(column)
            .ok_or_else(|| OrmError::UnknownColumn {
                entity: entity.descriptor.name.clone(),
                column: column.to_string(),
            })?;
        entity.values[idx] = value;
        Ok(())
    }

    pub fn mark_persisted(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let entity = self
            .entities
            .get_mut(&handle)
            .ok_or(OrmError::EntityNotFound { handle })?;
        entity.persisted = true;
        self.index_identity(handle);
        Ok(())
    }

    /// Destroys an entity and queues its handle on every cursor watching it.
    pub fn destroy(&mut self, handle: EntityHandle) -> Result<Entity, OrmError> {
        self.remove(handle, None)
            .ok_or(OrmError::EntityNotFound { handle })
    }

    fn remove(&mut self, handle: EntityHandle, leaving: Option<CursorId>) -> Option<Entity> {
        let entity = self.entities.remove(&handle)?;
        if let Some(identity) = entity.identity()
            && self.identities.get(&identity) == Some(&handle)
        {
            self.identities.remove(&identity);
        }
        for cursor in self.watchers.remove(&handle).unwrap_or_default() {
            if Some(cursor) == leaving {
                continue;
            }
            if let Some(queue) = self.invalidated.get_mut(&cursor) {
                queue.push(handle);
            }
        }
        Some(entity)
    }

    pub fn owned_by(&self, cursor: CursorId) -> Vec<EntityHandle> {
        let mut owned = self
            .entities
            .iter()
            .filter(|(_, e)| e.owner == EntityOwner::Cursor(cursor))
            .map(|(h, _)| *h)
            .collect::<Vec<_>>();
        owned.sort();
        owned
    }

    /// Destroys those of `handles` that `cursor` owns; returns how many.
    pub fn destroy_owned(&mut self, cursor: CursorId, handles: &[EntityHandle]) -> usize {
        let mut destroyed = 0;
        for handle in handles {
            let owned = self
                .entities
                .get(handle)
                .is_some_and(|e| e.owner == EntityOwner::Cursor(cursor));
            if owned && self.remove(*handle, Some(cursor)).is_some() {
                destroyed += 1;
            }
        }
        destroyed
    }

    pub fn watch(&mut self, cursor: CursorId, handles: &[EntityHandle]) {
        for handle in handles {
            self.watchers.entry(*handle).or_default().insert(cursor);
        }
    }

    pub fn unwatch(&mut self, cursor: CursorId, handles: &[EntityHandle]) {
        for handle in handles {
            if let Some(set) = self.watchers.get_mut(handle) {
                set.remove(&cursor);
                if set.is_empty() {
                    self.watchers.remove(handle);
                }
            }
        }
    }

    /// Drains handles destroyed elsewhere since the cursor last asked.
    pub fn take_invalidated(&mut self, cursor: CursorId) -> Vec<EntityHandle> {
        self.invalidated
            .get_mut(&cursor)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityOwner, EntityStore};
    use crate::catalog::schema::{EntityDescriptor, EntitySpec};
    use crate::catalog::types::{ColumnType, Value};
    use crate::error::OrmError;
    use std::sync::Arc;

    fn person() -> Arc<EntityDescriptor> {
        Arc::new(
            EntitySpec::new("Person")
                .column("id", ColumnType::Integer, false)
                .column("name", ColumnType::Text, true)
                .primary_key(1, &["id"])
                .build(),
        )
    }

    fn row(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::Text(name.into())]
    }

    #[test]
    fn identity_map_reuses_handle_and_refreshes_values() {
        let mut store = EntityStore::default();
        let desc = person();
        let a = store
            .materialize(&desc, row(1, "ada"), EntityOwner::Store)
            .expect("first");
        let b = store
            .materialize(&desc, row(1, "ada lovelace"), EntityOwner::Store)
            .expect("second");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(a).expect("entity").get("name").expect("name"),
            &Value::Text("ada lovelace".into())
        );
        assert_eq!(store.find("Person", &[Value::Integer(1)]), Some(a));
    }

    #[test]
    fn destroy_notifies_watching_cursors_only() {
        let mut store = EntityStore::default();
        let desc = person();
        let c1 = store.register_cursor();
        let c2 = store.register_cursor();
        let h = store
            .materialize(&desc, row(1, "a"), EntityOwner::Store)
            .expect("materialize");
        store.watch(c1, &[h]);
        store.destroy(h).expect("destroy");
        assert_eq!(store.take_invalidated(c1), vec![h]);
        assert!(store.take_invalidated(c1).is_empty());
        assert!(store.take_invalidated(c2).is_empty());
        assert!(matches!(
            store.get(h),
            Err(OrmError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn destroy_owned_skips_foreign_entities() {
        let mut store = EntityStore::default();
        let desc = person();
        let c1 = store.register_cursor();
        let own = store
            .materialize(&desc, row(1, "a"), EntityOwner::Cursor(c1))
            .expect("own");
        let shared = store
            .materialize(&desc, row(2, "b"), EntityOwner::Store)
            .expect("shared");
        assert_eq!(store.destroy_owned(c1, &[own, shared]), 1);
        assert!(!store.contains(own));
        assert!(store.contains(shared));
        store.release_cursor(c1).expect("no leak");
    }

    #[test]
    fn releasing_cursor_with_owned_entities_is_a_leak() {
        let mut store = EntityStore::default();
        let desc = person();
        let c1 = store.register_cursor();
        store
            .materialize(&desc, row(1, "a"), EntityOwner::Cursor(c1))
            .expect("own");
        let err = store.release_cursor(c1).expect_err("leak");
        assert!(matches!(err, OrmError::ResourceLeak { .. }));
    }

    #[test]
    fn store_load_promotes_cursor_owned_entity() {
        let mut store = EntityStore::default();
        let desc = person();
        let c1 = store.register_cursor();
        let h = store
            .materialize(&desc, row(1, "a"), EntityOwner::Cursor(c1))
            .expect("private");
        let again = store
            .materialize(&desc, row(1, "a"), EntityOwner::Store)
            .expect("kept");
        assert_eq!(h, again);
        assert_eq!(store.get(h).expect("entity").owner(), EntityOwner::Store);
        assert_eq!(store.destroy_owned(c1, &[h]), 0);
        assert!(store.contains(h));
        store.release_cursor(c1).expect("no leak");
    }

    #[test]
    fn cursor_load_keeps_store_ownership() {
        let mut store = EntityStore::default();
        let desc = person();
        let c1 = store.register_cursor();
        let h = store
            .materialize(&desc, row(1, "a"), EntityOwner::Store)
            .expect("shared");
        store
            .materialize(&desc, row(1, "a"), EntityOwner::Cursor(c1))
            .expect("reload");
        assert_eq!(store.get(h).expect("entity").owner(), EntityOwner::Store);
    }

    #[test]
    fn persisting_a_duplicate_keeps_the_loaded_identity() {
        let mut store = EntityStore::default();
        let desc = person();
        let loaded = store
            .materialize(&desc, row(1, "a"), EntityOwner::Store)
            .expect("loaded");
        let fresh = store.create(Arc::clone(&desc), EntityOwner::Store);
        store.set(fresh, "id", Value::Integer(1)).expect("id");
        store.mark_persisted(fresh).expect("persist");
        assert_eq!(store.find("Person", &[Value::Integer(1)]), Some(loaded));

        store.destroy(fresh).expect("destroy");
        assert_eq!(store.find("Person", &[Value::Integer(1)]), Some(loaded));
    }

    #[test]
    fn set_rejects_unknown_column() {
        let mut store = EntityStore::default();
        let h = store.create(person(), EntityOwner::Store);
        store
            .set(h, "name", Value::Text("x".into()))
            .expect("set");
        let err = store.set(h, "age", Value::Integer(3)).expect_err("unknown");
        assert!(matches!(err, OrmError::UnknownColumn { .. }));
        assert!(!store.get(h).expect("get").is_persisted());
    }
}
