pub mod schema;
pub mod types;

use crate::catalog::schema::{EntityDescriptor, KeyDescriptor, RelationDescriptor};
use crate::error::OrmError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Read-only registry of entity descriptors shared by cursors and importers.
#[derive(Debug, Clone, Default)]
pub struct MetaModel {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
    keys: HashMap<u32, (String, usize)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaModelDocument {
    entities: Vec<EntityDescriptor>,
}

impl MetaModel {
    pub fn new(descriptors: Vec<EntityDescriptor>) -> Result<Self, OrmError> {
        let mut model = Self::default();
        for descriptor in descriptors {
            model.register(descriptor)?;
        }
        model.validate_references()?;
        Ok(model)
    }

    /// Loads `{"entities":[...]}` as produced by the schema generator.
    pub fn from_json(json: &str) -> Result<Self, OrmError> {
        let doc: MetaModelDocument =
            serde_json::from_str(json).map_err(|e| OrmError::Decode(e.to_string()))?;
        Self::new(doc.entities)
    }

    pub fn to_json(&self) -> Result<String, OrmError> {
        let doc = MetaModelDocument {
            entities: self.entities.values().map(|d| (**d).clone()).collect(),
        };
        serde_json::to_string_pretty(&doc).map_err(|e| OrmError::Decode(e.to_string()))
    }

    fn register(&mut self, descriptor: EntityDescriptor) -> Result<(), OrmError> {
        if self.entities.contains_key(&descriptor.name) {
            return Err(OrmError::configuration(format!(
                "entity '{}' defined twice",
                descriptor.name
            )));
        }
        if descriptor.columns.is_empty() {
            return Err(OrmError::configuration(format!(
                "entity '{}' must define at least one column",
                descriptor.name
            )));
        }
        for (slot, key) in descriptor.all_keys().enumerate() {
            if let Some(col) = key.columns.iter().find(|c| descriptor.column(c).is_none()) {
                return Err(OrmError::configuration(format!(
                    "key '{}' of entity '{}' references unknown column '{col}'",
                    key.name, descriptor.name
                )));
            }
            if let Some((owner, _)) = self.keys.get(&key.id) {
                return Err(OrmError::configuration(format!(
                    "key id {} of entity '{}' already used by '{owner}'",
                    key.id, descriptor.name
                )));
            }
            self.keys.insert(key.id, (descriptor.name.clone(), slot));
        }
        self.entities
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    fn validate_references(&self) -> Result<(), OrmError> {
        for descriptor in self.entities.values() {
            for relation in &descriptor.parent_relations {
                let parent = self.entities.get(&relation.parent).ok_or_else(|| {
                    OrmError::configuration(format!(
                        "relation '{}' of '{}' references unknown entity '{}'",
                        relation.name, descriptor.name, relation.parent
                    ))
                })?;
                for (child_col, parent_col) in &relation.columns {
                    if descriptor.column(child_col).is_none() || parent.column(parent_col).is_none()
                    {
                        return Err(OrmError::configuration(format!(
                            "relation '{}' maps unknown column pair ({child_col}, {parent_col})",
                            relation.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Result<Arc<EntityDescriptor>, OrmError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::configuration(format!("unknown entity '{name}'")))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    /// Resolves a model-wide key id to its entity and key descriptor.
    pub fn key(&self, id: u32) -> Result<(Arc<EntityDescriptor>, KeyDescriptor), OrmError> {
        let (entity, slot) = self
            .keys
            .get(&id)
            .ok_or_else(|| OrmError::configuration(format!("unknown key id {id}")))?;
        let descriptor = self.entity(entity)?;
        let key = descriptor
            .all_keys()
            .nth(*slot)
            .cloned()
            .ok_or_else(|| OrmError::configuration(format!("unknown key id {id}")))?;
        Ok((descriptor, key))
    }

    /// Relations in which `parent` is the referenced side.
    pub fn child_relations(&self, parent: &str) -> Vec<RelationDescriptor> {
        self.entities
            .values()
            .flat_map(|d| d.parent_relations.iter())
            .filter(|r| r.parent == parent)
            .cloned()
            .collect()
    }

    pub fn relation(&self, name: &str) -> Result<RelationDescriptor, OrmError> {
        self.entities
            .values()
            .flat_map(|d| d.parent_relations.iter())
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| OrmError::configuration(format!("unknown relation '{name}'")))
    }
}
