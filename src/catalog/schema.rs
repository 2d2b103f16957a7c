use crate::catalog::types::ColumnType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
        }
    }
}

/// A primary or secondary key. `id` is unique across the whole meta-model so a
/// compact key description can address it without naming the entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub id: u32,
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Parent/child relation as seen from the child: `columns` pairs each child
/// column with the parent column it references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub name: String,
    pub parent: String,
    pub child: String,
    pub columns: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: String,
    /// Backend table name; defaults to the entity name.
    #[serde(default)]
    pub table: Option<String>,
    pub columns: Vec<ColumnDef>,
    pub primary_key: KeyDescriptor,
    #[serde(default)]
    pub keys: Vec<KeyDescriptor>,
    #[serde(default)]
    pub parent_relations: Vec<RelationDescriptor>,
}

impl EntityDescriptor {
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect()
    }

    /// Primary key first, then secondary keys in declaration order.
    pub fn all_keys(&self) -> impl Iterator<Item = &KeyDescriptor> {
        std::iter::once(&self.primary_key).chain(self.keys.iter())
    }

    pub fn parent_names(&self) -> impl Iterator<Item = &str> {
        self.parent_relations.iter().map(|r| r.parent.as_str())
    }
}

/// Builder for descriptors defined in code rather than loaded from JSON.
#[derive(Debug, Clone)]
pub struct EntitySpec {
    descriptor: EntityDescriptor,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            descriptor: EntityDescriptor {
                primary_key: KeyDescriptor {
                    id: 0,
                    name: format!("PK_{name}"),
                    columns: Vec::new(),
                    unique: true,
                },
                name,
                table: None,
                columns: Vec::new(),
                keys: Vec::new(),
                parent_relations: Vec::new(),
            },
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.descriptor.table = Some(table.into());
        self
    }

    pub fn column(
        mut self,
        name: impl Into<String>,
        col_type: ColumnType,
        nullable: bool,
    ) -> Self {
        self.descriptor
            .columns
            .push(ColumnDef::new(name, col_type, nullable));
        self
    }

    pub fn primary_key(mut self, id: u32, columns: &[&str]) -> Self {
        self.descriptor.primary_key.id = id;
        self.descriptor.primary_key.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn key(
        mut self,
        id: u32,
        name: impl Into<String>,
        columns: &[&str],
        unique: bool,
    ) -> Self {
        self.descriptor.keys.push(KeyDescriptor {
            id,
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique,
        });
        self
    }

    /// Declares that this entity references `parent` through `columns`
    /// (child column, parent column).
    pub fn parent(
        mut self,
        name: impl Into<String>,
        parent: impl Into<String>,
        columns: &[(&str, &str)],
    ) -> Self {
        let child = self.descriptor.name.clone();
        self.descriptor.parent_relations.push(RelationDescriptor {
            name: name.into(),
            parent: parent.into(),
            child,
            columns: columns
                .iter()
                .map(|(c, p)| ((*c).to_string(), (*p).to_string()))
                .collect(),
        });
        self
    }

    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}
