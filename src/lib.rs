pub mod backend;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod import;
pub mod store;

pub use crate::backend::memory::MemoryBackend;
pub use crate::backend::{BackendKind, CancellationToken, SqlBackend};
pub use crate::catalog::MetaModel;
pub use crate::catalog::schema::{EntityDescriptor, EntitySpec};
pub use crate::catalog::types::{ColumnType, Value};
pub use crate::config::{ImportTarget, RuntimeConfig};
pub use crate::cursor::PagedCursor;
pub use crate::cursor::procedure::ProcedureNameAllocator;
pub use crate::error::{OrmError, OrmErrorCode};
pub use crate::import::{BulkImporter, ImportProgress, ImportReport, ImportWarning};
pub use crate::store::{EntityHandle, EntityOwner, SharedStore};

use crate::backend::sql::QueryShape;
use crate::backend::{ColumnFilter, Connection, FilterMatch, Pagination, Statement};
use crate::cursor::PagingStrategy;
use crate::cursor::key::CompactKeyDescription;
use crate::cursor::offset::OffsetStrategy;
use crate::cursor::procedure::ProcedureStrategy;
use crate::store::EntityStore;
use std::sync::Arc;
use tracing::{debug, info};

/// One unit of work against a backend: the meta-model, the entity store that
/// cursors and imports materialize into, and the connection they share.
#[derive(Debug)]
pub struct Workspace {
    model: Arc<MetaModel>,
    store: SharedStore,
    connection: Connection,
    names: Arc<ProcedureNameAllocator>,
    config: RuntimeConfig,
}

impl Workspace {
    pub fn open(
        model: MetaModel,
        backend: Arc<dyn SqlBackend>,
        config: RuntimeConfig,
    ) -> Result<Self, OrmError> {
        let names = Arc::new(ProcedureNameAllocator::new(config.procedure_prefix.clone()));
        Self::open_with_allocator(model, backend, config, names)
    }

    /// Opens a workspace that draws procedure names from a shared allocator,
    /// so several workspaces on one backend never generate the same name.
    pub fn open_with_allocator(
        model: MetaModel,
        backend: Arc<dyn SqlBackend>,
        config: RuntimeConfig,
        names: Arc<ProcedureNameAllocator>,
    ) -> Result<Self, OrmError> {
        config.validate()?;
        let connection = Connection::new(backend, CancellationToken::new());
        info!(
            backend = %connection.kind(),
            entities = model.entities().count(),
            default_page_size = config.default_page_size,
            max_page_size = config.max_page_size,
            keep_objects = config.keep_objects,
            progress_interval = config.progress_interval,
            "workspace opened"
        );
        Ok(Self {
            model: Arc::new(model),
            store: EntityStore::shared(),
            connection,
            names,
            config,
        })
    }

    pub fn model(&self) -> &Arc<MetaModel> {
        &self.model
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Cancels every backend call issued through this workspace from now on.
    pub fn cancel_token(&self) -> &CancellationToken {
        self.connection.cancel_token()
    }

    /// Cursor over `entity` rows matching `where_clause`. No statement runs
    /// until the first navigation call. A `page_size` of 0 selects the
    /// configured default.
    pub fn cursor(
        &self,
        entity: &str,
        where_clause: Option<&str>,
        order_by: Option<&str>,
        page_size: u64,
    ) -> Result<PagedCursor, OrmError> {
        let descriptor = self.model.entity(entity)?;
        let shape = QueryShape::new(descriptor)
            .where_clause(where_clause.map(str::to_string))
            .order_by(order_by.map(str::to_string));
        self.open_cursor(shape, page_size)
    }

    /// Cursor over the children of `parent` along `relation`.
    pub fn relation_cursor(
        &self,
        relation: &str,
        parent: EntityHandle,
        page_size: u64,
        where_clause: Option<&str>,
        order_by: Option<&str>,
    ) -> Result<PagedCursor, OrmError> {
        let relation = self.model.relation(relation)?;
        let child = self.model.entity(&relation.child)?;
        let mut shape = QueryShape::new(Arc::clone(&child))
            .where_clause(where_clause.map(str::to_string))
            .order_by(order_by.map(str::to_string));
        {
            let store = self.store.lock();
            let parent_entity = store.get(parent)?;
            if parent_entity.name() != relation.parent {
                return Err(OrmError::Validation(format!(
                    "relation {} expects a {} parent, got {}",
                    relation.name,
                    relation.parent,
                    parent_entity.name()
                )));
            }
            for (child_column, parent_column) in &relation.columns {
                let value = parent_entity.get(parent_column)?;
                if value.is_null() {
                    return Err(OrmError::Validation(format!(
                        "parent column {}.{parent_column} is null",
                        relation.parent
                    )));
                }
                let index = child.column_index(child_column).ok_or_else(|| {
                    OrmError::UnknownColumn {
                        entity: child.name.clone(),
                        column: child_column.clone(),
                    }
                })?;
                shape = shape.filter(ColumnFilter {
                    column: child_column.clone(),
                    index,
                    value: value.clone(),
                    mode: FilterMatch::Equals,
                });
            }
        }
        self.open_cursor(shape, page_size)
    }

    /// Cursor addressed by a compact key description
    /// (`{"KeyID":<id>,"Columns":[...]}`).
    pub fn key_cursor(&self, description: &str, page_size: u64) -> Result<PagedCursor, OrmError> {
        let key = CompactKeyDescription::parse(description)?;
        let (descriptor, filters) = key.resolve(&self.model)?;
        let shape = filters
            .into_iter()
            .fold(QueryShape::new(descriptor), QueryShape::filter);
        self.open_cursor(shape, page_size)
    }

    fn open_cursor(&self, shape: QueryShape, page_size: u64) -> Result<PagedCursor, OrmError> {
        let page_size = match page_size {
            0 => self.config.default_page_size,
            n if n > self.config.max_page_size => {
                return Err(OrmError::configuration(format!(
                    "page size {n} exceeds max_page_size {}",
                    self.config.max_page_size
                )));
            }
            n => n,
        };
        let descriptor = Arc::clone(&shape.descriptor);
        let strategy: Box<dyn PagingStrategy> = match self.connection.kind().pagination()? {
            Pagination::Offset(syntax) => Box::new(OffsetStrategy::new(
                self.connection.clone(),
                shape,
                syntax,
            )),
            Pagination::Procedure => Box::new(ProcedureStrategy::new(
                self.connection.clone(),
                shape,
                Arc::clone(&self.names),
            )),
        };
        let cursor = PagedCursor::new(
            Arc::clone(&self.store),
            descriptor,
            strategy,
            page_size,
            self.config.keep_objects,
        );
        debug!(
            cursor = %cursor.id(),
            entity = %cursor.descriptor().name,
            strategy = cursor.strategy_name(),
            page_size,
            "cursor created"
        );
        Ok(cursor)
    }

    /// Creates an unsaved entity owned by the store.
    pub fn create(&self, entity: &str) -> Result<EntityHandle, OrmError> {
        let descriptor = self.model.entity(entity)?;
        Ok(self.store.lock().create(descriptor, EntityOwner::Store))
    }

    /// Inserts the entity's current values and marks it persisted.
    pub fn persist(&self, handle: EntityHandle) -> Result<(), OrmError> {
        let (descriptor, values) = {
            let store = self.store.lock();
            let entity = store.get(handle)?;
            (Arc::clone(entity.descriptor()), entity.values().to_vec())
        };
        if let Some(column) = descriptor
            .columns
            .iter()
            .zip(&values)
            .find(|(def, value)| !def.nullable && value.is_null())
            .map(|(def, _)| def)
        {
            return Err(OrmError::Validation(format!(
                "{}.{} is not nullable",
                descriptor.name, column.name
            )));
        }
        let sql = self.connection.dialect().insert_sql(&descriptor, &values);
        self.connection.execute(&Statement::Insert {
            entity: descriptor.name.clone(),
            values,
            sql,
        })?;
        self.store.lock().mark_persisted(handle)
    }

    /// Importer loading the `wanted` entity types, in that dependency order,
    /// from the `target` database block of a document.
    pub fn importer(
        &self,
        target: ImportTarget,
        wanted: &[&str],
    ) -> Result<BulkImporter<'_>, OrmError> {
        let wanted = wanted
            .iter()
            .map(|name| self.model.entity(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BulkImporter::new(self, target, wanted))
    }
}
