pub mod element;
pub mod queue;
pub mod reader;
pub mod text;

use crate::Workspace;
use crate::catalog::schema::EntityDescriptor;
use crate::catalog::types::Value;
use crate::config::ImportTarget;
use crate::error::OrmError;
use crate::import::element::{Element, ElementKind, ElementStack};
use crate::import::queue::{Disposition, WantQueue};
use crate::import::reader::{DocumentEvent, DocumentReader};
use crate::store::{EntityHandle, EntityOwner};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Position of the import state machine within the document grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    ExpectRoot,
    ExpectDatabaseList,
    ExpectDatabase,
    ExpectVersionMajor,
    ExpectVersionMinor,
    ExpectVersionRevision,
    ExpectEntityList,
    ExpectEntity,
    ExpectColumn,
    ExpectRootEnd,
    Complete,
}

impl ImportState {
    /// Tag accepted next and the element it must be nested in.
    fn expected_child(self) -> Option<(ElementKind, Option<ElementKind>)> {
        use ElementKind as K;
        match self {
            ImportState::ExpectRoot => Some((K::Root, None)),
            ImportState::ExpectDatabaseList => Some((K::DatabaseList, Some(K::Root))),
            ImportState::ExpectDatabase => Some((K::Database, Some(K::DatabaseList))),
            ImportState::ExpectVersionMajor => Some((K::VersionMajor, Some(K::Database))),
            ImportState::ExpectVersionMinor => Some((K::VersionMinor, Some(K::Database))),
            ImportState::ExpectVersionRevision => Some((K::VersionRevision, Some(K::Database))),
            ImportState::ExpectEntityList => Some((K::EntityList, Some(K::Database))),
            ImportState::ExpectEntity => Some((K::Entity, Some(K::EntityList))),
            ImportState::ExpectColumn => Some((K::Column, Some(K::Entity))),
            ImportState::ExpectRootEnd | ImportState::Complete => None,
        }
    }

    /// State in which an element of `kind` may be closed.
    fn closes(kind: ElementKind) -> Option<ImportState> {
        match kind {
            ElementKind::Root => Some(ImportState::ExpectRootEnd),
            ElementKind::DatabaseList => Some(ImportState::ExpectDatabase),
            ElementKind::Database => Some(ImportState::ExpectEntityList),
            ElementKind::VersionMajor => Some(ImportState::ExpectVersionMajor),
            ElementKind::VersionMinor => Some(ImportState::ExpectVersionMinor),
            ElementKind::VersionRevision => Some(ImportState::ExpectVersionRevision),
            ElementKind::EntityList => Some(ImportState::ExpectEntity),
            ElementKind::Entity | ElementKind::Column => Some(ImportState::ExpectColumn),
            ElementKind::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportWarning {
    OlderDocumentVersion {
        document: String,
        target: String,
    },
    /// Rows imported while parents they reference were still outstanding.
    OrderingViolation {
        entity: String,
        pending_parents: Vec<String>,
    },
    UnknownColumn {
        entity: String,
        column: String,
    },
    /// Buffered rows flushed at end of document without their parents.
    ReplayedWithoutParents {
        entity: String,
        missing_parents: Vec<String>,
    },
}

impl fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportWarning::OlderDocumentVersion { document, target } => {
                write!(f, "document version {document} is older than {target}")
            }
            ImportWarning::OrderingViolation {
                entity,
                pending_parents,
            } => write!(
                f,
                "{entity} imported before parents {}",
                pending_parents.join(", ")
            ),
            ImportWarning::UnknownColumn { entity, column } => {
                write!(f, "unknown column '{column}' on {entity} ignored")
            }
            ImportWarning::ReplayedWithoutParents {
                entity,
                missing_parents,
            } => write!(
                f,
                "buffered {entity} rows imported at end of document without {}",
                missing_parents.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub rows_total: u64,
    pub rows_per_entity: BTreeMap<String, u64>,
    pub warnings: Vec<ImportWarning>,
    /// `major.minor.revision` of the imported database block.
    pub document_version: Option<String>,
    pub databases_skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportProgress<'a> {
    pub entity: &'a str,
    pub entity_rows: u64,
    pub total_rows: u64,
}

type ProgressFn<'w> = Box<dyn FnMut(&ImportProgress<'_>) + 'w>;

enum RowTarget {
    Live {
        descriptor: Arc<EntityDescriptor>,
        handle: EntityHandle,
    },
    Buffered {
        descriptor: Arc<EntityDescriptor>,
        columns: Vec<(String, String)>,
    },
}

struct BufferedRow {
    descriptor: Arc<EntityDescriptor>,
    columns: Vec<(String, String)>,
}

#[derive(Default)]
struct VersionParts {
    major: String,
    minor: String,
    revision: String,
}

/// Streams an import document into the workspace, one entity element per
/// row, in the dependency order given by the want-list.
///
/// Events are pushed with [`BulkImporter::feed`] and the import is concluded
/// with [`BulkImporter::finish`]; [`BulkImporter::run`] does both over a byte
/// stream. Any error aborts the import.
pub struct BulkImporter<'w> {
    workspace: &'w Workspace,
    target: ImportTarget,
    queue: WantQueue,
    stack: ElementStack,
    state: ImportState,
    skip_depth: Option<usize>,
    version: VersionParts,
    current: Option<RowTarget>,
    buffered: Vec<BufferedRow>,
    report: ImportReport,
    progress_interval: u64,
    progress: Option<ProgressFn<'w>>,
}

impl<'w> BulkImporter<'w> {
    pub fn new(
        workspace: &'w Workspace,
        target: ImportTarget,
        wanted: impl IntoIterator<Item = Arc<EntityDescriptor>>,
    ) -> Self {
        let queue = WantQueue::new(wanted);
        info!(
            database = %target.database_alias,
            schema_version = %target.schema_version,
            wanted = ?queue.missing(),
            "import started"
        );
        Self {
            workspace,
            target,
            queue,
            stack: ElementStack::default(),
            state: ImportState::ExpectRoot,
            skip_depth: None,
            version: VersionParts::default(),
            current: None,
            buffered: Vec::new(),
            report: ImportReport::default(),
            progress_interval: workspace.config().progress_interval.max(1),
            progress: None,
        }
    }

    /// Called every `progress_interval` imported rows.
    pub fn with_progress(mut self, progress: impl FnMut(&ImportProgress<'_>) + 'w) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn report(&self) -> &ImportReport {
        &self.report
    }

    pub fn run<R: BufRead>(mut self, input: R) -> Result<ImportReport, OrmError> {
        for event in DocumentReader::new(input) {
            self.feed(event?)?;
        }
        self.finish()
    }

    pub fn run_file(self, path: impl AsRef<Path>) -> Result<ImportReport, OrmError> {
        let file = File::open(path)?;
        self.run(BufReader::new(file))
    }

    pub fn feed(&mut self, event: DocumentEvent) -> Result<(), OrmError> {
        let result = match event {
            DocumentEvent::Start { name, attributes } => {
                self.on_start(Element::new(name, attributes))
            }
            DocumentEvent::End { name } => self.on_end(&name),
            DocumentEvent::Text(bytes) => {
                self.on_text(&bytes);
                Ok(())
            }
        };
        if result.is_err() {
            self.abandon_row();
        }
        result
    }

    /// Flushes rows still buffered for parents that never arrived and fails
    /// when any wanted entity type was not found in the document.
    pub fn finish(mut self) -> Result<ImportReport, OrmError> {
        if self.state != ImportState::Complete {
            return Err(OrmError::StructuralParse {
                path: self.stack.path(),
                message: "document ended before the root element was closed".into(),
            });
        }
        for (descriptor, missing_parents) in self.queue.release_all() {
            warn!(
                entity = %descriptor.name,
                missing = ?missing_parents,
                "importing buffered rows without their parents"
            );
            self.report.warnings.push(ImportWarning::ReplayedWithoutParents {
                entity: descriptor.name.clone(),
                missing_parents,
            });
            self.replay(&descriptor)?;
        }
        let names = self.queue.missing();
        if !names.is_empty() {
            return Err(OrmError::MissingEntities { names });
        }
        let report = std::mem::take(&mut self.report);
        info!(
            rows = report.rows_total,
            entities = report.rows_per_entity.len(),
            warnings = report.warnings.len(),
            "import finished"
        );
        Ok(report)
    }

    fn structural(&self, path: String, message: impl Into<String>) -> OrmError {
        OrmError::StructuralParse {
            path,
            message: message.into(),
        }
    }

    fn on_start(&mut self, element: Element) -> Result<(), OrmError> {
        if self.skip_depth.is_some() {
            self.stack.push(element);
            return Ok(());
        }
        let parent_kind = self.stack.top_kind();
        let accepted = self
            .state
            .expected_child()
            .is_some_and(|(kind, parent)| element.kind == kind && parent_kind == parent);
        if !accepted {
            return Err(self.structural(
                self.stack.path_with(&element.tag),
                format!("unexpected <{}> in state {:?}", element.tag, self.state),
            ));
        }

        match element.kind {
            ElementKind::Root => self.state = ImportState::ExpectDatabaseList,
            ElementKind::DatabaseList => self.state = ImportState::ExpectDatabase,
            ElementKind::Database => {
                let alias = self.required_attribute(&element, "alias")?;
                if alias != self.target.database_alias {
                    debug!(alias = %alias, "skipping database block");
                    self.report.databases_skipped.push(alias);
                    self.skip(element);
                    return Ok(());
                }
                self.version = VersionParts::default();
                self.state = ImportState::ExpectVersionMajor;
            }
            ElementKind::EntityList => self.state = ImportState::ExpectEntity,
            ElementKind::Entity => {
                let name = self.required_attribute(&element, "name")?;
                if !self.begin_row(&name)? {
                    self.skip(element);
                    return Ok(());
                }
                self.state = ImportState::ExpectColumn;
            }
            ElementKind::Column => {
                self.required_attribute(&element, "name")?;
            }
            ElementKind::VersionMajor
            | ElementKind::VersionMinor
            | ElementKind::VersionRevision
            | ElementKind::Unknown => {}
        }
        self.stack.push(element);
        Ok(())
    }

    fn required_attribute(&self, element: &Element, name: &str) -> Result<String, OrmError> {
        element.attribute(name).map(str::to_string).ok_or_else(|| {
            self.structural(
                self.stack.path_with(&element.tag),
                format!("<{}> without '{name}' attribute", element.tag),
            )
        })
    }

    /// Ignores everything up to the end of `element`.
    fn skip(&mut self, element: Element) {
        self.stack.push(element);
        self.skip_depth = Some(self.stack.depth());
    }

    fn on_end(&mut self, name: &str) -> Result<(), OrmError> {
        let depth = self.stack.depth();
        match self.stack.top() {
            Some(top) if top.tag == name => {}
            Some(top) => {
                return Err(self.structural(
                    self.stack.path(),
                    format!("expected </{}>, found </{name}>", top.tag),
                ));
            }
            None => {
                return Err(self.structural("/".into(), format!("unexpected </{name}>")));
            }
        }
        if let Some(mark) = self.skip_depth {
            self.stack.pop();
            if depth == mark {
                self.skip_depth = None;
            }
            return Ok(());
        }
        if ImportState::closes(self.stack.top_kind().unwrap_or(ElementKind::Unknown))
            != Some(self.state)
        {
            return Err(self.structural(
                self.stack.path(),
                format!("unexpected </{name}> in state {:?}", self.state),
            ));
        }
        let Some(mut element) = self.stack.pop() else {
            return Ok(());
        };

        match element.kind {
            ElementKind::VersionMajor => {
                self.version.major = self.version_part(&mut element)?;
                self.state = ImportState::ExpectVersionMinor;
            }
            ElementKind::VersionMinor => {
                self.version.minor = self.version_part(&mut element)?;
                self.state = ImportState::ExpectVersionRevision;
            }
            ElementKind::VersionRevision => {
                self.version.revision = self.version_part(&mut element)?;
                self.check_version()?;
                self.state = ImportState::ExpectEntityList;
            }
            ElementKind::Column => self.end_column(&mut element)?,
            ElementKind::Entity => {
                self.end_row()?;
                self.state = ImportState::ExpectEntity;
            }
            ElementKind::EntityList => {
                for descriptor in self.queue.release_ready() {
                    self.replay(&descriptor)?;
                }
                self.state = ImportState::ExpectEntityList;
            }
            ElementKind::Database => self.state = ImportState::ExpectDatabase,
            ElementKind::DatabaseList => self.state = ImportState::ExpectRootEnd,
            ElementKind::Root => self.state = ImportState::Complete,
            ElementKind::Unknown => {}
        }
        Ok(())
    }

    fn on_text(&mut self, bytes: &[u8]) {
        if self.skip_depth.is_some() {
            return;
        }
        if let Some(top) = self.stack.top_mut()
            && top.kind.is_leaf()
        {
            top.text.push_bytes(bytes);
        }
    }

    fn version_part(&self, element: &mut Element) -> Result<String, OrmError> {
        let part = element.text.take().trim().to_string();
        if part.is_empty() {
            return Err(self.structural(
                self.stack.path_with(&element.tag),
                "empty version component",
            ));
        }
        Ok(part)
    }

    /// Newer documents are rejected; older ones are imported with a warning.
    /// Versions compare as plain strings.
    fn check_version(&mut self) -> Result<(), OrmError> {
        let document = format!(
            "{}.{}.{}",
            self.version.major, self.version.minor, self.version.revision
        );
        let target = self.target.schema_version.clone();
        self.report.document_version = Some(document.clone());
        match document.as_str().cmp(target.as_str()) {
            std::cmp::Ordering::Greater => Err(OrmError::SchemaVersion { document, target }),
            std::cmp::Ordering::Less => {
                warn!(
                    document = %document,
                    target = %target,
                    "importing older document version"
                );
                self.report
                    .warnings
                    .push(ImportWarning::OlderDocumentVersion { document, target });
                Ok(())
            }
            std::cmp::Ordering::Equal => Ok(()),
        }
    }

    /// Returns false when the entity type is not wanted.
    fn begin_row(&mut self, name: &str) -> Result<bool, OrmError> {
        let target = match self.queue.classify(name) {
            Disposition::Skip => return Ok(false),
            Disposition::Consume(descriptor) => self.live_row(descriptor),
            Disposition::ConsumeOutOfOrder {
                descriptor,
                pending_parents,
            } => {
                warn!(
                    entity = %descriptor.name,
                    pending = ?pending_parents,
                    "importing rows ahead of their parents"
                );
                self.report.warnings.push(ImportWarning::OrderingViolation {
                    entity: descriptor.name.clone(),
                    pending_parents,
                });
                self.live_row(descriptor)
            }
            Disposition::Defer {
                descriptor,
                pending_parents,
            } => {
                debug!(
                    entity = %descriptor.name,
                    pending = ?pending_parents,
                    "buffering rows until parents are imported"
                );
                RowTarget::Buffered {
                    descriptor,
                    columns: Vec::new(),
                }
            }
        };
        self.current = Some(target);
        Ok(true)
    }

    fn live_row(&self, descriptor: Arc<EntityDescriptor>) -> RowTarget {
        let handle = self
            .workspace
            .store()
            .lock()
            .create(Arc::clone(&descriptor), EntityOwner::Store);
        RowTarget::Live { descriptor, handle }
    }

    fn end_column(&mut self, element: &mut Element) -> Result<(), OrmError> {
        let column = element.attribute("name").unwrap_or_default().to_string();
        let text = element.text.take();
        match &mut self.current {
            Some(RowTarget::Live { descriptor, handle }) => {
                let descriptor = Arc::clone(descriptor);
                let handle = *handle;
                self.set_column(&descriptor, handle, &column, &text)
            }
            Some(RowTarget::Buffered { columns, .. }) => {
                columns.push((column, text));
                Ok(())
            }
            None => Err(self.structural(
                self.stack.path_with(&element.tag),
                "column outside of an entity",
            )),
        }
    }

    fn set_column(
        &mut self,
        descriptor: &EntityDescriptor,
        handle: EntityHandle,
        column: &str,
        text: &str,
    ) -> Result<(), OrmError> {
        let Some(def) = descriptor.column(column) else {
            warn!(entity = %descriptor.name, column = %column, "skipping unknown column");
            self.report.warnings.push(ImportWarning::UnknownColumn {
                entity: descriptor.name.clone(),
                column: column.to_string(),
            });
            return Ok(());
        };
        let value = Value::parse(def.col_type, text).map_err(|err| {
            OrmError::Decode(format!("{}.{column}: {err}", descriptor.name))
        })?;
        self.workspace.store().lock().set(handle, column, value)
    }

    fn end_row(&mut self) -> Result<(), OrmError> {
        match self.current.take() {
            Some(RowTarget::Live { descriptor, handle }) => self.commit(&descriptor, handle),
            Some(RowTarget::Buffered {
                descriptor,
                columns,
            }) => {
                self.buffered.push(BufferedRow {
                    descriptor,
                    columns,
                });
                Ok(())
            }
            None => Err(self.structural(self.stack.path(), "entity closed without a row")),
        }
    }

    /// Persists the row, drops it from the store and advances the counters.
    fn commit(
        &mut self,
        descriptor: &EntityDescriptor,
        handle: EntityHandle,
    ) -> Result<(), OrmError> {
        let persisted = self.workspace.persist(handle);
        let destroyed = self.workspace.store().lock().destroy(handle);
        persisted?;
        destroyed?;

        let entity_rows = {
            let count = self
                .report
                .rows_per_entity
                .entry(descriptor.name.clone())
                .or_insert(0);
            *count += 1;
            *count
        };
        self.report.rows_total += 1;
        if self.report.rows_total % self.progress_interval == 0 {
            let progress = ImportProgress {
                entity: &descriptor.name,
                entity_rows,
                total_rows: self.report.rows_total,
            };
            debug!(
                entity = %descriptor.name,
                entity_rows,
                total_rows = self.report.rows_total,
                "import progress"
            );
            if let Some(callback) = self.progress.as_mut() {
                callback(&progress);
            }
        }
        Ok(())
    }

    /// Imports every buffered row of `descriptor`, in document order.
    fn replay(&mut self, descriptor: &Arc<EntityDescriptor>) -> Result<(), OrmError> {
        let (rows, rest) = std::mem::take(&mut self.buffered)
            .into_iter()
            .partition::<Vec<_>, _>(|row| row.descriptor.name == descriptor.name);
        self.buffered = rest;
        debug!(entity = %descriptor.name, rows = rows.len(), "replaying buffered rows");
        for row in rows {
            let handle = self
                .workspace
                .store()
                .lock()
                .create(Arc::clone(&row.descriptor), EntityOwner::Store);
            for (column, text) in &row.columns {
                if let Err(err) = self.set_column(&row.descriptor, handle, column, text) {
                    let _ = self.workspace.store().lock().destroy(handle);
                    return Err(err);
                }
            }
            self.commit(&row.descriptor, handle)?;
        }
        Ok(())
    }

    fn abandon_row(&mut self) {
        if let Some(RowTarget::Live { handle, .. }) = self.current.take() {
            let _ = self.workspace.store().lock().destroy(handle);
        }
    }
}

impl Drop for BulkImporter<'_> {
    fn drop(&mut self) {
        self.abandon_row();
    }
}
