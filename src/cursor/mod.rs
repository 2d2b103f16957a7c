pub mod json;
pub mod key;
pub mod offset;
pub mod procedure;
pub mod window;

use crate::catalog::schema::EntityDescriptor;
use crate::catalog::types::Row;
use crate::cursor::window::{PageWindow, last_page};
use crate::error::OrmError;
use crate::store::{CursorId, EntityHandle, EntityOwner, EntityStore, SharedStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Rows of one page plus the result total observed while fetching it.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub total: u64,
    pub rows: Vec<Row>,
}

/// Backend-specific row fetching. Page arithmetic and entity lifetime stay in
/// `PagedCursor`.
pub trait PagingStrategy: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Prepares (or re-prepares) the server-side query shape.
    fn initialise(&mut self) -> Result<(), OrmError>;

    fn fetch_total(&mut self) -> Result<u64, OrmError>;

    /// `None` when `page_no` lies outside the result.
    fn fetch_page(
        &mut self,
        page_no: u64,
        page_size: u64,
    ) -> Result<Option<FetchedPage>, OrmError>;

    fn release(&mut self) -> Result<(), OrmError>;
}

/// Windowed view over a query's results, one page of entities at a time.
///
/// Navigation either replaces the whole page and returns `Ok(true)`, or leaves
/// it untouched: `Ok(false)` when the page does not exist, `Err` when the
/// backend failed.
#[derive(Debug)]
pub struct PagedCursor {
    id: CursorId,
    store: SharedStore,
    descriptor: Arc<EntityDescriptor>,
    strategy: Box<dyn PagingStrategy>,
    page_size: u64,
    keep_objects: bool,
    window: Option<PageWindow>,
    page: Vec<EntityHandle>,
    closed: bool,
}

impl PagedCursor {
    pub(crate) fn new(
        store: SharedStore,
        descriptor: Arc<EntityDescriptor>,
        strategy: Box<dyn PagingStrategy>,
        page_size: u64,
        keep_objects: bool,
    ) -> Self {
        let id = store.lock().register_cursor();
        Self {
            id,
            store,
            descriptor,
            strategy,
            page_size,
            keep_objects,
            window: None,
            page: Vec::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn keep_objects(&self) -> bool {
        self.keep_objects
    }

    /// Applies to entities loaded from now on; entities already materialized
    /// keep the owner recorded when they were loaded.
    pub fn set_keep_objects(&mut self, keep_objects: bool) {
        self.keep_objects = keep_objects;
    }

    pub fn page_window(&self) -> Option<PageWindow> {
        self.window
    }

    pub fn current_page(&self) -> Option<u64> {
        self.window.map(|w| w.page_no)
    }

    pub fn total_records(&self) -> u64 {
        self.window.map_or(0, |w| w.total_records)
    }

    pub fn number_of_pages(&self) -> u64 {
        self.window.map_or(0, |w| w.number_of_pages())
    }

    /// Handles of the current page, minus any destroyed elsewhere.
    pub fn entities(&mut self) -> &[EntityHandle] {
        let stale = self.store.lock().take_invalidated(self.id);
        self.purge(&stale);
        &self.page
    }

    fn purge(&mut self, stale: &[EntityHandle]) {
        if stale.is_empty() {
            return;
        }
        let stale = stale.iter().collect::<HashSet<_>>();
        self.page.retain(|h| !stale.contains(h));
        debug!(cursor = %self.id, purged = stale.len(), "purged externally destroyed entities");
    }

    /// Re-prepares the backend query. For procedure-backed cursors the previous
    /// procedure is dropped before a new one is created.
    pub fn initialise(&mut self) -> Result<(), OrmError> {
        self.strategy.initialise()
    }

    pub fn get_page(&mut self, page_no: u64, page_size: u64) -> Result<bool, OrmError> {
        if page_size == 0 {
            return Err(OrmError::Validation("page size must be > 0".into()));
        }
        let Some(fetched) = self.strategy.fetch_page(page_no, page_size)? else {
            return Ok(false);
        };
        for row in &fetched.rows {
            EntityStore::check_row(&self.descriptor, row)?;
        }

        let rows_on_page = fetched.rows.len() as u64;
        let owner = if self.keep_objects {
            EntityOwner::Store
        } else {
            EntityOwner::Cursor(self.id)
        };
        let mut store = self.store.lock();
        let stale = store.take_invalidated(self.id);
        let mut incoming = Vec::with_capacity(fetched.rows.len());
        for row in fetched.rows {
            match store.materialize(&self.descriptor, row, owner) {
                Ok(handle) => incoming.push(handle),
                Err(err) => {
                    let fresh = incoming
                        .iter()
                        .filter(|h| !self.page.contains(h))
                        .copied()
                        .collect::<Vec<_>>();
                    store.destroy_owned(self.id, &fresh);
                    return Err(err);
                }
            }
        }

        let outgoing = std::mem::take(&mut self.page);
        let kept = incoming.iter().collect::<HashSet<_>>();
        let leaving = outgoing
            .into_iter()
            .filter(|h| !kept.contains(h) && !stale.contains(h))
            .collect::<Vec<_>>();
        store.unwatch(self.id, &leaving);
        let destroyed = store.destroy_owned(self.id, &leaving);
        store.watch(self.id, &incoming);
        drop(store);

        let window = PageWindow::new(page_no, page_size, fetched.total, rows_on_page);
        debug!(
            cursor = %self.id,
            entity = %self.descriptor.name,
            page_no,
            page_size,
            rows = rows_on_page,
            total = fetched.total,
            destroyed,
            "loaded page"
        );
        self.page = incoming;
        self.page_size = page_size;
        self.window = Some(window);
        Ok(true)
    }

    pub fn get_first_page(&mut self) -> Result<bool, OrmError> {
        self.get_page(0, self.page_size)
    }

    pub fn get_next_page(&mut self) -> Result<bool, OrmError> {
        let next = self.current_page().map_or(0, |p| p + 1);
        self.get_page(next, self.page_size)
    }

    pub fn get_previous_page(&mut self) -> Result<bool, OrmError> {
        match self.current_page() {
            Some(p) if p > 0 => self.get_page(p - 1, self.page_size),
            _ => Ok(false),
        }
    }

    pub fn get_last_page(&mut self) -> Result<bool, OrmError> {
        let total = self.strategy.fetch_total()?;
        self.get_page(last_page(total, self.page_size), self.page_size)
    }

    pub fn info_as_json(&self) -> serde_json::Value {
        json::schema_view(&self.descriptor)
    }

    /// Serializes the loaded page; never fetches.
    pub fn data_as_json(&mut self) -> Result<serde_json::Value, OrmError> {
        let mut store = self.store.lock();
        let stale = store.take_invalidated(self.id);
        let store = &*store;
        let entities = self
            .page
            .iter()
            .filter(|h| !stale.contains(h))
            .map(|h| store.get(*h))
            .collect::<Result<Vec<_>, _>>()?;
        let view = json::page_view(entities);
        if !stale.is_empty() {
            let stale_set = stale.iter().collect::<HashSet<_>>();
            self.page.retain(|h| !stale_set.contains(h));
        }
        Ok(view)
    }

    fn release_page(&mut self) -> Result<(), OrmError> {
        let page = std::mem::take(&mut self.page);
        self.window = None;
        let mut store = self.store.lock();
        store.unwatch(self.id, &page);
        store.destroy_owned(self.id, &page);
        store.release_cursor(self.id)
    }

    /// Releases the page and any server-side object, reporting failures that
    /// `Drop` can only log.
    pub fn close(mut self) -> Result<(), OrmError> {
        self.closed = true;
        let strategy = self.strategy.release();
        let page = self.release_page();
        strategy.and(page)
    }
}

impl Drop for PagedCursor {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.strategy.release() {
            error!(cursor = %self.id, error = %err, "failed to release cursor strategy");
        }
        if let Err(err) = self.release_page() {
            error!(cursor = %self.id, error = %err, "failed to release cursor page");
        }
    }
}
