use crate::backend::sql::QueryShape;
use crate::backend::{Connection, Statement};
use crate::cursor::window::page_exists;
use crate::cursor::{FetchedPage, PagingStrategy};
use crate::error::OrmError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Hands out connection-scoped temporary procedure names. Share one
/// allocator between every workspace that talks to the same backend.
#[derive(Debug)]
pub struct ProcedureNameAllocator {
    prefix: String,
    session: String,
    next: Mutex<u64>,
}

impl ProcedureNameAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        let session = Uuid::new_v4().simple().to_string();
        Self {
            prefix: prefix.into(),
            session: session[..8].to_string(),
            next: Mutex::new(0),
        }
    }

    /// `#` scopes the procedure to the owning connection.
    pub fn allocate(&self) -> String {
        let n = {
            let mut next = self.next.lock();
            *next += 1;
            *next
        };
        format!("#{}{}_{n}", self.prefix, self.session)
    }
}

/// Windows results through a generated temporary procedure taking
/// `(@PageNo, @PageSize)`. At most one procedure is live per strategy.
#[derive(Debug)]
pub struct ProcedureStrategy {
    conn: Connection,
    shape: QueryShape,
    allocator: Arc<ProcedureNameAllocator>,
    live: Option<String>,
}

impl ProcedureStrategy {
    pub fn new(
        conn: Connection,
        shape: QueryShape,
        allocator: Arc<ProcedureNameAllocator>,
    ) -> Self {
        Self {
            conn,
            shape,
            allocator,
            live: None,
        }
    }

    /// Name of the procedure currently created for this cursor.
    pub fn procedure_name(&self) -> Option<&str> {
        self.live.as_deref()
    }

    fn drop_live(&mut self) -> Result<(), OrmError> {
        let Some(name) = self.live.take() else {
            return Ok(());
        };
        let sql = self.conn.dialect().drop_procedure_sql(&name);
        match self.conn.execute_cleanup(&Statement::DropProcedure {
            name: name.clone(),
            sql,
        }) {
            Ok(_) => {
                debug!(procedure = %name, "dropped paging procedure");
                Ok(())
            }
            Err(err) => {
                self.live = Some(name);
                Err(err)
            }
        }
    }

    fn call(&mut self, page_no: u64, page_size: u64) -> Result<FetchedPage, OrmError> {
        if self.live.is_none() {
            self.initialise()?;
        }
        let name = self
            .live
            .clone()
            .ok_or_else(|| OrmError::configuration("paging procedure not created"))?;
        let sql = self
            .conn
            .dialect()
            .call_procedure_sql(&name, page_no, page_size);
        let result = self.conn.execute(&Statement::CallProcedure {
            name,
            page_no,
            page_size,
            sql: sql.clone(),
        })?;
        let total = result
            .total
            .ok_or_else(|| OrmError::backend(sql, "procedure returned no total"))?;
        Ok(FetchedPage {
            total,
            rows: result.rows,
        })
    }
}

impl PagingStrategy for ProcedureStrategy {
    fn name(&self) -> &'static str {
        "procedure"
    }

    fn initialise(&mut self) -> Result<(), OrmError> {
        self.drop_live()?;
        let name = self.allocator.allocate();
        let sql = self
            .conn
            .dialect()
            .create_procedure_sql(&name, &self.shape);
        self.conn.execute(&Statement::CreateProcedure {
            name: name.clone(),
            entity: self.shape.descriptor.name.clone(),
            filters: self.shape.filters.clone(),
            sql,
        })?;
        debug!(procedure = %name, entity = %self.shape.descriptor.name, "created paging procedure");
        self.live = Some(name);
        Ok(())
    }

    fn fetch_total(&mut self) -> Result<u64, OrmError> {
        self.call(0, 0).map(|page| page.total)
    }

    fn fetch_page(
        &mut self,
        page_no: u64,
        page_size: u64,
    ) -> Result<Option<FetchedPage>, OrmError> {
        let page = self.call(page_no, page_size)?;
        if !page_exists(page_no, page_size, page.total) {
            return Ok(None);
        }
        Ok(Some(page))
    }

    fn release(&mut self) -> Result<(), OrmError> {
        self.drop_live()
    }
}

impl Drop for ProcedureStrategy {
    fn drop(&mut self) {
        if let Err(err) = self.drop_live() {
            let name = self.live.take().unwrap_or_default();
            error!(
                procedure = %name,
                error = %err,
                "temporary paging procedure outlived its cursor"
            );
        }
    }
}
