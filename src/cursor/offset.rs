use crate::backend::sql::QueryShape;
use crate::backend::{Connection, Statement, WindowSyntax};
use crate::cursor::window::{expected_rows, ordinal_range, page_exists};
use crate::cursor::{FetchedPage, PagingStrategy};
use crate::error::OrmError;

#[derive(Debug, Clone)]
struct PreparedQueries {
    count_sql: String,
    base_sql: String,
}

/// Windows results with a count query plus the base query restricted to an
/// ordinal range through the backend's native row-window predicate. Nothing
/// is created on the server.
#[derive(Debug)]
pub struct OffsetStrategy {
    conn: Connection,
    shape: QueryShape,
    syntax: WindowSyntax,
    prepared: Option<PreparedQueries>,
}

impl OffsetStrategy {
    pub fn new(conn: Connection, shape: QueryShape, syntax: WindowSyntax) -> Self {
        Self {
            conn,
            shape,
            syntax,
            prepared: None,
        }
    }

    fn prepared(&mut self) -> Result<PreparedQueries, OrmError> {
        if self.prepared.is_none() {
            self.initialise()?;
        }
        self.prepared
            .clone()
            .ok_or_else(|| OrmError::configuration("offset cursor not initialised"))
    }
}

impl PagingStrategy for OffsetStrategy {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn initialise(&mut self) -> Result<(), OrmError> {
        let dialect = self.conn.dialect();
        self.prepared = Some(PreparedQueries {
            count_sql: dialect.count_sql(&self.shape),
            base_sql: dialect.base_sql(&self.shape),
        });
        Ok(())
    }

    fn fetch_total(&mut self) -> Result<u64, OrmError> {
        let prepared = self.prepared()?;
        let result = self.conn.execute(&Statement::Count {
            entity: self.shape.descriptor.name.clone(),
            filters: self.shape.filters.clone(),
            sql: prepared.count_sql.clone(),
        })?;
        result
            .total
            .ok_or_else(|| OrmError::backend(prepared.count_sql, "count query returned no total"))
    }

    fn fetch_page(
        &mut self,
        page_no: u64,
        page_size: u64,
    ) -> Result<Option<FetchedPage>, OrmError> {
        let total = self.fetch_total()?;
        if !page_exists(page_no, page_size, total) {
            return Ok(None);
        }
        if expected_rows(page_no, page_size, total) == 0 {
            return Ok(Some(FetchedPage {
                total,
                rows: Vec::new(),
            }));
        }
        let prepared = self.prepared()?;
        let range = ordinal_range(page_no, page_size);
        let sql = self
            .conn
            .dialect()
            .window_sql(self.syntax, &prepared.base_sql, range);
        let result = self.conn.execute(&Statement::Select {
            entity: self.shape.descriptor.name.clone(),
            filters: self.shape.filters.clone(),
            window: Some(range),
            sql,
        })?;
        Ok(Some(FetchedPage {
            total,
            rows: result.rows,
        }))
    }

    fn release(&mut self) -> Result<(), OrmError> {
        self.prepared = None;
        Ok(())
    }
}
