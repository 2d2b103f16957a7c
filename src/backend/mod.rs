pub mod memory;
pub mod sql;

use crate::backend::sql::Dialect;
use crate::catalog::types::{Row, Value};
use crate::error::OrmError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Postgres,
    MySql,
    Sqlite,
    Oracle,
    SqlServer,
    Other(String),
}

/// How a backend windows a result set into pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    Offset(WindowSyntax),
    Procedure,
}

/// Native row-window predicate used by offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSyntax {
    LimitOffset,
    RowNum,
}

impl BackendKind {
    pub fn pagination(&self) -> Result<Pagination, OrmError> {
        match self {
            BackendKind::Postgres | BackendKind::MySql | BackendKind::Sqlite => {
                Ok(Pagination::Offset(WindowSyntax::LimitOffset))
            }
            BackendKind::Oracle => Ok(Pagination::Offset(WindowSyntax::RowNum)),
            BackendKind::SqlServer => Ok(Pagination::Procedure),
            BackendKind::Other(name) => Err(OrmError::configuration(format!(
                "backend '{name}' has no supported pagination strategy"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::MySql => write!(f, "mysql"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Oracle => write!(f, "oracle"),
            BackendKind::SqlServer => write!(f, "sqlserver"),
            BackendKind::Other(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMatch {
    Equals,
    Prefix,
}

/// Structured predicate on one column, rendered into SQL and also handed to
/// the backend alongside the text.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: String,
    pub index: usize,
    pub value: Value,
    pub mode: FilterMatch,
}

impl ColumnFilter {
    pub fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.get(self.index) else {
            return false;
        };
        match self.mode {
            FilterMatch::Equals => actual == &self.value,
            FilterMatch::Prefix => match (actual.as_text(), self.value.as_text()) {
                (Some(actual), Some(prefix)) => actual.starts_with(prefix),
                _ => false,
            },
        }
    }
}

/// Inclusive ordinal range, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdinalRange {
    pub first: u64,
    pub last: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Count,
    Select,
    CreateProcedure,
    DropProcedure,
    CallProcedure,
    Insert,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Count {
        entity: String,
        filters: Vec<ColumnFilter>,
        sql: String,
    },
    Select {
        entity: String,
        filters: Vec<ColumnFilter>,
        window: Option<OrdinalRange>,
        sql: String,
    },
    CreateProcedure {
        name: String,
        entity: String,
        filters: Vec<ColumnFilter>,
        sql: String,
    },
    DropProcedure {
        name: String,
        sql: String,
    },
    CallProcedure {
        name: String,
        page_no: u64,
        page_size: u64,
        sql: String,
    },
    Insert {
        entity: String,
        values: Row,
        sql: String,
    },
}

impl Statement {
    pub fn sql(&self) -> &str {
        match self {
            Statement::Count { sql, .. }
            | Statement::Select { sql, .. }
            | Statement::CreateProcedure { sql, .. }
            | Statement::DropProcedure { sql, .. }
            | Statement::CallProcedure { sql, .. }
            | Statement::Insert { sql, .. } => sql,
        }
    }

    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Count { .. } => StatementKind::Count,
            Statement::Select { .. } => StatementKind::Select,
            Statement::CreateProcedure { .. } => StatementKind::CreateProcedure,
            Statement::DropProcedure { .. } => StatementKind::DropProcedure,
            Statement::CallProcedure { .. } => StatementKind::CallProcedure,
            Statement::Insert { .. } => StatementKind::Insert,
        }
    }
}

/// Output of one statement. Procedure calls return the total count first,
/// then the page rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub total: Option<u64>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), OrmError> {
        if self.is_cancelled() {
            return Err(OrmError::Cancelled);
        }
        Ok(())
    }
}

/// Low-level SQL driver boundary. Calls are synchronous and may block.
pub trait SqlBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn execute(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, OrmError>;
}

/// A backend bound to its dialect and the cancellation token checked before
/// every call.
#[derive(Clone)]
pub struct Connection {
    backend: Arc<dyn SqlBackend>,
    dialect: Dialect,
    cancel: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(backend: Arc<dyn SqlBackend>, cancel: CancellationToken) -> Self {
        let dialect = Dialect::new(backend.kind());
        Self {
            backend,
            dialect,
            cancel,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn execute(&self, statement: &Statement) -> Result<ResultSet, OrmError> {
        self.cancel.check()?;
        debug!(kind = ?statement.kind(), sql = statement.sql(), "execute statement");
        self.backend.execute(statement, &self.cancel)
    }

    /// Runs a statement that releases a server-side object. Cancellation does
    /// not apply: the object must not outlive its owner.
    pub fn execute_cleanup(&self, statement: &Statement) -> Result<ResultSet, OrmError> {
        debug!(kind = ?statement.kind(), sql = statement.sql(), "execute cleanup statement");
        self.backend.execute(statement, &CancellationToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BackendKind, CancellationToken, ColumnFilter, FilterMatch, Pagination, WindowSyntax,
    };
    use crate::catalog::types::Value;
    use crate::error::OrmError;

    #[test]
    fn pagination_follows_backend_capability() {
        assert_eq!(
            BackendKind::Postgres.pagination().expect("pg"),
            Pagination::Offset(WindowSyntax::LimitOffset)
        );
        assert_eq!(
            BackendKind::Oracle.pagination().expect("oracle"),
            Pagination::Offset(WindowSyntax::RowNum)
        );
        assert_eq!(
            BackendKind::SqlServer.pagination().expect("mssql"),
            Pagination::Procedure
        );
        let err = BackendKind::Other("dbase".into())
            .pagination()
            .expect_err("unknown");
        assert!(matches!(err, OrmError::Configuration { .. }));
    }

    #[test]
    fn prefix_filter_only_matches_text() {
        let filter = ColumnFilter {
            column: "name".into(),
            index: 1,
            value: Value::Text("Ad".into()),
            mode: FilterMatch::Prefix,
        };
        assert!(filter.matches(&vec![Value::Integer(1), Value::Text("Ada".into())]));
        assert!(!filter.matches(&vec![Value::Integer(1), Value::Text("Bob".into())]));
        assert!(!filter.matches(&vec![Value::Integer(1), Value::Integer(5)]));
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(matches!(token.check(), Err(OrmError::Cancelled)));
    }
}
