use crate::backend::{BackendKind, ColumnFilter, FilterMatch, OrdinalRange, WindowSyntax};
use crate::catalog::schema::EntityDescriptor;
use crate::catalog::types::Value;
use std::sync::Arc;

/// What a cursor selects: one entity, an optional caller predicate and
/// ordering, and structured filters derived from relations or key
/// descriptions.
#[derive(Debug, Clone)]
pub struct QueryShape {
    pub descriptor: Arc<EntityDescriptor>,
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub filters: Vec<ColumnFilter>,
}

impl QueryShape {
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            descriptor,
            where_clause: None,
            order_by: None,
            filters: Vec::new(),
        }
    }

    pub fn where_clause(mut self, clause: Option<String>) -> Self {
        self.where_clause = clause.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn order_by(mut self, clause: Option<String>) -> Self {
        self.order_by = clause.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn filter(mut self, filter: ColumnFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Dialect {
    kind: BackendKind,
}

impl Dialect {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    pub fn quote(&self, ident: &str) -> String {
        match self.kind {
            BackendKind::MySql => format!("`{}`", ident.replace('`', "``")),
            BackendKind::SqlServer => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    pub fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Integer(v) | Value::Timestamp(v) => v.to_string(),
            Value::Float(v) => format!("{v:?}"),
            Value::Boolean(v) => match (&self.kind, v) {
                (BackendKind::Postgres, true) => "TRUE".to_string(),
                (BackendKind::Postgres, false) => "FALSE".to_string(),
                (_, true) => "1".to_string(),
                (_, false) => "0".to_string(),
            },
            Value::Blob(bytes) => {
                let hex = bytes.iter().map(|b| format!("{b:02X}")).collect::<String>();
                match self.kind {
                    BackendKind::SqlServer => format!("0x{hex}"),
                    BackendKind::Postgres => format!("'\\x{hex}'::bytea"),
                    _ => format!("X'{hex}'"),
                }
            }
        }
    }

    fn filter_sql(&self, filter: &ColumnFilter) -> String {
        let column = self.quote(&filter.column);
        match (filter.mode, &filter.value) {
            (_, Value::Null) => format!("{column} IS NULL"),
            (FilterMatch::Prefix, Value::Text(prefix)) => {
                let escaped = prefix
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_")
                    .replace('\'', "''");
                format!("{column} LIKE '{escaped}%' ESCAPE '\\'")
            }
            (_, value) => format!("{column} = {}", self.literal(value)),
        }
    }

    /// Caller predicate and structured filters joined with AND.
    pub fn predicate(&self, shape: &QueryShape) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(clause) = &shape.where_clause {
            parts.push(format!("({clause})"));
        }
        parts.extend(shape.filters.iter().map(|f| self.filter_sql(f)));
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }

    /// Caller ordering, or the primary key when none was given.
    pub fn ordering(&self, shape: &QueryShape) -> String {
        match &shape.order_by {
            Some(order) => order.clone(),
            None => shape
                .descriptor
                .primary_key
                .columns
                .iter()
                .map(|c| self.quote(c))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    fn column_list(&self, descriptor: &EntityDescriptor) -> String {
        descriptor
            .columns
            .iter()
            .map(|c| self.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn from_where(&self, shape: &QueryShape) -> String {
        let mut sql = format!("FROM {}", self.quote(shape.descriptor.table_name()));
        if let Some(predicate) = self.predicate(shape) {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        sql
    }

    pub fn count_sql(&self, shape: &QueryShape) -> String {
        format!("SELECT COUNT(*) {}", self.from_where(shape))
    }

    pub fn base_sql(&self, shape: &QueryShape) -> String {
        let mut sql = format!(
            "SELECT {} {}",
            self.column_list(&shape.descriptor),
            self.from_where(shape)
        );
        let ordering = self.ordering(shape);
        if !ordering.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&ordering);
        }
        sql
    }

    /// Restricts `base` to the inclusive ordinal range.
    pub fn window_sql(&self, syntax: WindowSyntax, base: &str, range: OrdinalRange) -> String {
        let end = range.last.saturating_add(1);
        let size = end.saturating_sub(range.first);
        match syntax {
            WindowSyntax::LimitOffset => {
                format!("{base} LIMIT {size} OFFSET {}", range.first)
            }
            WindowSyntax::RowNum => format!(
                "SELECT * FROM (SELECT q__.*, ROWNUM rn__ FROM ({base}) q__ WHERE ROWNUM <= {}) \
                 WHERE rn__ > {}",
                end,
                range.first
            ),
        }
    }

    /// Temporary procedure returning the total count, then the requested
    /// page numbered with ROW_NUMBER().
    pub fn create_procedure_sql(&self, name: &str, shape: &QueryShape) -> String {
        let columns = self.column_list(&shape.descriptor);
        let from_where = self.from_where(shape);
        let ordering = self.ordering(shape);
        format!(
            "CREATE PROCEDURE {name} @PageNo INT, @PageSize INT AS\n\
             BEGIN\n\
             SET NOCOUNT ON;\n\
             SELECT COUNT(*) {from_where};\n\
             WITH numbered__ AS (SELECT {columns}, \
             ROW_NUMBER() OVER (ORDER BY {ordering}) AS RowNo__ {from_where})\n\
             SELECT {columns} FROM numbered__ \
             WHERE RowNo__ > @PageNo * @PageSize AND RowNo__ <= (@PageNo + 1) * @PageSize \
             ORDER BY RowNo__;\n\
             END"
        )
    }

    pub fn drop_procedure_sql(&self, name: &str) -> String {
        format!("DROP PROCEDURE {name}")
    }

    pub fn call_procedure_sql(&self, name: &str, page_no: u64, page_size: u64) -> String {
        format!("EXEC {name} @PageNo = {page_no}, @PageSize = {page_size}")
    }

    pub fn insert_sql(&self, descriptor: &EntityDescriptor, values: &[Value]) -> String {
        let literals = values
            .iter()
            .map(|v| self.literal(v))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({literals})",
            self.quote(descriptor.table_name()),
            self.column_list(descriptor)
        )
    }
}
