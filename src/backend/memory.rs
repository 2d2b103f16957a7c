use crate::backend::{
    BackendKind, CancellationToken, ColumnFilter, ResultSet, SqlBackend, Statement, StatementKind,
};
use crate::catalog::types::Row;
use crate::error::OrmError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// In-process backend that executes the structured side of each statement
/// against in-memory tables. Opaque caller predicate and ordering text is not
/// interpreted: rows come back in insertion order, restricted only by the
/// structured filters.
#[derive(Debug)]
pub struct MemoryBackend {
    kind: BackendKind,
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    procedures: BTreeMap<String, StoredProcedure>,
    executed: Vec<String>,
    fail_next: Option<(StatementKind, String)>,
}

#[derive(Debug, Clone)]
struct StoredProcedure {
    entity: String,
    filters: Vec<ColumnFilter>,
}

impl MemoryBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(MemoryState::default()),
        }
    }

    pub fn insert_rows(&self, entity: &str, rows: impl IntoIterator<Item = Row>) {
        self.inner
            .lock()
            .tables
            .entry(entity.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, entity: &str) -> Vec<Row> {
        self.inner
            .lock()
            .tables
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of procedures currently created on this backend.
    pub fn live_procedures(&self) -> Vec<String> {
        self.inner.lock().procedures.keys().cloned().collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    pub fn executed_count(&self, kind: StatementKind) -> usize {
        let state = self.inner.lock();
        state
            .executed
            .iter()
            .filter(|sql| classify(sql) == Some(kind))
            .count()
    }

    /// Makes the next statement of `kind` fail with `message`.
    pub fn fail_next(&self, kind: StatementKind, message: impl Into<String>) {
        self.inner.lock().fail_next = Some((kind, message.into()));
    }
}

fn classify(sql: &str) -> Option<StatementKind> {
    let head = sql.split_whitespace().next()?;
    match head {
        "CREATE" => Some(StatementKind::CreateProcedure),
        "DROP" => Some(StatementKind::DropProcedure),
        "EXEC" => Some(StatementKind::CallProcedure),
        "INSERT" => Some(StatementKind::Insert),
        "SELECT" if sql.starts_with("SELECT COUNT(*)") => Some(StatementKind::Count),
        "SELECT" => Some(StatementKind::Select),
        _ => None,
    }
}

fn to_index(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn filtered<'a>(
    rows: &'a [Row],
    filters: &'a [ColumnFilter],
) -> impl Iterator<Item = &'a Row> {
    rows.iter()
        .filter(move |row| filters.iter().all(|f| f.matches(row)))
}

impl SqlBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind.clone()
    }

    fn execute(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, OrmError> {
        cancel.check()?;
        let mut state = self.inner.lock();
        if let Some((kind, _)) = &state.fail_next
            && *kind == statement.kind()
        {
            let message = state
                .fail_next
                .take()
                .map(|(_, message)| message)
                .unwrap_or_default();
            return Err(OrmError::backend(statement.sql(), message));
        }
        state.executed.push(statement.sql().to_string());

        match statement {
            Statement::Count {
                entity, filters, ..
            } => {
                let rows = state.tables.get(entity).map(Vec::as_slice).unwrap_or(&[]);
                Ok(ResultSet {
                    total: Some(filtered(rows, filters).count() as u64),
                    rows: Vec::new(),
                })
            }
            Statement::Select {
                entity,
                filters,
                window,
                ..
            } => {
                let rows = state.tables.get(entity).map(Vec::as_slice).unwrap_or(&[]);
                let matching = filtered(rows, filters);
                let rows = match window {
                    Some(range) => matching
                        .skip(to_index(range.first))
                        .take(to_index(
                            range.last.saturating_add(1).saturating_sub(range.first),
                        ))
                        .cloned()
                        .collect(),
                    None => matching.cloned().collect(),
                };
                Ok(ResultSet { total: None, rows })
            }
            Statement::CreateProcedure {
                name,
                entity,
                filters,
                sql,
            } => {
                if state.procedures.contains_key(name) {
                    return Err(OrmError::backend(
                        sql.as_str(),
                        format!("procedure '{name}' already exists"),
                    ));
                }
                state.procedures.insert(
                    name.clone(),
                    StoredProcedure {
                        entity: entity.clone(),
                        filters: filters.clone(),
                    },
                );
                Ok(ResultSet::default())
            }
            Statement::DropProcedure { name, sql } => match state.procedures.remove(name) {
                Some(_) => Ok(ResultSet::default()),
                None => Err(OrmError::backend(
                    sql.as_str(),
                    format!("procedure '{name}' does not exist"),
                )),
            },
            Statement::CallProcedure {
                name,
                page_no,
                page_size,
                sql,
            } => {
                let procedure = state.procedures.get(name).cloned().ok_or_else(|| {
                    OrmError::backend(sql.as_str(), format!("procedure '{name}' does not exist"))
                })?;
                let rows = state
                    .tables
                    .get(&procedure.entity)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let total = filtered(rows, &procedure.filters).count() as u64;
                let page = filtered(rows, &procedure.filters)
                    .skip(to_index(page_no.saturating_mul(*page_size)))
                    .take(to_index(*page_size))
                    .cloned()
                    .collect();
                Ok(ResultSet {
                    total: Some(total),
                    rows: page,
                })
            }
            Statement::Insert { entity, values, .. } => {
                state
                    .tables
                    .entry(entity.clone())
                    .or_default()
                    .push(values.clone());
                Ok(ResultSet::default())
            }
        }
    }
}
