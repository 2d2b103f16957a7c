use metarow::backend::StatementKind;
use metarow::{
    BackendKind, ColumnType, EntitySpec, MemoryBackend, MetaModel, OrmError,
    ProcedureNameAllocator, RuntimeConfig, Value, Workspace,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

fn model() -> MetaModel {
    MetaModel::new(vec![
        EntitySpec::new("Order")
            .column("id", ColumnType::Integer, false)
            .column("status", ColumnType::Text, true)
            .primary_key(1, &["id"])
            .build(),
    ])
    .expect("model")
}

fn backend(rows: i64) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new(BackendKind::SqlServer));
    backend.insert_rows(
        "Order",
        (0..rows).map(|i| vec![Value::Integer(i), Value::Text("open".into())]),
    );
    backend
}

fn open(backend: &Arc<MemoryBackend>) -> Workspace {
    Workspace::open(model(), backend.clone(), RuntimeConfig::default()).expect("open")
}

#[test]
fn procedure_is_created_lazily_and_dropped_with_cursor() {
    let backend = backend(12);
    let ws = open(&backend);
    let mut cursor = ws
        .cursor("Order", Some("status = 'open'"), Some("id DESC"), 5)
        .expect("cursor");
    assert!(backend.live_procedures().is_empty());

    assert!(cursor.get_first_page().expect("first"));
    assert!(cursor.get_next_page().expect("next"));
    let live = backend.live_procedures();
    assert_eq!(live.len(), 1);
    assert!(live[0].starts_with("#mr_page_"));
    assert_eq!(backend.executed_count(StatementKind::CreateProcedure), 1);

    drop(cursor);
    assert!(backend.live_procedures().is_empty());
}

#[test]
fn reinitialising_replaces_the_procedure() {
    let backend = backend(3);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 2).expect("cursor");
    cursor.initialise().expect("first");
    let first = backend.live_procedures();
    cursor.initialise().expect("second");
    let second = backend.live_procedures();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
    assert_eq!(backend.executed_count(StatementKind::DropProcedure), 1);
    assert!(cursor.get_first_page().expect("page"));
    assert_eq!(backend.live_procedures(), second);
}

#[test]
fn failed_drop_keeps_previous_procedure() {
    let backend = backend(3);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 2).expect("cursor");
    cursor.initialise().expect("create");
    let before = backend.live_procedures();

    backend.fail_next(StatementKind::DropProcedure, "lock timeout");
    let err = cursor.initialise().expect_err("drop fails");
    assert!(matches!(err, OrmError::BackendExecution { .. }));
    assert_eq!(backend.live_procedures(), before);
    assert_eq!(backend.executed_count(StatementKind::CreateProcedure), 1);
}

#[test]
fn close_reports_drop_failure() {
    let backend = backend(3);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 2).expect("cursor");
    assert!(cursor.get_first_page().expect("page"));

    backend.fail_next(StatementKind::DropProcedure, "connection lost");
    let err = cursor.close().expect_err("close surfaces failure");
    assert_eq!(err.code_str(), "backend_execution");
    // The strategy retries the drop when it is finally released.
    assert!(backend.live_procedures().is_empty());
}

#[test]
fn cancelled_workspace_still_drops_procedure_on_close() {
    let backend = backend(8);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 3).expect("cursor");
    assert!(cursor.get_first_page().expect("page"));
    assert_eq!(backend.live_procedures().len(), 1);

    ws.cancel_token().cancel();
    assert!(matches!(cursor.get_next_page(), Err(OrmError::Cancelled)));
    cursor.close().expect("cleanup ignores cancellation");
    assert!(backend.live_procedures().is_empty());
}

#[test]
fn cancelled_workspace_still_drops_procedure_on_drop() {
    let backend = backend(8);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 3).expect("cursor");
    assert!(cursor.get_first_page().expect("page"));
    ws.cancel_token().cancel();
    drop(cursor);
    assert!(backend.live_procedures().is_empty());
}

#[test]
fn huge_page_number_is_out_of_range() {
    let backend = backend(8);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 5).expect("cursor");
    assert!(cursor.get_first_page().expect("first"));
    assert!(!cursor.get_page(u64::MAX / 2, 5).expect("huge page"));
    assert!(!cursor.get_page(u64::MAX, u64::MAX).expect("max page"));
    assert_eq!(cursor.current_page(), Some(0));
    assert_eq!(cursor.entities().len(), 5);
}

#[test]
fn failed_procedure_creation_surfaces_from_navigation() {
    let backend = backend(3);
    let ws = open(&backend);
    let mut cursor = ws.cursor("Order", None, None, 2).expect("cursor");
    backend.fail_next(StatementKind::CreateProcedure, "permission denied");
    let err = cursor.get_first_page().expect_err("create fails");
    assert!(matches!(err, OrmError::BackendExecution { .. }));
    assert_eq!(cursor.current_page(), None);
    assert!(backend.live_procedures().is_empty());

    assert!(cursor.get_first_page().expect("retry"));
    assert_eq!(backend.live_procedures().len(), 1);
}

#[test]
fn concurrent_cursors_never_share_a_procedure_name() {
    let backend = backend(40);
    let names = Arc::new(ProcedureNameAllocator::new("mr_page_"));
    let workspaces = (0..4)
        .map(|_| {
            Workspace::open_with_allocator(
                model(),
                backend.clone(),
                RuntimeConfig::default(),
                Arc::clone(&names),
            )
            .expect("open")
        })
        .collect::<Vec<_>>();

    let cursors = thread::scope(|scope| {
        let handles = workspaces
            .iter()
            .flat_map(|ws| (0..4).map(move |_| ws))
            .map(|ws| {
                scope.spawn(move || {
                    let mut cursor = ws.cursor("Order", None, None, 10).expect("cursor");
                    assert!(cursor.get_first_page().expect("page"));
                    cursor
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect::<Vec<_>>()
    });

    let live = backend.live_procedures();
    assert_eq!(live.len(), 16);
    assert_eq!(live.iter().collect::<BTreeSet<_>>().len(), 16);
    drop(cursors);
    assert!(backend.live_procedures().is_empty());
}
