use persist::{
    AggregateMode, Error, PersistenceManager, PersistorDefinition, SharedDatastore, SqliteAdapter,
    Target, WriteMode,
};
use pipeline::{ExecutionState, Processor, Rows, Sink};
use pretty_assertions::assert_eq;
use row::{AggregateRole, Column, Row, Value, ValueType};
use std::sync::Arc;

fn shape(names: &[&str]) -> Row {
    Row::from_columns(names.iter().map(|n| Column::new(*n))).unwrap()
}

fn run(store: &SharedDatastore, shape: Row, data: Vec<Vec<Value>>) -> usize {
    let mut processor = Processor::new(Rows::new("input", shape, data));
    processor.add_sink(store.clone()).unwrap();
    processor.run().unwrap()
}

fn select(manager: &mut PersistenceManager, adapter: &SqliteAdapter, sql: &str) -> Vec<Vec<Value>> {
    manager
        .persistence(adapter)
        .unwrap()
        .borrow_mut()
        .fetch(sql, 0, 100)
        .unwrap()
}

fn v<T: Into<Value>>(value: T) -> Value {
    value.into()
}

fn kv_definition(table: &str) -> PersistorDefinition {
    PersistorDefinition::new(
        Target::new(table),
        vec![
            Column::new("k"),
            Column::new("v").with_type(ValueType::Integer),
        ],
    )
}

#[test]
fn test_fill_creates_and_appends() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    for round in 0..2 {
        let store = manager.provide(&adapter, kv_definition("facts")).unwrap();
        let rows = run(
            &store,
            shape(&["k", "v"]),
            vec![vec![v("a"), v(round)], vec![v("b"), v("7")]],
        );
        assert_eq!(rows, 2);
    }

    let rows = select(&mut manager, &adapter, r#"SELECT k, v FROM facts ORDER BY v, k"#);
    assert_eq!(
        rows,
        vec![
            vec![v("a"), v(0)],
            vec![v("a"), v(1)],
            vec![v("b"), v(7)],
            vec![v("b"), v(7)],
        ]
    );
}

#[test]
fn test_create_and_update_replace_rows() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let store = manager
        .provide(&adapter, kv_definition("facts").with_mode(WriteMode::Create))
        .unwrap();
    run(&store, shape(&["k", "v"]), vec![vec![v("a"), v(1)], vec![v("b"), v(2)]]);

    let store = manager
        .provide(&adapter, kv_definition("facts").with_mode(WriteMode::Create))
        .unwrap();
    run(&store, shape(&["k", "v"]), vec![vec![v("c"), v(3)]]);
    assert_eq!(
        select(&mut manager, &adapter, "SELECT k FROM facts"),
        vec![vec![v("c")]]
    );

    let store = manager
        .provide(&adapter, kv_definition("facts").with_mode(WriteMode::Update))
        .unwrap();
    run(&store, shape(&["v", "k"]), vec![vec![v(4), v("d")]]);
    assert_eq!(
        select(&mut manager, &adapter, "SELECT k, v FROM facts"),
        vec![vec![v("d"), v(4)]]
    );
}

#[test]
fn test_delete_by_logical_keys() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let store = manager.provide(&adapter, kv_definition("facts")).unwrap();
    run(
        &store,
        shape(&["k", "v"]),
        vec![
            vec![v("a"), v(1)],
            vec![v("b"), v(2)],
            vec![v("c"), Value::Null],
        ],
    );

    // Without declared keys, every data column identifies a row. Nulls match nulls.
    let store = manager
        .provide(&adapter, kv_definition("facts").with_mode(WriteMode::Delete))
        .unwrap();
    run(
        &store,
        shape(&["k", "v"]),
        vec![vec![v("a"), v(2)], vec![v("b"), v(2)], vec![v("c"), Value::Null]],
    );

    assert_eq!(
        select(&mut manager, &adapter, "SELECT k, v FROM facts"),
        vec![vec![v("a"), v(1)]]
    );
}

fn sales_definition() -> PersistorDefinition {
    serde_json::from_value(serde_json::json!({
        "target": {"table": "sales"},
        "columns": [
            {"name": "region", "aggregate": "key"},
            {"name": "amount", "type": "number", "aggregate": "sum"},
            {"name": "orders", "type": "integer", "aggregate": "count"},
            {"name": "opened", "aggregate": "keep"},
            {"name": "note", "aggregate": "put"},
        ],
        "aggregate": "bulk",
        "bulkSize": 2,
    }))
    .unwrap()
}

#[test]
fn test_bulk_merges_with_existing_rows() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");
    let columns = ["region", "amount", "orders", "opened", "note"];

    let store = manager.provide(&adapter, sales_definition()).unwrap();
    run(
        &store,
        shape(&columns),
        vec![
            vec![v("north"), v(1), v(1), v("jan"), v("first")],
            vec![v("north"), v(2.5), v(1), v("feb"), v("second")],
        ],
    );
    assert_eq!(
        select(&mut manager, &adapter, "SELECT * FROM sales"),
        vec![vec![v("north"), v(3.5), v(2), v("jan"), v("second")]]
    );

    let store = manager.provide(&adapter, sales_definition()).unwrap();
    run(
        &store,
        shape(&columns),
        vec![
            vec![v("south"), v(5), v(1), v("mar"), v("only")],
            vec![v("north"), v(0.5), v(1), v("apr"), v("third")],
        ],
    );

    // A merged row takes part in later merges as a single staged row.
    assert_eq!(
        select(&mut manager, &adapter, "SELECT * FROM sales ORDER BY region"),
        vec![
            vec![v("north"), v(4.0), v(2), v("jan"), v("third")],
            vec![v("south"), v(5.0), v(1), v("mar"), v("only")],
        ]
    );
    assert_eq!(
        select(
            &mut manager,
            &adapter,
            "SELECT count(*) FROM sqlite_master WHERE name = 'sales_etl_temporary'"
        ),
        vec![vec![v(0)]],
        "shadow table is dropped after the merge"
    );
}

#[test]
fn test_stopped_bulk_load_keeps_existing_rows() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");
    let columns = ["region", "amount", "orders", "opened", "note"];

    let store = manager.provide(&adapter, sales_definition()).unwrap();
    run(
        &store,
        shape(&columns),
        vec![vec![v("north"), v(1), v(1), v("jan"), v("first")]],
    );

    // A second load is stopped after its first row, and never commits.
    let store = manager.provide(&adapter, sales_definition()).unwrap();
    let state = Arc::new(ExecutionState::new());
    let mut processor = Processor::new(Rows::new(
        "input",
        shape(&columns),
        vec![
            vec![v("north"), v(2), v(1), v("feb"), v("second")],
            vec![v("south"), v(5), v(1), v("mar"), v("only")],
        ],
    ));
    processor.set_state(state.clone());
    processor.add_sink(store.clone()).unwrap();

    assert!(processor.next().unwrap().is_some());
    state.stop();
    assert!(processor.next().unwrap().is_none());
    drop((processor, store));
    manager.clear(&["db"]).unwrap();

    assert_eq!(
        select(&mut manager, &adapter, "SELECT * FROM sales"),
        vec![vec![v("north"), v(1.0), v(1), v("jan"), v("first")]]
    );
    assert_eq!(
        select(
            &mut manager,
            &adapter,
            "SELECT count(*) FROM sqlite_master WHERE name = 'sales_etl_temporary'"
        ),
        vec![vec![v(0)]],
    );
}

#[test]
fn test_definitions_sharing_a_table() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let pairs = manager
        .provide(&adapter, kv_definition("facts").with_bulk_size(10))
        .unwrap();
    let keys = manager
        .provide(
            &adapter,
            PersistorDefinition::new(Target::new("facts"), vec![Column::new("k")]).with_bulk_size(10),
        )
        .unwrap();

    let mut pair = shape(&["k", "v"]);
    let mut key = shape(&["k"]);
    pairs.borrow_mut().attach(&pair).unwrap();
    keys.borrow_mut().attach(&key).unwrap();

    // Writes of both datastores interleave before either commits.
    for (k, value) in [("a", 1), ("c", 3)] {
        pair.set("k", k).unwrap();
        pair.set("v", value).unwrap();
        pairs.borrow_mut().write_row(&pair).unwrap();

        key.set("k", format!("{k}{k}")).unwrap();
        keys.borrow_mut().write_row(&key).unwrap();
    }
    pairs.borrow_mut().commit_rows().unwrap();
    keys.borrow_mut().commit_rows().unwrap();

    assert_eq!(pairs.borrow().counts(), (2, 0));
    assert_eq!(keys.borrow().counts(), (2, 0));
    assert_eq!(
        select(&mut manager, &adapter, "SELECT k, v FROM facts ORDER BY k"),
        vec![
            vec![v("a"), v(1)],
            vec![v("aa"), Value::Null],
            vec![v("c"), v(3)],
            vec![v("cc"), Value::Null],
        ]
    );
}

#[test]
fn test_rows_are_counted_once_flushed() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let persistence = manager.persistence(&adapter).unwrap();
    persistence
        .borrow_mut()
        .execute("CREATE TABLE facts (k TEXT NOT NULL, v INTEGER)")
        .unwrap();

    let store = manager
        .provide(&adapter, kv_definition("facts").with_bulk_size(10))
        .unwrap();
    let mut row = shape(&["k", "v"]);
    store.borrow_mut().attach(&row).unwrap();

    for k in [v("a"), Value::Null, v("b")] {
        row.set("k", k).unwrap();
        row.set("v", 1).unwrap();
        store.borrow_mut().write_row(&row).unwrap();
    }
    // Still buffered.
    assert_eq!(store.borrow().counts(), (0, 0));

    // The null key is rejected by the table when the buffer is flushed.
    store.borrow_mut().commit_rows().unwrap();
    assert_eq!(store.borrow().counts(), (2, 1));
}

#[test]
fn test_row_mode_updates_and_inserts_on_miss() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let definition = PersistorDefinition::new(
        Target::new("totals"),
        vec![
            Column::new("k").with_aggregate(AggregateRole::Key),
            Column::new("total")
                .with_type(ValueType::Integer)
                .with_aggregate(AggregateRole::Sum),
            Column::new("hits")
                .with_type(ValueType::Integer)
                .with_aggregate(AggregateRole::Count),
            Column::new("since").with_aggregate(AggregateRole::First),
        ],
    )
    .with_aggregate(AggregateMode::Row);

    let store = manager.provide(&adapter, definition).unwrap();
    run(
        &store,
        shape(&["k", "total", "hits", "since"]),
        vec![
            vec![v("a"), v(2), Value::Null, v("mon")],
            vec![v("b"), v(1), Value::Null, v("tue")],
            vec![v("a"), v(3), Value::Null, v("wed")],
            vec![v("a"), v(4), Value::Null, v("thu")],
        ],
    );

    assert_eq!(
        select(&mut manager, &adapter, "SELECT * FROM totals ORDER BY k"),
        vec![
            vec![v("a"), v(9), v(3), v("mon")],
            vec![v("b"), v(1), v(1), v("tue")],
        ]
    );
}

#[test]
fn test_temporary_target_is_dropped_on_close() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let store = manager
        .provide(&adapter, kv_definition("scratch").with_mode(WriteMode::Temporary))
        .unwrap();
    run(&store, shape(&["k", "v"]), vec![vec![v("a"), v(1)]]);

    let persistence = manager.persistence(&adapter).unwrap();
    assert!(persistence.borrow_mut().table_exists(&Target::new("scratch")).unwrap());

    store.borrow_mut().close().unwrap();
    assert!(!persistence.borrow_mut().table_exists(&Target::new("scratch")).unwrap());

    let err = store.borrow_mut().write_row(&shape(&["k", "v"])).unwrap_err();
    insta::assert_snapshot!(err, @"datastore of db:scratch is closed");
}

#[test]
fn test_existing_table_compatibility() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let persistence = manager.persistence(&adapter).unwrap();
    persistence
        .borrow_mut()
        .execute("CREATE TABLE facts (k TEXT, v REAL)")
        .unwrap();

    // Differing types adapt to the table.
    let store = manager.provide(&adapter, kv_definition("facts")).unwrap();
    store.borrow_mut().set_writeable().unwrap();
    let types: Vec<_> = store
        .borrow()
        .definition()
        .columns
        .iter()
        .map(|c| c.value_type)
        .collect();
    assert_eq!(types, vec![ValueType::Text, ValueType::Number]);

    // A missing column is fatal.
    let mut definition = kv_definition("facts");
    definition.columns.push(Column::new("extra"));
    let store = manager.provide(&adapter, definition).unwrap();
    let err = store.borrow_mut().set_writeable().unwrap_err();
    assert!(matches!(err, Error::IncompatibleColumn { .. }));
    insta::assert_snapshot!(err, @"table facts has no column extra required by the written rows");
}

#[test]
fn test_file_backed_connection_survives_clear() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = SqliteAdapter::new("file").with_path(dir.path().join("data.db"));

    let mut manager = PersistenceManager::new();
    let store = manager
        .provide(&adapter, kv_definition("facts").with_bulk_size(10))
        .unwrap();
    run(
        &store,
        shape(&["k", "v"]),
        (0..25).map(|i| vec![v("k"), v(i)]).collect(),
    );
    drop(store);
    manager.clear(&[]).unwrap();

    let mut manager = PersistenceManager::new();
    let persistence = manager.persistence(&adapter).unwrap();
    assert_eq!(persistence.borrow_mut().row_count(&Target::new("facts")).unwrap(), 25);
}

#[test]
fn test_keyed_tables_and_reads() {
    let mut manager = PersistenceManager::new();
    let adapter = SqliteAdapter::new("db");

    let mut definition = kv_definition("keyed").with_mode(WriteMode::Create);
    definition.create_key_column = true;
    let store = manager.provide(&adapter, definition).unwrap();
    run(&store, shape(&["k", "v"]), vec![vec![v("a"), v(1)], vec![v("b"), v(2)]]);

    let persistence = manager.persistence(&adapter).unwrap();
    let mut persistence = persistence.borrow_mut();
    let described = persistence.describe("SELECT * FROM keyed").unwrap();
    assert_eq!(
        described,
        vec![
            ("_etl_key".to_string(), ValueType::Integer),
            ("k".to_string(), ValueType::Text),
            ("v".to_string(), ValueType::Integer),
        ]
    );
    assert_eq!(
        persistence.fetch("SELECT * FROM keyed ORDER BY _etl_key", 1, 10).unwrap(),
        vec![vec![v(2), v("b"), v(2)]]
    );
}
