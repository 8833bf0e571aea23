//! Single-entity write and read pipeline.

mod common;

use std::sync::{Arc, Mutex};

use common::{Kind, RecordingExecutor, Toto, row, toto, toto_persister};
use relmap::prelude::*;
use relmap::{QueryErrorKind, RetryConfig};

#[test]
fn toto_insert_is_one_batch_of_two() {
    let persister = toto_persister(PersisterConfig::default());
    let executor = RecordingExecutor::new();
    persister
        .insert(&executor, &[toto(1, 17, 23), toto(2, 29, 31)])
        .unwrap();

    let statements = executor.statements();
    assert_eq!(statements.len(), 1);
    let insert = &statements[0];
    assert_eq!(insert.kind, Kind::Batch);
    assert_eq!(insert.sql, "insert into Toto(a, b, c) values (?, ?, ?)");
    let expected: Vec<Vec<Value>> = vec![
        vec![Value::BigInt(1), Value::Int(17), Value::Int(23)],
        vec![Value::BigInt(2), Value::Int(29), Value::Int(31)],
    ];
    let actual: Vec<Vec<Value>> = insert
        .bindings
        .iter()
        .map(|b| b.values().cloned().collect())
        .collect();
    assert_eq!(actual, expected);
}

#[test]
fn update_sends_only_changed_columns() {
    let persister = toto_persister(PersisterConfig::default());
    let executor = RecordingExecutor::new();
    persister
        .update(
            &executor,
            &[UpdatePair::new(toto(1, 42, 23), toto(1, 17, 23))],
            false,
        )
        .unwrap();
    let statements = executor.statements();
    assert_eq!(statements[0].sql, "update Toto set b = ? where a = ?");
    assert_eq!(
        statements[0].bindings[0].values().cloned().collect::<Vec<_>>(),
        vec![Value::Int(42), Value::BigInt(1)]
    );
}

#[test]
fn update_all_columns_completes_changed_rows() {
    let persister = toto_persister(PersisterConfig::default());
    let executor = RecordingExecutor::new();
    persister
        .update(
            &executor,
            &[
                UpdatePair::new(toto(1, 42, 23), toto(1, 17, 23)),
                UpdatePair::new(toto(2, 5, 5), toto(2, 5, 5)),
            ],
            true,
        )
        .unwrap();
    assert_eq!(executor.sql(), vec!["update Toto set b = ?, c = ? where a = ?"]);
    assert_eq!(executor.statements()[0].bindings.len(), 1);
}

#[test]
fn stale_update_is_detected() {
    let persister = toto_persister(PersisterConfig::default());
    let executor = RecordingExecutor::new();
    executor.push_count(RowCount::Exact(0));
    let err = persister
        .update(
            &executor,
            &[UpdatePair::new(toto(1, 42, 23), toto(1, 17, 23))],
            false,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        Error::StaleObject(ref e) if e.expected == 1 && e.actual == 0
    ));
}

#[test]
fn delete_by_id_chunks_on_in_size() {
    let mut config = PersisterConfig::default();
    config.dialect.in_operator_max_size = 3;
    let persister = toto_persister(config);
    let executor = RecordingExecutor::new();
    let totos: Vec<_> = (1..=7).map(|a| toto(a, 0, 0)).collect();
    // one count per chunk, matching its size
    for n in [3, 3, 1] {
        executor.push_count(RowCount::Exact(n));
    }
    let count = persister.delete_by_id(&executor, &totos).unwrap();

    assert_eq!(count, RowCount::Exact(7));
    assert_eq!(
        executor.sql(),
        vec![
            "delete from Toto where a in (?, ?, ?)",
            "delete from Toto where a in (?, ?, ?)",
            "delete from Toto where a in (?)",
        ]
    );
    let bound: Vec<Value> = executor
        .statements()
        .iter()
        .flat_map(|s| s.bindings[0].values().cloned().collect::<Vec<_>>())
        .collect();
    assert_eq!(bound, (1..=7).map(Value::BigInt).collect::<Vec<_>>());
}

#[test]
fn select_chunks_and_keeps_first_appearance_order() {
    let mut config = PersisterConfig::default();
    config.dialect.in_operator_max_size = 2;
    let persister = toto_persister(config);
    let executor = RecordingExecutor::new();
    let labels = ["Toto_a", "Toto_b", "Toto_c"];
    executor.push_rows(vec![
        row(&labels, vec![Value::BigInt(2), Value::Int(20), Value::Int(21)]),
        row(&labels, vec![Value::BigInt(1), Value::Int(10), Value::Int(11)]),
    ]);
    executor.push_rows(vec![row(
        &labels,
        vec![Value::BigInt(3), Value::Int(30), Value::Int(31)],
    )]);

    let loaded = persister.select(&executor, &[1, 2, 3, 2]).unwrap();
    let ids: Vec<i64> = loaded.iter().map(|t| t.read().a).collect();
    assert_eq!(ids, vec![2, 1, 3]);
    let sql = executor.sql();
    assert_eq!(sql.len(), 2);
    assert!(sql[0].ends_with("where Toto.a in (?, ?)"));
    assert!(sql[1].ends_with("where Toto.a in (?)"));
}

#[test]
fn retryable_failure_is_retried() {
    let config = PersisterConfig {
        dialect: relmap::Dialect {
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 0,
            },
            ..relmap::Dialect::default()
        },
        ..PersisterConfig::default()
    };
    let persister = toto_persister(config);
    let executor = RecordingExecutor::new();
    executor.fail_next(Error::query(QueryErrorKind::Deadlock, "deadlock"));
    persister.insert(&executor, &[toto(1, 2, 3)]).unwrap();
    assert_eq!(executor.statements().len(), 2);
}

#[test]
fn non_retryable_failure_carries_sql() {
    let persister = toto_persister(PersisterConfig::default());
    let executor = RecordingExecutor::new();
    executor.fail_next(Error::query(QueryErrorKind::Constraint, "duplicate key"));
    let err = persister.insert(&executor, &[toto(1, 2, 3)]).unwrap_err();
    let Error::Query(query) = err else {
        panic!("expected a query error, got {err}");
    };
    assert_eq!(query.kind, QueryErrorKind::Constraint);
    assert_eq!(
        query.sql.as_deref(),
        Some("insert into Toto(a, b, c) values (?, ?, ?)")
    );
    assert_eq!(executor.statements().len(), 1);
}

#[test]
fn listeners_wrap_the_operation_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut persister = toto_persister(PersisterConfig::default());
    for name in ["first", "second"] {
        let (v, b, a, e) = (log.clone(), log.clone(), log.clone(), log.clone());
        persister.listeners_mut().insert.add(
            WriteListener::new()
                .validate(move |_, batch: &[EntityRef<Toto>]| {
                    v.lock().unwrap().push(format!("{name}.validate({})", batch.len()));
                    Ok(())
                })
                .before(move |_, _| {
                    b.lock().unwrap().push(format!("{name}.before"));
                    Ok(())
                })
                .after(move |_, _| {
                    a.lock().unwrap().push(format!("{name}.after"));
                    Ok(())
                })
                .on_error(move |_, _, err| {
                    e.lock().unwrap().push(format!("{name}.on_error({err})"));
                }),
        );
    }

    let executor = RecordingExecutor::new();
    persister.insert(&executor, &[toto(1, 2, 3)]).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first.validate(1)",
            "second.validate(1)",
            "first.before",
            "second.before",
            "first.after",
            "second.after",
        ]
    );

    log.lock().unwrap().clear();
    executor.fail_next(Error::Custom("boom".to_string()));
    let err = persister.insert(&executor, &[toto(2, 2, 3)]).unwrap_err();
    assert!(matches!(err, Error::Custom(ref m) if m == "boom"));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 6);
    assert_eq!(log[4], "first.on_error(boom)");
    assert_eq!(log[5], "second.on_error(boom)");
}

#[test]
fn configuration_loads_from_json() {
    let config =
        PersisterConfig::from_json(r#"{"batch_size": 2, "dialect": {"in_operator_max_size": 5}}"#)
            .unwrap();
    assert_eq!(config.batch_size, 2);
    assert_eq!(config.dialect.in_operator_max_size, 5);
    assert!(PersisterConfig::from_json(r#"{"batch_size": 0}"#).is_err());
}
