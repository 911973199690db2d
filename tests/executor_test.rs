use std::sync::Arc;

use anyhow::Result;

mod common;
use common::{account_tuple, TestEngine};

use tarndb::catalog::index_key_for;
use tarndb::common::types::Rid;
use tarndb::query::executor::operators::{
    Aggregate, AggregateType, AggregationExecutor, DeleteExecutor, DistinctExecutor,
    HashJoinExecutor, InsertExecutor, InsertSource, LimitExecutor, NestedLoopJoinExecutor,
    Operator, SeqScanExecutor, UpdateExecutor,
};
use tarndb::query::executor::result::{DataValue, Tuple};
use tarndb::transaction::IsolationLevel;

/// Drain an operator into a vector of rows.
fn collect(op: &mut dyn Operator) -> Result<Vec<(Tuple, Rid)>> {
    let mut rows = Vec::new();
    while let Some(row) = op.next()? {
        rows.push(row);
    }
    Ok(rows)
}

fn seed_accounts(engine: &TestEngine, rows: &[(i64, &str)]) -> Result<()> {
    let table = engine.create_accounts_table()?;
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let tuples = rows.iter().map(|(id, name)| account_tuple(*id, name)).collect();
    let mut insert = InsertExecutor::new(ctx, table.oid, InsertSource::Raw(tuples));
    insert.init()?;
    assert!(insert.next()?.is_none());
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_insert_then_scan() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob"), (3, "carol")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let mut scan = SeqScanExecutor::new(ctx, table.oid, None);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].0, account_tuple(1, "alice"));
    assert_eq!(rows[2].0, account_tuple(3, "carol"));
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_scan_with_predicate() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob"), (3, "carol")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let mut scan = SeqScanExecutor::new(
        ctx,
        table.oid,
        Some(Box::new(|tuple: &Tuple| {
            matches!(tuple.value(0), Some(DataValue::Integer(id)) if *id >= 2)
        })),
    );
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, account_tuple(2, "bob"));
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_scan_lock_release_per_isolation_level() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    // READ_COMMITTED gives the shared lock back as soon as the row is
    // produced: a second transaction can take an exclusive lock at once.
    let t1 = engine.begin(IsolationLevel::ReadCommitted);
    let mut scan = SeqScanExecutor::new(engine.context(&t1), table.oid, None);
    scan.init()?;
    let (_, rid) = scan.next()?.unwrap();
    assert!(!t1.is_shared_locked(rid));

    let t2 = engine.begin(IsolationLevel::RepeatableRead);
    assert!(engine.lock_manager.lock_exclusive(&t2, rid)?);
    engine.commit(&t2)?;
    engine.commit(&t1)?;

    // REPEATABLE_READ keeps the shared lock until commit.
    let t3 = engine.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(engine.context(&t3), table.oid, None);
    scan.init()?;
    let (_, rid) = scan.next()?.unwrap();
    assert!(t3.is_shared_locked(rid));
    engine.commit(&t3)?;
    assert!(!t3.is_shared_locked(rid));
    Ok(())
}

#[test]
fn test_update_and_abort_restores_old_values() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    // Bump every id by 100, then abort.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), table.oid, None));
    let mut update = UpdateExecutor::new(
        ctx,
        table.oid,
        child,
        Box::new(|tuple: &Tuple| {
            let mut values = tuple.values.clone();
            if let DataValue::Integer(id) = values[0] {
                values[0] = DataValue::Integer(id + 100);
            }
            Tuple::new(values)
        }),
    );
    update.init()?;
    assert!(update.next()?.is_none());
    engine.abort(&txn)?;

    // The pre-images are back.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(engine.context(&txn), table.oid, None);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows[0].0, account_tuple(1, "alice"));
    assert_eq!(rows[1].0, account_tuple(2, "bob"));
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_write_locks_held_until_commit_under_read_committed() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    // READ_COMMITTED releases shared scan locks early, but an exclusive
    // lock taken for a write must survive until commit.
    let t1 = engine.begin(IsolationLevel::ReadCommitted);
    let ctx = engine.context(&t1);
    let child = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), table.oid, None));
    let mut update = UpdateExecutor::new(
        ctx,
        table.oid,
        child,
        Box::new(|t: &Tuple| {
            let mut values = t.values.clone();
            values[1] = DataValue::Text("alicia".into());
            Tuple::new(values)
        }),
    );
    update.init()?;
    assert!(update.next()?.is_none());

    let rid = Rid::new(table.heap.first_page_id(), 0);
    assert!(t1.is_exclusive_locked(rid));

    // A second writer must block rather than see the uncommitted row, so
    // probe from a thread and release by committing.
    let t2 = engine.begin(IsolationLevel::RepeatableRead);
    let waiter = {
        let lock_manager = Arc::clone(&engine.lock_manager);
        let t2 = Arc::clone(&t2);
        std::thread::spawn(move || lock_manager.lock_exclusive(&t2, rid))
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!t2.is_exclusive_locked(rid));

    engine.commit(&t1)?;
    assert!(waiter.join().unwrap()?);
    assert!(t2.is_exclusive_locked(rid));
    engine.commit(&t2)?;
    Ok(())
}

#[test]
fn test_delete_commit_and_abort() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob"), (3, "carol")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    // Delete bob, then abort: the row must reappear.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(
        Arc::clone(&ctx),
        table.oid,
        Some(Box::new(|t: &Tuple| {
            matches!(t.value(0), Some(DataValue::Integer(2)))
        })),
    ));
    let mut delete = DeleteExecutor::new(ctx, table.oid, child);
    delete.init()?;
    assert!(delete.next()?.is_none());
    engine.abort(&txn)?;

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(engine.context(&txn), table.oid, None);
    scan.init()?;
    assert_eq!(collect(&mut scan)?.len(), 3);
    engine.commit(&txn)?;

    // Delete bob again and commit: the row is gone for good.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(
        Arc::clone(&ctx),
        table.oid,
        Some(Box::new(|t: &Tuple| {
            matches!(t.value(0), Some(DataValue::Integer(2)))
        })),
    ));
    let mut delete = DeleteExecutor::new(ctx, table.oid, child);
    delete.init()?;
    assert!(delete.next()?.is_none());
    engine.commit(&txn)?;

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(engine.context(&txn), table.oid, None);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, account_tuple(1, "alice"));
    assert_eq!(rows[1].0, account_tuple(3, "carol"));
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_index_maintained_by_dml() -> Result<()> {
    let engine = TestEngine::new(64)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();
    let index_info = engine.catalog.create_index("accounts_id_idx", "accounts", "id")?;

    // Backfill covered the seeded rows.
    let key = index_key_for(&DataValue::Integer(1));
    assert_eq!(index_info.index.get_value(&key)?.len(), 1);

    // Inserting through the executor adds entries.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut insert = InsertExecutor::new(
        engine.context(&txn),
        table.oid,
        InsertSource::Raw(vec![account_tuple(3, "carol")]),
    );
    insert.init()?;
    insert.next()?;
    engine.commit(&txn)?;

    let key3 = index_key_for(&DataValue::Integer(3));
    let rids = index_info.index.get_value(&key3)?;
    assert_eq!(rids.len(), 1);

    // Updating the key column moves the entry.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(
        Arc::clone(&ctx),
        table.oid,
        Some(Box::new(|t: &Tuple| {
            matches!(t.value(0), Some(DataValue::Integer(3)))
        })),
    ));
    let mut update = UpdateExecutor::new(
        ctx,
        table.oid,
        child,
        Box::new(|t: &Tuple| {
            let mut values = t.values.clone();
            values[0] = DataValue::Integer(30);
            Tuple::new(values)
        }),
    );
    update.init()?;
    update.next()?;
    engine.commit(&txn)?;

    assert!(index_info.index.get_value(&key3)?.is_empty());
    let key30 = index_key_for(&DataValue::Integer(30));
    assert_eq!(index_info.index.get_value(&key30)?.len(), 1);

    // Aborted deletes put their index entries back.
    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(
        Arc::clone(&ctx),
        table.oid,
        Some(Box::new(|t: &Tuple| {
            matches!(t.value(0), Some(DataValue::Integer(1)))
        })),
    ));
    let mut delete = DeleteExecutor::new(ctx, table.oid, child);
    delete.init()?;
    delete.next()?;
    assert!(index_info.index.get_value(&key)?.is_empty());
    engine.abort(&txn)?;
    assert_eq!(index_info.index.get_value(&key)?.len(), 1);
    Ok(())
}

#[test]
fn test_limit_executor() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "a"), (2, "b"), (3, "c"), (4, "d")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(ctx, table.oid, None));
    let mut limit = LimitExecutor::new(child, 2);
    limit.init()?;
    assert_eq!(collect(&mut limit)?.len(), 2);
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_distinct_executor() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "dup"), (1, "dup"), (2, "uniq"), (1, "dup")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(ctx, table.oid, None));
    let mut distinct = DistinctExecutor::new(child);
    distinct.init()?;
    let rows = collect(&mut distinct)?;
    assert_eq!(rows.len(), 2);
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_nested_loop_join() -> Result<()> {
    let engine = TestEngine::new(64)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let left = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), table.oid, None));
    let right = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), table.oid, None));
    let mut join = NestedLoopJoinExecutor::new(
        left,
        right,
        Box::new(|l: &Tuple, r: &Tuple| l.value(0) == r.value(0)),
    );
    join.init()?;
    let rows = collect(&mut join)?;
    // Self-join on id: one match per row.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0.values.len(), 4);
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_hash_join() -> Result<()> {
    let engine = TestEngine::new(64)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob"), (2, "bobby")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let left = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), table.oid, None));
    let right = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), table.oid, None));
    let mut join = HashJoinExecutor::new(
        left,
        right,
        Box::new(|t: &Tuple| t.values[0].clone()),
        Box::new(|t: &Tuple| t.values[0].clone()),
    );
    join.init()?;
    let rows = collect(&mut join)?;
    // id=1 matches once, each id=2 row matches both id=2 rows.
    assert_eq!(rows.len(), 5);
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aggregation_executor() -> Result<()> {
    let engine = TestEngine::new(64)?;
    seed_accounts(
        &engine,
        &[(1, "red"), (2, "red"), (3, "blue"), (10, "red")],
    )?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(ctx, table.oid, None));
    // GROUP BY name: COUNT(*), SUM(id), MAX(id)
    let mut agg = AggregationExecutor::new(
        child,
        vec![1],
        vec![
            Aggregate { kind: AggregateType::CountStar, column: 0 },
            Aggregate { kind: AggregateType::Sum, column: 0 },
            Aggregate { kind: AggregateType::Max, column: 0 },
        ],
        None,
    );
    agg.init()?;
    let rows = collect(&mut agg)?;
    assert_eq!(rows.len(), 2);

    let red = rows
        .iter()
        .find(|(t, _)| t.value(0) == Some(&DataValue::Text("red".into())))
        .unwrap();
    assert_eq!(red.0.value(1), Some(&DataValue::Integer(3)));
    assert_eq!(red.0.value(2), Some(&DataValue::Integer(13)));
    assert_eq!(red.0.value(3), Some(&DataValue::Integer(10)));
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aggregation_having_filter() -> Result<()> {
    let engine = TestEngine::new(64)?;
    seed_accounts(&engine, &[(1, "red"), (2, "red"), (3, "blue")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(ctx, table.oid, None));
    let mut agg = AggregationExecutor::new(
        child,
        vec![1],
        vec![Aggregate { kind: AggregateType::CountStar, column: 0 }],
        Some(Box::new(|_groups, aggregates| {
            matches!(aggregates[0], DataValue::Integer(n) if n >= 2)
        })),
    );
    agg.init()?;
    let rows = collect(&mut agg)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0.value(0), Some(&DataValue::Text("red".into())));
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_insert_from_child_executor() -> Result<()> {
    let engine = TestEngine::new(64)?;
    seed_accounts(&engine, &[(1, "alice"), (2, "bob")])?;
    let source_table = engine.catalog.get_table_by_name("accounts").unwrap();

    // Copy all rows into a second table through the operator tree.
    let copy_table = engine.catalog.create_table(
        "accounts_copy",
        source_table.schema.clone(),
    )?;

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let ctx = engine.context(&txn);
    let child = Box::new(SeqScanExecutor::new(Arc::clone(&ctx), source_table.oid, None));
    let mut insert = InsertExecutor::new(ctx, copy_table.oid, InsertSource::Child(child));
    insert.init()?;
    assert!(insert.next()?.is_none());
    engine.commit(&txn)?;

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(engine.context(&txn), copy_table.oid, None);
    scan.init()?;
    assert_eq!(collect(&mut scan)?.len(), 2);
    engine.commit(&txn)?;
    Ok(())
}

#[test]
fn test_insert_abort_removes_rows() -> Result<()> {
    let engine = TestEngine::new(32)?;
    seed_accounts(&engine, &[(1, "alice")])?;
    let table = engine.catalog.get_table_by_name("accounts").unwrap();

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut insert = InsertExecutor::new(
        engine.context(&txn),
        table.oid,
        InsertSource::Raw(vec![account_tuple(2, "ghost")]),
    );
    insert.init()?;
    insert.next()?;
    engine.abort(&txn)?;

    let txn = engine.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(engine.context(&txn), table.oid, None);
    scan.init()?;
    let rows = collect(&mut scan)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, account_tuple(1, "alice"));
    engine.commit(&txn)?;
    Ok(())
}
