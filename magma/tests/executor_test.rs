use magma::executor::{DeleteExecutor, Executor, SeqScanExecutor, UpdateExecutor};
use magma::plan::{BinaryOperator, DeletePlan, Expr, SeqScanPlan, UpdatePlan};
use magma::types::Value;

mod common;
use common::TestDb;

#[test]
fn insert_then_scan_returns_all_rows() {
    let db = TestDb::new("insert_scan");
    db.create_accounts_table();

    let txn = db.begin();
    let count = db.insert_accounts(&txn, &[(1, 100), (2, 200), (3, 300)]);
    assert_eq!(count, 3);
    assert!(db.commit(&txn));

    let reader = db.begin();
    let rows = db.scan_accounts(&reader, None);
    assert_eq!(rows.len(), 3);
    let balances: Vec<i32> = (1..=3)
        .map(|id| db.balance_of(&reader, id).unwrap())
        .collect();
    assert_eq!(balances, vec![100, 200, 300]);
    db.abort(&reader);
}

#[test]
fn scan_filter_prunes_rows() {
    let db = TestDb::new("scan_filter");
    db.create_accounts_table();

    let txn = db.begin();
    db.insert_accounts(&txn, &[(1, 50), (2, 150), (3, 250)]);
    assert!(db.commit(&txn));

    let reader = db.begin();
    let filter = Expr::binary(
        BinaryOperator::Gt,
        Expr::column(1),
        Expr::literal(Value::Int(100)),
    );
    let rows = db.scan_accounts(&reader, Some(filter));
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|(row, _)| matches!(row[1], Value::Int(b) if b > 100)));
    db.abort(&reader);
}

#[test]
fn update_rewrites_in_place_and_reports_count() {
    let db = TestDb::new("update_count");
    let table = db.create_accounts_table();

    let txn = db.begin();
    db.insert_accounts(&txn, &[(1, 10), (2, 20), (3, 30)]);
    assert!(db.commit(&txn));

    // Double every balance above 15.
    let writer = db.begin();
    let scan_plan = SeqScanPlan {
        table_oid: table.oid,
        filter: Some(Expr::binary(
            BinaryOperator::Gt,
            Expr::column(1),
            Expr::literal(Value::Int(15)),
        )),
    };
    let update_plan = UpdatePlan {
        table_oid: table.oid,
        target_exprs: vec![
            Expr::column(0),
            Expr::binary(BinaryOperator::Plus, Expr::column(1), Expr::column(1)),
        ],
    };
    let ctx = db.ctx(&writer);
    let child = Box::new(SeqScanExecutor::new(ctx, &scan_plan).unwrap());
    let mut update = UpdateExecutor::new(ctx, &update_plan, child).unwrap();
    update.init().unwrap();
    let (row, _) = update.next().unwrap().unwrap();
    assert_eq!(row[0], Value::Int(2));
    assert!(update.next().unwrap().is_none());
    assert!(db.commit(&writer));

    let reader = db.begin();
    assert_eq!(db.balance_of(&reader, 1), Some(10));
    assert_eq!(db.balance_of(&reader, 2), Some(40));
    assert_eq!(db.balance_of(&reader, 3), Some(60));
    db.abort(&reader);
}

#[test]
fn delete_removes_rows_and_updates_indexes() {
    let db = TestDb::new("delete_indexes");
    let table = db.create_accounts_table();
    let index = db.catalog.create_index("accounts_id", "accounts", 0).unwrap();

    let txn = db.begin();
    db.insert_accounts(&txn, &[(1, 10), (2, 20)]);
    assert!(db.commit(&txn));

    assert!(index.index.get(&1).unwrap().is_some());
    assert!(index.index.get(&2).unwrap().is_some());

    let deleter = db.begin();
    let scan_plan = SeqScanPlan {
        table_oid: table.oid,
        filter: Some(Expr::binary(
            BinaryOperator::Eq,
            Expr::column(0),
            Expr::literal(Value::Int(1)),
        )),
    };
    let delete_plan = DeletePlan {
        table_oid: table.oid,
    };
    let ctx = db.ctx(&deleter);
    let child = Box::new(SeqScanExecutor::new(ctx, &scan_plan).unwrap());
    let mut delete = DeleteExecutor::new(ctx, &delete_plan, child).unwrap();
    delete.init().unwrap();
    let (row, _) = delete.next().unwrap().unwrap();
    assert_eq!(row[0], Value::Int(1));
    assert!(db.commit(&deleter));

    assert_eq!(index.index.get(&1).unwrap(), None);
    assert!(index.index.get(&2).unwrap().is_some());

    let reader = db.begin();
    assert_eq!(db.balance_of(&reader, 1), None);
    assert_eq!(db.balance_of(&reader, 2), Some(20));
    db.abort(&reader);
}

#[test]
fn index_follows_key_updates() {
    let db = TestDb::new("index_key_update");
    let table = db.create_accounts_table();
    let index = db.catalog.create_index("accounts_id", "accounts", 0).unwrap();

    let txn = db.begin();
    db.insert_accounts(&txn, &[(7, 70)]);
    assert!(db.commit(&txn));
    let rid = index.index.get(&7).unwrap().unwrap();

    // Rewrite the key column from 7 to 8.
    let writer = db.begin();
    let scan_plan = SeqScanPlan {
        table_oid: table.oid,
        filter: None,
    };
    let update_plan = UpdatePlan {
        table_oid: table.oid,
        target_exprs: vec![Expr::literal(Value::Int(8)), Expr::column(1)],
    };
    let ctx = db.ctx(&writer);
    let child = Box::new(SeqScanExecutor::new(ctx, &scan_plan).unwrap());
    let mut update = UpdateExecutor::new(ctx, &update_plan, child).unwrap();
    update.init().unwrap();
    update.next().unwrap();
    assert!(db.commit(&writer));

    assert_eq!(index.index.get(&7).unwrap(), None);
    assert_eq!(index.index.get(&8).unwrap(), Some(rid));
}

#[test]
fn scan_snapshot_ignores_rows_inserted_after_it_started() {
    let db = TestDb::new("scan_prefix");
    let table = db.create_accounts_table();

    let txn = db.begin();
    db.insert_accounts(&txn, &[(1, 10)]);
    assert!(db.commit(&txn));

    let reader = db.begin();
    let plan = SeqScanPlan {
        table_oid: table.oid,
        filter: None,
    };
    let ctx = db.ctx(&reader);
    let mut scan = SeqScanExecutor::new(ctx, &plan).unwrap();
    scan.init().unwrap();

    // A concurrent insert lands after the iterator snapshot was taken.
    let writer = db.begin();
    db.insert_accounts(&writer, &[(2, 20)]);
    assert!(db.commit(&writer));

    let mut seen = 0;
    while scan.next().unwrap().is_some() {
        seen += 1;
    }
    assert_eq!(seen, 1);
    db.abort(&reader);
}

#[test]
fn update_of_own_insert_keeps_chain_empty() {
    let db = TestDb::new("own_insert_update");
    db.create_accounts_table();

    let txn = db.begin();
    db.insert_accounts(&txn, &[(1, 10)]);

    let table = db.catalog.table_by_name("accounts").unwrap();
    let scan_plan = SeqScanPlan {
        table_oid: table.oid,
        filter: None,
    };
    let update_plan = UpdatePlan {
        table_oid: table.oid,
        target_exprs: vec![Expr::column(0), Expr::literal(Value::Int(11))],
    };
    let ctx = db.ctx(&txn);
    let child = Box::new(SeqScanExecutor::new(ctx, &scan_plan).unwrap());
    let mut update = UpdateExecutor::new(ctx, &update_plan, child).unwrap();
    update.init().unwrap();
    update.next().unwrap();

    // No undo log exists: nothing older than the insert can be visible.
    assert_eq!(txn.undo_log_count(), 0);
    assert_eq!(db.balance_of(&txn, 1), Some(11));
    assert!(db.commit(&txn));
}
