//! End-to-end statement scenarios over the in-memory engine.

use heron::json::parse_json_document;
use heron::sql::expr::{BinaryOperator, Expr, ProjectedExpr};
use heron::sql::planner::plan_scan;
use heron::sql::statement::{DeleteStmt, InsertStmt, OrderBy, SelectStmt, UpdateStmt};
use heron::sql::stream::Source;
use heron::{
    Database, Error, FieldConstraint, IndexInfo, MemoryEngine, Path, Pivot, Statement, TableInfo,
    ValueType,
};

fn db() -> Database {
    Database::new(MemoryEngine::new()).unwrap()
}

fn create_table(db: &Database, name: &str, info: TableInfo) {
    db.exec(&Statement::CreateTable {
        name: name.to_string(),
        info,
    })
    .unwrap();
}

fn create_index(db: &Database, table: &str, path: &str, name: &str) {
    db.exec(&Statement::CreateIndex {
        info: IndexInfo::new(table, vec![Path::field(path)]).with_name(name),
    })
    .unwrap();
}

fn insert(db: &Database, table: &str, rows: &[&str]) {
    db.exec(&Statement::Insert(InsertStmt {
        table: table.to_string(),
        rows: rows
            .iter()
            .map(|json| Expr::Literal(parse_json_document(json).unwrap().into_value()))
            .collect(),
    }))
    .unwrap();
}

fn select_json(db: &Database, stmt: SelectStmt) -> Vec<String> {
    db.exec(&Statement::Select(stmt))
        .unwrap()
        .json_rows()
        .unwrap()
}

fn index_entry_count(db: &Database, index: &str) -> usize {
    let session = db.begin(false).unwrap();
    let mut count = 0;
    {
        let idx = session
            .catalog()
            .get_index(session.transaction(), index)
            .unwrap();
        idx.ascend_greater_or_equal(&Pivot::default(), |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
    }
    session.rollback().unwrap();
    count
}

#[test]
fn index_range_equals_filter() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    create_index(&db, "t", "a", "i");
    insert(
        &db,
        "t",
        &[
            r#"{"a":1,"b":"x"}"#,
            r#"{"a":2,"b":"y"}"#,
            r#"{"a":3,"b":"z"}"#,
        ],
    );

    let filter = Expr::binary(BinaryOperator::Eq, Expr::field("a"), Expr::integer(2));

    // the planner picks an exact index scan and drops the filter
    let (source, residual) = plan_scan(db.catalog(), "t", Some(filter.clone())).unwrap();
    match source {
        Source::Index { index, ranges, .. } => {
            assert_eq!(index, "i");
            assert!(ranges.0.iter().all(|r| r.exact));
        }
        other => panic!("expected an index scan, got {other:?}"),
    }
    assert!(residual.is_none());

    let mut stmt = SelectStmt::new("t", vec![ProjectedExpr::new(Expr::field("b"))]);
    stmt.filter = Some(filter);
    assert_eq!(select_json(&db, stmt), vec![r#"{"b":"y"}"#]);
}

#[test]
fn reindex_ignores_unlisted_indexes() {
    let db = db();
    create_table(&db, "t1", TableInfo::new("t1"));
    create_table(&db, "t2", TableInfo::new("t2"));
    insert(&db, "t1", &[r#"{"a":1}"#, r#"{"a":2}"#]);
    insert(&db, "t2", &[r#"{"a":3}"#, r#"{"a":4}"#]);
    create_index(&db, "t1", "a", "ix1");
    create_index(&db, "t2", "a", "ix2");

    db.exec(&Statement::Reindex(heron::sql::statement::ReindexStmt::Target(
        "t2".to_string(),
    )))
    .unwrap();

    assert_eq!(index_entry_count(&db, "ix1"), 2);
    assert_eq!(index_entry_count(&db, "ix2"), 2);
}

#[test]
fn group_by_aggregation() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    insert(
        &db,
        "t",
        &[
            r#"{"g":"a","x":1}"#,
            r#"{"g":"a","x":2}"#,
            r#"{"g":"b","x":10}"#,
        ],
    );

    let mut stmt = SelectStmt::new(
        "t",
        vec![
            ProjectedExpr::new(Expr::field("g")),
            ProjectedExpr::new(Expr::Aggregate(heron::sql::aggregate::AggregateFunc::Sum(
                Box::new(Expr::field("x")),
            ))),
            ProjectedExpr::new(Expr::Aggregate(
                heron::sql::aggregate::AggregateFunc::count_wildcard(),
            )),
        ],
    );
    stmt.group_by = Some(Expr::field("g"));
    stmt.order_by = Some(OrderBy {
        path: Path::field("g"),
        descending: false,
    });

    assert_eq!(
        select_json(&db, stmt),
        vec![
            r#"{"g":"a","SUM(x)":3,"COUNT(*)":2}"#,
            r#"{"g":"b","SUM(x)":10,"COUNT(*)":1}"#
        ]
    );
}

#[test]
fn rollback_of_create_and_failed_insert() {
    let db = db();

    let session = db.begin(true).unwrap();
    session
        .exec(&Statement::CreateTable {
            name: "t".to_string(),
            info: TableInfo::new("t").with_constraint(
                FieldConstraint::new(Path::field("a"))
                    .with_type(ValueType::Integer)
                    .not_null(),
            ),
        })
        .unwrap();

    let err = session.exec(&Statement::Insert(InsertStmt {
        table: "t".to_string(),
        rows: vec![Expr::Literal(
            parse_json_document(r#"{"a":null}"#).unwrap().into_value(),
        )],
    }));
    assert!(matches!(err, Err(Error::NotNullViolation { .. })));
    session.rollback().unwrap();

    // the catalog keeps no trace of the table
    let mut stmt = SelectStmt::new(
        "__genji_catalog",
        vec![ProjectedExpr::new(Expr::field("name"))],
    );
    stmt.filter = Some(Expr::binary(
        BinaryOperator::Eq,
        Expr::field("name"),
        Expr::text("t"),
    ));
    assert!(select_json(&db, stmt).is_empty());
    assert!(db.catalog().table_info("t").is_err());
}

#[test]
fn cross_type_order_by() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    insert(
        &db,
        "t",
        &[
            r#"{"v":"a"}"#,
            r#"{"v":1.5}"#,
            r#"{"v":{}}"#,
            r#"{"v":null}"#,
            r#"{"v":[]}"#,
            r#"{"v":false}"#,
            r#"{"v":1}"#,
        ],
    );

    let mut stmt = SelectStmt::new("t", vec![ProjectedExpr::new(Expr::field("v"))]);
    stmt.order_by = Some(OrderBy {
        path: Path::field("v"),
        descending: false,
    });

    assert_eq!(
        select_json(&db, stmt),
        vec![
            r#"{"v":null}"#,
            r#"{"v":false}"#,
            r#"{"v":1}"#,
            r#"{"v":1.5}"#,
            r#"{"v":"a"}"#,
            r#"{"v":[]}"#,
            r#"{"v":{}}"#
        ]
    );
}

#[test]
fn integer_overflow_promotes_to_double() {
    let db = db();

    let stmt = SelectStmt::without_table(vec![ProjectedExpr::aliased(
        Expr::binary(
            BinaryOperator::Add,
            Expr::integer(i64::MAX),
            Expr::integer(1),
        ),
        "r",
    )]);
    assert_eq!(select_json(&db, stmt), vec![r#"{"r":9.223372036854776e18}"#]);
}

#[test]
fn index_stays_consistent_with_table() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    create_index(&db, "t", "a", "i");

    insert(
        &db,
        "t",
        &[r#"{"a":1}"#, r#"{"a":2}"#, r#"{"a":3}"#, r#"{"b":9}"#],
    );

    db.exec(&Statement::Update(UpdateStmt {
        table: "t".to_string(),
        set: vec![(
            "a".to_string(),
            Expr::binary(BinaryOperator::Add, Expr::field("a"), Expr::integer(10)),
        )],
        unset: vec![],
        filter: Some(Expr::binary(
            BinaryOperator::Eq,
            Expr::field("a"),
            Expr::integer(2),
        )),
    }))
    .unwrap();

    db.exec(&Statement::Delete(DeleteStmt {
        table: "t".to_string(),
        filter: Some(Expr::binary(
            BinaryOperator::Eq,
            Expr::field("a"),
            Expr::integer(3),
        )),
    }))
    .unwrap();

    // every index entry maps back to exactly one matching row
    let session = db.begin(false).unwrap();
    let mut expected = Vec::new();
    let mut actual = Vec::new();
    {
        let catalog = session.catalog();
        let tx = session.transaction();

        let table = catalog.get_table(tx, "t").unwrap();
        table
            .iterate(|key, doc| {
                if let Ok(v) = Path::field("a").get_value_from_document(doc) {
                    let tuple =
                        heron_types::key::encode_tuple(std::slice::from_ref(&v)).unwrap();
                    expected.push((tuple, key.to_vec()));
                }
                Ok(())
            })
            .unwrap();

        let idx = catalog.get_index(tx, "i").unwrap();
        idx.ascend_greater_or_equal(&Pivot::default(), |entry| {
            actual.push((entry.encoded.to_vec(), entry.key.to_vec()));
            Ok(())
        })
        .unwrap();
    }
    expected.sort();
    actual.sort();

    assert_eq!(expected, actual);
    session.rollback().unwrap();
}

#[test]
fn distinct_where_limit_offset_roundtrip() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    insert(
        &db,
        "t",
        &[
            r#"{"a":1}"#,
            r#"{"a":1}"#,
            r#"{"a":2}"#,
            r#"{"a":3}"#,
            r#"{"a":4}"#,
        ],
    );

    let mut stmt = SelectStmt::new("t", vec![ProjectedExpr::new(Expr::field("a"))]);
    stmt.distinct = true;
    stmt.filter = Some(Expr::binary(
        BinaryOperator::Gte,
        Expr::field("a"),
        Expr::integer(1),
    ));
    stmt.order_by = Some(OrderBy {
        path: Path::field("a"),
        descending: false,
    });
    stmt.offset = Some(Expr::integer(1));
    stmt.limit = Some(Expr::integer(2));

    assert_eq!(select_json(&db, stmt), vec![r#"{"a":2}"#, r#"{"a":3}"#]);
}

#[test]
fn unique_index_rejects_duplicate_inserts() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    db.exec(&Statement::CreateIndex {
        info: IndexInfo::new("t", vec![Path::field("email")])
            .with_name("t_email_idx")
            .unique(),
    })
    .unwrap();

    insert(&db, "t", &[r#"{"email":"a@b"}"#]);

    let err = db.exec(&Statement::Insert(InsertStmt {
        table: "t".to_string(),
        rows: vec![Expr::Literal(
            parse_json_document(r#"{"email":"a@b"}"#).unwrap().into_value(),
        )],
    }));
    assert!(matches!(err, Err(Error::DuplicateDocument)));

    // the failed insert left no partial row behind
    let stmt = SelectStmt::new("t", vec![ProjectedExpr::new(Expr::Wildcard)]);
    assert_eq!(select_json(&db, stmt).len(), 1);
}

#[test]
fn sequence_statements() {
    let db = db();
    db.exec(&Statement::CreateSequence {
        name: "s".to_string(),
    })
    .unwrap();

    let session = db.begin(true).unwrap();
    let seq = session.catalog().get_sequence("s").unwrap();
    assert_eq!(seq.next(session.transaction()).unwrap(), 1);
    assert_eq!(seq.next(session.transaction()).unwrap(), 2);
    session.commit().unwrap();

    db.exec(&Statement::DropSequence {
        name: "s".to_string(),
    })
    .unwrap();
    assert!(db.catalog().get_sequence("s").is_err());
}

#[test]
fn rename_table_and_add_constraint() {
    let db = db();
    create_table(&db, "t", TableInfo::new("t"));
    create_index(&db, "t", "a", "i");
    insert(&db, "t", &[r#"{"a":1}"#]);

    db.exec(&Statement::RenameTable {
        old: "t".to_string(),
        new: "u".to_string(),
    })
    .unwrap();

    db.exec(&Statement::AddFieldConstraint {
        table: "u".to_string(),
        constraint: FieldConstraint::new(Path::field("a")).with_type(ValueType::Integer),
    })
    .unwrap();

    let stmt = SelectStmt::new("u", vec![ProjectedExpr::new(Expr::Wildcard)]);
    assert_eq!(select_json(&db, stmt), vec![r#"{"a":1}"#]);
    assert_eq!(db.catalog().index_info("i").unwrap().table_name, "u");
}
