//! End-to-end queries: SQL text through algebrizer, optimizer and the
//! iterator runtime against the in-memory store.

mod common;

use common::{cell, column_values, run, varchar};
use docsql_core::{DocsqlError, SqlValue};

// ── Selection and projection ──

#[test]
fn test_select_where() {
    let rows = run("SELECT name FROM users WHERE age > 30").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice"), varchar("carol")]);
}

#[test]
fn test_missing_field_is_null_and_filtered() {
    // dave has no age document field; NULL > 30 is NULL, so he never matches,
    // on either side of the comparison.
    let rows = run("SELECT name FROM users WHERE age <= 30").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("bob")]);
}

#[test]
fn test_projection_expressions() {
    let rows = run("SELECT name, age * 2 FROM users WHERE id = 1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(*cell(&rows[0], 0), varchar("alice"));
    assert_eq!(*cell(&rows[0], 1), SqlValue::Int(68));
}

#[test]
fn test_select_without_from() {
    let rows = run("SELECT 1 + 2, 'x'").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(*cell(&rows[0], 0), SqlValue::Int(3));
    assert_eq!(*cell(&rows[0], 1), varchar("x"));
}

#[test]
fn test_division_by_zero_is_null() {
    let rows = run("SELECT 10 / 0").unwrap();
    assert_eq!(*cell(&rows[0], 0), SqlValue::Null);
}

// ── Scalar functions and casts ──

#[test]
fn test_scalar_functions() {
    let rows = run("SELECT UPPER(name), LENGTH(name) FROM users WHERE id = 2").unwrap();
    assert_eq!(*cell(&rows[0], 0), varchar("BOB"));
    assert_eq!(*cell(&rows[0], 1), SqlValue::Int(3));
}

#[test]
fn test_coalesce() {
    let rows = run("SELECT COALESCE(age, 0) FROM users WHERE id = 4").unwrap();
    assert_eq!(*cell(&rows[0], 0), SqlValue::Int(0));
}

#[test]
fn test_cast() {
    let rows = run("SELECT CAST(age AS FLOAT), CAST(id AS VARCHAR) FROM users WHERE id = 1")
        .unwrap();
    assert_eq!(*cell(&rows[0], 0), SqlValue::Float(34.0));
    assert_eq!(*cell(&rows[0], 1), varchar("1"));
}

// ── Predicate forms ──

#[test]
fn test_between() {
    let rows = run("SELECT name FROM users WHERE age BETWEEN 30 AND 40").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice")]);
}

#[test]
fn test_in_list() {
    let rows = run("SELECT name FROM users WHERE city IN ('Oslo')").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice"), varchar("carol")]);
}

#[test]
fn test_is_null() {
    let rows = run("SELECT name FROM users WHERE age IS NULL").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("dave")]);
    let rows = run("SELECT name FROM users WHERE age IS NOT NULL").unwrap();
    assert_eq!(rows.len(), 3);
}

// ── Ordering and limits ──

#[test]
fn test_order_by_desc_limit() {
    let rows = run("SELECT name, age FROM users ORDER BY age DESC LIMIT 2").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("carol"), varchar("alice")]);
}

#[test]
fn test_limit_offset() {
    let rows = run("SELECT name FROM users ORDER BY id LIMIT 2 OFFSET 1").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("bob"), varchar("carol")]);
}

#[test]
fn test_order_by_select_alias() {
    let rows = run("SELECT name, age * 2 AS doubled FROM users \
                    WHERE age IS NOT NULL ORDER BY doubled")
        .unwrap();
    assert_eq!(
        column_values(&rows, 0),
        vec![varchar("bob"), varchar("alice"), varchar("carol")]
    );
}

// ── Grouping ──

#[test]
fn test_group_by_with_aggregates() {
    let rows = run("SELECT city, COUNT(*), AVG(age) FROM users GROUP BY city").unwrap();
    assert_eq!(rows.len(), 2);
    // First-seen group order.
    assert_eq!(*cell(&rows[0], 0), varchar("Oslo"));
    assert_eq!(*cell(&rows[0], 1), SqlValue::Int(2));
    assert_eq!(*cell(&rows[0], 2), SqlValue::Float(39.5));
    assert_eq!(*cell(&rows[1], 0), varchar("Paris"));
    assert_eq!(*cell(&rows[1], 1), SqlValue::Int(2));
    // dave's NULL age is skipped by the aggregate.
    assert_eq!(*cell(&rows[1], 2), SqlValue::Float(19.0));
}

#[test]
fn test_having() {
    let rows = run("SELECT city, COUNT(*) FROM users GROUP BY city HAVING AVG(age) > 30")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(*cell(&rows[0], 0), varchar("Oslo"));
    // The hidden HAVING column is trimmed from the output.
    assert_eq!(rows[0].values.len(), 2);
}

#[test]
fn test_aggregate_over_empty_input() {
    let rows = run("SELECT COUNT(*), MAX(age) FROM users WHERE id = 99").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(*cell(&rows[0], 0), SqlValue::Int(0));
    assert_eq!(*cell(&rows[0], 1), SqlValue::Null);
}

#[test]
fn test_count_distinct() {
    let rows = run("SELECT COUNT(DISTINCT city) FROM users").unwrap();
    assert_eq!(*cell(&rows[0], 0), SqlValue::Int(2));
}

// ── Joins ──

#[test]
fn test_inner_join() {
    let rows = run(
        "SELECT u.name, o.item FROM users u \
         JOIN orders o ON u.id = o.user_id ORDER BY o.id",
    )
    .unwrap();
    assert_eq!(
        column_values(&rows, 1),
        vec![varchar("book"), varchar("pen"), varchar("mug")]
    );
}

#[test]
fn test_left_join_pads_unmatched() {
    let rows = run(
        "SELECT u.name, o.item FROM users u \
         LEFT JOIN orders o ON u.id = o.user_id ORDER BY u.id",
    )
    .unwrap();
    assert_eq!(rows.len(), 5);
    let bob = rows.iter().find(|r| *cell(r, 0) == varchar("bob")).unwrap();
    assert_eq!(*cell(bob, 1), SqlValue::Null);
}

#[test]
fn test_right_join_pads_unmatched() {
    let rows = run(
        "SELECT u.name, o.item FROM users u \
         RIGHT JOIN orders o ON u.id = o.user_id",
    )
    .unwrap();
    assert_eq!(rows.len(), 4);
    let ghost = rows
        .iter()
        .find(|r| *cell(r, 1) == varchar("ghost"))
        .unwrap();
    assert_eq!(*cell(ghost, 0), SqlValue::Null);
}

#[test]
fn test_comma_list_promotes_to_inner_join() {
    let rows = run(
        "SELECT u.name FROM users u, orders o \
         WHERE u.id = o.user_id AND o.total > 5",
    )
    .unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice"), varchar("carol")]);
}

#[test]
fn test_natural_join_refused_at_execution() {
    assert!(matches!(
        run("SELECT u.name FROM users u NATURAL JOIN orders o"),
        Err(DocsqlError::Unsupported(_))
    ));
}

// ── Subqueries ──

#[test]
fn test_in_subquery() {
    let rows = run("SELECT name FROM users WHERE id IN (SELECT user_id FROM orders)").unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice"), varchar("carol")]);
}

#[test]
fn test_correlated_exists() {
    let rows = run(
        "SELECT name FROM users u WHERE EXISTS \
         (SELECT o.id FROM orders o WHERE o.user_id = u.id AND o.total > 5)",
    )
    .unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice"), varchar("carol")]);
}

#[test]
fn test_correlated_scalar_subquery_in_select() {
    let rows = run(
        "SELECT name, (SELECT COUNT(*) FROM orders o WHERE o.user_id = u.id) \
         FROM users u ORDER BY u.id",
    )
    .unwrap();
    assert_eq!(
        column_values(&rows, 1),
        vec![
            SqlValue::Int(2),
            SqlValue::Int(0),
            SqlValue::Int(1),
            SqlValue::Int(0),
        ]
    );
}

#[test]
fn test_derived_table() {
    let rows = run(
        "SELECT d.name FROM (SELECT name, age FROM users WHERE age > 30) d \
         WHERE d.age < 40",
    )
    .unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("alice")]);
}

// ── Virtual schema tables ──

#[test]
fn test_information_schema_tables() {
    let rows = run(
        "SELECT table_name FROM information_schema.tables ORDER BY table_name",
    )
    .unwrap();
    assert_eq!(column_values(&rows, 0), vec![varchar("orders"), varchar("users")]);
}

#[test]
fn test_information_schema_columns() {
    let rows = run(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_name = 'orders' ORDER BY ordinal_position",
    )
    .unwrap();
    assert_eq!(
        column_values(&rows, 0),
        vec![varchar("id"), varchar("user_id"), varchar("total"), varchar("item")]
    );
    assert_eq!(*cell(&rows[2], 1), varchar("float"));
}

// ── Planning-time errors ──

#[test]
fn test_unknown_column() {
    assert!(matches!(
        run("SELECT nope FROM users"),
        Err(DocsqlError::UnknownColumn(_))
    ));
}

#[test]
fn test_ambiguous_column() {
    assert!(matches!(
        run("SELECT id FROM users u, orders o"),
        Err(DocsqlError::AmbiguousColumn(_))
    ));
}

#[test]
fn test_unknown_table() {
    assert!(matches!(
        run("SELECT x FROM missing"),
        Err(DocsqlError::UnknownTable { .. })
    ));
}
