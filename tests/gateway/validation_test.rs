#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{film_rows, FakeStore};
use sqlgate::gateway::{validate, GatewayError, RejectReason, SqlGateway};

fn gateway(store: &Arc<FakeStore>) -> SqlGateway {
    SqlGateway::new(store.clone(), 100)
}

#[test]
fn test_forbidden_verbs_in_any_case() {
    let queries = [
        "DROP TABLE film",
        "drop table film",
        "Delete FROM film",
        "insert into film (title) values ('x')",
        "UPDATE film SET title = 'x'",
        "TRUNCATE film",
        "ALTER TABLE film ADD COLUMN x int",
        "create table t (id int)",
        "GRANT SELECT ON film TO bob",
        "revoke select on film from bob",
    ];
    for query in queries {
        assert_eq!(
            validate(query),
            Err(RejectReason::ForbiddenOperation),
            "expected rejection for {query:?}"
        );
    }
}

#[test]
fn test_forbidden_verb_inside_select_rejected() {
    assert_eq!(
        validate("SELECT * FROM film WHERE title = 'drop'"),
        Err(RejectReason::ForbiddenOperation)
    );
    assert_eq!(
        validate("WITH gone AS (DELETE FROM film RETURNING *) SELECT * FROM gone"),
        Err(RejectReason::ForbiddenOperation)
    );
}

#[test]
fn test_identifiers_containing_verbs_accepted() {
    assert!(validate("SELECT created_at, last_update FROM film").is_ok());
    assert!(validate("SELECT update_count FROM stats").is_ok());
}

#[test]
fn test_non_select_openers_rejected() {
    for query in ["EXPLAIN SELECT 1", "SHOW search_path", "VACUUM", "COPY film TO STDOUT"] {
        assert_eq!(validate(query), Err(RejectReason::ForbiddenOperation), "{query}");
    }
}

#[test]
fn test_multiple_statements_rejected() {
    assert_eq!(validate("SELECT 1; SELECT 2"), Err(RejectReason::MultipleStatements));
    assert_eq!(
        validate("SELECT 1; DROP TABLE film;"),
        Err(RejectReason::MultipleStatements)
    );
}

#[test]
fn test_empty_queries_rejected() {
    assert_eq!(validate(""), Err(RejectReason::EmptyQuery));
    assert_eq!(validate("   \n\t"), Err(RejectReason::EmptyQuery));
    assert_eq!(validate(";"), Err(RejectReason::EmptyQuery));
}

#[test]
fn test_accepted_shapes() {
    assert_eq!(validate("SELECT 1;").unwrap().as_str(), "SELECT 1");
    assert!(validate("with x as (select 1) select * from x").is_ok());
    assert!(validate("(SELECT 1) UNION (SELECT 2)").is_ok());
}

#[test]
fn test_reason_codes() {
    assert_eq!(RejectReason::EmptyQuery.to_string(), "empty_query");
    assert_eq!(RejectReason::MultipleStatements.to_string(), "multiple_statements");
    assert_eq!(RejectReason::ForbiddenOperation.to_string(), "forbidden_operation");
    assert_eq!(
        serde_json::to_value(RejectReason::ForbiddenOperation).unwrap(),
        serde_json::json!("forbidden_operation")
    );
}

#[tokio::test]
async fn test_rejected_query_never_reaches_store() {
    let store = Arc::new(FakeStore::with_rows(film_rows(3)));
    let gateway = gateway(&store);

    let err = gateway.execute("DROP TABLE film", &[], None).await.unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::ForbiddenOperation));
    assert_eq!(err.to_string(), "query rejected: forbidden_operation");

    let err = gateway
        .execute("SELECT 1; SELECT 2", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(RejectReason::MultipleStatements)));

    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_store_receives_statement_without_separator() {
    let store = Arc::new(FakeStore::with_rows(film_rows(1)));
    gateway(&store)
        .execute("  SELECT title FROM film;  ", &[], None)
        .await
        .unwrap();

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sql, "SELECT title FROM film");
}
