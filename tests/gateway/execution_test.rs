#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{film_rows, row, FakeStore};
use serde_json::json;
use sqlgate::gateway::{ExecutionResult, GatewayError, SqlGateway};
use sqlgate::schema::SchemaIntrospector;
use sqlgate::transport::protocol::SchemaRow;

// ============================================================================
// Row cap
// ============================================================================

#[tokio::test]
async fn test_cap_truncates_and_notes() {
    let store = Arc::new(FakeStore::with_rows(film_rows(5)));
    let gateway = SqlGateway::new(store.clone(), 100);

    let result = gateway
        .execute("SELECT title FROM film LIMIT 5", &[], Some(2))
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["title"], json!("Film 1"));
    assert_eq!(result.rows[1]["title"], json!("Film 2"));
    assert!(result.truncated);
    assert_eq!(result.note.as_deref(), Some("Result truncated to 2 rows (row cap 2)"));

    // One extra row is enough to detect truncation.
    assert_eq!(store.calls()[0].limit, 3);
}

#[tokio::test]
async fn test_result_within_cap_has_no_note() {
    let store = Arc::new(FakeStore::with_rows(film_rows(3)));
    let gateway = SqlGateway::new(store, 3);

    let result = gateway.execute("SELECT title FROM film", &[], None).await.unwrap();
    assert_eq!(result.rows.len(), 3);
    assert!(!result.truncated);
    assert!(result.note.is_none());
}

#[tokio::test]
async fn test_default_cap_applies() {
    let store = Arc::new(FakeStore::with_rows(film_rows(10)));
    let gateway = SqlGateway::new(store, 4);
    assert_eq!(gateway.default_max_rows(), 4);

    let result = gateway.execute("SELECT title FROM film", &[], None).await.unwrap();
    assert_eq!(result.rows.len(), 4);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_zero_cap_is_one() {
    let store = Arc::new(FakeStore::with_rows(film_rows(2)));
    let gateway = SqlGateway::new(store, 0);
    assert_eq!(gateway.default_max_rows(), 1);

    let result = gateway.execute("SELECT title FROM film", &[], Some(0)).await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_empty_result() {
    let store = Arc::new(FakeStore::with_rows(Vec::new()));
    let result = SqlGateway::new(store, 10)
        .execute("SELECT title FROM film WHERE false", &[], None)
        .await
        .unwrap();
    assert_eq!(result, ExecutionResult::capped(Vec::new(), 10));
    assert_eq!(serde_json::to_value(&result).unwrap(), json!({ "rows": [] }));
}

#[tokio::test]
async fn test_params_forwarded() {
    let store = Arc::new(FakeStore::with_rows(film_rows(1)));
    SqlGateway::new(store.clone(), 10)
        .execute(
            "SELECT title FROM film WHERE release_year = $1",
            &[json!(2006)],
            None,
        )
        .await
        .unwrap();
    assert_eq!(store.calls()[0].params, vec![json!(2006)]);
}

#[tokio::test]
async fn test_store_failure_is_execution_error() {
    let store = Arc::new(FakeStore::failing("relation \"flim\" does not exist"));
    let err = SqlGateway::new(store, 10)
        .execute("SELECT * FROM flim", &[], None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Execution(_)));
    assert!(err.reject_reason().is_none());
    assert_eq!(err.to_string(), "query failed: relation \"flim\" does not exist");
}

// ============================================================================
// Schema introspection
// ============================================================================

#[tokio::test]
async fn test_list_tables_sorted_and_deduplicated() {
    let store = Arc::new(FakeStore::with_rows(vec![
        row(json!({ "table_name": "film" })),
        row(json!({ "table_name": "actor" })),
        row(json!({ "table_name": "film" })),
    ]));
    let tables = SchemaIntrospector::new(store.clone()).list_tables().await.unwrap();
    assert_eq!(tables.into_iter().collect::<Vec<_>>(), vec!["actor", "film"]);
    assert_eq!(store.calls()[0].limit, usize::MAX);
}

#[tokio::test]
async fn test_table_schema_rows() {
    let store = Arc::new(FakeStore::with_rows(vec![
        row(json!({ "table_name": "film", "column_name": "film_id", "data_type": "integer" })),
        row(json!({ "table_name": "film", "column_name": "title", "data_type": "text" })),
    ]));
    let introspector = SchemaIntrospector::new(store.clone());

    let rows = introspector
        .get_table_schema(&["film".to_string(), "nope".to_string()])
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            SchemaRow {
                table: "film".into(),
                column: "film_id".into(),
                data_type: "integer".into(),
            },
            SchemaRow {
                table: "film".into(),
                column: "title".into(),
                data_type: "text".into(),
            },
        ]
    );
    assert_eq!(store.calls()[0].params, vec![json!(["film", "nope"])]);
}

#[tokio::test]
async fn test_table_schema_empty_request_skips_store() {
    let store = Arc::new(FakeStore::with_rows(Vec::new()));
    let rows = SchemaIntrospector::new(store.clone())
        .get_table_schema(&[])
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_introspection_failure() {
    let store = Arc::new(FakeStore::failing("connection refused"));
    let err = SchemaIntrospector::new(store).list_tables().await.unwrap_err();
    assert!(matches!(err, GatewayError::Execution(_)));
}
