#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{film_rows, row, FakeStore};
use serde_json::{json, Value};
use sqlgate::server::{serve, serve_bounded, ServeStats, ToolRouter, REVIEW_NOTE};
use sqlgate::transport::{Request, Response};
use tokio::io::BufReader;

/// Feed `input` through `serve` and return the output text.
async fn run(router: &ToolRouter, input: &str) -> (String, ServeStats) {
    let mut output = Vec::new();
    let stats = serve(BufReader::new(input.as_bytes()), &mut output, router)
        .await
        .unwrap();
    (String::from_utf8(output).unwrap(), stats)
}

fn responses(output: &str) -> Vec<Value> {
    output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn table_router() -> ToolRouter {
    let store = FakeStore::with_rows(vec![
        row(json!({ "table_name": "actor" })),
        row(json!({ "table_name": "film" })),
    ]);
    ToolRouter::new(Arc::new(store), 100)
}

#[tokio::test]
async fn test_one_response_per_request_in_order() {
    let router = table_router();
    let input = concat!(
        r#"{"id":1,"method":"list_tables"}"#,
        "\n\n",
        r#"{"id":"two","method":"drop_everything"}"#,
        "\n",
        r#"{"id":3,"method":"execute_sql","params":{"query":"DROP TABLE film"}}"#,
        "\n",
        r#"{"id":4,"method":"execute_sql","params":{}}"#,
        "\n",
    );

    let (output, stats) = run(&router, input).await;

    insta::assert_snapshot!(output.trim_end(), @r###"
    {"id":1,"result":{"tables":["actor","film"]}}
    {"id":"two","error":"unknown method: drop_everything"}
    {"id":3,"error":"query rejected: forbidden_operation"}
    {"id":4,"error":"invalid params: missing field `query`"}
    "###);
    assert_eq!(stats, ServeStats { requests: 4, errors: 3 });
}

#[tokio::test]
async fn test_invalid_request_line() {
    let router = table_router();
    let (output, stats) = run(&router, "not json\n{\"method\":\"list_tables\"}\n").await;

    let lines = responses(&output);
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line["id"], Value::Null);
        assert!(line["error"].as_str().unwrap().starts_with("invalid request: "));
        assert!(line.get("result").is_none());
    }
    assert_eq!(stats.errors, 2);
}

#[tokio::test]
async fn test_non_utf8_line_does_not_stop_the_loop() {
    let router = table_router();
    let input: &[u8] = b"\xff\xfe\n{\"id\":2,\"method\":\"list_tables\"}\n";
    let mut output = Vec::new();
    let stats = serve(BufReader::new(input), &mut output, &router).await.unwrap();

    let lines = responses(&String::from_utf8(output).unwrap());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], Value::Null);
    assert!(lines[0]["error"].as_str().unwrap().starts_with("invalid request: "));
    assert_eq!(lines[1], json!({ "id": 2, "result": { "tables": ["actor", "film"] } }));
    assert_eq!(stats, ServeStats { requests: 2, errors: 1 });
}

#[tokio::test]
async fn test_oversized_line_is_rejected_and_skipped() {
    let router = table_router();
    let input = format!(
        "{{\"id\":1,\"method\":\"list_tables\",\"params\":{{\"pad\":\"{}\"}}}}\n{}\n",
        "x".repeat(500),
        r#"{"id":2,"method":"list_tables"}"#,
    );
    let mut output = Vec::new();
    serve_bounded(BufReader::new(input.as_bytes()), &mut output, &router, 64)
        .await
        .unwrap();

    let lines = responses(&String::from_utf8(output).unwrap());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({ "id": null, "error": "invalid request: line exceeds 64 bytes" }));
    assert_eq!(lines[1]["id"], json!(2));
    assert!(lines[1].get("result").is_some());
}

#[tokio::test]
async fn test_line_at_the_limit_is_accepted() {
    let router = table_router();
    let request = r#"{"id":3,"method":"list_tables"}"#;
    let input = format!("{request}\n");
    let mut output = Vec::new();
    serve_bounded(BufReader::new(input.as_bytes()), &mut output, &router, request.len())
        .await
        .unwrap();

    let lines = responses(&String::from_utf8(output).unwrap());
    assert_eq!(lines, vec![json!({ "id": 3, "result": { "tables": ["actor", "film"] } })]);
}

#[tokio::test]
async fn test_empty_input() {
    let (output, stats) = run(&table_router(), "").await;
    assert!(output.is_empty());
    assert_eq!(stats, ServeStats::default());
}

#[tokio::test]
async fn test_get_table_schema_over_the_wire() {
    let store = FakeStore::with_rows(vec![row(
        json!({ "table_name": "film", "column_name": "title", "data_type": "text" }),
    )]);
    let router = ToolRouter::new(Arc::new(store), 100);

    let (output, _) = run(
        &router,
        "{\"id\":9,\"method\":\"get_table_schema\",\"params\":{\"table_names\":[\"film\"]}}\n",
    )
    .await;

    assert_eq!(
        responses(&output),
        vec![json!({
            "id": 9,
            "result": { "schema_rows": [{ "table": "film", "column": "title", "type": "text" }] },
        })]
    );
}

#[tokio::test]
async fn test_sql_alias_and_row_cap_over_the_wire() {
    let router = table_router();
    let (output, _) = run(
        &router,
        "{\"id\":{\"n\":5},\"method\":\"run_pagila_query\",\"params\":{\"sql\":\"SELECT table_name FROM t\",\"max_rows\":1}}\n",
    )
    .await;

    assert_eq!(
        responses(&output),
        vec![json!({
            "id": { "n": 5 },
            "result": {
                "rows": [{ "table_name": "actor" }],
                "truncated": true,
                "note": "Result truncated to 1 rows (row cap 1)",
            },
        })]
    );
}

#[tokio::test]
async fn test_text_to_sql_executes_when_confident() {
    let store = Arc::new(FakeStore::with_rows(film_rows(2)));
    let router = ToolRouter::new(store.clone(), 100);

    let request = Request::new(
        7,
        "text_to_sql",
        json!({ "text": "Show film titles from 2010 limit 3", "execute": true }),
    );
    let result = router.dispatch(request).await.into_result().unwrap();

    assert_eq!(
        result,
        json!({
            "sql": "SELECT title FROM film WHERE release_year = $1 LIMIT 3",
            "params": [2010],
            "confident": true,
            "rows": [{ "title": "Film 1" }, { "title": "Film 2" }],
        })
    );
    assert_eq!(store.calls()[0].params, vec![json!(2010)]);
}

#[tokio::test]
async fn test_text_to_sql_without_execute_touches_nothing() {
    let store = Arc::new(FakeStore::with_rows(film_rows(2)));
    let router = ToolRouter::new(store.clone(), 100);

    let request = Request::new(1, "text_to_sql", json!({ "text": "top 10 actors" }));
    let result = router.dispatch(request).await.into_result().unwrap();

    assert_eq!(result["sql"], json!("SELECT first_name, last_name FROM actor LIMIT 10"));
    assert!(result.get("rows").is_none());
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_text_to_sql_not_confident_is_not_executed() {
    let store = Arc::new(FakeStore::with_rows(film_rows(2)));
    let router = ToolRouter::new(store.clone(), 100);

    let request = Request::new(
        1,
        "text_to_sql",
        json!({ "text": "how is the weather", "execute": true }),
    );
    let result = router.dispatch(request).await.into_result().unwrap();

    assert_eq!(result["confident"], json!(false));
    assert!(result.get("rows").is_none());
    assert!(result["note"].as_str().unwrap().starts_with(REVIEW_NOTE));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_text_to_sql_unknown_provider() {
    let router = table_router();
    let request = Request::new(
        1,
        "text_to_sql",
        json!({ "text": "top 10 actors", "provider": "oracle" }),
    );
    let response = router.dispatch(request).await;
    assert_eq!(response, Response::err(json!(1), "unknown provider: oracle"));
}

#[tokio::test]
async fn test_execution_failure_becomes_error_response() {
    let router = ToolRouter::new(Arc::new(FakeStore::failing("permission denied")), 100);
    let request = Request::new("q", "execute_sql", json!({ "query": "SELECT 1" }));
    let response = router.dispatch(request).await;
    assert_eq!(response, Response::err(json!("q"), "query failed: permission denied"));
}
