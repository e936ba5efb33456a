//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use outlay_core::db::Database;
use outlay_core::models::NewRecurringExpense;
use outlay_core::recurrence::{RecurrencePattern, Schedule};
use tower::ServiceExt;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn setup_test_app() -> (Router, Database) {
    let db = Database::in_memory().unwrap();
    let config = ServerConfig {
        require_auth: false,
        ..Default::default()
    };
    (create_router(db.clone(), config), db)
}

fn seed_monthly(db: &Database) -> i64 {
    db.create_recurring_expense(&NewRecurringExpense {
        item_name: "Rent".to_string(),
        category: Some("Housing".to_string()),
        total_amount: 1500.0,
        pattern: RecurrencePattern::new(
            date(2024, 1, 1),
            Schedule::MonthlyByDay { day_of_month: 1 },
        ),
    })
    .unwrap()
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn generate_q1(app: &Router) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/occurrences/generate",
            serde_json::json!({ "start": "2024-01-01", "end": "2024-03-31" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    get_body_json(response).await
}

// ========== Auth Tests ==========

#[tokio::test]
async fn test_auth_required_by_default() {
    let db = Database::in_memory().unwrap();
    let app = create_router(
        db,
        ServerConfig {
            api_keys: vec!["secret-key".to_string()],
            ..Default::default()
        },
    );

    let response = app
        .clone()
        .oneshot(get_request("/api/expenses/recurring"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/expenses/recurring")
                .header("authorization", "Bearer wrong-key!")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/expenses/recurring")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["abc".to_string(), "longer-key".to_string()];
    assert!(validate_api_key("abc", &keys));
    assert!(validate_api_key("longer-key", &keys));
    assert!(!validate_api_key("abd", &keys));
    assert!(!validate_api_key("", &keys));
    assert!(!validate_api_key("abc", &[]));
}

#[test]
fn test_get_user_email() {
    let mut headers = axum::http::HeaderMap::new();
    assert_eq!(get_user_email(&headers), "local-dev");

    headers.insert("authorization", "Bearer k".parse().unwrap());
    assert_eq!(get_user_email(&headers), "api-key");

    headers.insert("x-outlay-user", "alice@example.com".parse().unwrap());
    assert_eq!(get_user_email(&headers), "alice@example.com");
}

#[tokio::test]
async fn test_security_headers() {
    let (app, _db) = setup_test_app();
    let response = app.oneshot(get_request("/api/audit")).await.unwrap();

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}

// ========== Recurring Expense API Tests ==========

#[tokio::test]
async fn test_create_and_list_recurring_expense() {
    let (app, _db) = setup_test_app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/expenses/recurring",
            serde_json::json!({
                "item_name": "Gym",
                "total_amount": 45.0,
                "pattern": {
                    "frequency": "weekly",
                    "start_date": "2024-01-05",
                    "day_of_week": 5
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert!(json["id"].as_i64().unwrap() > 0);
    assert_eq!(json["description"], "weekly on Friday from 2024-01-05");

    let response = app
        .oneshot(get_request("/api/expenses/recurring"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let expenses = json.as_array().unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0]["item_name"], "Gym");
    assert_eq!(expenses[0]["pattern"]["day_of_week"], 5);
}

#[tokio::test]
async fn test_create_recurring_expense_invalid_pattern() {
    let (app, _db) = setup_test_app();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/expenses/recurring",
            serde_json::json!({
                "item_name": "Gym",
                "total_amount": 45.0,
                "pattern": { "frequency": "weekly", "start_date": "2024-01-05" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("day_of_week"));
}

#[tokio::test]
async fn test_update_pattern() {
    let (app, db) = setup_test_app();
    let id = seed_monthly(&db);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/expenses/{}/pattern", id),
            serde_json::json!({
                "frequency": "monthly",
                "start_date": "2024-01-01",
                "monthly_recurrence_type": "day_of_week",
                "week_of_month": 5,
                "day_of_week": 1
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["description"], "monthly on the last Monday from 2024-01-01");

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/expenses/9999/pattern",
            serde_json::json!({ "frequency": "daily", "start_date": "2024-01-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Occurrence API Tests ==========

#[tokio::test]
async fn test_generate_and_list_occurrences() {
    let (app, db) = setup_test_app();
    seed_monthly(&db);

    let json = generate_q1(&app).await;
    assert_eq!(json["generated"].as_array().unwrap().len(), 3);
    assert!(json["errors"].as_array().unwrap().is_empty());

    // Idempotent
    let json = generate_q1(&app).await;
    assert!(json["generated"].as_array().unwrap().is_empty());

    let response = app
        .oneshot(get_request(
            "/api/occurrences?start=2024-01-01&end=2024-03-31&status=pending",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    let occurrences = json.as_array().unwrap();
    assert_eq!(occurrences.len(), 3);
    assert_eq!(occurrences[0]["occurrence_date"], "2024-01-01");
    assert_eq!(occurrences[0]["status"], "pending");
}

#[tokio::test]
async fn test_list_occurrences_rejects_bad_params() {
    let (app, _db) = setup_test_app();

    let response = app
        .clone()
        .oneshot(get_request(
            "/api/occurrences?start=2024-01-01&end=2024-01-31&status=done",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get_request("/api/occurrences?start=2024-02-01&end=2024-01-01"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_complete_occurrence_twice() {
    let (app, db) = setup_test_app();
    seed_monthly(&db);
    let json = generate_q1(&app).await;
    let id = json["generated"][0]["id"].as_i64().unwrap();

    let uri = format!("/api/occurrences/{}/status", id);
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            serde_json::json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = get_body_json(response).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["status"], "completed");
    assert_eq!(first["expense_created"], true);
    let linked = first["linked_expense_id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            serde_json::json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    let second = get_body_json(response).await;
    assert_eq!(second["expense_created"], false);
    assert_eq!(second["linked_expense_id"].as_i64().unwrap(), linked);

    // The linked expense carries one full payment
    let response = app
        .oneshot(get_request(&format!("/api/expenses/{}", linked)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let expense = get_body_json(response).await;
    assert_eq!(expense["item_name"], "Rent");
    assert_eq!(expense["expense_date"], "2024-01-01");
    assert_eq!(expense["payments"].as_array().unwrap().len(), 1);
    assert_eq!(expense["payments"][0]["amount"], 1500.0);
}

#[tokio::test]
async fn test_skipped_occurrence_cannot_be_completed() {
    let (app, db) = setup_test_app();
    seed_monthly(&db);
    let json = generate_q1(&app).await;
    let id = json["generated"][1]["id"].as_i64().unwrap();
    let uri = format!("/api/occurrences/{}/status", id);

    let response = app
        .clone()
        .oneshot(json_request("POST", &uri, serde_json::json!({ "status": "skipped" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &uri,
            serde_json::json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("skipped"));

    let response = app
        .oneshot(json_request("POST", &uri, serde_json::json!({ "status": "paused" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_occurrence_is_404() {
    let (app, _db) = setup_test_app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/occurrences/9999/status",
            serde_json::json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_request("/api/occurrences/9999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Pattern API Tests ==========

#[tokio::test]
async fn test_validate_pattern_reports_all_errors() {
    let (app, _db) = setup_test_app();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/patterns/validate",
            serde_json::json!({
                "frequency": "monthly",
                "monthly_recurrence_type": "day_of_week"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["valid"], false);
    // start_date, week_of_month, day_of_week
    assert_eq!(json["errors"].as_array().unwrap().len(), 3);
    assert_eq!(json["errors"][0]["kind"], "missing_field");
}

#[tokio::test]
async fn test_preview_pattern() {
    let (app, _db) = setup_test_app();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/patterns/preview",
            serde_json::json!({
                "pattern": {
                    "frequency": "monthly",
                    "start_date": "2024-01-31",
                    "monthly_recurrence_type": "day_of_month",
                    "day_of_month": 31
                },
                "after": "2024-01-31",
                "count": 3
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(
        json["dates"],
        serde_json::json!(["2024-02-29", "2024-03-31", "2024-04-30"])
    );
}

// ========== Audit API Tests ==========

#[tokio::test]
async fn test_mutations_are_audited() {
    let (app, db) = setup_test_app();
    seed_monthly(&db);
    generate_q1(&app).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/audit?limit=10")
                .header("x-outlay-user", "alice@example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entries = db.list_audit_log(10).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.action == "generate" && e.user_email == "local-dev"));
    assert!(entries
        .iter()
        .any(|e| e.action == "list" && e.user_email == "alice@example.com"));
}
