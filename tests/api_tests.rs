//! Integration tests for the HTTP API, driven through the real router.

#![cfg(feature = "sqlite")]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use rto::config::{AuthConfig, RtoConfig};
use rto::server::auth::{hash_password, Role};
use rto::server::database::{Database, User};
use rto::server::handlers::AppState;
use rto::server::routes::build_router;
use serde_json::{json, Value};
use serial_test::serial;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

const PASSWORD: &str = "correct-horse-battery";

struct TestApp {
    router: Router,
    state: AppState,
}

impl TestApp {
    fn today(&self) -> NaiveDate {
        self.state.today()
    }
}

/// Helper to create app state over an in-memory database with an admin and
/// two desk users.
async fn setup_test_app() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    let db = Arc::new(Database::SQLite(pool));
    db.run_migrations().await.expect("migrations failed");

    for (username, role) in [("admin", Role::Admin), ("clerk", Role::User), ("other", Role::User)] {
        let user = User {
            id: format!("id-{username}"),
            username: username.to_string(),
            password_hash: hash_password(PASSWORD.to_string(), 4).await.unwrap(),
            role: role.as_str().to_string(),
            created_at: Utc::now().naive_utc(),
        };
        db.create_user(&user).await.unwrap();
    }

    let config = RtoConfig {
        auth: AuthConfig {
            jwt_secret: "api-test-secret".to_string(),
            bcrypt_cost: 4,
            ..Default::default()
        },
        ..Default::default()
    };
    let state = AppState::new(db, &config).expect("state");

    TestApp {
        router: build_router(state.clone()),
        state,
    }
}

/// Helper to make a JSON request, optionally with a session cookie.
async fn request(
    app: &TestApp,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, _, body) = raw_request(app, method, uri, cookie, body).await;
    (status, body)
}

async fn raw_request(
    app: &TestApp,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let body_bytes = body
        .map(|v| serde_json::to_vec(&v).unwrap())
        .unwrap_or_default();

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = builder.body(Body::from(body_bytes)).unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));

    (status, headers, body)
}

/// Log in and return the `name=value` cookie pair.
async fn login(app: &TestApp, username: &str) -> String {
    let (status, headers, _) = raw_request(
        app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": username, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("login should set a cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn display(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

async fn create_puc(app: &TestApp, cookie: &str, vehicle: &str, valid_to: NaiveDate) -> Value {
    let (status, body) = request(
        app,
        "POST",
        "/api/v1/documents/puc",
        Some(cookie),
        Some(json!({
            "vehicle_number": vehicle,
            "valid_from": display(valid_to - Duration::days(180)),
            "valid_to": display(valid_to),
            "total_fee": 400,
            "paid": 100,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn health_is_public() {
    let app = setup_test_app().await;
    let (status, body) = request(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["db_type"], "sqlite");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = setup_test_app().await;
    let (_, headers, _) = raw_request(&app, "GET", "/health", None, None).await;
    assert!(headers.get("x-request-id").is_some());
}

#[tokio::test]
async fn login_sets_http_only_cookie() {
    let app = setup_test_app().await;
    let (status, headers, body) = raw_request(
        &app,
        "POST",
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": "clerk", "password": PASSWORD })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "clerk");
    assert!(body["user"].get("password_hash").is_none());
    let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("rto_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let app = setup_test_app().await;
    for (username, password) in [("clerk", "not-the-password"), ("ghost", PASSWORD)] {
        let (status, body) = request(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");
    }
}

#[tokio::test]
async fn protected_routes_need_a_session() {
    let app = setup_test_app().await;
    let (status, body) = request(&app, "GET", "/api/v1/documents/puc", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]["code"].is_string());

    let (status, _) = request(
        &app,
        "GET",
        "/api/v1/auth/me",
        Some("rto_session=not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_and_logout() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, body) = request(&app, "GET", "/api/v1/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "clerk");
    assert_eq!(body["role"], "user");

    let (status, headers, _) =
        raw_request(&app, "POST", "/api/v1/auth/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let cleared = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    let token = cookie.trim_start_matches("rto_session=").to_string();

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_document_derives_status_and_balance() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let body = create_puc(&app, &cookie, "mh 12 ab 1234", app.today() + Duration::days(5)).await;

    assert_eq!(body["kind"], "puc");
    assert_eq!(body["vehicle_number"], "MH12AB1234");
    assert_eq!(body["status"], "expiring_soon");
    assert_eq!(body["balance"], 300);
    assert_eq!(body["owner_id"], "id-clerk");
    assert_eq!(body["renewed"], false);
}

#[tokio::test]
async fn validation_errors_are_collected() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/documents/insurance",
        Some(&cookie),
        Some(json!({
            "vehicle_number": "??",
            "valid_from": "31-02-2025",
            "valid_to": "not-a-date",
            "total_fee": 100,
            "paid": 200,
            "mobile": "12345",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
    let fields: Vec<&str> = body["error"]["details"]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    for field in ["vehicle_number", "valid_from", "valid_to", "paid", "mobile"] {
        assert!(fields.contains(&field), "missing {field} in {fields:?}");
    }
}

#[tokio::test]
async fn validity_must_not_end_before_it_starts() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/documents/tax",
        Some(&cookie),
        Some(json!({
            "vehicle_number": "MH12AB1234",
            "valid_from": "10-01-2025",
            "valid_to": "01-01-2025",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"]["errors"][0]["field"], "valid_to");
}

#[tokio::test]
async fn unknown_kind_is_rejected() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, body) =
        request(&app, "GET", "/api/v1/documents/driving-licence", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UNKNOWN_KIND");
}

#[tokio::test]
async fn users_only_see_their_own_documents() {
    let app = setup_test_app().await;
    let clerk = login(&app, "clerk").await;
    let other = login(&app, "other").await;
    let admin = login(&app, "admin").await;

    let doc = create_puc(&app, &clerk, "MH12AB1234", app.today() + Duration::days(60)).await;
    create_puc(&app, &other, "KA01XY9999", app.today() + Duration::days(60)).await;
    let uri = format!("/api/v1/documents/puc/{}", doc["id"].as_str().unwrap());

    let (status, _) = request(&app, "GET", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&app, "DELETE", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = request(&app, "GET", "/api/v1/documents/puc", Some(&other), None).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["vehicle_number"], "KA01XY9999");

    // owner_id is ignored for non-admins
    let (_, body) = request(
        &app,
        "GET",
        "/api/v1/documents/puc?owner_id=id-clerk",
        Some(&other),
        None,
    )
    .await;
    assert_eq!(body["total"], 1);

    let (_, body) = request(&app, "GET", "/api/v1/documents/puc", Some(&admin), None).await;
    assert_eq!(body["total"], 2);
    let (_, body) = request(
        &app,
        "GET",
        "/api/v1/documents/puc?owner_id=id-clerk",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(body["total"], 1);

    let (status, _) = request(&app, "GET", &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn list_filters_by_status() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    let today = app.today();

    create_puc(&app, &cookie, "MH12AB0001", today - Duration::days(3)).await;
    create_puc(&app, &cookie, "MH12AB0002", today + Duration::days(15)).await;
    create_puc(&app, &cookie, "MH12AB0003", today + Duration::days(16)).await;

    for (status, expected) in [("expired", 1), ("expiring_soon", 1), ("active", 1)] {
        let (code, body) = request(
            &app,
            "GET",
            &format!("/api/v1/documents/puc?status={status}"),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["total"], expected, "{status}");
        assert_eq!(body["items"][0]["status"], status);
    }

    for label in ["lapsed", "unknown"] {
        let (code, body) = request(
            &app,
            "GET",
            &format!("/api/v1/documents/puc?status={label}"),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST, "{label}");
        assert_eq!(body["error"]["details"]["errors"][0]["field"], "status");
    }

    let (_, body) = request(
        &app,
        "GET",
        "/api/v1/documents/puc?needs_renewal=true",
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn update_recomputes_status() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    let doc = create_puc(&app, &cookie, "MH12AB1234", app.today() + Duration::days(90)).await;
    let uri = format!("/api/v1/documents/puc/{}", doc["id"].as_str().unwrap());

    let (status, body) = request(
        &app,
        "PATCH",
        &uri,
        Some(&cookie),
        Some(json!({
            "valid_to": display(app.today() - Duration::days(1)),
            "paid": 400,
            "remarks": "lapsed, customer informed",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "expired");
    assert_eq!(body["balance"], 0);
    assert_eq!(body["remarks"], "lapsed, customer informed");

    let (status, body) = request(
        &app,
        "PATCH",
        &uri,
        Some(&cookie),
        Some(json!({ "paid": 500 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"]["errors"][0]["field"], "paid");
}

#[tokio::test]
async fn delete_document() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    let doc = create_puc(&app, &cookie, "MH12AB1234", app.today()).await;
    let uri = format!("/api/v1/documents/puc/{}", doc["id"].as_str().unwrap());

    let (status, _) = request(&app, "DELETE", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(&app, "GET", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn renew_creates_successor_once() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    let doc = create_puc(&app, &cookie, "MH12AB1234", app.today() + Duration::days(2)).await;
    let id = doc["id"].as_str().unwrap();
    let renew_uri = format!("/api/v1/documents/puc/{id}/renew");
    let new_end = display(app.today() + Duration::days(182));

    let (status, successor) = request(
        &app,
        "POST",
        &renew_uri,
        Some(&cookie),
        Some(json!({ "valid_to": new_end, "total_fee": 400, "paid": 400 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{successor}");
    assert_ne!(successor["id"], doc["id"]);
    assert_eq!(successor["vehicle_number"], "MH12AB1234");
    assert_eq!(successor["status"], "active");
    assert_eq!(successor["valid_from"], app.today().to_string());

    let (_, previous) = request(
        &app,
        "GET",
        &format!("/api/v1/documents/puc/{id}"),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(previous["renewed"], true);
    assert_eq!(previous["renewed_by"], successor["id"]);

    let (status, body) = request(
        &app,
        "POST",
        &renew_uri,
        Some(&cookie),
        Some(json!({ "valid_to": new_end })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (_, list) = request(
        &app,
        "GET",
        "/api/v1/documents/puc?include_renewed=false",
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["id"], successor["id"]);
}

#[tokio::test]
async fn classify_endpoint() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, body) = request(
        &app,
        "GET",
        "/api/v1/lifecycle/classify?valid_to=not-a-date",
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unknown");
    assert!(body["parsed"].is_null());

    let soon = display(app.today() + Duration::days(20));
    let (_, puc) = request(
        &app,
        "GET",
        &format!("/api/v1/lifecycle/classify?valid_to={soon}&kind=puc"),
        Some(&cookie),
        None,
    )
    .await;
    let (_, insurance) = request(
        &app,
        "GET",
        &format!("/api/v1/lifecycle/classify?valid_to={soon}&kind=insurance"),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(puc["status"], "active");
    assert_eq!(insurance["status"], "expiring_soon");
    assert_eq!(insurance["window_days"], 30);
}

#[tokio::test]
async fn statistics_per_kind() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    create_puc(&app, &cookie, "MH12AB0001", app.today() - Duration::days(1)).await;
    create_puc(&app, &cookie, "MH12AB0002", app.today() + Duration::days(100)).await;

    let (status, body) = request(&app, "GET", "/api/v1/statistics/puc", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "puc");
    assert_eq!(body["total"], 2);
    assert_eq!(body["expired"], 1);
    assert_eq!(body["active"], 1);
    assert_eq!(body["needs_renewal"], 1);
    assert_eq!(body["pending_balance"], 600);

    let (status, body) = request(&app, "GET", "/api/v1/statistics", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"].as_array().unwrap().len(), 7);
    assert_eq!(body["transfers"]["total"], 0);
}

#[tokio::test]
async fn vehicles_and_their_documents() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, vehicle) = request(
        &app,
        "POST",
        "/api/v1/vehicles",
        Some(&cookie),
        Some(json!({
            "vehicle_number": "mh12ab1234",
            "owner_name": "Ravi Kumar",
            "mobile": "+91 98765 43210",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{vehicle}");
    assert_eq!(vehicle["vehicle_number"], "MH12AB1234");
    assert_eq!(vehicle["mobile"], "9876543210");

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/vehicles",
        Some(&cookie),
        Some(json!({ "vehicle_number": "MH12AB1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("MH12AB1234"));

    create_puc(&app, &cookie, "MH12AB1234", app.today() + Duration::days(40)).await;

    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/v1/vehicles/{}/documents", vehicle["id"].as_str().unwrap()),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vehicle"]["id"], vehicle["id"]);
    assert_eq!(body["documents"]["puc"].as_array().unwrap().len(), 1);
    assert_eq!(body["documents"]["insurance"].as_array().unwrap().len(), 0);

    let (_, list) = request(&app, "GET", "/api/v1/vehicles?search=ravi", Some(&cookie), None).await;
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn transfers_crud() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;

    let (status, transfer) = request(
        &app,
        "POST",
        "/api/v1/transfers",
        Some(&cookie),
        Some(json!({
            "vehicle_number": "MH12AB1234",
            "seller_name": "Ravi Kumar",
            "buyer_name": "Anita Desai",
            "transfer_date": "15-01-2025",
            "total_fee": 2500,
            "paid": 1000,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{transfer}");
    assert_eq!(transfer["balance"], 1500);
    assert_eq!(transfer["transfer_date"], "2025-01-15");
    let uri = format!("/api/v1/transfers/{}", transfer["id"].as_str().unwrap());

    let (status, updated) = request(
        &app,
        "PATCH",
        &uri,
        Some(&cookie),
        Some(json!({ "paid": 2500 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["balance"], 0);

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/transfers",
        Some(&cookie),
        Some(json!({
            "vehicle_number": "MH12AB1234",
            "seller_name": " ",
            "buyer_name": "Anita Desai",
            "transfer_date": "yesterday",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"]["errors"].as_array().unwrap().len(), 2);

    let other = login(&app, "other").await;
    let (status, _) = request(&app, "GET", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&app, "DELETE", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn user_admin_requires_admin() {
    let app = setup_test_app().await;
    let clerk = login(&app, "clerk").await;
    let admin = login(&app, "admin").await;

    let (status, body) = request(&app, "GET", "/api/v1/users", Some(&clerk), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, created) = request(
        &app,
        "POST",
        "/api/v1/users",
        Some(&admin),
        Some(json!({ "username": "newdesk", "password": "another-long-one" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["role"], "user");

    let (status, _) = request(
        &app,
        "POST",
        "/api/v1/users",
        Some(&admin),
        Some(json!({ "username": "newdesk", "password": "another-long-one" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = request(&app, "GET", "/api/v1/users", Some(&admin), None).await;
    assert_eq!(body["users"].as_array().unwrap().len(), 4);

    let newdesk = login(&app, "newdesk").await;
    let (status, _) = request(&app, "GET", "/api/v1/auth/me", Some(&newdesk), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_files_for_another_user() {
    let app = setup_test_app().await;
    let admin = login(&app, "admin").await;
    let valid_to = display(app.today() + Duration::days(100));

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/documents/fitness",
        Some(&admin),
        Some(json!({
            "vehicle_number": "MH12AB1234",
            "valid_from": "01-01-2025",
            "valid_to": valid_to,
            "owner_id": "id-clerk",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["owner_id"], "id-clerk");

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/documents/fitness",
        Some(&admin),
        Some(json!({
            "vehicle_number": "MH12AB1234",
            "valid_from": "01-01-2025",
            "valid_to": valid_to,
            "owner_id": "id-nobody",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"]["errors"][0]["field"], "owner_id");
}

#[tokio::test]
async fn export_groups_by_kind_or_user() {
    let app = setup_test_app().await;
    let clerk = login(&app, "clerk").await;
    let admin = login(&app, "admin").await;
    create_puc(&app, &clerk, "MH12AB1234", app.today() + Duration::days(30)).await;

    let (status, _) = request(&app, "GET", "/api/v1/export", Some(&clerk), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = request(&app, "GET", "/api/v1/export", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group_by"], "kind");
    assert_eq!(body["documents"]["puc"].as_array().unwrap().len(), 1);

    let (status, body) = request(
        &app,
        "GET",
        "/api/v1/export?group_by=user",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let owners = body["owners"].as_array().unwrap();
    assert_eq!(owners.len(), 3);
    let clerk_bundle = owners
        .iter()
        .find(|o| o["owner_id"] == "id-clerk")
        .unwrap();
    assert_eq!(clerk_bundle["user"]["username"], "clerk");
    assert_eq!(clerk_bundle["documents"]["puc"].as_array().unwrap().len(), 1);

    let (status, _) = request(
        &app,
        "GET",
        "/api/v1/export?group_by=colour",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_reconciliation_is_admin_only() {
    let app = setup_test_app().await;
    let clerk = login(&app, "clerk").await;
    let admin = login(&app, "admin").await;
    create_puc(&app, &clerk, "MH12AB1234", app.today() + Duration::days(30)).await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/v1/jobs/status-reconciliation",
        Some(&clerk),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/jobs/status-reconciliation",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reports"].as_array().unwrap().len(), 7);
    // Status was already correct when the record was written
    assert_eq!(body["updated"], 0);
}

#[tokio::test]
async fn unique_ids_per_request() {
    let app = setup_test_app().await;
    let cookie = login(&app, "clerk").await;
    let a = create_puc(&app, &cookie, "MH12AB0001", app.today()).await;
    let b = create_puc(&app, &cookie, "MH12AB0001", app.today()).await;
    assert_ne!(a["id"], b["id"]);
    assert!(Uuid::parse_str(a["id"].as_str().unwrap()).is_ok());
}

#[tokio::test]
#[serial]
async fn bootstrap_admin_only_on_empty_users_table() {
    use rto::server::{bootstrap_admin_from_env, BOOTSTRAP_ADMIN_ENV};

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let db = Database::SQLite(pool);
    db.run_migrations().await.unwrap();

    std::env::remove_var(BOOTSTRAP_ADMIN_ENV);
    assert!(bootstrap_admin_from_env(&db, 4).await.unwrap().is_none());

    std::env::set_var(BOOTSTRAP_ADMIN_ENV, "root:first-admin-pass");
    let created = bootstrap_admin_from_env(&db, 4).await;
    let again = bootstrap_admin_from_env(&db, 4).await;
    std::env::remove_var(BOOTSTRAP_ADMIN_ENV);

    let admin = created.unwrap().expect("admin should be created");
    assert_eq!(admin.username, "root");
    assert_eq!(admin.role, "admin");
    assert!(again.unwrap().is_none());
    assert_eq!(db.count_users().await.unwrap(), 1);
}
