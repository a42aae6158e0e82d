use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use vanish_server::clock::ManualClock;
use vanish_server::config::VaultConfig;
use vanish_server::store::crypto::PasswordCost;
use vanish_server::store::Store;
use vanish_server::{router, AppState, Vault};

const T0: i64 = 1_700_000_000;

struct Harness {
    app: Router,
    clock: ManualClock,
    _dir: tempfile::TempDir,
}

fn harness(api_key: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("vanish.db")).unwrap();
    let clock = ManualClock::new(T0);
    let config = VaultConfig {
        password_cost: PasswordCost {
            memory_kib: 64,
            iterations: 1,
        },
        ..VaultConfig::default()
    }
    .with_fingerprint_salt(b"http".to_vec());
    let state = AppState {
        vault: Vault::with_clock(store, config, clock.clone()),
        api_key: api_key.map(str::to_owned),
        trust_forwarded: false,
    };
    let app = router(state).layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 7], 4000))));
    Harness {
        app,
        clock,
        _dir: dir,
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn create(app: &Router, extra: Value) -> String {
    let mut body = json!({
        "text_blob": STANDARD.encode(b"text-ct"),
        "secret_blob": STANDARD.encode(b"secret-ct"),
        "section_count": 2,
    });
    if let (Some(dst), Some(src)) = (body.as_object_mut(), extra.as_object()) {
        dst.extend(src.clone());
    }
    let (status, resp) = send(app, post_json("/api/links", body)).await;
    assert_eq!(status, StatusCode::CREATED, "{resp}");
    resp["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn health_reports_record_count() {
    let h = harness(None);
    create(&h.app, json!({})).await;
    let (status, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["records"], 1);
}

#[tokio::test]
async fn create_then_view_until_masked() {
    let h = harness(None);
    let id = create(&h.app, json!({"max_views": 1})).await;

    let (status, first) = send(&h.app, get(&format!("/api/links/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["phase"], "active");
    assert_eq!(first["last_view"], true);
    assert_eq!(first["secret_blob"], STANDARD.encode(b"secret-ct"));
    assert_eq!(first["section_count"], 2);

    let (status, second) = send(&h.app, get(&format!("/api/links/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["phase"], "secrets_expired");
    assert_eq!(second["masked"], true);
    assert!(second["secret_blob"].is_null());
    assert_eq!(second["text_blob"], STANDARD.encode(b"text-ct"));
}

#[tokio::test]
async fn create_rejects_bad_input() {
    let h = harness(None);
    let cases = [
        json!({"text_blob": "%%%", "section_count": 1}),
        json!({"text_blob": "", "section_count": 1}),
        json!({"text_blob": STANDARD.encode(b"t"), "section_count": 1, "max_views": 0}),
        json!({"text_blob": STANDARD.encode(b"t"), "section_count": 1, "expire_days": 4000}),
        json!({"text_blob": STANDARD.encode(b"t"), "section_count": 1, "max_views": -1}),
        json!({"text_blob": STANDARD.encode(b"t"), "section_count": 1, "expire_days": 5_000_000_000u64}),
        json!({"text_blob": STANDARD.encode(b"t")}),
        json!({"text_blob": STANDARD.encode(b"t"), "section_count": "two"}),
    ];
    for body in cases {
        let (status, resp) = send(&h.app, post_json("/api/links", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{resp}");
        assert!(resp["error"].is_string());
    }
}

#[tokio::test]
async fn unknown_and_malformed_ids_are_not_found() {
    let h = harness(None);
    for id in [
        "3f2a1c4e-9b7d-4e21-a8f0-1c2d3e4f5a6b",
        "3f2a1c4e-9b7d-1e21-a8f0-1c2d3e4f5a6b",
        "not-a-uuid",
    ] {
        let (status, body) = send(&h.app, get(&format!("/api/links/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["phase"], "not_found");
    }
}

#[tokio::test]
async fn password_gate() {
    let h = harness(None);
    let id = create(&h.app, json!({"password": "hunter2", "max_views": 2})).await;
    let uri = format!("/api/links/{id}");

    let (status, _) = send(&h.app, get(&uri)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, post_json(&uri, json!({"password": "wrong"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&h.app, post_json(&uri, json!({"password": 42}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&h.app, post_json(&uri, json!({"password": "hunter2"}))).await;
    assert_eq!(status, StatusCode::OK);
    // failed attempts do not count
    assert_eq!(body["current_views"], 1);
}

#[tokio::test]
async fn expire_and_kill_report_outcomes() {
    let h = harness(None);
    let id = create(&h.app, json!({"delete_after_days": 5})).await;

    let (status, body) = send(&h.app, post_json("/api/expire", json!({"uuid": id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["outcome"], "expired");

    let (_, body) = send(&h.app, post_json("/api/expire", json!({"uuid": id}))).await;
    assert_eq!(body["outcome"], "already_expired");

    let (_, body) = send(
        &h.app,
        post_json("/api/expire", json!({"uuid": id, "action": "kill"})),
    )
    .await;
    assert_eq!(body["outcome"], "killed");

    let (status, view) = send(&h.app, get(&format!("/api/links/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["phase"], "killed");
    assert!(view["text_blob"].is_null());
    assert_eq!(view["killed_at"], T0);

    let (status, _) = send(
        &h.app,
        post_json(
            "/api/expire",
            json!({"uuid": "3f2a1c4e-9b7d-4e21-a8f0-1c2d3e4f5a6b"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &h.app,
        post_json("/api/expire", json!({"uuid": id, "action": "shred"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn expire_with_zero_retention_deletes() {
    let h = harness(None);
    let id = create(&h.app, json!({"delete_after_days": 0})).await;

    let (_, body) = send(&h.app, post_json("/api/expire", json!({"uuid": id}))).await;
    assert_eq!(body["outcome"], "deleted");

    let (status, _) = send(&h.app, get(&format!("/api/links/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sweep_requires_api_key_when_configured() {
    let h = harness(Some("operator-key"));
    create(&h.app, json!({"expire_days": 1, "delete_after_days": 0})).await;
    h.clock.advance(2 * 86_400);

    let (status, _) = send(&h.app, Request::post("/api/sweep").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::post("/api/sweep")
        .header(header::AUTHORIZATION, "Bearer operator-key")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["moved"], 1);

    let (_, health) = send(&h.app, get("/health")).await;
    assert_eq!(health["records"], 0);
}
