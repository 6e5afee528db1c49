mod support;

use serde_json::json;

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let app = support::spawn_app().await;
    let response = app.get("/v1/health").await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn cold_add_becomes_active_with_default_strategy() {
    let app = support::spawn_app().await;

    let response = app
        .post_json(
            "/v1/accounts",
            json!({"id": "A", "provider": "codex", "access_token": "t1"}),
        )
        .await;
    assert_eq!(response.status(), 201);
    let account: serde_json::Value = response.json().await.unwrap();
    assert_eq!(account["id"], "A");
    assert_eq!(account["status"], "ready");

    let status = app.status_json().await;
    assert_eq!(status["active_account_id"], "A");
    assert_eq!(status["strategy"], "round-robin");
    assert_eq!(status["accounts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn activate_writes_tokens_into_codex_auth_file() {
    let app = support::spawn_app().await;
    app.add_account("codex:a@example.com", "token-a").await;
    app.add_account("codex:b@example.com", "token-b").await;

    let response = app
        .post_empty("/v1/accounts/codex:b@example.com/activate")
        .await;
    assert_eq!(response.status(), 200);

    let status = app.status_json().await;
    assert_eq!(status["active_account_id"], "codex:b@example.com");

    let auth: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&app.codex_auth_file).unwrap()).unwrap();
    assert_eq!(auth["tokens"]["access_token"], "token-b");
}

#[tokio::test]
async fn activate_rejects_unknown_account_with_400() {
    let app = support::spawn_app().await;
    app.add_account("A", "t1").await;

    let response = app.post_empty("/v1/accounts/missing/activate").await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn add_account_validates_required_fields_and_timestamps() {
    let app = support::spawn_app().await;

    let response = app
        .post_json("/v1/accounts", json!({"provider": "codex", "access_token": "t"}))
        .await;
    assert_eq!(response.status(), 400);

    let response = app
        .post_json(
            "/v1/accounts",
            json!({
                "id": "A",
                "provider": "codex",
                "access_token": "t",
                "access_expires_at": "not-a-time"
            }),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid access_expires_at"));
}

#[tokio::test]
async fn accounts_list_is_sorted_most_recent_first() {
    let app = support::spawn_app().await;
    app.add_account("codex:first", "t1").await;
    app.add_account("codex:second", "t2").await;

    let response = app.get("/v1/accounts").await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let ids: Vec<&str> = body["accounts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_str().unwrap())
        .collect();
    // Same-second adds fall back to id order; either way both are present
    // and the listing is deterministic.
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"codex:first") && ids.contains(&"codex:second"));
}

#[tokio::test]
async fn quota_patch_overwrites_snapshot() {
    let app = support::spawn_app().await;
    app.add_account("A", "t1").await;

    let response = app
        .patch_json(
            "/v1/accounts/A/quota",
            json!({
                "session": {"used_percent": 42},
                "weekly": {"used_percent": 7},
                "limit_reached": false
            }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let status = app.status_json().await;
    let account = &status["accounts"][0];
    assert_eq!(account["quota"]["session"]["used_percent"], 42);
    assert_eq!(account["quota"]["weekly"]["used_percent"], 7);
    assert!(account["quota"]["last_updated"].is_string());
}

#[tokio::test]
async fn strategy_patch_validates_tag() {
    let app = support::spawn_app().await;

    let response = app
        .patch_json("/v1/strategy", json!({"strategy": "fill-first"}))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(app.status_json().await["strategy"], "fill-first");

    let response = app
        .patch_json("/v1/strategy", json!({"strategy": "newest-first"}))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unknown_paths_and_methods_are_rejected() {
    let app = support::spawn_app().await;

    let response = app.get("/v1/nope").await;
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not found");

    let response = app.post_empty("/v1/health").await;
    assert_eq!(response.status(), 405);

    let response = app
        .client
        .post(app.url("/v1/accounts"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn cors_preflight_returns_204_with_wildcard_origin() {
    let app = support::spawn_app().await;

    let response = app
        .client
        .request(reqwest::Method::OPTIONS, app.url("/v1/status"))
        .header("Origin", "http://localhost:1420")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );

    let response = app.get("/v1/status").await;
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn daemon_info_reports_pid_and_restart_support() {
    let app = support::spawn_app().await;

    let response = app.get("/v1/daemon/info").await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["pid"].as_u64().unwrap() > 0);
    assert!(body["restart_supported"].as_bool().unwrap());
    assert_eq!(body["default_restart_cmd"], "true");
}
