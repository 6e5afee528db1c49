mod support;

use serde_json::json;

#[tokio::test]
async fn switch_on_429_rotates_to_other_account_and_applies() {
    let app = support::spawn_app().await;
    app.add_account("A", "token-a").await;
    app.add_account("B", "token-b").await;

    let response = app
        .post_json(
            "/v1/switch/on-error",
            json!({"status_code": 429, "error_message": "quota exceeded"}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let decision: serde_json::Value = response.json().await.unwrap();
    assert_eq!(decision["switched"], true);
    assert_eq!(decision["from_account_id"], "A");
    assert_eq!(decision["to_account_id"], "B");
    assert_eq!(decision["reason"], "quota-exceeded");

    let status = app.status_json().await;
    assert_eq!(status["active_account_id"], "B");

    // The applier materialized B's token into the CLI credential file.
    let auth: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&app.codex_auth_file).unwrap()).unwrap();
    assert_eq!(auth["tokens"]["access_token"], "token-b");
}

#[tokio::test]
async fn non_switchable_error_leaves_state_alone() {
    let app = support::spawn_app().await;
    app.add_account("A", "token-a").await;
    app.add_account("B", "token-b").await;

    let response = app
        .post_json(
            "/v1/switch/on-error",
            json!({"status_code": 200, "error_message": "ok"}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let decision: serde_json::Value = response.json().await.unwrap();
    assert_eq!(decision["switched"], false);
    assert_eq!(decision["reason"], "not-switchable-error");

    assert_eq!(app.status_json().await["active_account_id"], "A");
}

#[tokio::test]
async fn fill_first_strategy_picks_least_used_candidate() {
    let app = support::spawn_app().await;
    app.add_account("A", "token-a").await;
    app.add_account("B", "token-b").await;
    app.add_account("C", "token-c").await;
    app.post_empty("/v1/accounts/A/activate").await;
    app.patch_json("/v1/strategy", json!({"strategy": "fill-first"}))
        .await;

    for (id, session, weekly) in [("A", 50, 10), ("B", 70, 10), ("C", 20, 10)] {
        let response = app
            .patch_json(
                &format!("/v1/accounts/{id}/quota"),
                json!({
                    "session": {"used_percent": session},
                    "weekly": {"used_percent": weekly},
                    "limit_reached": false
                }),
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    let response = app
        .post_json(
            "/v1/switch/on-error",
            json!({"status_code": 429, "error_message": "quota exceeded"}),
        )
        .await;
    let decision: serde_json::Value = response.json().await.unwrap();
    assert_eq!(decision["switched"], true);
    assert_eq!(decision["to_account_id"], "C");
}

#[tokio::test]
async fn switch_without_accounts_is_a_400() {
    let app = support::spawn_app().await;

    let response = app
        .post_json(
            "/v1/switch/on-error",
            json!({"status_code": 429, "error_message": "quota exceeded"}),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no active account"));
}

#[tokio::test]
async fn switch_reports_exhaustion_when_candidates_unusable() {
    let app = support::spawn_app().await;
    app.add_account("A", "token-a").await;

    // B's access token is expired and it has no refresh token.
    let response = app
        .post_json(
            "/v1/accounts",
            json!({
                "id": "B",
                "provider": "codex",
                "access_token": "stale",
                "access_expires_at": (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339(),
            }),
        )
        .await;
    assert_eq!(response.status(), 201);

    let response = app
        .post_json(
            "/v1/switch/on-error",
            json!({"status_code": 429, "error_message": "quota exceeded"}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let decision: serde_json::Value = response.json().await.unwrap();
    assert_eq!(decision["switched"], false);
    assert_eq!(decision["reason"], "no-available-account");

    let status = app.status_json().await;
    assert_eq!(status["active_account_id"], "A");
    let b = status["accounts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["id"] == "B")
        .unwrap();
    assert_eq!(b["status"], "need_reauth");
    assert_eq!(b["last_error"], "refresh token missing");
}

#[tokio::test]
async fn switch_matches_message_patterns_regardless_of_status() {
    let app = support::spawn_app().await;
    app.add_account("A", "token-a").await;
    app.add_account("B", "token-b").await;

    let response = app
        .post_json(
            "/v1/switch/on-error",
            json!({"status_code": 400, "error_message": "insufficient_quota"}),
        )
        .await;
    let decision: serde_json::Value = response.json().await.unwrap();
    assert_eq!(decision["switched"], true);
}
