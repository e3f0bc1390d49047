use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// POST /start: start the bot if it is not already starting or running.
///
/// Answers immediately with the status after the call; startup itself
/// continues in the background and is visible through `GET /status`.
pub async fn start_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.start();
    Json(json!({ "status": status.to_string() }))
}

/// GET /status: `not started`, `starting`, `running` or `error: <msg>`.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": state.status().to_string() }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use serenity::http::Http;
    use tower::ServiceExt;

    use propabot_core::config::DiscordSettings;
    use propabot_core::{ConfigStore, PropagandaConfig, Settings};
    use propabot_discord::{CommandPlayer, DiscordAppContext, VoicePlayer};
    use propabot_generation::{ContentPipeline, JobPoller, PassThrough};
    use propabot_scheduler::RunLedger;

    use crate::app::{build_router, AppState};

    fn test_state(settings: Settings) -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::with_config(
            dir.path().join("propaganda_config.json"),
            PropagandaConfig::default(),
        ));
        let pipeline = Arc::new(ContentPipeline::new(
            Arc::new(PassThrough),
            Arc::new(JobPoller::new("http://127.0.0.1:9/submit")),
        ));
        let voice = Arc::new(VoicePlayer::new(Arc::new(CommandPlayer::new(vec![]))));
        let state = AppState::build(
            settings,
            store,
            pipeline,
            voice,
            RunLedger::in_memory().unwrap(),
        );
        (Arc::new(state), dir)
    }

    async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Poll `/status` until startup has settled.
    async fn settled_status(router: &Router) -> String {
        for _ in 0..100 {
            let (_, body) = call(router, "GET", "/status").await;
            let status = body["status"].as_str().unwrap().to_string();
            if status != "starting" {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("bot never left the starting state");
    }

    #[tokio::test]
    async fn status_before_start() {
        let (state, _dir) = test_state(Settings::default());
        let router = build_router(state);

        let (code, body) = call(&router, "GET", "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "not started");
    }

    #[tokio::test]
    async fn start_without_token_reports_error_and_can_retry() {
        let (state, _dir) = test_state(Settings::default());
        let router = build_router(state.clone());

        let (code, body) = call(&router, "POST", "/start").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "starting");

        assert_eq!(settled_status(&router).await, "error: no bot token configured");
        assert!(!state.scheduler.is_scheduled());

        // An errored bot may be started again.
        let (_, body) = call(&router, "POST", "/start").await;
        assert_eq!(body["status"], "starting");
        assert_eq!(settled_status(&router).await, "error: no bot token configured");
    }

    fn with_token(token: &str) -> Settings {
        Settings {
            discord: Some(DiscordSettings {
                bot_token: token.into(),
                guild_id: None,
            }),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn malformed_token_reports_error() {
        let (state, _dir) = test_state(with_token("definitely-not-a-token"));
        let router = build_router(state.clone());

        call(&router, "POST", "/start").await;
        assert_eq!(settled_status(&router).await, "error: invalid bot token");
        assert!(!state.scheduler.is_scheduled());
    }

    #[tokio::test]
    async fn running_only_after_gateway_ready() {
        let token = "MTIz.NDU2Nzg5.YWJjZGVm";
        let (state, _dir) = test_state(with_token(token));
        let router = build_router(state.clone());

        let (_, body) = call(&router, "POST", "/start").await;
        assert_eq!(body["status"], "starting");
        for _ in 0..100 {
            if state.scheduler.is_scheduled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(state.scheduler.is_scheduled());

        // Launched but not connected: still starting, and start stays idempotent.
        let (_, body) = call(&router, "GET", "/status").await;
        assert_eq!(body["status"], "starting");
        let (_, body) = call(&router, "POST", "/start").await;
        assert_eq!(body["status"], "starting");

        state.discord_ready(Arc::new(Http::new(token)));
        let (_, body) = call(&router, "GET", "/status").await;
        assert_eq!(body["status"], "running");
        let (_, body) = call(&router, "POST", "/start").await;
        assert_eq!(body["status"], "running");

        state.shutdown().await;
        assert_eq!(state.status().to_string(), "not started");
        assert!(!state.scheduler.is_scheduled());
    }

    #[tokio::test]
    async fn ready_does_not_mask_an_error() {
        let (state, _dir) = test_state(Settings::default());
        let router = build_router(state.clone());

        call(&router, "POST", "/start").await;
        assert_eq!(settled_status(&router).await, "error: no bot token configured");
        state.discord_ready(Arc::new(Http::new("MTIz.NDU2Nzg5.YWJjZGVm")));
        assert_eq!(state.status().to_string(), "error: no bot token configured");
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (state, _dir) = test_state(Settings::default());
        let router = build_router(state);

        let (code, body) = call(&router, "GET", "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["bot"], "not started");
        assert!(body["next_run"].is_null());
    }
}
