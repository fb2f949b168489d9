use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Router,
};
use reqwest::Url;
use tracing::{error, info, warn};

use crate::bot::{self, BotCell};
use crate::config::HEALTH_PATH;
use crate::update::Update;

/// Shared state for the webhook handlers
pub struct AppState {
    pub bot: Arc<BotCell>,
    pub webhook_url: Url,
    pub max_body_bytes: usize,
}

/// GET registers the webhook, POST takes updates, anything else is a no-op.
pub fn router(state: AppState, webhook_path: &str) -> Router {
    // axum answers HEAD with the GET handler unless HEAD has its own route
    let hook: MethodRouter<Arc<AppState>> = get(handle_get)
        .head(|| async { StatusCode::OK })
        .post(handle_post)
        .fallback(|| async { StatusCode::OK });

    let mut app = Router::new()
        .route(HEALTH_PATH, get(healthz))
        .route(webhook_path, hook.clone());
    if webhook_path != "/" {
        app = app.route("/", hook);
    }
    app.with_state(Arc::new(state))
}

pub async fn serve(state: AppState, webhook_path: &str, addr: SocketAddr) -> Result<()> {
    let app = router(state, webhook_path);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Webhook endpoint listening on http://{}{}", addr, webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down gracefully...");
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if state.bot.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing")
    }
}

async fn handle_get(State(state): State<Arc<AppState>>) -> Response {
    info!("Receive request: GET");
    let client = match state.bot.get_or_init().await {
        Ok(client) => client,
        Err(e) => {
            error!("Bot setup failed: {:#}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, format!("{:#}", e)).into_response();
        }
    };

    match client.set_webhook(&state.webhook_url).await {
        Ok(status) => format!("Set webhook on {}\n", status.url).into_response(),
        Err(e) => {
            warn!("Webhook registration failed: {:#}", e);
            format!("{:#}", e).into_response()
        }
    }
}

/// Always answers 200 with an empty body once the bot is up; bad payloads
/// are only logged.
async fn handle_post(State(state): State<Arc<AppState>>, body: Body) -> StatusCode {
    info!("Receive request: POST");
    let client = match state.bot.get_or_init().await {
        Ok(client) => client,
        Err(e) => {
            error!("Bot setup failed: {:#}", e);
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    };

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return StatusCode::OK;
        }
    };
    info!("Received body: {} bytes", body.len());

    let update = match Update::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Failed to decode update: {}", e);
            return StatusCode::OK;
        }
    };

    let outcome = bot::dispatch(&client, &update).await;
    info!("Process finished: {}", outcome);
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{FixedConnector, RecordingMessenger, Sent};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_with(
        messenger: Arc<RecordingMessenger>,
        max_body_bytes: usize,
    ) -> (Router, Arc<BotCell>) {
        let cell = Arc::new(BotCell::new(FixedConnector::new(messenger)));
        let state = AppState {
            bot: cell.clone(),
            webhook_url: Url::parse("https://bot.example.com/api/index").unwrap(),
            max_body_bytes,
        };
        (router(state, "/api/index"), cell)
    }

    async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_get_registers_webhook() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 1024);

        let (status, body) = call(app, "GET", "/api/index", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Set webhook on https://bot.example.com/api/index\n");
        assert_eq!(
            *messenger.webhooks.lock().unwrap(),
            vec!["https://bot.example.com/api/index".to_string()]
        );
    }

    #[tokio::test]
    async fn test_get_reports_registration_error_in_body() {
        let messenger = Arc::new(RecordingMessenger {
            fail_webhook: Some("Bad Request: bad webhook: HTTPS url must be provided".to_string()),
            ..Default::default()
        });
        let (app, _) = app_with(messenger, 1024);

        let (status, body) = call(app, "GET", "/api/index", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("HTTPS url must be provided"));
    }

    #[tokio::test]
    async fn test_post_echoes_text() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 1024);

        let (status, body) = call(
            app,
            "POST",
            "/api/index",
            r#"{"update_id":3,"message":{"message_id":11,"text":"hi","chat":{"id":42}}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(
            messenger.sent(),
            vec![Sent::Reply {
                to: Some(42),
                quote: 11,
                text: "hi".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_post_hello_answers_hello() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 1024);

        let (status, body) = call(
            app,
            "POST",
            "/api/index",
            r#"{"message":{"text":"/hello","sender":{"username":"alice"}}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(
            messenger.sent(),
            vec![Sent::Send {
                to: None,
                text: "Hello!".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_post_bad_payloads_are_ignored() {
        let messenger = Arc::new(RecordingMessenger::default());

        for payload in ["", "{", "not json", r#"{"message":"x"}"#, "{}"] {
            let (app, _) = app_with(messenger.clone(), 1024);
            let (status, body) = call(app, "POST", "/api/index", payload).await;
            assert_eq!(status, StatusCode::OK, "payload {:?}", payload);
            assert!(body.is_empty(), "payload {:?}", payload);
        }
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_post_over_limit_is_ignored() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 16);

        let (status, body) = call(
            app,
            "POST",
            "/api/index",
            r#"{"message":{"text":"this body is longer than sixteen bytes"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_are_noops() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 1024);

        let (status, body) = call(app, "PUT", "/api/index", r#"{"message":{"text":"hi"}}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_head_does_not_register_webhook() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 1024);

        let (status, body) = call(app.clone(), "HEAD", "/api/index", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (status, _) = call(app, "HEAD", "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(messenger.webhooks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_root_path_serves_the_hook() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, _) = app_with(messenger.clone(), 1024);

        let (status, _) = call(app, "POST", "/", r#"{"message":{"text":"ping"}}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_healthz_tracks_initialization() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (app, cell) = app_with(messenger, 1024);

        let (status, body) = call(app.clone(), "GET", "/healthz", "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "initializing");

        cell.get_or_init().await.unwrap();
        let (status, body) = call(app, "GET", "/healthz", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_post_when_setup_fails() {
        let messenger = Arc::new(RecordingMessenger::default());
        let cell = Arc::new(BotCell::new(FixedConnector::failing(messenger)));
        let app = router(
            AppState {
                bot: cell,
                webhook_url: Url::parse("https://bot.example.com/api/index").unwrap(),
                max_body_bytes: 1024,
            },
            "/api/index",
        );

        let (status, _) = call(app, "POST", "/api/index", r#"{"message":{"text":"hi"}}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
