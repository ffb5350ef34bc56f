use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use erratum_config::Config;
use tokio::time::sleep;
use tracing::{info, warn};

pub mod broadcast;
pub mod dispatch;
pub mod notices;
pub mod router;
pub mod store;
pub mod telegram;
pub mod texts;
pub mod transport;

use router::ReportRouter;
use telegram::{TelegramClient, Update};
use transport::Transport;

/// Header Telegram attaches to every webhook call when a secret is registered.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let token = std::env::var(&cfg.telegram.token_env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("bot token env var {} is not set", cfg.telegram.token_env))?;
    let client = Arc::new(
        TelegramClient::new(&cfg.telegram.api_base, &token, cfg.telegram.poll_timeout_secs)
            .map_err(|e| format!("telegram client init failed: {e}"))?,
    );
    let username = client
        .get_me()
        .await
        .map_err(|e| format!("getMe failed: {e}"))?;
    info!(%username, "bot identity resolved");
    let router = Arc::new(
        ReportRouter::from_config(&cfg, client.clone())?.with_bot_username(username),
    );

    if let Err(e) = client.set_commands(texts::COMMANDS).await {
        warn!(error = %e, "registering bot commands failed");
    }

    match cfg.telegram.webhook.as_ref().filter(|_| cfg.is_webhook()) {
        Some(webhook) => {
            let url = format!(
                "{}/v1/telegram/{}",
                webhook.public_url.trim_end_matches('/'),
                webhook.secret
            );
            client
                .set_webhook(&url, &webhook.secret)
                .await
                .map_err(|e| format!("setWebhook failed: {e}"))?;
            info!(public_url = %webhook.public_url, "webhook registered");
        }
        None => {
            client
                .delete_webhook()
                .await
                .map_err(|e| format!("deleteWebhook failed: {e}"))?;
            info!(timeout_secs = cfg.telegram.poll_timeout_secs, "long polling started");
            tokio::spawn(poll_updates(
                client,
                Arc::clone(&router),
                cfg.telegram.poll_timeout_secs,
            ));
        }
    }

    let app = routes(AppState::new(&cfg, router));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, entities = cfg.registry.len(), "erratum listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config, transport: Arc<dyn Transport>) -> Result<Router, String> {
    let router = Arc::new(ReportRouter::from_config(&cfg, transport)?);
    Ok(routes(AppState::new(&cfg, router)))
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/telegram/{secret}", post(telegram_webhook))
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    router: Arc<ReportRouter>,
    /// Present only in webhook mode.
    webhook_secret: Option<Arc<str>>,
}

impl AppState {
    fn new(cfg: &Config, router: Arc<ReportRouter>) -> Self {
        Self {
            router,
            webhook_secret: cfg
                .telegram
                .webhook
                .as_ref()
                .filter(|_| cfg.is_webhook())
                .map(|w| Arc::from(w.secret.as_str())),
        }
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn telegram_webhook(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let Some(expected) = state.webhook_secret.as_deref() else {
        return StatusCode::NOT_FOUND;
    };
    let header = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if secret != expected || header != Some(expected) {
        warn!(update_id = update.update_id, "webhook call rejected: secret mismatch");
        return StatusCode::FORBIDDEN;
    }
    if let Some(event) = update.into_event() {
        let router = Arc::clone(&state.router);
        tokio::spawn(async move { router.handle(event).await });
    }
    StatusCode::OK
}

/// Long-polls `getUpdates` forever; every update runs on its own task.
pub async fn poll_updates(client: Arc<TelegramClient>, router: Arc<ReportRouter>, timeout_secs: u64) {
    let mut offset = 0;
    loop {
        match client.get_updates(offset, timeout_secs).await {
            Ok(batch) => {
                offset = batch.next_offset;
                for update in batch.updates {
                    if let Some(event) = update.into_event() {
                        let router = Arc::clone(&router);
                        tokio::spawn(async move { router.handle(event).await });
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "getUpdates failed, retrying");
                sleep(POLL_RETRY_DELAY).await;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "listening for shutdown signal failed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
