//! HTTP adapter: Telegram webhook in, routed reply out, plus a health endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::modules::ModuleDescriptor;
use crate::router::{Dispatch, Router};
use crate::store::ContextStore;
use crate::telegram::{Inbound, ReplySender, Update};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
pub const PLATFORM: &str = "telegram";

pub struct AppState {
    pub router: Arc<Router>,
    pub store: ContextStore,
    pub sender: Arc<dyn ReplySender>,
    pub metrics: Mutex<Metrics>,
    pub webhook_secret: Option<String>,
    pub environment: String,
    started_at: Instant,
    tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        router: Arc<Router>,
        store: ContextStore,
        sender: Arc<dyn ReplySender>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            router,
            store,
            sender,
            metrics: Mutex::new(Metrics::new()),
            webhook_secret: None,
            environment: environment.into(),
            started_at: Instant::now(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty());
        self
    }

    /// Stop accepting background work and wait for in-flight messages to be
    /// routed and answered.
    pub async fn drain(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "waiting for in-flight messages");
        }
        self.tasks.wait().await;
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.webhook_secret {
            None => true,
            Some(expected) => headers
                .get(SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|got| got == expected),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: String,
    pub uptime_sec: u64,
    pub conversations: usize,
    pub modules: Vec<ModuleDescriptor>,
    pub metrics: Metrics,
    pub checked_at: String,
}

pub fn app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .with_state(state)
}

/// Accept a Telegram update. Routing runs in the background so Telegram gets
/// its acknowledgement immediately.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if !state.authorized(&headers) {
        warn!(update_id = update.update_id, "webhook rejected: bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let Some(inbound) = update.inbound() else {
        debug!(update_id = update.update_id, "ignoring non-text update");
        return StatusCode::OK;
    };

    if state.tasks.is_closed() {
        warn!(update_id = update.update_id, "shutting down, rejecting update");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let correlation_id = uuid::Uuid::new_v4().to_string();
    let tasks = state.tasks.clone();
    tasks.spawn(async move {
        process_inbound(&state, inbound, &correlation_id).await;
    });
    StatusCode::OK
}

/// Route one inbound message and deliver the reply.
///
/// The conversation stays locked until the reply is sent, so replies within a
/// conversation go out in the order the messages were routed.
pub async fn process_inbound(state: &AppState, inbound: Inbound, correlation_id: &str) -> Dispatch {
    let conversation_id = inbound.chat_id.to_string();
    let context = state
        .store
        .get_or_create(&conversation_id, &inbound.user_id.to_string())
        .await;

    let mut ctx = context.lock().await;
    ctx.set_metadata("platform", PLATFORM);
    ctx.set_metadata("correlation_id", correlation_id);

    let dispatch = state.router.dispatch(&inbound.text, &mut ctx).await;
    state.metrics.lock().await.record(&dispatch);

    if let Err(e) = state.sender.send_reply(inbound.chat_id, &dispatch.response).await {
        error!(
            conversation_id = %conversation_id,
            correlation_id = %correlation_id,
            error = %e,
            "failed to deliver reply"
        );
        state.metrics.lock().await.record_delivery_failure();
    }
    drop(ctx);
    state.store.touch(&conversation_id).await;
    dispatch
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime_sec = state.started_at.elapsed().as_secs();
    let metrics = {
        let mut metrics = state.metrics.lock().await;
        metrics.uptime_sec = uptime_sec;
        metrics.update_memory();
        metrics.clone()
    };

    Json(HealthResponse {
        status: "ok",
        environment: state.environment.clone(),
        uptime_sec,
        conversations: state.store.len().await,
        modules: state.router.descriptors(),
        metrics,
        checked_at: Utc::now().to_rfc3339(),
    })
}

/// Periodically drop idle conversations when the store has a TTL
pub fn spawn_sweeper(state: Arc<AppState>) -> Option<tokio::task::JoinHandle<()>> {
    let ttl = state.store.ttl()?;
    let period = (ttl / 2).max(Duration::from_secs(1));
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = state.store.evict_expired().await;
            if removed > 0 {
                info!(removed, "swept idle conversations");
            }
        }
    }))
}

/// Bind `port` and serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(bind_address = %address, "webhook server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
}
