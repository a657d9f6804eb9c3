//! Pool Manager - Filtration Control API Server

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use filtration_engine::config::parameter_bounds;
use filtration_engine::{Config, ConfigUpdate, EngineError, Mode, Trigger};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod entities;
mod pools;
mod websocket;

use entities::EntityStore;
use pools::PoolHost;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pools: Arc<PoolHost>,
    pub entities: Arc<EntityStore>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System info response
#[derive(Serialize)]
struct SystemInfo {
    name: String,
    version: String,
    pools: usize,
}

/// Create pool request
#[derive(Deserialize)]
struct CreatePoolRequest {
    #[serde(default = "default_pool_name")]
    name: String,
    config: Config,
}

fn default_pool_name() -> String {
    "Pool".to_string()
}

/// Mode change request
#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

/// Entity state push; numbers and strings are both accepted
#[derive(Deserialize)]
struct EntityUpdate {
    state: serde_json::Value,
}

/// Status code for an engine error
fn error_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidMode(_) | EngineError::Config(_) | EngineError::InvalidCron(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::Io(_) | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &EngineError) -> (StatusCode, Json<ApiResponse>) {
    (error_status(e), Json(ApiResponse::error(e.to_string())))
}

/// Get system info
async fn system_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(SystemInfo {
        name: "Pool Manager".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pools: state.pools.registry().len(),
    }))
}

/// List snapshots of all pools
async fn list_pools(State(state): State<AppState>) -> impl IntoResponse {
    let mut snapshots = Vec::new();
    for controller in state.pools.registry().list() {
        snapshots.push(controller.snapshot().await);
    }
    Json(ApiResponse::success(snapshots))
}

/// Add a pool
async fn create_pool(
    State(state): State<AppState>,
    Json(req): Json<CreatePoolRequest>,
) -> impl IntoResponse {
    match state.pools.create(req.name, req.config).await {
        Ok(controller) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(controller.snapshot().await)),
        ),
        Err(e) => error_response(&e),
    }
}

/// Remove a pool
async fn delete_pool(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.pools.remove(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "deleted": id }))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Get a pool's snapshot
async fn get_pool(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.pools.registry().require(&id) {
        Ok(controller) => (
            StatusCode::OK,
            Json(ApiResponse::success(controller.snapshot().await)),
        ),
        Err(e) => error_response(&e),
    }
}

/// Select a pool's operating mode
async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ModeRequest>,
) -> impl IntoResponse {
    let controller = match state.pools.registry().require(&id) {
        Ok(controller) => controller,
        Err(e) => return error_response(&e),
    };

    match controller.set_mode(&req.mode).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ApiResponse::success(controller.snapshot().await)),
        ),
        Err(e) => error_response(&e),
    }
}

/// Change a pool's parameters
async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConfigUpdate>,
) -> impl IntoResponse {
    if req.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No parameters to update")),
        );
    }

    let controller = match state.pools.registry().require(&id) {
        Ok(controller) => controller,
        Err(e) => return error_response(&e),
    };

    match controller.update_config(req).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ApiResponse::success(controller.snapshot().await)),
        ),
        Err(e) => error_response(&e),
    }
}

/// Manually trigger a recompute
async fn recompute(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.pools.registry().require(&id) {
        Ok(controller) => {
            controller.recompute(Trigger::Manual).await;
            (
                StatusCode::OK,
                Json(ApiResponse::success(controller.snapshot().await)),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// Modes, pivot choices and parameter bounds
async fn pool_options() -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "modes": Mode::ALL,
        "parameters": parameter_bounds(),
    })))
}

/// List all entities
async fn list_entities(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.entities.list()))
}

/// Push an entity state
async fn put_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(req): Json<EntityUpdate>,
) -> impl IntoResponse {
    let value = match req.state {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    Json(ApiResponse::success(state.entities.set_state(&entity_id, value)))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/system/info", get(system_info))
        .route("/api/v1/pools", get(list_pools).post(create_pool))
        .route("/api/v1/pools/options", get(pool_options))
        .route("/api/v1/pools/:id", get(get_pool).delete(delete_pool))
        .route("/api/v1/pools/:id/mode", post(set_mode))
        .route("/api/v1/pools/:id/config", patch(update_config))
        .route("/api/v1/pools/:id/recompute", post(recompute))
        .route("/api/v1/entities", get(list_entities))
        .route("/api/v1/entities/:entity_id", put(put_entity))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pool_manager_api=debug,filtration_engine=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Pool Manager API server");

    let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
    let addr: SocketAddr = std::env::var("POOL_MANAGER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;

    let entities = Arc::new(EntityStore::new());
    let pools = Arc::new(PoolHost::new(&data_dir, entities.clone()));
    pools.load().await;
    tracing::info!("{} pools running", pools.registry().len());

    let state = AppState {
        pools: pools.clone(),
        entities,
    };
    let app = router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pools.shutdown().await;
    Ok(())
}
