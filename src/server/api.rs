use crate::agent::CookingAssistant;
use crate::models::chat::Conversation;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ Path, State },
    response::Html,
    http::StatusCode,
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };
use uuid::Uuid;

const CHAT_PAGE: &str = include_str!("chat.html");

#[derive(Deserialize)]
pub struct ChatRequest {
    pub conversation_id: Option<String>,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub documents: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone)]
struct AppState {
    assistant: Arc<CookingAssistant>,
}

pub fn router(assistant: Arc<CookingAssistant>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/history/{id}", get(history_handler))
        .route("/api/reload-prompts", get(reload_prompts_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(AppState { assistant })
}

/// Binds the HTTP listener and serves the API in a background task.
pub async fn start_http_server(
    http_port: u16,
    assistant: Arc<CookingAssistant>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
    })?;
    info!("Starting HTTP server on: http://{}", addr);

    let app = router(assistant);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!("HTTP server error: {}", e);
        }
    });

    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorBody>)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorBody { error: "message must not be empty".into() })));
    }
    let conversation_id = req.conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let turn = state.assistant.respond(&conversation_id, &req.message).await;
    Ok(
        Json(ChatResponse {
            conversation_id,
            response: turn.response,
            error: turn.error,
        })
    )
}

async fn history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<Conversation>, (StatusCode, Json<ErrorBody>)> {
    state.assistant
        .history(&id).await
        .map(Json)
        .map_err(|e| {
            error!("History lookup failed for {}: {}", id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() }))
        })
}

async fn reload_prompts_handler(State(state): State<AppState>) -> (StatusCode, Json<ReloadResponse>) {
    match state.assistant.reload_prompts_if_changed().await {
        Ok(true) => (StatusCode::OK, Json(ReloadResponse { success: true, message: "Prompts reloaded".into() })),
        Ok(false) => (StatusCode::OK, Json(ReloadResponse { success: true, message: "Prompts unchanged".into() })),
        Err(e) => {
            (StatusCode::BAD_REQUEST, Json(ReloadResponse { success: false, message: format!("Reload error: {}", e) }))
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let documents = match state.assistant.document_count().await {
        Ok(n) => Some(n),
        Err(e) => {
            error!("Health check could not count documents: {}", e);
            None
        }
    };
    Json(HealthResponse { status: "ok".into(), documents })
}
