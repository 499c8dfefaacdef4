use crate::config::DEFAULT_LIST_LIMIT;
use crate::gateway::error::ApiError;
use crate::gateway::protocol::*;
use crate::gateway::server::GatewayState;
use crate::pipeline::{ConversationInput, ConversationRecord, IndexStats, PipelineError, QueryResult};

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

/// Build all routes for the REST server.
pub fn build_routes(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/api/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        // Conversations
        .route(
            "/api/conversations",
            post(ingest_handler).get(list_handler),
        )
        .route(
            "/api/conversations/{id}",
            get(get_handler).delete(delete_handler),
        )
        // Retrieval
        .route("/api/search", post(search_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health
// ============================================================================

async fn health_handler(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
        uptime,
    })
}

async fn stats_handler(State(state): State<GatewayState>) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(state.index.stats()?))
}

// ============================================================================
// Conversations
// ============================================================================

async fn ingest_handler(
    State(state): State<GatewayState>,
    Json(input): Json<ConversationInput>,
) -> Result<Response, ApiError> {
    debug!(
        title = %input.meta.scenario_title,
        messages = input.messages.len(),
        "ingest request"
    );
    let id = state.index.ingest(input.meta, &input.messages).await?;
    Ok((StatusCode::CREATED, Json(IngestResponse { id })).into_response())
}

async fn list_handler(
    State(state): State<GatewayState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConversationRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 {
        return Err(PipelineError::InvalidArgument("limit must be positive".to_string()).into());
    }
    let offset = query.offset.unwrap_or(0);
    Ok(Json(state.index.list_conversations(limit, offset)?))
}

async fn get_handler(
    State(state): State<GatewayState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.index.get_conversation(&id)? {
        Some((conversation, chunks)) => {
            Ok(Json(ConversationDetail { conversation, chunks }).into_response())
        }
        None => Ok(not_found(&id)),
    }
}

async fn delete_handler(
    State(state): State<GatewayState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    if state.index.delete_conversation(&id)? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(not_found(&id))
    }
}

fn not_found(id: &Uuid) -> Response {
    let body = ErrorBody {
        error: format!("conversation {id} not found"),
        kind: "not_found".to_string(),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

// ============================================================================
// Search
// ============================================================================

async fn search_handler(
    State(state): State<GatewayState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<QueryResult>>, ApiError> {
    let top_k = req.top_k.unwrap_or(state.config.search.default_top_k);
    Ok(Json(state.index.search(&req.query, top_k).await?))
}
