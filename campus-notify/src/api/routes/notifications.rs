//! Notification feed routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthViewer;
use crate::api::routes::ws;
use crate::api::server::AppState;
use crate::domain::{CompositeKey, FeedCounts, FeedQuery};
use crate::notification::{DeleteTarget, Feed, NotificationService};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_feed))
        .route("/counts", get(get_counts))
        .route("/read", post(mark_read))
        .route("/read-all", post(mark_all_read))
        .route("/processed", post(mark_processed))
        .route("/delete", post(delete))
        .route("/ws", get(ws::notifications_ws))
}

// DTOs

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub keys: Vec<CompositeKey>,
}

#[derive(Debug, Deserialize)]
pub struct MarkProcessedRequest {
    pub key: CompositeKey,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub keys: Vec<CompositeKey>,
    #[serde(default)]
    pub all: bool,
}

impl DeleteRequest {
    fn into_target(self) -> ApiResult<DeleteTarget> {
        match (self.all, self.keys.is_empty()) {
            (true, true) => Ok(DeleteTarget::All),
            (false, false) => Ok(DeleteTarget::Keys(self.keys)),
            (true, false) => Err(ApiError::bad_request(
                "Specify either 'keys' or 'all', not both",
            )),
            (false, true) => Err(ApiError::bad_request("No keys to delete")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub affected: u64,
}

pub(crate) fn service(state: &AppState) -> ApiResult<Arc<NotificationService>> {
    state
        .notification_service
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("Notification service not available"))
}

// Handlers

async fn list_feed(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<Feed>> {
    let feed = service(&state)?.fetch(&viewer, &query).await?;
    Ok(Json(feed))
}

async fn get_counts(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
) -> ApiResult<Json<FeedCounts>> {
    Ok(Json(service(&state)?.counts(&viewer).await?))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
    Json(request): Json<MarkReadRequest>,
) -> ApiResult<Json<MutationResponse>> {
    if request.keys.is_empty() {
        return Ok(Json(MutationResponse { affected: 0 }));
    }
    let affected = service(&state)?.mark_read(&viewer, &request.keys).await?;
    Ok(Json(MutationResponse { affected }))
}

async fn mark_all_read(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
) -> ApiResult<Json<MutationResponse>> {
    let affected = service(&state)?.mark_all_read(&viewer).await?;
    Ok(Json(MutationResponse { affected }))
}

async fn mark_processed(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
    Json(request): Json<MarkProcessedRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let affected = service(&state)?
        .mark_processed(&viewer, &request.key)
        .await?;
    Ok(Json(MutationResponse { affected }))
}

async fn delete(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let target = request.into_target()?;
    let affected = service(&state)?.delete(&viewer, &target).await?;
    Ok(Json(MutationResponse { affected }))
}
