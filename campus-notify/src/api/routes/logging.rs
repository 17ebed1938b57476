//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AuthViewer;
use crate::api::server::AppState;
use crate::domain::Role;
use crate::logging::available_modules;

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

/// Log configuration is an operator concern; admins and above only.
fn require_admin(viewer_role: Role) -> ApiResult<()> {
    if viewer_role >= Role::Admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("Administrator role required"))
    }
}

fn response(filter: String) -> LoggingConfigResponse {
    LoggingConfigResponse {
        filter,
        available_modules: available_modules()
            .into_iter()
            .map(|(name, desc)| ModuleInfo {
                name: name.to_string(),
                description: desc.to_string(),
            })
            .collect(),
    }
}

async fn get_logging_config(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
) -> ApiResult<Json<LoggingConfigResponse>> {
    require_admin(viewer.role)?;
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;

    Ok(Json(response(logging_config.get_filter())))
}

async fn update_logging_config(
    State(state): State<AppState>,
    AuthViewer(viewer): AuthViewer,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    require_admin(viewer.role)?;
    let logging_config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))?;

    logging_config.set_filter(&request.filter)?;
    tracing::info!(identity = %viewer.identity, filter = %request.filter, "Log filter changed via API");

    Ok(Json(response(request.filter)))
}
