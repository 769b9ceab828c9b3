use axum::{Json, extract::State};
use std::sync::Arc;
use tracing::info;

use crate::services::auth_service;
use crate::web::models::{LoginRequest, LoginResponse};
use crate::web::{AppState, error::AppError};

pub async fn login_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = auth_service::login(&app_state.config, &payload)?;
    info!(username = %response.username, remember_me = payload.remember_me, "login succeeded");
    Ok(Json(response))
}
