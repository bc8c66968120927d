//! Anonymous voter identity
//!
//! Issues a short-lived token tying retried requests to one voter. Who the
//! voter "really" is stays out of scope: the id is minted here and never
//! stored.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::http::{AppError, AppResult, AppState};
use livepoll_core::models::VoterId;
use livepoll_core::service::Claims;

#[derive(Debug, Serialize, Deserialize)]
pub struct AnonAuthResponse {
    pub token: String,
    pub voter_id: String,
    pub name: String,
}

/// POST /api/auth/anon
pub async fn anon_auth(State(state): State<AppState>) -> AppResult<Json<AnonAuthResponse>> {
    let voter_id = VoterId::new();
    let name = format!("anon-{}", &voter_id.as_str()[..8]);

    let token = state.token_service.issue(&voter_id, &name)?;

    Ok(Json(AnonAuthResponse {
        token,
        voter_id: voter_id.as_str().to_string(),
        name,
    }))
}

/// Extract and verify the bearer token on an authenticated route
pub fn require_voter(state: &AppState, headers: &HeaderMap) -> Result<Claims, AppError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    Ok(state.token_service.verify(token)?)
}
