//! Query routes over the CoT store.

use crate::auth::{Authenticator, CatalystClaims};
use crate::error::ApiError;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use takbridge_cot::Event;
use takbridge_store::{CotStore, FileContent};
use tracing::{debug, info};

#[derive(Clone)]
pub struct ApiState {
    pub store: CotStore,
    pub auth: Authenticator,
}

/// A request that passed bearer verification.
#[derive(Debug, Clone)]
pub struct Caller(pub Option<CatalystClaims>);

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let claims = state.auth.authenticate(&parts.headers).await?;
        Ok(Caller(claims))
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cots", get(list_cots))
        .route("/cots/{uid}", get(get_cot).delete(delete_cot))
        .route("/cots/{uid}/file", get(get_cot_file))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// GET /cots - every live event
async fn list_cots(State(state): State<ApiState>, _caller: Caller) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.store.get_all().await?;
    debug!(count = events.len(), "Listing CoT events");
    Ok(Json(events))
}

async fn get_cot(
    State(state): State<ApiState>,
    _caller: Caller,
    Path(uid): Path<String>,
) -> Result<Json<Event>, ApiError> {
    state
        .store
        .get(&uid)
        .await?
        .map(Json)
        .ok_or_else(|| takbridge_core::StoreError::NotFound { uid }.into())
}

/// GET /cots/{uid}/file - base64 file-share artifact
async fn get_cot_file(
    State(state): State<ApiState>,
    _caller: Caller,
    Path(uid): Path<String>,
) -> Result<Json<FileContent>, ApiError> {
    Ok(Json(state.store.get_file(&uid).await?))
}

async fn delete_cot(
    State(state): State<ApiState>,
    caller: Caller,
    Path(uid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.delete(&uid).await?;
    let subject = caller.0.and_then(|c| c.sub).unwrap_or_default();
    info!(uid = %uid, deleted, subject = %subject, "CoT delete requested");
    Ok(Json(json!({ "deleted": deleted })))
}
