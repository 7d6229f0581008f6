use crate::error::StratusError;
use crate::server::router::StratusState;
use crate::service::{InstallOutcome, ModuleListing, RemoveOutcome};

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub modules: Vec<String>,
    /// Pull existing cloud resources of the new modules right after installing.
    #[serde(default = "default_sync")]
    pub sync: bool,
}

fn default_sync() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

async fn list_modules(
    State(state): State<StratusState>,
    body: Option<Json<ListRequest>>,
) -> Result<Json<ModuleListing>, StratusError> {
    let Json(req) = body.unwrap_or_default();
    Ok(Json(state.engine.list(req.target).await?))
}

async fn install_modules(
    State(state): State<StratusState>,
    Json(req): Json<InstallRequest>,
) -> Result<Json<InstallOutcome>, StratusError> {
    let outcome = state
        .engine
        .install(req.target, req.modules, req.sync)
        .await?;
    info!(target = %outcome.target, installed = ?outcome.installed, "Modules installed");
    Ok(Json(outcome))
}

async fn remove_modules(
    State(state): State<StratusState>,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<RemoveOutcome>, StratusError> {
    let outcome = state.engine.remove(req.target, req.modules).await?;
    info!(target = %outcome.target, removed = ?outcome.removed, "Modules removed");
    Ok(Json(outcome))
}

/// Catalog operations served elsewhere.
async fn placeholder() -> Json<&'static str> {
    Json("ok")
}

pub fn router() -> Router<StratusState> {
    Router::new()
        .route("/v1/module/list", post(list_modules))
        .route("/v1/module/install", post(install_modules))
        .route("/v1/module/remove", post(remove_modules))
        .route("/v1/module/search", post(placeholder))
        .route("/v1/module/show", post(placeholder))
        .route("/v1/module/upgrade", post(placeholder))
}
