use crate::engine::{Direction, PassPlan, PassReport};
use crate::error::StratusError;
use crate::server::router::StratusState;
use crate::service::TargetInfo;

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};
use stratus_cloud::Credentials;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub target: String,
    pub credentials: Credentials,
    /// Empty uses `cloud.default_regions`.
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    #[serde(default)]
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Apply
}

async fn connect(
    State(state): State<StratusState>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<TargetInfo>, StratusError> {
    let info = state
        .engine
        .connect(req.target, req.credentials, req.regions)
        .await?;
    info!(target = %info.target, regions = ?info.regions, "Target connected");
    Ok(Json(info))
}

async fn disconnect(
    State(state): State<StratusState>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<Value>, StratusError> {
    state.engine.disconnect(req.target.clone()).await?;
    info!(target = %req.target, "Target disconnected");
    Ok(Json(json!({ "target": req.target, "disconnected": true })))
}

/// A pass with per-record failures answers with the failure summary instead of the report.
async fn apply(
    State(state): State<StratusState>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<PassReport>, StratusError> {
    let report = state.engine.apply(req.target).await?;
    Ok(Json(report.into_result()?))
}

async fn sync(
    State(state): State<StratusState>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<PassReport>, StratusError> {
    let report = state.engine.sync(req.target).await?;
    Ok(Json(report.into_result()?))
}

async fn plan(
    State(state): State<StratusState>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<PassPlan>, StratusError> {
    Ok(Json(state.engine.plan(req.target, req.direction).await?))
}

pub fn router() -> Router<StratusState> {
    Router::new()
        .route("/v1/target/connect", post(connect))
        .route("/v1/target/disconnect", post(disconnect))
        .route("/v1/target/apply", post(apply))
        .route("/v1/target/sync", post(sync))
        .route("/v1/target/plan", post(plan))
}
