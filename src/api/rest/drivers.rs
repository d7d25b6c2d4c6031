use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::adapters::DriverRecord;
use crate::error::AppError;
use crate::models::actor::{Actor, Role};
use crate::models::assignment::Assignment;
use crate::models::driver::{DriverStatus, GeoPoint};
use crate::models::performance::{DriverPerformance, DriverRanking, RankingMetric};
use crate::state::AppState;

const DEFAULT_RANKING_LIMIT: usize = 10;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
        .route("/drivers/:id/offers", get(pending_offers))
        .route("/drivers/:id/performance", get(driver_performance))
        .route(
            "/drivers/:id/performance/refresh",
            post(refresh_driver_performance),
        )
        .route("/rankings", get(rankings))
        .route("/rankings/top", get(top_drivers))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    pub rating: f64,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize, Default)]
pub struct RankingParams {
    pub metric: Option<String>,
    pub limit: Option<usize>,
}

/// Drivers manage their own record; admins manage everyone's.
fn require_self_or_admin(actor: &Actor, driver_id: Uuid) -> Result<(), AppError> {
    if actor.role == Role::Admin {
        return Ok(());
    }
    actor.require_driver(driver_id)
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    actor.require_admin()?;
    let driver = state
        .directory
        .register(payload.name, payload.location, payload.rating)?;
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverRecord>> {
    Json(state.directory.list())
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    require_self_or_admin(&actor, id)?;
    Ok(Json(state.directory.update_status(id, payload.status)?))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    require_self_or_admin(&actor, id)?;
    Ok(Json(state.directory.update_location(id, payload.location)?))
}

async fn pending_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Vec<Assignment>>, AppError> {
    require_self_or_admin(&actor, id)?;
    Ok(Json(state.engine.pending_offers(id).await?))
}

async fn driver_performance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverPerformance>, AppError> {
    Ok(Json(state.engine.driver_performance(id).await?))
}

async fn refresh_driver_performance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<DriverPerformance>, AppError> {
    Ok(Json(
        state.engine.refresh_driver_performance(&actor, id).await?,
    ))
}

async fn top_drivers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RankingParams>,
) -> Result<Json<Vec<DriverPerformance>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_RANKING_LIMIT);
    Ok(Json(state.reporting.top_drivers(limit).await?))
}

async fn rankings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RankingParams>,
) -> Result<Json<Vec<DriverRanking>>, AppError> {
    let metric = match params.metric.as_deref() {
        Some(raw) => raw.parse::<RankingMetric>()?,
        None => RankingMetric::default(),
    };
    let limit = params.limit.unwrap_or(DEFAULT_RANKING_LIMIT);
    Ok(Json(state.reporting.rankings(metric, limit).await?))
}
