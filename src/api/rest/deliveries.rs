use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::assignment::Assignment;
use crate::models::delivery::{CreateDeliveryRequest, Delivery, DeliveryQuery, DeliveryStatus};
use crate::models::driver::GeoPoint;
use crate::ports::TrackingInfo;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery).get(search_deliveries))
        .route("/deliveries/:id", get(get_delivery))
        .route("/orders/:order_id/delivery", get(get_delivery_by_order))
        .route("/deliveries/:id/assignments", get(list_assignments))
        .route("/deliveries/:id/tracking", get(get_tracking))
        .route("/deliveries/:id/auto-assign", post(auto_assign))
        .route("/deliveries/:id/assign", post(manual_assign))
        .route("/deliveries/:id/reassign", post(reassign))
        .route("/deliveries/:id/respond", post(respond))
        .route("/deliveries/:id/pickup", post(pickup))
        .route("/deliveries/:id/transit", post(start_transit))
        .route("/deliveries/:id/complete", post(complete))
        .route("/deliveries/:id/issue", post(report_issue))
        .route("/deliveries/:id/cancel", post(cancel))
        .route("/deliveries/:id/rating", post(rate))
        .route("/deliveries/:id/status", patch(update_status))
}

#[derive(Deserialize, Default)]
pub struct AutoAssignRequest {
    pub origin: Option<GeoPoint>,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub accept: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct IssueRequest {
    pub reason: String,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub rating: u8,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state.engine.create_delivery(&actor, payload).await?;
    Ok(Json(delivery))
}

async fn search_deliveries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeliveryQuery>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    let deliveries = state.engine.search_deliveries(&query).await?;
    Ok(Json(deliveries))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(state.engine.get_delivery(id).await?))
}

async fn get_delivery_by_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(state.engine.get_delivery_by_order(order_id).await?))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    Ok(Json(state.engine.list_assignments(id).await?))
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingInfo>, AppError> {
    Ok(Json(state.engine.get_tracking(id).await?))
}

async fn auto_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    payload: Option<Json<AutoAssignRequest>>,
) -> Result<Json<Assignment>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    let assignment = state
        .engine
        .auto_assign_driver(&actor, id, payload.origin, payload.radius_km)
        .await?;
    Ok(Json(assignment))
}

async fn manual_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = state
        .engine
        .manual_assign_driver(&actor, id, payload.driver_id)
        .await?;
    Ok(Json(assignment))
}

async fn reassign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = state
        .engine
        .reassign_delivery(&actor, id, payload.driver_id)
        .await?;
    Ok(Json(assignment))
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = state
        .engine
        .respond_to_assignment(&actor, actor.id, id, payload.accept, payload.reason)
        .await?;
    Ok(Json(assignment))
}

async fn pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(state.engine.pickup_order(&actor, id).await?))
}

async fn start_transit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(state.engine.start_transit(&actor, id).await?))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(state.engine.complete_delivery(&actor, id).await?))
}

async fn report_issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<IssueRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state.engine.report_issue(&actor, id, payload.reason).await?,
    ))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Delivery>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    Ok(Json(
        state.engine.cancel_delivery(&actor, id, payload.reason).await?,
    ))
}

async fn rate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Delivery>, AppError> {
    Ok(Json(
        state.engine.rate_delivery(&actor, id, payload.rating).await?,
    ))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .engine
        .update_status(&actor, id, payload.status, payload.reason)
        .await?;
    Ok(Json(delivery))
}
