use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DispatchPolicy;
use crate::engine::performance::PerformanceAggregator;
use crate::engine::selection::select_best;
use crate::engine::tasks::{OutboundTask, SideEffect, TaskQueue};
use crate::error::{AppError, AppResult};
use crate::models::actor::{Actor, Role};
use crate::models::assignment::{
    Assignment, AssignmentResolution, AssignmentStatus, ScoreBreakdown,
};
use crate::models::delivery::{
    AssignmentType, CreateDeliveryRequest, Delivery, DeliveryEvent, DeliveryQuery, DeliveryStatus,
};
use crate::models::driver::{DriverCandidate, DriverStatus, GeoPoint};
use crate::models::performance::DriverPerformance;
use crate::observability::metrics::Metrics;
use crate::ports::{Ports, TrackingInfo};
use crate::store::{AggregateChange, AssignmentStore, DeliveryStore, Stores};

/// Owns the delivery and assignment state machines and the offer protocol.
///
/// Every mutation is a single [`AggregateChange`]; side effects are queued as
/// [`OutboundTask`]s after the change is committed and never roll it back.
#[derive(Clone)]
pub struct DispatchEngine {
    deliveries: Arc<dyn DeliveryStore>,
    assignments: Arc<dyn AssignmentStore>,
    ports: Ports,
    performance: PerformanceAggregator,
    tasks: TaskQueue,
    events_tx: broadcast::Sender<DeliveryEvent>,
    policy: DispatchPolicy,
    metrics: Metrics,
}

impl DispatchEngine {
    pub fn new(
        stores: Stores,
        ports: Ports,
        policy: DispatchPolicy,
        tasks: TaskQueue,
        events_tx: broadcast::Sender<DeliveryEvent>,
        metrics: Metrics,
    ) -> Self {
        let performance = PerformanceAggregator::new(
            stores.deliveries.clone(),
            stores.assignments.clone(),
            stores.performance,
            policy.on_time_factor,
        );

        Self {
            deliveries: stores.deliveries,
            assignments: stores.assignments,
            ports,
            performance,
            tasks,
            events_tx,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn performance(&self) -> &PerformanceAggregator {
        &self.performance
    }

    pub async fn create_delivery(
        &self,
        actor: &Actor,
        request: CreateDeliveryRequest,
    ) -> AppResult<Delivery> {
        if actor.role == Role::Driver {
            return Err(AppError::Unauthorized(
                "drivers cannot create deliveries".to_string(),
            ));
        }
        if let Some(existing) = self.deliveries.find_active_by_order(request.order_id).await? {
            return Err(AppError::DuplicateDelivery {
                order_id: existing.order_id,
            });
        }

        let delivery = Delivery::new(request, Utc::now())?;
        let delivery = self.deliveries.insert_delivery(delivery).await?;

        info!(
            delivery_id = %delivery.id,
            order_id = %delivery.order_id,
            "delivery created"
        );
        self.publish(&delivery);

        if self.policy.auto_assign_on_create {
            let engine = self.clone();
            let delivery_id = delivery.id;
            tokio::spawn(async move {
                engine.reoffer(delivery_id).await;
            });
        }

        Ok(delivery)
    }

    pub async fn auto_assign_driver(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        origin: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> AppResult<Assignment> {
        if !matches!(actor.role, Role::Admin | Role::System) {
            return Err(AppError::Unauthorized(format!(
                "{} {} cannot trigger automatic assignment",
                actor.role, actor.id
            )));
        }

        self.assign_automatically(delivery_id, origin, radius_km)
            .await
    }

    pub async fn manual_assign_driver(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        driver_id: Uuid,
    ) -> AppResult<Assignment> {
        actor.require_admin()?;

        let delivery = self.load(delivery_id).await?;
        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "delivery {delivery_id} is {}; manual assignment needs pending",
                delivery.status
            )));
        }
        self.ensure_available(driver_id).await?;

        let (_, assignment) = self
            .offer(delivery, driver_id, AssignmentType::Manual, None, None)
            .await?;

        info!(
            admin_id = %actor.id,
            delivery_id = %delivery_id,
            driver_id = %driver_id,
            "delivery manually assigned"
        );
        Ok(assignment)
    }

    /// Hands a live delivery to another driver, whatever stage it is in.
    pub async fn reassign_delivery(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        new_driver_id: Uuid,
    ) -> AppResult<Assignment> {
        actor.require_admin()?;

        let mut delivery = self.load(delivery_id).await?;
        if delivery.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "delivery {delivery_id} is {} and cannot be reassigned",
                delivery.status
            )));
        }
        self.ensure_available(new_driver_id).await?;

        let previous_driver = delivery.driver_id;
        let withdrawn = self
            .withdraw_pending_offer(delivery_id, "withdrawn: reassigned")
            .await?;

        reset_to_pending(&mut delivery);
        let (committed, assignment) = self
            .offer(delivery, new_driver_id, AssignmentType::Manual, None, withdrawn)
            .await?;

        if let Some(previous) = previous_driver.filter(|previous| *previous != new_driver_id) {
            self.dispatch(
                &committed,
                vec![
                    SideEffect::SetDriverStatus {
                        driver_id: previous,
                        status: DriverStatus::Available,
                    },
                    SideEffect::DriverMessage {
                        driver_id: previous,
                        text: format!("delivery {delivery_id} has been reassigned"),
                    },
                ],
            )
            .await;
        }

        info!(
            admin_id = %actor.id,
            delivery_id = %delivery_id,
            previous_driver = ?previous_driver,
            driver_id = %new_driver_id,
            "delivery reassigned"
        );
        Ok(assignment)
    }

    pub async fn respond_to_assignment(
        &self,
        actor: &Actor,
        driver_id: Uuid,
        delivery_id: Uuid,
        accept: bool,
        reason: Option<String>,
    ) -> AppResult<Assignment> {
        actor.require_driver(driver_id)?;

        let Some(assignment) = self.assignments.find_pending(delivery_id, driver_id).await? else {
            return Err(self.missing_offer(delivery_id, driver_id).await);
        };

        let now = Utc::now();
        if assignment.is_overdue(now) {
            match self.expire_offer(&assignment).await {
                Ok(Some(reverted)) => {
                    self.reoffer(reverted.id).await;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(assignment_id = %assignment.id, error = %err, "offer already resolved");
                }
            }
            return Err(AppError::AssignmentExpired {
                assignment_id: assignment.id,
            });
        }

        let mut delivery = self.load(delivery_id).await?;
        if delivery.driver_id != Some(driver_id) {
            return Err(AppError::InvalidState(format!(
                "delivery {delivery_id} is not offered to driver {driver_id}"
            )));
        }

        let status = if accept {
            delivery.status = delivery.status.transition(DeliveryStatus::Accepted)?;
            AssignmentStatus::Accepted
        } else {
            delivery.status = delivery
                .status
                .transition(DeliveryStatus::Rejected)?
                .transition(DeliveryStatus::Pending)?;
            delivery.driver_id = None;
            delivery.assigned_at = None;
            AssignmentStatus::Rejected
        };
        delivery.updated_at = now;

        let resolution = AssignmentResolution::new(assignment.id, status).with_response(now, reason);
        let committed = self
            .commit(AggregateChange::new(delivery).resolving(Some(resolution.clone())))
            .await?;

        let mut resolved = assignment;
        resolved.status = status;
        resolved.response = resolution.response;

        if accept {
            self.metrics.offers_total.with_label_values(&["accepted"]).inc();
            info!(
                delivery_id = %delivery_id,
                driver_id = %driver_id,
                assignment_id = %resolved.id,
                "offer accepted"
            );
            self.dispatch(
                &committed,
                vec![
                    SideEffect::SetDriverStatus {
                        driver_id,
                        status: DriverStatus::Busy,
                    },
                    SideEffect::CreateRoute {
                        driver_id,
                        delivery: Box::new(committed.clone()),
                    },
                ],
            )
            .await;
        } else {
            self.metrics.offers_total.with_label_values(&["rejected"]).inc();
            info!(
                delivery_id = %delivery_id,
                driver_id = %driver_id,
                assignment_id = %resolved.id,
                reason = ?resolved.response.as_ref().and_then(|response| response.reason.as_deref()),
                "offer rejected; re-offering"
            );
            self.reoffer(delivery_id).await;
        }

        Ok(resolved)
    }

    /// Expires every overdue offer and re-offers the deliveries it orphaned.
    /// Safe to run concurrently with live traffic and with itself.
    pub async fn expire_pending_assignments(&self) -> AppResult<Vec<Assignment>> {
        let overdue = self.assignments.find_overdue(Utc::now()).await?;

        let mut expired = Vec::with_capacity(overdue.len());
        let mut reverted = Vec::new();

        for mut assignment in overdue {
            match self.expire_offer(&assignment).await {
                Ok(delivery) => {
                    if let Some(delivery) = delivery {
                        reverted.push(delivery.id);
                    }
                    assignment.status = AssignmentStatus::Expired;
                    expired.push(assignment);
                }
                Err(AppError::AssignmentExpired { .. }) | Err(AppError::InvalidState(_)) => {
                    debug!(assignment_id = %assignment.id, "offer resolved concurrently; skipping");
                }
                Err(err) => {
                    warn!(
                        assignment_id = %assignment.id,
                        error = %err,
                        "failed to expire offer; will retry on next sweep"
                    );
                }
            }
        }

        for delivery_id in reverted {
            self.reoffer(delivery_id).await;
        }

        Ok(expired)
    }

    /// Retries automatic assignment for pending deliveries with no open offer,
    /// left behind when an earlier attempt found no driver or lost a race.
    /// Deliveries never offered are only picked up when offers on create are
    /// enabled; otherwise they wait for a dispatcher.
    pub async fn reoffer_stranded_deliveries(&self) -> AppResult<Vec<Assignment>> {
        let query = DeliveryQuery {
            status: Some(DeliveryStatus::Pending),
            ..Default::default()
        };
        let pending = self.deliveries.search_deliveries(&query).await?;

        let mut offered = Vec::new();
        for delivery in pending {
            let history = self.assignments.assignments_for_delivery(delivery.id).await?;
            if history.iter().any(Assignment::is_pending) {
                continue;
            }
            if history.is_empty() && !self.policy.auto_assign_on_create {
                continue;
            }

            if let Some(assignment) = self.reoffer(delivery.id).await {
                offered.push(assignment);
            }
        }

        Ok(offered)
    }

    pub async fn pickup_order(&self, actor: &Actor, delivery_id: Uuid) -> AppResult<Delivery> {
        self.advance(actor, delivery_id, DeliveryStatus::PickedUp, None)
            .await
    }

    pub async fn start_transit(&self, actor: &Actor, delivery_id: Uuid) -> AppResult<Delivery> {
        self.advance(actor, delivery_id, DeliveryStatus::InTransit, None)
            .await
    }

    pub async fn complete_delivery(&self, actor: &Actor, delivery_id: Uuid) -> AppResult<Delivery> {
        self.advance(actor, delivery_id, DeliveryStatus::Delivered, None)
            .await
    }

    pub async fn report_issue(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        reason: String,
    ) -> AppResult<Delivery> {
        if reason.trim().is_empty() {
            return Err(AppError::BadRequest("issue reason cannot be empty".to_string()));
        }
        self.advance(actor, delivery_id, DeliveryStatus::Failed, Some(reason))
            .await
    }

    pub async fn cancel_delivery(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<Delivery> {
        let mut delivery = self.load(delivery_id).await?;

        match actor.role {
            Role::Admin | Role::System => {}
            Role::Customer
                if matches!(
                    delivery.status,
                    DeliveryStatus::Pending | DeliveryStatus::Assigned
                ) => {}
            Role::Customer => {
                return Err(AppError::Unauthorized(
                    "customers can only cancel before a driver accepts".to_string(),
                ));
            }
            Role::Driver => {
                return Err(AppError::Unauthorized(
                    "drivers cannot cancel deliveries; report an issue instead".to_string(),
                ));
            }
        }

        let was_offered = delivery.status == DeliveryStatus::Assigned;
        let now = Utc::now();
        delivery.status = delivery.status.transition(DeliveryStatus::Cancelled)?;
        delivery.cancelled_at = Some(now);
        delivery.cancellation_reason = reason;
        delivery.updated_at = now;

        let withdrawn = if was_offered {
            self.withdraw_pending_offer(delivery_id, "withdrawn: cancelled")
                .await?
        } else {
            None
        };

        let committed = self
            .commit(AggregateChange::new(delivery).resolving(withdrawn))
            .await?;

        info!(
            delivery_id = %delivery_id,
            actor_id = %actor.id,
            role = %actor.role,
            reason = ?committed.cancellation_reason,
            "delivery cancelled"
        );
        self.dispatch(&committed, transition_effects(&committed))
            .await;

        Ok(committed)
    }

    /// Caller-facing status update; routes to the dedicated operation.
    pub async fn update_status(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        status: DeliveryStatus,
        reason: Option<String>,
    ) -> AppResult<Delivery> {
        match status {
            DeliveryStatus::PickedUp => self.pickup_order(actor, delivery_id).await,
            DeliveryStatus::InTransit => self.start_transit(actor, delivery_id).await,
            DeliveryStatus::Delivered => self.complete_delivery(actor, delivery_id).await,
            DeliveryStatus::Failed => {
                let reason = reason.unwrap_or_else(|| "unspecified".to_string());
                self.report_issue(actor, delivery_id, reason).await
            }
            DeliveryStatus::Cancelled => self.cancel_delivery(actor, delivery_id, reason).await,
            DeliveryStatus::Accepted => Err(AppError::BadRequest(
                "offers are accepted by responding to the assignment".to_string(),
            )),
            DeliveryStatus::Pending | DeliveryStatus::Assigned | DeliveryStatus::Rejected => {
                Err(AppError::BadRequest(format!(
                    "status {status} is managed by the dispatcher"
                )))
            }
        }
    }

    pub async fn rate_delivery(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        rating: u8,
    ) -> AppResult<Delivery> {
        if !matches!(actor.role, Role::Customer | Role::Admin) {
            return Err(AppError::Unauthorized(format!(
                "{} {} cannot rate deliveries",
                actor.role, actor.id
            )));
        }
        if !(1..=5).contains(&rating) {
            return Err(AppError::BadRequest(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }

        let mut delivery = self.load(delivery_id).await?;
        if delivery.status != DeliveryStatus::Delivered {
            return Err(AppError::InvalidState(format!(
                "delivery {delivery_id} is {}; only delivered deliveries can be rated",
                delivery.status
            )));
        }
        if delivery.customer_rating.is_some() {
            return Err(AppError::InvalidState(format!(
                "delivery {delivery_id} is already rated"
            )));
        }

        delivery.customer_rating = Some(rating);
        delivery.updated_at = Utc::now();
        let committed = self.commit(AggregateChange::new(delivery)).await?;

        if let Some(driver_id) = committed.driver_id {
            self.dispatch(&committed, vec![SideEffect::RecomputePerformance { driver_id }])
                .await;
        }
        Ok(committed)
    }

    pub async fn get_delivery(&self, delivery_id: Uuid) -> AppResult<Delivery> {
        self.load(delivery_id).await
    }

    /// Latest delivery of an order, active or not.
    pub async fn get_delivery_by_order(&self, order_id: Uuid) -> AppResult<Delivery> {
        let query = DeliveryQuery {
            order_id: Some(order_id),
            limit: Some(1),
            ..Default::default()
        };

        self.deliveries
            .search_deliveries(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("no delivery for order {order_id}")))
    }

    pub async fn search_deliveries(&self, query: &DeliveryQuery) -> AppResult<Vec<Delivery>> {
        self.deliveries.search_deliveries(query).await
    }

    pub async fn list_assignments(&self, delivery_id: Uuid) -> AppResult<Vec<Assignment>> {
        self.load(delivery_id).await?;
        self.assignments.assignments_for_delivery(delivery_id).await
    }

    pub async fn pending_offers(&self, driver_id: Uuid) -> AppResult<Vec<Assignment>> {
        self.assignments.pending_for_driver(driver_id).await
    }

    pub async fn get_tracking(&self, delivery_id: Uuid) -> AppResult<TrackingInfo> {
        self.load(delivery_id).await?;
        self.ports.location.get_tracking(delivery_id).await
    }

    pub async fn driver_performance(&self, driver_id: Uuid) -> AppResult<DriverPerformance> {
        self.performance
            .get(driver_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no performance for driver {driver_id}")))
    }

    pub async fn refresh_driver_performance(
        &self,
        actor: &Actor,
        driver_id: Uuid,
    ) -> AppResult<DriverPerformance> {
        actor.require_admin()?;
        self.performance.recompute(driver_id).await
    }

    async fn assign_automatically(
        &self,
        delivery_id: Uuid,
        origin: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> AppResult<Assignment> {
        let started = Instant::now();
        let result = self.select_and_offer(delivery_id, origin, radius_km).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::NoDriversAvailable) => "no_drivers",
            Err(_) => "error",
        };
        self.metrics
            .assignment_latency_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn select_and_offer(
        &self,
        delivery_id: Uuid,
        origin: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> AppResult<Assignment> {
        let delivery = self.load(delivery_id).await?;
        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "delivery {delivery_id} is {}; automatic assignment needs pending",
                delivery.status
            )));
        }

        let origin = origin.unwrap_or(delivery.pickup.location);
        let radius_km = radius_km.unwrap_or(self.policy.search_radius_km);
        let candidates = self
            .ports
            .directory
            .find_available(origin, radius_km)
            .await?;
        if candidates.is_empty() {
            return Err(AppError::NoDriversAvailable);
        }

        // Drivers who already turned this delivery down or let the offer
        // lapse go last: they are only retried when nobody else is around.
        let declined: HashSet<Uuid> = self
            .assignments
            .assignments_for_delivery(delivery_id)
            .await?
            .into_iter()
            .filter(|previous| previous.status == AssignmentStatus::Rejected || previous.lapsed())
            .map(|previous| previous.driver_id)
            .collect();
        let fresh: Vec<DriverCandidate> = candidates
            .iter()
            .filter(|candidate| !declined.contains(&candidate.driver_id))
            .cloned()
            .collect();
        let pool = if fresh.is_empty() { &candidates } else { &fresh };

        let (chosen, breakdown) =
            select_best(pool, &self.policy.weights).ok_or(AppError::NoDriversAvailable)?;
        let driver_id = chosen.driver_id;

        let (_, assignment) = self
            .offer(
                delivery,
                driver_id,
                AssignmentType::Auto,
                Some(breakdown),
                None,
            )
            .await?;
        Ok(assignment)
    }

    async fn offer(
        &self,
        mut delivery: Delivery,
        driver_id: Uuid,
        assignment_type: AssignmentType,
        score: Option<ScoreBreakdown>,
        withdrawn: Option<AssignmentResolution>,
    ) -> AppResult<(Delivery, Assignment)> {
        let now = Utc::now();
        delivery.status = delivery.status.transition(DeliveryStatus::Assigned)?;
        delivery.driver_id = Some(driver_id);
        delivery.assignment_type = assignment_type;
        delivery.assigned_at = Some(now);
        delivery.updated_at = now;

        let mut assignment = Assignment::offer(
            delivery.id,
            driver_id,
            assignment_type,
            now,
            self.policy.offer_ttl(assignment_type),
        );
        if let Some(score) = score {
            assignment = assignment.with_score(score);
        }

        let change = AggregateChange::new(delivery)
            .resolving(withdrawn)
            .offering(assignment.clone());
        let committed = self.commit(change).await?;

        self.metrics.offers_total.with_label_values(&["offered"]).inc();
        info!(
            delivery_id = %committed.id,
            driver_id = %driver_id,
            assignment_id = %assignment.id,
            kind = ?assignment_type,
            score = assignment.score.as_ref().map(|score| score.total),
            expires_at = %assignment.expires_at,
            "delivery offered"
        );

        self.dispatch(
            &committed,
            vec![SideEffect::AssignmentOffer {
                driver_id,
                delivery: Box::new(committed.clone()),
            }],
        )
        .await;

        Ok((committed, assignment))
    }

    /// Expires one offer; returns the delivery when it went back to pending.
    async fn expire_offer(&self, assignment: &Assignment) -> AppResult<Option<Delivery>> {
        let mut delivery = self.load(assignment.delivery_id).await?;

        let reverts = delivery.status == DeliveryStatus::Assigned
            && delivery.driver_id == Some(assignment.driver_id);
        if reverts {
            reset_to_pending(&mut delivery);
            delivery.updated_at = Utc::now();
        }

        let resolution = AssignmentResolution::new(assignment.id, AssignmentStatus::Expired);
        let committed = self
            .commit(AggregateChange::new(delivery).resolving(Some(resolution)))
            .await?;

        self.metrics.offers_total.with_label_values(&["expired"]).inc();
        warn!(
            assignment_id = %assignment.id,
            delivery_id = %assignment.delivery_id,
            driver_id = %assignment.driver_id,
            "offer expired"
        );
        self.dispatch(
            &committed,
            vec![SideEffect::DriverMessage {
                driver_id: assignment.driver_id,
                text: format!("your offer for delivery {} has expired", assignment.delivery_id),
            }],
        )
        .await;

        Ok(reverts.then_some(committed))
    }

    /// Error for a response with no pending offer behind it. An offer the
    /// sweep already expired still answers with `AssignmentExpired`; one the
    /// dispatcher withdrew answers with `InvalidState`.
    async fn missing_offer(&self, delivery_id: Uuid, driver_id: Uuid) -> AppError {
        let latest = match self.assignments.assignments_for_delivery(delivery_id).await {
            Ok(assignments) => assignments
                .into_iter()
                .filter(|assignment| assignment.driver_id == driver_id)
                .max_by_key(|assignment| assignment.offered_at),
            Err(err) => return err,
        };

        match latest {
            Some(assignment) if assignment.withdrawn => AppError::InvalidState(format!(
                "offer {} for delivery {delivery_id} was withdrawn",
                assignment.id
            )),
            Some(assignment) if assignment.status == AssignmentStatus::Expired => {
                AppError::AssignmentExpired {
                    assignment_id: assignment.id,
                }
            }
            _ => AppError::AssignmentNotFound {
                delivery_id,
                driver_id,
            },
        }
    }

    async fn withdraw_pending_offer(
        &self,
        delivery_id: Uuid,
        reason: &str,
    ) -> AppResult<Option<AssignmentResolution>> {
        Ok(self
            .assignments
            .pending_for_delivery(delivery_id)
            .await?
            .map(|pending| AssignmentResolution::withdraw(pending.id, Utc::now(), reason)))
    }

    /// Automatic re-offer after a rejection or lapse. Failures leave the
    /// delivery pending for the next attempt.
    async fn reoffer(&self, delivery_id: Uuid) -> Option<Assignment> {
        match self.assign_automatically(delivery_id, None, None).await {
            Ok(assignment) => Some(assignment),
            Err(AppError::NoDriversAvailable) => {
                warn!(delivery_id = %delivery_id, "no drivers available; delivery stays pending");
                None
            }
            Err(err) => {
                warn!(delivery_id = %delivery_id, error = %err, "automatic offer failed");
                None
            }
        }
    }

    async fn advance(
        &self,
        actor: &Actor,
        delivery_id: Uuid,
        next: DeliveryStatus,
        reason: Option<String>,
    ) -> AppResult<Delivery> {
        let mut delivery = self.load(delivery_id).await?;
        let driver_id = delivery.driver_id.ok_or_else(|| {
            AppError::InvalidState(format!("delivery {delivery_id} has no driver attached"))
        })?;
        actor.require_driver(driver_id)?;

        let now = Utc::now();
        delivery.status = delivery.status.transition(next)?;
        delivery.updated_at = now;
        match next {
            DeliveryStatus::PickedUp => delivery.picked_up_at = Some(now),
            DeliveryStatus::Delivered => {
                delivery.delivered_at = Some(now);
                delivery.actual_minutes = delivery.elapsed_minutes();
            }
            DeliveryStatus::Failed => {
                if let Some(reason) = &reason {
                    delivery.append_note(&format!("issue reported: {reason}"));
                }
            }
            _ => {}
        }

        let committed = self.commit(AggregateChange::new(delivery)).await?;

        info!(
            delivery_id = %delivery_id,
            driver_id = %driver_id,
            status = %committed.status,
            "delivery advanced"
        );
        self.dispatch(&committed, transition_effects(&committed))
            .await;

        Ok(committed)
    }

    async fn ensure_available(&self, driver_id: Uuid) -> AppResult<()> {
        if self.ports.directory.is_available(driver_id).await? {
            Ok(())
        } else {
            Err(AppError::InvalidState(format!(
                "driver {driver_id} is not available"
            )))
        }
    }

    async fn load(&self, delivery_id: Uuid) -> AppResult<Delivery> {
        self.deliveries
            .get_delivery(delivery_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))
    }

    async fn commit(&self, change: AggregateChange) -> AppResult<Delivery> {
        let committed = self.deliveries.commit(change).await?;

        self.metrics
            .transitions_total
            .with_label_values(&[committed.status.as_str()])
            .inc();
        self.publish(&committed);

        Ok(committed)
    }

    async fn dispatch(&self, delivery: &Delivery, effects: Vec<SideEffect>) {
        for effect in effects {
            let task = OutboundTask::new(delivery, effect);
            let key = task.dedupe_key();
            if let Err(err) = self.tasks.enqueue(task).await {
                error!(task = %key, error = %err, "failed to enqueue side-effect task");
            }
        }
    }

    fn publish(&self, delivery: &Delivery) {
        let _ = self.events_tx.send(DeliveryEvent::from(delivery));
    }
}

fn reset_to_pending(delivery: &mut Delivery) {
    delivery.status = DeliveryStatus::Pending;
    delivery.driver_id = None;
    delivery.assigned_at = None;
}

/// Side effects owed for entering the delivery's current status.
pub fn transition_effects(delivery: &Delivery) -> Vec<SideEffect> {
    let mut effects = Vec::new();
    let status = delivery.status;

    if matches!(
        status,
        DeliveryStatus::PickedUp
            | DeliveryStatus::InTransit
            | DeliveryStatus::Delivered
            | DeliveryStatus::Cancelled
            | DeliveryStatus::Failed
    ) {
        effects.push(SideEffect::OrderSync {
            order_id: delivery.order_id,
            status: status.order_status(),
        });
        effects.push(SideEffect::StatusUpdate {
            order_id: delivery.order_id,
            status,
        });
    }

    match (status, delivery.driver_id) {
        (DeliveryStatus::Delivered, driver) => {
            effects.push(SideEffect::Payout {
                delivery_id: delivery.id,
            });
            if let Some(driver_id) = driver {
                effects.push(SideEffect::SetDriverStatus {
                    driver_id,
                    status: DriverStatus::Available,
                });
                effects.push(SideEffect::RecomputePerformance { driver_id });
            }
        }
        (DeliveryStatus::Cancelled, Some(driver_id)) => {
            effects.push(SideEffect::SetDriverStatus {
                driver_id,
                status: DriverStatus::Available,
            });
            effects.push(SideEffect::RecomputePerformance { driver_id });
        }
        (DeliveryStatus::Failed, Some(driver_id)) => {
            effects.push(SideEffect::SetDriverStatus {
                driver_id,
                status: DriverStatus::Available,
            });
        }
        _ => {}
    }

    effects
}
