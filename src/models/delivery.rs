use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Rejected,
    Cancelled,
    Failed,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 9] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Assigned,
        DeliveryStatus::Accepted,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::Delivered,
        DeliveryStatus::Rejected,
        DeliveryStatus::Cancelled,
        DeliveryStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Rejected => "rejected",
            DeliveryStatus::Cancelled => "cancelled",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled | DeliveryStatus::Failed
        )
    }

    /// The complete transition table. `Rejected -> Pending` is only taken by
    /// the engine when it restarts the offer cycle.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;

        match self {
            Pending => matches!(next, Assigned | Cancelled),
            Assigned => matches!(next, Accepted | Rejected | Cancelled),
            Accepted => matches!(next, PickedUp | Cancelled),
            PickedUp => matches!(next, InTransit | Delivered | Failed),
            InTransit => matches!(next, Delivered | Failed),
            Rejected => matches!(next, Pending),
            Delivered | Cancelled | Failed => false,
        }
    }

    pub fn transition(self, next: DeliveryStatus) -> AppResult<DeliveryStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Coarser vocabulary used by the order service.
    pub fn order_status(self) -> OrderStatus {
        match self {
            DeliveryStatus::PickedUp => OrderStatus::PickedUp,
            DeliveryStatus::InTransit => OrderStatus::InTransit,
            DeliveryStatus::Delivered => OrderStatus::Delivered,
            DeliveryStatus::Cancelled => OrderStatus::Cancelled,
            _ => OrderStatus::InProgress,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown delivery status: {raw}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    InProgress,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::InProgress => "in_progress",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub line: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeliveryRequest {
    pub order_id: Uuid,
    pub pickup: Address,
    pub dropoff: Address,
    pub estimated_minutes: u32,
    pub distance_km: f64,
    pub delivery_fee: f64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub assignment_type: AssignmentType,
    pub pickup: Address,
    pub dropoff: Address,
    pub estimated_minutes: u32,
    pub actual_minutes: Option<f64>,
    pub distance_km: f64,
    pub delivery_fee: f64,
    pub priority: Priority,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub customer_rating: Option<u8>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every commit.
    pub version: u64,
}

impl Delivery {
    pub fn new(request: CreateDeliveryRequest, now: DateTime<Utc>) -> AppResult<Self> {
        if request.estimated_minutes == 0 {
            return Err(AppError::BadRequest(
                "estimated_minutes must be > 0".to_string(),
            ));
        }
        if request.distance_km < 0.0 || !request.distance_km.is_finite() {
            return Err(AppError::BadRequest(
                "distance_km must be a non-negative number".to_string(),
            ));
        }
        if request.delivery_fee < 0.0 || !request.delivery_fee.is_finite() {
            return Err(AppError::BadRequest(
                "delivery_fee must be a non-negative number".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            driver_id: None,
            status: DeliveryStatus::Pending,
            assignment_type: AssignmentType::Auto,
            pickup: request.pickup,
            dropoff: request.dropoff,
            estimated_minutes: request.estimated_minutes,
            actual_minutes: None,
            distance_km: request.distance_km,
            delivery_fee: request.delivery_fee,
            priority: request.priority,
            notes: request.notes,
            cancellation_reason: None,
            customer_rating: None,
            assigned_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Minutes between pickup and drop-off, when both are known.
    pub fn elapsed_minutes(&self) -> Option<f64> {
        match (self.picked_up_at, self.delivered_at) {
            (Some(picked_up), Some(delivered)) => {
                Some((delivered - picked_up).num_seconds() as f64 / 60.0)
            }
            _ => None,
        }
    }

    pub fn append_note(&mut self, note: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        });
    }
}

/// Filter for delivery searches. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryQuery {
    pub status: Option<DeliveryStatus>,
    pub driver_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub assignment_type: Option<AssignmentType>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl DeliveryQuery {
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.status.is_none_or(|status| delivery.status == status)
            && self
                .driver_id
                .is_none_or(|driver_id| delivery.driver_id == Some(driver_id))
            && self
                .order_id
                .is_none_or(|order_id| delivery.order_id == order_id)
            && self
                .assignment_type
                .is_none_or(|kind| delivery.assignment_type == kind)
    }
}

/// Published on every committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub at: DateTime<Utc>,
}

impl From<&Delivery> for DeliveryEvent {
    fn from(delivery: &Delivery) -> Self {
        Self {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            driver_id: delivery.driver_id,
            status: delivery.status,
            at: delivery.updated_at,
        }
    }
}
