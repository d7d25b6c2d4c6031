use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::delivery::AssignmentType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Rejected => "rejected",
            AssignmentStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance_score: f64,
    pub rating_score: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentResponse {
    pub responded_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    pub assignment_type: AssignmentType,
    pub status: AssignmentStatus,
    pub response: Option<AssignmentResponse>,
    /// Set when the dispatcher pulled the offer (cancellation, reassignment)
    /// rather than the driver letting it lapse.
    #[serde(default)]
    pub withdrawn: bool,
    pub score: Option<ScoreBreakdown>,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Assignment {
    pub fn offer(
        delivery_id: Uuid,
        driver_id: Uuid,
        assignment_type: AssignmentType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            delivery_id,
            driver_id,
            assignment_type,
            status: AssignmentStatus::Pending,
            response: None,
            withdrawn: false,
            score: None,
            offered_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn with_score(mut self, score: ScoreBreakdown) -> Self {
        self.score = Some(score);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == AssignmentStatus::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now > self.expires_at
    }

    /// Expired because the driver never answered.
    pub fn lapsed(&self) -> bool {
        self.status == AssignmentStatus::Expired && !self.withdrawn
    }
}

/// Moves one pending assignment to its final status.
#[derive(Debug, Clone)]
pub struct AssignmentResolution {
    pub assignment_id: Uuid,
    pub status: AssignmentStatus,
    pub response: Option<AssignmentResponse>,
    pub withdrawn: bool,
}

impl AssignmentResolution {
    pub fn new(assignment_id: Uuid, status: AssignmentStatus) -> Self {
        Self {
            assignment_id,
            status,
            response: None,
            withdrawn: false,
        }
    }

    /// Closes an offer on the dispatcher's side; it ends up `expired`.
    pub fn withdraw(assignment_id: Uuid, at: DateTime<Utc>, reason: &str) -> Self {
        Self {
            withdrawn: true,
            ..Self::new(assignment_id, AssignmentStatus::Expired)
        }
        .with_response(at, Some(reason.to_string()))
    }

    pub fn with_response(mut self, responded_at: DateTime<Utc>, reason: Option<String>) -> Self {
        self.response = Some(AssignmentResponse {
            responded_at,
            reason,
        });
        self
    }
}
