use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
    Admin,
    Customer,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Driver => "driver",
            Role::Admin => "admin",
            Role::Customer => "customer",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "driver" => Ok(Role::Driver),
            "admin" => Ok(Role::Admin),
            "customer" => Ok(Role::Customer),
            "system" => Ok(Role::System),
            other => Err(AppError::BadRequest(format!("unknown role: {other}"))),
        }
    }
}

/// Caller identity. Authentication happens upstream; the engine only checks
/// role and ownership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn driver(id: Uuid) -> Self {
        Self::new(id, Role::Driver)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn customer(id: Uuid) -> Self {
        Self::new(id, Role::Customer)
    }

    pub fn system() -> Self {
        Self::new(Uuid::nil(), Role::System)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "{} {} is not an admin",
                self.role, self.id
            )))
        }
    }

    /// The actor must be the given driver.
    pub fn require_driver(&self, driver_id: Uuid) -> AppResult<()> {
        if self.role == Role::Driver && self.id == driver_id {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "{} {} does not act for driver {driver_id}",
                self.role, self.id
            )))
        }
    }
}
