use std::env;
use std::time::Duration;

use crate::engine::selection::SelectionWeights;
use crate::engine::tasks::RetryPolicy;
use crate::error::AppError;
use crate::models::delivery::AssignmentType;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub task_queue_size: usize,
    pub event_buffer_size: usize,
    pub sweep_interval: Duration,
    pub policy: DispatchPolicy,
}

/// Tunables of the offer protocol, injected into the engine at construction.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub weights: SelectionWeights,
    pub auto_offer_ttl: Duration,
    pub manual_offer_ttl: Duration,
    pub on_time_factor: f64,
    pub search_radius_km: f64,
    pub auto_assign_on_create: bool,
    pub retry: RetryPolicy,
    /// How long a delivered side-effect task is remembered for deduplication.
    pub task_dedupe_window: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            weights: SelectionWeights::default(),
            auto_offer_ttl: Duration::from_secs(5 * 60),
            manual_offer_ttl: Duration::from_secs(10 * 60),
            on_time_factor: 1.1,
            search_radius_km: 10.0,
            auto_assign_on_create: true,
            retry: RetryPolicy::default(),
            task_dedupe_window: Duration::from_secs(15 * 60),
        }
    }
}

impl DispatchPolicy {
    pub fn offer_ttl(&self, assignment_type: AssignmentType) -> chrono::Duration {
        let ttl = match assignment_type {
            AssignmentType::Auto => self.auto_offer_ttl,
            AssignmentType::Manual => self.manual_offer_ttl,
        };
        chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
    }

    fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let weights = SelectionWeights {
            distance: parse_or_default("DISTANCE_WEIGHT", defaults.weights.distance)?,
            rating: parse_or_default("RATING_WEIGHT", defaults.weights.rating)?,
        };
        if weights.distance < 0.0 || weights.rating < 0.0 {
            return Err(AppError::Internal(
                "selection weights must be non-negative".to_string(),
            ));
        }

        let retry = RetryPolicy {
            max_attempts: parse_or_default("TASK_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_backoff: Duration::from_millis(parse_or_default(
                "TASK_BASE_BACKOFF_MS",
                defaults.retry.base_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_or_default(
                "TASK_MAX_BACKOFF_MS",
                defaults.retry.max_backoff.as_millis() as u64,
            )?),
        };

        Ok(Self {
            weights,
            auto_offer_ttl: Duration::from_secs(parse_or_default(
                "AUTO_OFFER_TTL_SECS",
                defaults.auto_offer_ttl.as_secs(),
            )?),
            manual_offer_ttl: Duration::from_secs(parse_or_default(
                "MANUAL_OFFER_TTL_SECS",
                defaults.manual_offer_ttl.as_secs(),
            )?),
            on_time_factor: parse_or_default("ON_TIME_FACTOR", defaults.on_time_factor)?,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", defaults.search_radius_km)?,
            auto_assign_on_create: parse_or_default(
                "AUTO_ASSIGN_ON_CREATE",
                defaults.auto_assign_on_create,
            )?,
            retry,
            task_dedupe_window: Duration::from_secs(parse_or_default(
                "TASK_DEDUPE_WINDOW_SECS",
                defaults.task_dedupe_window.as_secs(),
            )?),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            task_queue_size: parse_or_default("TASK_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            sweep_interval: Duration::from_secs(parse_or_default("SWEEP_INTERVAL_SECS", 30)?),
            policy: DispatchPolicy::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runtime cannot start with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.sweep_interval.is_zero() {
            return Err(AppError::Internal(
                "SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.task_queue_size == 0 || self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "TASK_QUEUE_SIZE and EVENT_BUFFER_SIZE must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, DispatchPolicy};
    use crate::error::AppError;
    use crate::models::delivery::AssignmentType;

    fn config(sweep_interval: Duration) -> Config {
        Config {
            http_port: 3000,
            log_level: "info".to_string(),
            task_queue_size: 1024,
            event_buffer_size: 1024,
            sweep_interval,
            policy: DispatchPolicy::default(),
        }
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let err = config(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, AppError::Internal(message) if message.contains("SWEEP_INTERVAL_SECS")));

        assert!(config(Duration::from_secs(1)).validate().is_ok());
    }

    #[test]
    fn default_policy_uses_documented_windows() {
        let policy = DispatchPolicy::default();

        assert_eq!(policy.offer_ttl(AssignmentType::Auto).num_minutes(), 5);
        assert_eq!(policy.offer_ttl(AssignmentType::Manual).num_minutes(), 10);
        assert_eq!(policy.weights.distance, 0.7);
        assert_eq!(policy.weights.rating, 0.3);
        assert_eq!(policy.on_time_factor, 1.1);
    }
}
