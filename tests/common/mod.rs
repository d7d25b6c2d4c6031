#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use delivery_dispatch::adapters::{InMemoryDriverDirectory, InMemoryLocationService};
use delivery_dispatch::config::DispatchPolicy;
use delivery_dispatch::engine::DispatchEngine;
use delivery_dispatch::engine::tasks::{RetryPolicy, run_task_worker};
use delivery_dispatch::error::{AppError, AppResult};
use delivery_dispatch::models::actor::Actor;
use delivery_dispatch::models::delivery::{
    Address, CreateDeliveryRequest, Delivery, DeliveryStatus, OrderStatus,
};
use delivery_dispatch::models::driver::GeoPoint;
use delivery_dispatch::ports::{NotificationSink, OrderStatusSync, PayoutTrigger, Ports};
use delivery_dispatch::state::AppState;
use uuid::Uuid;

pub const PICKUP: GeoPoint = GeoPoint { lat: 0.0, lng: 0.0 };

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Offer { driver_id: Uuid, delivery_id: Uuid },
    DriverMessage { driver_id: Uuid, text: String },
    StatusUpdate { order_id: Uuid, status: DeliveryStatus },
    OrderSync { order_id: Uuid, status: OrderStatus },
    Payout { delivery_id: Uuid },
}

/// Records every outbound call; payouts can be told to fail a few times.
#[derive(Default)]
pub struct RecordingOutbound {
    calls: Mutex<Vec<Recorded>>,
    payout_failures: AtomicU32,
}

impl RecordingOutbound {
    pub fn fail_next_payouts(&self, times: u32) {
        self.payout_failures.store(times, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contains(&self, call: &Recorded) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    pub fn offers_to(&self, driver_id: Uuid) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, Recorded::Offer { driver_id: id, .. } if *id == driver_id))
            .count()
    }

    fn record(&self, call: Recorded) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl NotificationSink for RecordingOutbound {
    async fn send_assignment_offer(&self, driver_id: Uuid, delivery: &Delivery) -> AppResult<()> {
        self.record(Recorded::Offer {
            driver_id,
            delivery_id: delivery.id,
        });
        Ok(())
    }

    async fn send_status_update(&self, order_id: Uuid, status: DeliveryStatus) -> AppResult<()> {
        self.record(Recorded::StatusUpdate { order_id, status });
        Ok(())
    }

    async fn send_driver_message(&self, driver_id: Uuid, text: &str) -> AppResult<()> {
        self.record(Recorded::DriverMessage {
            driver_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl OrderStatusSync for RecordingOutbound {
    async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<()> {
        self.record(Recorded::OrderSync { order_id, status });
        Ok(())
    }
}

#[async_trait]
impl PayoutTrigger for RecordingOutbound {
    async fn request_payout(&self, delivery_id: Uuid) -> AppResult<()> {
        let left = self.payout_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.payout_failures.store(left - 1, Ordering::SeqCst);
            return Err(AppError::DependencyFailure("payout gateway timeout".to_string()));
        }
        self.record(Recorded::Payout { delivery_id });
        Ok(())
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub outbound: Arc<RecordingOutbound>,
}

impl Harness {
    pub fn engine(&self) -> &DispatchEngine {
        &self.state.engine
    }

    pub fn directory(&self) -> &InMemoryDriverDirectory {
        &self.state.directory
    }

    pub fn register_driver(&self, name: &str, lat: f64, rating: f64) -> Uuid {
        self.directory()
            .register(name.to_string(), GeoPoint { lat, lng: 0.0 }, rating)
            .unwrap()
            .id
    }

    /// Creates a pending delivery picked up at [`PICKUP`].
    pub async fn create_delivery(&self) -> Delivery {
        self.engine()
            .create_delivery(&Actor::customer(Uuid::new_v4()), delivery_request(Uuid::new_v4()))
            .await
            .unwrap()
    }
}

/// Engine defaults with instant retries and no offer on create, so tests
/// drive assignment explicitly.
pub fn test_policy() -> DispatchPolicy {
    DispatchPolicy {
        auto_assign_on_create: false,
        retry: RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        ..DispatchPolicy::default()
    }
}

/// Policy whose offers lapse the moment they are made.
pub fn instant_expiry_policy() -> DispatchPolicy {
    DispatchPolicy {
        auto_offer_ttl: Duration::ZERO,
        manual_offer_ttl: Duration::ZERO,
        ..test_policy()
    }
}

/// Full wiring with a running side-effect worker.
pub fn harness(policy: DispatchPolicy) -> Harness {
    let directory = Arc::new(InMemoryDriverDirectory::new());
    let outbound = Arc::new(RecordingOutbound::default());
    let ports = Ports {
        directory: directory.clone(),
        location: Arc::new(InMemoryLocationService::new(directory.clone())),
        orders: outbound.clone(),
        notifications: outbound.clone(),
        payouts: outbound.clone(),
    };

    let (state, task_rx) = AppState::with_ports(policy, ports, directory, 256, 256);
    let state = Arc::new(state);
    tokio::spawn(run_task_worker(state.task_runner.clone(), task_rx));

    Harness { state, outbound }
}

pub fn delivery_request(order_id: Uuid) -> CreateDeliveryRequest {
    CreateDeliveryRequest {
        order_id,
        pickup: Address {
            line: "12 Market Street".to_string(),
            location: PICKUP,
        },
        dropoff: Address {
            line: "48 Harbour Road".to_string(),
            location: GeoPoint {
                lat: 0.03,
                lng: 0.02,
            },
        },
        estimated_minutes: 25,
        distance_km: 4.0,
        delivery_fee: 4.5,
        priority: Default::default(),
        notes: None,
    }
}

/// Polls until the condition holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Async flavour of [`eventually`] for conditions that read the stores.
pub async fn eventually_async<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

/// Long enough for a zero-TTL offer to be overdue.
pub async fn lapse() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
