//! Outbound side effects as retryable tasks.
//!
//! Every committed transition enqueues its side effects here instead of
//! calling the ports inline. A task is keyed by delivery, committed version,
//! effect kind and target, so redelivering the same task is a no-op once it
//! has succeeded within the dedupe window. Tasks for the same target run in
//! order on their own chain; a target stuck in backoff holds up nobody else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::performance::PerformanceAggregator;
use crate::error::{AppError, AppResult};
use crate::models::delivery::{Delivery, DeliveryStatus, OrderStatus};
use crate::models::driver::DriverStatus;
use crate::observability::metrics::Metrics;
use crate::ports::Ports;

const LEDGER_PRUNE_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    AssignmentOffer {
        driver_id: Uuid,
        delivery: Box<Delivery>,
    },
    DriverMessage {
        driver_id: Uuid,
        text: String,
    },
    StatusUpdate {
        order_id: Uuid,
        status: DeliveryStatus,
    },
    OrderSync {
        order_id: Uuid,
        status: OrderStatus,
    },
    Payout {
        delivery_id: Uuid,
    },
    RecomputePerformance {
        driver_id: Uuid,
    },
    SetDriverStatus {
        driver_id: Uuid,
        status: DriverStatus,
    },
    CreateRoute {
        driver_id: Uuid,
        delivery: Box<Delivery>,
    },
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::AssignmentOffer { .. } => "assignment_offer",
            SideEffect::DriverMessage { .. } => "driver_message",
            SideEffect::StatusUpdate { .. } => "status_update",
            SideEffect::OrderSync { .. } => "order_sync",
            SideEffect::Payout { .. } => "payout",
            SideEffect::RecomputePerformance { .. } => "recompute_performance",
            SideEffect::SetDriverStatus { .. } => "set_driver_status",
            SideEffect::CreateRoute { .. } => "create_route",
        }
    }

    /// The entity whose observers must see this effect in order.
    pub fn target(&self) -> Uuid {
        match self {
            SideEffect::AssignmentOffer { driver_id, .. }
            | SideEffect::DriverMessage { driver_id, .. }
            | SideEffect::RecomputePerformance { driver_id }
            | SideEffect::SetDriverStatus { driver_id, .. }
            | SideEffect::CreateRoute { driver_id, .. } => *driver_id,
            SideEffect::StatusUpdate { order_id, .. } | SideEffect::OrderSync { order_id, .. } => {
                *order_id
            }
            SideEffect::Payout { delivery_id } => *delivery_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundTask {
    pub delivery_id: Uuid,
    pub version: u64,
    pub effect: SideEffect,
}

impl OutboundTask {
    pub fn new(delivery: &Delivery, effect: SideEffect) -> Self {
        Self {
            delivery_id: delivery.id,
            version: delivery.version,
            effect,
        }
    }

    pub fn dedupe_key(&self) -> String {
        format!(
            "{}:v{}:{}:{}",
            self.delivery_id,
            self.version,
            self.effect.kind(),
            self.effect.target()
        )
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<OutboundTask>,
    metrics: Metrics,
}

impl TaskQueue {
    pub fn new(capacity: usize, metrics: Metrics) -> (Self, mpsc::Receiver<OutboundTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, metrics }, rx)
    }

    pub async fn enqueue(&self, task: OutboundTask) -> AppResult<()> {
        self.tx
            .send(task)
            .await
            .map_err(|err| AppError::Internal(format!("task queue send failed: {err}")))?;

        self.metrics.tasks_in_queue.inc();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Delivered { attempts: u32 },
    Deduplicated,
    Failed { attempts: u32, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    InFlight,
    Done(Instant),
}

impl TaskState {
    fn outlived(&self, window: Duration) -> bool {
        matches!(self, TaskState::Done(at) if at.elapsed() >= window)
    }
}

pub struct TaskRunner {
    ports: Ports,
    performance: PerformanceAggregator,
    retry: RetryPolicy,
    metrics: Metrics,
    dedupe_window: Duration,
    ledger: DashMap<String, TaskState>,
}

impl TaskRunner {
    pub fn new(
        ports: Ports,
        performance: PerformanceAggregator,
        retry: RetryPolicy,
        dedupe_window: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            ports,
            performance,
            retry,
            metrics,
            dedupe_window,
            ledger: DashMap::new(),
        }
    }

    /// Keys currently remembered, in flight or done.
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    /// Forgets delivered tasks older than the dedupe window. Returns how many
    /// keys were dropped.
    pub fn prune_ledger(&self) -> usize {
        let before = self.ledger.len();
        self.ledger
            .retain(|_, state| !state.outlived(self.dedupe_window));
        before.saturating_sub(self.ledger.len())
    }

    pub async fn execute(&self, task: OutboundTask) -> TaskOutcome {
        let key = task.dedupe_key();
        let kind = task.effect.kind();

        match self.ledger.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().outlived(self.dedupe_window) => {
                entry.insert(TaskState::InFlight);
            }
            Entry::Occupied(_) => {
                debug!(task = %key, "duplicate side-effect task skipped");
                self.count(kind, "deduplicated");
                return TaskOutcome::Deduplicated;
            }
            Entry::Vacant(entry) => {
                entry.insert(TaskState::InFlight);
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply(&task.effect).await {
                Ok(()) => {
                    self.ledger.insert(key, TaskState::Done(Instant::now()));
                    self.count(kind, "success");
                    return TaskOutcome::Delivered { attempts: attempt };
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        task = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "side-effect task failed; retrying"
                    );
                    self.count(kind, "retry");
                    sleep(delay).await;
                }
                Err(err) => {
                    // Forget the key so a later redelivery may try again.
                    self.ledger.remove(&key);
                    self.count(kind, "failed");
                    error!(
                        task = %key,
                        delivery_id = %task.delivery_id,
                        attempts = attempt,
                        error = %err,
                        "side-effect task gave up"
                    );
                    return TaskOutcome::Failed {
                        attempts: attempt,
                        error: err.to_string(),
                    };
                }
            }
        }
    }

    async fn apply(&self, effect: &SideEffect) -> AppResult<()> {
        match effect {
            SideEffect::AssignmentOffer {
                driver_id,
                delivery,
            } => {
                self.ports
                    .notifications
                    .send_assignment_offer(*driver_id, delivery)
                    .await
            }
            SideEffect::DriverMessage { driver_id, text } => {
                self.ports
                    .notifications
                    .send_driver_message(*driver_id, text)
                    .await
            }
            SideEffect::StatusUpdate { order_id, status } => {
                self.ports
                    .notifications
                    .send_status_update(*order_id, *status)
                    .await
            }
            SideEffect::OrderSync { order_id, status } => {
                self.ports.orders.update_status(*order_id, *status).await
            }
            SideEffect::Payout { delivery_id } => {
                self.ports.payouts.request_payout(*delivery_id).await
            }
            SideEffect::RecomputePerformance { driver_id } => {
                self.performance.recompute(*driver_id).await.map(|_| ())
            }
            SideEffect::SetDriverStatus { driver_id, status } => {
                self.ports.directory.set_status(*driver_id, *status).await
            }
            SideEffect::CreateRoute {
                driver_id,
                delivery,
            } => {
                self.ports
                    .location
                    .create_route(delivery.id, *driver_id, &delivery.pickup, &delivery.dropoff)
                    .await
            }
        }
    }

    fn count(&self, kind: &str, outcome: &str) {
        self.metrics
            .side_effect_tasks_total
            .with_label_values(&[kind, outcome])
            .inc();
    }
}

struct TargetChain {
    tx: mpsc::UnboundedSender<OutboundTask>,
    queued: usize,
}

/// Drains the task queue. Each effect target gets a chain that runs its
/// tasks in order; the chain is dropped once it has nothing queued.
pub async fn run_task_worker(runner: Arc<TaskRunner>, mut task_rx: mpsc::Receiver<OutboundTask>) {
    info!(
        dedupe_window_secs = runner.dedupe_window.as_secs(),
        "side-effect worker started"
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Uuid>();
    let mut chains: HashMap<Uuid, TargetChain> = HashMap::new();
    let mut prune = interval(LEDGER_PRUNE_EVERY);
    prune.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = task_rx.recv() => {
                let Some(task) = received else { break };
                runner.metrics.tasks_in_queue.dec();

                let target = task.effect.target();
                let chain = chains.entry(target).or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    tokio::spawn(run_chain(runner.clone(), target, rx, done_tx.clone()));
                    TargetChain { tx, queued: 0 }
                });

                if let Err(err) = chain.tx.send(task) {
                    error!(target = %target, error = %err, "task chain closed; dropping task");
                    chains.remove(&target);
                } else {
                    chain.queued += 1;
                }
            }
            Some(target) = done_rx.recv() => {
                let drained = match chains.get_mut(&target) {
                    Some(chain) => {
                        chain.queued = chain.queued.saturating_sub(1);
                        chain.queued == 0
                    }
                    None => false,
                };
                if drained {
                    chains.remove(&target);
                }
            }
            _ = prune.tick() => {
                let evicted = runner.prune_ledger();
                if evicted > 0 {
                    debug!(evicted, remaining = runner.ledger_len(), "task ledger pruned");
                }
            }
        }
    }

    warn!("side-effect worker stopped: task channel closed");
}

async fn run_chain(
    runner: Arc<TaskRunner>,
    target: Uuid,
    mut rx: mpsc::UnboundedReceiver<OutboundTask>,
    done_tx: mpsc::UnboundedSender<Uuid>,
) {
    while let Some(task) = rx.recv().await {
        runner.execute(task).await;
        let _ = done_tx.send(target);
    }
}
