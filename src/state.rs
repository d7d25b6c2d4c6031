use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::adapters::{InMemoryDriverDirectory, standalone_ports};
use crate::config::DispatchPolicy;
use crate::engine::DispatchEngine;
use crate::engine::tasks::{OutboundTask, TaskQueue, TaskRunner};
use crate::models::delivery::DeliveryEvent;
use crate::observability::metrics::Metrics;
use crate::ports::Ports;
use crate::reporting::Reporting;
use crate::store::{MemoryStore, Stores};

pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub directory: Arc<InMemoryDriverDirectory>,
    pub engine: DispatchEngine,
    pub reporting: Reporting,
    pub task_runner: Arc<TaskRunner>,
    pub delivery_events_tx: broadcast::Sender<DeliveryEvent>,
    pub metrics: Metrics,
}

impl AppState {
    /// Standalone wiring: in-memory store and directory, logging adapters.
    pub fn new(
        policy: DispatchPolicy,
        task_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<OutboundTask>) {
        let directory = Arc::new(InMemoryDriverDirectory::new());
        let ports = standalone_ports(directory.clone());
        Self::with_ports(policy, ports, directory, task_queue_size, event_buffer_size)
    }

    pub fn with_ports(
        policy: DispatchPolicy,
        ports: Ports,
        directory: Arc<InMemoryDriverDirectory>,
        task_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<OutboundTask>) {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::memory(store.clone());
        let metrics = Metrics::new();

        let (task_queue, task_rx) = TaskQueue::new(task_queue_size, metrics.clone());
        let (delivery_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        let retry = policy.retry;
        let dedupe_window = policy.task_dedupe_window;
        let engine = DispatchEngine::new(
            stores.clone(),
            ports.clone(),
            policy,
            task_queue,
            delivery_events_tx.clone(),
            metrics.clone(),
        );
        let task_runner = Arc::new(TaskRunner::new(
            ports,
            engine.performance().clone(),
            retry,
            dedupe_window,
            metrics.clone(),
        ));

        (
            Self {
                store,
                directory,
                engine,
                reporting: Reporting::new(stores.performance),
                task_runner,
                delivery_events_tx,
                metrics,
            },
            task_rx,
        )
    }
}
