pub mod directory;
pub mod location;
pub mod logging;

use std::sync::Arc;

use crate::ports::Ports;

pub use directory::{DriverRecord, InMemoryDriverDirectory};
pub use location::InMemoryLocationService;
pub use logging::TracingOutbound;

/// Ports for a standalone process: in-memory directory and routes, outbound
/// integrations reduced to structured log lines.
pub fn standalone_ports(directory: Arc<InMemoryDriverDirectory>) -> Ports {
    let outbound = Arc::new(TracingOutbound);

    Ports {
        location: Arc::new(InMemoryLocationService::new(directory.clone())),
        directory,
        orders: outbound.clone(),
        notifications: outbound.clone(),
        payouts: outbound,
    }
}
