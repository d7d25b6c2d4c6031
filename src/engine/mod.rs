pub mod lifecycle;
pub mod performance;
pub mod selection;
pub mod sweeper;
pub mod tasks;

pub use lifecycle::DispatchEngine;
