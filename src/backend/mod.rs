//! Backend registry and lifecycle.
//!
//! One TensorBoard process per log directory: started on first request,
//! shared by every later request for the same directory, and reclaimed when
//! idle, crashed, or at shutdown.

mod entry;
mod error;
mod manager;
mod ports;

pub use entry::{BackendEntry, BackendLease, BackendSnapshot, BackendStatus};
pub use error::BackendError;
pub use manager::{BackendManager, ManagerSettings, ShutdownReport, SweepReport, SweeperHandle};
pub use ports::PortPool;
