//! Backend liveness monitoring

pub mod liveness;
pub mod retry;

pub use liveness::{ArrayMonitor, MonitorState};
pub use retry::RetryPolicy;
