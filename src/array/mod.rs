//! Array-side adapters
//!
//! Two implementations of the [`ArrayClient`] port ship with the crate:
//! - [`WsapiClient`]: REST client for the array's management API
//! - [`InProcessArray`]: in-memory array for standalone mode and tests
//!
//! [`ArrayClient`]: crate::domain::ports::ArrayClient

pub mod inprocess;
pub mod names;
pub mod wsapi;

pub use inprocess::{FailureInjection, InProcessArray};
pub use names::{snapshot_name, volume_name, volume_set_name, ARRAY_NAME_MAX_LEN};
pub use wsapi::{WsapiClient, WsapiProbe};
