//! Lifecycle orchestration
//!
//! The managers here drive multi-step transitions across the array client
//! and the metadata repository: saga-based rollback, per-name operation
//! serialization, and the volume and snapshot state machines.

pub mod locks;
pub mod saga;
pub mod snapshot;
pub mod volume;

pub use locks::NameLocks;
pub use saga::{Saga, Side};
pub use snapshot::{SnapshotLifecycleManager, SnapshotRequest};
pub use volume::{VolumeLifecycleManager, VolumeView};
