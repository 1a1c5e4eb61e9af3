//! Array Volume Operator - SAN Volume Lifecycle Service
//!
//! A control-plane service managing the lifecycle of volumes and snapshots
//! on enterprise storage arrays, with backend liveness monitoring and
//! automatic failover to a standby array.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Volume Service                              │
//! │                     (typed intent dispatcher)                        │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐         ┌──────────────────────────────┐  │
//! │  │  Volume Lifecycle    │         │   Snapshot Lifecycle         │  │
//! │  │  create/clone/import │         │   create/delete, schedules,  │  │
//! │  │  delete/mount/unmount│         │   retention windows          │  │
//! │  └──────────┬───────────┘         └───────────────┬──────────────┘  │
//! │             │     saga rollback + per-name locks  │                 │
//! │             └──────────────────┬──────────────────┘                 │
//! │                                │                                    │
//! │              ┌─────────────────┴─────────────────┐                  │
//! │              │          Domain Ports             │                  │
//! │              │  ArrayClient / MetadataRepository │                  │
//! │              │  HostAttach / ReachabilityProbe   │                  │
//! │              └───────┬───────────────────┬───────┘                  │
//! ├──────────────────────┼───────────────────┼──────────────────────────┤
//! │  ┌───────────────────┴──────┐  ┌─────────┴────────────────────────┐ │
//! │  │   Array Adapters         │  │   Metadata Repository            │ │
//! │  │   WSAPI / in-process     │  │   (in-memory)                    │ │
//! │  └──────────────────────────┘  └──────────────────────────────────┘ │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │        Liveness Monitor ── bounded retry ── active-backend swap     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`service`]: typed intent dispatcher over the lifecycle managers
//! - [`lifecycle`]: volume and snapshot state machines, saga, name locks
//! - [`array`]: array client adapters and array-side name derivation
//! - [`metadata`]: volume record repository
//! - [`monitor`]: backend liveness monitor and retry policy
//! - [`config`]: backend definitions and the active-backend handle
//! - [`domain`]: core domain types and port traits
//! - [`error`]: classified error taxonomy

pub mod array;
pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod metadata;
pub mod monitor;
pub mod service;

// Re-export commonly used types
pub use array::{InProcessArray, WsapiClient, WsapiProbe};
pub use config::{ActiveBackend, BackendDefinition, ProbeSettings, RetrySettings, ServiceConfig};
pub use domain::model::{
    HostContext, MountInfo, Provisioning, ScheduleSpec, Snapshot, Volume, VolumeOptions,
};
pub use domain::ports::{
    ArrayClient, ArrayClientRef, ArrayVolumeDetail, ArrayVolumeSpec, HostAttach, HostAttachRef,
    MetadataRepository, MetadataRepositoryRef, ReachabilityProbe, ReachabilityProbeRef,
    TaskStatus,
};
pub use error::{Error, ErrorAction, Result};
pub use host::SimulatedHostAttach;
pub use lifecycle::{
    NameLocks, SnapshotLifecycleManager, SnapshotRequest, VolumeLifecycleManager, VolumeView,
};
pub use metadata::MemoryRepository;
pub use monitor::{ArrayMonitor, MonitorState, RetryPolicy};
pub use service::{ServiceStatus, VolumeIntent, VolumeOutcome, VolumeService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
