//! Domain ports - trait boundaries to external systems
//!
//! Adapters implement these traits to provide concrete functionality:
//! the array management API, the metadata repository, host OS attachment
//! primitives, and the liveness probe.
//!
//! Array adapters are responsible for normalizing vendor error codes into
//! the crate taxonomy before returning: not-found becomes
//! [`Error::NotFound`], conflict becomes [`Error::AlreadyExists`], transient
//! connectivity loss becomes [`Error::BackendUnreachable`], and permanent
//! rejections become [`Error::Backend`].
//!
//! [`Error::NotFound`]: crate::error::Error::NotFound
//! [`Error::AlreadyExists`]: crate::error::Error::AlreadyExists
//! [`Error::BackendUnreachable`]: crate::error::Error::BackendUnreachable
//! [`Error::Backend`]: crate::error::Error::Backend

use crate::config::BackendDefinition;
use crate::domain::model::{Provisioning, Volume};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Array-Side Types
// =============================================================================

/// Parameters for allocating a volume on the array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayVolumeSpec {
    /// Array-side volume name (derived from the record id)
    pub name: String,
    /// Placement pool
    pub cpg: String,
    /// Snapshot-space pool
    pub snap_cpg: String,
    /// Capacity in GiB
    pub size_gib: u64,
    /// Allocation strategy
    pub provisioning: Provisioning,
    /// Inline compression
    pub compression: bool,
}

/// Live array-side view of a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayVolumeDetail {
    /// Array-side name
    pub name: String,
    /// Current size in GiB
    pub size_gib: u64,
    /// Allocation strategy as reported
    pub provisioning: Provisioning,
    /// Compression state
    pub compression: bool,
    /// Parent volume for physical copies and snapshots
    pub copy_of: Option<String>,
    /// Array-side child snapshot names
    pub children: Vec<String>,
    /// Pool holding the volume
    pub cpg: String,
}

/// Terminal or in-flight state of a long-running array task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Done,
    Failed,
    Cancelled,
}

// =============================================================================
// Array Client Port
// =============================================================================

/// Port to the array's management API
#[async_trait]
pub trait ArrayClient: Send + Sync {
    /// Allocate a new volume
    async fn create_volume(&self, spec: &ArrayVolumeSpec) -> Result<()>;

    /// Copy an existing volume. An online (in-place) copy completes before
    /// returning `None`; an offline copy returns a task id to poll.
    async fn copy_volume(
        &self,
        src_name: &str,
        dst_spec: &ArrayVolumeSpec,
        online: bool,
    ) -> Result<Option<u64>>;

    /// Fetch live volume detail
    async fn get_volume(&self, name: &str) -> Result<ArrayVolumeDetail>;

    /// Remove a volume
    async fn delete_volume(&self, name: &str) -> Result<()>;

    /// Point-in-time copy with expiration/retention in hours
    async fn create_snapshot(
        &self,
        snap_name: &str,
        parent_name: &str,
        expiration_hours: Option<u32>,
        retention_hours: Option<u32>,
    ) -> Result<()>;

    /// Poll a long-running task
    async fn get_task(&self, task_id: u64) -> Result<TaskStatus>;

    // -------------------------------------------------------------------------
    // Volume sets and QoS
    // -------------------------------------------------------------------------

    /// Create a volume-set, optionally carrying a flash-cache policy
    async fn create_volume_set(&self, set_name: &str, flash_cache: bool) -> Result<()>;

    /// Remove a volume-set
    async fn delete_volume_set(&self, set_name: &str) -> Result<()>;

    /// Add a volume to a set
    async fn add_volume_to_set(&self, set_name: &str, vol_name: &str) -> Result<()>;

    /// Remove a volume from a set; reports the remaining member count
    async fn remove_volume_from_set(&self, set_name: &str, vol_name: &str) -> Result<usize>;

    /// Verify a QoS rule exists for the named set
    async fn query_qos_rule(&self, set_name: &str) -> Result<bool>;

    // -------------------------------------------------------------------------
    // Hosts and exports
    // -------------------------------------------------------------------------

    /// Register a host object for an initiator
    async fn create_host(&self, host_name: &str, iqns: &[String], wwpns: &[String]) -> Result<()>;

    /// Whether a host object exists
    async fn host_exists(&self, host_name: &str) -> Result<bool>;

    /// Remove a host object
    async fn delete_host(&self, host_name: &str) -> Result<()>;

    /// Export a volume to a host; returns the assigned LUN
    async fn create_vlun(&self, vol_name: &str, host_name: &str) -> Result<u32>;

    /// Remove an export
    async fn delete_vlun(&self, vol_name: &str, lun: u32, host_name: &str) -> Result<()>;

    /// Count active exports for a host
    async fn host_vlun_count(&self, host_name: &str) -> Result<usize>;

    // -------------------------------------------------------------------------
    // Schedules
    // -------------------------------------------------------------------------

    /// Create a recurring snapshot schedule
    async fn create_schedule(
        &self,
        schedule_name: &str,
        parent_name: &str,
        frequency: &str,
    ) -> Result<()>;

    /// Remove a recurring schedule
    async fn delete_schedule(&self, schedule_name: &str) -> Result<()>;
}

// =============================================================================
// Metadata Repository Port
// =============================================================================

/// Port to the coordination store holding volume records.
///
/// Implementations must provide strong read-after-write consistency for a
/// single key; cross-key consistency is not assumed.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Fetch a record by display name
    async fn get(&self, name: &str) -> Result<Option<Volume>>;

    /// Persist a record, overwriting any existing one with the same name
    async fn save(&self, volume: &Volume) -> Result<()>;

    /// Remove a record; absent keys are not an error
    async fn delete(&self, name: &str) -> Result<()>;

    /// Whether a record exists
    async fn exists(&self, name: &str) -> Result<bool>;

    /// All records
    async fn list(&self) -> Result<Vec<Volume>>;
}

// =============================================================================
// Host Attach Port
// =============================================================================

/// Port for host OS attachment primitives (SCSI rescan, device discovery)
#[async_trait]
pub trait HostAttach: Send + Sync {
    /// Rescan the SCSI bus and resolve the device path for a LUN
    async fn discover_device(&self, vol_name: &str, lun: u32) -> Result<String>;

    /// Flush and remove a block device from the host
    async fn remove_device(&self, device_path: &str) -> Result<()>;
}

// =============================================================================
// Reachability Probe Port
// =============================================================================

/// Port for checking array control-plane reachability.
///
/// Pluggable so deployments can choose between an authenticated API
/// round-trip and a lighter transport-level check; the two do not always
/// agree, and the monitor only trusts what this trait reports.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probe the given backend once. An `Err` of the unreachable class
    /// marks the backend as down; any other error is reported but not
    /// treated as connectivity loss.
    async fn probe(&self, backend: &BackendDefinition) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ArrayClientRef = Arc<dyn ArrayClient>;
pub type MetadataRepositoryRef = Arc<dyn MetadataRepository>;
pub type HostAttachRef = Arc<dyn HostAttach>;
pub type ReachabilityProbeRef = Arc<dyn ReachabilityProbe>;
