//! Core domain types for volumes and snapshots
//!
//! These records are what the metadata repository persists, keyed by the
//! user-facing display name. Array-side names are derived from the record's
//! id (see [`crate::array::names`]), never from the display name.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Minimum volume size in GiB
pub const MIN_SIZE_GIB: u64 = 1;

/// Maximum volume size in GiB (16 TiB)
pub const MAX_SIZE_GIB: u64 = 16 * 1024;

/// Compression is only supported at or above this size
pub const COMPRESSION_MIN_SIZE_GIB: u64 = 16;

/// Default wait before force-detaching a stale mount
pub const DEFAULT_MOUNT_CONFLICT_DELAY_SECS: u64 = 30;

// =============================================================================
// Provisioning
// =============================================================================

/// Space allocation strategy on the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provisioning {
    /// Allocate on write
    Thin,
    /// Allocate upfront
    Full,
    /// Thin with deduplication
    Dedup,
}

impl std::fmt::Display for Provisioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provisioning::Thin => write!(f, "thin"),
            Provisioning::Full => write!(f, "full"),
            Provisioning::Dedup => write!(f, "dedup"),
        }
    }
}

impl std::str::FromStr for Provisioning {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "thin" => Ok(Provisioning::Thin),
            "full" => Ok(Provisioning::Full),
            "dedup" => Ok(Provisioning::Dedup),
            other => Err(Error::Validation(format!(
                "unknown provisioning mode: {} (expected thin, full, or dedup)",
                other
            ))),
        }
    }
}

// =============================================================================
// Volume Options
// =============================================================================

/// Parsed creation options for a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeOptions {
    /// Requested capacity in GiB
    pub size_gib: u64,
    /// Allocation strategy
    pub provisioning: Provisioning,
    /// Enable inline compression
    pub compression: bool,
    /// Apply flash-cache policy via a volume-set
    pub flash_cache: bool,
    /// Placement pool override (primary)
    pub cpg: Option<String>,
    /// Placement pool override (snapshot space)
    pub snap_cpg: Option<String>,
    /// QoS volume-set to join
    pub qos_name: Option<String>,
    /// Remote-copy group membership
    pub replication_group: Option<String>,
    /// Clone this existing volume
    pub clone_of: Option<String>,
    /// Adopt this unmanaged array-side volume instead of allocating
    pub import_vv: Option<String>,
    /// Seconds to wait before force-detaching a stale mount
    pub mount_conflict_delay_secs: u64,
    /// Backend definition that owns this volume (default backend if empty)
    pub backend: Option<String>,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            size_gib: 100,
            provisioning: Provisioning::Thin,
            compression: false,
            flash_cache: false,
            cpg: None,
            snap_cpg: None,
            qos_name: None,
            replication_group: None,
            clone_of: None,
            import_vv: None,
            mount_conflict_delay_secs: DEFAULT_MOUNT_CONFLICT_DELAY_SECS,
            backend: None,
        }
    }
}

impl VolumeOptions {
    /// Parse an options map from the plugin surface. Unrecognized keys are
    /// ignored and never persisted; recognized keys with malformed values
    /// fail validation.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut opts = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "size" | "sizeGiB" => {
                    opts.size_gib = value.parse().map_err(|_| {
                        Error::Validation(format!("invalid size: {}", value))
                    })?;
                }
                "provisioning" => {
                    opts.provisioning = value.parse()?;
                }
                "compression" => {
                    opts.compression = parse_bool(key, value)?;
                }
                "flash-cache" | "flashCache" => {
                    opts.flash_cache = parse_bool(key, value)?;
                }
                "cpg" => opts.cpg = Some(value.clone()),
                "snapcpg" | "snapCpg" => opts.snap_cpg = Some(value.clone()),
                "qos-name" | "qosName" => opts.qos_name = Some(value.clone()),
                "replicationGroup" => opts.replication_group = Some(value.clone()),
                "cloneOf" => opts.clone_of = Some(value.clone()),
                "importVol" => opts.import_vv = Some(value.clone()),
                "mountConflictDelay" => {
                    opts.mount_conflict_delay_secs = value.parse().map_err(|_| {
                        Error::Validation(format!("invalid mountConflictDelay: {}", value))
                    })?;
                }
                "backend" => opts.backend = Some(value.clone()),
                // Unknown keys are dropped, not stored or echoed
                _ => {}
            }
        }

        Ok(opts)
    }

    /// Validate size bounds, flag compatibility, and mutually exclusive
    /// creation modes. Runs before any array call.
    pub fn validate(&self) -> Result<()> {
        if self.size_gib < MIN_SIZE_GIB || self.size_gib > MAX_SIZE_GIB {
            return Err(Error::Validation(format!(
                "size {} GiB out of range [{}, {}]",
                self.size_gib, MIN_SIZE_GIB, MAX_SIZE_GIB
            )));
        }

        if self.compression {
            if self.size_gib < COMPRESSION_MIN_SIZE_GIB {
                return Err(Error::Validation(format!(
                    "compression requires at least {} GiB, got {}",
                    COMPRESSION_MIN_SIZE_GIB, self.size_gib
                )));
            }
            if self.provisioning == Provisioning::Full {
                return Err(Error::Validation(
                    "compression is not supported with full provisioning".into(),
                ));
            }
        }

        if self.clone_of.is_some() && self.import_vv.is_some() {
            return Err(Error::Validation(
                "cloneOf and importVol are mutually exclusive".into(),
            ));
        }

        if self.import_vv.is_some() && self.flash_cache {
            return Err(Error::Validation(
                "importVol cannot be combined with flash-cache".into(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Validation(format!("invalid boolean for {}: {}", key, value))),
    }
}

// =============================================================================
// Mounts
// =============================================================================

/// Host-side identity of a mount requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostContext {
    /// Host name registered on the array
    pub host_name: String,
    /// iSCSI initiator names
    pub iqns: Vec<String>,
    /// Fibre Channel WWPNs
    pub wwpns: Vec<String>,
}

/// Active attachment of a volume to a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountInfo {
    /// Unique id for this mount
    pub mount_id: String,
    /// Host that holds the attachment
    pub host_name: String,
    /// LUN assigned by the array
    pub lun: u32,
    /// Discovered block device path
    pub device_path: String,
    /// Extra connection properties (target portals, etc.)
    pub connection_info: BTreeMap<String, String>,
    /// When the attachment was made
    pub attached_at: DateTime<Utc>,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Recurring snapshot schedule descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Schedule object name on the array
    pub name: String,
    /// Crontab-style frequency expression (mandatory)
    pub frequency: String,
    /// Name prefix for scheduled snapshot instances
    pub prefix: String,
    /// Expiration applied to scheduled instances
    pub expiration_hours: Option<u32>,
    /// Retention applied to scheduled instances
    pub retention_hours: Option<u32>,
}

/// Point-in-time copy of exactly one parent volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Generated unique id
    pub id: Uuid,
    /// Display name, unique among the parent's snapshots
    pub name: String,
    /// Array-side name, derived from `id`
    pub array_name: String,
    /// Display name of the parent volume
    pub parent_name: String,
    /// Hours until the array expires the snapshot
    pub expiration_hours: Option<u32>,
    /// Hours during which the snapshot must not be deleted
    pub retention_hours: Option<u32>,
    /// Optional recurring schedule
    pub schedule: Option<ScheduleSpec>,
    /// Array-side child snapshots (populated for imported hierarchies)
    pub child_count: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Validate retention/expiration and schedule constraints. Rejects,
    /// never clamps.
    pub fn validate_windows(
        expiration_hours: Option<u32>,
        retention_hours: Option<u32>,
        schedule: Option<&ScheduleSpec>,
    ) -> Result<()> {
        if let (Some(exp), Some(ret)) = (expiration_hours, retention_hours) {
            if ret > exp {
                return Err(Error::Validation(format!(
                    "retention ({}h) must not exceed expiration ({}h)",
                    ret, exp
                )));
            }
        }

        if let Some(sched) = schedule {
            if sched.frequency.trim().is_empty() {
                return Err(Error::Validation(
                    "a snapshot schedule requires a frequency expression".into(),
                ));
            }
            if let (Some(exp), Some(ret)) = (sched.expiration_hours, sched.retention_hours) {
                if ret > exp {
                    return Err(Error::Validation(format!(
                        "schedule retention ({}h) must not exceed expiration ({}h)",
                        ret, exp
                    )));
                }
            }
        }

        Ok(())
    }

    /// Whether the retention window is still open at `now`
    pub fn retention_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.retention_hours {
            Some(hours) => now < self.created_at + Duration::hours(i64::from(hours)),
            None => false,
        }
    }

    /// End of the retention window, if one was set
    pub fn retention_until(&self) -> Option<DateTime<Utc>> {
        self.retention_hours
            .map(|hours| self.created_at + Duration::hours(i64::from(hours)))
    }
}

// =============================================================================
// Volume
// =============================================================================

/// A logical unit of storage exposed to a consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Generated unique id; array-side names derive from this
    pub id: Uuid,
    /// User-supplied display name, unique and immutable
    pub name: String,
    /// Array-side name; derived from `id` for allocated volumes, the
    /// pre-existing name for imported ones
    pub array_name: String,
    /// Volume-set this volume belongs to, when QoS or flash-cache applies
    pub vvs_name: Option<String>,
    /// Creation options as recognized and applied
    pub options: VolumeOptions,
    /// Backend definition that owns this volume
    pub backend: String,
    /// Snapshots taken of this volume (one level only)
    pub snapshots: Vec<Snapshot>,
    /// Active host attachments
    pub mounts: Vec<MountInfo>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// Create a new record with a fresh id
    pub fn new(name: impl Into<String>, options: VolumeOptions, backend: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            name: name.into(),
            array_name: crate::array::names::volume_name(&id),
            vvs_name: None,
            options,
            backend: backend.into(),
            snapshots: Vec::new(),
            mounts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Find a snapshot sub-record by name
    pub fn snapshot(&self, name: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.name == name)
    }

    /// Whether any snapshot has array-side children
    pub fn has_snapshot_dependents(&self) -> bool {
        self.snapshots.iter().any(|s| s.child_count > 0)
    }

    /// Whether the volume is currently attached anywhere
    pub fn is_mounted(&self) -> bool {
        !self.mounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_options_from_map_recognized_keys() {
        let opts = VolumeOptions::from_map(&map(&[
            ("size", "2"),
            ("provisioning", "thin"),
            ("qos-name", "gold"),
        ]))
        .unwrap();

        assert_eq!(opts.size_gib, 2);
        assert_eq!(opts.provisioning, Provisioning::Thin);
        assert_eq!(opts.qos_name.as_deref(), Some("gold"));
    }

    #[test]
    fn test_options_from_map_ignores_unknown_keys() {
        let opts = VolumeOptions::from_map(&map(&[("size", "10"), ("frobnicate", "yes")])).unwrap();
        assert_eq!(opts.size_gib, 10);

        // Round-trip through serde must not resurrect the unknown key
        let json = serde_json::to_string(&opts).unwrap();
        assert!(!json.contains("frobnicate"));
    }

    #[test]
    fn test_options_invalid_provisioning() {
        let err = VolumeOptions::from_map(&map(&[("provisioning", "sparse")])).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_validate_compression_size_floor() {
        let mut opts = VolumeOptions {
            size_gib: 8,
            compression: true,
            ..Default::default()
        };
        assert_eq!(opts.validate().unwrap_err().kind(), "validation");

        opts.size_gib = 32;
        opts.validate().unwrap();
    }

    #[test]
    fn test_validate_clone_import_exclusive() {
        let opts = VolumeOptions {
            clone_of: Some("src".into()),
            import_vv: Some("raw-vv".into()),
            ..Default::default()
        };
        assert_eq!(opts.validate().unwrap_err().kind(), "validation");
    }

    #[test]
    fn test_snapshot_retention_exceeds_expiration() {
        let err = Snapshot::validate_windows(Some(10), Some(20), None).unwrap_err();
        assert_eq!(err.kind(), "validation");

        Snapshot::validate_windows(Some(20), Some(10), None).unwrap();
        Snapshot::validate_windows(None, Some(10), None).unwrap();
    }

    #[test]
    fn test_schedule_requires_frequency() {
        let sched = ScheduleSpec {
            name: "nightly".into(),
            frequency: "  ".into(),
            prefix: "auto".into(),
            expiration_hours: None,
            retention_hours: None,
        };
        let err = Snapshot::validate_windows(None, None, Some(&sched)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_retention_window() {
        let id = Uuid::new_v4();
        let snap = Snapshot {
            id,
            name: "snap-1".into(),
            array_name: crate::array::names::snapshot_name(&id),
            parent_name: "vol-1".into(),
            expiration_hours: Some(48),
            retention_hours: Some(24),
            schedule: None,
            child_count: 0,
            created_at: Utc::now(),
        };

        assert!(snap.retention_active_at(Utc::now()));
        assert!(!snap.retention_active_at(Utc::now() + Duration::hours(25)));
    }
}
