//! In-process array
//!
//! A complete in-memory implementation of the [`ArrayClient`] port covering
//! volumes, physical copies, snapshots, volume-sets, hosts, VLUNs, tasks,
//! and schedules. Used for standalone mode (running the service without a
//! real array) and as the fixture for lifecycle tests; failure injection
//! lets tests exercise every rollback path.

use crate::domain::ports::{ArrayClient, ArrayVolumeDetail, ArrayVolumeSpec, TaskStatus};
use crate::domain::Provisioning;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

// =============================================================================
// Failure Injection
// =============================================================================

/// Per-operation failure injection for rollback testing.
///
/// An injected operation fails with a permanent backend error (or an
/// unreachable error when `unreachable` is set) for the configured number
/// of calls.
#[derive(Default)]
pub struct FailureInjection {
    /// Remaining failure count per operation name
    counts: parking_lot::Mutex<BTreeMap<String, u64>>,
    /// When set, every operation reports the backend unreachable
    unreachable: std::sync::atomic::AtomicBool,
}

impl FailureInjection {
    /// Fail the named operation for its next `n` invocations
    pub fn fail_times(&self, op: &str, n: u64) {
        self.counts.lock().insert(op.to_string(), n);
    }

    /// Fail the named operation until cleared
    pub fn fail(&self, op: &str) {
        self.fail_times(op, u64::MAX);
    }

    /// Stop failing the named operation
    pub fn clear(&self, op: &str) {
        self.counts.lock().remove(op);
    }

    /// Simulate total connectivity loss
    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    pub(crate) fn check(&self, op: &str) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnreachable {
                backend: "inprocess".into(),
                reason: "injected connectivity loss".into(),
            });
        }

        let mut counts = self.counts.lock();
        if let Some(remaining) = counts.get_mut(op) {
            if *remaining > 0 {
                if *remaining != u64::MAX {
                    *remaining -= 1;
                    if *remaining == 0 {
                        counts.remove(op);
                    }
                }
                return Err(Error::Backend {
                    backend: "inprocess".into(),
                    operation: op.to_string(),
                    reason: "injected failure".into(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeEntry {
    cpg: String,
    snap_cpg: String,
    size_gib: u64,
    provisioning: Provisioning,
    compression: bool,
    copy_of: Option<String>,
    children: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct SetEntry {
    flash_cache: bool,
    members: Vec<String>,
}

#[derive(Debug, Clone)]
struct HostEntry {
    iqns: Vec<String>,
    wwpns: Vec<String>,
}

#[derive(Debug, Clone)]
struct VlunEntry {
    vol: String,
    host: String,
    lun: u32,
}

#[derive(Debug, Clone)]
struct TaskEntry {
    /// Polls remaining until the task completes
    countdown: u32,
    /// Terminal status once the countdown hits zero
    outcome: TaskStatus,
}

#[derive(Default)]
struct ArrayState {
    volumes: BTreeMap<String, VolumeEntry>,
    sets: BTreeMap<String, SetEntry>,
    hosts: BTreeMap<String, HostEntry>,
    vluns: Vec<VlunEntry>,
    tasks: BTreeMap<u64, TaskEntry>,
    schedules: BTreeMap<String, (String, String)>,
}

// =============================================================================
// In-Process Array
// =============================================================================

/// In-memory array backend
pub struct InProcessArray {
    state: RwLock<ArrayState>,
    next_task: AtomicU64,
    next_lun: AtomicU64,
    /// Failure injection hooks
    pub faults: FailureInjection,
    /// Polls an offline copy task stays active before completing
    task_latency_polls: u32,
}

impl Default for InProcessArray {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessArray {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ArrayState::default()),
            next_task: AtomicU64::new(1),
            next_lun: AtomicU64::new(0),
            faults: FailureInjection::default(),
            task_latency_polls: 1,
        }
    }

    /// Seed an unmanaged volume, as would pre-exist on a real array, for
    /// import testing
    pub async fn seed_unmanaged_volume(&self, name: &str, size_gib: u64) {
        self.state.write().await.volumes.insert(
            name.to_string(),
            VolumeEntry {
                cpg: "seeded".into(),
                snap_cpg: "seeded".into(),
                size_gib,
                provisioning: Provisioning::Thin,
                compression: false,
                copy_of: None,
                children: Vec::new(),
            },
        );
    }

    /// Whether an array-side volume exists (test assertion helper)
    pub async fn volume_exists(&self, name: &str) -> bool {
        self.state.read().await.volumes.contains_key(name)
    }

    /// Whether a volume-set exists (test assertion helper)
    pub async fn set_exists(&self, name: &str) -> bool {
        self.state.read().await.sets.contains_key(name)
    }

    /// Whether a schedule exists (test assertion helper)
    pub async fn schedule_exists(&self, name: &str) -> bool {
        self.state.read().await.schedules.contains_key(name)
    }

    /// Active export count (test assertion helper)
    pub async fn vlun_total(&self) -> usize {
        self.state.read().await.vluns.len()
    }
}

#[async_trait]
impl ArrayClient for InProcessArray {
    async fn create_volume(&self, spec: &ArrayVolumeSpec) -> Result<()> {
        self.faults.check("create_volume")?;

        let mut state = self.state.write().await;
        if state.volumes.contains_key(&spec.name) {
            return Err(Error::AlreadyExists {
                kind: "ArrayVolume".into(),
                name: spec.name.clone(),
            });
        }

        debug!(name = %spec.name, size_gib = spec.size_gib, "inprocess create_volume");
        state.volumes.insert(
            spec.name.clone(),
            VolumeEntry {
                cpg: spec.cpg.clone(),
                snap_cpg: spec.snap_cpg.clone(),
                size_gib: spec.size_gib,
                provisioning: spec.provisioning,
                compression: spec.compression,
                copy_of: None,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    async fn copy_volume(
        &self,
        src_name: &str,
        dst_spec: &ArrayVolumeSpec,
        online: bool,
    ) -> Result<Option<u64>> {
        self.faults.check("copy_volume")?;

        let mut state = self.state.write().await;
        let src = state.volumes.get(src_name).cloned().ok_or(Error::NotFound {
            name: src_name.to_string(),
        })?;

        state.volumes.insert(
            dst_spec.name.clone(),
            VolumeEntry {
                cpg: dst_spec.cpg.clone(),
                snap_cpg: dst_spec.snap_cpg.clone(),
                size_gib: dst_spec.size_gib.max(src.size_gib),
                provisioning: dst_spec.provisioning,
                compression: dst_spec.compression,
                copy_of: Some(src_name.to_string()),
                children: Vec::new(),
            },
        );

        if online {
            return Ok(None);
        }

        let outcome = if self.faults.check("offline_copy_task").is_err() {
            TaskStatus::Failed
        } else {
            TaskStatus::Done
        };
        let task_id = self.next_task.fetch_add(1, Ordering::SeqCst);
        state.tasks.insert(
            task_id,
            TaskEntry {
                countdown: self.task_latency_polls,
                outcome,
            },
        );
        Ok(Some(task_id))
    }

    async fn get_volume(&self, name: &str) -> Result<ArrayVolumeDetail> {
        self.faults.check("get_volume")?;

        let state = self.state.read().await;
        let entry = state.volumes.get(name).ok_or(Error::NotFound {
            name: name.to_string(),
        })?;

        Ok(ArrayVolumeDetail {
            name: name.to_string(),
            size_gib: entry.size_gib,
            provisioning: entry.provisioning,
            compression: entry.compression,
            copy_of: entry.copy_of.clone(),
            children: entry.children.clone(),
            cpg: entry.cpg.clone(),
        })
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.faults.check("delete_volume")?;

        let mut state = self.state.write().await;
        let entry = state.volumes.get(name).ok_or(Error::NotFound {
            name: name.to_string(),
        })?;

        if !entry.children.is_empty() {
            return Err(Error::Backend {
                backend: "inprocess".into(),
                operation: "delete_volume".into(),
                reason: format!("volume {} has child snapshots", name),
            });
        }

        // Detach from parent's child list when deleting a snapshot
        if let Some(parent) = entry.copy_of.clone() {
            if let Some(parent_entry) = state.volumes.get_mut(&parent) {
                parent_entry.children.retain(|c| c != name);
            }
        }

        state.volumes.remove(name);
        Ok(())
    }

    async fn create_snapshot(
        &self,
        snap_name: &str,
        parent_name: &str,
        _expiration_hours: Option<u32>,
        _retention_hours: Option<u32>,
    ) -> Result<()> {
        self.faults.check("create_snapshot")?;

        let mut state = self.state.write().await;
        let parent = state
            .volumes
            .get(parent_name)
            .cloned()
            .ok_or(Error::NotFound {
                name: parent_name.to_string(),
            })?;

        if state.volumes.contains_key(snap_name) {
            return Err(Error::AlreadyExists {
                kind: "ArraySnapshot".into(),
                name: snap_name.to_string(),
            });
        }

        state.volumes.insert(
            snap_name.to_string(),
            VolumeEntry {
                cpg: parent.snap_cpg.clone(),
                snap_cpg: parent.snap_cpg,
                size_gib: parent.size_gib,
                provisioning: parent.provisioning,
                compression: parent.compression,
                copy_of: Some(parent_name.to_string()),
                children: Vec::new(),
            },
        );
        if let Some(parent_entry) = state.volumes.get_mut(parent_name) {
            parent_entry.children.push(snap_name.to_string());
        }
        Ok(())
    }

    async fn get_task(&self, task_id: u64) -> Result<TaskStatus> {
        self.faults.check("get_task")?;

        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&task_id).ok_or(Error::NotFound {
            name: format!("task {}", task_id),
        })?;

        if task.countdown > 0 {
            task.countdown -= 1;
            return Ok(TaskStatus::Active);
        }
        Ok(task.outcome)
    }

    async fn create_volume_set(&self, set_name: &str, flash_cache: bool) -> Result<()> {
        self.faults.check("create_volume_set")?;

        let mut state = self.state.write().await;
        if state.sets.contains_key(set_name) {
            return Err(Error::AlreadyExists {
                kind: "VolumeSet".into(),
                name: set_name.to_string(),
            });
        }
        state.sets.insert(
            set_name.to_string(),
            SetEntry {
                flash_cache,
                members: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_volume_set(&self, set_name: &str) -> Result<()> {
        self.faults.check("delete_volume_set")?;

        let mut state = self.state.write().await;
        state.sets.remove(set_name).ok_or(Error::NotFound {
            name: set_name.to_string(),
        })?;
        Ok(())
    }

    async fn add_volume_to_set(&self, set_name: &str, vol_name: &str) -> Result<()> {
        self.faults.check("add_volume_to_set")?;

        let mut state = self.state.write().await;
        let set = state.sets.get_mut(set_name).ok_or(Error::NotFound {
            name: set_name.to_string(),
        })?;
        if !set.members.iter().any(|m| m == vol_name) {
            set.members.push(vol_name.to_string());
        }
        Ok(())
    }

    async fn remove_volume_from_set(&self, set_name: &str, vol_name: &str) -> Result<usize> {
        self.faults.check("remove_volume_from_set")?;

        let mut state = self.state.write().await;
        let set = state.sets.get_mut(set_name).ok_or(Error::NotFound {
            name: set_name.to_string(),
        })?;
        set.members.retain(|m| m != vol_name);
        Ok(set.members.len())
    }

    async fn query_qos_rule(&self, set_name: &str) -> Result<bool> {
        self.faults.check("query_qos_rule")?;
        Ok(self.state.read().await.sets.contains_key(set_name))
    }

    async fn create_host(&self, host_name: &str, iqns: &[String], wwpns: &[String]) -> Result<()> {
        self.faults.check("create_host")?;

        let mut state = self.state.write().await;
        if state.hosts.contains_key(host_name) {
            return Err(Error::AlreadyExists {
                kind: "Host".into(),
                name: host_name.to_string(),
            });
        }
        state.hosts.insert(
            host_name.to_string(),
            HostEntry {
                iqns: iqns.to_vec(),
                wwpns: wwpns.to_vec(),
            },
        );
        Ok(())
    }

    async fn host_exists(&self, host_name: &str) -> Result<bool> {
        self.faults.check("host_exists")?;
        Ok(self.state.read().await.hosts.contains_key(host_name))
    }

    async fn delete_host(&self, host_name: &str) -> Result<()> {
        self.faults.check("delete_host")?;

        let mut state = self.state.write().await;
        state.hosts.remove(host_name).ok_or(Error::NotFound {
            name: host_name.to_string(),
        })?;
        Ok(())
    }

    async fn create_vlun(&self, vol_name: &str, host_name: &str) -> Result<u32> {
        self.faults.check("create_vlun")?;

        let mut state = self.state.write().await;
        if !state.volumes.contains_key(vol_name) {
            return Err(Error::NotFound {
                name: vol_name.to_string(),
            });
        }
        if !state.hosts.contains_key(host_name) {
            return Err(Error::NotFound {
                name: host_name.to_string(),
            });
        }

        // At most one export per volume/host pair
        if let Some(existing) = state
            .vluns
            .iter()
            .find(|v| v.vol == vol_name && v.host == host_name)
        {
            return Ok(existing.lun);
        }

        let lun = self.next_lun.fetch_add(1, Ordering::SeqCst) as u32;
        state.vluns.push(VlunEntry {
            vol: vol_name.to_string(),
            host: host_name.to_string(),
            lun,
        });
        Ok(lun)
    }

    async fn delete_vlun(&self, vol_name: &str, lun: u32, host_name: &str) -> Result<()> {
        self.faults.check("delete_vlun")?;

        let mut state = self.state.write().await;
        let before = state.vluns.len();
        state
            .vluns
            .retain(|v| !(v.vol == vol_name && v.lun == lun && v.host == host_name));
        if state.vluns.len() == before {
            return Err(Error::NotFound {
                name: format!("vlun {}/{}/{}", vol_name, lun, host_name),
            });
        }
        Ok(())
    }

    async fn host_vlun_count(&self, host_name: &str) -> Result<usize> {
        self.faults.check("host_vlun_count")?;
        Ok(self
            .state
            .read()
            .await
            .vluns
            .iter()
            .filter(|v| v.host == host_name)
            .count())
    }

    async fn create_schedule(
        &self,
        schedule_name: &str,
        parent_name: &str,
        frequency: &str,
    ) -> Result<()> {
        self.faults.check("create_schedule")?;

        let mut state = self.state.write().await;
        if state.schedules.contains_key(schedule_name) {
            return Err(Error::AlreadyExists {
                kind: "Schedule".into(),
                name: schedule_name.to_string(),
            });
        }
        state.schedules.insert(
            schedule_name.to_string(),
            (parent_name.to_string(), frequency.to_string()),
        );
        Ok(())
    }

    async fn delete_schedule(&self, schedule_name: &str) -> Result<()> {
        self.faults.check("delete_schedule")?;

        let mut state = self.state.write().await;
        state.schedules.remove(schedule_name).ok_or(Error::NotFound {
            name: schedule_name.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, size_gib: u64) -> ArrayVolumeSpec {
        ArrayVolumeSpec {
            name: name.into(),
            cpg: "FC_r6".into(),
            snap_cpg: "FC_r6".into(),
            size_gib,
            provisioning: Provisioning::Thin,
            compression: false,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete_volume() {
        let array = InProcessArray::new();
        array.create_volume(&spec("dcv-a", 10)).await.unwrap();

        let detail = array.get_volume("dcv-a").await.unwrap();
        assert_eq!(detail.size_gib, 10);

        array.delete_volume("dcv-a").await.unwrap();
        assert!(matches!(
            array.get_volume("dcv-a").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let array = InProcessArray::new();
        array.create_volume(&spec("dcv-a", 10)).await.unwrap();
        assert!(matches!(
            array.create_volume(&spec("dcv-a", 10)).await,
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_links_parent_and_child() {
        let array = InProcessArray::new();
        array.create_volume(&spec("dcv-a", 10)).await.unwrap();
        array
            .create_snapshot("dcs-1", "dcv-a", Some(24), None)
            .await
            .unwrap();

        let parent = array.get_volume("dcv-a").await.unwrap();
        assert_eq!(parent.children, vec!["dcs-1".to_string()]);

        // Parent delete is blocked while the snapshot exists
        assert!(array.delete_volume("dcv-a").await.is_err());

        array.delete_volume("dcs-1").await.unwrap();
        array.delete_volume("dcv-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_copy_task_completes() {
        let array = InProcessArray::new();
        array.create_volume(&spec("dcv-src", 10)).await.unwrap();

        let task = array
            .copy_volume("dcv-src", &spec("dcv-dst", 20), false)
            .await
            .unwrap()
            .expect("offline copy returns a task");

        assert_eq!(array.get_task(task).await.unwrap(), TaskStatus::Active);
        assert_eq!(array.get_task(task).await.unwrap(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let array = InProcessArray::new();
        array.faults.fail_times("create_volume", 1);

        assert!(array.create_volume(&spec("dcv-a", 10)).await.is_err());
        array.create_volume(&spec("dcv-a", 10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_injection() {
        let array = InProcessArray::new();
        array.faults.set_unreachable(true);

        let err = array.get_volume("dcv-a").await.unwrap_err();
        assert!(err.is_unreachable());

        array.faults.set_unreachable(false);
        assert!(matches!(
            array.get_volume("dcv-a").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_vlun_reuses_existing_export() {
        let array = InProcessArray::new();
        array.create_volume(&spec("dcv-a", 10)).await.unwrap();
        array
            .create_host("host-1", &["iqn.2026-08.io.example:host-1".into()], &[])
            .await
            .unwrap();

        let lun_a = array.create_vlun("dcv-a", "host-1").await.unwrap();
        let lun_b = array.create_vlun("dcv-a", "host-1").await.unwrap();
        assert_eq!(lun_a, lun_b);
        assert_eq!(array.vlun_total().await, 1);
    }
}
