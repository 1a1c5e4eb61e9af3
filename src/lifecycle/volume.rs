//! Volume lifecycle manager
//!
//! Executes each volume operation as a short transaction spanning the
//! metadata repository and the array client. Every mutating step registers
//! a compensation with a [`Saga`]; "succeeded everywhere" and "rolled back
//! everywhere" are the only silent outcomes, anything else surfaces as
//! [`Error::PartialFailure`].
//!
//! Operations on the same volume name are serialized through [`NameLocks`];
//! different names run fully in parallel.
//!
//! [`Error::PartialFailure`]: crate::error::Error::PartialFailure

use crate::array::names;
use crate::config::{ActiveBackend, BackendDefinition};
use crate::domain::model::{HostContext, MountInfo, Volume, VolumeOptions};
use crate::domain::ports::{
    ArrayClientRef, ArrayVolumeDetail, ArrayVolumeSpec, HostAttachRef, MetadataRepositoryRef,
    TaskStatus,
};
use crate::error::{Error, Result};
use crate::lifecycle::locks::NameLocks;
use crate::lifecycle::saga::{Saga, Side};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Pause between offline-copy task polls
const TASK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Ceiling on offline-copy task polls (one hour at the poll interval)
const TASK_POLL_LIMIT: u32 = 7200;

// =============================================================================
// Views
// =============================================================================

/// A metadata record composed with best-effort live array detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeView {
    /// The persisted record
    pub volume: Volume,
    /// Live array-side detail; `None` when the array lookup failed and the
    /// response degraded to metadata only
    pub live: Option<ArrayVolumeDetail>,
}

// =============================================================================
// Volume Lifecycle Manager
// =============================================================================

/// Orchestrates create/clone/import/delete/mount/unmount/inspect/list
pub struct VolumeLifecycleManager {
    array: ArrayClientRef,
    repo: MetadataRepositoryRef,
    host: HostAttachRef,
    backend: Arc<ActiveBackend>,
    locks: Arc<NameLocks>,
}

impl VolumeLifecycleManager {
    pub fn new(
        array: ArrayClientRef,
        repo: MetadataRepositoryRef,
        host: HostAttachRef,
        backend: Arc<ActiveBackend>,
        locks: Arc<NameLocks>,
    ) -> Self {
        Self {
            array,
            repo,
            host,
            backend,
            locks,
        }
    }

    /// Run an array call under the backend's request timeout. `Ok(None)`
    /// means the call timed out and its outcome is unknown; callers must
    /// reconcile with a read before deciding whether rollback is needed.
    async fn bounded<T, F>(&self, fut: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = Duration::from_secs(self.backend.load().request_timeout_secs);
        match tokio::time::timeout(timeout, fut).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    fn unreachable_timeout(&self, operation: &str) -> Error {
        Error::BackendUnreachable {
            backend: self.backend.load().name.clone(),
            reason: format!("{} timed out with unknown outcome", operation),
        }
    }

    fn spec_for(&self, record: &Volume, def: &BackendDefinition) -> ArrayVolumeSpec {
        ArrayVolumeSpec {
            name: record.array_name.clone(),
            cpg: record.options.cpg.clone().unwrap_or_else(|| def.cpg.clone()),
            snap_cpg: record
                .options
                .snap_cpg
                .clone()
                .unwrap_or_else(|| def.snap_cpg().to_string()),
            size_gib: record.options.size_gib,
            provisioning: record.options.provisioning,
            compression: record.options.compression,
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a volume: fresh allocation, clone, or import of an unmanaged
    /// array volume.
    ///
    /// Creating a name that already exists fails with `AlreadyExists`; the
    /// operation is deliberately not idempotent so that callers cannot
    /// silently adopt a volume with different options.
    pub async fn create(&self, name: &str, options: VolumeOptions) -> Result<Volume> {
        let _guard = self.locks.acquire(name).await;

        options.validate()?;
        if self.repo.exists(name).await? {
            return Err(Error::AlreadyExists {
                kind: "Volume".into(),
                name: name.to_string(),
            });
        }

        let def = self.backend.load();
        let backend_name = options
            .backend
            .clone()
            .unwrap_or_else(|| def.name.clone());
        let mut record = Volume::new(name, options, backend_name);
        let mut saga = Saga::new("create", name);

        // Step 1: allocate on the array
        let allocated = if let Some(import_name) = record.options.import_vv.clone() {
            self.adopt_unmanaged(&mut record, &import_name).await
        } else if let Some(src_name) = record.options.clone_of.clone() {
            self.clone_from(&mut record, &src_name, &def, &mut saga)
                .await
        } else {
            self.allocate_fresh(&record, &def, &mut saga).await
        };
        if let Err(e) = allocated {
            return Err(saga.unwind(e).await);
        }

        // Step 2: QoS volume-set / flash-cache policy
        if let Err(e) = self.apply_set_policy(&mut record, &mut saga).await {
            return Err(saga.unwind(e).await);
        }

        // Step 3: persist the record
        if let Err(e) = self.repo.save(&record).await {
            return Err(saga.unwind(e).await);
        }

        saga.commit();
        info!(
            volume = name,
            array_name = %record.array_name,
            size_gib = record.options.size_gib,
            "created volume"
        );
        Ok(record)
    }

    /// Adopt an existing unmanaged array volume. Nothing is allocated, so
    /// there is no array-side compensation for this step.
    async fn adopt_unmanaged(&self, record: &mut Volume, import_name: &str) -> Result<()> {
        let detail = match self.array.get_volume(import_name).await {
            Ok(d) => d,
            Err(Error::NotFound { .. }) => {
                return Err(Error::SourceNotFound {
                    name: import_name.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        record.array_name = import_name.to_string();
        record.options.size_gib = detail.size_gib;
        record.options.provisioning = detail.provisioning;
        record.options.compression = detail.compression;
        Ok(())
    }

    async fn allocate_fresh(
        &self,
        record: &Volume,
        def: &BackendDefinition,
        saga: &mut Saga,
    ) -> Result<()> {
        let spec = self.spec_for(record, def);

        match self.bounded(self.array.create_volume(&spec)).await? {
            Some(()) => {}
            None => {
                // Unknown outcome: reconcile before deciding anything
                match self.array.get_volume(&spec.name).await {
                    Ok(_) => {
                        debug!(volume = %spec.name, "create timed out but landed on the array");
                    }
                    Err(Error::NotFound { .. }) => {
                        return Err(self.unreachable_timeout("create_volume"))
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let array = self.array.clone();
        let array_name = spec.name.clone();
        saga.push(
            Side::Array,
            format!("delete array volume {}", array_name),
            move || async move { array.delete_volume(&array_name).await }.boxed(),
        );
        Ok(())
    }

    async fn clone_from(
        &self,
        record: &mut Volume,
        src_name: &str,
        def: &BackendDefinition,
        saga: &mut Saga,
    ) -> Result<()> {
        let src = self
            .repo
            .get(src_name)
            .await?
            .ok_or_else(|| Error::SourceNotFound {
                name: src_name.to_string(),
            })?;

        let src_detail = match self.array.get_volume(&src.array_name).await {
            Ok(d) => d,
            Err(Error::NotFound { .. }) => {
                return Err(Error::SourceNotFound {
                    name: src_name.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let spec = self.spec_for(record, def);

        // Same size copies online (in place); a size change forces an
        // offline copy driven by a task we must poll to completion.
        let online = src_detail.size_gib == record.options.size_gib;
        let task = self
            .array
            .copy_volume(&src.array_name, &spec, online)
            .await?;

        let array = self.array.clone();
        let array_name = spec.name.clone();
        saga.push(
            Side::Array,
            format!("delete array volume {}", array_name),
            move || async move { array.delete_volume(&array_name).await }.boxed(),
        );

        if let Some(task_id) = task {
            if let Err(e) = self.wait_for_task(task_id).await {
                return Err(Error::Backend {
                    backend: self.backend.load().name.clone(),
                    operation: "copy_volume".into(),
                    reason: format!("offline copy task {}: {}", task_id, e),
                });
            }
        }
        Ok(())
    }

    async fn wait_for_task(&self, task_id: u64) -> Result<()> {
        for _ in 0..TASK_POLL_LIMIT {
            match self.array.get_task(task_id).await? {
                TaskStatus::Done => return Ok(()),
                TaskStatus::Active => tokio::time::sleep(TASK_POLL_INTERVAL).await,
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    return Err(Error::Internal(format!("task {} did not succeed", task_id)))
                }
            }
        }
        Err(Error::Internal(format!(
            "task {} still active after {} polls",
            task_id, TASK_POLL_LIMIT
        )))
    }

    async fn apply_set_policy(&self, record: &mut Volume, saga: &mut Saga) -> Result<()> {
        if let Some(set_name) = record.options.qos_name.clone() {
            // The named set must already carry a QoS rule
            if !self.array.query_qos_rule(&set_name).await? {
                return Err(Error::Validation(format!(
                    "volume-set {} has no QoS rule",
                    set_name
                )));
            }
            self.join_set(record, &set_name, saga).await?;
        } else if record.options.flash_cache {
            let set_name = names::volume_set_name(&record.id);
            self.array.create_volume_set(&set_name, true).await?;

            let array = self.array.clone();
            let set = set_name.clone();
            saga.push(
                Side::Array,
                format!("delete volume-set {}", set),
                move || async move { array.delete_volume_set(&set).await }.boxed(),
            );

            self.join_set(record, &set_name, saga).await?;
        }
        Ok(())
    }

    async fn join_set(&self, record: &mut Volume, set_name: &str, saga: &mut Saga) -> Result<()> {
        self.array
            .add_volume_to_set(set_name, &record.array_name)
            .await?;

        let array = self.array.clone();
        let set = set_name.to_string();
        let vol = record.array_name.clone();
        saga.push(
            Side::Array,
            format!("remove {} from volume-set {}", vol, set),
            move || {
                async move {
                    array.remove_volume_from_set(&set, &vol).await?;
                    Ok(())
                }
                .boxed()
            },
        );

        record.vvs_name = Some(set_name.to_string());
        Ok(())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a volume and its snapshots. Deleting a name that was never
    /// created (or is already gone) succeeds silently.
    pub async fn delete(&self, name: &str, force: bool) -> Result<()> {
        let _guard = self.locks.acquire(name).await;

        let Some(mut record) = self.repo.get(name).await? else {
            debug!(volume = name, "delete of absent volume is a no-op");
            return Ok(());
        };

        self.refresh_snapshot_children(&mut record).await;
        if record.has_snapshot_dependents() {
            return Err(Error::HasDependents {
                name: name.to_string(),
                detail: "snapshot(s) with array-side children".into(),
            });
        }

        if record.is_mounted() {
            if !force {
                return Err(Error::InUse {
                    name: name.to_string(),
                    mounts: record.mounts.len(),
                });
            }
            self.release_attachments(&mut record).await;
        }

        // Snapshots go first; the array refuses to drop a parent with
        // children
        while let Some(snap) = record.snapshots.first().cloned() {
            if let Err(e) = ok_if_missing(self.array.delete_volume(&snap.array_name).await) {
                // Keep metadata in step with what already went away
                let _ = self.repo.save(&record).await;
                return Err(e);
            }
            if let Some(sched) = &snap.schedule {
                let _ = ok_if_missing(self.array.delete_schedule(&sched.name).await);
            }
            record.snapshots.remove(0);
        }

        if let Some(set_name) = record.vvs_name.clone() {
            let remaining = match self
                .array
                .remove_volume_from_set(&set_name, &record.array_name)
                .await
            {
                Ok(n) => n,
                Err(Error::NotFound { .. }) => 0,
                Err(e) => return Err(e),
            };
            // Only tear down sets this service generated for flash-cache
            let generated = set_name == names::volume_set_name(&record.id);
            if remaining == 0 && generated {
                let _ = ok_if_missing(self.array.delete_volume_set(&set_name).await);
            }
        }

        match self
            .bounded(self.array.delete_volume(&record.array_name))
            .await
        {
            Ok(Some(())) => {}
            Ok(None) => {
                // Timed out: reconcile before declaring anything
                match self.array.get_volume(&record.array_name).await {
                    Err(Error::NotFound { .. }) => {
                        debug!(volume = name, "delete timed out but completed on the array");
                    }
                    Ok(_) | Err(_) => return Err(self.unreachable_timeout("delete_volume")),
                }
            }
            Err(Error::NotFound { .. }) => {
                debug!(volume = name, "array volume already absent");
            }
            Err(e) => {
                let _ = self.repo.save(&record).await;
                return Err(e);
            }
        }

        if let Err(e) = self.repo.delete(name).await {
            return Err(Error::PartialFailure {
                operation: "delete".into(),
                resource: name.to_string(),
                cause: e.to_string(),
                rollback_failure: "array volume already removed, cannot restore".into(),
                array_side: "deleted".into(),
                metadata_side: format!("record {} still present", name),
            });
        }

        info!(volume = name, "deleted volume");
        Ok(())
    }

    /// Bring each snapshot's child count in line with the array. Children
    /// can appear (or vanish) out of band; the live view wins whenever the
    /// array answers, the stored count stands when it does not.
    async fn refresh_snapshot_children(&self, record: &mut Volume) {
        for snap in &mut record.snapshots {
            if let Ok(detail) = self.array.get_volume(&snap.array_name).await {
                snap.child_count = detail.children.len() as u32;
            }
        }
    }

    async fn release_attachments(&self, record: &mut Volume) {
        let stale: Vec<MountInfo> = record.mounts.drain(..).collect();
        for mount in stale {
            warn!(
                volume = %record.name,
                host = %mount.host_name,
                "force-detaching active mount"
            );
            let _ = ok_if_missing(
                self.array
                    .delete_vlun(&record.array_name, mount.lun, &mount.host_name)
                    .await,
            );
            if let Ok(0) = self.array.host_vlun_count(&mount.host_name).await {
                let _ = ok_if_missing(self.array.delete_host(&mount.host_name).await);
            }
            if let Err(e) = self.host.remove_device(&mount.device_path).await {
                debug!(device = %mount.device_path, "device removal failed: {}", e);
            }
        }
    }

    // =========================================================================
    // Mount / Unmount
    // =========================================================================

    /// Export the volume to the requesting host and discover the device
    /// path. At most one active mapping per initiator: a repeat mount from
    /// the same host returns the existing attachment.
    pub async fn mount(&self, name: &str, ctx: &HostContext) -> Result<MountInfo> {
        let mut guard = self.locks.acquire(name).await;

        let mut record = self.repo.get(name).await?.ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;

        if let Some(existing) = record.mounts.iter().find(|m| m.host_name == ctx.host_name) {
            debug!(volume = name, host = %ctx.host_name, "reusing existing attachment");
            return Ok(existing.clone());
        }

        if record.is_mounted() {
            // A stale mount elsewhere: give its holder the configured grace
            // period to release on its own, then force-detach. The name lock
            // is released for the wait so a graceful unmount can get in.
            let delay = record.options.mount_conflict_delay_secs;
            warn!(
                volume = name,
                delay_secs = delay,
                "volume mounted elsewhere, waiting before force-detach"
            );
            drop(guard);
            tokio::time::sleep(Duration::from_secs(delay)).await;
            guard = self.locks.acquire(name).await;

            record = self.repo.get(name).await?.ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })?;
            if let Some(existing) = record.mounts.iter().find(|m| m.host_name == ctx.host_name) {
                debug!(volume = name, host = %ctx.host_name, "reusing existing attachment");
                return Ok(existing.clone());
            }
            if record.is_mounted() {
                self.release_attachments(&mut record).await;
            }
        }
        let _guard = guard;

        let mut saga = Saga::new("mount", name);

        let host_known = self.array.host_exists(&ctx.host_name).await?;
        if !host_known {
            if let Err(e) = self
                .array
                .create_host(&ctx.host_name, &ctx.iqns, &ctx.wwpns)
                .await
            {
                return Err(saga.unwind(e).await);
            }
            let array = self.array.clone();
            let host = ctx.host_name.clone();
            saga.push(
                Side::Array,
                format!("delete host {}", host),
                move || async move { array.delete_host(&host).await }.boxed(),
            );
        }

        let lun = match self.array.create_vlun(&record.array_name, &ctx.host_name).await {
            Ok(lun) => lun,
            Err(e) => return Err(saga.unwind(e).await),
        };
        {
            let array = self.array.clone();
            let vol = record.array_name.clone();
            let host = ctx.host_name.clone();
            saga.push(
                Side::Array,
                format!("delete vlun {}/{}/{}", vol, lun, host),
                move || async move { array.delete_vlun(&vol, lun, &host).await }.boxed(),
            );
        }

        let device_path = match self.host.discover_device(&record.array_name, lun).await {
            Ok(path) => path,
            Err(e) => return Err(saga.unwind(e).await),
        };

        let def = self.backend.load();
        let mut connection_info = BTreeMap::new();
        if !def.iscsi_ips.is_empty() {
            connection_info.insert("portals".to_string(), def.iscsi_ips.join(","));
        }

        let mount = MountInfo {
            mount_id: Uuid::new_v4().to_string(),
            host_name: ctx.host_name.clone(),
            lun,
            device_path,
            connection_info,
            attached_at: Utc::now(),
        };

        record.mounts.push(mount.clone());
        if let Err(e) = self.repo.save(&record).await {
            return Err(saga.unwind(e).await);
        }

        saga.commit();
        info!(volume = name, host = %ctx.host_name, lun, "mounted volume");
        Ok(mount)
    }

    /// Remove the export for a mount. A mapping the array no longer knows
    /// about counts as success.
    pub async fn unmount(&self, name: &str, mount_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(name).await;

        let Some(mut record) = self.repo.get(name).await? else {
            debug!(volume = name, "unmount of absent volume is a no-op");
            return Ok(());
        };

        let Some(pos) = record.mounts.iter().position(|m| m.mount_id == mount_id) else {
            debug!(volume = name, mount_id, "mount already released");
            return Ok(());
        };
        let mount = record.mounts.remove(pos);

        ok_if_missing(
            self.array
                .delete_vlun(&record.array_name, mount.lun, &mount.host_name)
                .await,
        )?;

        // Drop the host object with its last export
        match self.array.host_vlun_count(&mount.host_name).await {
            Ok(0) => {
                let _ = ok_if_missing(self.array.delete_host(&mount.host_name).await);
            }
            Ok(_) => {}
            Err(e) => debug!(host = %mount.host_name, "vlun count failed: {}", e),
        }

        if let Err(e) = self.host.remove_device(&mount.device_path).await {
            debug!(device = %mount.device_path, "device removal failed: {}", e);
        }

        if let Err(e) = self.repo.save(&record).await {
            return Err(Error::PartialFailure {
                operation: "unmount".into(),
                resource: name.to_string(),
                cause: e.to_string(),
                rollback_failure: "export already removed, cannot restore".into(),
                array_side: "vlun deleted".into(),
                metadata_side: "mount sub-record still present".into(),
            });
        }

        info!(volume = name, mount_id, "unmounted volume");
        Ok(())
    }

    // =========================================================================
    // Inspect / List
    // =========================================================================

    /// Read-only view of one volume. The array-side lookup is best-effort:
    /// when it fails, the view carries the metadata record alone rather
    /// than failing the whole call.
    pub async fn inspect(&self, name: &str) -> Result<VolumeView> {
        let record = self.repo.get(name).await?.ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        Ok(self.compose_view(record).await)
    }

    /// Read-only view of all volumes
    pub async fn list(&self) -> Result<Vec<VolumeView>> {
        let records = self.repo.list().await?;
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            views.push(self.compose_view(record).await);
        }
        Ok(views)
    }

    async fn compose_view(&self, record: Volume) -> VolumeView {
        let live = match self.array.get_volume(&record.array_name).await {
            Ok(detail) => Some(detail),
            Err(e) => {
                debug!(volume = %record.name, "live detail unavailable: {}", e);
                None
            }
        };
        VolumeView {
            volume: record,
            live,
        }
    }
}

/// Treat an array-side not-found as success; everything else propagates
fn ok_if_missing(res: Result<()>) -> Result<()> {
    match res {
        Ok(()) | Err(Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
