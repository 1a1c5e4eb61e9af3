//! Snapshot lifecycle manager
//!
//! Snapshots are sub-records of their parent volume: creating or deleting
//! one mutates the parent's metadata record, so both operations serialize
//! on the parent's name lock. Nesting is one level only; a snapshot can
//! never be the parent of another snapshot.

use crate::array::names;
use crate::domain::model::{ScheduleSpec, Snapshot};
use crate::domain::ports::{ArrayClientRef, MetadataRepositoryRef};
use crate::error::{Error, Result};
use crate::lifecycle::locks::NameLocks;
use crate::lifecycle::saga::{Saga, Side};
use chrono::Utc;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Caller-supplied snapshot parameters
#[derive(Debug, Clone, Default)]
pub struct SnapshotRequest {
    /// Hours until the array expires the snapshot
    pub expiration_hours: Option<u32>,
    /// Hours during which deletion is refused without an override
    pub retention_hours: Option<u32>,
    /// Optional recurring schedule to register alongside
    pub schedule: Option<ScheduleSpec>,
}

/// Orchestrates snapshot create/delete against array and metadata
pub struct SnapshotLifecycleManager {
    array: ArrayClientRef,
    repo: MetadataRepositoryRef,
    locks: Arc<NameLocks>,
}

impl SnapshotLifecycleManager {
    pub fn new(array: ArrayClientRef, repo: MetadataRepositoryRef, locks: Arc<NameLocks>) -> Self {
        Self { array, repo, locks }
    }

    /// Create a snapshot of `parent_name`. Validation runs before any
    /// side effect; a request with an invalid retention window creates
    /// nothing anywhere.
    pub async fn create(
        &self,
        parent_name: &str,
        snap_name: &str,
        request: SnapshotRequest,
    ) -> Result<Snapshot> {
        Snapshot::validate_windows(
            request.expiration_hours,
            request.retention_hours,
            request.schedule.as_ref(),
        )?;

        let _guard = self.locks.acquire(parent_name).await;

        let mut parent = match self.repo.get(parent_name).await? {
            Some(record) => record,
            None => return Err(self.classify_missing_parent(parent_name).await?),
        };

        if parent.snapshot(snap_name).is_some() {
            return Err(Error::AlreadyExists {
                kind: "Snapshot".into(),
                name: snap_name.to_string(),
            });
        }

        let id = Uuid::new_v4();
        let snap = Snapshot {
            id,
            name: snap_name.to_string(),
            array_name: names::snapshot_name(&id),
            parent_name: parent_name.to_string(),
            expiration_hours: request.expiration_hours,
            retention_hours: request.retention_hours,
            schedule: request.schedule.clone(),
            child_count: 0,
            created_at: Utc::now(),
        };

        let mut saga = Saga::new("create-snapshot", snap_name);

        self.array
            .create_snapshot(
                &snap.array_name,
                &parent.array_name,
                snap.expiration_hours,
                snap.retention_hours,
            )
            .await?;
        {
            let array = self.array.clone();
            let array_name = snap.array_name.clone();
            saga.push(
                Side::Array,
                format!("delete array snapshot {}", array_name),
                move || async move { array.delete_volume(&array_name).await }.boxed(),
            );
        }

        if let Some(sched) = &snap.schedule {
            if let Err(e) = self
                .array
                .create_schedule(&sched.name, &parent.array_name, &sched.frequency)
                .await
            {
                return Err(saga.unwind(e).await);
            }
            let array = self.array.clone();
            let sched_name = sched.name.clone();
            saga.push(
                Side::Array,
                format!("delete schedule {}", sched_name),
                move || async move { array.delete_schedule(&sched_name).await }.boxed(),
            );
        }

        parent.snapshots.push(snap.clone());
        if let Err(e) = self.repo.save(&parent).await {
            return Err(saga.unwind(e).await);
        }

        saga.commit();
        info!(
            snapshot = snap_name,
            parent = parent_name,
            array_name = %snap.array_name,
            "created snapshot"
        );
        Ok(snap)
    }

    /// A missing parent is either a plain unknown name or an attempt to
    /// snapshot a snapshot; the latter gets a validation error instead.
    async fn classify_missing_parent(&self, parent_name: &str) -> Result<Error> {
        let records = self.repo.list().await?;
        let is_snapshot = records
            .iter()
            .any(|v| v.snapshot(parent_name).is_some());
        if is_snapshot {
            Ok(Error::Validation(format!(
                "{} is a snapshot; snapshots of snapshots are not supported",
                parent_name
            )))
        } else {
            Ok(Error::SourceNotFound {
                name: parent_name.to_string(),
            })
        }
    }

    /// Delete a snapshot. Inside an unexpired retention window the delete
    /// is refused unless `override_retention` is set; a snapshot (or
    /// parent) that is already gone counts as success.
    pub async fn delete(
        &self,
        parent_name: &str,
        snap_name: &str,
        override_retention: bool,
    ) -> Result<()> {
        let _guard = self.locks.acquire(parent_name).await;

        let Some(mut parent) = self.repo.get(parent_name).await? else {
            debug!(
                snapshot = snap_name,
                parent = parent_name,
                "parent already absent, nothing to delete"
            );
            return Ok(());
        };

        let Some(mut snap) = parent.snapshot(snap_name).cloned() else {
            debug!(snapshot = snap_name, "snapshot already absent");
            return Ok(());
        };

        // Children can appear out of band; the live count wins whenever the
        // array answers
        if let Ok(detail) = self.array.get_volume(&snap.array_name).await {
            snap.child_count = detail.children.len() as u32;
        }

        if snap.retention_active_at(Utc::now()) && !override_retention {
            let until = snap
                .retention_until()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            return Err(Error::RetentionActive {
                name: snap_name.to_string(),
                until,
            });
        }

        if snap.child_count > 0 {
            return Err(Error::HasDependents {
                name: snap_name.to_string(),
                detail: format!("{} array-side child snapshot(s)", snap.child_count),
            });
        }

        ok_if_missing(self.array.delete_volume(&snap.array_name).await)?;
        if let Some(sched) = &snap.schedule {
            ok_if_missing(self.array.delete_schedule(&sched.name).await)?;
        }

        parent.snapshots.retain(|s| s.name != snap_name);
        if let Err(e) = self.repo.save(&parent).await {
            return Err(Error::PartialFailure {
                operation: "delete-snapshot".into(),
                resource: snap_name.to_string(),
                cause: e.to_string(),
                rollback_failure: "array snapshot already removed, cannot restore".into(),
                array_side: "deleted".into(),
                metadata_side: format!("sub-record {} still present on {}", snap_name, parent_name),
            });
        }

        info!(snapshot = snap_name, parent = parent_name, "deleted snapshot");
        Ok(())
    }
}

fn ok_if_missing(res: Result<()>) -> Result<()> {
    match res {
        Ok(()) | Err(Error::NotFound { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
