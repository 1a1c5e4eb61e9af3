//! Volume Service - The Front Door
//!
//! Single typed entry point over the lifecycle managers. Callers (the
//! binary, an RPC surface, tests) express requests as [`VolumeIntent`]
//! values; the service parses option maps, dispatches to the right
//! manager, and aggregates liveness status.

use crate::config::ActiveBackend;
use crate::domain::model::{HostContext, MountInfo, ScheduleSpec, Snapshot, Volume, VolumeOptions};
use crate::error::Result;
use crate::lifecycle::{
    SnapshotLifecycleManager, SnapshotRequest, VolumeLifecycleManager, VolumeView,
};
use crate::monitor::{ArrayMonitor, MonitorState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Intents
// =============================================================================

/// A single volume-service request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "kebab-case")]
pub enum VolumeIntent {
    CreateVolume {
        name: String,
        /// Raw option map as supplied by the caller; unrecognized keys are
        /// ignored and never stored
        #[serde(default)]
        options: BTreeMap<String, String>,
    },
    DeleteVolume {
        name: String,
        #[serde(default)]
        force: bool,
    },
    CreateSnapshot {
        parent: String,
        name: String,
        #[serde(default)]
        expiration_hours: Option<u32>,
        #[serde(default)]
        retention_hours: Option<u32>,
        #[serde(default)]
        schedule: Option<ScheduleSpec>,
    },
    DeleteSnapshot {
        parent: String,
        name: String,
        #[serde(default)]
        override_retention: bool,
    },
    Mount {
        name: String,
        host: HostContext,
    },
    Unmount {
        name: String,
        mount_id: String,
    },
    Inspect {
        name: String,
    },
    List,
}

/// Result of one dispatched intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum VolumeOutcome {
    Volume(Volume),
    Snapshot(Snapshot),
    Mounted(MountInfo),
    View(VolumeView),
    Views(Vec<VolumeView>),
    Done,
}

// =============================================================================
// Status
// =============================================================================

/// Aggregated service status
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Name of the currently active backend
    pub active_backend: String,
    /// Standby backends available for failover
    pub standby_backends: usize,
    /// Monitor verdict on the active backend
    pub backend_state: String,
    /// Completed failovers since start
    pub failovers: u64,
    /// Managed volume records
    pub volumes: usize,
    /// Snapshot sub-records across all volumes
    pub snapshots: usize,
}

// =============================================================================
// Volume Service
// =============================================================================

/// Dispatches intents to the lifecycle managers
pub struct VolumeService {
    volumes: VolumeLifecycleManager,
    snapshots: SnapshotLifecycleManager,
    backend: Arc<ActiveBackend>,
    monitor: Arc<ArrayMonitor>,
}

impl VolumeService {
    pub fn new(
        volumes: VolumeLifecycleManager,
        snapshots: SnapshotLifecycleManager,
        backend: Arc<ActiveBackend>,
        monitor: Arc<ArrayMonitor>,
    ) -> Self {
        Self {
            volumes,
            snapshots,
            backend,
            monitor,
        }
    }

    /// Execute one intent to completion
    pub async fn dispatch(&self, intent: VolumeIntent) -> Result<VolumeOutcome> {
        debug!(?intent, "dispatching");
        match intent {
            VolumeIntent::CreateVolume { name, options } => {
                let opts = VolumeOptions::from_map(&options)?;
                let volume = self.volumes.create(&name, opts).await?;
                Ok(VolumeOutcome::Volume(volume))
            }
            VolumeIntent::DeleteVolume { name, force } => {
                self.volumes.delete(&name, force).await?;
                Ok(VolumeOutcome::Done)
            }
            VolumeIntent::CreateSnapshot {
                parent,
                name,
                expiration_hours,
                retention_hours,
                schedule,
            } => {
                let request = SnapshotRequest {
                    expiration_hours,
                    retention_hours,
                    schedule,
                };
                let snapshot = self.snapshots.create(&parent, &name, request).await?;
                Ok(VolumeOutcome::Snapshot(snapshot))
            }
            VolumeIntent::DeleteSnapshot {
                parent,
                name,
                override_retention,
            } => {
                self.snapshots
                    .delete(&parent, &name, override_retention)
                    .await?;
                Ok(VolumeOutcome::Done)
            }
            VolumeIntent::Mount { name, host } => {
                let mount = self.volumes.mount(&name, &host).await?;
                Ok(VolumeOutcome::Mounted(mount))
            }
            VolumeIntent::Unmount { name, mount_id } => {
                self.volumes.unmount(&name, &mount_id).await?;
                Ok(VolumeOutcome::Done)
            }
            VolumeIntent::Inspect { name } => {
                let view = self.volumes.inspect(&name).await?;
                Ok(VolumeOutcome::View(view))
            }
            VolumeIntent::List => {
                let views = self.volumes.list().await?;
                Ok(VolumeOutcome::Views(views))
            }
        }
    }

    /// Aggregate liveness and inventory counters
    pub async fn status(&self) -> Result<ServiceStatus> {
        let views = self.volumes.list().await?;
        let snapshots = views.iter().map(|v| v.volume.snapshots.len()).sum();
        let state = match self.monitor.state() {
            MonitorState::Alive => "alive",
            MonitorState::Probing => "probing",
            MonitorState::Unreachable => "unreachable",
        };
        Ok(ServiceStatus {
            active_backend: self.backend.load().name.clone(),
            standby_backends: self.backend.standby_count(),
            backend_state: state.to_string(),
            failovers: self.monitor.failover_count(),
            volumes: views.len(),
            snapshots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InProcessArray;
    use crate::config::{BackendDefinition, ProbeSettings, ServiceConfig};
    use crate::domain::ports::ReachabilityProbe;
    use crate::host::SimulatedHostAttach;
    use crate::lifecycle::NameLocks;
    use crate::metadata::MemoryRepository;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    struct AlwaysUpProbe;

    #[async_trait]
    impl ReachabilityProbe for AlwaysUpProbe {
        async fn probe(&self, _backend: &BackendDefinition) -> Result<()> {
            Ok(())
        }
    }

    fn service() -> VolumeService {
        let array = Arc::new(InProcessArray::new());
        let repo = Arc::new(MemoryRepository::new());
        let locks = Arc::new(NameLocks::new());
        let config = ServiceConfig {
            backends: vec![BackendDefinition {
                name: "array-a".into(),
                api_url: "https://127.0.0.1:8080/api/v1".into(),
                username: "svc".into(),
                password: "secret".into(),
                cpg: "FC_r6".into(),
                snap_cpg: None,
                iscsi_ips: vec![],
                request_timeout_secs: 5,
            }],
            default_backend: "array-a".into(),
            probe: ProbeSettings::default(),
        };
        let backend = ActiveBackend::from_config(&config);
        let volumes = VolumeLifecycleManager::new(
            array.clone(),
            repo.clone(),
            Arc::new(SimulatedHostAttach::new()),
            backend.clone(),
            locks.clone(),
        );
        let snapshots = SnapshotLifecycleManager::new(array.clone(), repo, locks);
        let monitor = Arc::new(ArrayMonitor::new(
            Arc::new(AlwaysUpProbe),
            backend.clone(),
            &config.probe,
        ));
        VolumeService::new(volumes, snapshots, backend, monitor)
    }

    fn opts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_inspect_delete_through_intents() {
        let svc = service();

        let outcome = svc
            .dispatch(VolumeIntent::CreateVolume {
                name: "vol-1".into(),
                options: opts(&[("size", "8"), ("provisioning", "thin")]),
            })
            .await
            .unwrap();
        assert_matches!(outcome, VolumeOutcome::Volume(ref v) if v.options.size_gib == 8);

        let outcome = svc
            .dispatch(VolumeIntent::Inspect {
                name: "vol-1".into(),
            })
            .await
            .unwrap();
        assert_matches!(outcome, VolumeOutcome::View(_));

        svc.dispatch(VolumeIntent::DeleteVolume {
            name: "vol-1".into(),
            force: false,
        })
        .await
        .unwrap();

        let outcome = svc.dispatch(VolumeIntent::List).await.unwrap();
        assert_matches!(outcome, VolumeOutcome::Views(ref v) if v.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_option_keys_are_not_echoed() {
        let svc = service();

        let outcome = svc
            .dispatch(VolumeIntent::CreateVolume {
                name: "vol-1".into(),
                options: opts(&[("size", "4"), ("fancyUnknownKnob", "on")]),
            })
            .await
            .unwrap();

        let VolumeOutcome::Volume(volume) = outcome else {
            panic!("expected a volume outcome");
        };
        let echoed = serde_json::to_string(&volume).unwrap();
        assert!(!echoed.contains("fancyUnknownKnob"));
    }

    #[tokio::test]
    async fn test_status_counts_inventory() {
        let svc = service();
        svc.dispatch(VolumeIntent::CreateVolume {
            name: "vol-1".into(),
            options: opts(&[("size", "4")]),
        })
        .await
        .unwrap();
        svc.dispatch(VolumeIntent::CreateSnapshot {
            parent: "vol-1".into(),
            name: "snap-1".into(),
            expiration_hours: None,
            retention_hours: None,
            schedule: None,
        })
        .await
        .unwrap();

        let status = svc.status().await.unwrap();
        assert_eq!(status.active_backend, "array-a");
        assert_eq!(status.volumes, 1);
        assert_eq!(status.snapshots, 1);
        assert_eq!(status.failovers, 0);
    }

    #[tokio::test]
    async fn test_intent_round_trips_through_json() {
        let json = r#"{"intent":"create-volume","name":"vol-1","options":{"size":"4"}}"#;
        let intent: VolumeIntent = serde_json::from_str(json).unwrap();
        assert_matches!(intent, VolumeIntent::CreateVolume { ref name, .. } if name == "vol-1");
    }
}
