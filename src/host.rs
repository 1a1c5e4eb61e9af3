//! Host attachment adapters
//!
//! The lifecycle managers only need the [`HostAttach`] port; the real
//! multipath/SCSI plumbing lives outside this service. The simulated
//! implementation here backs standalone mode and the lifecycle tests with
//! deterministic device paths.
//!
//! [`HostAttach`]: crate::domain::ports::HostAttach

use crate::domain::ports::HostAttach;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::debug;

/// Deterministic in-memory device discovery
#[derive(Default)]
pub struct SimulatedHostAttach {
    devices: Mutex<BTreeSet<String>>,
}

impl SimulatedHostAttach {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a discovered device is still present
    pub fn device_present(&self, device_path: &str) -> bool {
        self.devices.lock().contains(device_path)
    }
}

#[async_trait]
impl HostAttach for SimulatedHostAttach {
    async fn discover_device(&self, vol_name: &str, lun: u32) -> Result<String> {
        let path = format!("/dev/mapper/{}-lun{}", vol_name, lun);
        self.devices.lock().insert(path.clone());
        debug!(device = %path, "discovered device");
        Ok(path)
    }

    async fn remove_device(&self, device_path: &str) -> Result<()> {
        if !self.devices.lock().remove(device_path) {
            return Err(Error::NotFound {
                name: device_path.to_string(),
            });
        }
        debug!(device = %device_path, "removed device");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_then_remove() {
        let host = SimulatedHostAttach::new();
        let path = host.discover_device("dcv-abc", 3).await.unwrap();
        assert_eq!(path, "/dev/mapper/dcv-abc-lun3");
        assert!(host.device_present(&path));

        host.remove_device(&path).await.unwrap();
        assert!(!host.device_present(&path));

        let err = host.remove_device(&path).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
