//! Service configuration
//!
//! Backend (array) definitions are loaded from a YAML file; several may be
//! configured, one of which is the default. The currently active backend is
//! published through [`ActiveBackend`], an atomically swapped immutable
//! handle: lifecycle operations load a snapshot per request, and only the
//! liveness monitor swaps it.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Backend Definition
// =============================================================================

/// A named configuration bundle for one storage array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDefinition {
    /// Unique backend name
    pub name: String,
    /// Management API base URL
    pub api_url: String,
    /// Management API username
    pub username: String,
    /// Management API password
    pub password: String,
    /// Primary placement pool
    pub cpg: String,
    /// Snapshot-space pool (falls back to `cpg` when absent)
    #[serde(default)]
    pub snap_cpg: Option<String>,
    /// iSCSI portal addresses for multipath
    #[serde(default)]
    pub iscsi_ips: Vec<String>,
    /// Per-request timeout for array calls, seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl BackendDefinition {
    /// Snapshot pool, defaulting to the primary pool
    pub fn snap_cpg(&self) -> &str {
        self.snap_cpg.as_deref().unwrap_or(&self.cpg)
    }
}

// =============================================================================
// Probe / Retry Settings
// =============================================================================

/// Bounded-retry parameters for the liveness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// First backoff delay, milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff multiplier per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Ceiling on a single backoff delay, milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Ceiling on total elapsed retry time, milliseconds
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_max_elapsed_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

/// Liveness monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Pause between successful probes, seconds
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    /// Retry policy applied within one probe
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_probe_interval_secs() -> u64 {
    2
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval_secs(),
            retry: RetrySettings::default(),
        }
    }
}

// =============================================================================
// Service Configuration
// =============================================================================

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// All configured arrays
    pub backends: Vec<BackendDefinition>,
    /// Name of the backend used for new volumes
    pub default_backend: String,
    /// Liveness monitor settings
    #[serde(default)]
    pub probe: ProbeSettings,
}

impl ServiceConfig {
    /// Load and validate a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| Error::Configuration(format!("invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation: duplicate names, missing default, empty pools
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Configuration("no backends configured".into()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(Error::Configuration("backend with empty name".into()));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate backend name: {}",
                    backend.name
                )));
            }
            if backend.cpg.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "backend {} has an empty cpg",
                    backend.name
                )));
            }
        }

        if !seen.contains(self.default_backend.as_str()) {
            return Err(Error::Configuration(format!(
                "default backend {} is not defined",
                self.default_backend
            )));
        }

        Ok(())
    }

    /// The default backend definition
    pub fn default_backend(&self) -> &BackendDefinition {
        // validate() guarantees the default exists
        self.backends
            .iter()
            .find(|b| b.name == self.default_backend)
            .unwrap_or(&self.backends[0])
    }

    /// Backend definition by name
    pub fn backend(&self, name: &str) -> Option<&BackendDefinition> {
        self.backends.iter().find(|b| b.name == name)
    }
}

// =============================================================================
// Active Backend Handle
// =============================================================================

/// Atomically swapped handle to the currently active array definition.
///
/// Readers clone the inner `Arc` and work against an immutable snapshot;
/// a concurrent swap is observed on the next load, never mid-read.
pub struct ActiveBackend {
    current: RwLock<Arc<BackendDefinition>>,
    /// All definitions in configured order; swaps rotate through this list
    all: Vec<Arc<BackendDefinition>>,
    /// Index of `current` within `all`
    index: RwLock<usize>,
}

impl ActiveBackend {
    /// Build the handle from a validated configuration
    pub fn from_config(config: &ServiceConfig) -> Arc<Self> {
        let all: Vec<Arc<BackendDefinition>> =
            config.backends.iter().cloned().map(Arc::new).collect();
        let start = all
            .iter()
            .position(|b| b.name == config.default_backend)
            .unwrap_or(0);

        Arc::new(Self {
            current: RwLock::new(all[start].clone()),
            all,
            index: RwLock::new(start),
        })
    }

    /// Snapshot of the active definition
    pub fn load(&self) -> Arc<BackendDefinition> {
        self.current.read().clone()
    }

    /// Number of configured definitions
    pub fn standby_count(&self) -> usize {
        self.all.len().saturating_sub(1)
    }

    /// Rotate to the next configured definition and return it.
    ///
    /// Fails when no standby exists; the monitor logs and retries on its
    /// next tick in that case.
    pub fn swap_to_next(&self) -> Result<Arc<BackendDefinition>> {
        if self.all.len() < 2 {
            return Err(Error::Configuration(
                "no standby backend configured for failover".into(),
            ));
        }

        let mut index = self.index.write();
        *index = (*index + 1) % self.all.len();
        let next = self.all[*index].clone();
        *self.current.write() = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str) -> BackendDefinition {
        BackendDefinition {
            name: name.into(),
            api_url: format!("https://{}:8080/api/v1", name),
            username: "svc".into(),
            password: "secret".into(),
            cpg: "FC_r6".into(),
            snap_cpg: None,
            iscsi_ips: vec![],
            request_timeout_secs: 30,
        }
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            backends: vec![backend("array-a"), backend("array-b")],
            default_backend: "array-a".into(),
            probe: ProbeSettings::default(),
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut cfg = config();
        cfg.backends.push(backend("array-a"));
        assert_eq!(cfg.validate().unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_validate_rejects_unknown_default() {
        let mut cfg = config();
        cfg.default_backend = "array-z".into();
        assert_eq!(cfg.validate().unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_snap_cpg_falls_back_to_cpg() {
        let b = backend("array-a");
        assert_eq!(b.snap_cpg(), "FC_r6");
    }

    #[test]
    fn test_active_backend_swap_rotates() {
        let handle = ActiveBackend::from_config(&config());
        assert_eq!(handle.load().name, "array-a");

        let next = handle.swap_to_next().unwrap();
        assert_eq!(next.name, "array-b");
        assert_eq!(handle.load().name, "array-b");

        // Wraps back around
        let next = handle.swap_to_next().unwrap();
        assert_eq!(next.name, "array-a");
    }

    #[test]
    fn test_swap_without_standby_fails() {
        let cfg = ServiceConfig {
            backends: vec![backend("array-a")],
            default_backend: "array-a".into(),
            probe: ProbeSettings::default(),
        };
        let handle = ActiveBackend::from_config(&cfg);
        assert_eq!(handle.swap_to_next().unwrap_err().kind(), "configuration");
        assert_eq!(handle.load().name, "array-a");
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
backends:
  - name: array-a
    api_url: https://10.0.0.10:8080/api/v1
    username: svc
    password: secret
    cpg: FC_r6
default_backend: array-a
"#;
        let cfg: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.probe.interval_secs, 2);
        assert_eq!(cfg.probe.retry.multiplier, 2.0);
    }
}
