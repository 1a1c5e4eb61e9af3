//! WSAPI array client
//!
//! REST adapter over the array's management API. All vendor error codes and
//! HTTP statuses are normalized into the crate taxonomy here; callers never
//! see raw transport errors. Sessions are established lazily and renewed
//! once when the array reports an expired session key.

use crate::config::{ActiveBackend, BackendDefinition};
use crate::domain::ports::{
    ArrayClient, ArrayVolumeDetail, ArrayVolumeSpec, ReachabilityProbe, TaskStatus,
};
use crate::domain::Provisioning;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

// =============================================================================
// Vendor Error Codes
// =============================================================================

/// Object does not exist
const CODE_NON_EXISTENT: i64 = 23;
/// Object already exists
const CODE_EXISTENT: i64 = 22;
/// Session key expired or invalid
const CODE_INVALID_SESSION: i64 = 6;

/// Session key header sent on every authenticated request
const SESSION_HEADER: &str = "X-Session-Key";

// =============================================================================
// Error Normalization
// =============================================================================

/// Map an HTTP status plus vendor error body to the crate taxonomy.
fn normalize(backend: &str, operation: &str, status: StatusCode, body: &Value) -> Error {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    let desc = body
        .get("desc")
        .and_then(Value::as_str)
        .unwrap_or("no detail")
        .to_string();

    if code == CODE_NON_EXISTENT || status == StatusCode::NOT_FOUND {
        return Error::NotFound { name: desc };
    }
    if code == CODE_EXISTENT || status == StatusCode::CONFLICT {
        return Error::AlreadyExists {
            kind: "ArrayObject".into(),
            name: desc,
        };
    }
    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::GATEWAY_TIMEOUT {
        return Error::BackendUnreachable {
            backend: backend.to_string(),
            reason: desc,
        };
    }

    Error::Backend {
        backend: backend.to_string(),
        operation: operation.to_string(),
        reason: format!("{} (code {}): {}", status, code, desc),
    }
}

/// Map a transport-level failure to the crate taxonomy.
fn transport(backend: &str, operation: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::BackendUnreachable {
            backend: backend.to_string(),
            reason: err.to_string(),
        }
    } else {
        Error::Backend {
            backend: backend.to_string(),
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }
}

fn provisioning_params(provisioning: Provisioning) -> (bool, bool) {
    match provisioning {
        Provisioning::Thin => (true, false),
        Provisioning::Full => (false, false),
        Provisioning::Dedup => (true, true),
    }
}

fn parse_provisioning(value: &Value) -> Provisioning {
    match (
        value.get("tpvv").and_then(Value::as_bool).unwrap_or(false),
        value.get("tdvv").and_then(Value::as_bool).unwrap_or(false),
    ) {
        (_, true) => Provisioning::Dedup,
        (true, false) => Provisioning::Thin,
        (false, false) => Provisioning::Full,
    }
}

// =============================================================================
// WSAPI Client
// =============================================================================

/// REST client for the array management API
pub struct WsapiClient {
    backend: Arc<ActiveBackend>,
    http: reqwest::Client,
    session: Mutex<Option<String>>,
}

impl WsapiClient {
    /// Build a client over the shared active-backend handle. The endpoint is
    /// re-read per request so a liveness failover redirects in-flight work
    /// to the new array without reconstruction.
    pub fn new(backend: Arc<ActiveBackend>) -> Result<Self> {
        let timeout = backend.load().request_timeout_secs;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| Error::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            backend,
            http,
            session: Mutex::new(None),
        })
    }

    /// Obtain a session key from the array
    async fn login(&self, def: &BackendDefinition) -> Result<String> {
        let url = format!("{}/credentials", def.api_url);
        let body = json!({ "user": def.username, "password": def.password });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(&def.name, "login", e))?;

        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| transport(&def.name, "login", e))?;

        if !status.is_success() {
            return Err(normalize(&def.name, "login", status, &value));
        }

        value
            .get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Backend {
                backend: def.name.clone(),
                operation: "login".into(),
                reason: "no session key in response".into(),
            })
    }

    /// Drop the current session on the array, if any
    pub async fn logout(&self) -> Result<()> {
        let def = self.backend.load();
        let key = self.session.lock().await.take();
        if let Some(key) = key {
            let url = format!("{}/credentials/{}", def.api_url, key);
            if let Err(e) = self.http.delete(&url).send().await {
                debug!(backend = %def.name, "logout failed: {}", e);
            }
        }
        Ok(())
    }

    async fn session_key(&self, def: &BackendDefinition) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(key) = session.as_ref() {
            return Ok(key.clone());
        }
        let key = self.login(def).await?;
        *session = Some(key.clone());
        Ok(key)
    }

    /// Issue one authenticated request, renewing the session at most once
    /// when the array reports it expired.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let def = self.backend.load();
        let op = format!("{} {}", method, path);

        for attempt in 0..2 {
            let key = self.session_key(&def).await?;
            let url = format!("{}{}", def.api_url, path);

            let mut req = self.http.request(method.clone(), &url).header(SESSION_HEADER, &key);
            if let Some(ref body) = body {
                req = req.json(body);
            }

            let resp = req.send().await.map_err(|e| transport(&def.name, &op, e))?;
            let status = resp.status();

            if status.is_success() {
                if status == StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }
                return resp.json().await.map_err(|e| transport(&def.name, &op, e));
            }

            let value: Value = resp.json().await.unwrap_or(Value::Null);
            let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
            let session_expired = code == CODE_INVALID_SESSION
                || status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN;

            if session_expired && attempt == 0 {
                warn!(backend = %def.name, "session expired, renewing");
                *self.session.lock().await = None;
                continue;
            }

            return Err(normalize(&def.name, &op, status, &value));
        }

        Err(Error::Internal(format!("session renewal loop exhausted for {}", op)))
    }
}

#[async_trait]
impl ArrayClient for WsapiClient {
    async fn create_volume(&self, spec: &ArrayVolumeSpec) -> Result<()> {
        let (tpvv, tdvv) = provisioning_params(spec.provisioning);
        let body = json!({
            "name": spec.name,
            "cpg": spec.cpg,
            "snapCPG": spec.snap_cpg,
            "sizeMiB": spec.size_gib * 1024,
            "tpvv": tpvv,
            "tdvv": tdvv,
            "compression": spec.compression,
        });
        self.request(Method::POST, "/volumes", Some(body)).await?;
        Ok(())
    }

    async fn copy_volume(
        &self,
        src_name: &str,
        dst_spec: &ArrayVolumeSpec,
        online: bool,
    ) -> Result<Option<u64>> {
        let body = json!({
            "action": "createPhysicalCopy",
            "parameters": {
                "destVolume": dst_spec.name,
                "destCPG": dst_spec.cpg,
                "online": online,
                "tpvv": provisioning_params(dst_spec.provisioning).0,
            }
        });
        let resp = self
            .request(Method::POST, &format!("/volumes/{}", src_name), Some(body))
            .await?;

        Ok(resp.get("taskid").and_then(Value::as_u64))
    }

    async fn get_volume(&self, name: &str) -> Result<ArrayVolumeDetail> {
        let v = self
            .request(Method::GET, &format!("/volumes/{}", name), None)
            .await?;

        Ok(ArrayVolumeDetail {
            name: v
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string(),
            size_gib: v.get("sizeMiB").and_then(Value::as_u64).unwrap_or(0) / 1024,
            provisioning: parse_provisioning(&v),
            compression: v
                .get("compression")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            copy_of: v
                .get("copyOf")
                .and_then(Value::as_str)
                .map(str::to_string),
            children: v
                .get("children")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            cpg: v
                .get("userCPG")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/volumes/{}", name), None)
            .await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        snap_name: &str,
        parent_name: &str,
        expiration_hours: Option<u32>,
        retention_hours: Option<u32>,
    ) -> Result<()> {
        let body = json!({
            "action": "createSnapshot",
            "parameters": {
                "name": snap_name,
                "readOnly": false,
                "expirationHours": expiration_hours,
                "retentionHours": retention_hours,
            }
        });
        self.request(Method::POST, &format!("/volumes/{}", parent_name), Some(body))
            .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: u64) -> Result<TaskStatus> {
        let v = self
            .request(Method::GET, &format!("/tasks/{}", task_id), None)
            .await?;

        match v.get("status").and_then(Value::as_i64).unwrap_or(0) {
            1 => Ok(TaskStatus::Done),
            2 => Ok(TaskStatus::Active),
            3 => Ok(TaskStatus::Cancelled),
            _ => Ok(TaskStatus::Failed),
        }
    }

    async fn create_volume_set(&self, set_name: &str, flash_cache: bool) -> Result<()> {
        let body = json!({
            "name": set_name,
            "flashCachePolicy": if flash_cache { 1 } else { 2 },
        });
        self.request(Method::POST, "/volumesets", Some(body)).await?;
        Ok(())
    }

    async fn delete_volume_set(&self, set_name: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/volumesets/{}", set_name), None)
            .await?;
        Ok(())
    }

    async fn add_volume_to_set(&self, set_name: &str, vol_name: &str) -> Result<()> {
        let body = json!({ "action": 1, "setmembers": [vol_name] });
        self.request(Method::PUT, &format!("/volumesets/{}", set_name), Some(body))
            .await?;
        Ok(())
    }

    async fn remove_volume_from_set(&self, set_name: &str, vol_name: &str) -> Result<usize> {
        let body = json!({ "action": 2, "setmembers": [vol_name] });
        self.request(Method::PUT, &format!("/volumesets/{}", set_name), Some(body))
            .await?;

        let v = self
            .request(Method::GET, &format!("/volumesets/{}", set_name), None)
            .await?;
        Ok(v.get("setmembers")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn query_qos_rule(&self, set_name: &str) -> Result<bool> {
        match self
            .request(Method::GET, &format!("/qos/vvset:{}", set_name), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_host(&self, host_name: &str, iqns: &[String], wwpns: &[String]) -> Result<()> {
        let body = json!({
            "name": host_name,
            "iSCSINames": iqns,
            "FCWWNs": wwpns,
        });
        self.request(Method::POST, "/hosts", Some(body)).await?;
        Ok(())
    }

    async fn host_exists(&self, host_name: &str) -> Result<bool> {
        match self
            .request(Method::GET, &format!("/hosts/{}", host_name), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_host(&self, host_name: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/hosts/{}", host_name), None)
            .await?;
        Ok(())
    }

    async fn create_vlun(&self, vol_name: &str, host_name: &str) -> Result<u32> {
        let body = json!({
            "volumeName": vol_name,
            "hostname": host_name,
            "autoLun": true,
        });
        let resp = self.request(Method::POST, "/vluns", Some(body)).await?;
        Ok(resp.get("lun").and_then(Value::as_u64).unwrap_or(0) as u32)
    }

    async fn delete_vlun(&self, vol_name: &str, lun: u32, host_name: &str) -> Result<()> {
        let path = format!("/vluns/{},{},{}", vol_name, lun, host_name);
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn host_vlun_count(&self, host_name: &str) -> Result<usize> {
        let v = self
            .request(Method::GET, &format!("/hosts/{}/vluns", host_name), None)
            .await?;
        Ok(v.get("members")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn create_schedule(
        &self,
        schedule_name: &str,
        parent_name: &str,
        frequency: &str,
    ) -> Result<()> {
        let body = json!({
            "name": schedule_name,
            "volume": parent_name,
            "taskFrequency": frequency,
        });
        self.request(Method::POST, "/schedules", Some(body)).await?;
        Ok(())
    }

    async fn delete_schedule(&self, schedule_name: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/schedules/{}", schedule_name), None)
            .await?;
        Ok(())
    }
}

// =============================================================================
// WSAPI Probe
// =============================================================================

/// Authenticated control-plane reachability probe.
///
/// Performs a full login/logout round-trip against the probed definition
/// rather than a transport-level ping: an array that answers ICMP but whose
/// management service is down is still unreachable for our purposes.
pub struct WsapiProbe {
    http: reqwest::Client,
}

impl WsapiProbe {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("http client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ReachabilityProbe for WsapiProbe {
    async fn probe(&self, backend: &BackendDefinition) -> Result<()> {
        let url = format!("{}/credentials", backend.api_url);
        let body = json!({ "user": backend.username, "password": backend.password });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(&backend.name, "probe", e))?;

        let status = resp.status();
        let value: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(normalize(&backend.name, "probe", status, &value));
        }

        // Best-effort session cleanup; a leaked key expires server-side
        if let Some(key) = value.get("key").and_then(Value::as_str) {
            let _ = self
                .http
                .delete(format!("{}/credentials/{}", backend.api_url, key))
                .send()
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_not_found() {
        let body = json!({ "code": CODE_NON_EXISTENT, "desc": "volume does not exist" });
        let err = normalize("array-a", "GET /volumes/x", StatusCode::BAD_REQUEST, &body);
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn test_normalize_conflict() {
        let body = json!({ "code": CODE_EXISTENT, "desc": "volume exists" });
        let err = normalize("array-a", "POST /volumes", StatusCode::CONFLICT, &body);
        assert_eq!(err.kind(), "already-exists");
    }

    #[test]
    fn test_normalize_unreachable() {
        let err = normalize(
            "array-a",
            "GET /volumes/x",
            StatusCode::SERVICE_UNAVAILABLE,
            &Value::Null,
        );
        assert_eq!(err.kind(), "backend-unreachable");
    }

    #[test]
    fn test_normalize_permanent_rejection() {
        let body = json!({ "code": 43, "desc": "invalid cpg" });
        let err = normalize("array-a", "POST /volumes", StatusCode::BAD_REQUEST, &body);
        assert_eq!(err.kind(), "backend-error");
        assert!(err.to_string().contains("invalid cpg"));
    }

    #[test]
    fn test_provisioning_params_round_trip() {
        for mode in [Provisioning::Thin, Provisioning::Full, Provisioning::Dedup] {
            let (tpvv, tdvv) = provisioning_params(mode);
            let parsed = parse_provisioning(&json!({ "tpvv": tpvv, "tdvv": tdvv }));
            assert_eq!(parsed, mode);
        }
    }
}
