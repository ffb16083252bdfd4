//! Step 4 of the evidence pipeline: replicate signed, chained bundles
//! to WORM storage, either proxied through the control plane or
//! direct to an object-storage endpoint with immutable retention.
//!
//! Grounded on `original_source/packages/compliance-agent/src/compliance_agent/worm_uploader.py`:
//! same two modes, same idempotent registry (here `compliance-store`'s
//! `uploads` tree rather than a `.upload_registry.json` file, since
//! the appliance already has a crash-safe store for everything else),
//! same fail-fast-on-auth-failure / exponential-backoff-otherwise
//! retry policy.

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use compliance_common::config::WormMode;
use compliance_store::evidence::EvidenceBundle;
use compliance_store::Store;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{EvidenceError, EvidenceResult};

#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    pub mode: WormMode,
    pub site_id: String,
    /// Proxy mode: control-plane upload endpoint, e.g. `https://central.example/api`.
    pub proxy_endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Direct mode: object-storage base endpoint accepting a signed PUT.
    pub direct_endpoint: Option<String>,
    pub retention_days: u32,
    pub max_retries: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct RemoteLocation {
    pub bundle_uri: String,
    pub signature_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub bundle_id: Uuid,
    pub success: bool,
    pub error: Option<String>,
}

pub struct WormReplicator {
    client: reqwest::Client,
    config: ReplicatorConfig,
}

impl WormReplicator {
    pub fn new(config: ReplicatorConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    fn destinations(&self) -> Vec<String> {
        match self.config.mode {
            WormMode::Proxy => vec!["central-proxy".to_string()],
            WormMode::Direct => vec!["object-storage".to_string()],
        }
    }

    /// Registers a freshly-appended bundle as pending upload. Called
    /// once per bundle, immediately after `Store::append_evidence`.
    pub fn register(&self, store: &Store, bundle_id: Uuid) -> EvidenceResult<()> {
        store.register_upload(bundle_id, self.destinations())?;
        Ok(())
    }

    /// Uploads every pending bundle in batches, updating the registry
    /// after each attempt so a crash mid-sweep never re-uploads a
    /// bundle whose prior attempt already succeeded.
    pub async fn replicate_pending(&self, store: &Store) -> EvidenceResult<Vec<UploadOutcome>> {
        let pending = store.list_pending_uploads()?;
        let mut outcomes = Vec::with_capacity(pending.len());

        for batch in pending.chunks(self.config.batch_size) {
            for record in batch {
                let Some(bundle) = store.get_evidence(record.bundle_id)? else {
                    outcomes.push(UploadOutcome { bundle_id: record.bundle_id, success: false, error: Some("bundle missing from chain".into()) });
                    continue;
                };

                match self.upload_with_retry(&bundle).await {
                    Ok(_remote) => {
                        let retention_until = Utc::now() + ChronoDuration::days(self.config.retention_days as i64);
                        store.update_upload(bundle.id, true, Some(retention_until), None)?;
                        outcomes.push(UploadOutcome { bundle_id: bundle.id, success: true, error: None });
                    }
                    Err(e) => {
                        store.update_upload(bundle.id, false, None, Some(e.to_string()))?;
                        outcomes.push(UploadOutcome { bundle_id: bundle.id, success: false, error: Some(e.to_string()) });
                    }
                }
            }
        }

        Ok(outcomes)
    }

    async fn upload_with_retry(&self, bundle: &EvidenceBundle) -> EvidenceResult<RemoteLocation> {
        let mut delay = Duration::from_secs(2);
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            match self.upload_once(bundle).await {
                Ok(location) => return Ok(location),
                Err(e) if e.is_auth_failure() => return Err(e),
                Err(e) => {
                    tracing::warn!(bundle_id = %bundle.id, attempt, error = %e, "WORM upload attempt failed");
                    last_error = Some(e.to_string());
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(EvidenceError::RetriesExhausted { attempts: self.config.max_retries, last_error: last_error.unwrap_or_default() })
    }

    async fn upload_once(&self, bundle: &EvidenceBundle) -> EvidenceResult<RemoteLocation> {
        match self.config.mode {
            WormMode::Proxy => self.upload_proxy(bundle).await,
            WormMode::Direct => self.upload_direct(bundle).await,
        }
    }

    async fn upload_proxy(&self, bundle: &EvidenceBundle) -> EvidenceResult<RemoteLocation> {
        let Some(endpoint) = &self.config.proxy_endpoint else {
            return Err(EvidenceError::TransportNotConfigured(WormMode::Proxy));
        };

        let bundle_json = serde_json::to_vec(bundle).map_err(|e| EvidenceError::Signing(e.to_string()))?;
        let part = reqwest::multipart::Part::bytes(bundle_json).file_name("bundle.json").mime_str("application/json").map_err(EvidenceError::Transport)?;
        let form = reqwest::multipart::Form::new().part("bundle", part);

        let mut request = self
            .client
            .post(format!("{endpoint}/evidence/upload"))
            .header("X-Client-ID", &self.config.site_id)
            .header("X-Bundle-ID", bundle.id.to_string())
            .header("X-Bundle-Hash", format!("sha256:{}", bundle.bundle_hash))
            .multipart(form);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(EvidenceError::AuthFailure(format!("proxy rejected upload with {}", response.status())));
        }
        let response = response.error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        Ok(RemoteLocation {
            bundle_uri: body.get("bundle_uri").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            signature_uri: body.get("signature_uri").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    async fn upload_direct(&self, bundle: &EvidenceBundle) -> EvidenceResult<RemoteLocation> {
        let Some(endpoint) = &self.config.direct_endpoint else {
            return Err(EvidenceError::TransportNotConfigured(WormMode::Direct));
        };

        let now = Utc::now();
        let retain_until = now + ChronoDuration::days(self.config.retention_days as i64);
        let key = format!("evidence/{}/{}/{:02}/{}.json", self.config.site_id, now.format("%Y"), now.month(), bundle.id);
        let url = format!("{endpoint}/{key}");

        let bundle_json = serde_json::to_vec(bundle).map_err(|e| EvidenceError::Signing(e.to_string()))?;
        let response = self
            .client
            .put(&url)
            .header("X-Amz-Object-Lock-Mode", "COMPLIANCE")
            .header("X-Amz-Object-Lock-Retain-Until-Date", retain_until.to_rfc3339())
            .header("Content-Type", "application/json")
            .body(bundle_json)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(EvidenceError::AuthFailure(format!("object storage rejected upload with {}", response.status())));
        }
        response.error_for_status()?;

        Ok(RemoteLocation { bundle_uri: url, signature_uri: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: WormMode) -> ReplicatorConfig {
        ReplicatorConfig {
            mode,
            site_id: "clinic-east".into(),
            proxy_endpoint: None,
            api_key: None,
            direct_endpoint: None,
            retention_days: 2555,
            max_retries: 3,
            batch_size: 10,
        }
    }

    #[tokio::test]
    async fn proxy_upload_without_endpoint_is_not_configured() {
        let replicator = WormReplicator::new(config(WormMode::Proxy));
        let bundle = test_bundle();
        let result = replicator.upload_once(&bundle).await;
        assert!(matches!(result, Err(EvidenceError::TransportNotConfigured(_))));
    }

    #[tokio::test]
    async fn direct_upload_without_endpoint_is_not_configured() {
        let replicator = WormReplicator::new(config(WormMode::Direct));
        let bundle = test_bundle();
        let result = replicator.upload_once(&bundle).await;
        assert!(matches!(result, Err(EvidenceError::TransportNotConfigured(_))));
    }

    #[test]
    fn destinations_reflect_the_configured_mode() {
        let proxy = WormReplicator::new(config(WormMode::Proxy));
        assert_eq!(proxy.destinations(), vec!["central-proxy".to_string()]);
        let direct = WormReplicator::new(config(WormMode::Direct));
        assert_eq!(direct.destinations(), vec!["object-storage".to_string()]);
    }

    fn test_bundle() -> EvidenceBundle {
        EvidenceBundle {
            id: Uuid::new_v4(),
            site: "clinic-east".into(),
            source: "compliance-healing".into(),
            reference: "host-01".into(),
            outcome: "success".into(),
            timestamp: Utc::now(),
            details: serde_json::json!({}),
            signature: "deadbeef".into(),
            chain_position: 1,
            bundle_hash: "abc".into(),
            chain_hash: "def".into(),
            framework_tags: None,
        }
    }
}
