//! Ties the inventory store, discovery methods, compliance catalog,
//! evidence pipeline, and central replication target together behind
//! one scan pipeline, a nightly scheduler, and an `axum` HTTP surface.

pub mod api;
pub mod central;
pub mod error;
pub mod scan;
pub mod scheduler;

pub use error::{OrchestratorError, OrchestratorResult};

use compliance_common::domain::{ScanType, TriggerSource};
use compliance_discovery::agent::AgentRegistry;
use compliance_discovery::DiscoveryMethod;
use compliance_evidence::EvidencePipeline;
use compliance_healing::learning::{self, PromotionThresholds};
use compliance_healing::HealingEngine;
use compliance_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::central::CentralClient;
use crate::scan::ScanOutcome;
use crate::scheduler::ScanRequest;

/// Everything one appliance instance needs to run scans, serve its
/// API, and replicate. Always held behind an `Arc` so the HTTP
/// handlers, scheduler loop, and background replication/prune tasks
/// can all reach it.
pub struct Orchestrator {
    pub store: Store,
    pub methods: Vec<Arc<dyn DiscoveryMethod>>,
    pub agent_registry: AgentRegistry,
    pub evidence: Option<Arc<EvidencePipeline>>,
    pub central: Option<CentralClient>,
    pub healing: Option<Arc<HealingEngine>>,
    pub site_id: String,
    pub network_ranges: Vec<String>,
    pub scan_trigger: mpsc::Sender<ScanRequest>,
    scan_gate: Semaphore,
}

impl Orchestrator {
    /// Builds the orchestrator and hands back the scan-trigger
    /// receiver half separately — the caller passes it to
    /// `scheduler::spawn` once the orchestrator is wrapped in an
    /// `Arc`, since the scheduler loop needs to call back into it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        methods: Vec<Arc<dyn DiscoveryMethod>>,
        agent_registry: AgentRegistry,
        evidence: Option<Arc<EvidencePipeline>>,
        central: Option<CentralClient>,
        healing: Option<Arc<HealingEngine>>,
        site_id: String,
        network_ranges: Vec<String>,
        max_concurrent_scans: usize,
    ) -> (Self, mpsc::Receiver<ScanRequest>) {
        let (tx, rx) = mpsc::channel(8);
        let orchestrator = Self {
            store,
            methods,
            agent_registry,
            evidence,
            central,
            healing,
            site_id,
            network_ranges,
            scan_trigger: tx,
            scan_gate: Semaphore::new(max_concurrent_scans.max(1)),
        };
        (orchestrator, rx)
    }

    /// Runs the full discovery-through-compliance pipeline. Bounded by
    /// `scan_gate` so an overlapping trigger queues rather than
    /// running two scans over the same store concurrently. Failing
    /// checks are forwarded into the Auto-Healing engine as host-level
    /// incidents when one is configured.
    pub async fn run_scan(&self, scan_type: ScanType, trigger: TriggerSource) -> OrchestratorResult<ScanOutcome> {
        let _permit = self.scan_gate.acquire().await.expect("scan semaphore never closes");
        scan::run_scan(
            &self.store,
            &self.methods,
            self.network_ranges.clone(),
            scan_type,
            trigger,
            self.healing.as_deref(),
            &self.site_id,
        )
        .await
    }

    /// Pushes unsynced devices to central and replays any evidence
    /// bundles still waiting on a WORM upload. Either half silently
    /// no-ops when its target isn't configured.
    pub async fn replicate(&self) -> OrchestratorResult<()> {
        if let Some(central) = &self.central {
            match central.replicate_unsynced(&self.store).await {
                Ok(count) if count > 0 => tracing::info!(devices = count, "replicated inventory to central"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "central replication failed; will retry next tick"),
            }
        }
        if let Some(evidence) = &self.evidence {
            if let Err(e) = evidence.replicate_pending().await {
                tracing::warn!(error = %e, "evidence replication failed; will retry next tick");
            }
        }
        Ok(())
    }

    /// Runs the L1 rule-promotion sweep over accumulated pattern
    /// statistics. A no-op when learning is disabled in config.
    pub fn run_promotion_sweep(&self, rules_dir: &PathBuf, thresholds: PromotionThresholds) {
        match learning::run_promotion_sweep(&self.store, rules_dir, thresholds) {
            Ok(promoted) if !promoted.is_empty() => tracing::info!(patterns = ?promoted, "promoted patterns to L1 rules"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "promotion sweep failed"),
        }
    }

    /// Drops incidents resolved before `retention_days` ago. Run on a
    /// monthly cadence by the binary's background task set.
    pub fn prune_history(&self, retention_days: i64) -> OrchestratorResult<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
        Ok(self.store.prune_resolved_incidents(cutoff)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use compliance_common::domain::DiscoveredDevice;
    use compliance_discovery::DiscoveryResult;

    struct EmptyMethod;

    #[async_trait]
    impl DiscoveryMethod for EmptyMethod {
        fn name(&self) -> &str {
            "empty"
        }

        async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredDevice>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn run_scan_respects_the_concurrency_gate() {
        let store = Store::open_temporary().unwrap();
        let methods: Vec<Arc<dyn DiscoveryMethod>> = vec![Arc::new(EmptyMethod)];
        let (orchestrator, _rx) =
            Orchestrator::new(store, methods, AgentRegistry::new(300), None, None, None, "test-site".to_string(), vec!["10.0.0.0/24".into()], 1);

        let outcome = orchestrator.run_scan(ScanType::Quick, TriggerSource::Manual).await.unwrap();
        assert_eq!(outcome.scan.devices_found, 0);
    }
}
