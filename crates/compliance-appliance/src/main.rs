//! Process entry point: load configuration, wire every crate's
//! components together, serve the HTTP surface, and run the scan
//! scheduler and background replication/maintenance sweeps until a
//! shutdown signal arrives.

mod target_resolver;

use compliance_common::config::{AppConfig, Credentials};
use compliance_common::logging::{init_tracing, LogFormat};
use compliance_discovery::agent::{AgentCheckinMethod, AgentRegistry};
use compliance_discovery::directory::DirectoryQuery;
use compliance_discovery::neighbor::NeighborTable;
use compliance_discovery::portscan::ActivePortscan;
use compliance_discovery::DiscoveryMethod;
use compliance_evidence::signing::BundleSigner;
use compliance_evidence::{EvidencePipeline, ReplicatorConfig, WormReplicator};
use compliance_healing::rules::L1RuleEngine;
use compliance_healing::safety::{LocalRateLimiter, SafetyEnvelope};
use compliance_healing::{provider::L2Planner, HealingEngine};
use compliance_orchestrator::{api, central::CentralClient, scheduler, Orchestrator};
use compliance_runbooks::RunbookCatalog;
use compliance_store::Store;
use std::sync::Arc;
use std::time::Duration;
use target_resolver::EnvTargetResolver;

fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::var("COMPLIANCE_CONFIG_PATH") {
        Ok(path) => Ok(AppConfig::load(std::path::Path::new(&path))?),
        Err(_) => Ok(AppConfig::default()),
    }
}

fn load_credentials(path: &std::path::Path) -> Credentials {
    match Credentials::load(path) {
        Ok(creds) => creds,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "no readable credentials file; directory/SNMP discovery will run without binds");
            Credentials::default()
        }
    }
}

fn build_discovery_methods(config: &AppConfig, credentials: &Credentials, agent_registry: AgentRegistry) -> Vec<Arc<dyn DiscoveryMethod>> {
    let mut methods: Vec<Arc<dyn DiscoveryMethod>> = Vec::new();

    if config.discovery.directory {
        if let (Some(server), Some(base_dn)) = (config.directory.server.clone(), config.directory.base_dn.clone()) {
            let mut query = DirectoryQuery::new(server, base_dn);
            query.use_ssl = config.directory.ssl;
            if let Some(dir_creds) = &credentials.directory {
                query.bind_dn = Some(dir_creds.bind_dn.clone());
                query.bind_password = Some(dir_creds.bind_password.clone());
            }
            methods.push(Arc::new(query));
        } else {
            tracing::warn!("directory discovery enabled but server/base_dn are unset; skipping");
        }
    }

    if config.discovery.neighbor {
        methods.push(Arc::new(NeighborTable::new()));
    }

    if config.discovery.portscan {
        methods.push(Arc::new(ActivePortscan::new(
            config.network_ranges.clone(),
            config.portscan.max_concurrent,
            config.portscan.host_timeout_seconds,
        )));
    }

    if config.discovery.agent {
        methods.push(Arc::new(AgentCheckinMethod::new(agent_registry)));
    }

    methods
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(if std::env::var("LOG_FORMAT").as_deref() == Ok("json") { LogFormat::Json } else { LogFormat::Compact });

    tracing::info!("starting compliance appliance");

    let store = Store::open(&config.paths.db)?;
    let credentials = load_credentials(&config.paths.credentials);
    let agent_registry = AgentRegistry::new(300);
    let methods = build_discovery_methods(&config, &credentials, agent_registry.clone());

    let catalog = RunbookCatalog::load(&config.paths.runbooks_dir)?;
    let rule_engine = L1RuleEngine::load(&config.paths.rules_dir)?;
    let l2_planner = if config.healing.level2_enabled { Some(L2Planner::new(Vec::new(), Duration::from_secs(30))) } else { None };
    let rate_limiter = LocalRateLimiter::new(config.safety.cooldown_seconds, config.safety.client_hourly, config.safety.global_hourly);
    let safety = SafetyEnvelope::new(Box::new(rate_limiter), config.safety.circuit_failure_threshold, config.safety.circuit_timeout);
    let resolver = Box::new(EnvTargetResolver::from_env());

    let evidence = if config.worm.enabled {
        let signer = BundleSigner::load_or_generate(&config.paths.signing_key)?;
        let replicator = WormReplicator::new(ReplicatorConfig {
            mode: config.worm.mode,
            site_id: config.central.site_id.clone().unwrap_or_default(),
            proxy_endpoint: config.central.url.clone(),
            api_key: config.central.api_key.clone(),
            direct_endpoint: None,
            retention_days: config.worm.retention_days,
            max_retries: config.worm.max_retries,
            batch_size: config.worm.batch_size,
        });
        Some(Arc::new(EvidencePipeline::new(store.clone(), signer, Some(replicator))))
    } else {
        None
    };

    let healing = if config.healing.level1_enabled || config.healing.level2_enabled || config.healing.level3_enabled {
        Some(Arc::new(HealingEngine::new(
            store.clone(),
            catalog,
            rule_engine,
            l2_planner,
            safety,
            resolver,
            config.healing.clone(),
            1800,
            1800,
            evidence.clone(),
        )))
    } else {
        None
    };

    let central = CentralClient::from_config(&config.central);
    let site_id = config.central.site_id.clone().unwrap_or_else(|| "default".to_string());
    let (orchestrator, scan_rx) =
        Orchestrator::new(store.clone(), methods, agent_registry, evidence.clone(), central, healing, site_id, config.network_ranges.clone(), 1);
    let orchestrator = Arc::new(orchestrator);

    scheduler::spawn(orchestrator.clone(), config.schedule.clone(), scan_rx);
    spawn_background_sweeps(orchestrator.clone(), config.clone());

    let addr = std::net::SocketAddr::new(config.api.host.parse()?, config.api.port);
    tokio::select! {
        result = api::serve(orchestrator, addr) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining in-flight work");
        }
    }

    tracing::info!("compliance appliance exiting cleanly");
    Ok(())
}

/// Periodic replication, promotion-sweep, and retention-prune tasks.
/// None of these are latency-sensitive, so each runs on its own coarse
/// interval rather than piggybacking on the scan clock.
fn spawn_background_sweeps(orchestrator: Arc<Orchestrator>, config: AppConfig) {
    let replication_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            if let Err(e) = replication_orchestrator.replicate().await {
                tracing::warn!(error = %e, "replication sweep failed");
            }
        }
    });

    if config.healing.learning_enabled {
        let promotion_orchestrator = orchestrator.clone();
        let thresholds = compliance_healing::learning::PromotionThresholds::from(&config.healing);
        let rules_dir = config.paths.rules_dir.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                promotion_orchestrator.run_promotion_sweep(&rules_dir, thresholds);
            }
        });
    }

    let retention_days = config.worm.retention_days as i64;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30 * 24 * 3600));
        loop {
            ticker.tick().await;
            if let Err(e) = orchestrator.prune_history(retention_days) {
                tracing::warn!(error = %e, "incident prune sweep failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
