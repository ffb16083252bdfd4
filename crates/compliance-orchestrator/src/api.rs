//! HTTP surface: trigger/inspect scans, browse inventory, adjust
//! device policy, accept agent check-ins, report liveness.

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use compliance_common::domain::{ComplianceCheckResult, Device, DeviceType, DevicePort, LifecycleStatus, Scan, ScanType, TriggerSource};
use compliance_discovery::agent::AgentCheckin;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::scheduler::ScanRequest;
use crate::Orchestrator;

pub fn build_router(state: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/scans/trigger", post(trigger_scan))
        .route("/api/scans/status", get(scan_status))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/devices/{id}/policy", put(update_policy))
        .route("/agent/checkin", post(agent_checkin))
        .route("/api/health", get(health))
        .layer(Extension(state))
}

pub async fn serve(state: Arc<Orchestrator>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "orchestrator http surface listening");
    axum::serve(listener, router).await
}

#[derive(Debug, Deserialize)]
pub struct TriggerScanRequest {
    scan_type: Option<ScanType>,
}

#[derive(Debug, Serialize)]
pub struct TriggerScanResponse {
    scan_id: Uuid,
    status: String,
}

async fn trigger_scan(Extension(state): Extension<Arc<Orchestrator>>, Json(req): Json<TriggerScanRequest>) -> impl IntoResponse {
    let scan_type = req.scan_type.unwrap_or(ScanType::Full);
    match state.scan_trigger.send(ScanRequest { scan_type, trigger: TriggerSource::Api }).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(TriggerScanResponse { scan_id: Uuid::nil(), status: "queued".to_string() })).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "scheduler unavailable").into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct ScanStatusResponse {
    latest: Option<Scan>,
    history: Vec<Scan>,
}

async fn scan_status(Extension(state): Extension<Arc<Orchestrator>>) -> impl IntoResponse {
    match state.store.recent_scans(10) {
        Ok(history) => {
            let latest = history.first().cloned();
            Json(ScanStatusResponse { latest, history }).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceListQuery {
    #[serde(rename = "type")]
    device_type: Option<DeviceType>,
    status: Option<LifecycleStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    devices: Vec<Device>,
    total: usize,
    monitored: usize,
    excluded: usize,
    medical: usize,
}

async fn list_devices(Extension(state): Extension<Arc<Orchestrator>>, Query(query): Query<DeviceListQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);
    let offset = query.offset.unwrap_or(0);
    match state.store.list_devices(query.device_type, query.status, limit, offset) {
        Ok(devices) => {
            let monitored = devices.iter().filter(|d| d.status == LifecycleStatus::Monitored).count();
            let excluded = devices.iter().filter(|d| d.status == LifecycleStatus::Excluded).count();
            let medical = devices.iter().filter(|d| d.medical_device).count();
            let total = devices.len();
            Json(DeviceListResponse { devices, total, monitored, excluded, medical }).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceDetailResponse {
    device: Device,
    ports: Vec<DevicePort>,
    compliance_history: Vec<ComplianceCheckResult>,
}

async fn get_device(Extension(state): Extension<Arc<Orchestrator>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    let device = match state.store.get_device_by_id(id) {
        Ok(Some(d)) => d,
        Ok(None) => return (StatusCode::NOT_FOUND, "device not found").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let ports = state.store.get_ports(id).unwrap_or_default();
    let compliance_history = state.store.list_compliance_history(id).unwrap_or_default();
    Json(DeviceDetailResponse { device, ports, compliance_history }).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PolicyUpdateRequest {
    scan_policy: Option<compliance_common::domain::ScanPolicy>,
    manually_opted_in: Option<bool>,
    phi_access_flag: Option<bool>,
}

async fn update_policy(
    Extension(state): Extension<Arc<Orchestrator>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PolicyUpdateRequest>,
) -> impl IntoResponse {
    match state.store.update_policy(id, req.scan_policy, req.manually_opted_in, req.phi_access_flag) {
        Ok(device) => Json(device).into_response(),
        Err(compliance_store::StoreError::MedicalInvariant) => {
            (StatusCode::CONFLICT, "this update would leave a non-opted-in medical device scan-eligible").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn agent_checkin(Extension(state): Extension<Arc<Orchestrator>>, Json(checkin): Json<AgentCheckin>) -> impl IntoResponse {
    state.agent_registry.checkin(checkin);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    devices_total: usize,
    devices_monitored: usize,
    pending_uploads: usize,
}

async fn health(Extension(state): Extension<Arc<Orchestrator>>) -> impl IntoResponse {
    let total = state.store.list_devices(None, None, usize::MAX, 0).map(|d| d.len()).unwrap_or(0);
    let monitored = state.store.list_devices(None, Some(LifecycleStatus::Monitored), usize::MAX, 0).map(|d| d.len()).unwrap_or(0);
    let pending_uploads = state.store.list_pending_uploads().map(|u| u.len()).unwrap_or(0);
    Json(HealthResponse { status: "ok", devices_total: total, devices_monitored: monitored, pending_uploads })
}
