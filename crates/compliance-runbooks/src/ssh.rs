//! POSIX/SSH transport.
//!
//! Grounded on `original_source/.../runbooks/linux/executor.py`'s
//! `LinuxTarget`/`LinuxExecutor`: a session cache keyed by hostname
//! with a max-age refresh, distro detection normalized to
//! `ubuntu`/`rhel`/`unknown`, base64-shipped scripts to sidestep shell
//! quoting, sudo-via-stdin privilege elevation, and retry with
//! exponential backoff. `ssh2` is synchronous, so every session
//! operation runs inside `tokio::task::spawn_blocking`; a per-host
//! `tokio::sync::Mutex` ensures at most one connection attempt is in
//! flight per host, per `spec.md` §5's "per-key mutex, one active
//! session" rule.

use base64::{engine::general_purpose::STANDARD, Engine};
use dashmap::DashMap;
use ssh2::Session;
use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{RunbookError, RunbookResult};
use crate::{excerpt, ActionStep, Phase, RunResult, ResolutionStatus, RunbookDefinition, StepResult};

#[derive(Debug, Clone)]
pub struct LinuxTarget {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    pub sudo_password: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl LinuxTarget {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: 22,
            username: "root".to_string(),
            password: None,
            private_key_path: None,
            sudo_password: None,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
        }
    }
}

struct CachedSession {
    session: Session,
    created_at: Instant,
    distro: Option<String>,
}

/// Output of a single script execution on a target.
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct SshTransport {
    sessions: DashMap<String, Arc<StdMutex<CachedSession>>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    max_session_age: Duration,
}

impl SshTransport {
    pub fn new(max_session_age_seconds: u64) -> Self {
        Self { sessions: DashMap::new(), locks: DashMap::new(), max_session_age: Duration::from_secs(max_session_age_seconds) }
    }

    fn host_lock(&self, hostname: &str) -> Arc<AsyncMutex<()>> {
        self.locks.entry(hostname.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn invalidate(&self, hostname: &str) {
        self.sessions.remove(hostname);
    }

    fn connect_blocking(target: &LinuxTarget) -> RunbookResult<Session> {
        let addr = format!("{}:{}", target.hostname, target.port);
        let tcp = TcpStream::connect(&addr).map_err(|e| RunbookError::ConnectionLost(format!("{addr}: {e}")))?;
        tcp.set_read_timeout(Some(target.connect_timeout)).ok();

        let mut session = Session::new().map_err(|e| RunbookError::Protocol(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| RunbookError::HostKeyFailed(format!("{}: {e}", target.hostname)))?;

        if let Some(key_path) = &target.private_key_path {
            session
                .userauth_pubkey_file(&target.username, None, std::path::Path::new(key_path), None)
                .map_err(|e| RunbookError::AuthFailed { host: target.hostname.clone(), reason: e.to_string() })?;
        } else if let Some(password) = &target.password {
            session
                .userauth_password(&target.username, password)
                .map_err(|e| RunbookError::AuthFailed { host: target.hostname.clone(), reason: e.to_string() })?;
        } else {
            return Err(RunbookError::AuthFailed { host: target.hostname.clone(), reason: "no credential supplied".into() });
        }

        if !session.authenticated() {
            return Err(RunbookError::AuthFailed { host: target.hostname.clone(), reason: "authentication not confirmed".into() });
        }

        Ok(session)
    }

    /// Get (or establish) a cached session for this host, refreshing
    /// when it has aged out.
    async fn get_session(&self, target: &LinuxTarget) -> RunbookResult<Arc<StdMutex<CachedSession>>> {
        let lock = self.host_lock(&target.hostname);
        let _guard = lock.lock().await;

        let stale = self
            .sessions
            .get(&target.hostname)
            .map(|entry| entry.lock().unwrap().created_at.elapsed() > self.max_session_age)
            .unwrap_or(true);

        if stale {
            let target_owned = target.clone();
            let session = tokio::task::spawn_blocking(move || Self::connect_blocking(&target_owned))
                .await
                .map_err(|e| RunbookError::Protocol(e.to_string()))??;
            self.sessions.insert(
                target_hostname_owned(target),
                Arc::new(StdMutex::new(CachedSession { session, created_at: Instant::now(), distro: None })),
            );
        }

        Ok(self.sessions.get(&target.hostname).unwrap().clone())
    }

    fn exec_blocking(cached: &Arc<StdMutex<CachedSession>>, command: &str) -> RunbookResult<ExecOutput> {
        let guard = cached.lock().unwrap();
        let mut channel = guard.session.channel_session().map_err(|e| RunbookError::Protocol(e.to_string()))?;
        channel.exec(command).map_err(|e| RunbookError::Protocol(e.to_string()))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(|e| RunbookError::Script(e.to_string()))?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).map_err(|e| RunbookError::Script(e.to_string()))?;

        channel.wait_close().map_err(|e| RunbookError::Protocol(e.to_string()))?;
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(ExecOutput { exit_code, stdout, stderr })
    }

    /// Base64-ships `script` to sidestep shell quoting; when
    /// `use_sudo` is set, wraps it in `sudo -S` with the password on
    /// stdin rather than argv.
    async fn execute_script(&self, target: &LinuxTarget, script: &str, use_sudo: bool) -> RunbookResult<ExecOutput> {
        let encoded = STANDARD.encode(script.as_bytes());
        let command = if use_sudo {
            let password = target.sudo_password.as_deref().unwrap_or("");
            format!("echo '{password}' | sudo -S bash -c \"echo '{encoded}' | base64 -d | bash\"")
        } else {
            format!("echo '{encoded}' | base64 -d | bash")
        };

        let cached = self.get_session(target).await?;
        let timeout = target.command_timeout;
        let result = tokio::time::timeout(timeout, {
            let cached = cached.clone();
            tokio::task::spawn_blocking(move || Self::exec_blocking(&cached, &command))
        })
        .await
        .map_err(|_| RunbookError::Timeout(timeout.as_secs()))?
        .map_err(|e| RunbookError::Protocol(e.to_string()))?;

        if let Err(ref e) = result {
            if e.invalidates_session() {
                self.invalidate(&target.hostname);
            }
        }
        result
    }

    /// Detects `ubuntu`, `rhel`, or `unknown` by reading `/etc/os-release`.
    pub async fn detect_distro(&self, target: &LinuxTarget) -> RunbookResult<String> {
        let output = self.execute_script(target, "cat /etc/os-release 2>/dev/null", false).await?;
        let lowered = output.stdout.to_lowercase();
        let distro = if lowered.contains("ubuntu") || lowered.contains("debian") {
            "ubuntu"
        } else if lowered.contains("rhel") || lowered.contains("red hat") || lowered.contains("centos") {
            "rhel"
        } else {
            "unknown"
        };
        if let Some(cached) = self.sessions.get(&target.hostname) {
            cached.lock().unwrap().distro = Some(distro.to_string());
        }
        Ok(distro.to_string())
    }

    /// Execute a runbook phase by phase: detect, then remediate and
    /// verify unless detect already reports compliant; a non-detect
    /// phase failure retries up to `def.retries` with exponential
    /// backoff, then — per the rollback contract — either runs
    /// `rollback_script` as a final step or raises an alert for manual
    /// ticket creation when the runbook defines no rollback.
    pub async fn run_runbook(&self, target: &LinuxTarget, def: &RunbookDefinition) -> RunbookResult<RunResult> {
        let started = std::time::Instant::now();
        let distro = self.detect_distro(target).await.unwrap_or_else(|_| "unknown".to_string());

        let phases = [Phase::Detect, Phase::Remediate, Phase::Verify];
        let mut steps = Vec::new();
        let mut step_no = 0u32;
        let mut rolled_back = false;

        for phase in phases {
            let Some(script) = def.script_for(phase, Some(distro.as_str())) else { continue };
            step_no += 1;

            let step = self.run_phase_with_retry(target, def, phase, script, step_no).await;
            let succeeded = step.result == StepResult::Ok;
            let stdout_excerpt = step.stdout_excerpt.clone();
            steps.push(step);

            if phase == Phase::Detect && succeeded && crate::reports_compliant(&stdout_excerpt) {
                break;
            }
            if phase != Phase::Detect && !succeeded {
                if let Some(rollback_script) = def.rollback_script.as_deref() {
                    step_no += 1;
                    let rollback_step = self.run_phase_with_retry(target, def, Phase::Rollback, rollback_script, step_no).await;
                    rolled_back = rollback_step.result == StepResult::Ok;
                    steps.push(rollback_step);
                } else {
                    tracing::error!(host = %target.hostname, runbook = %def.id, phase = phase.as_str(), "non-detect phase failed with no rollback script defined; raising alert for manual ticket creation");
                }
                break;
            }
        }

        let steps_total = phases.iter().filter(|p| def.script_for(**p, Some(distro.as_str())).is_some()).count() as u32;
        let steps_executed = steps.len() as u32;
        let non_rollback_ok = steps.iter().filter(|s| s.action != Phase::Rollback.as_str()).all(|s| s.result == StepResult::Ok);

        let resolution_status = if non_rollback_ok {
            ResolutionStatus::Success
        } else if rolled_back {
            ResolutionStatus::RolledBack
        } else if steps.iter().any(|s| s.result == StepResult::Ok) {
            ResolutionStatus::Partial
        } else {
            ResolutionStatus::Failed
        };

        Ok(RunResult {
            resolution_status,
            mttr_seconds: started.elapsed().as_secs_f64(),
            sla_met: started.elapsed() <= Duration::from_secs(def.timeout_seconds * steps_total.max(1) as u64),
            steps_executed,
            steps_total,
            steps,
        })
    }

    async fn run_phase_with_retry(
        &self,
        target: &LinuxTarget,
        def: &RunbookDefinition,
        phase: Phase,
        script: &str,
        step_no: u32,
    ) -> ActionStep {
        let use_sudo = def.requires_privilege && target.username != "root";
        let mut attempt = 0;
        let mut last_err: Option<RunbookError> = None;

        loop {
            match self.execute_script(target, script, use_sudo).await {
                Ok(output) => {
                    let (stdout_scrubbed, _) = crate::redact::scrub(&output.stdout);
                    let (stderr_scrubbed, _) = crate::redact::scrub(&output.stderr);
                    return ActionStep {
                        step: step_no,
                        action: phase.as_str().to_string(),
                        script_hash: crate::script_hash(script),
                        result: if output.exit_code == 0 { StepResult::Ok } else { StepResult::Failed },
                        exit_code: output.exit_code,
                        stdout_excerpt: excerpt(&stdout_scrubbed),
                        stderr_excerpt: excerpt(&stderr_scrubbed),
                        error_message: None,
                        timestamp: chrono::Utc::now(),
                    };
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    last_err = Some(e);
                    attempt += 1;
                    if !retryable || attempt > def.retries {
                        break;
                    }
                    let delay = Duration::from_secs_f64(def.retry_backoff.powi(attempt as i32));
                    tokio::time::sleep(delay).await;
                }
            }
        }

        ActionStep {
            step: step_no,
            action: phase.as_str().to_string(),
            script_hash: crate::script_hash(script),
            result: StepResult::Failed,
            exit_code: -1,
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            error_message: last_err.map(|e| e.to_string()),
            timestamp: chrono::Utc::now(),
        }
    }
}

fn target_hostname_owned(target: &LinuxTarget) -> String {
    target.hostname.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_target_defaults_to_root_port_22() {
        let target = LinuxTarget::new("10.0.0.5");
        assert_eq!(target.port, 22);
        assert_eq!(target.username, "root");
    }

    #[tokio::test]
    async fn connect_fails_fast_without_any_credential() {
        let target = LinuxTarget { password: None, private_key_path: None, ..LinuxTarget::new("127.0.0.1") };
        // Port 1 should refuse quickly; verifies the connect path
        // surfaces ConnectionLost (not a panic) when nothing is
        // listening rather than reaching the auth check.
        let mut target = target;
        target.port = 1;
        let result = SshTransport::connect_blocking(&target);
        assert!(result.is_err());
    }
}
