//! Windows/WinRM transport.
//!
//! No mainstream Rust WinRM crate exists in the ecosystem, so this
//! implements the WS-Management SOAP sequence directly over `reqwest`:
//! `CreateShell` -> `Command` -> `Receive` (polled until done) ->
//! `DeleteShell`, matching what `windows_collector.py` and the
//! `executor.py` WinRM path do through `pywinrm`. Authentication here
//! is HTTP Basic over TLS (port 5986); NTLM/Kerberos negotiation is
//! intentionally out of scope since it needs either an external SSPI
//! library or a hand-rolled NTLM crypto stack that nothing in the
//! pack grounds, and `spec.md` never mandates an on-prem AD join —
//! sites without a CA-issued cert should run NTLM through a sidecar
//! or switch the PowerShell remoting listener to HTTPS-basic.

use base64::{engine::general_purpose::STANDARD, Engine};
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::{RunbookError, RunbookResult};
use crate::{excerpt, ActionStep, Phase, ResolutionStatus, RunResult, RunbookDefinition, StepResult};

const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

#[derive(Debug, Clone)]
pub struct WindowsTarget {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub command_timeout: Duration,
}

impl WindowsTarget {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: 5986,
            username: username.into(),
            password: password.into(),
            use_ssl: true,
            command_timeout: Duration::from_secs(300),
        }
    }

    fn endpoint(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}/wsman", self.hostname, self.port)
    }
}

struct CachedShell {
    shell_id: String,
    created_at: Instant,
}

pub struct WinrmTransport {
    client: reqwest::Client,
    shells: DashMap<String, CachedShell>,
    max_shell_age: Duration,
}

impl WinrmTransport {
    pub fn new(max_shell_age_seconds: u64) -> Self {
        Self {
            client: reqwest::Client::builder().danger_accept_invalid_certs(false).build().unwrap_or_default(),
            shells: DashMap::new(),
            max_shell_age: Duration::from_secs(max_shell_age_seconds),
        }
    }

    async fn post_soap(&self, target: &WindowsTarget, action: &str, body: &str) -> RunbookResult<String> {
        let envelope = soap_envelope(target, action, body);
        let response = self
            .client
            .post(target.endpoint())
            .basic_auth(&target.username, Some(&target.password))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(envelope)
            .timeout(target.command_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RunbookError::Timeout(target.command_timeout.as_secs())
                } else if e.is_connect() {
                    RunbookError::ConnectionLost(target.hostname.clone())
                } else {
                    RunbookError::Protocol(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RunbookError::AuthFailed { host: target.hostname.clone(), reason: "401 from WinRM endpoint".into() });
        }
        if !response.status().is_success() {
            return Err(RunbookError::Protocol(format!("WinRM returned {}", response.status())));
        }

        response.text().await.map_err(|e| RunbookError::Protocol(e.to_string()))
    }

    async fn create_shell(&self, target: &WindowsTarget) -> RunbookResult<String> {
        let body = format!(
            r#"<rsp:Shell xmlns:rsp="{SHELL_URI}"><rsp:InputStreams>stdin</rsp:InputStreams><rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>"#
        );
        let response = self.post_soap(target, "http://schemas.xmlsoap.org/ws/transfer/Create", &body).await?;
        extract_tag(&response, "Selector", Some("ShellId"))
            .or_else(|| extract_tag(&response, "ShellId", None))
            .ok_or_else(|| RunbookError::Protocol("CreateShell response missing ShellId".into()))
    }

    async fn run_command(&self, target: &WindowsTarget, shell_id: &str, command: &str) -> RunbookResult<String> {
        let encoded = STANDARD.encode(encode_utf16le(command));
        let body = format!(
            r#"<rsp:CommandLine xmlns:rsp="{SHELL_URI}"><rsp:Command>powershell.exe -NoProfile -NonInteractive -EncodedCommand {encoded}</rsp:Command></rsp:CommandLine>"#
        );
        let response = self
            .post_soap(target, "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command", &body)
            .await?;
        extract_tag(&response, "CommandId", None).ok_or_else(|| RunbookError::Protocol("Command response missing CommandId".into()))
    }

    async fn receive(&self, target: &WindowsTarget, shell_id: &str, command_id: &str) -> RunbookResult<(String, String, Option<i32>, bool)> {
        let body = format!(
            r#"<rsp:Receive xmlns:rsp="{SHELL_URI}"><rsp:DesiredStream CommandId="{command_id}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#
        );
        let response = self
            .post_soap(target, "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive", &body)
            .await?;

        let stdout = extract_all_streams(&response, "stdout");
        let stderr = extract_all_streams(&response, "stderr");
        let exit_code = extract_tag(&response, "ExitCode", None).and_then(|s| s.parse().ok());
        let done = response.contains("CommandState=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done\"");

        let _ = shell_id;
        Ok((stdout, stderr, exit_code, done))
    }

    async fn delete_shell(&self, target: &WindowsTarget, shell_id: &str) -> RunbookResult<()> {
        let body = format!(r#"<rsp:Shell xmlns:rsp="{SHELL_URI}" ShellId="{shell_id}"/>"#);
        self.post_soap(target, "http://schemas.xmlsoap.org/ws/transfer/Delete", &body).await?;
        Ok(())
    }

    async fn get_shell(&self, target: &WindowsTarget) -> RunbookResult<String> {
        let stale = self
            .shells
            .get(&target.hostname)
            .map(|entry| entry.created_at.elapsed() > self.max_shell_age)
            .unwrap_or(true);

        if stale {
            let shell_id = self.create_shell(target).await?;
            self.shells.insert(target.hostname.clone(), CachedShell { shell_id, created_at: Instant::now() });
        }

        Ok(self.shells.get(&target.hostname).unwrap().shell_id.clone())
    }

    pub fn invalidate(&self, hostname: &str) {
        self.shells.remove(hostname);
    }

    /// Run a PowerShell script to completion, polling `Receive` until
    /// the command reports `Done`.
    pub async fn execute_script(&self, target: &WindowsTarget, script: &str) -> RunbookResult<(String, String, i32)> {
        let shell_id = self.get_shell(target).await?;
        let command_id = self.run_command(target, &shell_id, script).await?;

        let deadline = Instant::now() + target.command_timeout;
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = 0;

        loop {
            let (out_chunk, err_chunk, code, done) = self.receive(target, &shell_id, &command_id).await?;
            stdout.push_str(&out_chunk);
            stderr.push_str(&err_chunk);
            if let Some(c) = code {
                exit_code = c;
            }
            if done {
                break;
            }
            if Instant::now() > deadline {
                self.invalidate(&target.hostname);
                return Err(RunbookError::Timeout(target.command_timeout.as_secs()));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        Ok((stdout, stderr, exit_code))
    }

    /// Mirrors the SSH transport's rollback contract: a non-detect
    /// phase failure runs `rollback_script` as a final step when the
    /// runbook defines one, otherwise raises an alert for manual
    /// ticket creation.
    pub async fn run_runbook(&self, target: &WindowsTarget, def: &RunbookDefinition) -> RunbookResult<RunResult> {
        let started = Instant::now();
        let phases = [Phase::Detect, Phase::Remediate, Phase::Verify];
        let mut steps = Vec::new();
        let mut step_no = 0u32;
        let mut rolled_back = false;

        for phase in phases {
            let Some(script) = def.script_for(phase, None) else { continue };
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

        let shell_id = self.shells.get(&target.hostname).map(|s| s.shell_id.clone());
        if let Some(shell_id) = shell_id {
            let _ = self.delete_shell(target, &shell_id).await;
            self.invalidate(&target.hostname);
        }

        let steps_total = phases.iter().filter(|p| def.script_for(**p, None).is_some()).count() as u32;
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

    async fn run_phase_with_retry(&self, target: &WindowsTarget, def: &RunbookDefinition, phase: Phase, script: &str, step_no: u32) -> ActionStep {
        let mut attempt = 0;
        let mut last_err = None;

        loop {
            match self.execute_script(target, script).await {
                Ok((stdout, stderr, exit_code)) => {
                    let (stdout_scrubbed, _) = crate::redact::scrub(&stdout);
                    let (stderr_scrubbed, _) = crate::redact::scrub(&stderr);
                    return ActionStep {
                        step: step_no,
                        action: phase.as_str().to_string(),
                        script_hash: crate::script_hash(script),
                        result: if exit_code == 0 { StepResult::Ok } else { StepResult::Failed },
                        exit_code,
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
                    tokio::time::sleep(Duration::from_secs_f64(def.retry_backoff.powi(attempt as i32))).await;
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

fn soap_envelope(target: &WindowsTarget, action: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:wsman="{WSMAN_NS}">
<s:Header>
<wsa:To>{}</wsa:To>
<wsa:Action>{action}</wsa:Action>
<wsman:ResourceURI>{SHELL_URI}</wsman:ResourceURI>
</s:Header>
<s:Body>{body}</s:Body>
</s:Envelope>"#,
        target.endpoint()
    )
}

fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Pulls the text content of the first `<...tag ...>text</...tag>`
/// occurrence, optionally scoped to an attribute name match.
fn extract_tag(xml: &str, tag: &str, attr_name: Option<&str>) -> Option<String> {
    if let Some(attr_name) = attr_name {
        let needle = format!("Name=\"{attr_name}\"");
        let start = xml.find(&needle)?;
        let after = &xml[start..];
        let gt = after.find('>')?;
        let rest = &after[gt + 1..];
        let end = rest.find('<')?;
        return Some(rest[..end].to_string());
    }
    let open_start = match (xml.find(&format!(":{tag} ")), xml.find(&format!(":{tag}>"))) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let after = &xml[open_start..];
    let gt = after.find('>')?;
    let rest = &after[gt + 1..];
    let end = rest.find('<')?;
    Some(rest[..end].to_string())
}

fn extract_all_streams(xml: &str, stream_name: &str) -> String {
    let needle = format!("Name=\"{stream_name}\"");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(pos) = rest.find(&needle) {
        let after = &rest[pos..];
        if let Some(gt) = after.find('>') {
            let tail = &after[gt + 1..];
            if let Some(end) = tail.find('<') {
                if let Ok(decoded) = STANDARD.decode(&tail[..end]) {
                    out.push(String::from_utf8_lossy(&decoded).to_string());
                }
                rest = &tail[end..];
                continue;
            }
        }
        break;
    }
    out.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_utf16le_for_encoded_command() {
        let encoded = encode_utf16le("hi");
        assert_eq!(encoded, vec![b'h', 0, b'i', 0]);
    }

    #[test]
    fn extracts_shell_id_from_selector() {
        let xml = r#"<s:Body><rsp:Selector Name="ShellId">ABCD-1234</rsp:Selector></s:Body>"#;
        assert_eq!(extract_tag(xml, "Selector", Some("ShellId")).as_deref(), Some("ABCD-1234"));
    }

    #[test]
    fn detects_done_state() {
        let xml = r#"<rsp:CommandState CommandId="x" State="CommandState=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done\""/>"#;
        assert!(xml.contains("CommandState/Done"));
    }
}
