//! Minimal `TargetResolver`: one shared SSH identity and one shared
//! WinRM identity applied to whatever host/site a remediation targets.
//! `spec.md`'s credentials file schema only covers directory and SNMP
//! binds, so per-host remediation secrets are read from the
//! environment instead — operators with per-host credential vaults
//! can swap this for their own `TargetResolver` impl.

use compliance_healing::TargetResolver;
use compliance_runbooks::ssh::LinuxTarget;
use compliance_runbooks::winrm::WindowsTarget;

pub struct EnvTargetResolver {
    linux: Option<LinuxTarget>,
    windows: Option<WindowsTarget>,
}

impl EnvTargetResolver {
    pub fn from_env() -> Self {
        let linux = std::env::var("REMEDIATION_SSH_USER").ok().map(|user| {
            let mut target = LinuxTarget::new("");
            target.username = user;
            target.private_key_path = std::env::var("REMEDIATION_SSH_KEY_PATH").ok();
            target.sudo_password = std::env::var("REMEDIATION_SSH_SUDO_PASSWORD").ok();
            target
        });

        let windows = match (std::env::var("REMEDIATION_WINRM_USER"), std::env::var("REMEDIATION_WINRM_PASSWORD")) {
            (Ok(user), Ok(password)) => Some(WindowsTarget::new("", user, password)),
            _ => None,
        };

        Self { linux, windows }
    }
}

impl TargetResolver for EnvTargetResolver {
    fn resolve_linux(&self, _site: &str, host: &str) -> Option<LinuxTarget> {
        let mut target = self.linux.clone()?;
        target.hostname = host.to_string();
        Some(target)
    }

    fn resolve_windows(&self, _site: &str, host: &str) -> Option<WindowsTarget> {
        let mut target = self.windows.clone()?;
        target.hostname = host.to_string();
        Some(target)
    }
}
