//! Install the agent as a user service: launchd on macOS, systemd on Linux
//!
//! The installed service runs this binary with the arguments it was
//! installed with; `install` callers append `--debug false` so the service
//! logs to a file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SYSTEMD_UNIT: &str = "bridgeup";
const LAUNCHD_LABEL: &str = "dev.bridgeup.agent";

/// Init system that owns the user service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)] // only one variant is constructed per target
enum Backend {
    Launchd,
    Systemd,
}

/// Control operations issued to the init system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Query,
    Enable,
    Disable,
    Reload,
}

impl Backend {
    fn current() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Backend::Launchd)
        } else if cfg!(target_os = "linux") {
            Some(Backend::Systemd)
        } else {
            None
        }
    }

    fn unit_path(self, home: &Path) -> PathBuf {
        match self {
            Backend::Launchd => home
                .join("Library/LaunchAgents")
                .join(format!("{}.plist", LAUNCHD_LABEL)),
            Backend::Systemd => home
                .join(".config/systemd/user")
                .join(format!("{}.service", SYSTEMD_UNIT)),
        }
    }

    fn render(self, binary_path: &Path, arguments: &[String], home: &Path) -> String {
        match self {
            Backend::Launchd => launchd_plist(binary_path, arguments, home),
            Backend::Systemd => systemd_unit(binary_path, arguments),
        }
    }

    /// argv for `action`; `None` when the backend has no such step
    fn command(self, action: Action, unit_path: &Path) -> Option<Vec<String>> {
        let unit_file = unit_path.display().to_string();
        let argv: Vec<&str> = match (self, action) {
            (Backend::Launchd, Action::Start) => vec!["launchctl", "load", "-w", unit_file.as_str()],
            (Backend::Launchd, Action::Stop) => vec!["launchctl", "unload", unit_file.as_str()],
            (Backend::Launchd, Action::Query) => vec!["launchctl", "list", LAUNCHD_LABEL],
            (Backend::Launchd, Action::Enable | Action::Disable | Action::Reload) => return None,
            (Backend::Systemd, action) => {
                let verb = match action {
                    Action::Start => "start",
                    Action::Stop => "stop",
                    Action::Query => "is-active",
                    Action::Enable => "enable",
                    Action::Disable => "disable",
                    Action::Reload => return Some(to_argv(&["systemctl", "--user", "daemon-reload"])),
                };
                vec!["systemctl", "--user", verb, SYSTEMD_UNIT]
            }
        };
        Some(to_argv(&argv))
    }

    /// Failures that leave the service in the requested state
    fn is_benign(self, action: Action, stderr: &str) -> bool {
        self == Backend::Launchd
            && action == Action::Start
            && stderr.to_ascii_lowercase().contains("already loaded")
    }

    fn status_from(self, success: bool, stdout: &str) -> ServiceStatus {
        let running = match self {
            Backend::Launchd => success,
            Backend::Systemd => stdout.trim() == "active",
        };
        if running {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Launchd => write!(f, "launchd"),
            Backend::Systemd => write!(f, "systemd"),
        }
    }
}

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Cannot locate the home directory")
}

/// Run one control step; `Ok(None)` if the backend skips it
fn control(backend: Backend, action: Action, unit_path: &Path) -> Result<Option<Output>> {
    let Some(argv) = backend.command(action, unit_path) else {
        return Ok(None);
    };
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .with_context(|| format!("Failed to run {}", argv.join(" ")))?;
    Ok(Some(output))
}

/// Run one control step and fail unless it succeeded
fn require(backend: Backend, action: Action, unit_path: &Path) -> Result<()> {
    let Some(output) = control(backend, action, unit_path)? else {
        return Ok(());
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() || backend.is_benign(action, &stderr) {
        return Ok(());
    }
    anyhow::bail!("{} {:?} failed: {}", backend, action, stderr.trim())
}

/// Installs and controls the bridgeup user service
pub struct ServiceManager {
    backend: Option<Backend>,
    arguments: Vec<String>,
}

impl ServiceManager {
    pub fn new(arguments: Vec<String>) -> Self {
        Self {
            backend: Backend::current(),
            arguments,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.is_some()
    }

    fn backend(&self, operation: &str) -> Result<Backend> {
        self.backend
            .with_context(|| format!("Service {} is not supported on this platform", operation))
    }

    fn installed_unit(backend: Backend) -> Result<PathBuf> {
        let unit_path = backend.unit_path(&home_dir()?);
        if !unit_path.exists() {
            anyhow::bail!("bridgeup service is not installed; run 'bridgeup install' first");
        }
        Ok(unit_path)
    }

    /// Write the unit for this invocation's arguments, replacing any
    /// previous installation
    pub fn install(&self) -> Result<()> {
        let backend = self.backend("installation")?;
        self.uninstall().ok();

        let binary_path =
            std::env::current_exe().context("Cannot resolve the bridgeup executable")?;
        let home = home_dir()?;
        let unit_path = backend.unit_path(&home);
        if let Some(dir) = unit_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        fs::write(
            &unit_path,
            backend.render(&binary_path, &self.arguments, &home),
        )
        .with_context(|| format!("Failed to write {}", unit_path.display()))?;
        require(backend, Action::Reload, &unit_path)?;

        println!("Installed {} service at {}", backend, unit_path.display());
        println!("Run 'bridgeup start' to launch it");
        Ok(())
    }

    pub fn uninstall(&self) -> Result<()> {
        let backend = self.backend("uninstall")?;
        let unit_path = backend.unit_path(&home_dir()?);
        if !unit_path.exists() {
            println!("bridgeup service is not installed");
            return Ok(());
        }

        require(backend, Action::Stop, &unit_path).ok();
        require(backend, Action::Disable, &unit_path).ok();
        fs::remove_file(&unit_path)
            .with_context(|| format!("Failed to remove {}", unit_path.display()))?;
        require(backend, Action::Reload, &unit_path)?;

        println!("Removed {}", unit_path.display());
        Ok(())
    }

    /// Start now and at every login
    pub fn start(&self) -> Result<()> {
        let backend = self.backend("start")?;
        let unit_path = Self::installed_unit(backend)?;
        require(backend, Action::Start, &unit_path)?;
        require(backend, Action::Enable, &unit_path).ok();
        println!("bridgeup service started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let backend = self.backend("stop")?;
        let unit_path = Self::installed_unit(backend)?;
        require(backend, Action::Stop, &unit_path)?;
        println!("bridgeup service stopped");
        Ok(())
    }

    pub fn restart(&self) -> Result<()> {
        self.stop().ok();
        self.start()
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        let Some(backend) = self.backend else {
            return Ok(ServiceStatus::NotInstalled);
        };
        let unit_path = backend.unit_path(&home_dir()?);
        if !unit_path.exists() {
            return Ok(ServiceStatus::NotInstalled);
        }

        Ok(match control(backend, Action::Query, &unit_path)? {
            Some(output) => backend.status_from(
                output.status.success(),
                &String::from_utf8_lossy(&output.stdout),
            ),
            None => ServiceStatus::Stopped,
        })
    }
}

/// Quote an argument for a systemd `ExecStart=` line
fn systemd_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '\\' | '$' | '%' | ';'));
    if plain {
        return arg.to_string();
    }

    let escaped = arg
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "$$")
        .replace('%', "%%");
    format!("\"{}\"", escaped)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn systemd_unit(binary_path: &Path, arguments: &[String]) -> String {
    let exec_start = std::iter::once(binary_path.display().to_string())
        .chain(arguments.iter().cloned())
        .map(|arg| systemd_quote(&arg))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        r#"[Unit]
Description=Bridgeup Tunnel Agent
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exec_start}
Restart=always
RestartSec=5s

[Install]
WantedBy=default.target
"#
    )
}

fn launchd_plist(binary_path: &Path, arguments: &[String], home: &Path) -> String {
    let program_arguments = std::iter::once(binary_path.display().to_string())
        .chain(arguments.iter().cloned())
        .map(|arg| format!("        <string>{}</string>", xml_escape(&arg)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{program_arguments}
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>WorkingDirectory</key>
    <string>{home}</string>
</dict>
</plist>
"#,
        label = LAUNCHD_LABEL,
        home = xml_escape(&home.display().to_string()),
    )
}

/// Service status
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    NotInstalled,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "Running"),
            ServiceStatus::Stopped => write!(f, "Stopped"),
            ServiceStatus::NotInstalled => write!(f, "Not installed"),
        }
    }
}
