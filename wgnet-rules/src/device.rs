//! WireGuard device probing and control
//!
//! The tunnel device itself is managed by the stock WireGuard tools:
//! `wg-quick up|down` brings it up and down (as a [`CommandSpec`], so it goes
//! through the executor like every other state change), and `wg show` is used
//! to ask whether it exists. Probing is read-only and is never simulated,
//! even in dry-run mode.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use ipnet::Ipv4Net;

use crate::command::{CommandOutput, CommandSpec};
use crate::error::{Error, Result};

/// WireGuard query tool
pub const WG: &str = "wg";

/// WireGuard interface bring-up tool
pub const WG_QUICK: &str = "wg-quick";

/// Where wg-quick keeps interface configs
pub const DEFAULT_WG_CONFIG_DIR: &str = "/etc/wireguard";

/// Whether the tunnel device is present on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Running,
    NotRunning,
}

impl InterfaceState {
    pub fn is_running(&self) -> bool {
        matches!(self, InterfaceState::Running)
    }
}

/// Read-only view of the host's tunnel devices
pub trait Prober {
    /// Query whether the device exists.
    ///
    /// A refused query is [`Error::PermissionDenied`], never `NotRunning`.
    fn probe(&self, interface: &str) -> Result<InterfaceState>;

    /// Whether the interface-level config artifact exists
    fn config_exists(&self, interface: &str) -> bool;

    /// IPv4 address of the interface, if one can be determined
    fn interface_address(&self, interface: &str) -> Result<Option<Ipv4Addr>>;

    /// Free-form device details for display
    fn describe(&self, _interface: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Names of the active tunnel devices
    fn list_interfaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Command that creates and configures the device from its wg-quick config
pub fn bring_up_command(interface: &str) -> CommandSpec {
    CommandSpec::new(WG_QUICK).args(["up", interface])
}

/// Command that removes the device
pub fn tear_down_command(interface: &str) -> CommandSpec {
    CommandSpec::new(WG_QUICK).args(["down", interface])
}

/// Prober backed by `wg show` and the wg-quick config directory
#[derive(Debug, Clone)]
pub struct WgProber {
    config_dir: PathBuf,
}

impl WgProber {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `<config-dir>/<interface>.conf`
    pub fn config_path(&self, interface: &str) -> PathBuf {
        self.config_dir.join(format!("{}.conf", interface))
    }

    fn wg(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(WG)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::Spawn {
                program: WG.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for WgProber {
    fn default() -> Self {
        Self::new(DEFAULT_WG_CONFIG_DIR)
    }
}

impl Prober for WgProber {
    fn probe(&self, interface: &str) -> Result<InterfaceState> {
        let output = self.wg(&["show", interface, "public-key"])?;
        classify_probe(interface, output)
    }

    fn config_exists(&self, interface: &str) -> bool {
        self.config_path(interface).exists()
    }

    fn interface_address(&self, interface: &str) -> Result<Option<Ipv4Addr>> {
        #[cfg(target_os = "linux")]
        {
            if let Some(addr) = crate::linux::interface_ipv4(interface)? {
                return Ok(Some(addr));
            }
        }

        let path = self.config_path(interface);
        match config_address(&path) {
            Ok(addr) => Ok(addr),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn describe(&self, interface: &str) -> Result<Option<String>> {
        let output = self.wg(&["show", interface])?;
        if !output.is_success() {
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    fn list_interfaces(&self) -> Result<Vec<String>> {
        let output = self.wg(&["show", "interfaces"])?;
        if output.stderr.contains("Operation not permitted") {
            return Err(Error::PermissionDenied("*".into()));
        }
        let output = output.into_result(WG)?;
        Ok(output.stdout.split_whitespace().map(String::from).collect())
    }
}

/// Map a `wg show <iface>` result onto the three probe outcomes
fn classify_probe(interface: &str, output: CommandOutput) -> Result<InterfaceState> {
    if output.is_success() {
        return Ok(InterfaceState::Running);
    }

    let stderr = output.stderr.as_str();
    if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
        return Err(Error::PermissionDenied(interface.to_string()));
    }
    if stderr.contains("No such device") {
        return Ok(InterfaceState::NotRunning);
    }

    Err(Error::CommandFailed {
        program: WG.to_string(),
        status: output.status(),
        stderr: stderr.trim().to_string(),
    })
}

/// First IPv4 `Address` of the `[Interface]` section of a wg-quick config
pub fn config_address(path: &Path) -> Result<Option<Ipv4Addr>> {
    let content = fs::read_to_string(path)?;
    Ok(parse_interface_address(&content))
}

fn parse_interface_address(content: &str) -> Option<Ipv4Addr> {
    let mut in_interface = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.starts_with('[') {
            in_interface = line.eq_ignore_ascii_case("[interface]");
            continue;
        }
        if !in_interface {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("address") {
            continue;
        }

        for entry in value.split(',').map(str::trim) {
            if let Ok(net) = entry.parse::<Ipv4Net>() {
                return Some(net.addr());
            }
            if let Ok(addr) = entry.parse::<Ipv4Addr>() {
                return Some(addr);
            }
        }
    }

    None
}
