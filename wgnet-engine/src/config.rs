//! Policy configuration and the on-disk config store

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where named policy configs live unless `--path` says otherwise
pub const DEFAULT_CONFIG_DIR: &str = "/etc/wgnet";

const CONFIG_EXTENSION: &str = "conf";

/// Policy configuration file
///
/// One file describes the routing, NAT and firewall policy of a single
/// WireGuard interface. The interface itself (keys, peers, addresses) is
/// configured by wg-quick; this file only says what traffic may cross it.
///
/// # Example Configuration
///
/// ```toml
/// interface = "wg0"
///
/// [routing]
/// route_subnet = false
/// networks = ["10.0.1.0/24", "192.168.5.10"]
///
/// [nat]
/// enabled = false
/// # out_interface = "eth0"
///
/// [[firewall_host]]
/// host = "10.0.0.5"
/// allowed_ports = [22, 443]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    /// WireGuard interface the policy applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Forwarding policy
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Source NAT for traffic leaving the tunnel
    #[serde(default)]
    pub nat: NatConfig,

    /// Hosts reachable through the tunnel on specific TCP ports
    #[serde(
        default,
        rename = "firewall_host",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub firewall_hosts: Vec<FirewallHostConfig>,
}

impl PolicyFile {
    /// Load a policy file without validating it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse a policy file from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Document written by `wgnet new`
    pub fn default_template(interface: &str) -> String {
        format!(
            r#"# wgnet policy configuration

# WireGuard interface this policy applies to. wg-quick must have a
# matching config, e.g. /etc/wireguard/{interface}.conf
interface = "{interface}"

[routing]
# Allow forwarding of the tunnel's own /24 subnet. When false, traffic
# from the tunnel to its own subnet is dropped.
route_subnet = false

# Networks (CIDR or single address) the tunnel may reach, in rule order
networks = []

[nat]
# Masquerade tunnel traffic leaving through out_interface
enabled = false
# out_interface = "eth0"

# Hosts reachable through the tunnel on selected TCP ports.
# Repeat the block for every host.
#
# [[firewall_host]]
# host = "10.0.0.5"
# allowed_ports = [22, 443]
"#
        )
    }

    /// Validate the file and turn it into a [`NetworkPolicy`]
    pub fn into_policy(self) -> Result<NetworkPolicy> {
        let interface = match self.interface {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err(Error::MissingInterface),
        };
        validate_interface_name(&interface)?;

        for network in &self.routing.networks {
            validate_network(network)?;
        }

        Ok(NetworkPolicy {
            interface,
            route_subnet: self.routing.route_subnet,
            routed_networks: self.routing.networks,
            nat_enabled: self.nat.enabled,
            nat_out_interface: self.nat.out_interface.filter(|s| !s.trim().is_empty()),
            firewall_hosts: self
                .firewall_hosts
                .into_iter()
                .map(|h| FirewallHost {
                    address: h.host.trim().to_string(),
                    allowed_ports: h.allowed_ports,
                })
                .collect(),
        })
    }
}

/// `[routing]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Whether the tunnel's own subnet may be forwarded
    #[serde(default)]
    pub route_subnet: bool,

    /// Routed networks, applied in this order
    #[serde(default)]
    pub networks: Vec<String>,
}

/// `[nat]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Required when NAT is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_interface: Option<String>,
}

/// `[[firewall_host]]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallHostConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub allowed_ports: Vec<u16>,
}

/// Validated policy for one orchestration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub interface: String,
    pub route_subnet: bool,
    pub routed_networks: Vec<String>,
    pub nat_enabled: bool,
    pub nat_out_interface: Option<String>,
    pub firewall_hosts: Vec<FirewallHost>,
}

impl NetworkPolicy {
    /// An empty policy: subnet not routed, nothing allowed, no NAT
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            route_subnet: false,
            routed_networks: Vec::new(),
            nat_enabled: false,
            nat_out_interface: None,
            firewall_hosts: Vec::new(),
        }
    }

    /// Load and validate a policy file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        PolicyFile::load(path)?.into_policy()
    }

    /// Parse and validate a policy from TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        PolicyFile::from_toml(content)?.into_policy()
    }

    /// Convert back to the file representation
    pub fn to_file(&self) -> PolicyFile {
        PolicyFile {
            interface: Some(self.interface.clone()),
            routing: RoutingConfig {
                route_subnet: self.route_subnet,
                networks: self.routed_networks.clone(),
            },
            nat: NatConfig {
                enabled: self.nat_enabled,
                out_interface: self.nat_out_interface.clone(),
            },
            firewall_hosts: self
                .firewall_hosts
                .iter()
                .map(|h| FirewallHostConfig {
                    host: h.address.clone(),
                    allowed_ports: h.allowed_ports.clone(),
                })
                .collect(),
        }
    }
}

/// A host reachable through the tunnel on a set of TCP ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallHost {
    pub address: String,
    pub allowed_ports: Vec<u16>,
}

impl FirewallHost {
    pub fn new(address: impl Into<String>, allowed_ports: Vec<u16>) -> Self {
        Self {
            address: address.into(),
            allowed_ports,
        }
    }
}

fn validate_interface_name(name: &str) -> Result<()> {
    if name.starts_with('-') || name.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(Error::Config(format!("invalid interface name: {}", name)));
    }
    Ok(())
}

fn validate_network(network: &str) -> Result<()> {
    let network = network.trim();
    if network.parse::<Ipv4Net>().is_ok() || network.parse::<Ipv4Addr>().is_ok() {
        return Ok(());
    }
    Err(Error::Config(format!(
        "invalid routed network (expected IPv4 CIDR or address): {}",
        network
    )))
}

/// Directory of named policy configs
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        // collecting the components drops trailing separators
        let root: PathBuf = root.as_ref().components().collect();
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a config name
    ///
    /// An existing file is used as a path directly; any other name maps to
    /// `<root>/<name>.conf`, so `office` and `office.conf` are the same config.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let direct = Path::new(name);
        if direct.is_file() {
            return direct.to_path_buf();
        }
        let stem = name
            .strip_suffix(CONFIG_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(name);
        self.root.join(format!("{}.{}", stem, CONFIG_EXTENSION))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    /// Load the raw file for a config name
    pub fn load_file(&self, name: &str) -> Result<PolicyFile> {
        if !self.exists(name) {
            return Err(Error::ConfigNotFound(name.to_string()));
        }
        PolicyFile::load(self.resolve(name))
    }

    /// Load and validate the policy for a config name
    pub fn load(&self, name: &str) -> Result<NetworkPolicy> {
        let path = self.resolve(name);
        log::debug!("Loading policy from {}", path.display());
        self.load_file(name)?.into_policy()
    }

    /// Write raw TOML under a config name, creating the root if needed
    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.resolve(name);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                create_private_dir(parent)?;
            }
        }
        fs::write(&path, content)?;
        log::info!("Wrote config {}", path.display());
        Ok(path)
    }

    /// Write the default template, refusing to overwrite unless `force`
    pub fn create(&self, name: &str, interface: &str, force: bool) -> Result<PathBuf> {
        let path = self.resolve(name);
        if path.exists() && !force {
            return Err(Error::ConfigExists(path));
        }
        self.write(name, &PolicyFile::default_template(interface))
    }

    /// Names of all configs in the root, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigDirMissing(self.root.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != CONFIG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

/// Interface name a config name most likely refers to
///
/// `wg0` and `/etc/wgnet/wg0.conf` both give `wg0`.
pub fn interface_hint(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        let toml = r#"
interface = "wg0"

[routing]
route_subnet = false
networks = ["10.0.1.0/24", "192.168.5.10"]

[nat]
enabled = true
out_interface = "eth0"

[[firewall_host]]
host = "10.0.0.5"
allowed_ports = [22, 443]

[[firewall_host]]
host = "10.0.0.6"
allowed_ports = [80]
"#;

        let policy = NetworkPolicy::from_toml(toml).unwrap();
        assert_eq!(policy.interface, "wg0");
        assert!(!policy.route_subnet);
        assert_eq!(policy.routed_networks, vec!["10.0.1.0/24", "192.168.5.10"]);
        assert!(policy.nat_enabled);
        assert_eq!(policy.nat_out_interface.as_deref(), Some("eth0"));
        assert_eq!(
            policy.firewall_hosts,
            vec![
                FirewallHost::new("10.0.0.5", vec![22, 443]),
                FirewallHost::new("10.0.0.6", vec![80]),
            ]
        );
    }

    #[test]
    fn test_minimal_policy_defaults() {
        let policy = NetworkPolicy::from_toml("interface = \"wg1\"\n").unwrap();
        assert_eq!(policy, NetworkPolicy::new("wg1"));
    }

    #[test]
    fn test_missing_interface() {
        let err = NetworkPolicy::from_toml("[routing]\nroute_subnet = true\n").unwrap_err();
        assert!(matches!(err, Error::MissingInterface));
        assert!(err.is_precondition());

        let err = NetworkPolicy::from_toml("interface = \"  \"\n").unwrap_err();
        assert!(matches!(err, Error::MissingInterface));
    }

    #[test]
    fn test_invalid_interface_name() {
        assert!(NetworkPolicy::from_toml("interface = \"-j ACCEPT\"\n").is_err());
        assert!(NetworkPolicy::from_toml("interface = \"wg/0\"\n").is_err());
    }

    #[test]
    fn test_invalid_network() {
        for network in ["10.0.1.0/33", "fd00::/64", "::1", "office"] {
            let toml = format!(
                "interface = \"wg0\"\n[routing]\nnetworks = [\"{}\"]\n",
                network
            );
            let err = NetworkPolicy::from_toml(&toml).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{} accepted", network);
        }
    }

    #[test]
    fn test_malformed_hosts_load() {
        // skipped at apply time, not rejected here
        let toml = r#"
interface = "wg0"

[[firewall_host]]
allowed_ports = [22]

[[firewall_host]]
host = "10.0.0.9"
"#;
        let policy = NetworkPolicy::from_toml(toml).unwrap();
        assert_eq!(policy.firewall_hosts.len(), 2);
        assert!(policy.firewall_hosts[0].address.is_empty());
        assert!(policy.firewall_hosts[1].allowed_ports.is_empty());
    }

    #[test]
    fn test_default_template_parses() {
        let policy = NetworkPolicy::from_toml(&PolicyFile::default_template("wg7")).unwrap();
        assert_eq!(policy, NetworkPolicy::new("wg7"));
    }

    #[test]
    fn test_to_file_round_trip() {
        let mut policy = NetworkPolicy::new("wg0");
        policy.routed_networks = vec!["10.1.0.0/16".into()];
        policy.firewall_hosts = vec![FirewallHost::new("10.1.0.4", vec![8080])];

        let toml = policy.to_file().to_toml().unwrap();
        assert_eq!(NetworkPolicy::from_toml(&toml).unwrap(), policy);
    }

    #[test]
    fn test_store_resolve() {
        let store = ConfigStore::new("/etc/wgnet//");
        assert_eq!(store.root(), Path::new("/etc/wgnet"));
        assert_eq!(store.resolve("office"), PathBuf::from("/etc/wgnet/office.conf"));
        assert_eq!(
            store.resolve("office.conf"),
            PathBuf::from("/etc/wgnet/office.conf")
        );
        assert_eq!(
            store.resolve("/tmp/other.conf"),
            PathBuf::from("/tmp/other.conf")
        );
    }

    #[test]
    fn test_store_resolve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("elsewhere.conf");
        fs::write(&file, "interface = \"wg4\"\n").unwrap();

        let store = ConfigStore::new(dir.path().join("wgnet"));
        let name = file.to_str().unwrap();
        assert_eq!(store.resolve(name), file);
        assert_eq!(store.load(name).unwrap().interface, "wg4");
    }

    #[test]
    fn test_store_create_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("wgnet"));

        assert!(matches!(store.list(), Err(Error::ConfigDirMissing(_))));
        assert!(matches!(store.load("office"), Err(Error::ConfigNotFound(_))));

        store.create("office", "wg0", false).unwrap();
        store.create("home", "wg1", false).unwrap();
        assert!(store.exists("office"));
        assert_eq!(store.list().unwrap(), vec!["home", "office"]);

        let policy = store.load("home").unwrap();
        assert_eq!(policy.interface, "wg1");

        assert!(matches!(
            store.create("office", "wg0", false),
            Err(Error::ConfigExists(_))
        ));
        store.create("office", "wg3", true).unwrap();
        assert_eq!(store.load("office").unwrap().interface, "wg3");
    }

    #[cfg(unix)]
    #[test]
    fn test_store_root_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("private");
        let store = ConfigStore::new(&root);
        store.create("wg0", "wg0", false).unwrap();

        let mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_interface_hint() {
        assert_eq!(interface_hint("wg0"), "wg0");
        assert_eq!(interface_hint("/etc/wgnet/office.conf"), "office");
    }
}
