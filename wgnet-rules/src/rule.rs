//! Packet-filter rule descriptors
//!
//! Rules are plain data. They only become an `iptables` invocation through
//! [`FilterRule::command`], so a [`RuleSet`] can be built and inspected
//! without touching the host.

use std::fmt;

use ipnet::Ipv4Net;

use crate::command::CommandSpec;

/// Packet-filter tool used for every rule
pub const IPTABLES: &str = "iptables";

/// Filter table chain a rule lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    /// Traffic routed through this host
    Forward,
    /// Traffic addressed to this host
    Input,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Forward => "FORWARD",
            Chain::Input => "INPUT",
        }
    }
}

/// What happens to a matching packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accept,
    Drop,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Drop => "DROP",
        }
    }
}

/// Direction of a rule edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// Append to the end of the chain
    Append,
    /// Delete the first identical rule
    Delete,
}

impl RuleOp {
    fn flag(&self) -> &'static str {
        match self {
            RuleOp::Append => "-A",
            RuleOp::Delete => "-D",
        }
    }
}

/// One rule in the `filter` table, scoped to traffic entering an interface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterRule {
    /// Chain the rule is appended to
    pub chain: Chain,
    /// Input interface (`-i`)
    pub in_interface: String,
    /// Destination address or network (`-d`)
    pub destination: Option<String>,
    /// TCP destination port (`-p tcp --dport`)
    pub tcp_port: Option<u16>,
    /// Rule target
    pub verdict: Verdict,
}

impl FilterRule {
    /// Block forwarding from the interface into its own subnet
    pub fn subnet_deny(interface: impl Into<String>, subnet: Ipv4Net) -> Self {
        Self {
            chain: Chain::Forward,
            in_interface: interface.into(),
            destination: Some(subnet.trunc().to_string()),
            tcp_port: None,
            verdict: Verdict::Drop,
        }
    }

    /// Allow forwarding from the interface to a network
    pub fn forward_allow(interface: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            chain: Chain::Forward,
            in_interface: interface.into(),
            destination: Some(network.into()),
            tcp_port: None,
            verdict: Verdict::Accept,
        }
    }

    /// Allow forwarding from the interface to one TCP port of one host
    pub fn host_port_allow(
        interface: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            chain: Chain::Forward,
            in_interface: interface.into(),
            destination: Some(host.into()),
            tcp_port: Some(port),
            verdict: Verdict::Accept,
        }
    }

    /// Drop everything else arriving on the interface for a chain
    pub fn lockdown(interface: impl Into<String>, chain: Chain) -> Self {
        Self {
            chain,
            in_interface: interface.into(),
            destination: None,
            tcp_port: None,
            verdict: Verdict::Drop,
        }
    }

    /// The `iptables` invocation that appends or deletes this rule
    pub fn command(&self, op: RuleOp) -> CommandSpec {
        CommandSpec::new(IPTABLES)
            .args(["-t", "filter", op.flag(), self.chain.as_str()])
            .args(self.match_args())
            .args(["-j", self.verdict.as_str()])
    }

    fn match_args(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.in_interface.clone()];
        if let Some(ref dest) = self.destination {
            args.push("-d".into());
            args.push(dest.clone());
        }
        if let Some(port) = self.tcp_port {
            args.push("-p".into());
            args.push("tcp".into());
            args.push("--dport".into());
            args.push(port.to_string());
        }
        args
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -i {}", self.chain.as_str(), self.in_interface)?;
        if let Some(ref dest) = self.destination {
            write!(f, " -d {}", dest)?;
        }
        if let Some(port) = self.tcp_port {
            write!(f, " -p tcp --dport {}", port)?;
        }
        write!(f, " -j {}", self.verdict.as_str())
    }
}

/// Ordered list of rules produced by one policy section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<FilterRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilterRule> {
        self.rules.iter()
    }
}

impl FromIterator<FilterRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = FilterRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RuleSet {
    type Item = FilterRule;
    type IntoIter = std::vec::IntoIter<FilterRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a FilterRule;
    type IntoIter = std::slice::Iter<'a, FilterRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
