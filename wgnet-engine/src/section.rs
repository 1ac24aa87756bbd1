//! Policy sections: routing, firewall, NAT and lockdown
//!
//! A section turns a [`NetworkPolicy`] into the rules to append on bring-up
//! and the rules to delete on teardown. Sections only produce data; the
//! orchestrator runs the rules through the executor.

use ipnet::Ipv4Net;
use wgnet_rules::{Chain, FilterRule, RuleSet, TUNNEL_SUBNET_PREFIX};

use crate::config::NetworkPolicy;
use crate::error::{Error, Result};
use crate::event::Stage;

/// Everything a section needs to build its rules
#[derive(Debug, Clone, Copy)]
pub struct SectionContext<'a> {
    pub policy: &'a NetworkPolicy,
    /// The tunnel's own subnet, if its address is known
    pub tunnel_subnet: Option<Ipv4Net>,
}

impl<'a> SectionContext<'a> {
    pub fn new(policy: &'a NetworkPolicy, tunnel_address: Option<std::net::Ipv4Addr>) -> Self {
        let tunnel_subnet = tunnel_address
            .and_then(|addr| Ipv4Net::new(addr, TUNNEL_SUBNET_PREFIX).ok())
            .map(|net| net.trunc());
        Self {
            policy,
            tunnel_subnet,
        }
    }

    fn interface(&self) -> &'a str {
        &self.policy.interface
    }
}

/// One layer of the policy with symmetric apply and remove rule sets
pub trait PolicySection {
    /// Rules to append, in order. `Err` fails the stage before anything runs.
    fn apply_rules(&self, ctx: &SectionContext<'_>) -> Result<RuleSet>;

    /// Rules to delete, in order. Any of them may already be absent.
    fn remove_rules(&self, ctx: &SectionContext<'_>) -> RuleSet;
}

/// Section for a rule-carrying stage; `None` for the device itself
pub fn section_for(stage: Stage) -> Option<&'static dyn PolicySection> {
    match stage {
        Stage::Interface => None,
        Stage::Routing => Some(&RoutingSection),
        Stage::Firewall => Some(&FirewallSection),
        Stage::Nat => Some(&NatSection),
        Stage::Lockdown => Some(&LockdownSection),
    }
}

/// Subnet deny plus one allow per routed network
pub struct RoutingSection;

impl PolicySection for RoutingSection {
    fn apply_rules(&self, ctx: &SectionContext<'_>) -> Result<RuleSet> {
        let mut rules = RuleSet::new();

        if !ctx.policy.route_subnet {
            // wg-quick routes the tunnel subnet on its own; without its
            // address that route cannot be blocked
            let subnet = ctx.tunnel_subnet.ok_or_else(|| {
                Error::Config(format!(
                    "cannot determine the subnet of {}, refusing to leave it routed",
                    ctx.interface()
                ))
            })?;
            rules.push(FilterRule::subnet_deny(ctx.interface(), subnet));
        }

        for network in &ctx.policy.routed_networks {
            rules.push(FilterRule::forward_allow(ctx.interface(), network.trim()));
        }

        Ok(rules)
    }

    fn remove_rules(&self, ctx: &SectionContext<'_>) -> RuleSet {
        let mut rules = RuleSet::new();

        // removed whether or not route_subnet was set when it was applied
        match ctx.tunnel_subnet {
            Some(subnet) => rules.push(FilterRule::subnet_deny(ctx.interface(), subnet)),
            None => log::warn!(
                "{}: subnet unknown, skipping removal of the subnet deny rule",
                ctx.interface()
            ),
        }

        for network in &ctx.policy.routed_networks {
            rules.push(FilterRule::forward_allow(ctx.interface(), network.trim()));
        }

        rules
    }
}

/// One allow per (host, port), hosts in order, ports in order
pub struct FirewallSection;

impl FirewallSection {
    fn rules(ctx: &SectionContext<'_>) -> RuleSet {
        let mut rules = RuleSet::new();

        for host in &ctx.policy.firewall_hosts {
            if host.address.is_empty() {
                log::warn!("{}: firewall host without address, skipped", ctx.interface());
                continue;
            }
            if host.allowed_ports.is_empty() {
                log::warn!(
                    "{}: firewall host {} has no ports, skipped",
                    ctx.interface(),
                    host.address
                );
                continue;
            }

            for &port in &host.allowed_ports {
                if port == 0 {
                    log::warn!(
                        "{}: firewall host {} port 0 skipped",
                        ctx.interface(),
                        host.address
                    );
                    continue;
                }
                rules.push(FilterRule::host_port_allow(
                    ctx.interface(),
                    host.address.as_str(),
                    port,
                ));
            }
        }

        rules
    }
}

impl PolicySection for FirewallSection {
    fn apply_rules(&self, ctx: &SectionContext<'_>) -> Result<RuleSet> {
        Ok(Self::rules(ctx))
    }

    fn remove_rules(&self, ctx: &SectionContext<'_>) -> RuleSet {
        Self::rules(ctx)
    }
}

/// Source NAT; present but inert
///
/// An enabled NAT section must name its output interface, otherwise the
/// stage fails. No masquerade rules are issued.
pub struct NatSection;

impl PolicySection for NatSection {
    fn apply_rules(&self, ctx: &SectionContext<'_>) -> Result<RuleSet> {
        if !ctx.policy.nat_enabled {
            return Ok(RuleSet::new());
        }

        let Some(out) = ctx.policy.nat_out_interface.as_deref() else {
            return Err(Error::Config(format!(
                "{}: NAT enabled but no output interface set",
                ctx.interface()
            )));
        };

        log::warn!(
            "{}: NAT via {} requested, masquerading is not managed by wgnet",
            ctx.interface(),
            out
        );
        Ok(RuleSet::new())
    }

    fn remove_rules(&self, _ctx: &SectionContext<'_>) -> RuleSet {
        RuleSet::new()
    }
}

/// Default deny on FORWARD and INPUT for the interface
pub struct LockdownSection;

impl LockdownSection {
    fn rules(ctx: &SectionContext<'_>) -> RuleSet {
        [Chain::Forward, Chain::Input]
            .into_iter()
            .map(|chain| FilterRule::lockdown(ctx.interface(), chain))
            .collect()
    }
}

impl PolicySection for LockdownSection {
    fn apply_rules(&self, ctx: &SectionContext<'_>) -> Result<RuleSet> {
        Ok(Self::rules(ctx))
    }

    fn remove_rules(&self, ctx: &SectionContext<'_>) -> RuleSet {
        Self::rules(ctx)
    }
}
