//! Bring-up and teardown state machine
//!
//! Bring-up walks [`Stage::BRING_UP`]: the device, then routing, firewall,
//! NAT and lockdown rules. When a stage fails, the rules that stage already
//! appended are deleted, then every earlier stage is undone in reverse, so
//! the host ends either fully up or fully down.
//!
//! Teardown walks [`Stage::TEARDOWN`] unconditionally. Removal problems and
//! a refused device query are logged and recorded in the report, never
//! returned.

use std::net::Ipv4Addr;

use wgnet_rules::device::{bring_up_command, tear_down_command};
use wgnet_rules::{Executor, InterfaceState, Iptables, Prober, RemovalOutcome, RuleSet};

use crate::config::NetworkPolicy;
use crate::error::{Error, Result};
use crate::event::{BringUpOutcome, OrchestratorState, Stage, TeardownReport};
use crate::section::{section_for, SectionContext};

/// Drives one interface's policy through the executor
pub struct Orchestrator<'a> {
    executor: &'a dyn Executor,
    prober: &'a dyn Prober,
    state: OrchestratorState,
}

/// Rules a stage managed to append before it failed
struct StageFailure {
    applied: RuleSet,
    error: Error,
}

impl<'a> Orchestrator<'a> {
    pub fn new(executor: &'a dyn Executor, prober: &'a dyn Prober) -> Self {
        Self {
            executor,
            prober,
            state: OrchestratorState::Idle,
        }
    }

    /// Current state; `Idle` or `Up` between calls
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn set_state(&mut self, state: OrchestratorState) {
        if self.state != state {
            log::trace!("state: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Query the device, keeping permission problems distinct
    pub fn probe(&self, interface: &str) -> Result<InterfaceState> {
        self.prober.probe(interface).map_err(|e| {
            if e.is_permission_denied() {
                Error::PermissionDenied(interface.to_string())
            } else {
                Error::Rules(e)
            }
        })
    }

    /// Bring the interface and its policy up
    ///
    /// `Err` means a precondition or permission failure; nothing was
    /// touched. Stage failures are rolled back and reported as an outcome.
    pub fn up(&mut self, policy: &NetworkPolicy, force: bool) -> Result<BringUpOutcome> {
        let iface = policy.interface.as_str();
        if iface.is_empty() {
            return Err(Error::MissingInterface);
        }
        if !self.prober.config_exists(iface) {
            return Err(Error::InterfaceConfigMissing(iface.to_string()));
        }

        let running = self.probe(iface)?.is_running();
        if running && !force {
            log::info!("{}: already up", iface);
            return Ok(BringUpOutcome::AlreadyUp);
        }

        self.set_state(OrchestratorState::BringingUpInterface);
        if running {
            log::info!("{}: already running, re-applying policy", iface);
        } else {
            log::debug!("{}: bringing up device", iface);
            if let Err(e) = self.executor.run_checked(&bring_up_command(iface)) {
                log::error!("{}: error setting up device: {}", iface, e);
                self.set_state(OrchestratorState::Idle);
                return Ok(BringUpOutcome::DeviceSetupFailed);
            }
        }

        let ctx = SectionContext::new(policy, self.tunnel_address(iface));
        let mut completed: Vec<(Stage, RuleSet)> = vec![(Stage::Interface, RuleSet::new())];

        for stage in Stage::BRING_UP.into_iter().skip(1) {
            self.set_state(stage.applying_state());
            log::debug!("{}: configuring {}", iface, stage);

            match self.apply_stage(stage, &ctx) {
                Ok(applied) => completed.push((stage, applied)),
                Err(failure) => {
                    log::error!(
                        "{}: error configuring {}: {}, rolling back",
                        iface,
                        stage,
                        failure.error
                    );
                    self.remove_applied(&failure.applied);
                    self.roll_back(iface, &completed);
                    self.set_state(OrchestratorState::Idle);
                    return Ok(BringUpOutcome::for_failed_stage(stage));
                }
            }
        }

        self.set_state(OrchestratorState::Up);
        log::info!("{}: up", iface);
        Ok(BringUpOutcome::Up)
    }

    /// Remove the policy and the interface
    ///
    /// Every step is attempted whether or not the interface is running.
    pub fn down(&mut self, policy: &NetworkPolicy) -> TeardownReport {
        let iface = policy.interface.as_str();
        let ctx = SectionContext::new(policy, self.tunnel_address(iface));
        let iptables = Iptables::new(self.executor);
        let mut report = TeardownReport::new();

        for stage in Stage::TEARDOWN {
            self.set_state(stage.removing_state());
            match section_for(stage) {
                Some(section) => {
                    log::debug!("{}: removing {}", iface, stage);
                    let rules = section.remove_rules(&ctx);
                    report.record(stage, iptables.remove_all(&rules));
                }
                None => {
                    let outcome = match self.probe(iface) {
                        Ok(InterfaceState::NotRunning) => {
                            log::debug!("{}: device not running", iface);
                            RemovalOutcome::NotFound
                        }
                        Ok(InterfaceState::Running) => self.tear_down_interface(iface),
                        Err(e) => {
                            if e.is_permission_denied() {
                                report.permission_denied = true;
                            }
                            log::warn!("{}: {}, tearing down anyway", iface, e);
                            self.tear_down_interface(iface)
                        }
                    };
                    report.record_outcome(stage, &outcome);
                }
            }
        }

        self.set_state(OrchestratorState::Idle);

        let total = report.total();
        if report.permission_denied {
            log::error!("{}: down without permission to query the device", iface);
        } else if total.failed > 0 {
            log::warn!(
                "{}: down with {} failed removal(s), see log",
                iface,
                total.failed
            );
        } else {
            log::info!("{}: down", iface);
        }
        report
    }

    /// Teardown followed by bring-up
    pub fn restart(&mut self, policy: &NetworkPolicy, force: bool) -> Result<BringUpOutcome> {
        let report = self.down(policy);
        if !report.is_clean() {
            log::warn!("{}: teardown incomplete, bringing up anyway", policy.interface);
        }
        self.up(policy, force)
    }

    fn apply_stage(
        &self,
        stage: Stage,
        ctx: &SectionContext<'_>,
    ) -> std::result::Result<RuleSet, StageFailure> {
        let mut applied = RuleSet::new();
        let Some(section) = section_for(stage) else {
            return Ok(applied);
        };

        let rules = section.apply_rules(ctx).map_err(|error| StageFailure {
            applied: RuleSet::new(),
            error,
        })?;

        let iptables = Iptables::new(self.executor);
        for rule in rules {
            if let Err(e) = iptables.apply(&rule) {
                return Err(StageFailure {
                    applied,
                    error: e.into(),
                });
            }
            applied.push(rule);
        }
        Ok(applied)
    }

    /// Undo completed stages, newest first
    fn roll_back(&mut self, iface: &str, completed: &[(Stage, RuleSet)]) {
        for (stage, applied) in completed.iter().rev() {
            self.set_state(stage.removing_state());
            match stage {
                Stage::Interface => {
                    // we brought it up (or were forced onto it), so no probe
                    self.tear_down_interface(iface);
                }
                _ => self.remove_applied(applied),
            }
        }
    }

    /// Delete exactly the rules that were appended, in reverse
    fn remove_applied(&self, applied: &RuleSet) {
        let iptables = Iptables::new(self.executor);
        for rule in applied.rules().iter().rev() {
            iptables.remove(rule);
        }
    }

    fn tear_down_interface(&mut self, iface: &str) -> RemovalOutcome {
        self.set_state(OrchestratorState::TearingDownInterface);

        match self.executor.run_checked(&tear_down_command(iface)) {
            Ok(_) => RemovalOutcome::Removed,
            Err(e) => {
                log::error!("{}: error tearing down device: {}", iface, e);
                RemovalOutcome::Failed(e.to_string())
            }
        }
    }

    fn tunnel_address(&self, iface: &str) -> Option<Ipv4Addr> {
        match self.prober.interface_address(iface) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("{}: cannot read interface address: {}", iface, e);
                None
            }
        }
    }
}
