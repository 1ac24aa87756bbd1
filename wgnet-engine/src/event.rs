//! Orchestration states, stages and outcomes

use wgnet_rules::{RemovalOutcome, RemovalTally};

/// Where the orchestrator is in a bring-up or teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrchestratorState {
    /// Nothing applied, or everything removed again
    #[default]
    Idle,
    BringingUpInterface,
    ConfiguringRouting,
    ConfiguringFirewall,
    ConfiguringNat,
    LockingDown,
    /// All stages applied
    Up,
    RemovingLockdown,
    RemovingNat,
    RemovingFirewall,
    RemovingRouting,
    TearingDownInterface,
}

impl OrchestratorState {
    /// `Idle` and `Up` are the only states that outlive a call
    pub fn is_stable(&self) -> bool {
        matches!(self, OrchestratorState::Idle | OrchestratorState::Up)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "Idle",
            OrchestratorState::BringingUpInterface => "Bringing up interface...",
            OrchestratorState::ConfiguringRouting => "Configuring routing...",
            OrchestratorState::ConfiguringFirewall => "Configuring firewall...",
            OrchestratorState::ConfiguringNat => "Configuring NAT...",
            OrchestratorState::LockingDown => "Locking down...",
            OrchestratorState::Up => "Up",
            OrchestratorState::RemovingLockdown => "Removing lockdown...",
            OrchestratorState::RemovingNat => "Removing NAT...",
            OrchestratorState::RemovingFirewall => "Removing firewall...",
            OrchestratorState::RemovingRouting => "Removing routing...",
            OrchestratorState::TearingDownInterface => "Tearing down interface...",
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// One step of the bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Interface,
    Routing,
    Firewall,
    Nat,
    Lockdown,
}

impl Stage {
    /// Bring-up order
    pub const BRING_UP: [Stage; 5] = [
        Stage::Interface,
        Stage::Routing,
        Stage::Firewall,
        Stage::Nat,
        Stage::Lockdown,
    ];

    /// Teardown order, the reverse of bring-up
    pub const TEARDOWN: [Stage; 5] = [
        Stage::Lockdown,
        Stage::Nat,
        Stage::Firewall,
        Stage::Routing,
        Stage::Interface,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Interface => "interface",
            Stage::Routing => "routing",
            Stage::Firewall => "firewall",
            Stage::Nat => "nat",
            Stage::Lockdown => "lockdown",
        }
    }

    /// State while this stage is being applied
    pub fn applying_state(&self) -> OrchestratorState {
        match self {
            Stage::Interface => OrchestratorState::BringingUpInterface,
            Stage::Routing => OrchestratorState::ConfiguringRouting,
            Stage::Firewall => OrchestratorState::ConfiguringFirewall,
            Stage::Nat => OrchestratorState::ConfiguringNat,
            Stage::Lockdown => OrchestratorState::LockingDown,
        }
    }

    /// State while this stage is being removed
    pub fn removing_state(&self) -> OrchestratorState {
        match self {
            Stage::Interface => OrchestratorState::TearingDownInterface,
            Stage::Routing => OrchestratorState::RemovingRouting,
            Stage::Firewall => OrchestratorState::RemovingFirewall,
            Stage::Nat => OrchestratorState::RemovingNat,
            Stage::Lockdown => OrchestratorState::RemovingLockdown,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpOutcome {
    Up,
    AlreadyUp,
    DeviceSetupFailed,
    RoutingFailed,
    FirewallFailed,
    NatFailed,
}

impl BringUpOutcome {
    /// Outcome reported when `stage` fails
    pub fn for_failed_stage(stage: Stage) -> Self {
        match stage {
            Stage::Interface => BringUpOutcome::DeviceSetupFailed,
            Stage::Routing => BringUpOutcome::RoutingFailed,
            // lockdown rules are firewall rules
            Stage::Firewall | Stage::Lockdown => BringUpOutcome::FirewallFailed,
            Stage::Nat => BringUpOutcome::NatFailed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BringUpOutcome::Up | BringUpOutcome::AlreadyUp)
    }

    pub fn description(&self) -> &'static str {
        match self {
            BringUpOutcome::Up => "up",
            BringUpOutcome::AlreadyUp => "already up",
            BringUpOutcome::DeviceSetupFailed => "device setup failed",
            BringUpOutcome::RoutingFailed => "routing failed",
            BringUpOutcome::FirewallFailed => "firewall failed",
            BringUpOutcome::NatFailed => "nat failed",
        }
    }
}

impl std::fmt::Display for BringUpOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// What one teardown step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub stage: Stage,
    pub removals: RemovalTally,
}

/// Per-step summary of a teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
    /// The device query was refused; the steps ran regardless
    pub permission_denied: bool,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, removals: RemovalTally) {
        self.steps.push(TeardownStep { stage, removals });
    }

    /// Record a single-command step, such as the device teardown
    pub fn record_outcome(&mut self, stage: Stage, outcome: &RemovalOutcome) {
        let mut removals = RemovalTally::default();
        removals.record(outcome);
        self.record(stage, removals);
    }

    /// Stages in the order they were torn down
    pub fn stages(&self) -> Vec<Stage> {
        self.steps.iter().map(|s| s.stage).collect()
    }

    /// Sum over all steps
    pub fn total(&self) -> RemovalTally {
        let mut total = RemovalTally::default();
        for step in &self.steps {
            total.merge(step.removals);
        }
        total
    }

    /// No step hit an execution error and the device could be queried
    pub fn is_clean(&self) -> bool {
        !self.permission_denied && self.total().failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_orders_mirror() {
        let mut reversed = Stage::BRING_UP;
        reversed.reverse();
        assert_eq!(reversed, Stage::TEARDOWN);
    }

    #[test]
    fn test_lockdown_reports_firewall() {
        assert_eq!(
            BringUpOutcome::for_failed_stage(Stage::Lockdown),
            BringUpOutcome::FirewallFailed
        );
        assert!(!BringUpOutcome::NatFailed.is_success());
        assert!(BringUpOutcome::AlreadyUp.is_success());
    }

    #[test]
    fn test_state_stability() {
        assert!(OrchestratorState::Idle.is_stable());
        assert!(OrchestratorState::Up.is_stable());
        for stage in Stage::BRING_UP {
            assert!(!stage.applying_state().is_stable());
            assert!(!stage.removing_state().is_stable());
        }
    }

    #[test]
    fn test_report_totals() {
        let mut report = TeardownReport::new();
        report.record_outcome(Stage::Lockdown, &RemovalOutcome::Removed);
        report.record_outcome(Stage::Interface, &RemovalOutcome::NotFound);
        assert_eq!(report.stages(), vec![Stage::Lockdown, Stage::Interface]);
        assert_eq!(report.total().total(), 2);
        assert!(report.is_clean());

        report.record_outcome(Stage::Routing, &RemovalOutcome::Failed("boom".into()));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_refused_query_is_not_clean() {
        let mut report = TeardownReport::new();
        report.record_outcome(Stage::Interface, &RemovalOutcome::Removed);
        report.permission_denied = true;
        assert_eq!(report.total().failed, 0);
        assert!(!report.is_clean());
    }
}
