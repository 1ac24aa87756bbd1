//! Applying and removing filter rules through `iptables`
//!
//! Application failures are errors. Removal never fails from the caller's
//! point of view: it reports a [`RemovalOutcome`] so a teardown can log what
//! happened and keep going.

use crate::command::{CommandOutput, Executor};
use crate::error::Result;
use crate::rule::{FilterRule, RuleOp, RuleSet};

/// Result of trying to delete one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The rule was present and is gone
    Removed,
    /// There was no such rule to delete
    NotFound,
    /// `iptables` could not be run, or failed for another reason
    Failed(String),
}

impl RemovalOutcome {
    /// Whether the rule is known to be absent afterwards
    pub fn is_absent(&self) -> bool {
        matches!(self, RemovalOutcome::Removed | RemovalOutcome::NotFound)
    }
}

/// Counts of removal outcomes over several rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalTally {
    pub removed: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl RemovalTally {
    pub fn record(&mut self, outcome: &RemovalOutcome) {
        match outcome {
            RemovalOutcome::Removed => self.removed += 1,
            RemovalOutcome::NotFound => self.not_found += 1,
            RemovalOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: RemovalTally) {
        self.removed += other.removed;
        self.not_found += other.not_found;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.removed + self.not_found + self.failed
    }
}

/// Rule engine over the filter table
pub struct Iptables<'a> {
    executor: &'a dyn Executor,
}

impl<'a> Iptables<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Append a rule to its chain
    pub fn apply(&self, rule: &FilterRule) -> Result<()> {
        self.executor.run_checked(&rule.command(RuleOp::Append))?;
        log::debug!("Applied rule: {}", rule);
        Ok(())
    }

    /// Delete a rule, tolerating its absence
    pub fn remove(&self, rule: &FilterRule) -> RemovalOutcome {
        let outcome = match self.executor.run(&rule.command(RuleOp::Delete)) {
            Ok(output) if output.is_success() => RemovalOutcome::Removed,
            Ok(output) if is_missing_rule(&output) => RemovalOutcome::NotFound,
            Ok(output) => RemovalOutcome::Failed(format!(
                "{}: {}",
                output.status(),
                output.stderr.trim()
            )),
            Err(e) => RemovalOutcome::Failed(e.to_string()),
        };

        match outcome {
            RemovalOutcome::Removed => log::debug!("Removed rule: {}", rule),
            RemovalOutcome::NotFound => log::debug!("Rule not present: {}", rule),
            RemovalOutcome::Failed(ref reason) => {
                log::warn!("Failed to remove rule {}: {}", rule, reason)
            }
        }

        outcome
    }

    /// Delete every rule of a set, in order
    pub fn remove_all(&self, rules: &RuleSet) -> RemovalTally {
        let mut tally = RemovalTally::default();
        for rule in rules {
            tally.record(&self.remove(rule));
        }
        tally
    }
}

/// `iptables -D` exits with 1 and one of these diagnostics when the rule,
/// chain or interface match does not exist.
fn is_missing_rule(output: &CommandOutput) -> bool {
    const MISSING: [&str; 3] = [
        "does a matching rule exist",
        "No chain/target/match by that name",
        "Bad rule",
    ];
    output.code == Some(1) && MISSING.iter().any(|m| output.stderr.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use std::cell::RefCell;

    /// Returns queued outputs in order and records the commands it saw
    struct ScriptedExecutor {
        outputs: RefCell<Vec<CommandOutput>>,
        seen: RefCell<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(outputs: Vec<CommandOutput>) -> Self {
            Self {
                outputs: RefCell::new(outputs),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Executor for ScriptedExecutor {
        fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
            self.seen.borrow_mut().push(command.to_string());
            Ok(self.outputs.borrow_mut().remove(0))
        }
    }

    const BAD_RULE: &str =
        "iptables: Bad rule (does a matching rule exist in that chain?).\n";

    #[test]
    fn test_apply_failure_is_error() {
        let exec = ScriptedExecutor::new(vec![CommandOutput::failure(2, "invalid port")]);
        let engine = Iptables::new(&exec);

        let rule = FilterRule::host_port_allow("wg0", "10.0.0.5", 22);
        assert!(engine.apply(&rule).is_err());
        assert_eq!(
            exec.seen.borrow()[0],
            "iptables -t filter -A FORWARD -i wg0 -d 10.0.0.5 -p tcp --dport 22 -j ACCEPT"
        );
    }

    #[test]
    fn test_remove_classifies_outcomes() {
        let exec = ScriptedExecutor::new(vec![
            CommandOutput::success(),
            CommandOutput::failure(1, BAD_RULE),
            CommandOutput::failure(4, "Permission denied (you must be root)"),
        ]);
        let engine = Iptables::new(&exec);
        let rule = FilterRule::forward_allow("wg0", "10.0.1.0/24");

        assert_eq!(engine.remove(&rule), RemovalOutcome::Removed);
        assert_eq!(engine.remove(&rule), RemovalOutcome::NotFound);
        assert!(matches!(engine.remove(&rule), RemovalOutcome::Failed(_)));
    }

    #[test]
    fn test_remove_all_tallies() {
        let exec = ScriptedExecutor::new(vec![
            CommandOutput::success(),
            CommandOutput::failure(1, BAD_RULE),
        ]);
        let engine = Iptables::new(&exec);
        let rules: RuleSet = ["10.0.1.0/24", "10.0.2.0/24"]
            .iter()
            .map(|n| FilterRule::forward_allow("wg0", *n))
            .collect();

        let tally = engine.remove_all(&rules);
        assert_eq!(
            tally,
            RemovalTally {
                removed: 1,
                not_found: 1,
                failed: 0
            }
        );
        assert_eq!(tally.total(), 2);
    }
}
