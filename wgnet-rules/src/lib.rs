//! Host-facing primitives for wgnet
//!
//! This crate knows how to talk to the host: it describes packet-filter
//! rules as data, turns them into `iptables` invocations, runs those (or
//! only logs them in dry-run mode) through a single [`Executor`], and asks
//! the WireGuard tools whether a tunnel device is up.
//!
//! It does not decide *what* to apply or in which order; that is the job of
//! the orchestration engine.
//!
//! # Platform Requirements
//!
//! ## Linux
//! - Root privileges or `CAP_NET_ADMIN` for anything that changes state
//! - `iptables`, `wg` and `wg-quick` in `PATH`
//!
//! # Example
//!
//! ```ignore
//! use wgnet_rules::{ExecOptions, FilterRule, Iptables, SystemExecutor};
//!
//! let executor = SystemExecutor::new(ExecOptions { dry_run: true, verbose: true });
//! let iptables = Iptables::new(&executor);
//!
//! iptables.apply(&FilterRule::forward_allow("wg0", "10.0.1.0/24"))?;
//! ```

pub mod command;
pub mod device;
pub mod error;
pub mod iptables;
pub mod rule;

#[cfg(target_os = "linux")]
pub mod linux;

pub use command::{CommandOutput, CommandSpec, ExecOptions, Executor, SystemExecutor};
pub use device::{InterfaceState, Prober, WgProber, DEFAULT_WG_CONFIG_DIR};
pub use error::{Error, Result};
pub use iptables::{Iptables, RemovalOutcome, RemovalTally};
pub use rule::{Chain, FilterRule, RuleOp, RuleSet, Verdict};

/// Prefix length assumed for the tunnel's own subnet
pub const TUNNEL_SUBNET_PREFIX: u8 = 24;
