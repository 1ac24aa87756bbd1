//! wgnet engine
//!
//! Loads a WireGuard interface's network policy and drives it onto the host
//! in a fixed order, rolling back on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   load    ┌────────────────┐
//! │ ConfigStore  │ ────────▶ │ NetworkPolicy  │
//! └──────────────┘           └───────┬────────┘
//!                                    ▼
//!                           ┌────────────────┐   rules   ┌──────────────┐
//!                           │  Orchestrator  │ ◀──────── │   Sections   │
//!                           └───────┬────────┘           └──────────────┘
//!                                   ▼
//!                 ┌──────────────────────────────────┐
//!                 │ wgnet-rules: Executor / Prober   │
//!                 │ iptables, wg, wg-quick           │
//!                 └──────────────────────────────────┘
//! ```
//!
//! Bring-up: interface, routing, firewall, NAT, lockdown.
//! Teardown: lockdown, NAT, firewall, routing, interface.

pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod section;

pub use config::{
    interface_hint, ConfigStore, FirewallHost, NetworkPolicy, PolicyFile, DEFAULT_CONFIG_DIR,
};
pub use error::{Error, Result};
pub use event::{BringUpOutcome, OrchestratorState, Stage, TeardownReport, TeardownStep};
pub use orchestrator::Orchestrator;
pub use section::{PolicySection, SectionContext};
