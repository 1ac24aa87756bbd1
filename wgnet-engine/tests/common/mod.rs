//! In-memory host for orchestration tests
//!
//! `FakeHost` plays both the executor and the prober: it tracks whether the
//! WireGuard device is up and keeps an ordered copy of the filter table,
//! answering `iptables -A/-D` and `wg-quick up/down` the way the real tools
//! would.

#![allow(dead_code)]

use std::cell::RefCell;
use std::net::Ipv4Addr;

use wgnet_rules::{CommandOutput, CommandSpec, Executor, InterfaceState, Prober};

#[derive(Debug, Default)]
struct HostState {
    running: bool,
    rules: Vec<String>,
    log: Vec<String>,
}

pub struct FakeHost {
    state: RefCell<HostState>,
    fail_patterns: RefCell<Vec<String>>,
    address: Option<Ipv4Addr>,
    config_present: bool,
    permission_denied: bool,
}

impl FakeHost {
    /// Device down, wg-quick config present, address 10.9.0.1
    pub fn new() -> Self {
        Self {
            state: RefCell::new(HostState::default()),
            fail_patterns: RefCell::new(Vec::new()),
            address: Some(Ipv4Addr::new(10, 9, 0, 1)),
            config_present: true,
            permission_denied: false,
        }
    }

    pub fn running(self) -> Self {
        self.state.borrow_mut().running = true;
        self
    }

    pub fn without_address(mut self) -> Self {
        self.address = None;
        self
    }

    pub fn without_config(mut self) -> Self {
        self.config_present = false;
        self
    }

    pub fn denying_access(mut self) -> Self {
        self.permission_denied = true;
        self
    }

    /// Any command whose rendering contains `pattern` exits with 1
    pub fn fail_on(&self, pattern: &str) {
        self.fail_patterns.borrow_mut().push(pattern.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Current filter table, `CHAIN match... -j TARGET` per rule
    pub fn rules(&self) -> Vec<String> {
        self.state.borrow().rules.clone()
    }

    /// Every command issued so far, in order
    pub fn log(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    fn run_iptables(state: &mut HostState, args: &[String]) -> CommandOutput {
        // -t filter <op> <chain> <rest...>
        if args.len() < 4 || args[0] != "-t" || args[1] != "filter" {
            return CommandOutput::failure(2, "iptables: unsupported invocation");
        }
        let rule = args[3..].join(" ");

        match args[2].as_str() {
            "-A" => {
                state.rules.push(rule);
                CommandOutput::success()
            }
            "-D" => match state.rules.iter().position(|r| *r == rule) {
                Some(index) => {
                    state.rules.remove(index);
                    CommandOutput::success()
                }
                None => CommandOutput::failure(
                    1,
                    "iptables: Bad rule (does a matching rule exist in that chain?).\n",
                ),
            },
            other => CommandOutput::failure(2, format!("iptables: unknown option {}", other)),
        }
    }

    fn run_wg_quick(state: &mut HostState, args: &[String]) -> CommandOutput {
        match (args.first().map(String::as_str), args.get(1)) {
            (Some("up"), Some(iface)) => {
                if state.running {
                    return CommandOutput::failure(1, format!("wg-quick: `{}' already exists", iface));
                }
                state.running = true;
                CommandOutput::success()
            }
            (Some("down"), Some(iface)) => {
                if !state.running {
                    return CommandOutput::failure(
                        1,
                        format!("wg-quick: `{}' is not a WireGuard interface", iface),
                    );
                }
                state.running = false;
                CommandOutput::success()
            }
            _ => CommandOutput::failure(1, "Usage: wg-quick [ up | down ] [ CONFIG_FILE | INTERFACE ]"),
        }
    }
}

impl Executor for FakeHost {
    fn run(&self, command: &CommandSpec) -> wgnet_rules::Result<CommandOutput> {
        let line = command.to_string();
        let mut state = self.state.borrow_mut();
        state.log.push(line.clone());

        if self.fail_patterns.borrow().iter().any(|p| line.contains(p.as_str())) {
            return Ok(CommandOutput::failure(1, "injected failure"));
        }

        let output = match command.program.as_str() {
            "iptables" => Self::run_iptables(&mut state, &command.args),
            "wg-quick" => Self::run_wg_quick(&mut state, &command.args),
            other => CommandOutput::failure(127, format!("{}: command not found", other)),
        };
        Ok(output)
    }
}

impl Prober for FakeHost {
    fn probe(&self, interface: &str) -> wgnet_rules::Result<InterfaceState> {
        if self.permission_denied {
            return Err(wgnet_rules::Error::PermissionDenied(interface.to_string()));
        }
        Ok(if self.state.borrow().running {
            InterfaceState::Running
        } else {
            InterfaceState::NotRunning
        })
    }

    fn config_exists(&self, _interface: &str) -> bool {
        self.config_present
    }

    fn interface_address(&self, _interface: &str) -> wgnet_rules::Result<Option<Ipv4Addr>> {
        Ok(self.address)
    }
}
