//! wgnet CLI
//!
//! Brings a WireGuard interface up or down together with its routing and
//! firewall policy.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wgnet_engine::{
    interface_hint, BringUpOutcome, ConfigStore, NetworkPolicy, Orchestrator, PolicyFile,
    TeardownReport, DEFAULT_CONFIG_DIR,
};
use wgnet_rules::{
    ExecOptions, InterfaceState, Prober, SystemExecutor, WgProber, DEFAULT_WG_CONFIG_DIR,
};

/// wgnet - WireGuard network tool
///
/// wg and wg-quick manage WireGuard interfaces and add a route for the
/// tunnel subnet. wgnet adds the network policy around them: which
/// networks and hosts the tunnel may reach, and a default deny for the rest.
#[derive(Parser)]
#[command(name = "wgnet")]
#[command(author, version, about)]
struct Cli {
    /// Config name in the config directory, or path to a config file
    config: Option<String>,

    /// What to do with the config
    #[arg(value_enum, default_value_t = Action::Status)]
    action: Action,

    /// Log commands instead of running them
    #[arg(short = 'D', long = "dryrun")]
    dry_run: bool,

    /// Config directory
    #[arg(short = 'P', long = "path", default_value = DEFAULT_CONFIG_DIR)]
    path: PathBuf,

    /// Overwrite on `new`, re-apply on `up` when already running
    #[arg(short = 'F', long)]
    force: bool,

    /// List configs and active tunnels
    #[arg(short = 'L', long)]
    list: bool,

    /// Log every command issued
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Where wg-quick keeps interface configs
    #[arg(long, default_value = DEFAULT_WG_CONFIG_DIR)]
    wg_config_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Show interface state and policy summary
    Status,
    /// Print the config
    Showconf,
    /// Write a default config
    New,
    /// Bring the interface and its policy up
    Up,
    /// Remove the policy and the interface
    Down,
    /// Down, then up
    Restart,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Status => "status",
            Action::Showconf => "showconf",
            Action::New => "new",
            Action::Up => "up",
            Action::Down => "down",
            Action::Restart => "restart",
        }
    }
}

/// What a blocking orchestration call produced
enum Finished {
    BringUp(BringUpOutcome),
    Teardown(TeardownReport),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(&cli);

    let Some(name) = cli.config.clone().filter(|_| !cli.list) else {
        return list(&cli);
    };

    debug!("Processing config '{}' command '{}'", name, cli.action.name());
    let store = ConfigStore::new(&cli.path);

    match cli.action {
        Action::Status => status(&cli, &store, &name),
        Action::Showconf => show_config(&store, &name),
        Action::New => new_config(&cli, &store, &name),
        Action::Up | Action::Down | Action::Restart => {
            let policy = load_policy(&store, &name)?;
            orchestrate(&cli, policy).await
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .init();
}

fn load_policy(store: &ConfigStore, name: &str) -> Result<NetworkPolicy> {
    store
        .load(name)
        .with_context(|| format!("Failed to load config '{}'", name))
}

fn list(cli: &Cli) -> Result<ExitCode> {
    let store = ConfigStore::new(&cli.path);
    println!("Directory: {}", store.root().display());

    match store.list() {
        Ok(names) => {
            for name in names {
                println!("  Config: {}.conf", name);
            }
        }
        Err(wgnet_engine::Error::ConfigDirMissing(path)) => {
            println!("Directory {} does not exist", path.display());
        }
        Err(e) => return Err(e).context("Failed to list configs"),
    }

    let prober = WgProber::new(&cli.wg_config_dir);
    match prober.list_interfaces() {
        Ok(interfaces) if interfaces.is_empty() => println!("\nNo active tunnels found"),
        Ok(interfaces) => {
            println!();
            for iface in interfaces {
                println!("interface: {}", iface);
            }
        }
        Err(e) if e.is_permission_denied() => {
            println!("\nError listing interfaces, are you root?");
        }
        Err(e) if e.is_tool_missing() => warn!("wg not found, is wireguard-tools installed?"),
        Err(e) => warn!("Cannot list interfaces: {}", e),
    }

    Ok(ExitCode::SUCCESS)
}

fn status(cli: &Cli, store: &ConfigStore, name: &str) -> Result<ExitCode> {
    let policy = load_policy(store, name)?;
    let iface = policy.interface.as_str();
    let prober = WgProber::new(&cli.wg_config_dir);
    let mut code = ExitCode::SUCCESS;

    println!("config: {}", store.resolve(name).display());

    if !prober.config_exists(iface) {
        println!(
            "{}: interface config does not exist, or we can't read it.",
            iface
        );
    } else {
        match prober.probe(iface) {
            Ok(InterfaceState::Running) => {
                println!("{}: interface up\n", iface);
                match prober.describe(iface) {
                    Ok(Some(details)) => print!("{}", details),
                    Ok(None) => {}
                    Err(e) => warn!("Cannot describe {}: {}", iface, e),
                }
            }
            Ok(InterfaceState::NotRunning) => println!("{}: interface not up", iface),
            Err(e) if e.is_permission_denied() => {
                println!("Permission denied for interface '{}', are you root?", iface);
                code = ExitCode::FAILURE;
            }
            Err(e) if e.is_tool_missing() => {
                println!("{}: cannot query interface, is wireguard-tools installed?", iface);
                code = ExitCode::FAILURE;
            }
            Err(e) => {
                println!("{}: cannot query interface: {}", iface, e);
                code = ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("network:");
    println!("  Route main subnet: {}", yes_no(policy.route_subnet));
    println!("  Routed subnets: {}", policy.routed_networks.len());
    println!("  Enable NAT: {}", yes_no(policy.nat_enabled));
    println!("  Firewall hosts: {}", policy.firewall_hosts.len());

    Ok(code)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn show_config(store: &ConfigStore, name: &str) -> Result<ExitCode> {
    let policy = load_policy(store, name)?;
    let rendered = policy
        .to_file()
        .to_toml()
        .context("Failed to render config")?;

    println!("# {}", store.resolve(name).display());
    print!("{}", rendered);
    Ok(ExitCode::SUCCESS)
}

fn new_config(cli: &Cli, store: &ConfigStore, name: &str) -> Result<ExitCode> {
    let path = store.resolve(name);
    let interface = interface_hint(name);

    if cli.dry_run {
        if path.exists() && !cli.force {
            anyhow::bail!("config file '{}' exists, skipping default", path.display());
        }
        info!("dry-run: write {}", path.display());
    } else {
        store
            .create(name, &interface, cli.force)
            .with_context(|| format!("Failed to create config '{}'", name))?;
    }

    println!("Successfully created new config '{}'", name);
    print!("{}", PolicyFile::default_template(&interface));
    Ok(ExitCode::SUCCESS)
}

async fn orchestrate(cli: &Cli, policy: NetworkPolicy) -> Result<ExitCode> {
    let options = ExecOptions {
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };
    let action = cli.action;
    let force = cli.force;
    let wg_config_dir = cli.wg_config_dir.clone();
    let iface = policy.interface.clone();

    let interrupts = tokio::spawn(log_interrupts());

    // the host commands block; run them off the runtime so signals are still seen
    let finished = tokio::task::spawn_blocking(move || -> wgnet_engine::Result<Finished> {
        let executor = SystemExecutor::new(options);
        let prober = WgProber::new(wg_config_dir);
        let mut orchestrator = Orchestrator::new(&executor, &prober);

        match action {
            Action::Down => Ok(Finished::Teardown(orchestrator.down(&policy))),
            Action::Restart => orchestrator
                .restart(&policy, force)
                .map(Finished::BringUp),
            _ => orchestrator.up(&policy, force).map(Finished::BringUp),
        }
    })
    .await;

    interrupts.abort();

    let finished = finished
        .context("Orchestration task failed")?
        .with_context(|| format!("Failed to run '{}' on {}", action.name(), iface))?;

    match finished {
        Finished::BringUp(outcome) => {
            println!("{}: {}", iface, outcome);
            Ok(if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Finished::Teardown(report) => {
            let total = report.total();
            println!(
                "{}: down ({} removed, {} not present, {} failed)",
                iface, total.removed, total.not_found, total.failed
            );
            if report.permission_denied {
                println!("Permission denied for interface '{}', are you root?", iface);
            }
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Signals only get logged; an orchestration run always finishes
async fn log_interrupts() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            warn!("Failed to register signal handlers");
            return;
        };

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    warn!("Received SIGTERM, finishing current operation");
                }
                _ = sigint.recv() => {
                    warn!("Received SIGINT, finishing current operation");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing current operation");
        }
    }
}
