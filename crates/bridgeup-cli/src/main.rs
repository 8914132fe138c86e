//! Bridgeup CLI - attach this machine to a bridge server

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

use bridgeup_cli::bootstrap;
use bridgeup_cli::cli::{Cli, Command};
use bridgeup_cli::config::default_log_path;
use bridgeup_cli::diagnostics;
use bridgeup_cli::lifecycle::{HostEnvironment, ServiceLifecycleManager, StopOutcome};
use bridgeup_cli::provision;
use bridgeup_cli::service::ServiceManager;
use bridgeup_cli::update::{self, UpdateOutcome};
use bridgeup_client::{discover_public_addr, register_local_ip, Dialer};
use bridgeup_proto::AgentFileConfig;

const STUN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", bridgeup_cli::version_info());
        return Ok(());
    }

    let log_path = cli.log_path.clone().unwrap_or_else(default_log_path);
    bridgeup_cli::logging::init(&cli.log_level, cli.debug, &log_path)?;

    match cli.command {
        Some(Command::Status) => handle_status(&cli),
        Some(Command::Register) => handle_register(&cli).await,
        Some(Command::Nat) => handle_nat(&cli).await,
        Some(Command::Install) => ServiceManager::new(cli.service_arguments()).install(),
        Some(Command::Uninstall) => ServiceManager::new(Vec::new()).uninstall(),
        Some(Command::Start) => ServiceManager::new(Vec::new()).start(),
        Some(Command::Stop) => ServiceManager::new(Vec::new()).stop(),
        Some(Command::Restart) => ServiceManager::new(Vec::new()).restart(),
        Some(Command::Update) => handle_update(&cli).await,
        None => run_agent(&cli).await,
    }
}

async fn run_agent(cli: &Cli) -> Result<()> {
    info!(
        "Starting bridgeup {} (protocol {})",
        env!("GIT_TAG"),
        bridgeup_proto::PROTOCOL_VERSION
    );

    if let Some(addr) = cli.pprof.as_deref().filter(|addr| !addr.trim().is_empty()) {
        diagnostics::spawn(addr).await?;
    }

    let config = cli.bootstrap_config();
    let plan = bootstrap::select(&config)?;
    info!("Bootstrap mode: {}", plan.mode());

    let prepared = provision::prepare(plan).await?;

    let mut manager = ServiceLifecycleManager::new(HostEnvironment::detect());
    if let Some((control_plane, verify_key)) = prepared.deregistration {
        manager = manager.with_deregistration(control_plane, verify_key);
    }

    let runner = prepared.launch.into_task(manager.exit_signal())?;
    manager.start(runner)?;

    tokio::select! {
        _ = shutdown_signal() => info!("Received shutdown signal"),
        outcome = manager.wait() => warn!("Runner ended on its own: {:?}", outcome),
    }

    if manager.stop().await == StopOutcome::ExitProcess {
        std::process::exit(0);
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn handle_status(cli: &Cli) -> Result<()> {
    let status = ServiceManager::new(Vec::new()).status()?;
    println!("Service: {}", status);

    let path = cli.status_config_path();
    if !path.exists() {
        println!("No config file at {}", path.display());
        return Ok(());
    }

    let config = AgentFileConfig::load(&path)?;
    println!("Config: {}", path.display());
    println!("Server: {}", config.common.server_addr);
    if config.tunnels.is_empty() {
        println!("No tunnels declared");
    }
    for tunnel in &config.tunnels {
        println!(
            "  {} {} -> {}",
            tunnel.mode, tunnel.server_port, tunnel.target
        );
    }
    Ok(())
}

async fn handle_register(cli: &Cli) -> Result<()> {
    let config = cli.bootstrap_config();
    if config.server_addr.is_empty() || config.verify_key.is_empty() {
        anyhow::bail!("register requires --server and --vkey");
    }

    let dialer = Dialer::new(config.server_addr.clone(), config.conn_type)
        .with_proxy_url(Some(config.proxy_url.as_str()))?;
    register_local_ip(&dialer, &config.verify_key, cli.time)
        .await
        .context("IP registration failed")?;
    Ok(())
}

async fn handle_update(cli: &Cli) -> Result<()> {
    match update::self_update(&cli.releases_url).await? {
        UpdateOutcome::UpToDate(tag) => println!("Already up to date ({})", tag),
        UpdateOutcome::Updated { from, to } => {
            println!("Updated bridgeup {} -> {}", from, to);
            println!("Run 'bridgeup restart' if the service is installed");
        }
    }
    Ok(())
}

async fn handle_nat(cli: &Cli) -> Result<()> {
    let addr = discover_public_addr(&cli.stun_addr, STUN_TIMEOUT)
        .await
        .with_context(|| format!("STUN request to {} failed", cli.stun_addr))?;
    println!("Public address: {}", addr);
    Ok(())
}
