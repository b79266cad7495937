//! sitewatchd - Imaging site activity monitor
//!
//! Polls device logs for each monitored site, tracks treatment activity and
//! notifies when a site goes quiet.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use sitewatch_monitor::{RunOutcome, RunTrigger};
use sitewatch_sites::{Cadence, SiteMonitorConfig};
use sitewatchd::{DaemonConfig, build_scheduler};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "sitewatchd")]
#[command(about = "Imaging site activity monitor")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "SITEWATCH_CONFIG", default_value = "/etc/sitewatch/sitewatch.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor until interrupted
    Run,

    /// Evaluate one site now and print the result
    Check {
        /// Site config ID
        #[arg(long)]
        site: String,
    },

    /// Manage monitored sites
    Sites {
        #[command(subcommand)]
        command: SitesCommand,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "sitewatch.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SitesCommand {
    /// List monitored sites
    List,

    /// Add a site
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        /// Site identifier in the log source
        #[arg(long)]
        site_id: String,

        /// hourly, daily or weekly
        #[arg(long, default_value = "hourly")]
        cadence: Cadence,

        /// Webhook URL; enables notifications
        #[arg(long)]
        notify_url: Option<String>,
    },

    /// Remove a site
    Remove {
        /// Site config ID
        id: String,
    },

    /// Stop evaluating a site
    Pause {
        /// Site config ID
        id: String,
    },

    /// Resume evaluating a site
    Resume {
        /// Site config ID
        id: String,
    },

    /// Remove every site
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Run => run(&cli.config).await?,
        Commands::Check { site } => check(&cli.config, &site).await?,
        Commands::Sites { command } => sites(&cli.config, command)?,
        Commands::InitConfig { output, force } => init_config(&output, force)?,
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("sitewatch=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting sitewatchd");

    let config = DaemonConfig::from_file(config_path)?;
    let scheduler = Arc::new(build_scheduler(&config)?);
    info!(
        sites = scheduler.store().list()?.len(),
        tick_secs = config.scheduler.tick_interval_secs,
        "loaded config"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    if shutdown_tx.send(()).is_err() {
        error!("scheduler already stopped");
    }
    runner.await?;

    Ok(())
}

async fn check(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    let scheduler = build_scheduler(&config)?;

    match scheduler.run_site(id, Utc::now(), RunTrigger::Manual).await? {
        RunOutcome::Completed(report) => {
            let summary = &report.summary;
            println!("Site:          {} ({})", report.config.name, summary.site_id);
            println!("Status:        {} (was {})", summary.status, report.previous_status);
            println!("Treatments:    {} ({} failed)", summary.total_events, summary.failed_events());
            println!(
                "Last activity: {}",
                summary
                    .last_activity_at
                    .map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339())
            );
            if let Some(kind) = report.dispatch.sent {
                println!("Notified:      {kind}");
            }
            if let Some(err) = &report.dispatch.error {
                println!("Notify error:  {err}");
            }
        }
        RunOutcome::Skipped(reason) => {
            println!("Skipped: {}", serde_json::to_string(&reason)?);
        }
        RunOutcome::Failed { reason } => {
            anyhow::bail!("evaluation failed: {reason}");
        }
    }

    Ok(())
}

fn sites(config_path: &Path, command: SitesCommand) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    let scheduler = build_scheduler(&config)?;

    match command {
        SitesCommand::List => {
            let configs = scheduler.store().list()?;
            if configs.is_empty() {
                println!("No sites configured.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<20}  {:<16}  {:<7}  {:<8}  {:<6}  NEXT RUN",
                "ID", "NAME", "SITE", "CADENCE", "STATUS", "ACTIVE"
            );
            for site in configs {
                println!(
                    "{:<36}  {:<20}  {:<16}  {:<7}  {:<8}  {:<6}  {}",
                    site.id,
                    site.name,
                    site.site_id,
                    site.cadence,
                    site.status,
                    if site.active { "yes" } else { "no" },
                    site.next_run_at
                        .map_or_else(|| "due".to_string(), |ts| ts.to_rfc3339())
                );
            }
        }
        SitesCommand::Add {
            name,
            site_id,
            cadence,
            notify_url,
        } => {
            let mut site = SiteMonitorConfig::new(name, site_id, cadence);
            if let Some(url) = notify_url {
                site = site.with_notifications(url);
            }
            let added = scheduler.add_site(site)?;
            println!("Added site {} ({})", added.id, added.site_id);
        }
        SitesCommand::Remove { id } => {
            let removed = scheduler.remove_site(&id)?;
            println!("Removed site {} ({})", removed.id, removed.site_id);
        }
        SitesCommand::Pause { id } => {
            let paused = scheduler.pause(&id)?;
            println!("Paused site {} ({})", paused.id, paused.site_id);
        }
        SitesCommand::Resume { id } => {
            let resumed = scheduler.resume(&id)?;
            println!("Resumed site {} ({})", resumed.id, resumed.site_id);
        }
        SitesCommand::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to remove every site without --yes");
            }
            let removed = scheduler.reset_all()?;
            println!("Removed {removed} sites");
        }
    }

    Ok(())
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    DaemonConfig::default().save(output)?;
    println!("Config written to {}", output.display());
    println!("\nEdit the file to point fetch.endpoint at your log source, then run:");
    println!("  sitewatchd --config {} sites add --name <name> --site-id <id>", output.display());
    println!("  sitewatchd --config {} run", output.display());

    Ok(())
}
