//! dsrc-enrich - DSR circuit enrichment
//!
//! Reconciles DSR circuit tracking, Meraki appliance inventory and ARIN/RDAP
//! ownership into the `enriched_circuits` view. Meant to run nightly from
//! cron (`dsrc-enrich run`); the other subcommands are operator tools.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dsrc_common::config::{LoggingConfig, TomlConfig};
use dsrc_common::db::{format_cost, EnrichedSlot, ManualOverride, WanSlot};
use dsrc_enrich::db::{enriched, overrides, runs};
use dsrc_enrich::services::{
    DsrImporter, EnrichmentJob, InventorySync, JobOptions, MerakiClient, RdapResolver,
};

/// Command-line arguments for dsrc-enrich
#[derive(Parser, Debug)]
#[command(name = "dsrc-enrich")]
#[command(about = "Nightly DSR circuit enrichment")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "DSRC_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the configured path)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the nightly enrichment job
    Run {
        /// Do not import the newest DSR export first
        #[arg(long)]
        skip_import: bool,
        /// Do not sync Meraki inventory first
        #[arg(long)]
        skip_sync: bool,
        /// Reprocess every site, ignoring change tracking
        #[arg(long)]
        full: bool,
    },
    /// Import the newest (or the given) DSR tracking export
    ImportDsr {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Sync appliance inventory from the Meraki dashboard
    SyncInventory,
    /// Record the current inputs of every site as unchanged
    Baseline,
    /// Resolve IP addresses through the cache and RDAP
    Resolve {
        #[arg(required = true)]
        ips: Vec<String>,
    },
    /// Delete cache rows holding failure placeholders
    PurgeCache,
    /// Manage manual overrides
    Override {
        #[command(subcommand)]
        action: OverrideAction,
    },
    /// Print enriched circuits
    List {
        /// Include sites without any WAN IP
        #[arg(long)]
        all: bool,
    },
    /// Print recent runs
    History {
        #[arg(long, default_value = "10")]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
enum OverrideAction {
    /// Set (or replace) the override of a site's WAN slot
    Set {
        site: String,
        slot: WanSlot,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        speed: Option<String>,
        #[arg(long)]
        cost: Option<f64>,
        /// Operator recorded as the override author
        #[arg(long = "by")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove the override of a site's WAN slot
    Clear { site: String, slot: WanSlot },
    /// Print every override
    List,
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dsrc_enrich={level},dsrc_common={level},warn",
            level = config.level
        ))
    });

    let (file_layer, stderr_layer) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            (Some(layer), None)
        }
        None => (None, Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match TomlConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dsrc-enrich: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(db) = &cli.database {
        config.database_path = Some(db.clone());
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("dsrc-enrich: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: TomlConfig) -> Result<()> {
    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db = dsrc_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let resolver = Arc::new(RdapResolver::new(&config.rdap).context("Invalid RDAP configuration")?);
    let job = EnrichmentJob::new(db.clone(), config.clone(), resolver);

    match command {
        Command::Run {
            skip_import,
            skip_sync,
            full,
        } => {
            let report = job
                .run(JobOptions {
                    skip_import,
                    skip_sync,
                    full,
                })
                .await
                .context("Enrichment run failed")?;
            let s = &report.summary;
            println!(
                "run {}: {} sites, {} changed, {} processed, {} failed, {} flagged for review",
                report.run_id, s.sites_seen, s.sites_changed, s.sites_processed, s.sites_failed, s.review_flagged
            );
            if let Some(sync_error) = &s.sync_error {
                println!("inventory sync skipped, stored inventory used: {}", sync_error);
            }
        }
        Command::ImportDsr { file } => {
            let importer = DsrImporter::new(db.clone(), config.dsr.clone());
            let report = match file {
                Some(path) => importer.import_file(&path).await,
                None => importer.import_latest().await,
            }
            .context("DSR import failed")?;
            println!(
                "{}: {} rows stored ({} enabled), {} skipped",
                report.source_file.display(),
                report.rows_stored,
                report.enabled,
                report.rows_skipped
            );
        }
        Command::SyncInventory => {
            let client = MerakiClient::new(&config.meraki).context("Meraki client setup failed")?;
            let report = InventorySync::new(db.clone(), client, config.meraki.clone())
                .sync()
                .await
                .context("Meraki inventory sync failed")?;
            println!(
                "{} networks, {} devices, {} appliances stored",
                report.networks, report.devices_seen, report.appliances
            );
        }
        Command::Baseline => {
            let count = job.establish_baseline().await.context("Baseline failed")?;
            println!("baseline recorded for {} sites", count);
        }
        Command::Resolve { ips } => {
            for lookup in job.lookup_ips(&ips).await.context("Lookup failed")? {
                match &lookup.outcome {
                    Ok(resolution) => println!(
                        "{}\t{}\t({:?}{})",
                        lookup.ip,
                        resolution.org_name,
                        resolution.source,
                        if lookup.cached { ", cached" } else { "" }
                    ),
                    Err(failure) => println!("{}\t-\t{}: {}", lookup.ip, failure.kind(), failure),
                }
            }
        }
        Command::PurgeCache => {
            let removed = job.cache().purge_invalid().await.context("Cache purge failed")?;
            println!("{} invalid cache rows removed", removed);
        }
        Command::Override { action } => match action {
            OverrideAction::Set {
                site,
                slot,
                provider,
                speed,
                cost,
                by,
                reason,
            } => {
                let manual = ManualOverride {
                    network_name: site,
                    slot,
                    provider,
                    speed,
                    monthly_cost: cost,
                    override_by: by,
                    reason,
                    created_at: dsrc_common::time::now_rfc3339(),
                };
                job.set_override(&manual).await.context("Setting override failed")?;
                println!("override set for {} {}", manual.network_name, manual.slot);
            }
            OverrideAction::Clear { site, slot } => {
                if job.clear_override(&site, slot).await.context("Clearing override failed")? {
                    println!("override cleared for {} {}", site, slot);
                } else {
                    println!("no override for {} {}", site, slot);
                }
            }
            OverrideAction::List => {
                for o in overrides::load_overrides(&db).await? {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\tby {}\t{}",
                        o.network_name,
                        o.slot,
                        o.provider,
                        o.speed.as_deref().unwrap_or(""),
                        format_cost(o.monthly_cost),
                        o.override_by,
                        o.reason.as_deref().unwrap_or("")
                    );
                }
            }
        },
        Command::List { all } => {
            let circuits = if all {
                enriched::list_all_circuits(&db).await?
            } else {
                enriched::list_live_circuits(&db).await?
            };
            for stored in &circuits {
                let r = &stored.record;
                println!(
                    "{}\t{}\t{}{}",
                    r.network_name,
                    describe_slot(&r.wan1),
                    describe_slot(&r.wan2),
                    if r.needs_review { "\tREVIEW" } else { "" }
                );
            }
            println!("{} sites", circuits.len());
        }
        Command::History { limit } => {
            for run in runs::latest_runs(&db, limit).await? {
                println!(
                    "{}\t{}\t{}\t{}\tprocessed {} failed {}{}",
                    run.run_id,
                    run.started_at,
                    run.finished_at.as_deref().unwrap_or("-"),
                    run.status,
                    run.summary.sites_processed,
                    run.summary.sites_failed,
                    run.summary.error.map(|e| format!("\t{}", e)).unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

fn describe_slot(slot: &EnrichedSlot) -> String {
    if slot.provider.is_empty() {
        return "-\t-\t-".to_string();
    }
    format!(
        "{}{}\t{}\t{}",
        slot.provider,
        if slot.dsr_verified { " (DSR)" } else { "" },
        slot.speed,
        slot.display_cost()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_override_set() {
        let cli = Cli::try_parse_from([
            "dsrc-enrich",
            "override",
            "set",
            "CAL 24",
            "wan2",
            "--provider",
            "Starlink",
            "--cost",
            "120",
            "--by",
            "ops",
        ])
        .unwrap();

        match cli.command {
            Command::Override {
                action: OverrideAction::Set { site, slot, cost, by, .. },
            } => {
                assert_eq!(site, "CAL 24");
                assert_eq!(slot, WanSlot::Wan2);
                assert_eq!(cost, Some(120.0));
                assert_eq!(by, "ops");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_run_flags() {
        let cli = Cli::try_parse_from(["dsrc-enrich", "--database", "/tmp/x.db", "run", "--full", "--skip-sync"]).unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(
            cli.command,
            Command::Run {
                skip_import: false,
                skip_sync: true,
                full: true
            }
        ));
    }

    #[test]
    fn test_resolve_requires_an_ip() {
        assert!(Cli::try_parse_from(["dsrc-enrich", "resolve"]).is_err());
    }
}
