//! Command-line interface for dxsync.
//!
//! Provides commands for running a sync pass, checking a single object
//! against the LIMS, previewing the translated record, and showing the
//! resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::adapters::{
    DnanexusSource, DryRunLims, LimsStore, MetadataSource, PulsarLims, Retrying,
};
use crate::config::ResolvedConfig;
use crate::core::{translate, Orchestrator};
use crate::domain::{FilterCriteria, SyncReport};

/// dxsync - DNAnexus to Pulsar LIMS metadata sync
#[derive(Parser, Debug)]
#[command(name = "dxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: .dxsync/config.yaml in this or a parent directory)
    #[arg(long, global = true, env = "DXSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one synchronization pass
    Sync(SyncArgs),

    /// Check whether an object has been imported
    Check {
        /// Platform object id (project-..., analysis-..., file-...)
        external_id: String,
    },

    /// Print the record an object would be imported as
    Translate {
        /// Platform object id
        external_id: String,
    },

    /// Show resolved configuration (secrets redacted)
    Config,
}

#[derive(clap::Args, Debug, Default)]
pub struct SyncArgs {
    /// Project to scan (repeatable; overrides source.projects)
    #[arg(short, long = "project")]
    pub projects: Vec<String>,

    /// Only objects created at or after this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_timestamp)]
    pub since: Option<DateTime<Utc>>,

    /// Only objects created before this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_timestamp)]
    pub until: Option<DateTime<Utc>>,

    /// File name glob (repeatable; overrides source.file_patterns)
    #[arg(long = "file-pattern")]
    pub file_patterns: Vec<String>,

    /// Skip analyses
    #[arg(long)]
    pub no_analyses: bool,

    /// Look everything up but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Objects processed concurrently
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Stop the pass after this many objects
    #[arg(long)]
    pub max_objects: Option<u64>,
}

impl SyncArgs {
    /// Apply flags on top of the configured filter
    pub fn filter(&self, base: &FilterCriteria) -> FilterCriteria {
        let mut filter = base.clone();
        if !self.projects.is_empty() {
            filter.projects = self.projects.clone();
        }
        if !self.file_patterns.is_empty() {
            filter.file_patterns = self.file_patterns.clone();
        }
        if self.since.is_some() {
            filter.created_after = self.since;
        }
        if self.until.is_some() {
            filter.created_before = self.until;
        }
        if self.no_analyses {
            filter.include_analyses = false;
        }
        filter
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = ResolvedConfig::load(self.config.as_deref())?;

        match self.command {
            Commands::Sync(args) => run_sync(&config, &args).await,
            Commands::Check { external_id } => check_object(&config, &external_id).await,
            Commands::Translate { external_id } => translate_object(&config, &external_id).await,
            Commands::Config => {
                print!("{}", config.render());
                Ok(())
            }
        }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}': expected RFC 3339 or YYYY-MM-DD", value))
}

fn build_source(config: &ResolvedConfig) -> Result<Arc<dyn MetadataSource>> {
    let source = DnanexusSource::new(config.require_source()?.clone(), config.call_timeout)
        .context("Failed to create DNAnexus client")?;
    Ok(Arc::new(Retrying::new(
        source,
        config.retry.clone(),
        config.call_timeout,
    )))
}

fn build_lims(config: &ResolvedConfig) -> Result<Retrying<PulsarLims>> {
    let lims = PulsarLims::new(config.require_lims()?.clone(), config.call_timeout)
        .context("Failed to create Pulsar client")?;
    Ok(Retrying::new(lims, config.retry.clone(), config.call_timeout))
}

/// Run a sync pass and print the report
async fn run_sync(config: &ResolvedConfig, args: &SyncArgs) -> Result<()> {
    let source = build_source(config)?;
    let lims = build_lims(config)?;
    let filter = args.filter(&config.filter);

    let mut options = config.sync.clone();
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }
    if args.max_objects.is_some() {
        options.limits.max_objects = args.max_objects;
    }

    let report = if args.dry_run {
        let dry_run = Arc::new(DryRunLims::new(lims));
        let orchestrator =
            Orchestrator::new(source, dry_run.clone() as Arc<dyn LimsStore>).with_options(options);
        let report = orchestrator.run_pass(&filter).await;
        eprintln!(
            "[Dry run: {} record(s) would be created]",
            dry_run.planned_creates()
        );
        report
    } else {
        let orchestrator = Orchestrator::new(source, Arc::new(lims)).with_options(options);
        orchestrator.run_pass(&filter).await
    };

    print_report(&report, args.json)?;

    if report.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_report(report: &SyncReport, as_json: bool) -> Result<()> {
    if as_json {
        let rendered = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{}", rendered);
    } else {
        print!("{}", report.render_summary());
    }
    Ok(())
}

/// Report whether one object is already in the LIMS
async fn check_object(config: &ResolvedConfig, external_id: &str) -> Result<()> {
    let source = build_source(config)?;
    let lims = build_lims(config)?;
    let orchestrator = Orchestrator::new(source, Arc::new(lims));

    let inspection = orchestrator
        .inspect(external_id)
        .await
        .with_context(|| format!("Failed to inspect {}", external_id))?;

    println!("Object:    {}", inspection.object.external_id);
    println!("Kind:      {}", inspection.object.kind);
    println!("Name:      {}", inspection.object.name);
    if let Some(parent) = &inspection.object.parent_id {
        println!("Parent:    {}", parent);
    }

    match &inspection.existing {
        Some(record) => {
            println!("Imported:  yes ({} {})", record.record_type, record.lims_id);
            if inspection.metadata_drift {
                println!("Drift:     metadata changed since import (record left unchanged)");
            }
        }
        None => {
            println!("Imported:  no");
            if let Err(e) = &inspection.draft {
                println!("Blocked:   {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Print the translated field set without writing
async fn translate_object(config: &ResolvedConfig, external_id: &str) -> Result<()> {
    let source = build_source(config)?;
    let object = source
        .fetch_metadata(external_id)
        .await
        .with_context(|| format!("Failed to fetch {}", external_id))?;

    match translate(&object) {
        Ok(draft) => {
            let rendered = json!({
                "record_type": draft.record_type,
                "external_id": draft.external_id,
                "fields": draft.fields,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&rendered).context("Failed to serialize draft")?
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} cannot be imported: {} ({})", external_id, e, e.kind());
            std::process::exit(1);
        }
    }
}
