//! CLI entry point for the harvester tool.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use harvester_core::{
    ChallengeGate, DelayRange, PacingPolicy, PipelineConfig, RunConfig, SiteLayout, harvest,
};
use tracing::{debug, info};

mod app_config;
mod cli;

use app_config::FileConfig;
use cli::{Args, DEFAULT_OUTPUT_DIR};

/// Progress database filename inside the output directory.
const DEFAULT_DB_FILENAME: &str = "progress.db";

/// Gate polling interval.
const GATE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    if !args.cookies_file.is_file() {
        bail!("Cookie file not found: {}", args.cookies_file.display());
    }

    let file_config = app_config::load_config(args.config.as_deref())?;
    let settings = Settings::resolve(&args, &file_config)?;

    info!(
        output = %settings.output_dir.display(),
        db = %settings.db_path.display(),
        "harvester starting"
    );

    let summary = harvest(
        &args.cookies_file,
        &settings.db_path,
        settings.pipeline,
        &settings.run,
    )
    .await
    .context("Run aborted")?;

    info!(
        discovered = summary.discovered,
        processed = summary.processed,
        completed = summary.completed,
        artifacts = summary.artifacts,
        skipped = summary.skipped,
        failed = summary.failed,
        "Harvest complete"
    );
    if summary.commit_failures > 0 {
        tracing::error!(
            count = summary.commit_failures,
            "some results could not be saved to the progress store; rerun to retry them"
        );
    }

    Ok(())
}

/// Effective run settings after merging CLI flags over the config file.
#[derive(Debug)]
struct Settings {
    output_dir: PathBuf,
    db_path: PathBuf,
    pipeline: PipelineConfig,
    run: RunConfig,
}

impl Settings {
    fn resolve(args: &Args, file: &FileConfig) -> Result<Self> {
        let Some(base_url) = args.base_url.as_deref().or(file.base_url.as_deref()) else {
            bail!("No site URL configured: pass --base-url or set `base_url` in the config file");
        };
        let site = SiteLayout::new(base_url).context("Invalid site URL")?;

        let output_dir = args
            .output
            .clone()
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let db_path = args
            .db
            .clone()
            .unwrap_or_else(|| output_dir.join(DEFAULT_DB_FILENAME));

        let mut pipeline = PipelineConfig::new(site, &output_dir);
        if let Some(export) = &args.export {
            pipeline.export_path = Some(export.clone());
        }
        pipeline.pacing = pacing_from(file)?;
        if let Some(secs) = file.gate_timeout_secs {
            pipeline.gate = ChallengeGate::new(GATE_INTERVAL, Duration::from_secs(secs));
        }
        if let Some(secs) = file.artifact_timeout_secs {
            pipeline.processor.artifact_timeout = Duration::from_secs(secs);
        }
        if let Some(ext) = &file.artifact_extension {
            pipeline.processor.artifact_extension.clone_from(ext);
        }

        let run = RunConfig {
            start_page: args.start_page,
            max_items: args
                .max
                .map(|max| usize::try_from(max).unwrap_or(usize::MAX)),
            max_pages: args.max_pages,
            single_page: args.only_page,
            skip_discovery: args.skip_discovery,
            metadata_only: args.metadata_only,
        };

        Ok(Self {
            output_dir,
            db_path,
            pipeline,
            run,
        })
    }
}

/// Merges the file's pacing keys over the defaults.
///
/// A key set on one side of a range is checked against the default on the
/// other side.
fn pacing_from(file: &FileConfig) -> Result<PacingPolicy> {
    let defaults = PacingPolicy::default();
    let short = merged_range(
        ("short_delay_min_ms", "short_delay_max_ms"),
        file.short_delay_min_ms.map(Duration::from_millis),
        file.short_delay_max_ms.map(Duration::from_millis),
        defaults.short,
    )?;
    let cooldown = merged_range(
        ("cooldown_min_secs", "cooldown_max_secs"),
        file.cooldown_min_secs.map(Duration::from_secs),
        file.cooldown_max_secs.map(Duration::from_secs),
        defaults.cooldown,
    )?;

    Ok(PacingPolicy {
        short,
        cooldown,
        cooldown_every: file.cooldown_every.unwrap_or(defaults.cooldown_every),
        settle: defaults.settle,
    })
}

fn merged_range(
    (min_key, max_key): (&str, &str),
    min: Option<Duration>,
    max: Option<Duration>,
    default: DelayRange,
) -> Result<DelayRange> {
    let min = min.unwrap_or(default.min);
    let max = max.unwrap_or(default.max);
    if min > max {
        bail!(
            "Invalid config: `{min_key}` ({}ms) is greater than `{max_key}` ({}ms) after applying defaults",
            min.as_millis(),
            max.as_millis()
        );
    }
    Ok(DelayRange::new(min, max))
}
