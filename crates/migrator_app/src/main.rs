mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use migrate_logging::{migrate_error, migrate_info, migrate_warn, LogDestination};
use migrator_core::{AttachmentLinker, ContentConverter, MessageFormatter};
use migrator_engine::{
    AttachmentDownloader, GitHubDiscussions, LogSink, MigrationTarget, Migrator, MigratorParts,
    ProgressLedger, RetryExecutor, RunSummary, XenForoClient,
};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, Args};

const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = match AppConfig::validate(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let level = if config.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = if config.log_file.is_some() {
        LogDestination::Both
    } else {
        LogDestination::Terminal
    };
    migrate_logging::initialize(destination, level, config.log_file.as_deref());

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(config, &cancel).await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.cancelled {
                ExitCode::from(EXIT_CANCELLED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            migrate_error!("Migration aborted: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            migrate_warn!("Interrupt received, finishing the current step and stopping");
            cancel.cancel();
        }
    });
}

async fn run(config: AppConfig, cancel: &CancellationToken) -> Result<RunSummary> {
    migrate_info!(
        "Migrating node {} into {} (category {}){}",
        config.node_id,
        config.github.repository,
        config.category_id,
        if config.dry_run { " [dry-run]" } else { "" }
    );

    let source = XenForoClient::new(config.xenforo, config.http.clone())
        .context("building the XenForo client")?;
    let publisher = GitHubDiscussions::new(config.github, config.http)
        .context("building the GitHub client")?;

    let mut ledger = ProgressLedger::open(&config.progress_file, config.dry_run);
    if config.resume_from > 0 {
        ledger.set_resume_from(config.resume_from);
    }

    let linker = AttachmentLinker::new(&config.attachments_dir);
    let downloader =
        AttachmentDownloader::new(linker.clone(), config.attachment_delay, config.dry_run);
    let formatter = MessageFormatter::new(ContentConverter::with_max_quote_passes(
        config.max_quote_depth,
    ));

    let mut migrator = Migrator::new(MigratorParts {
        source: Arc::new(source),
        publisher: Arc::new(publisher),
        retry: RetryExecutor::new(config.retry),
        ledger,
        formatter,
        linker,
        downloader,
        sink: Box::new(LogSink),
        target: MigrationTarget {
            node_id: config.node_id,
            category_id: config.category_id,
        },
    });

    let summary = migrator.run(cancel).await?;
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Migration summary");
    println!("  threads found:      {}", summary.discovered);
    println!("  already migrated:   {}", summary.skipped);
    println!("  migrated this run:  {}", summary.completed);
    println!("  failed this run:    {}", summary.failed);
    if !summary.failed_ids.is_empty() {
        let ids: Vec<String> = summary.failed_ids.iter().map(|id| id.to_string()).collect();
        println!("  failed thread ids:  {}", ids.join(", "));
    }
    println!(
        "  ledger totals:      {} completed, {} failed",
        summary.completed_total, summary.failed_total
    );
    println!(
        "  API operations:     {} ({} rate limited)",
        summary.operations, summary.rate_limit_hits
    );
    if summary.cancelled {
        println!("  interrupted: rerun to continue where this run stopped");
    }
}
