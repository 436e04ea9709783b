use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;

use migrate_logging::{migrate_debug, migrate_error, migrate_info, migrate_warn};
use migrator_core::{
    AttachmentLinker, ChildItem, FileRef, FormatError, MessageFormatter, MessageHeader, RawError,
    WorkUnit,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::downloader::AttachmentDownloader;
use crate::ledger::{LedgerError, ProgressLedger};
use crate::preflight::{run_preflight, PreflightError};
use crate::publish::{ContainerRef, DestinationPublisher};
use crate::retry::RetryExecutor;
use crate::source::SourceFetcher;
use crate::{ExecError, MigrationEvent, RunSummary, Stage, UnitOutcome};

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: MigrationEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: MigrationEvent) {
        match event {
            MigrationEvent::Stage { unit_id, stage } => {
                migrate_debug!("Thread {unit_id}: {stage}");
            }
            MigrationEvent::UnitFinished { unit_id, outcome } => match outcome {
                UnitOutcome::Completed {
                    children,
                    skipped_children,
                } => migrate_info!(
                    "Thread {unit_id} migrated: {children} message(s), {skipped_children} skipped"
                ),
                UnitOutcome::Failed { reason } => migrate_error!("Thread {unit_id} failed: {reason}"),
                UnitOutcome::Cancelled => migrate_warn!("Thread {unit_id} interrupted, left pending"),
            },
        }
    }
}

pub struct ChannelProgressSink {
    tx: mpsc::Sender<MigrationEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<MigrationEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    #[error("could not list threads: {0}")]
    Listing(ExecError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Source node to read and destination category to publish into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    pub node_id: u64,
    pub category_id: String,
}

/// Every collaborator the migrator needs, supplied by the caller.
pub struct MigratorParts {
    pub source: Arc<dyn SourceFetcher>,
    pub publisher: Arc<dyn DestinationPublisher>,
    pub retry: RetryExecutor,
    pub ledger: ProgressLedger,
    pub formatter: MessageFormatter,
    pub linker: AttachmentLinker,
    pub downloader: AttachmentDownloader,
    pub sink: Box<dyn ProgressSink>,
    pub target: MigrationTarget,
}

/// Migrates threads one at a time, checkpointing each outcome.
///
/// A thread is `Fetching` while its posts and attachments are read,
/// `Converting` while every post is rendered, and `Submitting` while the
/// discussion and its comments are created. The first post must become the
/// discussion, so a thread never makes progress without it; later posts are
/// best effort.
pub struct Migrator {
    source: Arc<dyn SourceFetcher>,
    publisher: Arc<dyn DestinationPublisher>,
    retry: RetryExecutor,
    ledger: ProgressLedger,
    formatter: MessageFormatter,
    linker: AttachmentLinker,
    downloader: AttachmentDownloader,
    sink: Box<dyn ProgressSink>,
    target: MigrationTarget,
}

struct RenderedChild<'a> {
    child: &'a ChildItem,
    body: String,
}

impl Migrator {
    pub fn new(parts: MigratorParts) -> Self {
        Self {
            source: parts.source,
            publisher: parts.publisher,
            retry: parts.retry,
            ledger: parts.ledger,
            formatter: parts.formatter,
            linker: parts.linker,
            downloader: parts.downloader,
            sink: parts.sink,
            target: parts.target,
        }
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, MigrateError> {
        let mut summary = RunSummary::default();

        match run_preflight(
            self.source.as_ref(),
            self.publisher.as_ref(),
            &self.retry,
            &self.target.category_id,
            self.linker.sandbox_root(),
            cancel,
        )
        .await
        {
            Ok(()) => {}
            Err(PreflightError::Cancelled) => {
                summary.cancelled = true;
                return Ok(self.finish(summary));
            }
            Err(err) => return Err(err.into()),
        }

        let node_id = self.target.node_id;
        migrate_info!("Fetching threads from node {node_id}...");
        let listed = self
            .retry
            .execute(
                &format!("list threads of node {node_id}"),
                || self.source.list_work_units(node_id),
                |err: &RawError| self.source.classify(err),
                cancel,
            )
            .await;
        let units = match listed {
            Ok(units) => units,
            Err(ExecError::Cancelled) => {
                summary.cancelled = true;
                return Ok(self.finish(summary));
            }
            Err(err) => return Err(MigrateError::Listing(err)),
        };

        summary.discovered = units.len();
        let pending = self.ledger.filter_pending(units);
        summary.skipped = summary.discovered - pending.len();
        migrate_info!(
            "{} threads found, {} already completed, {} to migrate",
            summary.discovered,
            summary.skipped,
            pending.len()
        );

        let total = pending.len();
        for (index, unit) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            migrate_info!("Processing thread {}/{total}: {}", index + 1, unit.title);

            let outcome = self.process_unit(unit, cancel).await;
            match &outcome {
                UnitOutcome::Completed { .. } => {
                    self.ledger.mark_completed(unit.id)?;
                    summary.completed += 1;
                }
                UnitOutcome::Failed { .. } => {
                    self.ledger.mark_failed(unit.id)?;
                    summary.failed += 1;
                    summary.failed_ids.push(unit.id);
                }
                UnitOutcome::Cancelled => summary.cancelled = true,
            }
            self.sink.emit(MigrationEvent::UnitFinished {
                unit_id: unit.id,
                outcome,
            });
            if summary.cancelled {
                break;
            }
        }

        Ok(self.finish(summary))
    }

    fn finish(&self, mut summary: RunSummary) -> RunSummary {
        let state = self.ledger.state();
        summary.completed_total = state.completed().len();
        summary.failed_total = state.failed().len();
        let stats = self.retry.stats();
        summary.operations = stats.operations;
        summary.rate_limit_hits = stats.rate_limit_hits;
        summary
    }

    fn stage(&self, unit: &WorkUnit, stage: Stage) {
        self.sink.emit(MigrationEvent::Stage {
            unit_id: unit.id,
            stage,
        });
    }

    async fn process_unit(&self, unit: &WorkUnit, cancel: &CancellationToken) -> UnitOutcome {
        self.stage(unit, Stage::Fetching);
        let fetched = self
            .retry
            .execute(
                &format!("fetch posts of thread {}", unit.id),
                || self.source.list_children(unit),
                |err: &RawError| self.source.classify(err),
                cancel,
            )
            .await;
        let children = match fetched {
            Ok(children) => children,
            Err(ExecError::Cancelled) => return UnitOutcome::Cancelled,
            Err(ExecError::Failed(err)) => {
                return UnitOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        if children.is_empty() {
            return UnitOutcome::Failed {
                reason: "thread has no posts".to_string(),
            };
        }
        migrate_info!("Found {} posts", children.len());

        let files = collect_attachments(&children);
        let available = if files.is_empty() {
            Vec::new()
        } else {
            migrate_info!("Found {} attachments", files.len());
            match self
                .downloader
                .download_all(&files, self.source.as_ref(), &self.retry, cancel)
                .await
            {
                Ok(report) => {
                    if report.failed + report.invalid > 0 {
                        migrate_warn!(
                            "Thread {}: {} attachment(s) failed, {} invalid",
                            unit.id,
                            report.failed,
                            report.invalid
                        );
                    }
                    report.available
                }
                Err(_) => return UnitOutcome::Cancelled,
            }
        };

        self.stage(unit, Stage::Converting);
        let mut rendered = Vec::with_capacity(children.len());
        let mut skipped_children = 0;
        for (index, child) in children.iter().enumerate() {
            match self.render_child(unit, child, &available) {
                Ok(body) => rendered.push(RenderedChild { child, body }),
                Err(err) if index == 0 => {
                    return UnitOutcome::Failed {
                        reason: format!("first post {}: {err}", child.id),
                    }
                }
                Err(err) => {
                    migrate_warn!("Skipping post {} of thread {}: {err}", child.id, unit.id);
                    skipped_children += 1;
                }
            }
        }

        self.stage(unit, Stage::Submitting);
        self.submit(unit, &rendered, skipped_children, cancel).await
    }

    fn render_child(
        &self,
        unit: &WorkUnit,
        child: &ChildItem,
        files: &[FileRef],
    ) -> Result<String, FormatError> {
        let content = self.formatter.render_content(&child.body);
        let linked = self.linker.rewrite_references(&content, files);
        for token in &linked.unresolved {
            migrate_warn!(
                "Thread {} post {}: unhandled attachment reference {token}",
                unit.id,
                child.id
            );
        }
        let header = MessageHeader::new(child.author.as_str(), child.created_at, unit.id, child.id);
        self.formatter.format_message(&header, &linked.text)
    }

    async fn submit(
        &self,
        unit: &WorkUnit,
        rendered: &[RenderedChild<'_>],
        mut skipped_children: usize,
        cancel: &CancellationToken,
    ) -> UnitOutcome {
        let Some((first, rest)) = rendered.split_first() else {
            return UnitOutcome::Failed {
                reason: "no post could be rendered".to_string(),
            };
        };
        let title = if unit.title.trim().is_empty() {
            format!("Untitled thread {}", unit.id)
        } else {
            unit.title.clone()
        };

        if self.retry.is_dry_run() {
            migrate_debug!("Discussion body preview:\n{}", first.body);
        }
        let created = self
            .retry
            .submit(
                &format!("create discussion {title:?}"),
                || {
                    self.publisher
                        .create_container(&title, &first.body, &self.target.category_id)
                },
                |err: &RawError| self.publisher.classify(err),
                cancel,
            )
            .await;
        let container: Option<ContainerRef> = match created {
            Ok(container) => container,
            Err(ExecError::Cancelled) => return UnitOutcome::Cancelled,
            Err(ExecError::Failed(err)) => {
                return UnitOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        if let Some(container) = &container {
            migrate_info!("Created discussion #{}", container.number);
        }
        let container_id = container.as_ref().map(|c| c.id.as_str()).unwrap_or_default();

        let mut published = 1;
        for item in rest {
            if self.retry.is_dry_run() {
                migrate_debug!("Comment preview:\n{}", item.body);
            }
            let added = self
                .retry
                .submit(
                    &format!("add comment by {}", item.child.author),
                    || self.publisher.add_child(container_id, &item.body),
                    |err: &RawError| self.publisher.classify(err),
                    cancel,
                )
                .await;
            match added {
                Ok(_) => published += 1,
                Err(ExecError::Cancelled) => return UnitOutcome::Cancelled,
                Err(ExecError::Failed(err)) => {
                    migrate_warn!("Comment for post {} not added: {err}", item.child.id);
                    skipped_children += 1;
                }
            }
        }

        UnitOutcome::Completed {
            children: published,
            skipped_children,
        }
    }
}

/// Attachments across the thread's posts, first occurrence of each id.
fn collect_attachments(children: &[ChildItem]) -> Vec<FileRef> {
    let mut seen = HashSet::new();
    children
        .iter()
        .flat_map(|child| child.attachments.iter())
        .filter(|file| seen.insert(file.id))
        .cloned()
        .collect()
}
