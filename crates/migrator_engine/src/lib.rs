//! Migrator engine: retry policy, durable progress, remote collaborators and
//! the per-thread pipeline.
mod downloader;
mod http;
mod ledger;
mod orchestrator;
mod persist;
mod preflight;
mod publish;
mod retry;
mod source;
mod types;

pub use downloader::{AttachmentDownloader, DownloadReport};
pub use http::{build_client, map_reqwest_error, reset_hint, HttpSettings};
pub use ledger::{LedgerError, ProgressLedger};
pub use orchestrator::{
    ChannelProgressSink, LogSink, MigrateError, MigrationTarget, Migrator, MigratorParts,
    ProgressSink,
};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use preflight::{run_preflight, PreflightError};
pub use publish::{
    ContainerRef, DestinationPublisher, DiscussionCategory, GitHubDiscussions, GitHubSettings,
    RepositoryInfo, GITHUB_GRAPHQL_ENDPOINT,
};
pub use retry::{pause, RetryExecutor, RetrySettings, RetryStats};
pub use source::{SourceFetcher, XenForoClient, XenForoSettings};
pub use types::{ClassifiedError, ExecError, MigrationEvent, RunSummary, Stage, UnitOutcome};
