use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use migrator_engine::{
    GitHubSettings, HttpSettings, RetrySettings, XenForoSettings, GITHUB_GRAPHQL_ENDPOINT,
};
use url::Url;

const PLACEHOLDER_API_URL: &str = "https://your-forum.com/api";
const PLACEHOLDER_API_KEY: &str = "your_xenforo_api_key";
const PLACEHOLDER_TOKEN: &str = "your_github_token";
const PLACEHOLDER_REPOSITORY: &str = "your_username/your_repo";
const PLACEHOLDER_CATEGORY: &str = "DIC_kwDOxxxxxxxx";

/// Migrate a XenForo forum node into GitHub Discussions.
///
/// Every option can also be supplied through the environment or a `.env` file.
#[derive(Debug, Parser)]
#[command(name = "forum-migrate", version, about)]
pub struct Args {
    /// XenForo REST API base URL, e.g. https://forum.example.com/api
    #[arg(long, env = "XENFORO_API_URL")]
    pub xenforo_api_url: String,

    #[arg(long, env = "XENFORO_API_KEY", hide_env_values = true)]
    pub xenforo_api_key: String,

    /// User id the API key acts as.
    #[arg(long, env = "XENFORO_API_USER", default_value = "1")]
    pub xenforo_api_user: String,

    /// Forum node whose threads are migrated.
    #[arg(long, env = "XENFORO_NODE_ID", allow_negative_numbers = true)]
    pub node_id: i64,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// Target repository as owner/repo.
    #[arg(long, env = "GITHUB_REPO")]
    pub github_repo: String,

    /// Discussion category node id, e.g. DIC_kwDO...
    #[arg(long, env = "GITHUB_CATEGORY_ID")]
    pub category_id: String,

    #[arg(long, env = "GITHUB_GRAPHQL_URL", default_value = GITHUB_GRAPHQL_ENDPOINT)]
    pub graphql_endpoint: String,

    #[arg(long, env = "ATTACHMENTS_DIR", default_value = "./attachments")]
    pub attachments_dir: PathBuf,

    /// Defaults to migration_progress_<node>.json.
    #[arg(long, env = "PROGRESS_FILE")]
    pub progress_file: Option<PathBuf>,

    /// Attempts per operation, including the first.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3, allow_negative_numbers = true)]
    pub max_attempts: i64,

    /// Retry n waits n times this many seconds.
    #[arg(
        long,
        env = "GITHUB_RETRY_BACKOFF_MULTIPLE",
        default_value_t = 2,
        allow_negative_numbers = true
    )]
    pub backoff_multiplier_secs: i64,

    /// Pause before every first attempt.
    #[arg(long, env = "GITHUB_RATE_LIMIT_DELAY_MS", default_value_t = 1000)]
    pub rate_limit_delay_ms: u64,

    #[arg(long, env = "MAX_BACKOFF_SECS", default_value_t = 300)]
    pub max_backoff_secs: u64,

    /// Longest single wait on a rate limit.
    #[arg(long, env = "RATE_LIMIT_CEILING_SECS", default_value_t = 7200)]
    pub rate_limit_ceiling_secs: u64,

    #[arg(long, env = "ATTACHMENT_RATE_LIMIT_DELAY_MS", default_value_t = 500)]
    pub attachment_delay_ms: u64,

    /// Pause between page requests to the forum.
    #[arg(long, env = "PAGE_DELAY_MS", default_value_t = 0)]
    pub page_delay_ms: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "MAX_ATTACHMENT_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub max_attachment_bytes: u64,

    /// Quote nesting levels converted before the rest is left as is.
    #[arg(long, env = "MAX_QUOTE_DEPTH", default_value_t = 10)]
    pub max_quote_depth: usize,

    /// Record this thread id as the resume point.
    #[arg(long, env = "RESUME_FROM", default_value_t = 0)]
    pub resume_from: u64,

    /// Read from the forum but write nothing.
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    #[arg(short, long, env = "VERBOSE")]
    pub verbose: bool,

    /// Also write the log to this file.
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),
    #[error("{0} still has its placeholder value")]
    Placeholder(&'static str),
    #[error("invalid {name} {value:?}: {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("GitHub repository must be in format 'owner/repo', got {0:?}")]
    RepositoryShape(String),
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: i64 },
}

/// Validated settings for one run.
pub struct AppConfig {
    pub xenforo: XenForoSettings,
    pub github: GitHubSettings,
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub node_id: u64,
    pub category_id: String,
    pub attachments_dir: PathBuf,
    pub progress_file: PathBuf,
    pub attachment_delay: Duration,
    pub max_quote_depth: usize,
    pub resume_from: u64,
    pub dry_run: bool,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn validate(args: Args) -> Result<Self, ConfigError> {
        let api_url = required("XenForo API URL", &args.xenforo_api_url, PLACEHOLDER_API_URL)?;
        parse_url("XenForo API URL", &api_url)?;
        let api_key = required("XenForo API key", &args.xenforo_api_key, PLACEHOLDER_API_KEY)?;
        let api_user = required("XenForo API user", &args.xenforo_api_user, "")?;
        let node_id = positive("XenForo node id", args.node_id)?;

        let token = required("GitHub token", &args.github_token, PLACEHOLDER_TOKEN)?;
        let repository = required("GitHub repository", &args.github_repo, PLACEHOLDER_REPOSITORY)?;
        validate_repository(&repository)?;
        let category_id = required("GitHub category id", &args.category_id, PLACEHOLDER_CATEGORY)?;
        let endpoint = required("GitHub GraphQL endpoint", &args.graphql_endpoint, "")?;
        parse_url("GitHub GraphQL endpoint", &endpoint)?;

        let max_attempts = positive("max attempts", args.max_attempts)?;
        let multiplier = positive("backoff multiplier", args.backoff_multiplier_secs)?;
        if args.attachments_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("attachments directory"));
        }

        let progress_file = args
            .progress_file
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(format!("migration_progress_{node_id}.json")));

        Ok(Self {
            xenforo: XenForoSettings {
                base_url: api_url,
                api_key,
                api_user,
                page_delay: Duration::from_millis(args.page_delay_ms),
            },
            github: GitHubSettings {
                endpoint,
                token,
                repository,
            },
            http: HttpSettings {
                connect_timeout: Duration::from_secs(args.connect_timeout_secs),
                request_timeout: Duration::from_secs(args.request_timeout_secs),
                max_download_bytes: args.max_attachment_bytes,
                ..HttpSettings::default()
            },
            retry: RetrySettings {
                max_attempts: u32::try_from(max_attempts).unwrap_or(u32::MAX),
                backoff_multiplier: Duration::from_secs(multiplier),
                base_delay: Duration::from_millis(args.rate_limit_delay_ms),
                max_backoff: Duration::from_secs(args.max_backoff_secs),
                rate_limit_ceiling: Duration::from_secs(args.rate_limit_ceiling_secs),
                dry_run: args.dry_run,
            },
            node_id,
            category_id,
            attachments_dir: args.attachments_dir,
            progress_file,
            attachment_delay: Duration::from_millis(args.attachment_delay_ms),
            max_quote_depth: args.max_quote_depth,
            resume_from: args.resume_from,
            dry_run: args.dry_run,
            verbose: args.verbose,
            log_file: args.log_file,
        })
    }
}

fn required(name: &'static str, value: &str, placeholder: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    if !placeholder.is_empty() && value == placeholder {
        return Err(ConfigError::Placeholder(name));
    }
    Ok(value.to_string())
}

fn positive(name: &'static str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(ConfigError::NotPositive { name, value })
}

fn parse_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            name,
            value: value.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn validate_repository(repository: &str) -> Result<(), ConfigError> {
    let mut parts = repository.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(ConfigError::RepositoryShape(repository.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(overrides: &[(&str, &str)]) -> Args {
        let mut values = vec![
            ("--xenforo-api-url", "https://forum.example/api"),
            ("--xenforo-api-key", "key"),
            ("--xenforo-api-user", "1"),
            ("--node-id", "7"),
            ("--github-token", "ghp_abc"),
            ("--github-repo", "octo/forum"),
            ("--category-id", "DIC_real"),
            ("--max-attempts", "3"),
            ("--backoff-multiplier-secs", "2"),
        ];
        for (flag, value) in overrides {
            match values.iter_mut().find(|(f, _)| f == flag) {
                Some(entry) => entry.1 = *value,
                None => values.push((*flag, *value)),
            }
        }
        let mut argv = vec!["forum-migrate".to_string()];
        for (flag, value) in values {
            argv.push(format!("{flag}={value}"));
        }
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_produce_a_usable_config() {
        let config = AppConfig::validate(args(&[])).unwrap();
        assert_eq!(config.node_id, 7);
        assert_eq!(config.progress_file, PathBuf::from("migration_progress_7.json"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_multiplier, Duration::from_secs(2));
        assert_eq!(config.github.repository, "octo/forum");
    }

    #[test]
    fn placeholders_are_rejected() {
        let err = AppConfig::validate(args(&[("--github-token", PLACEHOLDER_TOKEN)])).err();
        assert_eq!(err, Some(ConfigError::Placeholder("GitHub token")));

        let err = AppConfig::validate(args(&[("--category-id", PLACEHOLDER_CATEGORY)])).err();
        assert_eq!(err, Some(ConfigError::Placeholder("GitHub category id")));

        let err = AppConfig::validate(args(&[("--xenforo-api-url", PLACEHOLDER_API_URL)])).err();
        assert_eq!(err, Some(ConfigError::Placeholder("XenForo API URL")));
    }

    #[test]
    fn repository_must_be_owner_slash_name() {
        for bad in ["octo", "octo/", "/forum", "a/b/c"] {
            let err = AppConfig::validate(args(&[("--github-repo", bad)])).err();
            assert_eq!(err, Some(ConfigError::RepositoryShape(bad.to_string())));
        }
    }

    #[test]
    fn counts_must_be_positive() {
        let err = AppConfig::validate(args(&[("--node-id", "0")])).err();
        assert_eq!(
            err,
            Some(ConfigError::NotPositive {
                name: "XenForo node id",
                value: 0
            })
        );
        let err = AppConfig::validate(args(&[("--max-attempts", "-1")])).err();
        assert!(matches!(err, Some(ConfigError::NotPositive { value: -1, .. })));
    }

    #[test]
    fn urls_must_parse_as_http() {
        let err = AppConfig::validate(args(&[("--xenforo-api-url", "not a url")])).err();
        assert!(matches!(err, Some(ConfigError::InvalidUrl { .. })));
        let err = AppConfig::validate(args(&[("--xenforo-api-url", "ftp://forum.example")])).err();
        assert!(matches!(err, Some(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn explicit_progress_file_wins() {
        let config = AppConfig::validate(args(&[("--progress-file", "state.json")])).unwrap();
        assert_eq!(config.progress_file, PathBuf::from("state.json"));
    }
}
