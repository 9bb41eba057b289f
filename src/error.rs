use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid manifest id {0:?}")]
    InvalidVersionId(String),

    #[error("version {version} for {platform} not found")]
    NotFound { platform: String, version: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to resolve data directory")]
    NoDataDir,

    #[error("path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything a single depot fetch can fail with.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("steamcmd not found: {0}")]
    ToolNotFound(String),

    #[error("unknown depot id {0}")]
    UnknownDepot(String),

    #[error("failed to launch steamcmd: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("steamcmd failed ({})", describe_exit(.code))]
    ToolFailed { code: Option<i32> },

    #[error("steamcmd exited cleanly but never reported a depot download path")]
    CompletionMissing,

    #[error("steamcmd reported download path {0} but it does not exist")]
    CompletionPathMissing(PathBuf),

    #[error(
        "failed to move files into {target}: {source} (downloaded files kept in {scratch})"
    )]
    Ingest {
        target: PathBuf,
        scratch: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no Steam Guard code entered within {}s", .0.as_secs())]
    GuardCodeTimeout(Duration),

    #[error("Steam Guard code rejected after {0} attempts")]
    GuardCodeRejected(u32),

    #[error("steamcmd produced no output for {}s", .0.as_secs())]
    Stalled(Duration),

    #[error("download cancelled")]
    Cancelled,

    #[error("steamcmd i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FetchError {
    /// The tool claimed success but its output did not match the expected contract.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self,
            FetchError::CompletionMissing | FetchError::CompletionPathMissing(_)
        )
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_string(),
    }
}
