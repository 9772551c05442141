use std::path::PathBuf;

use crate::constants;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reconciling a hot-plug event.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The network configuration document is structurally invalid.
    #[error("unable to parse network config: {0}")]
    ConfigParse(String),

    /// The udev action is not one the matcher knows how to evaluate.
    #[error("cannot detect unknown action: {0}")]
    InvalidAction(String),

    /// No datasource could be loaded from the instance cache.
    #[error("no datasource found: {0}")]
    SourceNotFound(String),

    /// The device is not (or still) reflected in the network configuration.
    #[error("failed to detect device change in metadata")]
    DetectionFailed,

    /// Refreshing instance metadata failed.
    #[error("unable to refresh metadata: {0}")]
    Metadata(String),

    /// A renderer artifact could not be written.
    #[error("unable to write {path:?}: {detail}")]
    OsConfigWrite { path: PathBuf, detail: String },

    /// A network restart command failed.
    #[error("command `{command}` failed: {detail}")]
    OsCommand { command: String, detail: String },

    /// No renderer applies to the running OS.
    #[error("no network renderer available for {0}")]
    NoRenderer(String),

    /// The instance cache could not be persisted.
    #[error("unable to write instance cache {path:?}: {detail}")]
    CacheWrite { path: PathBuf, detail: String },

    /// The hook's own configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::SourceNotFound(_) => constants::EXIT_UNHANDLED,
            _ => constants::EXIT_FAILURE,
        }
    }

    pub(crate) fn os_write(path: impl Into<PathBuf>, error: anyhow::Error) -> Self {
        Error::OsConfigWrite {
            path: path.into(),
            detail: format!("{:#}", error),
        }
    }

    pub(crate) fn cache_write(path: impl Into<PathBuf>, error: anyhow::Error) -> Self {
        Error::CacheWrite {
            path: path.into(),
            detail: format!("{:#}", error),
        }
    }
}
