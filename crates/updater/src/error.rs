use std::fmt;
use std::path::PathBuf;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while performing an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// Transport-level failure (DNS, connect, timeout) talking to an endpoint.
    #[error("request to {url} failed: {source}")]
    Network {
        /// Endpoint that was being contacted.
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// No progress was made on a transfer within the configured timeout.
    #[error("request to {url} stalled for {after:?}")]
    Timeout {
        /// Endpoint that was being contacted.
        url: String,
        /// Idle period after which the transfer was abandoned.
        after: std::time::Duration,
    },
    /// An endpoint answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// Endpoint that was being contacted.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },
    /// The manifest could not be decoded from JSON.
    #[error("manifest decoding failed: {0}")]
    ManifestDecode(#[from] serde_json::Error),
    /// The manifest decoded but its content is unusable.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    /// The downloaded artefact hash did not match the manifest.
    #[error("binary integrity check failed (expected {expected}, got {actual})")]
    IntegrityMismatch {
        /// Digest announced by the manifest.
        expected: String,
        /// Digest computed over the staged artefact.
        actual: String,
    },
    /// Failed to perform an I/O operation.
    #[error("filesystem operation on {path:?} failed: {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The staging directory and the live binary live on different filesystems.
    #[error("cannot rename {staged:?} onto {target:?} atomically: different filesystems")]
    CrossDevice {
        /// Location of the staged artefact.
        staged: PathBuf,
        /// Live binary path.
        target: PathBuf,
    },
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// A blocking filesystem task panicked or was cancelled.
    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl UpdaterError {
    /// Wrap an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UpdaterError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a reqwest error raised while talking to `url`.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        UpdaterError::Network {
            url: url.into(),
            source,
        }
    }

    /// Helper for configuration validation failures.
    pub fn config(msg: impl Into<String>) -> Self {
        UpdaterError::Config(msg.into())
    }

    /// Taxonomy class of this error.
    pub fn class(&self) -> FailureClass {
        match self {
            UpdaterError::Network { .. } | UpdaterError::Timeout { .. } => FailureClass::Network,
            UpdaterError::Status { .. }
            | UpdaterError::ManifestDecode(_)
            | UpdaterError::InvalidManifest(_) => FailureClass::Protocol,
            UpdaterError::IntegrityMismatch { .. } => FailureClass::Integrity,
            UpdaterError::Io { .. }
            | UpdaterError::CrossDevice { .. }
            | UpdaterError::Join(_) => FailureClass::Io,
            UpdaterError::Config(_) => FailureClass::Config,
        }
    }
}

/// Coarse failure classes reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Config,
    Io,
    Network,
    Protocol,
    Integrity,
}

impl FailureClass {
    /// Process exit code used for this class.
    pub fn exit_code(self) -> u8 {
        match self {
            FailureClass::Config => 2,
            FailureClass::Io => 3,
            FailureClass::Network => 4,
            FailureClass::Protocol => 5,
            FailureClass::Integrity => 6,
        }
    }
}

/// Steps of a single update run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadConfig,
    Jitter,
    HashCurrent,
    FetchManifest,
    Compare,
    Download,
    ReVerify,
    Promote,
    RestorePerms,
    SignalRestart,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::LoadConfig => "load-config",
            Stage::Jitter => "jitter",
            Stage::HashCurrent => "hash-current",
            Stage::FetchManifest => "fetch-manifest",
            Stage::Compare => "compare",
            Stage::Download => "download",
            Stage::ReVerify => "re-verify",
            Stage::Promote => "promote",
            Stage::RestorePerms => "restore-perms",
            Stage::SignalRestart => "signal-restart",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal error tagged with the stage that produced it.
#[derive(thiserror::Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: UpdaterError,
}

impl StageError {
    pub fn new(stage: Stage, source: UpdaterError) -> Self {
        Self { stage, source }
    }

    /// Closure adapter for `map_err`.
    pub fn at(stage: Stage) -> impl FnOnce(UpdaterError) -> StageError {
        move |source| StageError::new(stage, source)
    }

    pub fn class(&self) -> FailureClass {
        self.source.class()
    }
}
