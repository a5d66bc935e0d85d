//! Digest-verified self-update for a supervised service binary.
//!
//! An update run hashes the binary currently installed, fetches a manifest
//! describing the latest release, and when the digests differ downloads the
//! release into a staging file, re-hashes it against the manifest, renames it
//! over the live binary in one step and restores its executable mode. Only
//! then is the service asked to shut down so its supervisor relaunches it.
//! Every failure is fatal for the run and carries the [`Stage`] it happened in.
//!
//! ```ignore
//! use updater::{Agent, AgentConfig, RunReport};
//!
//! # async fn demo() -> Result<(), updater::StageError> {
//! let config = AgentConfig::load("update.toml")
//!     .map_err(updater::StageError::at(updater::Stage::LoadConfig))?;
//! let agent = Agent::from_config(&config)?;
//! match agent.run().await? {
//!     RunReport::UpToDate { digest } => println!("already at {digest}"),
//!     RunReport::Updated { installed, .. } => println!("installed {installed}"),
//! }
//! # Ok(())
//! # }
//! ```

mod agent;
mod config;
mod error;
mod fetcher;
mod hasher;
mod installer;
mod jitter;
mod manifest;
mod restart;

pub use agent::{Agent, RunReport};
pub use config::AgentConfig;
pub use error::{FailureClass, Result, Stage, StageError, UpdaterError};
pub use fetcher::{HttpReleaseSource, HttpReleaseSourceBuilder, ReleaseSource};
pub use hasher::{ContentDigest, ContentHasher, DigestAlgorithm, FileHasher};
pub use installer::{
    compare, restore_permissions, Decision, InstallOutcome, VerifiedInstaller, EXECUTABLE_MODE,
};
pub use jitter::{JitterScheduler, DEFAULT_MAX_JITTER_SECS};
pub use manifest::UpdateManifest;
pub use restart::{HttpRestartSignaler, RestartSignaler, DEFAULT_RESTART_URL};
pub use reqwest::Url;
