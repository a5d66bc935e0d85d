use crate::{
    config::AgentConfig,
    error::{Stage, StageError},
    fetcher::{HttpReleaseSource, ReleaseSource},
    hasher::{ContentDigest, ContentHasher, FileHasher},
    installer::{InstallOutcome, VerifiedInstaller},
    jitter::JitterScheduler,
    restart::{HttpRestartSignaler, RestartSignaler},
};
use std::path::PathBuf;

/// Outcome of a complete agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    UpToDate {
        digest: ContentDigest,
    },
    /// New binary installed and the service told to restart.
    Updated {
        previous: ContentDigest,
        installed: ContentDigest,
        binary_path: PathBuf,
    },
}

/// Drives one update run: jitter, verified install, restart signal.
pub struct Agent<R, S, H = ContentHasher> {
    installer: VerifiedInstaller<R, H>,
    signaler: S,
    scheduler: Option<JitterScheduler>,
}

impl Agent<HttpReleaseSource, HttpRestartSignaler, ContentHasher> {
    /// Wire the HTTP collaborators described by `config`.
    pub fn from_config(config: &AgentConfig) -> Result<Self, StageError> {
        let timeout = config.timeout();

        let source = HttpReleaseSource::builder()
            .endpoint(config.endpoint_url().map_err(StageError::at(Stage::LoadConfig))?)
            .timeout(timeout)
            .build()
            .map_err(StageError::at(Stage::LoadConfig))?;
        let signaler = HttpRestartSignaler::new(
            config.restart_url().map_err(StageError::at(Stage::LoadConfig))?,
            timeout,
        )
        .map_err(StageError::at(Stage::LoadConfig))?;
        let installer = VerifiedInstaller::new(
            source,
            ContentHasher::new(config.digest),
            config.binary_path(),
            config.staging_dir(),
        )
        .map_err(StageError::at(Stage::LoadConfig))?;

        Ok(Agent::new(installer, signaler).with_jitter(JitterScheduler::new(config.max_jitter_secs)))
    }
}

impl<R, S, H> Agent<R, S, H>
where
    R: ReleaseSource,
    S: RestartSignaler,
    H: FileHasher + 'static,
{
    /// Build an agent without a startup delay.
    pub fn new(installer: VerifiedInstaller<R, H>, signaler: S) -> Self {
        Self {
            installer,
            signaler,
            scheduler: None,
        }
    }

    pub fn with_jitter(mut self, scheduler: JitterScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.scheduler = None;
        self
    }

    pub async fn run(&self) -> Result<RunReport, StageError> {
        if let Some(scheduler) = &self.scheduler {
            scheduler.wait().await;
        }

        match self.installer.install().await? {
            InstallOutcome::UpToDate { digest } => Ok(RunReport::UpToDate { digest }),
            InstallOutcome::Installed {
                previous,
                installed,
                binary_path,
            } => {
                // Only reached once promotion and permission restore both succeeded.
                self.signaler
                    .signal_restart()
                    .await
                    .map_err(StageError::at(Stage::SignalRestart))?;
                tracing::info!(digest = %installed, "update complete");
                Ok(RunReport::Updated {
                    previous,
                    installed,
                    binary_path,
                })
            }
        }
    }
}
