use crate::{
    error::{Result, Stage, StageError, UpdaterError},
    fetcher::ReleaseSource,
    hasher::{ContentDigest, ContentHasher, FileHasher},
    manifest::UpdateManifest,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile, PathPersistError};
use tokio::task;

/// Mode given to the staged artefact before promotion and restored on the
/// live binary afterwards.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Verifies and installs releases into a single live binary path.
///
/// A run moves strictly forward through hash, fetch, compare, download,
/// re-verify, promote and permission restore. The live binary is only ever
/// mutated by one rename of a staged artefact whose digest matched the
/// manifest fetched in the same run.
pub struct VerifiedInstaller<R, H = ContentHasher> {
    source: R,
    hasher: Arc<H>,
    binary_path: PathBuf,
    staging_dir: PathBuf,
}

/// What [`compare`] decided for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    UpToDate,
    Download,
}

/// Compare the live binary digest with the manifest. Exact string equality.
pub fn compare(current: &ContentDigest, manifest: &UpdateManifest) -> Decision {
    if current.as_str() == manifest.digest {
        Decision::UpToDate
    } else {
        Decision::Download
    }
}

/// Result of a successful install run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The live binary already matches the manifest; nothing was touched.
    UpToDate { digest: ContentDigest },
    /// A verified release now occupies the live binary path.
    Installed {
        previous: ContentDigest,
        installed: ContentDigest,
        binary_path: PathBuf,
    },
}

impl<R, H> VerifiedInstaller<R, H>
where
    R: ReleaseSource,
    H: FileHasher + 'static,
{
    /// Create an installer for `binary_path`, staging downloads in `staging_dir`.
    pub fn new(
        source: R,
        hasher: H,
        binary_path: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let binary_path = binary_path.into();
        if !binary_path.is_absolute() {
            return Err(UpdaterError::config(format!(
                "binary path must be absolute: {}",
                binary_path.display()
            )));
        }
        if binary_path.file_name().is_none() {
            return Err(UpdaterError::config(format!(
                "binary path has no file name: {}",
                binary_path.display()
            )));
        }

        Ok(Self {
            source,
            hasher: Arc::new(hasher),
            binary_path,
            staging_dir: staging_dir.into(),
        })
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Run the verification and replace protocol once.
    pub async fn install(&self) -> std::result::Result<InstallOutcome, StageError> {
        let current = self
            .digest(&self.binary_path)
            .await
            .map_err(StageError::at(Stage::HashCurrent))?;
        tracing::info!(digest = %current, path = ?self.binary_path, "current binary hashed");

        let manifest = self
            .source
            .fetch_manifest()
            .await
            .map_err(StageError::at(Stage::FetchManifest))?;

        if compare(&current, &manifest) == Decision::UpToDate {
            tracing::info!(digest = %current, "binary is up to date");
            return Ok(InstallOutcome::UpToDate { digest: current });
        }
        tracing::info!(current = %current, latest = %manifest.digest, "new release available");

        let staged = self
            .download(&manifest)
            .await
            .map_err(StageError::at(Stage::Download))?;

        // Dropping `staged` on any failure below deletes the artefact.
        let installed = self
            .reverify(&staged, &manifest)
            .await
            .map_err(StageError::at(Stage::ReVerify))?;

        let target = self.binary_path.clone();
        blocking(move || promote(staged, &target))
            .await
            .map_err(StageError::at(Stage::Promote))?;
        tracing::info!(path = ?self.binary_path, "release promoted");

        let target = self.binary_path.clone();
        blocking(move || restore_permissions(&target))
            .await
            .map_err(StageError::at(Stage::RestorePerms))?;

        Ok(InstallOutcome::Installed {
            previous: current,
            installed,
            binary_path: self.binary_path.clone(),
        })
    }

    /// Hash `path` on the blocking pool.
    async fn digest(&self, path: &Path) -> Result<ContentDigest> {
        let hasher = Arc::clone(&self.hasher);
        let path = path.to_path_buf();
        blocking(move || hasher.digest(&path)).await
    }

    async fn download(&self, manifest: &UpdateManifest) -> Result<NamedTempFile> {
        let location = manifest.download_url()?;
        let staged = self.stage_file()?;
        self.source.fetch_payload(&location, staged.path()).await?;
        Ok(staged)
    }

    fn stage_file(&self) -> Result<NamedTempFile> {
        let name = self
            .binary_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".staged")
            .tempfile_in(&self.staging_dir)
            .map_err(|err| UpdaterError::io(&self.staging_dir, err))
    }

    async fn reverify(
        &self,
        staged: &NamedTempFile,
        manifest: &UpdateManifest,
    ) -> Result<ContentDigest> {
        let actual = self.digest(staged.path()).await?;
        if actual.as_str() != manifest.digest {
            tracing::warn!(
                expected = %manifest.digest,
                actual = %actual,
                "staged artefact failed verification, discarding"
            );
            return Err(UpdaterError::IntegrityMismatch {
                expected: manifest.digest.clone(),
                actual: actual.as_str().to_string(),
            });
        }
        Ok(actual)
    }
}

/// Perform blocking filesystem work in a dedicated thread.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work).await?
}

/// Rename a verified staged artefact onto `target`.
///
/// The artefact is made executable first so the live path never holds a
/// binary the supervisor cannot exec.
fn promote(staged: NamedTempFile, target: &Path) -> Result<()> {
    let target_dir = target
        .parent()
        .ok_or_else(|| UpdaterError::config("binary path must have a parent directory"))?;

    if !same_filesystem(staged.path(), target_dir)? {
        return Err(UpdaterError::CrossDevice {
            staged: staged.path().to_path_buf(),
            target: target.to_path_buf(),
        });
    }

    make_executable(&staged)?;
    if let Ok(meta) = staged.as_file().metadata() {
        tracing::debug!(bytes = meta.len(), staged = ?staged.path(), "promoting staged artefact");
    }

    // `persist` is a plain rename(2); there is no copy fallback.
    staged
        .into_temp_path()
        .persist(target)
        .map_err(|err| map_persist_error(err, target))
}

#[cfg(unix)]
fn make_executable(staged: &NamedTempFile) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    staged
        .as_file()
        .set_permissions(fs::Permissions::from_mode(EXECUTABLE_MODE))
        .map_err(|err| UpdaterError::io(staged.path(), err))
}

#[cfg(not(unix))]
fn make_executable(_staged: &NamedTempFile) -> Result<()> {
    Ok(())
}

fn map_persist_error(err: PathPersistError, target: &Path) -> UpdaterError {
    UpdaterError::io(target, err.error)
}

#[cfg(unix)]
fn same_filesystem(staged: &Path, target_dir: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let staged_dev = fs::metadata(staged)
        .map_err(|err| UpdaterError::io(staged, err))?
        .dev();
    let target_dev = fs::metadata(target_dir)
        .map_err(|err| UpdaterError::io(target_dir, err))?
        .dev();
    Ok(staged_dev == target_dev)
}

#[cfg(not(unix))]
fn same_filesystem(_staged: &Path, _target_dir: &Path) -> Result<bool> {
    // rename fails on its own when volumes differ.
    Ok(true)
}

/// Set the executable bits on the live binary.
#[cfg(unix)]
pub fn restore_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_MODE))
        .map_err(|err| UpdaterError::io(path, err))
}

#[cfg(not(unix))]
pub fn restore_permissions(path: &Path) -> Result<()> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|err| UpdaterError::io(path, err))
}
