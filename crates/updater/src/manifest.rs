use crate::error::{Result, UpdaterError};
use crate::hasher::ContentDigest;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Description of the latest release as published by the update server.
///
/// The wire format is `{"md5": "<hex digest>", "link": "<download URL>"}`. The
/// `md5` key is kept for compatibility even when another digest algorithm is
/// configured on both ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateManifest {
    /// Expected hex digest of the release binary.
    #[serde(rename = "md5")]
    pub digest: String,
    /// Location the release binary can be downloaded from.
    #[serde(rename = "link")]
    pub download_location: String,
}

impl UpdateManifest {
    /// Decode and validate a manifest body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let manifest: UpdateManifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.digest.is_empty() {
            return Err(UpdaterError::InvalidManifest("digest is empty".into()));
        }
        if !self.digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UpdaterError::InvalidManifest(format!(
                "digest is not hex: {}",
                self.digest
            )));
        }
        self.download_url()?;
        Ok(())
    }

    pub fn digest(&self) -> ContentDigest {
        ContentDigest::new(self.digest.clone())
    }

    /// Parse the download location into an absolute http(s) URL.
    pub fn download_url(&self) -> Result<Url> {
        let url = Url::parse(&self.download_location).map_err(|err| {
            UpdaterError::InvalidManifest(format!(
                "invalid link {:?}: {err}",
                self.download_location
            ))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(UpdaterError::InvalidManifest(format!(
                "unsupported link scheme: {other}"
            ))),
        }
    }
}
