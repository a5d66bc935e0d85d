use crate::error::{Result, UpdaterError};
use crate::manifest::UpdateManifest;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstraction over where release information and payloads come from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Retrieve the manifest describing the latest release.
    async fn fetch_manifest(&self) -> Result<UpdateManifest>;

    /// Stream the payload at `location` into `destination`, creating or
    /// truncating it. Returns the number of bytes written.
    async fn fetch_payload(&self, location: &Url, destination: &Path) -> Result<u64>;
}

/// Builder for [`HttpReleaseSource`].
#[derive(Default)]
pub struct HttpReleaseSourceBuilder {
    endpoint: Option<Url>,
    timeout: Option<Duration>,
    client: Option<Client>,
}

impl HttpReleaseSourceBuilder {
    /// Set the manifest endpoint.
    pub fn endpoint(mut self, url: Url) -> Self {
        self.endpoint = Some(url);
        self
    }

    /// Bound each network operation. For payload downloads this is an idle
    /// timeout between body chunks rather than a cap on the whole transfer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the source.
    pub fn build(self) -> Result<HttpReleaseSource> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| UpdaterError::config("manifest endpoint is required"))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = match self.client {
            Some(client) => client,
            None => http_client(timeout)?,
        };

        Ok(HttpReleaseSource {
            endpoint,
            timeout,
            client,
        })
    }
}

/// Plain HTTP(S) release source: GET for the manifest, GET for the payload.
#[derive(Clone)]
pub struct HttpReleaseSource {
    endpoint: Url,
    timeout: Duration,
    client: Client,
}

impl HttpReleaseSource {
    /// Create a new builder.
    pub fn builder() -> HttpReleaseSourceBuilder {
        HttpReleaseSourceBuilder::default()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        let url = self.endpoint.as_str();
        tracing::info!(endpoint = url, "fetching update manifest");

        let response = self
            .client
            .get(self.endpoint.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| UpdaterError::network(url, err))?;
        require_ok(url, response.status())?;

        let body = response
            .bytes()
            .await
            .map_err(|err| UpdaterError::network(url, err))?;
        UpdateManifest::from_slice(&body)
    }

    async fn fetch_payload(&self, location: &Url, destination: &Path) -> Result<u64> {
        let url = location.as_str();
        tracing::info!(link = url, destination = ?destination, "downloading payload");

        let response = tokio::time::timeout(self.timeout, self.client.get(location.clone()).send())
            .await
            .map_err(|_| UpdaterError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            })?
            .map_err(|err| UpdaterError::network(url, err))?;
        require_ok(url, response.status())?;

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|err| UpdaterError::io(destination, err))?;
        let mut body = Box::pin(response.bytes_stream());
        let mut written = 0u64;

        loop {
            let next = tokio::time::timeout(self.timeout, body.next())
                .await
                .map_err(|_| UpdaterError::Timeout {
                    url: url.to_string(),
                    after: self.timeout,
                })?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|err| UpdaterError::network(url, err))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| UpdaterError::io(destination, err))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|err| UpdaterError::io(destination, err))?;
        file.sync_all()
            .await
            .map_err(|err| UpdaterError::io(destination, err))?;

        tracing::debug!(bytes = written, "payload download complete");
        Ok(written)
    }
}

/// Client shared by the HTTP collaborators of this crate.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| UpdaterError::config(format!("failed to build HTTP client: {err}")))
}

pub(crate) fn require_ok(url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(UpdaterError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}
