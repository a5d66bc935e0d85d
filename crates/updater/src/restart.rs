use crate::error::{Result, UpdaterError};
use crate::fetcher::{http_client, require_ok};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use std::time::Duration;

/// Control endpoint used when none is configured.
pub const DEFAULT_RESTART_URL: &str = "http://localhost:55001/api/service/shutdown";

/// Tells the running service that a new binary is in place.
#[async_trait]
pub trait RestartSignaler: Send + Sync {
    async fn signal_restart(&self) -> Result<()>;
}

/// POSTs a plain `ack` to the service's shutdown endpoint. The supervisor is
/// expected to relaunch the service from the updated binary.
#[derive(Clone)]
pub struct HttpRestartSignaler {
    url: Url,
    timeout: Duration,
    client: Client,
}

impl HttpRestartSignaler {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url,
            timeout,
            client: http_client(timeout)?,
        })
    }

    pub fn with_client(url: Url, timeout: Duration, client: Client) -> Self {
        Self {
            url,
            timeout,
            client,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RestartSignaler for HttpRestartSignaler {
    async fn signal_restart(&self) -> Result<()> {
        let url = self.url.as_str();
        tracing::info!(endpoint = url, "signaling service restart");

        let response = self
            .client
            .post(self.url.clone())
            .header(header::CONTENT_TYPE, "text/plain")
            .body("ack")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| UpdaterError::network(url, err))?;
        require_ok(url, response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_parses() {
        let url = Url::parse(DEFAULT_RESTART_URL).unwrap();
        assert_eq!(url.port(), Some(55001));
        assert_eq!(url.path(), "/api/service/shutdown");
    }
}
