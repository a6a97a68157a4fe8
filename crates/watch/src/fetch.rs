use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use vigil_store::Fingerprint;

/// Browser-like identity. Plain `reqwest/x.y` user-agents get rejected by
/// trivial bot-blockers on sites people most want to watch.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("server returned HTTP {0}")]
    Http(u16),
    #[error("site unreachable: {0}")]
    Unreachable(String),
}

/// Seam between the scheduler/manager and the network. Tests plug in stub
/// fetchers; production uses [`HttpFetcher`].
#[async_trait]
pub trait FetchFingerprint: Send + Sync {
    /// GET `url` and digest the exact response bytes. No internal retry;
    /// retry policy belongs to the caller (the scheduler simply tries again
    /// next cycle).
    async fn fetch(&self, url: &str) -> Result<Fingerprint, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn map_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl FetchFingerprint for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Fingerprint, FetchError> {
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }
        let body = response.bytes().await.map_err(map_transport)?;
        Ok(Fingerprint::digest(&body))
    }
}
