use std::time::Duration;

use quote_kernel_core::Quote;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://jsonplaceholder.typicode.com/posts";
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Result of one inbound fetch. A failed fetch carries an empty batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullOutcome {
    pub quotes: Vec<Quote>,
    pub error: Option<String>,
}

impl PullOutcome {
    #[must_use]
    pub fn failed(error: &SyncError) -> Self {
        Self { quotes: Vec::new(), error: Some(error.to_string()) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushOutcome {
    pub delivered: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Remote side of the exchange. Implementations never fail: errors are folded
/// into the returned outcome.
pub trait QuoteRemote: Send + Sync {
    fn pull(&self) -> PullOutcome;

    fn push(&self, quote: &Quote) -> PushOutcome;
}

#[derive(Debug, Deserialize)]
struct RemoteItem {
    title: String,
}

#[derive(Debug, Clone)]
pub struct HttpRemote {
    agent: ureq::Agent,
    config: RemoteConfig,
}

impl HttpRemote {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build();
        Self { agent, config }
    }

    #[must_use]
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Fetch one batch of remote items mapped to server quotes.
    ///
    /// # Errors
    /// Returns [`SyncError`] on transport failure, non-2xx status, or a body that is
    /// not an array of objects with a string `title`.
    pub fn fetch_batch(&self) -> Result<Vec<Quote>, SyncError> {
        let response = self
            .agent
            .get(&self.config.endpoint)
            .query("_limit", &self.config.batch_size.to_string())
            .call()
            .map_err(map_ureq_error)?;

        let items: Vec<RemoteItem> =
            response.into_json().map_err(|err| SyncError::Payload(err.to_string()))?;

        Ok(items
            .into_iter()
            .take(self.config.batch_size)
            .filter(|item| !item.title.trim().is_empty())
            .map(|item| Quote::from_remote(&item.title))
            .collect())
    }

    /// Send one quote to the remote endpoint; the response body is not read.
    ///
    /// # Errors
    /// Returns [`SyncError`] on transport failure or non-2xx status.
    pub fn send(&self, quote: &Quote) -> Result<u16, SyncError> {
        let response =
            self.agent.post(&self.config.endpoint).send_json(quote).map_err(map_ureq_error)?;
        Ok(response.status())
    }
}

impl QuoteRemote for HttpRemote {
    fn pull(&self) -> PullOutcome {
        match self.fetch_batch() {
            Ok(quotes) => {
                tracing::debug!(endpoint = %self.config.endpoint, count = quotes.len(), "pulled remote quotes");
                PullOutcome { quotes, error: None }
            }
            Err(err) => {
                tracing::warn!(endpoint = %self.config.endpoint, error = %err, "error fetching quotes from server");
                PullOutcome::failed(&err)
            }
        }
    }

    fn push(&self, quote: &Quote) -> PushOutcome {
        match self.send(quote) {
            Ok(status) => {
                tracing::debug!(endpoint = %self.config.endpoint, status, "quote pushed to server");
                PushOutcome { delivered: true, status: Some(status), error: None }
            }
            Err(err) => {
                tracing::warn!(endpoint = %self.config.endpoint, error = %err, "error posting quote to server");
                let status = match err {
                    SyncError::Status(code) => Some(code),
                    _ => None,
                };
                PushOutcome { delivered: false, status, error: Some(err.to_string()) }
            }
        }
    }
}

fn map_ureq_error(err: ureq::Error) -> SyncError {
    match err {
        ureq::Error::Status(code, _) => SyncError::Status(code),
        ureq::Error::Transport(transport) => SyncError::Transport(transport.to_string()),
    }
}
