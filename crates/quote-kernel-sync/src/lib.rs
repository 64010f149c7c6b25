//! Remote exchange for the quote kernel: best-effort pull/push over HTTP and the
//! periodic scheduler that drives inbound sync.

pub mod remote;
pub mod scheduler;

pub use remote::{
    HttpRemote, PullOutcome, PushOutcome, QuoteRemote, RemoteConfig, SyncError,
    DEFAULT_BATCH_SIZE, DEFAULT_REMOTE_ENDPOINT, DEFAULT_TIMEOUT_SECS,
};
pub use scheduler::{SyncScheduler, DEFAULT_SYNC_INTERVAL_SECS};
