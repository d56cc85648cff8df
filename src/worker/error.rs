//! Error type for the Worker.

use thiserror::Error;

use crate::fetcher::FetcherError;
use crate::queue::QueueError;
use crate::store::StoreError;
use crate::vpn::VpnError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),

    #[error("vpn error: {0}")]
    Vpn(#[from] VpnError),

    #[error("invalid catalog root: {0}")]
    InvalidCatalogRoot(#[from] url::ParseError),
}
