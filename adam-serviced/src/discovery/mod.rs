pub mod announce;
pub mod beacon;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to open broadcast socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to resolve a routable address: {0}")]
    Resolve(#[source] std::io::Error),

    #[error("failed to send announcement: {0}")]
    Send(#[source] std::io::Error),

    #[error("failed to encode announcement: {0}")]
    Encode(#[from] serde_json::Error),
}
