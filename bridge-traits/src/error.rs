use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    #[error("Media surface error: {0}")]
    MediaError(String),

    #[error("Append rejected: platform buffer quota exceeded")]
    QuotaExceeded,

    #[error("Playback start rejected by platform autoplay policy")]
    AutoplayBlocked,

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the platform refused data for capacity reasons
    /// rather than because the data was malformed.
    pub fn is_quota(&self) -> bool {
        matches!(self, BridgeError::QuotaExceeded)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
