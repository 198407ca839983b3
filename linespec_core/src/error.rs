use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timeout waiting for device")]
    Timeout,
    #[error("data integrity: {0}")]
    DataIntegrity(String),
    #[error("communication lost: {0}")]
    CommunicationLoss(String),
    #[error("invalid state: {0}")]
    State(String),
}

impl SpecError {
    /// True for errors that the recovery ladder can address.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// Why a measurement ended before collecting every requested cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A cycle reached the saturation limit while saturation aborts are enabled.
    Saturation,
    /// A cycle contained NaN or negative counts.
    InvalidData,
    /// The caller aborted.
    Cancelled,
}

impl core::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Saturation => "saturation",
            Self::InvalidData => "invalid data",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transport")]
    MissingTransport,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, SpecError>;
pub use eyre::Report;
