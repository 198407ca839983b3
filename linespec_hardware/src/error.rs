use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("vendor call failed with status {code}: {message}")]
    Vendor { code: u32, message: &'static str },
    #[error("transport timeout")]
    Timeout,
    #[error("capture did not complete before its deadline")]
    CaptureTimeout,
    #[error("capture aborted")]
    Aborted,
    #[error("device not connected")]
    NotConnected,
    #[error("no device with serial number {0}")]
    DeviceNotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Build a `Vendor` error from a raw status code.
    pub fn from_status(code: u32) -> Self {
        Self::Vendor {
            code,
            message: describe_status(code),
        }
    }
}

/// Human-readable meaning of a vendor status code.
pub fn describe_status(code: u32) -> &'static str {
    match code {
        0 => "success",
        1 => "unknown error",
        2 => "initialization not done",
        3 => "illegal parameter",
        4 => "device connection failed",
        5 => "device disconnection failed",
        6 => "data send failed",
        7 => "data receive failed",
        8 => "stop receiving data failed",
        9 => "close failed",
        10 => "memory allocation failed",
        11 => "data capture failed",
        12 => "timeout",
        20 => "write protected",
        21 => "illegal access",
        22 => "illegal address",
        23 => "illegal value",
        _ => "unrecognized status",
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_covers_gaps() {
        assert_eq!(describe_status(12), "timeout");
        assert_eq!(describe_status(13), "unrecognized status");
        let e = TransportError::from_status(11);
        assert_eq!(
            e.to_string(),
            "vendor call failed with status 11: data capture failed"
        );
    }
}
