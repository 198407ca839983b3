//! Maps `Box<dyn Error>` from the transport boundary to typed `SpecError`.
//!
//! `linespec_traits::Transport` returns boxed errors; this module converts
//! them to our typed enum, with an optional feature-gated path for
//! `linespec_hardware::TransportError` downcasting.

use crate::error::SpecError;

/// Map a transport-boundary error to a typed `SpecError`.
///
/// Attempts to downcast known transport error types first, then falls back
/// to string-based heuristics.
pub fn map_transport_error(e: &(dyn std::error::Error + 'static)) -> SpecError {
    #[cfg(feature = "hardware-errors")]
    {
        use linespec_hardware::error::TransportError;
        if let Some(te) = e.downcast_ref::<TransportError>() {
            return match te {
                TransportError::Timeout | TransportError::CaptureTimeout => SpecError::Timeout,
                TransportError::Vendor { code: 12, .. } => SpecError::Timeout,
                TransportError::NotConnected => {
                    SpecError::CommunicationLoss(te.to_string())
                }
                TransportError::DeviceNotFound(_) => SpecError::Config(te.to_string()),
                other => SpecError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") {
        SpecError::Timeout
    } else if lower.contains("not connected") || lower.contains("disconnected") {
        SpecError::CommunicationLoss(s)
    } else {
        SpecError::Transport(s)
    }
}

/// Convenience for `map_err` on boxed transport results.
pub(crate) fn map_boxed(e: linespec_traits::BoxError) -> SpecError {
    map_transport_error(&*e)
}
