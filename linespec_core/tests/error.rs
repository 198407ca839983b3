use linespec_core::hw_error::map_transport_error;
use linespec_core::{SpecError, TerminationReason};
use linespec_hardware::error::TransportError;
use rstest::rstest;

fn map(e: TransportError) -> SpecError {
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
    map_transport_error(&*boxed)
}

#[rstest]
#[case::timeout(TransportError::Timeout, SpecError::Timeout)]
#[case::capture_timeout(TransportError::CaptureTimeout, SpecError::Timeout)]
#[case::vendor_timeout(TransportError::from_status(12), SpecError::Timeout)]
fn timeouts_map_to_timeout(#[case] e: TransportError, #[case] expected: SpecError) {
    assert_eq!(map(e), expected);
}

#[test]
fn typed_transport_errors_map_by_variant() {
    assert!(matches!(
        map(TransportError::NotConnected),
        SpecError::CommunicationLoss(_)
    ));
    assert!(matches!(
        map(TransportError::DeviceNotFound("X1".into())),
        SpecError::Config(ref m) if m.contains("X1")
    ));
    match map(TransportError::from_status(11)) {
        SpecError::Transport(m) => assert!(m.contains("status 11"), "{m}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[rstest]
#[case("usb read timeout", SpecError::Timeout)]
#[case("device disconnected", SpecError::CommunicationLoss("device disconnected".into()))]
#[case("checksum mismatch", SpecError::Transport("checksum mismatch".into()))]
fn foreign_errors_fall_back_to_message_heuristics(#[case] msg: &str, #[case] expected: SpecError) {
    let e = std::io::Error::other(msg.to_string());
    assert_eq!(map_transport_error(&e), expected);
}

#[test]
fn only_transport_and_timeout_are_recoverable() {
    assert!(SpecError::Timeout.is_recoverable());
    assert!(SpecError::Transport("x".into()).is_recoverable());
    assert!(!SpecError::Config("x".into()).is_recoverable());
    assert!(!SpecError::CommunicationLoss("x".into()).is_recoverable());
    assert!(!SpecError::State("x".into()).is_recoverable());
}

#[test]
fn termination_reasons_display_plainly() {
    assert_eq!(TerminationReason::Saturation.to_string(), "saturation");
    assert_eq!(TerminationReason::InvalidData.to_string(), "invalid data");
    assert_eq!(TerminationReason::Cancelled.to_string(), "cancelled");
}
