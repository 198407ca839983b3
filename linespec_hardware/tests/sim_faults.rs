use std::time::Duration;

use linespec_hardware::{SimConfig, SimulatedTransport};
use linespec_traits::{CaptureState, Register, Transport};
use rstest::rstest;

fn opened(pixels: usize) -> SimulatedTransport {
    let t = SimulatedTransport::new(SimConfig {
        pixel_count: pixels,
        noise: 0,
        readout_overhead: Duration::ZERO,
        ..SimConfig::default()
    });
    t.initialize().unwrap();
    t.open(0).unwrap();
    t.set_register(Register::LineTime, 4500).unwrap();
    t.set_register(Register::StartPulseTime, 200).unwrap();
    t
}

fn capture(t: &SimulatedTransport, cycles: usize) -> Vec<u16> {
    t.start_capture(cycles).unwrap();
    loop {
        match t.poll_capture().unwrap() {
            CaptureState::Busy => std::thread::sleep(Duration::from_micros(100)),
            CaptureState::Ready => break,
            CaptureState::Failed => panic!("capture failed"),
        }
    }
    let mut buf = Vec::new();
    t.read_capture(&mut buf).unwrap();
    buf
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn failing_captures_are_consumed_one_per_call(#[case] n: usize) {
    let t = opened(8);
    t.with_faults(|f| f.fail_next_captures = n);
    for _ in 0..n {
        assert!(t.start_capture(1).is_err());
    }
    assert!(t.start_capture(1).is_ok());
    assert_eq!(t.counters().captures_started, n + 1);
}

#[test]
fn saturating_cycle_reads_full_scale() {
    let t = opened(8);
    t.with_faults(|f| f.saturate_at_cycle = Some(2));
    let buf = capture(&t, 3);
    assert!(buf[..8].iter().all(|&v| v < u16::MAX));
    assert!(buf[8..16].iter().all(|&v| v == u16::MAX));
    assert!(buf[16..].iter().all(|&v| v < u16::MAX));
}

#[test]
fn unresponsive_device_times_out_until_reset() {
    let t = opened(8);
    t.with_faults(|f| f.unresponsive = true);
    let err = t.start_capture(1).unwrap_err();
    assert!(err.to_string().contains("timeout"));
    assert!(t.abort().is_err());
    t.reset().unwrap();
    assert!(t.start_capture(1).is_ok());
}

#[test]
fn drift_is_added_per_cycle() {
    let t = opened(4);
    t.with_faults(|f| f.drift_per_cycle = 10.0);
    let buf = capture(&t, 2);
    assert_eq!(i32::from(buf[4]) - i32::from(buf[0]), 10);
}

#[test]
fn register_writes_are_logged_in_order() {
    let t = opened(4);
    t.set_register(Register::DataTimeoutMs, 4000).unwrap();
    let log = t.register_writes();
    assert_eq!(
        log,
        vec![
            (Register::LineTime, 4500),
            (Register::StartPulseTime, 200),
            (Register::DataTimeoutMs, 4000)
        ]
    );
}

#[test]
fn register_reads_return_the_latest_write() {
    let t = opened(4);
    for v in [100, 200, 300] {
        t.set_register(Register::DataTimeoutMs, v).unwrap();
    }
    t.set_register(Register::StartPulseTime, 23_952).unwrap();
    assert_eq!(t.get_register(Register::DataTimeoutMs).unwrap(), 300);
    assert_eq!(t.get_register(Register::StartPulseTime).unwrap(), 23_952);
    assert_eq!(t.get_register(Register::LineTime).unwrap(), 4500);
    assert!(t.get_register(Register::AdcOffset).is_err());
    // the write log keeps every write
    assert_eq!(t.register_writes().len(), 6);
}
