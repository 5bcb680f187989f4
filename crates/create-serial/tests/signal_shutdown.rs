//! Termination signals close the link without ending the process.
//!
//! These tests signal the whole test process, so they live in their own
//! binary and run one at a time.

#![cfg(unix)]

mod common;

use common::*;
use create_serial::{
    DisconnectReason, DriverConfig, SerialDriver, SignalKind, WaitOutcome, DEFAULT_BAUD_RATE,
};
use serial_test::serial;
use std::process::Command;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(5);

fn signal_self(name: &str) {
    let status = Command::new("kill")
        .arg(format!("-{name}"))
        .arg(std::process::id().to_string())
        .status()
        .expect("run kill");
    assert!(status.success());
}

fn signal_config() -> DriverConfig {
    DriverConfig {
        install_signal_handler: true,
        stop_sequence: vec![128, 173],
        // Slow enough that the reactor is still draining its read when the
        // link is already reported closed.
        read_poll_interval_ms: 200,
        ..fast_config()
    }
}

#[test]
#[serial]
fn test_sigterm_disconnects_and_process_survives() {
    init_tracing();
    let device = FakeDevice::new();
    let driver =
        SerialDriver::with_opener(HeaderDecoder::new(), device.opener(), signal_config()).unwrap();
    driver.connect(FAKE_PORT, DEFAULT_BAUD_RATE).unwrap();
    let notifier = driver.notifier();
    let waiter = std::thread::spawn(move || notifier.wait());

    signal_self("TERM");

    assert!(wait_until(SETTLE, || !driver.connected()));
    assert_eq!(
        driver.last_disconnect(),
        Some(DisconnectReason::Signal(SignalKind::Terminate))
    );
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Disconnected);

    // A later disconnect returns only once the reactor has released the
    // device, and does not repeat the teardown.
    driver.disconnect();
    assert_eq!(device.halves_alive(), 0);
    assert_eq!(device.written(), vec![128, 173]);
    assert_eq!(
        driver.last_disconnect(),
        Some(DisconnectReason::Signal(SignalKind::Terminate))
    );
    driver.connect(FAKE_PORT, DEFAULT_BAUD_RATE).unwrap();
    device.feed(&[0x13, 0x01]);
    assert_eq!(driver.wait_for_data_timeout(SETTLE), WaitOutcome::Ready);
}

#[test]
#[serial]
fn test_sigint_disconnects() {
    init_tracing();
    let (driver, device) = {
        let device = FakeDevice::new();
        let driver =
            SerialDriver::with_opener(HeaderDecoder::new(), device.opener(), signal_config())
                .unwrap();
        driver.connect(FAKE_PORT, DEFAULT_BAUD_RATE).unwrap();
        (driver, device)
    };

    signal_self("INT");

    assert!(wait_until(SETTLE, || !driver.connected()));
    assert_eq!(
        driver.last_disconnect(),
        Some(DisconnectReason::Signal(SignalKind::Interrupt))
    );
    drop(driver);
    assert_eq!(device.halves_alive(), 0);
}

#[test]
#[serial]
fn test_signal_while_disconnected_is_ignored() {
    init_tracing();
    let device = FakeDevice::new();
    let driver =
        SerialDriver::with_opener(HeaderDecoder::new(), device.opener(), signal_config()).unwrap();

    // Delivered while no connection is up; must not close the next one.
    signal_self("TERM");
    std::thread::sleep(Duration::from_millis(50));

    driver.connect(FAKE_PORT, DEFAULT_BAUD_RATE).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(driver.connected());
    assert!(driver.last_disconnect().is_none());
}
