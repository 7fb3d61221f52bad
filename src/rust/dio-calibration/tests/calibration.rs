// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use dio_calibration::observer::{CalibrationEvent, RecordingObserver};
use dio_calibration::protocol::configure_codeword_protocol;
use dio_calibration::sim::{SimulatedBus, SimulatedDevice};
use dio_calibration::{
    CalibrationOutcome, CalibrationSettings, Calibrator, Codeword, CodewordProtocol, DioDevice,
    Register, calibrate_dio_protocol,
};

fn sequence() -> Vec<Codeword> {
    (1..=7).collect()
}

/// Calibrates with default settings, returning the outcome and the events.
fn calibrate(
    device: &mut SimulatedDevice,
    awgs_and_sequences: &[(usize, Vec<Codeword>)],
) -> (CalibrationOutcome, Vec<CalibrationEvent>) {
    let mut calibrator = Calibrator::new(device, CalibrationSettings::default())
        .with_observer(RecordingObserver::default());
    let outcome = calibrator.calibrate(awgs_and_sequences).unwrap();
    (outcome, calibrator.observer().events.clone())
}

#[test]
fn test_largest_common_delay_is_applied() {
    // A strobe skewed by s samples collides with the data at delay 7 - s.
    let mut device = SimulatedDevice::new(2)
        .with_strobe_skew(0, 3)
        .with_strobe_skew(1, 1);
    let (outcome, events) = calibrate(&mut device, &[(0, sequence()), (1, sequence())]);
    assert_eq!(
        outcome,
        CalibrationOutcome::Calibrated {
            delay: 5,
            valid_delays: BTreeSet::from([0, 1, 2, 3, 5]),
        }
    );
    for awg in 0..2 {
        let line = device.delay_line(awg);
        assert_eq!(line[30], 2);
        assert_eq!(line[0], 0);
        assert_eq!(line[31], 0);
    }
    assert!(events.contains(&CalibrationEvent::ValidDelaysFound {
        awg: 1,
        delays: BTreeSet::from([0, 1, 2, 3, 4, 5]),
    }));
    assert!(events.contains(&CalibrationEvent::ApplyingDelay { awg: 0, delay: 5 }));
}

#[test]
fn test_no_common_delay() {
    // A skewed codeword bit mixes neighbouring codewords on one side of the
    // collision, so each AWG only accepts one half of the range.
    let mut device = SimulatedDevice::new(2)
        .with_bit_skew(0, 0, -4)
        .with_bit_skew(1, 0, 4);
    let (outcome, events) = calibrate(&mut device, &[(0, sequence()), (1, sequence())]);
    let CalibrationOutcome::NoCommonDelay { per_awg } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(per_awg[&0], BTreeSet::from([0, 1, 2]));
    assert_eq!(per_awg[&1], BTreeSet::from([4, 5, 6]));
    assert_eq!(events.last(), Some(&CalibrationEvent::NoCommonDelay));
}

#[test]
fn test_no_valid_delays() {
    let mut device = SimulatedDevice::new(2);
    let (outcome, events) = calibrate(&mut device, &[(0, sequence()), (1, vec![1, 3, 5])]);
    assert_eq!(outcome, CalibrationOutcome::NoValidDelays { awg: 1 });
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, CalibrationEvent::ApplyingDelay { .. }))
    );
}

#[test]
fn test_asymmetric_strobe_aborts() {
    let mut device = SimulatedDevice::new(4).with_strobe_glitch(usize::MAX);
    let (outcome, events) = calibrate(&mut device, &[(0, sequence())]);
    assert_eq!(outcome, CalibrationOutcome::AsymmetricStrobe);
    assert_eq!(device.resyncs(), 5);
    assert_eq!(device.switches_while_running(), 0);
    for awg in 0..4 {
        assert_eq!(device.get_integer(Register::Enable, awg).unwrap(), 1);
    }
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, CalibrationEvent::TestingDelay { .. }))
    );
}

#[test]
fn test_recovers_from_strobe_glitch() {
    let mut device = SimulatedDevice::new(2).with_strobe_glitch(3);
    let (outcome, _) = calibrate(&mut device, &[(0, sequence()), (1, sequence())]);
    assert!(outcome.is_success());
    assert_eq!(device.resyncs(), 3);
    assert_eq!(device.switches_while_running(), 0);
}

#[test]
fn test_transient_capture_misses() {
    let mut device = SimulatedDevice::new(1).with_capture_misses(4);
    let (outcome, events) = calibrate(&mut device, &[(0, sequence())]);
    assert_eq!(
        outcome,
        CalibrationOutcome::Calibrated {
            delay: 6,
            valid_delays: (0..=6).collect(),
        }
    );
    let retries = events
        .iter()
        .filter(|e| matches!(e, CalibrationEvent::NoCodewordsRetry { .. }))
        .count();
    assert_eq!(retries, 4);
}

#[test]
fn test_shifted_codewords() {
    let bus = SimulatedBus {
        codeword_shift: 9,
        sequence: vec![3, 1, 2, 0],
        ..Default::default()
    };
    let mut device = SimulatedDevice::with_bus(1, bus).with_strobe_skew(0, 1);
    let (outcome, _) = calibrate(&mut device, &[(0, vec![3, 1, 2, 0])]);
    assert_eq!(
        outcome,
        CalibrationOutcome::Calibrated {
            delay: 5,
            valid_delays: (0..=5).collect(),
        }
    );
    assert_eq!(device.delay_line(0)[9], 0);
    assert_eq!(device.delay_line(0)[30], 2);
}

#[test]
fn test_configured_protocol_calibrates() {
    let mut device = SimulatedDevice::new(4);
    configure_codeword_protocol(&mut device, CodewordProtocol::Identical, 8).unwrap();
    let awgs_and_sequences: Vec<_> = (0..4).map(|awg| (awg, sequence())).collect();
    assert!(calibrate_dio_protocol(&mut device, &awgs_and_sequences, true).unwrap());
    assert_eq!(device.get_integer(Register::DioMaskValue, 3).unwrap(), 7);
}

#[test]
fn test_device_failure_is_an_error() {
    let mut device = SimulatedDevice::new(1);
    device.set_integer(Register::DioStrobeSlope, 0, 9).unwrap();
    let mut calibrator = Calibrator::new(&mut device, CalibrationSettings::default());
    assert!(calibrator.calibrate(&[(0, sequence())]).is_err());
}

#[test]
fn test_loaded_settings_are_sanitized() {
    // A zero capture requirement must not skip the strobe symmetry check.
    let settings =
        CalibrationSettings::from_json(r#"{"symmetric_captures_required": 0}"#).unwrap();
    let mut device = SimulatedDevice::new(1).with_strobe_glitch(usize::MAX);
    let mut calibrator = Calibrator::new(&mut device, settings);
    let outcome = calibrator.calibrate(&[(0, sequence())]).unwrap();
    assert_eq!(outcome, CalibrationOutcome::AsymmetricStrobe);
    assert_eq!(device.resyncs(), 5);

    let settings = CalibrationSettings::from_json(r#"{"clock_settle_time_s": -1.0}"#).unwrap();
    let mut device = SimulatedDevice::new(1).with_strobe_glitch(1);
    let mut calibrator = Calibrator::new(&mut device, settings);
    assert!(calibrator.calibrate(&[(0, sequence())]).unwrap().is_success());
    assert_eq!(device.resyncs(), 1);
}
