// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Search of the delay settings at which an AWG core decodes the codewords
//! correctly.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Context;

use crate::analyzer::{TraceAnalysis, analyze_trace};
use crate::delay::set_delay;
use crate::device::{AwgIndex, DioDevice, TraceNode};
use crate::observer::{CalibrationEvent, CalibrationObserver};
use crate::protocol::ProtocolDescriptor;
use crate::retry::{Retry, retry_bounded};
use crate::sequence::{SequenceCheck, check_cyclic_sequence};
use crate::settings::CalibrationSettings;
use crate::{Codeword, Delay, Error, Result};

/// Classification of one delay setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayVerdict {
    Valid,
    /// No codeword was decoded, even after retrying the capture.
    NoCodewords,
    /// Trace positions where data changed at a sample point.
    TimingViolations(Vec<usize>),
    /// The decoded codewords do not follow the expected sequence.
    SequenceMismatch(SequenceCheck),
}

impl DelayVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, DelayVerdict::Valid)
    }
}

impl fmt::Display for DelayVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayVerdict::Valid => write!(f, "valid"),
            DelayVerdict::NoCodewords => write!(f, "no codewords detected"),
            DelayVerdict::TimingViolations(positions) => {
                write!(f, "{} timing violation(s) detected", positions.len())
            }
            DelayVerdict::SequenceMismatch(check) => write!(f, "{check}"),
        }
    }
}

/// Verdicts of all delay settings of one AWG core, in ascending delay order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayScan {
    pub awg: AwgIndex,
    pub verdicts: Vec<(Delay, DelayVerdict)>,
}

impl DelayScan {
    pub fn valid_delays(&self) -> BTreeSet<Delay> {
        self.verdicts
            .iter()
            .filter(|(_, verdict)| verdict.is_valid())
            .map(|(delay, _)| *delay)
            .collect()
    }
}

/// Classify a decoded trace against the expected cyclic codeword sequence.
pub fn classify(
    analysis: &TraceAnalysis,
    protocol: &ProtocolDescriptor,
    expected: &[Codeword],
) -> DelayVerdict {
    if protocol.codeword_mask != 0 && analysis.codewords.is_empty() {
        return DelayVerdict::NoCodewords;
    }
    if analysis.has_timing_violations() {
        return DelayVerdict::TimingViolations(analysis.timing_violations.clone());
    }
    match check_cyclic_sequence(&analysis.codewords, expected) {
        SequenceCheck::Match => DelayVerdict::Valid,
        mismatch => DelayVerdict::SequenceMismatch(mismatch),
    }
}

/// Capture and decode the DIO input of an AWG core, retrying captures that
/// decode to no codewords at all.
fn capture_codewords<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
    observer: &mut dyn CalibrationObserver,
    awg: AwgIndex,
    delay: Delay,
    protocol: &ProtocolDescriptor,
) -> Result<TraceAnalysis> {
    let outcome = retry_bounded(
        settings.capture_retries,
        |attempt| -> Result<TraceAnalysis> {
            if attempt > 0 {
                observer.notify(&CalibrationEvent::NoCodewordsRetry {
                    awg,
                    delay,
                    attempt,
                });
            }
            let trace = device
                .get_vector(TraceNode::AwgDio(awg))
                .with_context(|| format!("Failed to capture DIO data of AWG {awg}"))?;
            Ok(analyze_trace(&trace, protocol))
        },
        |analysis| protocol.codeword_mask == 0 || !analysis.codewords.is_empty(),
    )?;
    if let Retry::Exhausted { attempts, .. } = &outcome {
        log::debug!("AWG {awg}: no codewords at delay {delay} after {attempts} captures");
    }
    Ok(outcome.into_value())
}

/// Test every delay setting from 0 to the maximum on an AWG core.
///
/// The search is exhaustive; no monotonic structure of the valid settings
/// is assumed.
pub fn scan_delays<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
    observer: &mut dyn CalibrationObserver,
    awg: AwgIndex,
    protocol: &ProtocolDescriptor,
    expected: &[Codeword],
) -> Result<DelayScan> {
    observer.notify(&CalibrationEvent::SearchStarted {
        awg,
        protocol: *protocol,
    });
    let mut verdicts = Vec::with_capacity(usize::from(settings.max_delay) + 1);
    for delay in 0..=settings.max_delay {
        observer.notify(&CalibrationEvent::TestingDelay { awg, delay });
        set_delay(
            device,
            settings,
            awg,
            protocol.strobe_mask(),
            protocol.data_mask(),
            delay.into(),
        )?;
        let analysis = capture_codewords(device, settings, observer, awg, delay, protocol)?;
        let verdict = classify(&analysis, protocol, expected);
        if !verdict.is_valid() {
            observer.notify(&CalibrationEvent::DelayRejected {
                awg,
                delay,
                verdict: verdict.clone(),
            });
        }
        verdicts.push((delay, verdict));
    }
    Ok(DelayScan { awg, verdicts })
}

/// Find the delay settings at which an AWG core decodes `expected` without
/// timing violations.
///
/// The protocol configuration is read from the instrument.
pub fn find_valid_delays<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
    observer: &mut dyn CalibrationObserver,
    awg: AwgIndex,
    expected: &[Codeword],
) -> Result<BTreeSet<Delay>> {
    if awg >= device.awg_count() {
        return Err(Error::new(format!(
            "AWG {awg} does not exist, the instrument has {} AWG cores",
            device.awg_count()
        )));
    }
    let protocol = ProtocolDescriptor::read(device, awg)?;
    let delays = scan_delays(device, settings, observer, awg, &protocol, expected)?.valid_delays();
    observer.notify(&CalibrationEvent::ValidDelaysFound {
        awg,
        delays: delays.clone(),
    });
    Ok(delays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::protocol::{StrobeSlope, ValidPolarity};
    use crate::sim::SimulatedDevice;

    fn protocol() -> ProtocolDescriptor {
        ProtocolDescriptor {
            strobe_index: 30,
            strobe_slope: StrobeSlope::Both,
            valid_index: 31,
            valid_polarity: ValidPolarity::ActiveHigh,
            codeword_mask: 7,
            codeword_shift: 0,
        }
    }

    fn analysis(codewords: Vec<u32>, timing_violations: Vec<usize>) -> TraceAnalysis {
        TraceAnalysis {
            codewords,
            timing_violations,
        }
    }

    #[test]
    fn test_classify() {
        let expected = [1, 2, 3];
        let p = protocol();
        assert_eq!(
            classify(&analysis(vec![2, 3, 1, 2, 3], vec![]), &p, &expected),
            DelayVerdict::Valid
        );
        assert!(matches!(
            classify(&analysis(vec![2, 3, 2], vec![]), &p, &expected),
            DelayVerdict::SequenceMismatch(SequenceCheck::Mismatch { position: 2, .. })
        ));
        assert_eq!(
            classify(&analysis(vec![1, 2], vec![7]), &p, &expected),
            DelayVerdict::TimingViolations(vec![7])
        );
        assert_eq!(
            classify(&analysis(vec![], vec![]), &p, &expected),
            DelayVerdict::NoCodewords
        );
    }

    #[test]
    fn test_classify_without_codeword_bits() {
        let p = ProtocolDescriptor {
            codeword_mask: 0,
            ..protocol()
        };
        assert_eq!(
            classify(&analysis(vec![], vec![]), &p, &[1, 2, 3]),
            DelayVerdict::Valid
        );
    }

    #[test]
    fn test_all_delays_valid_without_skew() {
        let mut device = SimulatedDevice::new(1);
        let mut observer = RecordingObserver::default();
        let settings = CalibrationSettings::default();
        let delays = find_valid_delays(
            &mut device,
            &settings,
            &mut observer,
            0,
            &[1, 2, 3, 4, 5, 6, 7],
        )
        .unwrap();
        assert_eq!(delays, BTreeSet::from_iter(0..=6));
        assert!(matches!(
            observer.events.last(),
            Some(CalibrationEvent::ValidDelaysFound { awg: 0, .. })
        ));
    }

    #[test]
    fn test_strobe_skew_excludes_coinciding_delay() {
        // Strobe edges 4 samples after the data change; a strobe skew of 3
        // moves them onto the next data change at delay 4 (strobe side 1).
        let mut device = SimulatedDevice::new(1).with_strobe_skew(0, 3);
        let mut observer = RecordingObserver::default();
        let settings = CalibrationSettings::default();
        let scan = scan_delays(
            &mut device,
            &settings,
            &mut observer,
            0,
            &protocol(),
            &[1, 2, 3, 4, 5, 6, 7],
        )
        .unwrap();
        assert_eq!(scan.valid_delays(), BTreeSet::from([0, 1, 2, 3, 5, 6]));
        assert!(matches!(
            scan.verdicts[4].1,
            DelayVerdict::TimingViolations(_)
        ));
        assert!(observer.events.iter().any(|e| matches!(
            e,
            CalibrationEvent::DelayRejected { delay: 4, .. }
        )));
    }

    #[test]
    fn test_wrong_expected_sequence() {
        let mut device = SimulatedDevice::new(1);
        let mut observer = RecordingObserver::default();
        let settings = CalibrationSettings::default();
        let delays =
            find_valid_delays(&mut device, &settings, &mut observer, 0, &[1, 3, 2]).unwrap();
        assert!(delays.is_empty());
    }

    #[test]
    fn test_capture_miss_is_retried() {
        let mut device = SimulatedDevice::new(1).with_capture_misses(3);
        let mut observer = RecordingObserver::default();
        let settings = CalibrationSettings::default();
        let delays = find_valid_delays(
            &mut device,
            &settings,
            &mut observer,
            0,
            &[1, 2, 3, 4, 5, 6, 7],
        )
        .unwrap();
        assert!(delays.contains(&0));
        let retries = observer
            .events
            .iter()
            .filter(|e| matches!(e, CalibrationEvent::NoCodewordsRetry { delay: 0, .. }))
            .count();
        assert_eq!(retries, 3);
    }

    #[test]
    fn test_persistent_capture_miss_excludes_delay() {
        // Delay 0 exhausts one capture plus five retries, delay 1 sees one
        // more miss and then recovers.
        let mut device = SimulatedDevice::new(1).with_capture_misses(7);
        let mut observer = RecordingObserver::default();
        let settings = CalibrationSettings::default();
        let scan = scan_delays(
            &mut device,
            &settings,
            &mut observer,
            0,
            &protocol(),
            &[1, 2, 3, 4, 5, 6, 7],
        )
        .unwrap();
        assert_eq!(scan.verdicts[0].1, DelayVerdict::NoCodewords);
        assert_eq!(scan.verdicts[1].1, DelayVerdict::Valid);
    }

    #[test]
    fn test_unknown_awg() {
        let mut device = SimulatedDevice::new(1);
        let mut observer = RecordingObserver::default();
        let settings = CalibrationSettings::default();
        assert!(find_valid_delays(&mut device, &settings, &mut observer, 3, &[1]).is_err());
    }
}
