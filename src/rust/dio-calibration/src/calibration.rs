// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use dio_log::warn;
use indexmap::IndexMap;

use crate::clock::ensure_symmetric_strobe;
use crate::delay::set_delay;
use crate::device::{AwgIndex, DioDevice};
use crate::observer::{CalibrationEvent, CalibrationObserver, LogObserver};
use crate::protocol::ProtocolDescriptor;
use crate::search::scan_delays;
use crate::settings::CalibrationSettings;
use crate::{Codeword, Delay, Error, Result};

/// Result of a calibration run that reached the instrument without errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationOutcome {
    /// `delay` was applied to every AWG core.
    Calibrated {
        delay: Delay,
        valid_delays: BTreeSet<Delay>,
    },
    /// The strobe stayed asymmetric despite clock resynchronisation.
    AsymmetricStrobe,
    NoValidDelays { awg: AwgIndex },
    /// Every AWG core has valid delays, but none is shared by all of them.
    NoCommonDelay {
        per_awg: IndexMap<AwgIndex, BTreeSet<Delay>>,
    },
}

impl CalibrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CalibrationOutcome::Calibrated { .. })
    }
}

/// Delays valid on every AWG core.
pub fn common_delays<'a>(
    mut sets: impl Iterator<Item = &'a BTreeSet<Delay>>,
) -> BTreeSet<Delay> {
    let Some(first) = sets.next() else {
        return BTreeSet::new();
    };
    sets.fold(first.clone(), |common, set| {
        common.intersection(set).copied().collect()
    })
}

pub struct Calibrator<D: DioDevice, O: CalibrationObserver = LogObserver> {
    device: D,
    settings: CalibrationSettings,
    observer: O,
}

impl<D: DioDevice> Calibrator<D> {
    /// A calibrator logging its progress as diagnostics.
    ///
    /// Out-of-range settings are corrected, with a warning per change.
    pub fn new(device: D, mut settings: CalibrationSettings) -> Self {
        for msg in settings.sanitize() {
            warn!(
                "DIO calibration setting `{}` is sanitized from {} to {}. Reason: {}",
                msg.field,
                msg.original,
                msg.sanitized,
                msg.reason
            );
        }
        Calibrator {
            device,
            settings,
            observer: LogObserver::default(),
        }
    }
}

impl<D: DioDevice, O: CalibrationObserver> Calibrator<D, O> {
    pub fn with_observer<P: CalibrationObserver>(self, observer: P) -> Calibrator<D, P> {
        Calibrator {
            device: self.device,
            settings: self.settings,
            observer,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Find and apply the largest delay at which every AWG core decodes its
    /// expected codeword sequence.
    ///
    /// `awgs_and_sequences` pairs each AWG core with the codewords its
    /// sequencer program is driving, in cyclic order.
    pub fn calibrate(
        &mut self,
        awgs_and_sequences: &[(AwgIndex, Vec<Codeword>)],
    ) -> Result<CalibrationOutcome> {
        let Calibrator {
            device,
            settings,
            observer,
        } = self;
        let observer: &mut dyn CalibrationObserver = observer;
        observer.notify(&CalibrationEvent::CalibrationStarted);

        if awgs_and_sequences.is_empty() {
            return Err(Error::new("No AWG cores given for DIO calibration"));
        }
        for (awg, _) in awgs_and_sequences {
            if *awg >= device.awg_count() {
                return Err(Error::new(format!(
                    "AWG {awg} does not exist, the instrument has {} AWG cores",
                    device.awg_count()
                )));
            }
        }

        if !ensure_symmetric_strobe(device, settings, observer)? {
            return Ok(CalibrationOutcome::AsymmetricStrobe);
        }

        let mut protocols = IndexMap::new();
        let mut per_awg = IndexMap::new();
        for (awg, expected) in awgs_and_sequences {
            let protocol = ProtocolDescriptor::read(device, *awg)?;
            let delays =
                scan_delays(device, settings, observer, *awg, &protocol, expected)?.valid_delays();
            if delays.is_empty() {
                observer.notify(&CalibrationEvent::NoValidDelays { awg: *awg });
                return Ok(CalibrationOutcome::NoValidDelays { awg: *awg });
            }
            observer.notify(&CalibrationEvent::ValidDelaysFound {
                awg: *awg,
                delays: delays.clone(),
            });
            protocols.insert(*awg, protocol);
            per_awg.insert(*awg, delays);
        }

        let valid_delays = common_delays(per_awg.values());
        // Larger delays leave more margin for a late strobe.
        let Some(&delay) = valid_delays.last() else {
            observer.notify(&CalibrationEvent::NoCommonDelay);
            return Ok(CalibrationOutcome::NoCommonDelay { per_awg });
        };
        observer.notify(&CalibrationEvent::CommonDelays {
            delays: valid_delays.clone(),
        });

        for (&awg, protocol) in &protocols {
            observer.notify(&CalibrationEvent::ApplyingDelay { awg, delay });
            set_delay(
                device,
                settings,
                awg,
                protocol.strobe_mask(),
                protocol.data_mask(),
                delay.into(),
            )?;
        }
        Ok(CalibrationOutcome::Calibrated {
            delay,
            valid_delays,
        })
    }
}

/// Calibrate the DIO interface of `device` with default settings.
///
/// Returns whether a common delay was found and applied. `verbose` reports
/// the progress through the log instead of diagnostics only.
pub fn calibrate_dio_protocol<D: DioDevice>(
    device: D,
    awgs_and_sequences: &[(AwgIndex, Vec<Codeword>)],
    verbose: bool,
) -> Result<bool> {
    let mut calibrator = Calibrator::new(device, CalibrationSettings::default())
        .with_observer(LogObserver::new(verbose));
    let outcome = calibrator.calibrate(awgs_and_sequences)?;
    Ok(outcome.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDevice;

    #[test]
    fn test_common_delays() {
        let sets = [BTreeSet::from([1, 2, 3, 4]), BTreeSet::from([2, 3, 4, 5])];
        let common = common_delays(sets.iter());
        assert_eq!(common, BTreeSet::from([2, 3, 4]));
        assert_eq!(common.last(), Some(&4));

        let sets = [BTreeSet::from([0, 1]), BTreeSet::from([5, 6])];
        assert!(common_delays(sets.iter()).is_empty());
        assert!(common_delays(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_outcome_success() {
        assert!(
            CalibrationOutcome::Calibrated {
                delay: 3,
                valid_delays: BTreeSet::from([3])
            }
            .is_success()
        );
        assert!(!CalibrationOutcome::AsymmetricStrobe.is_success());
        assert!(!CalibrationOutcome::NoValidDelays { awg: 0 }.is_success());
    }

    #[test]
    fn test_calibrate_applies_largest_delay() {
        let device = SimulatedDevice::new(2);
        let sequence: Vec<Codeword> = (1..=7).collect();
        let mut calibrator = Calibrator::new(device, CalibrationSettings::default());
        let outcome = calibrator
            .calibrate(&[(0, sequence.clone()), (1, sequence)])
            .unwrap();
        assert_eq!(
            outcome,
            CalibrationOutcome::Calibrated {
                delay: 6,
                valid_delays: (0..=6).collect()
            }
        );
        let line = calibrator.device().delay_line(1);
        assert_eq!(line[30], 3);
        assert_eq!(line[0], 0);
    }

    #[test]
    fn test_calibrate_unknown_awg() {
        let mut calibrator = Calibrator::new(SimulatedDevice::new(1), Default::default());
        assert!(calibrator.calibrate(&[(4, vec![1, 2, 3])]).is_err());
    }

    #[test]
    fn test_calibrate_without_awgs() {
        let mut calibrator = Calibrator::new(SimulatedDevice::new(1), Default::default());
        let err = calibrator.calibrate(&[]).unwrap_err();
        assert_eq!(err.to_string(), "No AWG cores given for DIO calibration");
        assert_eq!(calibrator.device().captures(), 0);
        assert_eq!(calibrator.device().resyncs(), 0);
    }

    #[test]
    fn test_new_sanitizes_settings() {
        let settings = CalibrationSettings::from_json(
            r#"{"symmetric_captures_required": 0, "clock_settle_time_s": -1.0}"#,
        )
        .unwrap();
        let calibrator = Calibrator::new(SimulatedDevice::new(1), settings);
        assert_eq!(calibrator.settings.symmetric_captures_required, 1);
        assert_eq!(calibrator.settings.clock_settle_time_s, 0.0);
    }

    #[test]
    fn test_calibrate_dio_protocol() {
        let mut device = SimulatedDevice::new(1);
        assert!(calibrate_dio_protocol(&mut device, &[(0, (1..=7).collect())], false).unwrap());
        assert_eq!(device.delay_line(0)[30], 3);
    }
}
