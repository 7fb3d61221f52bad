// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Progress reporting of a calibration run.
//!
//! The calibration reports what it does through [`CalibrationObserver`]
//! instead of logging directly, so callers can render, record or drop the
//! diagnostics independently of the control flow.

use std::collections::BTreeSet;
use std::fmt;

use dio_log::{diagnostic, info, warn};

use crate::Delay;
use crate::device::AwgIndex;
use crate::protocol::ProtocolDescriptor;
use crate::search::DelayVerdict;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    CalibrationStarted,
    AnalyzingStrobeBits { bits: Vec<u8> },
    SymmetricCapture { consecutive: usize },
    AsymmetricCapture,
    ClockResync { attempt: usize },
    ClockSyncTimeout,
    StrobeSymmetric,
    StrobeAsymmetric,
    SearchStarted { awg: AwgIndex, protocol: ProtocolDescriptor },
    TestingDelay { awg: AwgIndex, delay: Delay },
    NoCodewordsRetry { awg: AwgIndex, delay: Delay, attempt: usize },
    DelayRejected { awg: AwgIndex, delay: Delay, verdict: DelayVerdict },
    ValidDelaysFound { awg: AwgIndex, delays: BTreeSet<Delay> },
    NoValidDelays { awg: AwgIndex },
    CommonDelays { delays: BTreeSet<Delay> },
    NoCommonDelay,
    ApplyingDelay { awg: AwgIndex, delay: Delay },
}

impl CalibrationEvent {
    /// Whether the event reports a problem rather than progress.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            CalibrationEvent::AsymmetricCapture
                | CalibrationEvent::ClockSyncTimeout
                | CalibrationEvent::StrobeAsymmetric
                | CalibrationEvent::NoCodewordsRetry { .. }
                | CalibrationEvent::DelayRejected { .. }
                | CalibrationEvent::NoValidDelays { .. }
                | CalibrationEvent::NoCommonDelay
        )
    }
}

impl fmt::Display for CalibrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationEvent::CalibrationStarted => write!(f, "Calibrating DIO delays"),
            CalibrationEvent::AnalyzingStrobeBits { bits } => {
                write!(f, "Analyzing strobe bits {bits:?}")
            }
            CalibrationEvent::SymmetricCapture { consecutive } => {
                write!(f, "Found good shot ({consecutive} in a row)")
            }
            CalibrationEvent::AsymmetricCapture => {
                write!(f, "Strobe bit(s) are not sampled symmetrically")
            }
            CalibrationEvent::ClockResync { attempt } => write!(
                f,
                "Resynchronizing reference clock (attempt {attempt}): disabling AWGs, switching to internal and back to external clock"
            ),
            CalibrationEvent::ClockSyncTimeout => {
                write!(f, "Reference clock did not report sync")
            }
            CalibrationEvent::StrobeSymmetric => write!(f, "Strobe is symmetric"),
            CalibrationEvent::StrobeAsymmetric => write!(f, "Strobe is not symmetric"),
            CalibrationEvent::SearchStarted { awg, protocol } => write!(
                f,
                "Finding valid delays for AWG {awg}: vld_mask = 0x{:08x}, vld_polarity = {:?}, strb_mask = 0x{:08x}, strb_slope = {:?}, cw_mask = 0x{:08x}, cw_shift = {}",
                protocol.valid_mask(),
                protocol.valid_polarity,
                protocol.strobe_mask(),
                protocol.strobe_slope,
                protocol.codeword_mask,
                protocol.codeword_shift
            ),
            CalibrationEvent::TestingDelay { awg, delay } => {
                write!(f, "Testing delay {delay} on AWG {awg}")
            }
            CalibrationEvent::NoCodewordsRetry {
                awg,
                delay,
                attempt,
            } => write!(
                f,
                "No codewords detected on AWG {awg} for delay {delay}, trying again ({attempt})"
            ),
            CalibrationEvent::DelayRejected {
                awg,
                delay,
                verdict,
            } => write!(f, "Delay {delay} on AWG {awg} is invalid: {verdict}"),
            CalibrationEvent::ValidDelaysFound { awg, delays } => {
                write!(f, "Found valid delays of {delays:?} on AWG {awg}")
            }
            CalibrationEvent::NoValidDelays { awg } => {
                write!(f, "Unable to find valid delays for AWG {awg}")
            }
            CalibrationEvent::CommonDelays { delays } => {
                write!(f, "Valid delays are {delays:?}")
            }
            CalibrationEvent::NoCommonDelay => {
                write!(f, "The valid delays of the AWGs have no common value")
            }
            CalibrationEvent::ApplyingDelay { awg, delay } => {
                write!(f, "Setting delay of AWG {awg} to {delay}")
            }
        }
    }
}

pub trait CalibrationObserver {
    fn notify(&mut self, event: &CalibrationEvent);
}

/// Renders events through the logging facade.
///
/// In verbose mode every event is logged; otherwise events are only emitted
/// as diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver {
    pub verbose: bool,
}

impl LogObserver {
    pub fn new(verbose: bool) -> Self {
        LogObserver { verbose }
    }
}

impl CalibrationObserver for LogObserver {
    fn notify(&mut self, event: &CalibrationEvent) {
        match (self.verbose, event.is_warning()) {
            (true, true) => warn!("{}", event),
            (true, false) => info!("{}", event),
            (false, _) => diagnostic!("{}", event),
        }
    }
}

/// Keeps every event, e.g. to attach them to a report.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub events: Vec<CalibrationEvent>,
}

impl CalibrationObserver for RecordingObserver {
    fn notify(&mut self, event: &CalibrationEvent) {
        self.events.push(event.clone());
    }
}
