// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Capability interface of the instrument under calibration.
//!
//! The calibration only needs a handful of integer registers per AWG core,
//! bulk captures of the DIO bus and control over the reference clock. The
//! registers are addressed by [`Register`] plus the AWG index; transports that
//! address the instrument by node path can render it with
//! [`Register::node_path`].

use std::fmt;
use std::time::Duration;

use crate::{BusSample, Error, Result};

/// Index of an AWG core (a pair of output channels) on the instrument.
pub type AwgIndex = usize;

/// Integer registers of an AWG core used by the calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Run state of the AWG core (0 or 1).
    Enable,
    DioValidIndex,
    DioValidPolarity,
    DioStrobeIndex,
    DioStrobeSlope,
    DioMaskValue,
    DioMaskShift,
    /// Selects the bus bit that [`Register::DioDelayValue`] refers to.
    DioDelayIndex,
    DioDelayValue,
}

impl Register {
    pub fn node_path(&self, awg: AwgIndex) -> String {
        let leaf = match self {
            Register::Enable => "enable",
            Register::DioValidIndex => "dio/valid/index",
            Register::DioValidPolarity => "dio/valid/polarity",
            Register::DioStrobeIndex => "dio/strobe/index",
            Register::DioStrobeSlope => "dio/strobe/slope",
            Register::DioMaskValue => "dio/mask/value",
            Register::DioMaskShift => "dio/mask/shift",
            Register::DioDelayIndex => "dio/delay/index",
            Register::DioDelayValue => "dio/delay/value",
        };
        format!("awgs/{awg}/{leaf}")
    }
}

/// Source of a bus capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceNode {
    /// The DIO bus as seen at the instrument input, before any AWG delay line.
    RawDio,
    /// The DIO bus as sampled by one AWG core, after its delay line.
    AwgDio(AwgIndex),
}

impl TraceNode {
    pub fn node_path(&self) -> String {
        match self {
            TraceNode::RawDio => "raw/dios/0/data".to_string(),
            TraceNode::AwgDio(awg) => format!("awgs/{awg}/dio/data"),
        }
    }
}

impl fmt::Display for TraceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_path())
    }
}

pub const CLOCK_SOURCE_PATH: &str = "system/clocks/referenceclock/source";
pub const CLOCK_STATUS_PATH: &str = "system/clocks/referenceclock/status";

/// Reference clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    Internal = 0,
    External = 1,
}

impl TryFrom<i64> for ClockSource {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ClockSource::Internal),
            1 => Ok(ClockSource::External),
            _ => Err(Error::new(format!("Unknown reference clock source: {value}"))),
        }
    }
}

/// Synchronisation state of the reference clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStatus {
    Synced = 0,
    /// Sync failed; the instrument falls back to the internal reference.
    Failed = 1,
    Syncing = 2,
}

impl TryFrom<i64> for ClockStatus {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ClockStatus::Synced),
            1 => Ok(ClockStatus::Failed),
            2 => Ok(ClockStatus::Syncing),
            _ => Err(Error::new(format!("Unknown reference clock status: {value}"))),
        }
    }
}

/// Instrument access needed by the calibration.
///
/// All calls are blocking round trips. The calibration assumes exclusive
/// ownership of the instrument for the duration of a run.
pub trait DioDevice {
    /// Number of AWG cores on the instrument.
    fn awg_count(&self) -> usize;

    fn get_integer(&mut self, register: Register, awg: AwgIndex) -> Result<i64>;

    fn set_integer(&mut self, register: Register, awg: AwgIndex, value: i64) -> Result<()>;

    /// Capture a trace of the bus.
    fn get_vector(&mut self, trace: TraceNode) -> Result<Vec<BusSample>>;

    fn clock_source(&mut self) -> Result<ClockSource>;

    fn set_clock_source(&mut self, source: ClockSource) -> Result<()>;

    fn clock_status(&mut self) -> Result<ClockStatus>;

    /// Wait for the instrument to settle.
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<D: DioDevice + ?Sized> DioDevice for &mut D {
    fn awg_count(&self) -> usize {
        (**self).awg_count()
    }

    fn get_integer(&mut self, register: Register, awg: AwgIndex) -> Result<i64> {
        (**self).get_integer(register, awg)
    }

    fn set_integer(&mut self, register: Register, awg: AwgIndex, value: i64) -> Result<()> {
        (**self).set_integer(register, awg, value)
    }

    fn get_vector(&mut self, trace: TraceNode) -> Result<Vec<BusSample>> {
        (**self).get_vector(trace)
    }

    fn clock_source(&mut self) -> Result<ClockSource> {
        (**self).clock_source()
    }

    fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        (**self).set_clock_source(source)
    }

    fn clock_status(&mut self) -> Result<ClockStatus> {
        (**self).clock_status()
    }

    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration)
    }
}
