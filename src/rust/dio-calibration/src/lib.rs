// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Timing calibration of the DIO codeword interface.
//!
//! A sequencer drives codewords, a valid bit and a toggling strobe over a
//! parallel 32 bit bus into the AWG cores of an instrument. Each AWG core has
//! a per-bit delay line on its DIO input. The calibration finds a single delay
//! setting at which every AWG samples the codewords without setup/hold
//! violations, and programs it.

pub mod analyzer;
pub mod calibration;
pub mod clock;
pub mod delay;
pub mod device;
pub mod edges;
pub mod observer;
pub mod protocol;
pub mod retry;
pub mod search;
pub mod sequence;
pub mod settings;
pub mod sim;
pub mod symmetry;

pub use analyzer::{TraceAnalysis, analyze_trace};
pub use calibration::{CalibrationOutcome, Calibrator, calibrate_dio_protocol};
pub use device::{AwgIndex, ClockSource, ClockStatus, DioDevice, Register, TraceNode};
pub use protocol::{CodewordProtocol, ProtocolDescriptor, StrobeSlope, ValidPolarity};
pub use settings::CalibrationSettings;

/// The state of all bus lines at one sampling instant.
pub type BusSample = u32;

/// Payload value transferred at one strobe transition.
pub type Codeword = u32;

/// Scalar setting of the DIO delay line.
pub type Delay = u8;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
