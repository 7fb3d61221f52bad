// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Programming of the per-bit DIO delay line.
//!
//! A scalar delay setting moves the sampling instant relative to the data.
//! Settings below the midpoint delay the data bits, settings above it delay
//! the strobe bit, so increasing the setting moves the strobe later relative
//! to the data over the whole range.

use anyhow::Context;
use dio_log::warn;

use crate::device::{AwgIndex, DioDevice, Register};
use crate::protocol::BUS_WIDTH;
use crate::settings::CalibrationSettings;
use crate::{BusSample, Delay, Result};

/// Delay line values for the strobe and the data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySplit {
    pub strobe: Delay,
    pub data: Delay,
}

impl DelaySplit {
    /// Split an in-range delay setting around the midpoint `max_delay / 2`.
    pub fn new(delay: Delay, max_delay: Delay) -> Self {
        let midpoint = max_delay / 2;
        DelaySplit {
            strobe: delay.saturating_sub(midpoint),
            data: midpoint.saturating_sub(delay),
        }
    }

    /// Delay line value of one bus bit.
    pub fn for_bit(&self, bit: u32, strobe_mask: BusSample, data_mask: BusSample) -> Delay {
        let bit_mask = 1 << bit;
        if strobe_mask & bit_mask != 0 {
            self.strobe
        } else if data_mask & bit_mask != 0 {
            self.data
        } else {
            0
        }
    }
}

/// Clamp a requested delay setting into `[0, max_delay]`, warning when the
/// request was out of range.
pub fn clamp_delay(delay: i64, max_delay: Delay) -> Delay {
    if delay < 0 {
        warn!("Clamping DIO delay {} to 0", delay);
        0
    } else if delay > i64::from(max_delay) {
        warn!("Clamping DIO delay {} to {}", delay, max_delay);
        max_delay
    } else {
        // In range of `Delay` by the checks above.
        delay as Delay
    }
}

/// Program the DIO delay line of an AWG core.
///
/// Bits in `strobe_mask` get the strobe side of the delay, the remaining bits
/// in `data_mask` the data side, all other bits no delay.
pub fn set_delay<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
    awg: AwgIndex,
    strobe_mask: BusSample,
    data_mask: BusSample,
    delay: i64,
) -> Result<DelaySplit> {
    let delay = clamp_delay(delay, settings.max_delay);
    let split = DelaySplit::new(delay, settings.max_delay);
    log::debug!(
        "AWG {awg}: delay {delay} -> strobe {}, data {}",
        split.strobe,
        split.data
    );
    for bit in 0..settings.bus_width.min(BUS_WIDTH) {
        let value = split.for_bit(bit, strobe_mask, data_mask);
        device
            .set_integer(Register::DioDelayIndex, awg, bit.into())
            .and_then(|_| device.set_integer(Register::DioDelayValue, awg, value.into()))
            .with_context(|| format!("Failed to set DIO delay of bit {bit} on AWG {awg}"))?;
    }
    Ok(split)
}
