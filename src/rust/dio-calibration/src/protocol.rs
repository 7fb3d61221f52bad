// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Description of the codeword protocol on the DIO bus.
use std::str::FromStr;

use anyhow::Context;

use crate::device::{AwgIndex, DioDevice, Register};
use crate::{BusSample, Error, Result};

/// Width of the DIO bus in bits.
pub const BUS_WIDTH: u32 = BusSample::BITS;

/// Strobe edges on which the codeword is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrobeSlope {
    /// No strobe, every sample is a sample point.
    Ignore = 0,
    Rising = 1,
    Falling = 2,
    Both = 3,
}

impl TryFrom<i64> for StrobeSlope {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(StrobeSlope::Ignore),
            1 => Ok(StrobeSlope::Rising),
            2 => Ok(StrobeSlope::Falling),
            3 => Ok(StrobeSlope::Both),
            _ => Err(Error::new(format!("Unknown strobe slope: {value}"))),
        }
    }
}

/// Level of the valid bit at which the codeword bits are meaningful.
///
/// The values form a bitfield: bit 0 accepts a low valid bit, bit 1 a high one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidPolarity {
    /// Never active, no codewords are sampled.
    None = 0,
    ActiveLow = 1,
    ActiveHigh = 2,
    /// Always active, the valid bit is ignored.
    Both = 3,
}

impl ValidPolarity {
    /// Whether the codeword bits are valid given the level of the valid bit.
    #[inline]
    pub fn is_active(&self, valid_bit_set: bool) -> bool {
        let bits = *self as u8;
        (bits & 1 != 0 && !valid_bit_set) || (bits & 2 != 0 && valid_bit_set)
    }
}

impl TryFrom<i64> for ValidPolarity {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ValidPolarity::None),
            1 => Ok(ValidPolarity::ActiveLow),
            2 => Ok(ValidPolarity::ActiveHigh),
            3 => Ok(ValidPolarity::Both),
            _ => Err(Error::new(format!("Unknown valid polarity: {value}"))),
        }
    }
}

/// Assignment of bus bits to codewords across the AWG cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodewordProtocol {
    /// All AWG cores decode the same codeword bits.
    Identical,
    /// AWG cores 0 and 1 decode the lowest bits, cores 2 and 3 the bits from 9 upwards.
    Microwave,
    /// Every AWG core decodes the three lowest bits.
    Flux,
}

impl FromStr for CodewordProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "identical" => Ok(CodewordProtocol::Identical),
            "microwave" => Ok(CodewordProtocol::Microwave),
            "flux" => Ok(CodewordProtocol::Flux),
            _ => Err(Error::new(format!("Unknown codeword protocol: {s}"))),
        }
    }
}

const DEFAULT_VALID_INDEX: u8 = 31;
const DEFAULT_STROBE_INDEX: u8 = 30;
const MICROWAVE_UPPER_SHIFT: u8 = 9;
const FLUX_CODEWORD_MASK: u32 = 0b111;

/// Protocol configuration of one AWG core's DIO input.
///
/// The shifted codeword mask must not overlap the strobe or the valid bit.
/// This is not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub strobe_index: u8,
    pub strobe_slope: StrobeSlope,
    pub valid_index: u8,
    pub valid_polarity: ValidPolarity,
    pub codeword_mask: u32,
    pub codeword_shift: u8,
}

impl ProtocolDescriptor {
    pub fn strobe_mask(&self) -> BusSample {
        1 << self.strobe_index
    }

    pub fn valid_mask(&self) -> BusSample {
        1 << self.valid_index
    }

    /// Codeword mask in bus bit positions.
    pub fn shifted_codeword_mask(&self) -> BusSample {
        self.codeword_mask
            .checked_shl(self.codeword_shift.into())
            .unwrap_or(0)
    }

    /// All bits that carry data: the codeword bits and the valid bit.
    pub fn data_mask(&self) -> BusSample {
        self.shifted_codeword_mask() | self.valid_mask()
    }

    /// Extract the codeword from a bus sample.
    #[inline]
    pub fn codeword(&self, sample: BusSample) -> u32 {
        sample
            .checked_shr(self.codeword_shift.into())
            .unwrap_or(0)
            & self.codeword_mask
    }

    /// Protocol for an AWG core under the given codeword assignment.
    ///
    /// `num_codewords` must be a power of two.
    pub fn for_codeword_protocol(
        protocol: CodewordProtocol,
        awg: AwgIndex,
        num_codewords: u32,
    ) -> Result<Self> {
        if !num_codewords.is_power_of_two() {
            return Err(Error::new(format!(
                "Number of codewords must be a power of 2, got {num_codewords}"
            )));
        }
        let (codeword_mask, codeword_shift) = match protocol {
            CodewordProtocol::Identical => (num_codewords - 1, 0),
            CodewordProtocol::Microwave => match awg {
                0 | 1 => (num_codewords - 1, 0),
                _ => (num_codewords - 1, MICROWAVE_UPPER_SHIFT),
            },
            CodewordProtocol::Flux => (FLUX_CODEWORD_MASK, 0),
        };
        Ok(ProtocolDescriptor {
            strobe_index: DEFAULT_STROBE_INDEX,
            strobe_slope: StrobeSlope::Both,
            valid_index: DEFAULT_VALID_INDEX,
            valid_polarity: ValidPolarity::ActiveHigh,
            codeword_mask,
            codeword_shift,
        })
    }

    /// Read the protocol configuration of an AWG core from the instrument.
    pub fn read<D: DioDevice + ?Sized>(device: &mut D, awg: AwgIndex) -> Result<Self> {
        let mut read = |register: Register| -> Result<i64> {
            device
                .get_integer(register, awg)
                .with_context(|| format!("Failed to read {}", register.node_path(awg)))
                .map_err(Error::from)
        };
        let strobe_index = bit_index(read(Register::DioStrobeIndex)?, "strobe index")?;
        let strobe_slope = StrobeSlope::try_from(read(Register::DioStrobeSlope)?)?;
        let valid_index = bit_index(read(Register::DioValidIndex)?, "valid index")?;
        let valid_polarity = ValidPolarity::try_from(read(Register::DioValidPolarity)?)?;
        let codeword_mask = u32::try_from(read(Register::DioMaskValue)?)
            .map_err(|_| Error::new(format!("AWG {awg}: codeword mask out of range")))?;
        let codeword_shift = bit_index(read(Register::DioMaskShift)?, "codeword shift")?;
        Ok(ProtocolDescriptor {
            strobe_index,
            strobe_slope,
            valid_index,
            valid_polarity,
            codeword_mask,
            codeword_shift,
        })
    }

    /// Write the protocol configuration of an AWG core to the instrument.
    pub fn write<D: DioDevice + ?Sized>(&self, device: &mut D, awg: AwgIndex) -> Result<()> {
        let values = [
            (Register::DioValidIndex, self.valid_index.into()),
            (Register::DioValidPolarity, self.valid_polarity as i64),
            (Register::DioStrobeIndex, self.strobe_index.into()),
            (Register::DioStrobeSlope, self.strobe_slope as i64),
            (Register::DioMaskValue, self.codeword_mask.into()),
            (Register::DioMaskShift, self.codeword_shift.into()),
        ];
        for (register, value) in values {
            device
                .set_integer(register, awg, value)
                .with_context(|| format!("Failed to write {}", register.node_path(awg)))?;
        }
        Ok(())
    }
}

fn bit_index(value: i64, what: &str) -> Result<u8> {
    match u8::try_from(value) {
        Ok(index) if u32::from(index) < BUS_WIDTH => Ok(index),
        _ => Err(Error::new(format!(
            "DIO {what} {value} is outside of the {BUS_WIDTH} bit bus"
        ))),
    }
}

/// Configure the DIO protocol of every AWG core on the instrument.
pub fn configure_codeword_protocol<D: DioDevice + ?Sized>(
    device: &mut D,
    protocol: CodewordProtocol,
    num_codewords: u32,
) -> Result<()> {
    for awg in 0..device.awg_count() {
        ProtocolDescriptor::for_codeword_protocol(protocol, awg, num_codewords)?
            .write(device, awg)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDevice;

    #[test]
    fn test_valid_polarity() {
        assert!(!ValidPolarity::None.is_active(true));
        assert!(!ValidPolarity::None.is_active(false));
        assert!(ValidPolarity::ActiveLow.is_active(false));
        assert!(!ValidPolarity::ActiveLow.is_active(true));
        assert!(ValidPolarity::ActiveHigh.is_active(true));
        assert!(!ValidPolarity::ActiveHigh.is_active(false));
        assert!(ValidPolarity::Both.is_active(true));
        assert!(ValidPolarity::Both.is_active(false));
    }

    #[test]
    fn test_masks() {
        let protocol = ProtocolDescriptor {
            strobe_index: 30,
            strobe_slope: StrobeSlope::Both,
            valid_index: 31,
            valid_polarity: ValidPolarity::ActiveHigh,
            codeword_mask: 0xff,
            codeword_shift: 9,
        };
        assert_eq!(protocol.strobe_mask(), 0x4000_0000);
        assert_eq!(protocol.valid_mask(), 0x8000_0000);
        assert_eq!(protocol.shifted_codeword_mask(), 0xff << 9);
        assert_eq!(protocol.data_mask(), 0x8000_0000 | (0xff << 9));
        assert_eq!(protocol.codeword((0x5a << 9) | 0xc000_01ff), 0x5a);
    }

    #[test]
    fn test_for_codeword_protocol() {
        let p = ProtocolDescriptor::for_codeword_protocol(CodewordProtocol::Microwave, 3, 256)
            .unwrap();
        assert_eq!(p.codeword_mask, 255);
        assert_eq!(p.codeword_shift, 9);
        assert_eq!(p.strobe_index, 30);
        assert_eq!(p.valid_index, 31);
        assert_eq!(p.strobe_slope, StrobeSlope::Both);
        assert_eq!(p.valid_polarity, ValidPolarity::ActiveHigh);

        let p = ProtocolDescriptor::for_codeword_protocol(CodewordProtocol::Microwave, 1, 256)
            .unwrap();
        assert_eq!(p.codeword_shift, 0);

        let p =
            ProtocolDescriptor::for_codeword_protocol(CodewordProtocol::Flux, 2, 256).unwrap();
        assert_eq!((p.codeword_mask, p.codeword_shift), (7, 0));

        assert!(
            ProtocolDescriptor::for_codeword_protocol(CodewordProtocol::Identical, 0, 100)
                .is_err()
        );
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!(
            CodewordProtocol::from_str("Microwave").unwrap(),
            CodewordProtocol::Microwave
        );
        assert!(CodewordProtocol::from_str("novel").is_err());
    }

    #[test]
    fn test_write_then_read() {
        let mut device = SimulatedDevice::new(4);
        configure_codeword_protocol(&mut device, CodewordProtocol::Microwave, 128).unwrap();
        let p = ProtocolDescriptor::read(&mut device, 2).unwrap();
        assert_eq!(p.codeword_mask, 127);
        assert_eq!(p.codeword_shift, 9);
        assert_eq!(p.strobe_slope, StrobeSlope::Both);
    }

    #[test]
    fn test_read_rejects_bad_index() {
        let mut device = SimulatedDevice::new(1);
        device
            .set_integer(Register::DioStrobeIndex, 0, 40)
            .unwrap();
        let err = ProtocolDescriptor::read(&mut device, 0).unwrap_err();
        assert!(err.to_string().contains("strobe index 40"));
    }
}
