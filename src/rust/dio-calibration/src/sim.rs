// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Simulated instrument for offline runs of the calibration.
//!
//! The simulated sequencer drives a cyclic codeword sequence onto the bus,
//! changing the codeword every `period` samples and toggling the strobe
//! `strobe_phase` samples after each codeword change. Every AWG core sees the
//! bus through its own per-bit input skew plus its programmable delay line,
//! which is what makes some delay settings sample the data while it changes.

use std::collections::HashMap;
use std::time::Duration;

use crate::device::{AwgIndex, ClockSource, ClockStatus, DioDevice, Register, TraceNode};
use crate::protocol::{BUS_WIDTH, ProtocolDescriptor, StrobeSlope, ValidPolarity};
use crate::{BusSample, Codeword, Delay, Error, Result};

const BITS: usize = BUS_WIDTH as usize;

/// The bus pattern driven by the simulated sequencer.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    /// Samples per codeword.
    pub period: i64,
    /// Samples from a codeword change to the following strobe edge.
    pub strobe_phase: i64,
    pub strobe_bit: u8,
    pub valid_bit: u8,
    pub codeword_shift: u8,
    pub sequence: Vec<Codeword>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        SimulatedBus {
            period: 8,
            strobe_phase: 4,
            strobe_bit: 30,
            valid_bit: 31,
            codeword_shift: 0,
            sequence: vec![1, 2, 3, 4, 5, 6, 7],
        }
    }
}

impl SimulatedBus {
    /// Bus value at `tick` with the strobe high for `high` and low for `low`
    /// samples.
    fn sample(&self, tick: i64, high: i64, low: i64) -> BusSample {
        let index = tick.div_euclid(self.period);
        let len = self.sequence.len() as i64;
        let codeword = if len == 0 {
            0
        } else {
            self.sequence[index.rem_euclid(len) as usize]
        };
        let strobe_high = (tick - self.strobe_phase).rem_euclid(high + low) < high;
        let mut value = (codeword << self.codeword_shift) | (1 << self.valid_bit);
        if strobe_high {
            value |= 1 << self.strobe_bit;
        }
        value
    }
}

struct SimulatedAwg {
    registers: HashMap<Register, i64>,
    delay_line: [Delay; BITS],
    input_skew: [i64; BITS],
}

/// In-memory instrument implementing [`DioDevice`].
pub struct SimulatedDevice {
    bus: SimulatedBus,
    awgs: Vec<SimulatedAwg>,
    clock_source: ClockSource,
    clock_status: ClockStatus,
    external_clock_available: bool,
    sync_polls: usize,
    pending_sync_polls: usize,
    glitch_resyncs: usize,
    late_glitch: Option<(usize, usize)>,
    capture_misses: usize,
    trace_length: usize,
    captures: usize,
    resyncs: usize,
    switches_while_running: usize,
    slept: Duration,
}

impl SimulatedDevice {
    pub fn new(awg_count: usize) -> Self {
        Self::with_bus(awg_count, SimulatedBus::default())
    }

    /// A device whose AWG cores are configured to decode `bus`.
    pub fn with_bus(awg_count: usize, bus: SimulatedBus) -> Self {
        let num_codewords = bus
            .sequence
            .iter()
            .max()
            .map_or(1, |&max| (max + 1).next_power_of_two());
        let awgs = (0..awg_count)
            .map(|_| {
                let protocol = ProtocolDescriptor {
                    strobe_index: bus.strobe_bit,
                    strobe_slope: StrobeSlope::Both,
                    valid_index: bus.valid_bit,
                    valid_polarity: ValidPolarity::ActiveHigh,
                    codeword_mask: num_codewords - 1,
                    codeword_shift: bus.codeword_shift,
                };
                let registers = HashMap::from([
                    (Register::Enable, 1),
                    (Register::DioValidIndex, protocol.valid_index.into()),
                    (Register::DioValidPolarity, protocol.valid_polarity as i64),
                    (Register::DioStrobeIndex, protocol.strobe_index.into()),
                    (Register::DioStrobeSlope, protocol.strobe_slope as i64),
                    (Register::DioMaskValue, protocol.codeword_mask.into()),
                    (Register::DioMaskShift, protocol.codeword_shift.into()),
                    (Register::DioDelayIndex, 0),
                    (Register::DioDelayValue, 0),
                ]);
                SimulatedAwg {
                    registers,
                    delay_line: [0; BITS],
                    input_skew: [0; BITS],
                }
            })
            .collect();
        SimulatedDevice {
            bus,
            awgs,
            clock_source: ClockSource::External,
            clock_status: ClockStatus::Synced,
            external_clock_available: true,
            sync_polls: 2,
            pending_sync_polls: 0,
            glitch_resyncs: 0,
            late_glitch: None,
            capture_misses: 0,
            trace_length: 256,
            captures: 0,
            resyncs: 0,
            switches_while_running: 0,
            slept: Duration::ZERO,
        }
    }

    /// Delay the strobe line of an AWG core by `ticks` samples before its
    /// delay line.
    pub fn with_strobe_skew(mut self, awg: AwgIndex, ticks: i64) -> Self {
        let bit = usize::from(self.bus.strobe_bit);
        self.awgs[awg].input_skew[bit] = ticks;
        self
    }

    /// Delay one bus bit of an AWG core by `ticks` samples before its delay line.
    pub fn with_bit_skew(mut self, awg: AwgIndex, bit: u8, ticks: i64) -> Self {
        self.awgs[awg].input_skew[usize::from(bit)] = ticks;
        self
    }

    /// The raw strobe stays asymmetric until the reference clock has been
    /// resynchronised `resyncs` times.
    pub fn with_strobe_glitch(mut self, resyncs: usize) -> Self {
        self.glitch_resyncs = resyncs;
        self
    }

    /// The raw strobe turns asymmetric after `good_captures` symmetric raw
    /// captures and stays so until `resyncs` resynchronisations.
    pub fn with_late_strobe_glitch(mut self, good_captures: usize, resyncs: usize) -> Self {
        self.late_glitch = Some((good_captures, resyncs));
        self
    }

    /// The next `misses` captures of AWG inputs return an idle bus.
    pub fn with_capture_misses(mut self, misses: usize) -> Self {
        self.capture_misses = misses;
        self
    }

    /// Make the external reference unavailable; syncing to it fails and the
    /// instrument falls back to the internal reference.
    pub fn without_external_clock(mut self) -> Self {
        self.external_clock_available = false;
        self.clock_source = ClockSource::Internal;
        self
    }

    pub fn delay_line(&self, awg: AwgIndex) -> [Delay; BITS] {
        self.awgs[awg].delay_line
    }

    /// Number of internal-to-external reference clock switches.
    pub fn resyncs(&self) -> usize {
        self.resyncs
    }

    /// Number of reference clock switches done while an AWG core was running.
    pub fn switches_while_running(&self) -> usize {
        self.switches_while_running
    }

    pub fn captures(&self) -> usize {
        self.captures
    }

    pub fn slept(&self) -> Duration {
        self.slept
    }

    fn awg(&self, awg: AwgIndex) -> Result<&SimulatedAwg> {
        self.awgs
            .get(awg)
            .ok_or_else(|| Error::new(format!("AWG {awg} does not exist")))
    }

    fn awg_mut(&mut self, awg: AwgIndex) -> Result<&mut SimulatedAwg> {
        self.awgs
            .get_mut(awg)
            .ok_or_else(|| Error::new(format!("AWG {awg} does not exist")))
    }

    /// Each capture starts at a different point of the codeword cycle.
    fn next_start(&mut self) -> i64 {
        self.captures += 1;
        (self.captures as i64) * 37
    }

    fn capture_raw(&mut self) -> Vec<BusSample> {
        match self.late_glitch {
            Some((0, resyncs)) => {
                self.glitch_resyncs = resyncs;
                self.late_glitch = None;
            }
            Some((good, resyncs)) => self.late_glitch = Some((good - 1, resyncs)),
            None => {}
        }
        let start = self.next_start();
        let (high, low) = if self.glitch_resyncs > 0 {
            (self.bus.period + 1, self.bus.period - 1)
        } else {
            (self.bus.period, self.bus.period)
        };
        (0..self.trace_length as i64)
            .map(|t| self.bus.sample(start + t, high, low))
            .collect()
    }

    fn capture_awg(&mut self, awg: AwgIndex) -> Result<Vec<BusSample>> {
        self.awg(awg)?;
        let start = self.next_start();
        if self.capture_misses > 0 {
            self.capture_misses -= 1;
            return Ok(vec![0; self.trace_length]);
        }
        let awg = self.awg(awg)?;
        let period = self.bus.period;
        let trace = (0..self.trace_length as i64)
            .map(|t| {
                (0..BITS).fold(0, |value, bit| {
                    let delay = awg.input_skew[bit] + i64::from(awg.delay_line[bit]);
                    let source = self.bus.sample(start + t - delay, period, period);
                    value | (source & (1 << bit))
                })
            })
            .collect();
        Ok(trace)
    }
}

impl DioDevice for SimulatedDevice {
    fn awg_count(&self) -> usize {
        self.awgs.len()
    }

    fn get_integer(&mut self, register: Register, awg: AwgIndex) -> Result<i64> {
        Ok(self.awg(awg)?.registers.get(&register).copied().unwrap_or(0))
    }

    fn set_integer(&mut self, register: Register, awg: AwgIndex, value: i64) -> Result<()> {
        let sim = self.awg_mut(awg)?;
        if register == Register::DioDelayValue {
            let index = sim.registers.get(&Register::DioDelayIndex).copied();
            let bit = index
                .and_then(|index| usize::try_from(index).ok())
                .filter(|&bit| bit < BITS)
                .ok_or_else(|| Error::new("DIO delay index out of range"))?;
            sim.delay_line[bit] = Delay::try_from(value)
                .map_err(|_| Error::new(format!("Invalid DIO delay value {value}")))?;
        }
        sim.registers.insert(register, value);
        Ok(())
    }

    fn get_vector(&mut self, trace: TraceNode) -> Result<Vec<BusSample>> {
        match trace {
            TraceNode::RawDio => Ok(self.capture_raw()),
            TraceNode::AwgDio(awg) => self.capture_awg(awg),
        }
    }

    fn clock_source(&mut self) -> Result<ClockSource> {
        Ok(self.clock_source)
    }

    fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        if self
            .awgs
            .iter()
            .any(|awg| awg.registers.get(&Register::Enable).is_some_and(|&e| e != 0))
        {
            self.switches_while_running += 1;
        }
        if source == ClockSource::External && self.clock_source == ClockSource::Internal {
            self.resyncs += 1;
            self.glitch_resyncs = self.glitch_resyncs.saturating_sub(1);
        }
        self.clock_source = source;
        self.clock_status = match source {
            ClockSource::Internal => ClockStatus::Synced,
            ClockSource::External => {
                self.pending_sync_polls = self.sync_polls;
                ClockStatus::Syncing
            }
        };
        Ok(())
    }

    fn clock_status(&mut self) -> Result<ClockStatus> {
        if self.clock_status == ClockStatus::Syncing {
            if self.pending_sync_polls > 0 {
                self.pending_sync_polls -= 1;
            } else if self.external_clock_available {
                self.clock_status = ClockStatus::Synced;
            } else {
                self.clock_status = ClockStatus::Failed;
                self.clock_source = ClockSource::Internal;
            }
        }
        Ok(self.clock_status)
    }

    fn sleep(&mut self, duration: Duration) {
        self.slept += duration;
    }
}
