// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Duty cycle check of the strobe lines.
//!
//! The sequencer toggles the strobe at a fixed rate, so every high period of
//! a correctly sampled strobe is exactly as long as the adjacent low periods.
//! An asymmetric strobe means the DIO input samples the bus at a bad phase
//! relative to the sequencer clock.

use crate::BusSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    /// No edge seen yet; the run length up to the first edge is unknown.
    Idle,
    High(usize),
    Low(usize),
}

/// Tracks the run lengths of one strobe bit.
#[derive(Debug, Clone)]
struct StrobeRuns {
    mask: BusSample,
    state: RunState,
    last_level: Option<bool>,
    last_closed: Option<usize>,
}

impl StrobeRuns {
    fn new(bit: u8) -> Self {
        StrobeRuns {
            mask: 1 << bit,
            state: RunState::Idle,
            last_level: None,
            last_closed: None,
        }
    }

    /// Feed the next sample. Returns `false` when a closed run differs in
    /// length from the run before it.
    fn push(&mut self, sample: BusSample) -> bool {
        let level = sample & self.mask != 0;
        let edge = self.last_level.is_some_and(|last| last != level);
        self.last_level = Some(level);
        if !edge {
            match &mut self.state {
                RunState::Idle => {}
                RunState::High(n) | RunState::Low(n) => *n += 1,
            }
            return true;
        }
        let closed = match self.state {
            RunState::Idle => None,
            RunState::High(n) | RunState::Low(n) => Some(n),
        };
        self.state = if level {
            RunState::High(1)
        } else {
            RunState::Low(1)
        };
        let Some(closed) = closed else {
            return true;
        };
        let symmetric = self.last_closed.is_none_or(|previous| previous == closed);
        self.last_closed = Some(closed);
        symmetric
    }
}

/// Whether every strobe bit in `bits` toggles with equal high and low run
/// lengths over the trace.
///
/// Only runs delimited by two edges are measured; the partial runs at either
/// end of the trace are ignored. Every bit index must be below the bus width.
pub fn is_symmetric(trace: &[BusSample], bits: &[u8]) -> bool {
    bits.iter().all(|&bit| {
        let mut runs = StrobeRuns::new(bit);
        trace.iter().all(|&sample| runs.push(sample))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_wave(bit: u8, high: usize, low: usize, periods: usize) -> Vec<u32> {
        let mut trace = vec![];
        for _ in 0..periods {
            trace.extend(std::iter::repeat_n(1u32 << bit, high));
            trace.extend(std::iter::repeat_n(0u32, low));
        }
        trace
    }

    #[test]
    fn test_symmetric() {
        assert!(is_symmetric(&square_wave(30, 4, 4, 10), &[30]));
        assert!(is_symmetric(&square_wave(30, 1, 1, 10), &[30]));
    }

    #[test]
    fn test_asymmetric() {
        assert!(!is_symmetric(&square_wave(30, 3, 5, 10), &[30]));
    }

    #[test]
    fn test_single_odd_run() {
        let mut trace = square_wave(30, 4, 4, 3);
        trace.extend(std::iter::repeat_n(1u32 << 30, 5));
        trace.extend(square_wave(30, 0, 4, 1));
        trace.extend(square_wave(30, 4, 4, 3));
        assert!(!is_symmetric(&trace, &[30]));
    }

    #[test]
    fn test_partial_runs_at_ends_are_ignored() {
        let mut trace = vec![1u32 << 30; 7];
        trace.extend(square_wave(30, 0, 4, 1));
        trace.extend(square_wave(30, 4, 4, 3));
        trace.extend(vec![1u32 << 30; 2]);
        assert!(is_symmetric(&trace, &[30]));
    }

    #[test]
    fn test_all_bits_must_be_symmetric() {
        let good = square_wave(30, 2, 2, 8);
        let bad = square_wave(29, 1, 3, 8);
        let trace: Vec<u32> = good.iter().zip(bad.iter()).map(|(a, b)| a | b).collect();
        assert!(is_symmetric(&trace, &[30]));
        assert!(!is_symmetric(&trace, &[30, 29]));
        assert!(!is_symmetric(&trace, &[29]));
    }

    #[test]
    fn test_constant_line_is_symmetric() {
        assert!(is_symmetric(&[0; 16], &[30]));
        assert!(is_symmetric(&[], &[30]));
        assert!(is_symmetric(&square_wave(30, 3, 5, 4), &[]));
    }
}
