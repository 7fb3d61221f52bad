// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::edges::edges;
use crate::protocol::{ProtocolDescriptor, StrobeSlope, ValidPolarity};
use crate::{BusSample, Codeword};

/// Result of decoding a bus trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceAnalysis {
    /// Codewords sampled at the strobe edges while the valid bit was active.
    pub codewords: Vec<Codeword>,
    /// Trace positions where the valid bit or a codeword bit changed together
    /// with a sampling strobe edge.
    pub timing_violations: Vec<usize>,
}

impl TraceAnalysis {
    pub fn has_timing_violations(&self) -> bool {
        !self.timing_violations.is_empty()
    }
}

/// Decode the codewords of a bus trace and locate timing violations.
///
/// A sample point occurs at every position where the strobe has an edge
/// selected by the strobe slope ([`StrobeSlope::Ignore`] makes every position
/// a sample point). Data must be stable at a sample point: a simultaneous edge
/// on the valid bit or on a codeword bit is a timing violation. The first
/// sample only serves as reference for edge detection.
pub fn analyze_trace(trace: &[BusSample], protocol: &ProtocolDescriptor) -> TraceAnalysis {
    let strobe_mask = protocol.strobe_mask();
    let valid_mask = protocol.valid_mask();
    let codeword_mask = protocol.shifted_codeword_mask();
    let mut analysis = TraceAnalysis::default();

    for (position, pair) in trace.windows(2).enumerate() {
        let (previous, current) = (pair[0], pair[1]);
        let strobe = edges(current, previous, strobe_mask);
        let sample_point = match protocol.strobe_slope {
            StrobeSlope::Ignore => true,
            StrobeSlope::Rising => strobe.rising != 0,
            StrobeSlope::Falling => strobe.falling != 0,
            StrobeSlope::Both => strobe.any(),
        };
        if !sample_point {
            continue;
        }

        let valid_changed = protocol.valid_polarity != ValidPolarity::None
            && edges(current, previous, valid_mask).any();
        let codeword_changed = edges(current, previous, codeword_mask).any();
        if valid_changed || codeword_changed {
            analysis.timing_violations.push(position + 1);
        }

        if protocol
            .valid_polarity
            .is_active(current & valid_mask != 0)
        {
            analysis.codewords.push(protocol.codeword(current));
        }
    }
    analysis
}
