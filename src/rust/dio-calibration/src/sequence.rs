// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::Codeword;

/// Outcome of comparing decoded codewords against a cyclic expected sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceCheck {
    Match,
    /// The first decoded codeword does not occur in the expected sequence.
    UnknownStart { codeword: Codeword },
    /// The codeword at `position` does not follow its predecessor.
    Mismatch {
        position: usize,
        codeword: Codeword,
        expected: Codeword,
    },
}

impl SequenceCheck {
    pub fn is_match(&self) -> bool {
        matches!(self, SequenceCheck::Match)
    }
}

impl fmt::Display for SequenceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceCheck::Match => write!(f, "sequence matches"),
            SequenceCheck::UnknownStart { codeword } => {
                write!(f, "codeword {codeword} is not in the expected sequence")
            }
            SequenceCheck::Mismatch {
                position,
                codeword,
                expected,
            } => write!(
                f,
                "codeword {position} has value {codeword}, expected {expected}"
            ),
        }
    }
}

/// Check that `decoded` follows `expected` cyclically.
///
/// The first decoded codeword selects the starting point, i.e. its first
/// occurrence in `expected`. From there on every codeword must equal the
/// next entry of `expected`, wrapping around at the end. An empty `decoded`
/// trivially matches.
pub fn check_cyclic_sequence(decoded: &[Codeword], expected: &[Codeword]) -> SequenceCheck {
    let Some((&first, rest)) = decoded.split_first() else {
        return SequenceCheck::Match;
    };
    let Some(mut index) = expected.iter().position(|&cw| cw == first) else {
        return SequenceCheck::UnknownStart { codeword: first };
    };
    for (offset, &codeword) in rest.iter().enumerate() {
        index = (index + 1) % expected.len();
        if codeword != expected[index] {
            return SequenceCheck::Mismatch {
                position: offset + 1,
                codeword,
                expected: expected[index],
            };
        }
    }
    SequenceCheck::Match
}
