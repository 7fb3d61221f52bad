// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::BusSample;

/// Bits with a rising and a falling transition between two bus samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edges {
    pub rising: BusSample,
    pub falling: BusSample,
}

impl Edges {
    pub fn any(&self) -> bool {
        (self.rising | self.falling) != 0
    }
}

/// Compute the rising and falling edges of the bits in `mask` between
/// `previous` and `current`.
#[inline]
pub fn edges(current: BusSample, previous: BusSample, mask: BusSample) -> Edges {
    let changed = current ^ previous;
    Edges {
        rising: changed & current & mask,
        falling: changed & !current & mask,
    }
}
