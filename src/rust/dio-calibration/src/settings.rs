// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Module for defining settings for the DIO calibration.
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::protocol::BUS_WIDTH;
use crate::{Delay, Result};

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationSettings {
    /// Largest setting of the DIO delay line.
    pub max_delay: Delay,
    /// Number of bus bits with a delay line.
    pub bus_width: u32,
    /// Additional captures when a trace decodes to no codewords.
    pub capture_retries: usize,
    /// Consecutive symmetric strobe captures needed before the delay search.
    pub symmetric_captures_required: usize,
    /// Consecutive clock resynchronisations after which the strobe is
    /// declared asymmetric.
    pub max_clock_resyncs: usize,
    /// Wait after each reference clock switch.
    pub clock_settle_time_s: f64,
    pub clock_poll_interval_s: f64,
    /// Status polls before a reference clock sync is considered stuck.
    pub clock_sync_polls: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        CalibrationSettings {
            max_delay: 6,
            bus_width: BUS_WIDTH,
            capture_retries: 5,
            symmetric_captures_required: 5,
            max_clock_resyncs: 5,
            clock_settle_time_s: 5.0,
            clock_poll_interval_s: 0.1,
            clock_sync_polls: 100,
        }
    }
}

impl CalibrationSettings {
    /// Load settings from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings = serde_json::from_str(json).context("Invalid DIO calibration settings")?;
        Ok(settings)
    }

    pub fn clock_settle_time(&self) -> Duration {
        Duration::from_secs_f64(self.clock_settle_time_s)
    }

    pub fn clock_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.clock_poll_interval_s)
    }

    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let mut changes = vec![];
        if self.bus_width == 0 || self.bus_width > BUS_WIDTH {
            let sanitized = BUS_WIDTH;
            changes.push(SanitizationChange {
                field: "bus_width",
                original: self.bus_width.to_string(),
                sanitized: sanitized.to_string(),
                reason: format!("Must be between 1 and {BUS_WIDTH}."),
            });
            self.bus_width = sanitized;
        }
        if self.symmetric_captures_required == 0 {
            changes.push(SanitizationChange {
                field: "symmetric_captures_required",
                original: "0".to_string(),
                sanitized: "1".to_string(),
                reason: "At least one symmetric capture is needed.".to_string(),
            });
            self.symmetric_captures_required = 1;
        }
        let durations = [
            ("clock_settle_time_s", &mut self.clock_settle_time_s),
            ("clock_poll_interval_s", &mut self.clock_poll_interval_s),
        ];
        for (field, value) in durations {
            if !value.is_finite() || *value < 0.0 {
                changes.push(SanitizationChange {
                    field,
                    original: value.to_string(),
                    sanitized: "0".to_string(),
                    reason: "Not a non-negative duration.".to_string(),
                });
                *value = 0.0;
            }
        }
        changes
    }
}
