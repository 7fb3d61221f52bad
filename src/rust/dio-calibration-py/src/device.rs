// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Instrument access through a Python device object.

use anyhow::Context;
use pyo3::prelude::*;

use dio_calibration::device::{CLOCK_SOURCE_PATH, CLOCK_STATUS_PATH};
use dio_calibration::{
    AwgIndex, BusSample, ClockSource, ClockStatus, DioDevice, Register, Result, TraceNode,
};

/// A Python object exposing `geti(path)`, `seti(path, value)` and
/// `getv(path)` on the instrument node tree.
///
/// The GIL is only held for the duration of each node access.
pub struct PyDevice {
    device: Py<PyAny>,
    awg_count: usize,
}

impl PyDevice {
    pub fn new(device: Py<PyAny>, awg_count: usize) -> Self {
        PyDevice { device, awg_count }
    }

    fn geti(&self, path: &str) -> Result<i64> {
        let value = Python::with_gil(|py| {
            self.device
                .bind(py)
                .call_method1("geti", (path,))?
                .extract::<i64>()
        })
        .with_context(|| format!("Failed to read {path}"))?;
        Ok(value)
    }

    fn seti(&self, path: &str, value: i64) -> Result<()> {
        Python::with_gil(|py| {
            self.device
                .bind(py)
                .call_method1("seti", (path, value))
                .map(|_| ())
        })
        .with_context(|| format!("Failed to set {path} to {value}"))?;
        Ok(())
    }

    fn getv(&self, path: &str) -> Result<Vec<BusSample>> {
        let values = Python::with_gil(|py| {
            self.device
                .bind(py)
                .call_method1("getv", (path,))?
                .extract::<Vec<BusSample>>()
        })
        .with_context(|| format!("Failed to capture {path}"))?;
        Ok(values)
    }
}

impl DioDevice for PyDevice {
    fn awg_count(&self) -> usize {
        self.awg_count
    }

    fn get_integer(&mut self, register: Register, awg: AwgIndex) -> Result<i64> {
        self.geti(&register.node_path(awg))
    }

    fn set_integer(&mut self, register: Register, awg: AwgIndex, value: i64) -> Result<()> {
        self.seti(&register.node_path(awg), value)
    }

    fn get_vector(&mut self, trace: TraceNode) -> Result<Vec<BusSample>> {
        self.getv(&trace.node_path())
    }

    fn clock_source(&mut self) -> Result<ClockSource> {
        ClockSource::try_from(self.geti(CLOCK_SOURCE_PATH)?)
    }

    fn set_clock_source(&mut self, source: ClockSource) -> Result<()> {
        self.seti(CLOCK_SOURCE_PATH, source as i64)
    }

    fn clock_status(&mut self) -> Result<ClockStatus> {
        ClockStatus::try_from(self.geti(CLOCK_STATUS_PATH)?)
    }
}
