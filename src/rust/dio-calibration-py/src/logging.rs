// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use pyo3::prelude::*;

use dio_log::init_logging;

/// Python log level at and below which calibration diagnostics are emitted.
const DIAGNOSTICS_LEVEL: i64 = 15;

#[pyfunction(name = "init_logging")]
pub fn init_logging_py(log_level: i64) {
    init_logging(log_level <= DIAGNOSTICS_LEVEL);
}
