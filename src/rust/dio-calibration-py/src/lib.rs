// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

use dio_calibration::protocol::{BUS_WIDTH, configure_codeword_protocol};
use dio_calibration::symmetry::is_symmetric;
use dio_calibration::{
    BusSample, CalibrationSettings, Codeword, CodewordProtocol, ProtocolDescriptor, StrobeSlope,
    ValidPolarity, analyze_trace,
};

mod device;
mod error;
mod logging;

use crate::device::PyDevice;
use crate::error::{DioCalibrationError, Error, Result};
use crate::logging::init_logging_py;

fn check_bit_index(index: u8, what: &str) -> Result<u8> {
    if u32::from(index) < BUS_WIDTH {
        Ok(index)
    } else {
        Err(Error::new(&format!(
            "DIO {what} {index} is outside of the {BUS_WIDTH} bit bus"
        )))
    }
}

/// Find and apply a common DIO delay for the given AWG cores.
///
/// `awgs_and_sequences` pairs AWG indices with the codeword sequence their
/// sequencer program is currently driving. Returns whether the calibration
/// succeeded.
#[pyfunction(name = "calibrate_dio_protocol")]
#[pyo3(signature = (device, awgs_and_sequences, awg_count, verbose=false))]
fn calibrate_dio_protocol_py(
    py: Python<'_>,
    device: Py<PyAny>,
    awgs_and_sequences: Vec<(usize, Vec<Codeword>)>,
    awg_count: usize,
    verbose: bool,
) -> Result<bool> {
    let device = PyDevice::new(device, awg_count);
    let calibrated = py.allow_threads(|| {
        dio_calibration::calibrate_dio_protocol(device, &awgs_and_sequences, verbose)
    })?;
    Ok(calibrated)
}

#[pyfunction(name = "configure_codeword_protocol")]
fn configure_codeword_protocol_py(
    py: Python<'_>,
    device: Py<PyAny>,
    protocol: &str,
    num_codewords: u32,
    awg_count: usize,
) -> Result<()> {
    let protocol: CodewordProtocol = protocol.parse()?;
    let mut device = PyDevice::new(device, awg_count);
    py.allow_threads(|| configure_codeword_protocol(&mut device, protocol, num_codewords))?;
    Ok(())
}

/// Switch the instrument to the external reference clock and wait for sync.
#[pyfunction(name = "ensure_external_clock")]
fn ensure_external_clock_py(py: Python<'_>, device: Py<PyAny>, awg_count: usize) -> Result<bool> {
    let mut device = PyDevice::new(device, awg_count);
    let settings = CalibrationSettings::default();
    let synced = py.allow_threads(|| {
        dio_calibration::clock::ensure_external_clock(&mut device, &settings)
    })?;
    Ok(synced)
}

/// Decode a captured DIO trace.
///
/// Returns the decoded codewords and the trace positions of timing violations.
#[pyfunction(name = "analyze_dio_data")]
#[pyo3(signature = (data, strobe_index, strobe_slope, valid_index, valid_polarity, codeword_mask, codeword_shift=0))]
fn analyze_dio_data_py(
    data: Vec<BusSample>,
    strobe_index: u8,
    strobe_slope: i64,
    valid_index: u8,
    valid_polarity: i64,
    codeword_mask: u32,
    codeword_shift: u8,
) -> Result<(Vec<Codeword>, Vec<usize>)> {
    let protocol = ProtocolDescriptor {
        strobe_index: check_bit_index(strobe_index, "strobe index")?,
        strobe_slope: StrobeSlope::try_from(strobe_slope)?,
        valid_index: check_bit_index(valid_index, "valid index")?,
        valid_polarity: ValidPolarity::try_from(valid_polarity)?,
        codeword_mask,
        codeword_shift: check_bit_index(codeword_shift, "codeword shift")?,
    };
    let analysis = analyze_trace(&data, &protocol);
    Ok((analysis.codewords, analysis.timing_violations))
}

#[pyfunction(name = "is_dio_strobe_symmetric")]
fn is_dio_strobe_symmetric_py(data: Vec<BusSample>, bits: Vec<u8>) -> Result<bool> {
    for &bit in &bits {
        check_bit_index(bit, "strobe index")?;
    }
    Ok(is_symmetric(&data, &bits))
}

#[pymodule]
fn dio_calibration_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Another extension in the process may already have installed the logger.
    let _ = pyo3_log::try_init();
    m.add("DioCalibrationError", m.py().get_type::<DioCalibrationError>())?;
    m.add_function(wrap_pyfunction!(calibrate_dio_protocol_py, m)?)?;
    m.add_function(wrap_pyfunction!(configure_codeword_protocol_py, m)?)?;
    m.add_function(wrap_pyfunction!(ensure_external_clock_py, m)?)?;
    m.add_function(wrap_pyfunction!(analyze_dio_data_py, m)?)?;
    m.add_function(wrap_pyfunction!(is_dio_strobe_symmetric_py, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging_py, m)?)?;
    Ok(())
}
