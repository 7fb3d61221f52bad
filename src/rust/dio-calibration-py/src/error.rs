// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Error handling for the Python bindings.
//! This module provides functionality to translate Rust errors
//! into Python exceptions.

use dio_calibration::Error as CalibrationError;
use pyo3::create_exception;
use pyo3::exceptions::PyException;
use pyo3::prelude::*;

create_exception!(dio_calibration, DioCalibrationError, PyException);

/// Base error for Python bindings.
///
/// If the root error is a Python exception raised by the instrument object,
/// it is set as the cause of the `DioCalibrationError`, to keep the full
/// traceback in Python.
///
/// The messages in the error chain are included in the Python exception as
/// additional context.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

impl Error {
    pub fn new(msg: &str) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }
}

impl From<Error> for PyErr {
    fn from(error: Error) -> Self {
        let err_message = create_python_error_message(&error);
        if let Some(py_err) = find_python_root_cause(&error) {
            let error = DioCalibrationError::new_err(err_message);
            Python::with_gil(|py| {
                error.set_cause(py, Some(py_err.clone_ref(py)));
                error
            })
        } else {
            DioCalibrationError::new_err(err_message)
        }
    }
}

impl From<PyErr> for Error {
    fn from(error: PyErr) -> Self {
        Error::Anyhow(error.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Collect the source errors and format them into a string.
///
/// The original error message is excluded from the context.
fn create_context_message(error: &anyhow::Error) -> Option<String> {
    let mut causes = error
        .chain()
        .skip(1)
        .map(|cause| format!("{cause}"))
        .collect::<Vec<_>>();
    if causes.is_empty() {
        return None;
    }
    causes.reverse();
    let msg = format!("Caused by:\n  {:}", causes.join("\n  "));
    Some(msg)
}

fn get_anyhow_error(error: &Error) -> &anyhow::Error {
    match error {
        Error::Anyhow(e) => e,
        Error::Calibration(CalibrationError::Anyhow(e)) => e,
    }
}

fn create_python_error_message(error: &Error) -> String {
    if let Some(error_context) = create_context_message(get_anyhow_error(error)) {
        return format!("{error}\n{error_context}");
    }
    format!("{error}")
}

fn find_python_root_cause(error: &Error) -> Option<&PyErr> {
    let err = get_anyhow_error(error).root_cause();
    if let Some(py_err) = err.downcast_ref::<PyErr>() {
        return Some(py_err);
    }
    match err.downcast_ref::<CalibrationError>() {
        Some(CalibrationError::Anyhow(e)) => e.root_cause().downcast_ref::<PyErr>(),
        None => None,
    }
}
