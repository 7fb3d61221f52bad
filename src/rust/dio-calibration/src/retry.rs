// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

/// Outcome of a bounded retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retry<T> {
    /// An attempt produced an accepted value.
    Success { value: T, attempts: usize },
    /// No attempt was accepted; `last` is the value of the final attempt.
    Exhausted { last: T, attempts: usize },
}

impl<T> Retry<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Retry::Success { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            Retry::Success { attempts, .. } | Retry::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Retry::Success { value, .. } => value,
            Retry::Exhausted { last, .. } => last,
        }
    }
}

/// Run `attempt` until `accept` approves its value, at most `1 + retries` times.
///
/// `attempt` receives the zero-based attempt number, so it can run recovery
/// actions before every retry. Errors of `attempt` abort the loop immediately.
pub fn retry_bounded<T, E, F, P>(retries: usize, mut attempt: F, mut accept: P) -> Result<Retry<T>, E>
where
    F: FnMut(usize) -> Result<T, E>,
    P: FnMut(&T) -> bool,
{
    let mut attempts = 0;
    loop {
        let value = attempt(attempts)?;
        attempts += 1;
        if accept(&value) {
            return Ok(Retry::Success { value, attempts });
        }
        if attempts > retries {
            return Ok(Retry::Exhausted {
                last: value,
                attempts,
            });
        }
    }
}
