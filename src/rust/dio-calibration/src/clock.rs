// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Reference clock control and the strobe symmetry recovery built on it.

use std::collections::BTreeSet;

use anyhow::Context;

use crate::Result;
use crate::device::{AwgIndex, ClockSource, ClockStatus, DioDevice, Register, TraceNode};
use crate::observer::{CalibrationEvent, CalibrationObserver};
use crate::protocol::ProtocolDescriptor;
use crate::retry::{Retry, retry_bounded};
use crate::settings::CalibrationSettings;
use crate::symmetry::is_symmetric;

/// Enable state of every AWG core at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableSnapshot {
    enables: Vec<(AwgIndex, i64)>,
}

impl EnableSnapshot {
    pub fn capture<D: DioDevice + ?Sized>(device: &mut D) -> Result<Self> {
        let enables = (0..device.awg_count())
            .map(|awg| Ok((awg, device.get_integer(Register::Enable, awg)?)))
            .collect::<Result<_>>()?;
        Ok(EnableSnapshot { enables })
    }

    pub fn disable_all<D: DioDevice + ?Sized>(&self, device: &mut D) -> Result<()> {
        for &(awg, _) in &self.enables {
            device
                .set_integer(Register::Enable, awg, 0)
                .with_context(|| format!("Failed to disable AWG {awg}"))?;
        }
        Ok(())
    }

    /// Write the captured enable state back.
    ///
    /// Every AWG core is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn restore<D: DioDevice + ?Sized>(&self, device: &mut D) -> Result<()> {
        let mut first_error = None;
        for &(awg, enable) in &self.enables {
            if let Err(err) = device
                .set_integer(Register::Enable, awg, enable)
                .with_context(|| format!("Failed to restore enable state of AWG {awg}"))
            {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Poll the reference clock status until it leaves the syncing state, for
/// at most `clock_sync_polls` polls. Returns the last status seen.
pub fn wait_for_clock_sync<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
) -> Result<ClockStatus> {
    let mut status = device.clock_status()?;
    for _ in 1..settings.clock_sync_polls {
        if status != ClockStatus::Syncing {
            break;
        }
        device.sleep(settings.clock_poll_interval());
        status = device.clock_status()?;
    }
    Ok(status)
}

fn toggle_reference_clock<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
    snapshot: &EnableSnapshot,
) -> Result<ClockStatus> {
    snapshot.disable_all(device)?;
    device
        .set_clock_source(ClockSource::Internal)
        .context("Failed to switch to the internal reference clock")?;
    device.sleep(settings.clock_settle_time());
    device
        .set_clock_source(ClockSource::External)
        .context("Failed to switch to the external reference clock")?;
    device.sleep(settings.clock_settle_time());
    wait_for_clock_sync(device, settings)
}

/// Resynchronise the instrument to the external reference clock.
///
/// All AWG cores are disabled while the clock source is switched to internal
/// and back to external, and their enable state is restored afterwards, also
/// when the switch failed. Returns whether the clock reports sync.
pub fn resync_reference_clock<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
) -> Result<bool> {
    let snapshot = EnableSnapshot::capture(device)?;
    let toggled = toggle_reference_clock(device, settings, &snapshot);
    let restored = snapshot.restore(device);
    let status = toggled?;
    restored?;
    Ok(status == ClockStatus::Synced)
}

/// Make sure the instrument runs on a synced external reference clock.
///
/// The switch is retried when the instrument fell back to the internal
/// reference. Returns whether the external reference was reached.
pub fn ensure_external_clock<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
) -> Result<bool> {
    if device.clock_source()? == ClockSource::External
        && device.clock_status()? == ClockStatus::Synced
    {
        return Ok(true);
    }
    log::info!("Switching to external clock. This could take a while!");
    let outcome = retry_bounded(
        settings.max_clock_resyncs,
        |attempt| -> Result<bool> {
            if attempt > 0 {
                log::warn!("Switching to external clock failed. Trying again.");
            }
            device.set_clock_source(ClockSource::External)?;
            let status = wait_for_clock_sync(device, settings)?;
            Ok(status == ClockStatus::Synced && device.clock_source()? == ClockSource::External)
        },
        |&synced| synced,
    )?;
    Ok(outcome.is_success())
}

/// Strobe bit indices used by any AWG core of the device, deduplicated.
pub fn strobe_bits<D: DioDevice + ?Sized>(device: &mut D) -> Result<Vec<u8>> {
    let mut bits = BTreeSet::new();
    for awg in 0..device.awg_count() {
        bits.insert(ProtocolDescriptor::read(device, awg)?.strobe_index);
    }
    Ok(bits.into_iter().collect())
}

/// Capture the device-wide DIO bus until the strobe has been symmetric for
/// the required number of consecutive captures.
///
/// Every asymmetric capture triggers a reference clock resynchronisation. The
/// strobe is declared asymmetric once `max_clock_resyncs` resynchronisations
/// in a row did not produce a symmetric capture.
pub fn ensure_symmetric_strobe<D: DioDevice + ?Sized>(
    device: &mut D,
    settings: &CalibrationSettings,
    observer: &mut dyn CalibrationObserver,
) -> Result<bool> {
    let bits = strobe_bits(device)?;
    observer.notify(&CalibrationEvent::AnalyzingStrobeBits { bits: bits.clone() });

    let mut consecutive = 0;
    while consecutive < settings.symmetric_captures_required {
        let outcome = retry_bounded(
            settings.max_clock_resyncs,
            |attempt| -> Result<bool> {
                if attempt > 0 {
                    observer.notify(&CalibrationEvent::ClockResync { attempt });
                    if !resync_reference_clock(device, settings)? {
                        observer.notify(&CalibrationEvent::ClockSyncTimeout);
                    }
                }
                let trace = device
                    .get_vector(TraceNode::RawDio)
                    .context("Failed to capture the DIO bus")?;
                let symmetric = is_symmetric(&trace, &bits);
                if !symmetric {
                    observer.notify(&CalibrationEvent::AsymmetricCapture);
                }
                Ok(symmetric)
            },
            |&symmetric| symmetric,
        )?;
        consecutive = match outcome {
            Retry::Success { attempts: 1, .. } => consecutive + 1,
            // An asymmetric capture restarts the count.
            Retry::Success { .. } => 1,
            Retry::Exhausted { .. } => {
                observer.notify(&CalibrationEvent::StrobeAsymmetric);
                return Ok(false);
            }
        };
        observer.notify(&CalibrationEvent::SymmetricCapture { consecutive });
    }
    observer.notify(&CalibrationEvent::StrobeSymmetric);
    Ok(true)
}
