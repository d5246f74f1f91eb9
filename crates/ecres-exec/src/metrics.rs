//! Tracing hooks for committed and failed operations.
//!
//! Only `tracing` events are emitted; wire a subscriber (or an exporter on
//! top of one) in the binary layer.

use std::fmt::Display;

use ecres_core::Error;

#[cfg(feature = "tracing")]
pub fn committed(op: &'static str, target: impl Display, steps: usize) {
    tracing::debug!(op, %target, steps, "committed");
}

#[cfg(not(feature = "tracing"))]
pub fn committed(_op: &'static str, _target: impl Display, _steps: usize) { /* no-op */
}

/// Log a failed operation and hand the error back.
#[cfg(feature = "tracing")]
pub fn failed(op: &'static str, err: Error) -> Error {
    match &err {
        Error::Fatal(f) => tracing::error!(op, error = %f, "device state is no longer trustworthy"),
        Error::Exhausted(r) => tracing::warn!(op, resource = %r, "exhausted"),
        other => tracing::debug!(op, error = %other, "rejected"),
    }
    err
}

#[cfg(not(feature = "tracing"))]
pub fn failed(_op: &'static str, err: Error) -> Error {
    err
}
