//! Error taxonomy for the gs_usb bridge.
//!
//! Values are small and `Copy` rather than heap-allocated, matching the
//! rest of this `no_std` crate: a control-request failure only ever needs
//! to become a stalled USB transfer, never a formatted string.

/// A control-request or pipeline failure.
///
/// `NoMemory` (buffer pool exhaustion) is deliberately not a variant here:
/// it never becomes a control-request outcome, only the `OVERFLOW` frame
/// flag (see `pool::AllocError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum GsError {
    /// Bad channel index, bad payload length, or an unknown enum value.
    Invalid,
    /// The channel must be stopped to accept this request.
    Busy,
    /// The feature, callback, or host byte order is not supported.
    NotSupported,
    /// The controller or channel is not ready.
    NoDevice,
    /// A controller-specific error, propagated verbatim.
    Controller(i32),
}
