//! Collaborator contracts: the CAN controller driver and the embedder's
//! board-level operations. Both are narrow traits the embedder implements;
//! this crate never talks to hardware directly.

use bitflags::bitflags;

use crate::error::GsError;
use crate::wire::{CanBitTimingConst, CanState, DeviceBitTiming, Frame};

/// Capability bits a CAN controller reports at registration time.
///
/// These drive `channel::features_from_capabilities` — see the REDESIGN
/// FLAGS note: capability is detected at runtime, never gated by a Cargo
/// feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct Capabilities(u32);

bitflags! {
    impl Capabilities: u32 {
        const LOOP_BACK = 1 << 0;
        const LISTEN_ONLY = 1 << 1;
        const FD = 1 << 2;
        const ONE_SHOT = 1 << 3;
        const TRIPLE_SAMPLE = 1 << 4;
    }
}

/// A single CAN controller channel, as seen by the bridge.
///
/// One instance per channel; `GsCan` holds `[C; N]`.
pub trait CanController {
    /// Error type propagated as `GsError::Controller`.
    type Error: Into<i32>;

    fn capabilities(&self) -> Capabilities;
    fn core_clock_hz(&self) -> u32;
    fn timing_limits(&self) -> CanBitTimingConst;
    /// Only called if `capabilities()` reports `FD`.
    fn timing_data_limits(&self) -> CanBitTimingConst;

    fn set_timing(&mut self, timing: DeviceBitTiming) -> Result<(), Self::Error>;
    /// Only called if `capabilities()` reports `FD`.
    fn set_timing_data(&mut self, timing: DeviceBitTiming) -> Result<(), Self::Error>;

    /// Translate gs_usb mode flags (`wire::Feature` subset) into whatever
    /// the controller driver needs before `start()`.
    fn set_mode(&mut self, flags: crate::wire::Feature) -> Result<(), Self::Error>;
    fn start(&mut self) -> Result<(), Self::Error>;
    /// Stopping an already-stopped controller is success (Invariant 3 /
    /// `channel::reset`).
    fn stop(&mut self) -> Result<(), Self::Error>;

    fn state(&self) -> (CanState, u32, u32);

    /// Submit a frame for transmission. `handle` is opaque to the
    /// controller and must be passed back unchanged to
    /// `GsCan::on_tx_complete` from the send-complete interrupt.
    fn send(&mut self, frame: &Frame, handle: crate::pool::BufferHandle) -> Result<(), Self::Error>;
}

/// Event raised to the embedder and to the LED state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Event {
    Started,
    Stopped,
    ActivityRx,
    ActivityTx,
    IdentifyOn,
    IdentifyOff,
}

/// Board-level operations the embedder wires up. Every method that models
/// an optional board feature returns `Option` — its absence is runtime
/// capability detection, not a compile-time toggle (REDESIGN FLAGS).
pub trait Ops {
    /// Current free-running microsecond timestamp, if the board has one.
    fn timestamp(&mut self) -> Option<u32> {
        None
    }

    /// Notified of channel state transitions and RX/TX activity; the
    /// default forwards nothing (no LEDs wired up).
    fn event(&mut self, _channel: u8, _event: Event) {}

    /// Drive the termination resistor, if present.
    fn set_termination(&mut self, _channel: u8, _on: bool) -> Option<Result<(), GsError>> {
        None
    }

    /// Read the termination resistor state, if present.
    fn get_termination(&mut self, _channel: u8) -> Option<bool> {
        None
    }

    /// Whether `timestamp()` is wired up. Checked once at registration to
    /// derive `Feature::HW_TIMESTAMP`; must agree with `timestamp()`'s
    /// behaviour.
    fn has_timestamp(&self) -> bool {
        false
    }

    /// Whether IDENTIFY is wired up (drives `Feature::IDENTIFY`).
    fn has_identify(&self) -> bool {
        false
    }

    /// Whether both termination callbacks are wired up (drives
    /// `Feature::TERMINATION`).
    fn has_termination(&self) -> bool {
        false
    }
}
