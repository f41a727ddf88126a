//! Error-frame construction for channel state-change events (§4.5).
//!
//! Bit layout follows the Linux `can.h`/`error.h` convention gs_usb hosts
//! expect, plus the gs_usb-specific `ERR_CRTL_ACTIVE` convention used to
//! signal "back to error-active" on the controller-error byte.

use bitflags::bitflags;

use crate::wire::{CanState, Frame, IdFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
struct ErrId(u32);

bitflags! {
    impl ErrId: u32 {
        const CRTL = 0x0000_0004;
        const BUSOFF = 0x0000_0040;
        const RESTARTED = 0x0000_0100;
        const CNT = 0x0000_0200;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
struct Crtl(u8);

bitflags! {
    impl Crtl: u8 {
        /// Non-standard but used by gs_usb firmwares to mean "error active
        /// again", set on the controller-error byte when a channel
        /// recovers.
        const ACTIVE = 0x01;
        const RX_WARNING = 0x04;
        const TX_WARNING = 0x08;
        const RX_PASSIVE = 0x10;
        const TX_PASSIVE = 0x20;
    }
}

/// Builds the error frame emitted on a controller state transition, or
/// `None` if the transition is not reported (STOPPED/SLEEPING).
pub fn build(prev_busoff: bool, state: CanState, channel: u8, rx_errors: u32, tx_errors: u32) -> Option<Frame> {
    let (crtl_bits, extra_id_bits) = match state {
        CanState::Active => {
            let restarted = if prev_busoff { ErrId::RESTARTED } else { ErrId::empty() };
            (Crtl::ACTIVE, ErrId::CRTL | restarted)
        }
        CanState::Warning => (Crtl::RX_WARNING | Crtl::TX_WARNING, ErrId::CRTL),
        CanState::Passive => (Crtl::RX_PASSIVE | Crtl::TX_PASSIVE, ErrId::CRTL),
        CanState::BusOff => (Crtl::empty(), ErrId::BUSOFF),
        CanState::Stopped | CanState::Sleeping => return None,
    };

    let mut frame = Frame::zeroed();
    frame.echo_id = crate::wire::RX_ECHO_ID;
    frame.channel = channel;
    frame.can_id = IdFlag::ERROR.bits() | (ErrId::CNT | extra_id_bits).bits();
    frame.can_dlc = 8;
    let mut payload = [0u8; 8];
    payload[1] = crtl_bits.bits();
    payload[6] = tx_errors.min(u8::MAX as u32) as u8;
    payload[7] = rx_errors.min(u8::MAX as u32) as u8;
    frame.set_data(&payload);
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busoff_transition_sets_busoff_bit_and_counters() {
        let frame = build(false, CanState::BusOff, 0, 255, 255).unwrap();
        assert_eq!(frame.echo_id, crate::wire::RX_ECHO_ID);
        assert_eq!(frame.can_id & IdFlag::ERROR.bits(), IdFlag::ERROR.bits());
        assert_eq!(frame.can_id & ErrId::BUSOFF.bits(), ErrId::BUSOFF.bits());
        assert_eq!(frame.can_id & ErrId::CRTL.bits(), 0);
        assert_eq!(frame.data()[6], 255);
        assert_eq!(frame.data()[7], 255);
    }

    #[test]
    fn recovery_from_busoff_sets_restarted_and_active() {
        let frame = build(true, CanState::Active, 0, 0, 0).unwrap();
        assert_eq!(frame.can_id & ErrId::CRTL.bits(), ErrId::CRTL.bits());
        assert_eq!(frame.can_id & ErrId::RESTARTED.bits(), ErrId::RESTARTED.bits());
        assert_eq!(frame.data()[1], Crtl::ACTIVE.bits());
    }

    #[test]
    fn recovery_without_prior_busoff_has_no_restarted_bit() {
        let frame = build(false, CanState::Active, 0, 0, 0).unwrap();
        assert_eq!(frame.can_id & ErrId::RESTARTED.bits(), 0);
    }

    #[test]
    fn stopped_transition_is_not_reported() {
        assert!(build(false, CanState::Stopped, 0, 0, 0).is_none());
        assert!(build(false, CanState::Sleeping, 0, 0, 0).is_none());
    }

    #[test]
    fn warning_and_passive_set_both_directions() {
        let warning = build(false, CanState::Warning, 0, 0, 0).unwrap();
        assert_eq!(warning.data()[1], (Crtl::RX_WARNING | Crtl::TX_WARNING).bits());
        let passive = build(false, CanState::Passive, 0, 0, 0).unwrap();
        assert_eq!(passive.data()[1], (Crtl::RX_PASSIVE | Crtl::TX_PASSIVE).bits());
    }
}
