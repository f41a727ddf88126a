//! Per-channel state and the pure functions that derive it.

use core::sync::atomic::{AtomicU16, Ordering};

use crate::ops::Capabilities;
use crate::wire::Feature;

/// Per-channel state (§3 Data Model). `mode`/`started` are written only by
/// the control dispatcher; `busoff` is written only by the state-change
/// callback (§5 single-owner discipline).
pub struct Channel {
    features: Feature,
    mode: Feature,
    started: bool,
    busoff: bool,
    overflow: AtomicU16,
}

/// Bound on the overflow counter; arbitrary but generous, matching a
/// counting semaphore's usual small capacity.
const MAX_OVERFLOW: u16 = u16::MAX;

impl Channel {
    pub fn new(features: Feature) -> Self {
        Self {
            features,
            mode: Feature::empty(),
            started: false,
            busoff: false,
            overflow: AtomicU16::new(0),
        }
    }

    pub fn features(&self) -> Feature {
        self.features
    }

    pub fn mode(&self) -> Feature {
        self.mode
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn busoff(&self) -> bool {
        self.busoff
    }

    /// Invariant 1: mode is always a subset of features.
    pub fn try_start(&mut self, flags: Feature) -> Result<(), ()> {
        if !self.features.contains(flags) {
            return Err(());
        }
        self.mode = flags;
        self.started = true;
        Ok(())
    }

    /// Revert a failed MODE=START after `set_mode`/`start` failed on the
    /// controller (REDESIGN FLAGS: unlike the legacy source, `mode` is not
    /// left dangling).
    pub fn revert_start(&mut self) {
        self.mode = Feature::empty();
        self.started = false;
    }

    pub fn set_busoff(&mut self, busoff: bool) {
        self.busoff = busoff;
    }

    /// Clears `mode`/`started`/`busoff` and drains the overflow counter.
    /// The caller is responsible for requesting the controller `stop()`
    /// and treating an already-stopped controller as success.
    pub fn reset(&mut self) {
        self.mode = Feature::empty();
        self.started = false;
        self.busoff = false;
        self.overflow.store(0, Ordering::Relaxed);
    }

    /// Invariant 5: increments on failed RX/error-frame allocation.
    pub fn mark_overflow(&self) {
        self.overflow
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_add(1).min(MAX_OVERFLOW))
            })
            .ok();
    }

    /// If the counter is non-zero, decrements it and returns `true` (the
    /// caller should set `OVERFLOW` on the frame it's about to deliver).
    pub fn take_overflow(&self) -> bool {
        self.overflow
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v == 0 {
                    None
                } else {
                    Some(v - 1)
                }
            })
            .is_ok()
    }
}

/// Maps CAN-controller capability bits to gs_usb feature bits.
pub fn features_from_capabilities(caps: Capabilities) -> Feature {
    let mut features = Feature::empty();
    if caps.contains(Capabilities::LOOP_BACK) {
        features |= Feature::LOOP_BACK;
    }
    if caps.contains(Capabilities::LISTEN_ONLY) {
        features |= Feature::LISTEN_ONLY;
    }
    if caps.contains(Capabilities::FD) {
        features |= Feature::FD | Feature::BT_CONST_EXT;
    }
    if caps.contains(Capabilities::ONE_SHOT) {
        features |= Feature::ONE_SHOT;
    }
    if caps.contains(Capabilities::TRIPLE_SAMPLE) {
        features |= Feature::TRIPLE_SAMPLE;
    }
    features
}

/// Adds features derived from which `Ops` callbacks are actually wired up
/// (REDESIGN FLAGS: runtime capability detection, not a Cargo feature).
pub fn features_from_ops(has_timestamp: bool, has_identify: bool, has_termination: bool) -> Feature {
    let mut features = Feature::empty();
    if has_timestamp {
        features |= Feature::HW_TIMESTAMP;
    }
    if has_identify {
        features |= Feature::IDENTIFY;
    }
    if has_termination {
        features |= Feature::TERMINATION;
    }
    features
}

/// Baseline features every channel advertises.
pub fn baseline_features() -> Feature {
    Feature::GET_STATE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_start_requires_subset_of_features() {
        let mut ch = Channel::new(Feature::LOOP_BACK | Feature::GET_STATE);
        assert!(ch.try_start(Feature::LOOP_BACK | Feature::FD).is_err());
        assert!(!ch.started());
        assert!(ch.try_start(Feature::LOOP_BACK).is_ok());
        assert!(ch.started());
        assert_eq!(ch.mode(), Feature::LOOP_BACK);
    }

    #[test]
    fn revert_start_clears_mode_and_started() {
        let mut ch = Channel::new(Feature::LOOP_BACK);
        ch.try_start(Feature::LOOP_BACK).unwrap();
        ch.revert_start();
        assert!(!ch.started());
        assert_eq!(ch.mode(), Feature::empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut ch = Channel::new(Feature::LOOP_BACK);
        ch.try_start(Feature::LOOP_BACK).unwrap();
        ch.set_busoff(true);
        ch.reset();
        assert!(!ch.started());
        assert!(!ch.busoff());
        ch.reset();
        assert!(!ch.started());
    }

    #[test]
    fn overflow_counter_tracks_one_per_dropped_frame() {
        let ch = Channel::new(Feature::empty());
        assert!(!ch.take_overflow());
        ch.mark_overflow();
        ch.mark_overflow();
        assert!(ch.take_overflow());
        assert!(ch.take_overflow());
        assert!(!ch.take_overflow());
    }

    #[test]
    fn features_from_capabilities_maps_fd_to_bt_const_ext() {
        let features = features_from_capabilities(Capabilities::FD);
        assert!(features.contains(Feature::FD));
        assert!(features.contains(Feature::BT_CONST_EXT));
    }

    #[test]
    fn features_from_ops_are_independent() {
        let features = features_from_ops(true, false, true);
        assert!(features.contains(Feature::HW_TIMESTAMP));
        assert!(!features.contains(Feature::IDENTIFY));
        assert!(features.contains(Feature::TERMINATION));
    }
}
