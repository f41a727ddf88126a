//! Control-request handlers (§4.4), decoupled from the USB transfer glue
//! in `lib.rs` so each request's validation logic stands on its own.
//!
//! Every handler here first decodes its payload with `wire::decode`
//! (exact-length check, Invariant 4.1) and then enforces the request's own
//! invariants (channel started/stopped, feature presence, ...).

use crate::channel::Channel;
use crate::error::GsError;
use crate::ops::{CanController, Event, Ops};
use crate::wire::{
    self, CanState, DeviceBitTiming, DeviceBitTimingConst, DeviceBitTimingConstExtended,
    DeviceConfig, DeviceMode, DeviceState, DeviceTerminationState, Feature, HostConfig,
    IdentifyMode, IdentifyModeValue, Mode, TerminationValue,
};

pub fn host_format(data: &[u8]) -> Result<(), GsError> {
    let config: &HostConfig = wire::decode(data)?;
    if config.byte_order != wire::HOST_FORMAT_LE {
        return Err(GsError::NotSupported);
    }
    Ok(())
}

/// Invariant 2: only a stopped channel may accept a timing change.
pub fn bit_timing<C: CanController>(
    channel: &Channel,
    controller: &mut C,
    data: &[u8],
) -> Result<(), GsError> {
    let timing: &DeviceBitTiming = wire::decode(data)?;
    if channel.started() {
        return Err(GsError::Busy);
    }
    let mapped = crate::bittiming::map_timing(*timing, &controller.timing_limits());
    controller
        .set_timing(mapped)
        .map_err(|e| GsError::Controller(e.into()))
}

pub fn data_bit_timing<C: CanController>(
    channel: &Channel,
    controller: &mut C,
    data: &[u8],
) -> Result<(), GsError> {
    let timing: &DeviceBitTiming = wire::decode(data)?;
    if !channel.features().contains(Feature::FD) {
        return Err(GsError::NotSupported);
    }
    if channel.started() {
        return Err(GsError::Busy);
    }
    let mapped = crate::bittiming::map_timing(*timing, &controller.timing_data_limits());
    controller
        .set_timing_data(mapped)
        .map_err(|e| GsError::Controller(e.into()))
}

/// MODE=RESET / MODE=START (§4.4), including the REDESIGN FLAGS fix: a
/// failed START reverts `mode`/`started` instead of leaving them dangling.
pub fn mode<C: CanController, O: Ops>(
    channel_index: u8,
    channel: &mut Channel,
    controller: &mut C,
    ops: &mut O,
    data: &[u8],
) -> Result<(), GsError> {
    let req: &DeviceMode = wire::decode(data)?;
    match Mode::try_from(req.mode)? {
        Mode::Reset => {
            channel.reset();
            controller.stop().map_err(|e| GsError::Controller(e.into()))?;
            ops.event(channel_index, Event::Stopped);
            Ok(())
        }
        Mode::Start => {
            channel.try_start(req.flags).map_err(|_| GsError::NotSupported)?;
            if let Err(e) = controller.set_mode(req.flags).and_then(|_| controller.start()) {
                channel.revert_start();
                return Err(GsError::Controller(e.into()));
            }
            ops.event(channel_index, Event::Started);
            Ok(())
        }
    }
}

pub fn identify<O: Ops>(
    channel_index: u8,
    channel: &Channel,
    ops: &mut O,
    data: &[u8],
) -> Result<(), GsError> {
    let req: &IdentifyMode = wire::decode(data)?;
    if !channel.features().contains(Feature::IDENTIFY) {
        return Err(GsError::NotSupported);
    }
    match IdentifyModeValue::try_from(req.mode)? {
        IdentifyModeValue::On => ops.event(channel_index, Event::IdentifyOn),
        IdentifyModeValue::Off => ops.event(channel_index, Event::IdentifyOff),
    }
    Ok(())
}

pub fn set_termination<O: Ops>(
    channel_index: u8,
    channel: &Channel,
    ops: &mut O,
    data: &[u8],
) -> Result<(), GsError> {
    let req: &DeviceTerminationState = wire::decode(data)?;
    if !channel.features().contains(Feature::TERMINATION) {
        return Err(GsError::NotSupported);
    }
    let on = TerminationValue::try_from(req.state)? == TerminationValue::On;
    ops.set_termination(channel_index, on).ok_or(GsError::NotSupported)?
}

pub fn get_termination<O: Ops>(channel: &Channel, ops: &mut O, channel_index: u8) -> Result<DeviceTerminationState, GsError> {
    if !channel.features().contains(Feature::TERMINATION) {
        return Err(GsError::NotSupported);
    }
    let on = ops.get_termination(channel_index).ok_or(GsError::NotSupported)?;
    Ok(DeviceTerminationState::new(on))
}

pub fn bt_const<C: CanController>(channel: &Channel, controller: &C) -> DeviceBitTimingConst {
    DeviceBitTimingConst {
        features: channel.features(),
        fclk_can: controller.core_clock_hz(),
        timing: controller.timing_limits(),
    }
}

pub fn bt_const_ext<C: CanController>(
    channel: &Channel,
    controller: &C,
) -> Result<DeviceBitTimingConstExtended, GsError> {
    if !channel.features().contains(Feature::FD) {
        return Err(GsError::NotSupported);
    }
    Ok(DeviceBitTimingConstExtended {
        features: channel.features(),
        fclk_can: controller.core_clock_hz(),
        timing_nominal: controller.timing_limits(),
        timing_data: controller.timing_data_limits(),
    })
}

pub fn device_config(channels: u8, software_version: u32, hardware_version: u32) -> DeviceConfig {
    DeviceConfig::new(channels, software_version, hardware_version)
}

pub fn timestamp<O: Ops>(ops: &mut O) -> Result<u32, GsError> {
    ops.timestamp().ok_or(GsError::NotSupported)
}

pub fn get_state<C: CanController>(controller: &C) -> DeviceState {
    let (state, rx_errors, tx_errors) = controller.state();
    DeviceState {
        state,
        rx_errors,
        tx_errors,
    }
}

/// Maps a raw controller error-passive/warning/active/bus-off reading into
/// the gs_usb enum; `Stopped` is reported by the caller directly from
/// `channel.started()` rather than through this function, matching §4.4's
/// GET_STATE note that STOPPED is a channel-level, not controller-level,
/// condition.
pub fn channel_state(channel: &Channel, controller_state: CanState) -> CanState {
    if !channel.started() {
        CanState::Stopped
    } else {
        controller_state
    }
}
