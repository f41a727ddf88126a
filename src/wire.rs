//! gs_usb wire format: control payload structs and the host frame layout.
//!
//! Every multi-byte field is little-endian on the wire. Structs are
//! `#[repr(C)]` and packed/unpacked with `zerocopy` rather than hand-rolled
//! byte shuffling, matching how the rest of the `usb-device` class ecosystem
//! does it.

use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::GsError;

/// Vendor control request codes (`bRequest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Request {
    HostFormat = 0,
    BitTiming = 1,
    Mode = 2,
    Berr = 3,
    BitTimingConst = 4,
    DeviceConfig = 5,
    Timestamp = 6,
    Identify = 7,
    GetUserId = 8,
    SetUserId = 9,
    DataBitTiming = 10,
    BitTimingConstExtended = 11,
    SetTermination = 12,
    GetTermination = 13,
    GetState = 14,
}

impl TryFrom<u8> for Request {
    type Error = GsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::HostFormat,
            1 => Self::BitTiming,
            2 => Self::Mode,
            3 => Self::Berr,
            4 => Self::BitTimingConst,
            5 => Self::DeviceConfig,
            6 => Self::Timestamp,
            7 => Self::Identify,
            8 => Self::GetUserId,
            9 => Self::SetUserId,
            10 => Self::DataBitTiming,
            11 => Self::BitTimingConstExtended,
            12 => Self::SetTermination,
            13 => Self::GetTermination,
            14 => Self::GetState,
            _ => return Err(GsError::NotSupported),
        })
    }
}

/// Expected `HostConfig.byte_order` for a little-endian host.
pub const HOST_FORMAT_LE: u32 = 0x0000_beef;

/// Tells the device the byte order of the host.
#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct HostConfig {
    pub byte_order: u32,
}

/// Device configuration, returned for `DEVICE_CONFIG`.
#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceConfig {
    _reserved0: u8,
    _reserved1: u8,
    _reserved2: u8,
    pub interface_count: u8,
    pub software_version: u32,
    pub hardware_version: u32,
}

impl DeviceConfig {
    /// `channels` is the number of CAN channels (1..=256); the wire format
    /// encodes `channels - 1`.
    pub fn new(channels: u8, software_version: u32, hardware_version: u32) -> Self {
        assert!(channels > 0);
        Self {
            _reserved0: 0,
            _reserved1: 0,
            _reserved2: 0,
            interface_count: channels - 1,
            software_version,
            hardware_version,
        }
    }
}

/// `MODE` request's `mode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Mode {
    Reset = 0,
    Start = 1,
}

impl TryFrom<u32> for Mode {
    type Error = GsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reset),
            1 => Ok(Self::Start),
            _ => Err(GsError::Invalid),
        }
    }
}

#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceMode {
    pub mode: u32,
    pub flags: Feature,
}

/// Controller state, matching Linux netlink `can_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u32)]
pub enum CanState {
    /// RX/TX error count < 96.
    Active = 0,
    /// RX/TX error count < 128.
    Warning = 1,
    /// RX/TX error count < 256.
    Passive = 2,
    /// RX/TX error count >= 256.
    BusOff = 3,
    /// Channel is stopped.
    Stopped = 4,
    /// Channel is asleep.
    Sleeping = 5,
}

#[derive(Debug, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceState {
    pub state: CanState,
    pub rx_errors: u32,
    pub tx_errors: u32,
}

#[derive(Debug, Clone, Copy, Default, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceBitTiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub brp: u32,
}

#[derive(Debug, Clone, Copy, Default, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct CanBitTimingConst {
    pub tseg1_min: u32,
    pub tseg1_max: u32,
    pub tseg2_min: u32,
    pub tseg2_max: u32,
    pub sjw_max: u32,
    pub brp_min: u32,
    pub brp_max: u32,
    pub brp_inc: u32,
}

/// Feature flags advertised by a channel and requested in `DeviceMode.flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct Feature(u32);

bitflags! {
    impl Feature: u32 {
        const LISTEN_ONLY = 1 << 0;
        const LOOP_BACK = 1 << 1;
        const TRIPLE_SAMPLE = 1 << 2;
        const ONE_SHOT = 1 << 3;
        const HW_TIMESTAMP = 1 << 4;
        const IDENTIFY = 1 << 5;
        const USER_ID = 1 << 6;
        const PAD_PKTS_TO_MAX_PKT_SIZE = 1 << 7;
        const FD = 1 << 8;
        const REQ_USB_QUIRK_LPC546XX = 1 << 9;
        const BT_CONST_EXT = 1 << 10;
        const TERMINATION = 1 << 11;
        const BERR_REPORTING = 1 << 12;
        const GET_STATE = 1 << 13;
    }
}

#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceBitTimingConst {
    pub features: Feature,
    pub fclk_can: u32,
    pub timing: CanBitTimingConst,
}

#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceBitTimingConstExtended {
    pub features: Feature,
    pub fclk_can: u32,
    pub timing_nominal: CanBitTimingConst,
    pub timing_data: CanBitTimingConst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u32)]
pub enum IdentifyModeValue {
    Off = 0,
    On = 1,
}

impl TryFrom<u32> for IdentifyModeValue {
    type Error = GsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            _ => Err(GsError::Invalid),
        }
    }
}

#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct IdentifyMode {
    pub mode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u32)]
pub enum TerminationValue {
    Off = 0,
    On = 1,
}

impl TryFrom<u32> for TerminationValue {
    type Error = GsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            _ => Err(GsError::Invalid),
        }
    }
}

#[derive(Debug, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct DeviceTerminationState {
    pub state: u32,
}

impl DeviceTerminationState {
    pub fn new(on: bool) -> Self {
        Self {
            state: if on { 1 } else { 0 },
        }
    }
}

/// `echo_id` value reserved for device-originated RX/error frames.
pub const RX_ECHO_ID: u32 = 0xFFFF_FFFF;

/// Maximum classic CAN payload.
pub const CLASSIC_MAX_LEN: usize = 8;
/// Maximum CAN FD payload.
pub const FD_MAX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct ClassicCan {
    pub data: [u8; CLASSIC_MAX_LEN],
    _padding: [u8; FD_MAX_LEN - CLASSIC_MAX_LEN],
}

#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct CanFd {
    pub data: [u8; FD_MAX_LEN],
}

#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub union CanData {
    pub classic: ClassicCan,
    pub fd: CanFd,
}

/// Frame flags (`gs_host_frame.flags`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct FrameFlag(u8);

bitflags! {
    impl FrameFlag: u8 {
        /// RX overflow occurred; a frame was dropped before this one.
        const OVERFLOW = 1 << 0;
        /// CAN FD frame.
        const FD = 1 << 1;
        /// CAN FD bit-rate switch in use.
        const BRS = 1 << 2;
        /// CAN FD error state indicator.
        const ESI = 1 << 3;
    }
}

/// Identifier flags embedded in `Frame.can_id`.
#[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(C)]
pub struct IdFlag(u32);

bitflags! {
    impl IdFlag: u32 {
        const EXTENDED = 0x8000_0000;
        const REMOTE = 0x4000_0000;
        const ERROR = 0x2000_0000;
    }
}

pub const STANDARD_MASK: u32 = 0x0000_07FF;
pub const EXTENDED_MASK: u32 = 0x1FFF_FFFF;

/// 12-byte host frame header, always present.
pub const HEADER_LEN: usize = 12;
/// Trailing timestamp length, present only when the channel has
/// `HW_TIMESTAMP`.
pub const TIMESTAMP_LEN: usize = 4;
/// Largest possible on-wire frame: header + FD payload + timestamp. Used
/// only to size a scratch buffer; the device's actual wire length is
/// fixed and usually smaller (see [`wire_len`]).
pub const MAX_WIRE_LEN: usize = HEADER_LEN + FD_MAX_LEN + TIMESTAMP_LEN;

/// The number of bytes a host frame occupies on the wire for a device
/// built with FD support (`fd`) and/or hardware timestamps
/// (`has_timestamp`). Host frame size is constant for a given device: the
/// in-memory [`Frame`] always reserves room for the FD-sized payload, but
/// a non-FD device only ever puts `CLASSIC_MAX_LEN` bytes of it on the
/// wire.
pub fn wire_len(fd: bool, has_timestamp: bool) -> usize {
    HEADER_LEN
        + if fd { FD_MAX_LEN } else { CLASSIC_MAX_LEN }
        + if has_timestamp { TIMESTAMP_LEN } else { 0 }
}

#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct Frame {
    pub echo_id: u32,
    pub can_id: u32,
    pub can_dlc: u8,
    pub channel: u8,
    pub flags: FrameFlag,
    _reserved0: u8,
    pub can_data: CanData,
    pub timestamp_us: u32,
}

impl Frame {
    pub fn zeroed() -> Self {
        Self::new_zeroed()
    }

    /// Encodes this frame into `out` using the on-wire layout selected by
    /// `fd`/`has_timestamp`, and returns the number of bytes written
    /// (`wire_len(fd, has_timestamp)`). The in-memory `can_data` union is
    /// always FD-sized, so for a classic device the payload bytes on the
    /// wire are not contiguous with the timestamp in memory; this copies
    /// only the bytes that belong on the wire rather than slicing
    /// `as_bytes()` directly.
    pub fn encode_wire(&self, fd: bool, has_timestamp: bool, out: &mut [u8]) -> usize {
        let data_len = if fd { FD_MAX_LEN } else { CLASSIC_MAX_LEN };
        out[..HEADER_LEN].copy_from_slice(&self.as_bytes()[..HEADER_LEN]);
        let data = unsafe {
            if fd {
                &self.can_data.fd.data[..]
            } else {
                &self.can_data.classic.data[..]
            }
        };
        out[HEADER_LEN..HEADER_LEN + data_len].copy_from_slice(data);
        let mut len = HEADER_LEN + data_len;
        if has_timestamp {
            out[len..len + TIMESTAMP_LEN].copy_from_slice(&self.timestamp_us.to_le_bytes());
            len += TIMESTAMP_LEN;
        }
        len
    }

    /// Decodes `bytes` (exactly `wire_len(fd, has_timestamp)` long) into a
    /// fresh frame.
    pub fn decode_wire(fd: bool, has_timestamp: bool, bytes: &[u8]) -> Result<Self, GsError> {
        let data_len = if fd { FD_MAX_LEN } else { CLASSIC_MAX_LEN };
        let expected = HEADER_LEN + data_len + if has_timestamp { TIMESTAMP_LEN } else { 0 };
        if bytes.len() != expected {
            return Err(GsError::Invalid);
        }
        let mut frame = Self::zeroed();
        frame.as_bytes_mut()[..HEADER_LEN].copy_from_slice(&bytes[..HEADER_LEN]);
        unsafe {
            if fd {
                frame.can_data.fd.data.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + data_len]);
            } else {
                frame.can_data.classic.data.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + data_len]);
            }
        }
        if has_timestamp {
            let ts = &bytes[HEADER_LEN + data_len..HEADER_LEN + data_len + TIMESTAMP_LEN];
            frame.timestamp_us = u32::from_le_bytes(ts.try_into().unwrap());
        }
        Ok(frame)
    }

    pub fn is_extended(&self) -> bool {
        (self.can_id & IdFlag::EXTENDED.bits()) != 0
    }

    pub fn is_remote(&self) -> bool {
        (self.can_id & IdFlag::REMOTE.bits()) != 0
    }

    pub fn is_error(&self) -> bool {
        (self.can_id & IdFlag::ERROR.bits()) != 0
    }

    pub fn id(&self) -> Id {
        if self.is_extended() {
            let masked = self.can_id & EXTENDED_MASK;
            Id::Extended(ExtendedId::new(masked).unwrap())
        } else {
            let masked = self.can_id & STANDARD_MASK;
            Id::Standard(StandardId::new(masked as u16).unwrap())
        }
    }

    pub fn set_id(&mut self, id: Id) {
        match id {
            Id::Standard(id) => self.can_id = id.as_raw() as u32,
            Id::Extended(id) => self.can_id = id.as_raw() | IdFlag::EXTENDED.bits(),
        }
    }

    /// Data length in bytes implied by `can_dlc`, accounting for CAN FD's
    /// non-linear DLC coding.
    pub fn data_len(&self) -> Result<usize, GsError> {
        if self.flags.contains(FrameFlag::FD) {
            fd_dlc_to_len(self.can_dlc).ok_or(GsError::Invalid)
        } else {
            if self.can_dlc as usize > CLASSIC_MAX_LEN {
                return Err(GsError::Invalid);
            }
            Ok(self.can_dlc as usize)
        }
    }

    pub fn data(&self) -> &[u8] {
        let len = self.data_len().unwrap_or(0);
        if self.flags.contains(FrameFlag::FD) {
            unsafe { &self.can_data.fd.data[..len] }
        } else {
            unsafe { &self.can_data.classic.data[..len] }
        }
    }

    pub fn set_data(&mut self, data: &[u8]) {
        if self.flags.contains(FrameFlag::FD) {
            unsafe { self.can_data.fd.data[..data.len()].copy_from_slice(data) };
        } else {
            unsafe { self.can_data.classic.data[..data.len()].copy_from_slice(data) };
        }
    }

    /// Zero-fill the payload back to its full (classic or FD) length,
    /// used when building a TX echo frame.
    pub fn zero_pad_data(&mut self) {
        unsafe {
            if self.flags.contains(FrameFlag::FD) {
                self.can_data.fd.data = [0u8; FD_MAX_LEN];
            } else {
                self.can_data.classic.data = [0u8; CLASSIC_MAX_LEN];
            }
        }
    }
}

/// Maps a DLC (0..=15) to the CAN FD payload length it represents.
pub fn fd_dlc_to_len(dlc: u8) -> Option<usize> {
    match dlc {
        0..=8 => Some(dlc as usize),
        9 => Some(12),
        10 => Some(16),
        11 => Some(20),
        12 => Some(24),
        13 => Some(32),
        14 => Some(48),
        15 => Some(64),
        _ => None,
    }
}

/// Maps a payload length to the DLC that represents it, if any.
pub fn fd_len_to_dlc(len: usize) -> Option<u8> {
    match len {
        0..=8 => Some(len as u8),
        12 => Some(9),
        16 => Some(10),
        20 => Some(11),
        24 => Some(12),
        32 => Some(13),
        48 => Some(14),
        64 => Some(15),
        _ => None,
    }
}

/// Validates a control payload's length against `T`'s wire size before
/// interpreting it, per Invariant 4.1 ("lengths are exact").
pub fn decode<T: FromBytes>(data: &[u8]) -> Result<&T, GsError> {
    if data.len() != core::mem::size_of::<T>() {
        return Err(GsError::Invalid);
    }
    T::ref_from(data).ok_or(GsError::Invalid)
}
