use usb_device::bus::UsbBusAllocator;
use zerocopy::{AsBytes, FromBytes};
use usbd_class_tester::prelude::*;
use usbd_gsusb_bridge::error::GsError;
use usbd_gsusb_bridge::led::LedOutputs;
use usbd_gsusb_bridge::ops::{CanController, Capabilities, Event, Ops};
use usbd_gsusb_bridge::pipeline::RxInput;
use usbd_gsusb_bridge::pool::BufferHandle;
use usbd_gsusb_bridge::wire::{self, CanBitTimingConst, CanState, DeviceBitTiming, DeviceConfig, Feature, Frame};
use usbd_gsusb_bridge::GsCan;

const TIMING_NOMINAL: CanBitTimingConst = CanBitTimingConst {
    tseg1_min: 1,
    tseg1_max: 255,
    tseg2_min: 1,
    tseg2_max: 127,
    sjw_max: 127,
    brp_min: 1,
    brp_max: 511,
    brp_inc: 1,
};
const TIMING_DATA: CanBitTimingConst = CanBitTimingConst {
    tseg1_min: 1,
    tseg1_max: 31,
    tseg2_min: 1,
    tseg2_max: 15,
    sjw_max: 15,
    brp_min: 1,
    brp_max: 31,
    brp_inc: 1,
};

struct MockController {
    capabilities: Capabilities,
    started: bool,
    mode_flags: Feature,
    last_timing: Option<DeviceBitTiming>,
    last_send: Option<(Frame, BufferHandle)>,
    fail_start: bool,
    fail_send: bool,
}

impl Default for MockController {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::FD | Capabilities::LOOP_BACK | Capabilities::LISTEN_ONLY,
            started: false,
            mode_flags: Feature::empty(),
            last_timing: None,
            last_send: None,
            fail_start: false,
            fail_send: false,
        }
    }
}

impl CanController for MockController {
    type Error = i32;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn core_clock_hz(&self) -> u32 {
        80_000_000
    }

    fn timing_limits(&self) -> CanBitTimingConst {
        TIMING_NOMINAL
    }

    fn timing_data_limits(&self) -> CanBitTimingConst {
        TIMING_DATA
    }

    fn set_timing(&mut self, timing: DeviceBitTiming) -> Result<(), i32> {
        self.last_timing = Some(timing);
        Ok(())
    }

    fn set_timing_data(&mut self, timing: DeviceBitTiming) -> Result<(), i32> {
        self.last_timing = Some(timing);
        Ok(())
    }

    fn set_mode(&mut self, flags: Feature) -> Result<(), i32> {
        self.mode_flags = flags;
        Ok(())
    }

    fn start(&mut self) -> Result<(), i32> {
        if self.fail_start {
            return Err(-1);
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), i32> {
        self.started = false;
        Ok(())
    }

    fn state(&self) -> (CanState, u32, u32) {
        (CanState::Active, 0, 0)
    }

    fn send(&mut self, frame: &Frame, handle: BufferHandle) -> Result<(), i32> {
        if self.fail_send {
            return Err(-2);
        }
        self.last_send = Some((*frame, handle));
        Ok(())
    }
}

#[derive(Default)]
struct MockOps {
    termination: bool,
    timestamp: u32,
    events: std::vec::Vec<(u8, Event)>,
}

impl Ops for MockOps {
    fn timestamp(&mut self) -> Option<u32> {
        Some(self.timestamp)
    }

    fn event(&mut self, channel: u8, event: Event) {
        self.events.push((channel, event));
    }

    fn set_termination(&mut self, _channel: u8, on: bool) -> Option<Result<(), GsError>> {
        self.termination = on;
        Some(Ok(()))
    }

    fn get_termination(&mut self, _channel: u8) -> Option<bool> {
        Some(self.termination)
    }

    fn has_timestamp(&self) -> bool {
        true
    }

    fn has_identify(&self) -> bool {
        true
    }

    fn has_termination(&self) -> bool {
        true
    }
}

const CHANNELS: usize = 2;
const BUFS: usize = 4;
const FIFO: usize = 8;

type TestGsCan<'c> = GsCan<'c, EmulatedUsbBus, MockController, MockOps, CHANNELS, BUFS, FIFO>;

struct TestCtx {}

impl UsbDeviceCtx for TestCtx {
    type C<'c> = TestGsCan<'c>;

    fn create_class<'a>(&mut self, alloc: &'a UsbBusAllocator<EmulatedUsbBus>) -> AnyResult<Self::C<'a>> {
        let controllers = [MockController::default(), MockController::default()];
        Ok(GsCan::new(
            alloc,
            controllers,
            MockOps::default(),
            [LedOutputs::StateAndTwoActivity; CHANNELS],
            1,
            1,
        ))
    }
}

#[test]
fn host_format_accepts_little_endian() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            dev.control_write(
                &mut cls,
                CtrRequestType::to_device().class().vendor(),
                0,
                0,
                0,
                4,
                &0x0000_beef_u32.to_le_bytes(),
            )
            .unwrap();

            let st = dev.interface_get_status(&mut cls, 0).expect("status");
            assert_eq!(st, 0);
        })
        .expect("with_usb")
}

#[test]
fn host_format_rejects_big_endian() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            let result = dev.control_write(
                &mut cls,
                CtrRequestType::to_device().class().vendor(),
                0,
                0,
                0,
                4,
                &0xef_be_00_00_u32.to_le_bytes(),
            );
            assert!(result.is_err());
        })
        .expect("with_usb")
}

#[test]
fn mode_start_then_reset_round_trips() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            // MODE=START with LOOP_BACK, channel 0.
            let mut payload = [0u8; 8];
            payload[0..4].copy_from_slice(&1u32.to_le_bytes());
            payload[4..8].copy_from_slice(&Feature::LOOP_BACK.bits().to_le_bytes());
            dev.control_write(&mut cls, CtrRequestType::to_device().class().vendor(), 2, 0, 0, 8, &payload)
                .unwrap();

            // MODE=RESET.
            let mut reset = [0u8; 8];
            reset[0..4].copy_from_slice(&0u32.to_le_bytes());
            dev.control_write(&mut cls, CtrRequestType::to_device().class().vendor(), 2, 0, 0, 8, &reset)
                .unwrap();
        })
        .expect("with_usb")
}

#[test]
fn mode_start_rejects_flags_outside_advertised_features() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            // TRIPLE_SAMPLE is not among the capabilities the mock controller advertises.
            let mut payload = [0u8; 8];
            payload[0..4].copy_from_slice(&1u32.to_le_bytes());
            payload[4..8].copy_from_slice(&Feature::TRIPLE_SAMPLE.bits().to_le_bytes());
            let result = dev.control_write(&mut cls, CtrRequestType::to_device().class().vendor(), 2, 0, 0, 8, &payload);
            assert!(result.is_err());
        })
        .expect("with_usb")
}

#[test]
fn identify_on_then_off() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            dev.control_write(
                &mut cls,
                CtrRequestType::to_device().class().vendor(),
                7,
                0,
                0,
                4,
                &1u32.to_le_bytes(),
            )
            .unwrap();
            dev.control_write(
                &mut cls,
                CtrRequestType::to_device().class().vendor(),
                7,
                0,
                0,
                4,
                &0u32.to_le_bytes(),
            )
            .unwrap();
        })
        .expect("with_usb")
}

#[test]
fn rx_frame_round_trips_through_bulk_in() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            cls.on_rx_frame(
                0,
                RxInput {
                    id: embedded_can::Id::Extended(embedded_can::ExtendedId::new(0x1234_5678).unwrap()),
                    remote: false,
                    fd: false,
                    brs: false,
                    esi: false,
                    data: &[1, 2, 3, 4],
                },
            );
            cls.poll_in();

            let bytes = dev.ep_read(&mut cls, 1, wire::MAX_WIRE_LEN as u16).expect("ep_read");
            let frame = Frame::decode_wire(true, true, &bytes).expect("decode_wire");
            assert_eq!(frame.echo_id, wire::RX_ECHO_ID);
            assert_eq!(frame.channel, 0);
            assert_eq!(frame.can_dlc, 4);
            assert_eq!(&frame.data()[..4], &[1, 2, 3, 4]);
        })
        .expect("with_usb")
}

#[test]
fn device_config_reports_channel_count() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            let bytes = dev
                .control_read(&mut cls, CtrRequestType::to_host().class().vendor(), 5, 0, 0, 8)
                .expect("control_read");
            let config = DeviceConfig::ref_from(bytes.as_slice()).expect("decode DeviceConfig");
            assert_eq!(config.interface_count, (CHANNELS - 1) as u8);
        })
        .expect("with_usb")
}

#[test]
fn get_state_reports_stopped_for_unstarted_channel() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            let bytes = dev
                .control_read(&mut cls, CtrRequestType::to_host().class().vendor(), 14, 0, 0, 12)
                .expect("control_read");
            let state = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
            assert_eq!(state, CanState::Stopped as u32);
        })
        .expect("with_usb")
}

#[test]
fn bit_timing_rejected_while_started() {
    TestCtx {}
        .with_usb(|mut cls, mut dev| {
            let mut start = [0u8; 8];
            start[0..4].copy_from_slice(&1u32.to_le_bytes());
            dev.control_write(&mut cls, CtrRequestType::to_device().class().vendor(), 2, 0, 0, 8, &start)
                .unwrap();

            let timing = DeviceBitTiming {
                prop_seg: 4,
                phase_seg1: 4,
                phase_seg2: 2,
                sjw: 1,
                brp: 6,
            };
            let result = dev.control_write(
                &mut cls,
                CtrRequestType::to_device().class().vendor(),
                1,
                0,
                0,
                20,
                timing.as_bytes(),
            );
            assert!(result.is_err());
        })
        .expect("with_usb")
}
