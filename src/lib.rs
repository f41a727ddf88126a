#![no_std]

pub mod bittiming;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod errframe;
pub mod identifier;
pub mod led;
pub mod msos;
pub mod ops;
pub mod pipeline;
pub mod pool;
pub mod wire;

use usb_device::bos::BosWriter;
use usb_device::class_prelude::*;
use usb_device::control;
use zerocopy::AsBytes;

use channel::Channel;
use error::GsError;
use led::{LedOutputs, LedStateMachine};
use ops::{CanController, Ops};
use pipeline::Fifo;
use pool::{BufferHandle, BufferPool};
use wire::{Frame, Request};

/// Interface class: vendor defined.
pub const INTERFACE_CLASS: u8 = 0xFF;

/// Bulk endpoint max packet size (full-speed).
const MAX_PACKET_SIZE: u16 = 64;

/// Geschwister Schneider USB/CAN bridge.
///
/// `N` channels share one buffer pool of `BUFS` slots and one RX/error
/// FIFO of `FIFO` slots (`FIFO` must be a power of two, a
/// `heapless::mpmc::MpMcQueue` requirement).
pub struct GsCan<'a, B, C, O, const N: usize, const BUFS: usize, const FIFO: usize>
where
    B: UsbBus,
    C: CanController,
    O: Ops,
{
    interface: InterfaceNumber,
    write_endpoint: EndpointIn<'a, B>,
    read_endpoint: EndpointOut<'a, B>,
    channels: [Channel; N],
    controllers: [C; N],
    ops: O,
    pool: BufferPool<BUFS>,
    rx_fifo: Fifo<FIFO>,
    leds: [LedStateMachine; N],
    software_version: u32,
    hardware_version: u32,
    /// Whether the on-wire frame uses the FD-sized payload. Decided once,
    /// from whether any configured channel advertises `Feature::FD`: a
    /// device's host frame size is constant for its whole lifetime (§3),
    /// not chosen per channel or per frame.
    fd_wire: bool,
    /// Whether the on-wire frame carries a trailing timestamp, decided
    /// once from `Ops::has_timestamp()`.
    has_timestamp_wire: bool,
    /// `wire::wire_len(fd_wire, has_timestamp_wire)`, cached since it's
    /// read on every bulk transfer.
    wire_len: usize,
    rx_scratch: [u8; wire::MAX_WIRE_LEN],
    tx_scratch: [u8; wire::MAX_WIRE_LEN],
    in_progress_out: Option<(BufferHandle, usize)>,
    in_progress_in: Option<(BufferHandle, usize)>,
}

impl<'a, B, C, O, const N: usize, const BUFS: usize, const FIFO: usize> GsCan<'a, B, C, O, N, BUFS, FIFO>
where
    B: UsbBus,
    C: CanController,
    O: Ops,
{
    pub fn new(
        alloc: &'a UsbBusAllocator<B>,
        controllers: [C; N],
        mut ops: O,
        led_outputs: [LedOutputs; N],
        software_version: u32,
        hardware_version: u32,
    ) -> Self {
        // Hack to get the OUT endpoint number right (matches the upstream
        // usbd class this crate started from).
        let _: EndpointOut<'a, B> = alloc.bulk(0);

        let ambient = channel::baseline_features()
            | channel::features_from_ops(ops.has_timestamp(), ops.has_identify(), ops.has_termination());
        let channels: [Channel; N] = core::array::from_fn(|i| {
            Channel::new(ambient | channel::features_from_capabilities(controllers[i].capabilities()))
        });
        let leds = led_outputs.map(LedStateMachine::new);

        let fd_wire = channels.iter().any(|c| c.features().contains(wire::Feature::FD));
        let has_timestamp_wire = ops.has_timestamp();
        let wire_len = wire::wire_len(fd_wire, has_timestamp_wire);

        Self {
            interface: alloc.interface(),
            write_endpoint: alloc.bulk(MAX_PACKET_SIZE),
            read_endpoint: alloc.bulk(MAX_PACKET_SIZE),
            channels,
            controllers,
            ops,
            pool: BufferPool::new(),
            rx_fifo: Fifo::new(),
            leds,
            software_version,
            hardware_version,
            fd_wire,
            has_timestamp_wire,
            wire_len,
            rx_scratch: [0u8; wire::MAX_WIRE_LEN],
            tx_scratch: [0u8; wire::MAX_WIRE_LEN],
            in_progress_out: None,
            in_progress_in: None,
        }
    }

    fn channel_index(&self, raw: u8) -> Option<usize> {
        let idx = raw as usize;
        (idx < N).then_some(idx)
    }

    /// Feeds one controller-reported received frame into the pipeline.
    /// Call from the CAN driver's receive interrupt.
    pub fn on_rx_frame(&mut self, channel: u8, input: pipeline::RxInput<'_>) {
        pipeline::on_rx_frame(&self.pool, &self.channels, &self.rx_fifo, channel, input);
    }

    /// Reports a TX completion for a handle previously passed to
    /// `CanController::send`. Call from the CAN driver's send-complete
    /// interrupt.
    pub fn on_tx_complete(&mut self, handle: BufferHandle, success: bool) {
        pipeline::on_tx_complete(&self.pool, &mut self.ops, &self.rx_fifo, handle, success);
    }

    /// Reports a controller error-state transition. Call from the CAN
    /// driver's error/state-change interrupt.
    pub fn on_state_change(&mut self, channel: u8, state: wire::CanState, rx_errors: u32, tx_errors: u32) {
        pipeline::on_state_change(&self.pool, &mut self.channels, &self.rx_fifo, channel, state, rx_errors, tx_errors);
    }

    /// Drains the RX FIFO into the bulk-IN endpoint. Call once after any
    /// of the `on_*` callbacks and once per `UsbDevice::poll`.
    pub fn poll_in(&mut self) {
        self.try_send_next();
    }

    /// Advances the activity/identify tick timers for every channel's LED
    /// state machine and returns the resulting levels in channel order.
    /// Call at the embedder's fixed LED tick rate.
    pub fn tick(&mut self) -> [led::LedLevels; N] {
        core::array::from_fn(|i| self.leds[i].handle(led::Event::Tick))
    }

    fn try_send_next(&mut self) {
        if self.in_progress_in.is_some() {
            return;
        }
        if let Some(handle) = pipeline::in_step(&self.pool, &self.channels, &self.rx_fifo) {
            let len = self
                .pool
                .get(handle)
                .encode_wire(self.fd_wire, self.has_timestamp_wire, &mut self.tx_scratch);
            debug_assert_eq!(len, self.wire_len);
            self.send_chunk(handle, 0);
        }
    }

    fn send_chunk(&mut self, handle: BufferHandle, offset: usize) {
        let end = (offset + MAX_PACKET_SIZE as usize).min(self.wire_len);
        match self.write_endpoint.write(&self.tx_scratch[offset..end]) {
            Ok(_) => {
                if end < self.wire_len {
                    self.in_progress_in = Some((handle, end));
                } else {
                    self.finish_send(handle);
                }
            }
            Err(_e) => {
                #[cfg(feature = "defmt-03")]
                defmt::error!("gs_usb: bulk-IN write failed: {}", _e);
                self.pool.free(handle);
            }
        }
    }

    fn finish_send(&mut self, handle: BufferHandle) {
        let frame = *self.pool.get(handle);
        pipeline::note_activity(&mut self.ops, &frame);
        if !frame.is_error() {
            if let Some(idx) = self.channel_index(frame.channel) {
                let event = if frame.echo_id == wire::RX_ECHO_ID {
                    led::Event::ActivityRx
                } else {
                    led::Event::ActivityTx
                };
                self.leds[idx].handle(event);
            }
        }
        self.pool.free(handle);
        self.try_send_next();
    }
}

impl<B, C, O, const N: usize, const BUFS: usize, const FIFO: usize> UsbClass<B> for GsCan<'_, B, C, O, N, BUFS, FIFO>
where
    B: UsbBus,
    C: CanController,
    O: Ops,
{
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> usb_device::Result<()> {
        writer.interface(self.interface, INTERFACE_CLASS, 0xFF, 0xFF)?;
        writer.endpoint(&self.write_endpoint)?;
        writer.endpoint(&self.read_endpoint)?;
        Ok(())
    }

    fn get_bos_descriptors(&self, writer: &mut BosWriter) -> usb_device::Result<()> {
        writer.capability(0x05, &msos::platform_capability())
    }

    fn reset(&mut self) {
        self.in_progress_in = None;
        self.in_progress_out = None;
        for (idx, channel) in self.channels.iter_mut().enumerate() {
            channel.reset();
            self.controllers[idx].stop().ok();
        }
        for led in self.leds.iter_mut() {
            led.handle(led::Event::Stopped);
        }
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();
        if req.request_type != control::RequestType::Vendor {
            return;
        }

        if req.request == msos::MS_VENDOR_CODE && req.index == msos::MS_GET_DESCRIPTOR_SET {
            let mut buf = [0u8; msos::DESCRIPTOR_SET_LEN];
            msos::write_descriptor_set(&mut buf);
            xfer.accept_with(&buf).ok();
            return;
        }

        let Ok(request) = Request::try_from(req.request) else {
            xfer.reject().ok();
            return;
        };
        let channel = req.value as u8;

        match request {
            Request::BitTimingConst => match self.channel_index(channel) {
                Some(idx) => {
                    let out = dispatch::bt_const(&self.channels[idx], &self.controllers[idx]);
                    xfer.accept_with(out.as_bytes()).ok();
                }
                None => {
                    xfer.reject().ok();
                }
            },
            Request::BitTimingConstExtended => match self
                .channel_index(channel)
                .ok_or(GsError::Invalid)
                .and_then(|idx| dispatch::bt_const_ext(&self.channels[idx], &self.controllers[idx]))
            {
                Ok(out) => {
                    xfer.accept_with(out.as_bytes()).ok();
                }
                Err(_) => {
                    xfer.reject().ok();
                }
            },
            Request::DeviceConfig => {
                let out = dispatch::device_config(N as u8, self.software_version, self.hardware_version);
                xfer.accept_with(out.as_bytes()).ok();
            }
            Request::GetState => match self.channel_index(channel) {
                Some(idx) => {
                    let controller_state = dispatch::get_state(&self.controllers[idx]);
                    let state = dispatch::channel_state(&self.channels[idx], controller_state.state);
                    let out = wire::DeviceState {
                        state,
                        rx_errors: controller_state.rx_errors,
                        tx_errors: controller_state.tx_errors,
                    };
                    xfer.accept_with(out.as_bytes()).ok();
                }
                None => {
                    xfer.reject().ok();
                }
            },
            Request::Timestamp => match dispatch::timestamp(&mut self.ops) {
                Ok(ts) => {
                    xfer.accept_with(&ts.to_le_bytes()).ok();
                }
                Err(_) => {
                    xfer.reject().ok();
                }
            },
            Request::GetTermination => match self
                .channel_index(channel)
                .ok_or(GsError::Invalid)
                .and_then(|idx| dispatch::get_termination(&self.channels[idx], &mut self.ops, channel))
            {
                Ok(out) => {
                    xfer.accept_with(out.as_bytes()).ok();
                }
                Err(_) => {
                    xfer.reject().ok();
                }
            },
            _ => {
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();
        if req.request_type != control::RequestType::Vendor {
            return;
        }

        let Ok(request) = Request::try_from(req.request) else {
            xfer.reject().ok();
            return;
        };
        let channel = req.value as u8;
        let data = xfer.data();

        let result = match request {
            Request::HostFormat => dispatch::host_format(data),
            Request::BitTiming => self
                .channel_index(channel)
                .ok_or(GsError::Invalid)
                .and_then(|idx| dispatch::bit_timing(&self.channels[idx], &mut self.controllers[idx], data)),
            Request::DataBitTiming => self
                .channel_index(channel)
                .ok_or(GsError::Invalid)
                .and_then(|idx| dispatch::data_bit_timing(&self.channels[idx], &mut self.controllers[idx], data)),
            Request::Mode => self.channel_index(channel).ok_or(GsError::Invalid).and_then(|idx| {
                let result = dispatch::mode(channel, &mut self.channels[idx], &mut self.controllers[idx], &mut self.ops, data);
                if result.is_ok() {
                    let event = if self.channels[idx].started() {
                        led::Event::Started
                    } else {
                        led::Event::Stopped
                    };
                    self.leds[idx].handle(event);
                }
                result
            }),
            Request::Identify => self.channel_index(channel).ok_or(GsError::Invalid).and_then(|idx| {
                let result = dispatch::identify(channel, &self.channels[idx], &mut self.ops, data);
                if result.is_ok() {
                    if let Ok(req) = wire::decode::<wire::IdentifyMode>(data) {
                        let event = match wire::IdentifyModeValue::try_from(req.mode) {
                            Ok(wire::IdentifyModeValue::On) => led::Event::IdentifyOn,
                            _ => led::Event::IdentifyOff,
                        };
                        self.leds[idx].handle(event);
                    }
                }
                result
            }),
            Request::SetTermination => self
                .channel_index(channel)
                .ok_or(GsError::Invalid)
                .and_then(|idx| dispatch::set_termination(channel, &self.channels[idx], &mut self.ops, data)),
            _ => Err(GsError::NotSupported),
        };

        match result {
            Ok(()) => {
                xfer.accept().ok();
            }
            Err(_) => {
                xfer.reject().ok();
            }
        }
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr != self.write_endpoint.address() {
            return;
        }
        match self.in_progress_in.take() {
            Some((handle, offset)) => self.send_chunk(handle, offset),
            None => self.try_send_next(),
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr != self.read_endpoint.address() {
            return;
        }

        let (handle, offset) = match self.in_progress_out.take() {
            Some(v) => v,
            None => match self.pool.alloc() {
                Ok(h) => (h, 0),
                Err(_) => {
                    // Pool exhausted: drain the packet into a scratch
                    // buffer so the endpoint doesn't stall, and drop it.
                    let mut scratch = [0u8; MAX_PACKET_SIZE as usize];
                    self.read_endpoint.read(&mut scratch).ok();
                    return;
                }
            },
        };

        let want = (self.wire_len - offset).min(MAX_PACKET_SIZE as usize);
        let read_result = self.read_endpoint.read(&mut self.rx_scratch[offset..offset + want]);

        match read_result {
            Ok(n) => {
                let new_offset = offset + n;
                if new_offset == self.wire_len {
                    match Frame::decode_wire(self.fd_wire, self.has_timestamp_wire, &self.rx_scratch[..new_offset]) {
                        Ok(frame) => {
                            *self.pool.get_mut(handle) = frame;
                            if self.channel_index(frame.channel).is_some() {
                                pipeline::tx_step(&self.pool, &self.channels, &mut self.controllers, handle).ok();
                            } else {
                                self.pool.free(handle);
                            }
                        }
                        Err(_) => {
                            self.pool.free(handle);
                        }
                    }
                } else if n < want {
                    // Short packet: host sent fewer bytes than this
                    // device's frame size expects. Marks the end of the
                    // transfer (USB bulk convention), so the partial
                    // frame is incomplete and dropped rather than waiting
                    // for a continuation that will never arrive.
                    self.pool.free(handle);
                } else {
                    self.in_progress_out = Some((handle, new_offset));
                }
            }
            Err(_) => {
                self.pool.free(handle);
            }
        }
    }
}
