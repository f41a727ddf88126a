//! Bulk-endpoint frame pipeline: OUT/TX/RX/IN worker logic and the FIFOs
//! that hand buffers between them (§4.5).
//!
//! `usb-device` drives this crate from interrupt/poll context rather than
//! OS tasks (see SPEC_FULL.md §2's adaptation note), so "worker" here means
//! a function invoked at the right callback point, not a thread. The FIFOs
//! are still the real hand-off mechanism and still give the same ordering
//! guarantees a threaded implementation would.

use heapless::mpmc::MpMcQueue;

use crate::channel::Channel;
use crate::error::GsError;
use crate::ops::{CanController, Event, Ops};
use crate::pool::{BufferHandle, BufferPool};
use crate::wire::{Feature, Frame, FrameFlag, RX_ECHO_ID};

/// Host-originated RX input, decoupled from whatever type the embedder's
/// CAN driver uses for received frames.
pub struct RxInput<'a> {
    pub id: embedded_can::Id,
    pub remote: bool,
    pub fd: bool,
    pub brs: bool,
    pub esi: bool,
    pub data: &'a [u8],
}

/// A FIFO of pool handles. Multi-producer (RX callback, state-change
/// callback, TX-completion callback all push to `rx_fifo`; only the OUT
/// worker pushes to `tx_fifo`), single-consumer. `CAP` must be a power of
/// two (`heapless::mpmc::MpMcQueue` requirement).
pub type Fifo<const CAP: usize> = MpMcQueue<BufferHandle, CAP>;

/// Validates and submits one queued TX buffer to the controller. Returns
/// `Ok(())` if the frame was handed to the controller (a TX-completion
/// will follow later); on any validation failure the buffer is freed
/// immediately and no completion will occur, matching "an error completion
/// drops the frame silently" (Invariant 6).
pub fn tx_step<C: CanController, const N: usize, const BUFS: usize>(
    pool: &BufferPool<BUFS>,
    channels: &[Channel; N],
    controllers: &mut [C; N],
    handle: BufferHandle,
) -> Result<(), GsError> {
    let result = (|| {
        let channel_index = pool.get(handle).channel as usize;
        if channel_index >= N {
            return Err(GsError::Invalid);
        }
        let channel = &channels[channel_index];
        if !channel.started() {
            return Err(GsError::Invalid);
        }

        let buf = pool.get_mut(handle);
        if !channel.features().contains(Feature::FD) {
            buf.flags.remove(FrameFlag::FD | FrameFlag::BRS);
        }
        buf.flags.remove(FrameFlag::ESI | FrameFlag::OVERFLOW);

        let len = buf.data_len()?;
        let max = if buf.flags.contains(FrameFlag::FD) {
            crate::wire::FD_MAX_LEN
        } else {
            crate::wire::CLASSIC_MAX_LEN
        };
        if !buf.is_remote() && len > max {
            return Err(GsError::Invalid);
        }

        controllers[channel_index]
            .send(buf, handle)
            .map_err(|e| GsError::Controller(e.into()))
    })();

    if result.is_err() {
        pool.free(handle);
    }
    result
}

/// TX-completion: invoked by the embedder from the CAN driver's
/// send-complete interrupt. On success, rewrites the buffer into its echo
/// form and hands it to `rx_fifo`; on error the buffer is freed silently.
pub fn on_tx_complete<O: Ops, const BUFS: usize, const FIFO: usize>(
    pool: &BufferPool<BUFS>,
    ops: &mut O,
    rx_fifo: &Fifo<FIFO>,
    handle: BufferHandle,
    success: bool,
) {
    if !success {
        pool.free(handle);
        return;
    }

    let buf = pool.get_mut(handle);
    buf.zero_pad_data();
    if buf.flags.contains(FrameFlag::OVERFLOW) {
        // Echoes never carry a stale overflow bit from the TX request.
        buf.flags.remove(FrameFlag::OVERFLOW);
    }
    if let Some(ts) = ops.timestamp() {
        buf.timestamp_us = ts;
    }

    if rx_fifo.enqueue(handle).is_err() {
        pool.free(handle);
    }
}

/// RX: invoked by the embedder from the CAN driver's receive interrupt.
/// Allocates a buffer and enqueues an RX host frame; on allocation failure
/// increments the channel's overflow counter (Invariant 5) and nothing is
/// enqueued.
pub fn on_rx_frame<const N: usize, const BUFS: usize, const FIFO: usize>(
    pool: &BufferPool<BUFS>,
    channels: &[Channel; N],
    rx_fifo: &Fifo<FIFO>,
    channel_index: u8,
    input: RxInput<'_>,
) {
    let handle = match pool.alloc() {
        Ok(h) => h,
        Err(_) => {
            if let Some(channel) = channels.get(channel_index as usize) {
                channel.mark_overflow();
            }
            return;
        }
    };

    let buf = pool.get_mut(handle);
    buf.echo_id = RX_ECHO_ID;
    buf.channel = channel_index;
    buf.set_id(input.id);
    if input.remote {
        buf.can_id |= crate::wire::IdFlag::REMOTE.bits();
    }
    let mut flags = FrameFlag::empty();
    if input.fd {
        flags |= FrameFlag::FD;
    }
    if input.brs {
        flags |= FrameFlag::BRS;
    }
    if input.esi {
        flags |= FrameFlag::ESI;
    }
    buf.flags = flags;
    buf.can_dlc = if input.fd {
        crate::wire::fd_len_to_dlc(input.data.len()).unwrap_or(0)
    } else {
        input.data.len().min(crate::wire::CLASSIC_MAX_LEN) as u8
    };
    buf.set_data(input.data);

    if let Some(channel) = channels.get(channel_index as usize) {
        if channel.take_overflow() {
            buf.flags.insert(FrameFlag::OVERFLOW);
        }
    }

    if rx_fifo.enqueue(handle).is_err() {
        pool.free(handle);
        if let Some(channel) = channels.get(channel_index as usize) {
            channel.mark_overflow();
        }
    }
}

/// State-change: invoked by the embedder when the CAN controller
/// transitions between error-active/warning/passive/bus-off. Builds and
/// enqueues an error frame, or does nothing for STOPPED/SLEEPING.
pub fn on_state_change<const N: usize, const BUFS: usize, const FIFO: usize>(
    pool: &BufferPool<BUFS>,
    channels: &mut [Channel; N],
    rx_fifo: &Fifo<FIFO>,
    channel_index: u8,
    state: crate::wire::CanState,
    rx_errors: u32,
    tx_errors: u32,
) {
    let Some(channel) = channels.get_mut(channel_index as usize) else {
        return;
    };
    let prev_busoff = channel.busoff();
    channel.set_busoff(state == crate::wire::CanState::BusOff);

    let Some(frame) = crate::errframe::build(prev_busoff, state, channel_index, rx_errors, tx_errors) else {
        return;
    };

    match pool.alloc() {
        Ok(handle) => {
            *pool.get_mut(handle) = frame;
            if rx_fifo.enqueue(handle).is_err() {
                pool.free(handle);
                channel.mark_overflow();
            }
        }
        Err(_) => channel.mark_overflow(),
    }
}

/// IN worker step: pops one handle, applies the pending-overflow flag for
/// its channel, and returns it for the caller to write to bulk-IN and then
/// free. Returns `None` if the FIFO is empty.
pub fn in_step<const N: usize, const BUFS: usize, const FIFO: usize>(
    pool: &BufferPool<BUFS>,
    channels: &[Channel; N],
    rx_fifo: &Fifo<FIFO>,
) -> Option<BufferHandle> {
    let handle = rx_fifo.dequeue()?;
    let buf = pool.get_mut(handle);
    if let Some(channel) = channels.get(buf.channel as usize) {
        if channel.take_overflow() {
            buf.flags.insert(FrameFlag::OVERFLOW);
        }
    }
    Some(handle)
}

/// Raises the activity event to `Ops`/the LED state machine for a
/// just-delivered non-error frame, per §4.5's IN worker description.
pub fn note_activity<O: Ops>(ops: &mut O, frame: &Frame) {
    if frame.is_error() {
        return;
    }
    let event = if frame.echo_id == RX_ECHO_ID {
        Event::ActivityRx
    } else {
        Event::ActivityTx
    };
    ops.event(frame.channel, event);
}
