//! Application interface composition.
//!
//! [`AppIf`] bundles what the asynchronous side of the link needs: the
//! [`Status`] exchange, a [`TimeoutPool`] and fixed pools of SSDO transmit
//! and receive channels.  It is used as the stream's context:
//!
//! ```rust,ignore
//! let mut image = [0u8; IMAGE_SIZE];
//! let mut handler = |channel: u8, payload: &[u8]| -> Result<()> { Ok(()) };
//!
//! let mut stream = Stream::new(&mut image)?;
//! let mut appif = AppIf::new();
//! let tx = appif.create_tx(0, SsdoTxParams::default())?;
//! appif.create_rx(0, &mut handler)?;
//! AppIf::register(&mut stream)?;
//!
//! appif.post_payload(tx, b"hello")?;
//! // From the synchronous interrupt
//! stream.process(&mut appif, &mut transport)?;
//! ```
//!
//! Registration order matters: the transmit channels run before the status
//! output is packed, so the status frame carries the current busy flags.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::layout::{BufferId, SSDO_CHANNEL_COUNT, ssdo_rx_buffer, ssdo_tx_buffer};
use crate::ssdo::{RxHandler, SsdoRx, SsdoTx, SsdoTxParams, TxState};
use crate::status::Status;
use crate::stream::{ActionKind, BufferAction, Stream};
use crate::tbuf::Tbuf;
use crate::timeout::TimeoutPool;
use crate::{Error, ErrorHandler, ErrorSource, Result, report};

/// Handle to an SSDO transmit channel of an [`AppIf`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsdoTxHandle(u8);

/// Handle to an SSDO receive channel of an [`AppIf`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsdoRxHandle(u8);

impl SsdoTxHandle {
    pub fn channel(&self) -> u8 {
        self.0
    }
}

impl SsdoRxHandle {
    pub fn channel(&self) -> u8 {
        self.0
    }
}

/// Status, timers and SSDO channels of one side of the link
pub struct AppIf<'h> {
    status: Status,
    timeouts: TimeoutPool,
    tx: [Option<SsdoTx>; SSDO_CHANNEL_COUNT],
    rx: [Option<SsdoRx<'h>>; SSDO_CHANNEL_COUNT],
    error_handler: Option<&'h dyn ErrorHandler>,
}

impl<'h> AppIf<'h> {
    pub fn new() -> Self {
        Self {
            status: Status::new(),
            timeouts: TimeoutPool::new(),
            tx: core::array::from_fn(|_| None),
            rx: core::array::from_fn(|_| None),
            error_handler: None,
        }
    }

    /// Forward channel errors to `handler`
    pub fn set_error_handler(&mut self, handler: &'h dyn ErrorHandler) {
        self.error_handler = Some(handler);
    }

    /// Register the status and SSDO actions with `stream`.
    ///
    /// Uses three pre and three post slots.  Channels created later are
    /// picked up without registering again.
    pub fn register<'a>(stream: &mut Stream<'a, AppIf<'h>>) -> Result<()> {
        for channel in 0..SSDO_CHANNEL_COUNT as u8 {
            stream.register_action(
                ActionKind::Pre,
                ssdo_tx_buffer(channel)?,
                &TX_ACTIONS[channel as usize],
            )?;
        }
        stream.register_action(ActionKind::Pre, BufferId::StatusOut, &StatusOutAction)?;

        stream.register_action(ActionKind::Post, BufferId::StatusIn, &StatusInAction)?;
        for channel in 0..SSDO_CHANNEL_COUNT as u8 {
            stream.register_action(
                ActionKind::Post,
                ssdo_rx_buffer(channel)?,
                &RX_ACTIONS[channel as usize],
            )?;
        }

        debug!("Registered App-IF actions");
        Ok(())
    }

    /// Create the transmit side of `channel`.
    ///
    /// Fails with [`Error::InvalidChannel`] for an unknown channel,
    /// [`Error::ChannelInUse`] if it already exists, and
    /// [`Error::TimeoutPoolExhausted`] if no timer is left.
    pub fn create_tx(&mut self, channel: u8, params: SsdoTxParams) -> Result<SsdoTxHandle> {
        let slot = self
            .tx
            .get_mut(channel as usize)
            .ok_or(Error::InvalidChannel)?;
        if slot.is_some() {
            return Err(Error::ChannelInUse);
        }
        *slot = Some(SsdoTx::new(channel, params, &mut self.timeouts)?);
        Ok(SsdoTxHandle(channel))
    }

    /// Destroy a transmit channel.  Any unconsumed frame is dropped.
    pub fn destroy_tx(&mut self, handle: SsdoTxHandle) -> Result<()> {
        let tx = self
            .tx
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or(Error::InvalidChannel)?;
        self.status.set_icc_flag(handle.0, false)?;
        tx.release(&mut self.timeouts)
    }

    /// Create the receive side of `channel`, delivering frames to `handler`.
    pub fn create_rx(&mut self, channel: u8, handler: &'h mut dyn RxHandler) -> Result<SsdoRxHandle> {
        let slot = self
            .rx
            .get_mut(channel as usize)
            .ok_or(Error::InvalidChannel)?;
        if slot.is_some() {
            return Err(Error::ChannelInUse);
        }
        *slot = Some(SsdoRx::new(channel, handler)?);
        Ok(SsdoRxHandle(channel))
    }

    /// Destroy a receive channel
    pub fn destroy_rx(&mut self, handle: SsdoRxHandle) -> Result<()> {
        self.rx
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or(Error::InvalidChannel)?;
        debug!("Destroyed SSDO rx channel {}", handle.0);
        Ok(())
    }

    /// Post a payload on a transmit channel.  See [`SsdoTx::post_payload()`].
    pub fn post_payload(&mut self, handle: SsdoTxHandle, data: &[u8]) -> Result<()> {
        self.tx_mut(handle)?.post_payload(data)
    }

    pub fn tx_state(&self, handle: SsdoTxHandle) -> Result<TxState> {
        Ok(self.tx_ref(handle)?.state())
    }

    /// Whether the channel can take a new payload
    pub fn tx_idle(&self, handle: SsdoTxHandle) -> Result<bool> {
        Ok(!self.tx_ref(handle)?.is_locked())
    }

    /// Take the last error raised by a transmit channel
    pub fn take_tx_error(&mut self, handle: SsdoTxHandle) -> Result<Option<Error>> {
        Ok(self.tx_mut(handle)?.take_error())
    }

    pub fn tx(&self, handle: SsdoTxHandle) -> Result<&SsdoTx> {
        self.tx_ref(handle)
    }

    pub fn rx(&self, handle: SsdoRxHandle) -> Result<&SsdoRx<'h>> {
        self.rx
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidChannel)
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Number of timers still free
    pub fn free_timeouts(&self) -> usize {
        self.timeouts.free_slots()
    }

    fn tx_ref(&self, handle: SsdoTxHandle) -> Result<&SsdoTx> {
        self.tx
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidChannel)
    }

    fn tx_mut(&mut self, handle: SsdoTxHandle) -> Result<&mut SsdoTx> {
        self.tx
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidChannel)
    }
}

impl Default for AppIf<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for AppIf<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppIf")
            .field("status", &self.status)
            .field("timeouts", &self.timeouts)
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .finish_non_exhaustive()
    }
}

struct SsdoTxAction {
    channel: u8,
}

struct SsdoRxAction {
    channel: u8,
}

struct StatusOutAction;

struct StatusInAction;

static TX_ACTIONS: [SsdoTxAction; SSDO_CHANNEL_COUNT] =
    [SsdoTxAction { channel: 0 }, SsdoTxAction { channel: 1 }];

static RX_ACTIONS: [SsdoRxAction; SSDO_CHANNEL_COUNT] =
    [SsdoRxAction { channel: 0 }, SsdoRxAction { channel: 1 }];

impl<'h> BufferAction<AppIf<'h>> for SsdoTxAction {
    fn act(&self, buf: &mut Tbuf<'_>, ctx: &mut AppIf<'h>) -> Result<()> {
        let AppIf {
            status,
            timeouts,
            tx,
            error_handler,
            ..
        } = ctx;
        let Some(tx) = tx[self.channel as usize].as_mut() else {
            return Ok(());
        };
        if let Some(e) = tx.process(buf, status, timeouts)? {
            report(*error_handler, ErrorSource::Ssdo, e);
        }
        Ok(())
    }
}

impl<'h> BufferAction<AppIf<'h>> for SsdoRxAction {
    fn act(&self, buf: &mut Tbuf<'_>, ctx: &mut AppIf<'h>) -> Result<()> {
        let AppIf {
            status,
            rx,
            error_handler,
            ..
        } = ctx;
        let Some(rx) = rx[self.channel as usize].as_mut() else {
            return Ok(());
        };
        if let Some(e) = rx.process(buf, status)? {
            report(*error_handler, ErrorSource::Ssdo, e);
        }
        Ok(())
    }
}

impl<'h> BufferAction<AppIf<'h>> for StatusOutAction {
    fn act(&self, buf: &mut Tbuf<'_>, ctx: &mut AppIf<'h>) -> Result<()> {
        ctx.status.write_frame(buf)
    }
}

impl<'h> BufferAction<AppIf<'h>> for StatusInAction {
    fn act(&self, buf: &mut Tbuf<'_>, ctx: &mut AppIf<'h>) -> Result<()> {
        ctx.status.read_frame(buf)
    }
}
