//! Asynchronous SSDO channels.
//!
//! An SSDO channel carries one frame at a time over the cyclic image.  The
//! triple buffer is overwritten in place every cycle, so delivery relies on
//! the alternating [`SeqNr`] instead of a queue:
//!
//! - [`SsdoTx`] stages a payload and exposes it with the sequence number
//!   the peer's consumption flag does not report, so the frame is new to
//!   the peer even after a drop or a re-created channel.  It keeps
//!   exposing the frame until the flag reports that sequence number.  Until then the channel is
//!   locked and [`SsdoTx::post_payload()`] returns [`Error::Busy`].  If the
//!   peer does not consume the frame in time the frame is exposed again,
//!   optionally up to a retry limit.
//! - [`SsdoRx`] hands a frame to its [`RxHandler`] when the frame's sequence
//!   number differs from the last one accepted.  A frame the handler rejects
//!   is not accepted and is offered again next cycle.
//!
//! Both sides are driven from stream actions: [`SsdoTx::process()`] from the
//! pre action of the transmit buffer, [`SsdoRx::process()`] from the post
//! action of the receive buffer.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::layout::{SSDO_CHANNEL_COUNT, SSDO_PAYLOAD_SIZE, SsdoFrame};
use crate::seqnr::SeqNr;
use crate::status::Status;
use crate::tbuf::Tbuf;
use crate::timeout::{TimeoutHandle, TimeoutPool, TimeoutState};
use crate::{Error, Result};

/// Transmit channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsdoTxParams {
    /// Cycles to wait for the peer to consume a frame before exposing it
    /// again
    pub timeout_cycles: u16,
    /// Number of times a frame is exposed again before it is dropped.
    /// `None` retries for as long as the peer does not consume it.
    pub retry_limit: Option<u16>,
}

impl Default for SsdoTxParams {
    fn default() -> Self {
        Self {
            timeout_cycles: 10,
            retry_limit: None,
        }
    }
}

/// Transmit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing to send
    WaitForFrame,
    /// A frame was posted and is exposed on the next cycle
    ProcessFrame,
    /// Frame exposed, waiting for the peer to consume it
    WaitForTxFinished,
    /// Timed out, the frame is exposed again on the next cycle
    WaitForNextRetry,
    /// Peer consumed the frame
    TxFinished,
}

fn check_channel(channel: u8) -> Result<()> {
    if (channel as usize) < SSDO_CHANNEL_COUNT {
        Ok(())
    } else {
        Err(Error::InvalidChannel)
    }
}

/// Transmit side of an SSDO channel
#[derive(Debug)]
pub struct SsdoTx {
    channel: u8,
    params: SsdoTxParams,
    state: TxState,
    seq_nr: SeqNr,
    locked: bool,
    timeout: TimeoutHandle,
    retries: u16,
    length: u16,
    payload: [u8; SSDO_PAYLOAD_SIZE],
    last_error: Option<Error>,
}

impl SsdoTx {
    /// Create the transmit side of `channel`, taking a timer from `timeouts`.
    pub fn new(channel: u8, params: SsdoTxParams, timeouts: &mut TimeoutPool) -> Result<Self> {
        check_channel(channel)?;
        let timeout = timeouts
            .create(params.timeout_cycles)
            .ok_or(Error::TimeoutPoolExhausted)?;

        debug!("Created SSDO tx channel {channel} {params:?}");

        Ok(Self {
            channel,
            params,
            state: TxState::WaitForFrame,
            seq_nr: SeqNr::Invalid,
            locked: false,
            timeout,
            retries: 0,
            length: 0,
            payload: [0; SSDO_PAYLOAD_SIZE],
            last_error: None,
        })
    }

    /// Return the timer to `timeouts`.  The channel state is dropped.
    pub fn release(self, timeouts: &mut TimeoutPool) -> Result<()> {
        debug!("Destroyed SSDO tx channel {}", self.channel);
        timeouts.destroy(self.timeout)
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Sequence number of the current, or last, exposed frame.
    /// [`SeqNr::Invalid`] before the first exposure.
    pub fn seq_nr(&self) -> SeqNr {
        self.seq_nr
    }

    /// Whether a posted frame has not been consumed yet
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Number of times the current frame has been exposed again
    pub fn retries(&self) -> u16 {
        self.retries
    }

    /// Take the last error raised while processing, if any
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Post a payload.  It is exposed to the peer from the next cycle on.
    ///
    /// Returns [`Error::Busy`] while the previous payload has not been
    /// consumed, and [`Error::PayloadTooLarge`] if `data` does not fit a
    /// frame.
    pub fn post_payload(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > SSDO_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge);
        }
        if self.locked {
            return Err(Error::Busy);
        }

        self.payload[..data.len()].copy_from_slice(data);
        self.payload[data.len()..].fill(0);
        self.length = data.len() as u16;
        self.locked = true;
        self.retries = 0;
        self.state = TxState::ProcessFrame;

        trace!("SSDO tx {} posted {} bytes", self.channel, data.len());

        Ok(())
    }

    /// Run one cycle of the transmit state machine against the channel's
    /// transmit buffer.
    ///
    /// Returns `Ok(Some(error))` for channel errors which do not affect the
    /// cycle, such as reaching the retry limit.
    pub fn process(
        &mut self,
        buf: &mut Tbuf<'_>,
        status: &mut Status,
        timeouts: &mut TimeoutPool,
    ) -> Result<Option<Error>> {
        let mut event = None;

        if self.locked
            && matches!(
                self.state,
                TxState::WaitForTxFinished | TxState::WaitForNextRetry
            )
            && status.peer_cons_flag(self.channel)? == self.seq_nr.cons_bit()
        {
            self.state = TxState::TxFinished;
        }

        match self.state {
            TxState::WaitForFrame => {}
            TxState::ProcessFrame => {
                self.seq_nr = SeqNr::unlike_cons_bit(status.peer_cons_flag(self.channel)?);
                self.expose(buf)?;
                timeouts.start_timer(self.timeout)?;
                self.state = TxState::WaitForTxFinished;
            }
            TxState::WaitForTxFinished => {
                timeouts.increment_counter(self.timeout)?;
                if timeouts.check_expire(self.timeout)? == TimeoutState::Expired {
                    debug!("SSDO tx {} timed out {:?}", self.channel, self.seq_nr);
                    self.state = TxState::WaitForNextRetry;
                }
            }
            TxState::WaitForNextRetry => {
                if self.retry_exhausted() {
                    error!(
                        "SSDO tx {} dropped frame {:?} after {} retries",
                        self.channel, self.seq_nr, self.retries
                    );
                    self.locked = false;
                    self.state = TxState::WaitForFrame;
                    self.last_error = Some(Error::RetryLimitReached);
                    event = Some(Error::RetryLimitReached);
                } else {
                    self.retries = self.retries.saturating_add(1);
                    warn!(
                        "SSDO tx {} retry {} {:?}",
                        self.channel, self.retries, self.seq_nr
                    );
                    self.expose(buf)?;
                    timeouts.start_timer(self.timeout)?;
                    self.state = TxState::WaitForTxFinished;
                }
            }
            TxState::TxFinished => {
                trace!("SSDO tx {} consumed {:?}", self.channel, self.seq_nr);
                timeouts.stop_timer(self.timeout)?;
                self.locked = false;
                self.retries = 0;
                self.state = TxState::WaitForFrame;
            }
        }

        status.set_icc_flag(self.channel, self.locked)?;
        Ok(event)
    }

    fn retry_exhausted(&self) -> bool {
        match self.params.retry_limit {
            Some(limit) => self.retries >= limit,
            None => false,
        }
    }

    // Write the staged frame.  The sequence number goes last.
    fn expose(&self, buf: &mut Tbuf<'_>) -> Result<()> {
        buf.write_stream(SsdoFrame::payload_offset(), &self.payload)?;
        buf.write_u16(SsdoFrame::length_offset(), self.length)?;
        buf.write_u8_release(SsdoFrame::seq_nr_offset(), self.seq_nr.raw())?;
        buf.set_ack();
        Ok(())
    }
}

/// Consumer of received SSDO frames
pub trait RxHandler {
    /// Handle a frame received on `channel`.  An error leaves the frame
    /// unaccepted, so it is offered again next cycle.
    fn on_frame(&mut self, channel: u8, payload: &[u8]) -> Result<()>;
}

impl<F: FnMut(u8, &[u8]) -> Result<()>> RxHandler for F {
    fn on_frame(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        self(channel, payload)
    }
}

/// Receive state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Waiting for a frame with a new sequence number
    WaitForFrame,
    /// Frame accepted, consumption is reported and the channel re-armed
    RepostFrame,
}

/// Receive side of an SSDO channel
pub struct SsdoRx<'h> {
    channel: u8,
    state: RxState,
    seq_nr: SeqNr,
    frame_incoming: bool,
    // Token of the malformed frame last reported
    malformed: SeqNr,
    handler: &'h mut dyn RxHandler,
}

impl<'h> SsdoRx<'h> {
    /// Create the receive side of `channel`, delivering to `handler`
    pub fn new(channel: u8, handler: &'h mut dyn RxHandler) -> Result<Self> {
        check_channel(channel)?;
        debug!("Created SSDO rx channel {channel}");
        Ok(Self {
            channel,
            state: RxState::WaitForFrame,
            seq_nr: SeqNr::Invalid,
            frame_incoming: false,
            malformed: SeqNr::Invalid,
            handler,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Sequence number of the last accepted frame
    pub fn seq_nr(&self) -> SeqNr {
        self.seq_nr
    }

    /// Whether the last cycle saw a new frame the handler did not accept
    pub fn frame_incoming(&self) -> bool {
        self.frame_incoming
    }

    /// Run one cycle of the receive state machine against the channel's
    /// receive buffer.
    ///
    /// Returns `Ok(Some(error))` when the handler rejected a frame or the
    /// frame was malformed.  Neither affects the cycle.  A malformed frame
    /// is reported once, not on every cycle it stays exposed, but it is
    /// still checked again each cycle.
    pub fn process(&mut self, buf: &Tbuf<'_>, status: &mut Status) -> Result<Option<Error>> {
        if self.state == RxState::RepostFrame {
            self.state = RxState::WaitForFrame;
        }

        let seq_nr = SeqNr::from_raw(buf.read_u8_acquire(SsdoFrame::seq_nr_offset())?);
        if !seq_nr.is_valid() || seq_nr == self.seq_nr {
            self.frame_incoming = false;
            self.malformed = SeqNr::Invalid;
            return Ok(None);
        }

        self.frame_incoming = true;

        let length = buf.read_u16(SsdoFrame::length_offset())? as usize;
        if length > SSDO_PAYLOAD_SIZE {
            if self.malformed == seq_nr {
                return Ok(None);
            }
            warn!(
                "SSDO rx {} frame {:?} claims {length} bytes",
                self.channel, seq_nr
            );
            self.malformed = seq_nr;
            return Ok(Some(Error::PayloadTooLarge));
        }
        self.malformed = SeqNr::Invalid;
        let payload = buf.get(SsdoFrame::payload_offset(), length)?;

        if let Err(e) = self.handler.on_frame(self.channel, payload) {
            warn!(
                "SSDO rx {} handler rejected {:?}: {e:?}",
                self.channel, seq_nr
            );
            return Ok(Some(Error::RxHandlerFailed));
        }

        trace!("SSDO rx {} accepted {length} bytes {:?}", self.channel, seq_nr);

        self.seq_nr = seq_nr;
        self.frame_incoming = false;
        self.state = RxState::RepostFrame;
        status.set_cons_flag(self.channel, seq_nr.cons_bit())?;
        Ok(None)
    }
}

impl core::fmt::Debug for SsdoRx<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SsdoRx")
            .field("channel", &self.channel)
            .field("state", &self.state)
            .field("seq_nr", &self.seq_nr)
            .field("frame_incoming", &self.frame_incoming)
            .field("malformed", &self.malformed)
            .finish_non_exhaustive()
    }
}
