//! Status/flag exchange.
//!
//! Each side sends a [`StatusFrame`] every cycle in its status output buffer
//! and receives the peer's in its status input buffer.  The frame carries one
//! bit per SSDO channel in each of two fields:
//!
//! - `icc_status` - set while the sender's transmit channel holds a frame the
//!   peer has not yet consumed
//! - `cons_status` - the [`SeqNr::cons_bit()`] of the last frame the sender
//!   accepted on its receive channel
//!
//! A transmitter knows its frame has been consumed once the peer's
//! `cons_status` bit matches the sequence number it sent.  The frame also
//! carries the sender's cycle counter, which lets the application notice a
//! peer that stopped cycling.
//!
//! [`SeqNr::cons_bit()`]: crate::seqnr::SeqNr::cons_bit

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::layout::{SSDO_CHANNEL_COUNT, StatusFrame};
use crate::tbuf::Tbuf;
use crate::{Error, Result};

/// Local and peer status flags
#[derive(Debug, Default, Clone)]
pub struct Status {
    icc_status: u16,
    cons_status: u16,
    cycle: u32,
    peer_icc_status: u16,
    peer_cons_status: u16,
    peer_cycle: u32,
    link_alive: bool,
}

fn channel_mask(channel: u8) -> Result<u16> {
    if (channel as usize) < SSDO_CHANNEL_COUNT {
        Ok(1 << channel)
    } else {
        Err(Error::InvalidChannel)
    }
}

fn assign(field: &mut u16, mask: u16, set: bool) {
    if set {
        *field |= mask;
    } else {
        *field &= !mask;
    }
}

impl Status {
    pub const fn new() -> Self {
        Self {
            icc_status: 0,
            cons_status: 0,
            cycle: 0,
            peer_icc_status: 0,
            peer_cons_status: 0,
            peer_cycle: 0,
            link_alive: false,
        }
    }

    /// Mark transmit channel `channel` as holding an unconsumed frame
    pub fn set_icc_flag(&mut self, channel: u8, pending: bool) -> Result<()> {
        assign(&mut self.icc_status, channel_mask(channel)?, pending);
        Ok(())
    }

    /// Report the consumption bit of receive channel `channel`
    pub fn set_cons_flag(&mut self, channel: u8, bit: bool) -> Result<()> {
        assign(&mut self.cons_status, channel_mask(channel)?, bit);
        Ok(())
    }

    pub fn icc_flag(&self, channel: u8) -> Result<bool> {
        Ok(self.icc_status & channel_mask(channel)? != 0)
    }

    pub fn cons_flag(&self, channel: u8) -> Result<bool> {
        Ok(self.cons_status & channel_mask(channel)? != 0)
    }

    /// Whether the peer's transmit channel `channel` holds a frame for us
    pub fn peer_icc_flag(&self, channel: u8) -> Result<bool> {
        Ok(self.peer_icc_status & channel_mask(channel)? != 0)
    }

    /// Peer's consumption bit for our transmit channel `channel`
    pub fn peer_cons_flag(&self, channel: u8) -> Result<bool> {
        Ok(self.peer_cons_status & channel_mask(channel)? != 0)
    }

    /// Our cycle counter, as last sent
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Peer's cycle counter, as last received
    pub fn peer_cycle(&self) -> u32 {
        self.peer_cycle
    }

    /// Whether the peer's cycle counter moved with the last received frame
    pub fn link_alive(&self) -> bool {
        self.link_alive
    }

    /// Pack our flags into the status output buffer and flag it as fresh.
    /// Advances our cycle counter.
    pub fn write_frame(&mut self, buf: &mut Tbuf<'_>) -> Result<()> {
        self.cycle = self.cycle.wrapping_add(1);
        buf.write_u16(StatusFrame::icc_status_offset(), self.icc_status)?;
        buf.write_u16(StatusFrame::cons_status_offset(), self.cons_status)?;
        buf.write_u32(StatusFrame::cycle_offset(), self.cycle)?;
        buf.set_ack();
        Ok(())
    }

    /// Unpack the peer's flags from the status input buffer
    pub fn read_frame(&mut self, buf: &Tbuf<'_>) -> Result<()> {
        let peer_cycle = buf.read_u32(StatusFrame::cycle_offset())?;
        let icc_status = buf.read_u16(StatusFrame::icc_status_offset())?;
        let cons_status = buf.read_u16(StatusFrame::cons_status_offset())?;

        if self.link_alive && peer_cycle == self.peer_cycle {
            debug!("Peer cycle counter stalled at {peer_cycle}");
        }
        self.link_alive = peer_cycle != self.peer_cycle;
        self.peer_cycle = peer_cycle;
        self.peer_icc_status = icc_status;
        self.peer_cons_status = cons_status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BufferId, STATUS_FRAME_SIZE};

    #[test]
    fn flags_round_trip_through_frame() {
        let mut local = Status::new();
        local.set_icc_flag(1, true).unwrap();
        local.set_cons_flag(0, true).unwrap();

        let mut data = [0u8; STATUS_FRAME_SIZE];
        let mut buf = Tbuf::new(BufferId::StatusOut, &mut data, false);
        local.write_frame(&mut buf).unwrap();
        assert!(buf.ack_requested());
        assert_eq!(local.cycle(), 1);

        let mut peer = Status::new();
        let buf = Tbuf::new(BufferId::StatusIn, &mut data, true);
        peer.read_frame(&buf).unwrap();
        assert_eq!(peer.peer_icc_flag(0), Ok(false));
        assert_eq!(peer.peer_icc_flag(1), Ok(true));
        assert_eq!(peer.peer_cons_flag(0), Ok(true));
        assert_eq!(peer.peer_cons_flag(1), Ok(false));
        assert_eq!(peer.peer_cycle(), 1);
        assert!(peer.link_alive());

        // Same frame again: the peer did not cycle
        peer.read_frame(&buf).unwrap();
        assert!(!peer.link_alive());
    }

    #[test]
    fn flags_clear() {
        let mut status = Status::new();
        status.set_cons_flag(1, true).unwrap();
        assert_eq!(status.cons_flag(1), Ok(true));
        status.set_cons_flag(1, false).unwrap();
        assert_eq!(status.cons_flag(1), Ok(false));
        status.set_icc_flag(0, true).unwrap();
        assert_eq!(status.icc_flag(0), Ok(true));
    }

    #[test]
    fn channel_out_of_range() {
        let mut status = Status::new();
        let channel = SSDO_CHANNEL_COUNT as u8;
        assert_eq!(status.set_icc_flag(channel, true), Err(Error::InvalidChannel));
        assert_eq!(status.peer_cons_flag(channel), Err(Error::InvalidChannel));
    }
}
