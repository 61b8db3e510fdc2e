//! Shared memory image layout.
//!
//! The image exchanged every cycle is the wire format of the whole link.  It
//! must match bit for bit on both processors.  It is made of two groups of
//! buffers, each preceded by a fixed-size initialization header owned by the
//! physical transport:
//!
//! ```text
//! +--------+---------------------------------+--------+---------------------------------+
//! | header | consumer group (ack + buffers)  | header | producer group (ack + buffers)  |
//! +--------+---------------------------------+--------+---------------------------------+
//! ```
//!
//! The groups mirror each other, so one side's producer group lands in the
//! other side's consumer group unchanged.
//!
//! Table offsets in [`BUFFER_LAYOUT`] do not include the headers.
//! [`generate_descriptor_list()`] adds them, so that higher layers only ever
//! see payload regions.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::mem::{offset_of, size_of};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Size of the initialization header the transport places ahead of each
/// buffer group
pub const TBUF_INIT_HEADER_SIZE: usize = 4;

/// Number of logical buffers in the image
pub const BUFFER_COUNT: usize = 10;

/// Number of buffers in each of the two groups
pub const GROUP_SIZE: usize = BUFFER_COUNT / 2;

/// Size of an acknowledge register
pub const ACK_REGISTER_SIZE: usize = size_of::<u32>();

/// Size of the cyclic process image in each direction
pub const CYCLIC_IMAGE_SIZE: usize = 16;

/// Maximum SSDO payload carried by one frame
pub const SSDO_PAYLOAD_SIZE: usize = 28;

/// Number of SSDO channels in each direction
pub const SSDO_CHANNEL_COUNT: usize = 2;

/// Header of an SSDO frame
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SsdoFrameHdr {
    /// Raw [`crate::seqnr::SeqNr`] value
    pub seq_nr: u8,
    pub reserved: u8,
    /// Valid bytes in the payload, little endian
    pub length: u16,
}

/// SSDO frame as carried by an SSDO transmit/receive buffer
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SsdoFrame {
    pub hdr: SsdoFrameHdr,
    pub payload: [u8; SSDO_PAYLOAD_SIZE],
}

/// SsdoFrame offsets
impl SsdoFrame {
    pub const fn seq_nr_offset() -> usize {
        offset_of!(SsdoFrame, hdr) + offset_of!(SsdoFrameHdr, seq_nr)
    }

    pub const fn length_offset() -> usize {
        offset_of!(SsdoFrame, hdr) + offset_of!(SsdoFrameHdr, length)
    }

    pub const fn payload_offset() -> usize {
        offset_of!(SsdoFrame, payload)
    }
}

/// Status frame carried by the status buffers
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StatusFrame {
    /// One bit per SSDO transmit channel holding an unconsumed frame
    pub icc_status: u16,
    /// One bit per SSDO receive channel, the parity of the last accepted
    /// sequence number
    pub cons_status: u16,
    /// Sender's cycle counter
    pub cycle: u32,
}

/// StatusFrame offsets
impl StatusFrame {
    pub const fn icc_status_offset() -> usize {
        offset_of!(StatusFrame, icc_status)
    }

    pub const fn cons_status_offset() -> usize {
        offset_of!(StatusFrame, cons_status)
    }

    pub const fn cycle_offset() -> usize {
        offset_of!(StatusFrame, cycle)
    }
}

pub const SSDO_FRAME_SIZE: usize = size_of::<SsdoFrame>();
pub const STATUS_FRAME_SIZE: usize = size_of::<StatusFrame>();

// Wire format sizes.  Changing these breaks compatibility with the peer.
const _: () = {
    assert!(SSDO_FRAME_SIZE == 32);
    assert!(STATUS_FRAME_SIZE == 8);
    assert!(SSDO_CHANNEL_COUNT <= 16);
};

/// Logical buffer identifiers, in image order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
    AckRegCons = 0,
    CyclicIn = 1,
    SsdoRx0 = 2,
    SsdoRx1 = 3,
    StatusIn = 4,
    AckRegProd = 5,
    CyclicOut = 6,
    SsdoTx0 = 7,
    SsdoTx1 = 8,
    StatusOut = 9,
}

impl BufferId {
    pub const ALL: [BufferId; BUFFER_COUNT] = [
        BufferId::AckRegCons,
        BufferId::CyclicIn,
        BufferId::SsdoRx0,
        BufferId::SsdoRx1,
        BufferId::StatusIn,
        BufferId::AckRegProd,
        BufferId::CyclicOut,
        BufferId::SsdoTx0,
        BufferId::SsdoTx1,
        BufferId::StatusOut,
    ];

    pub fn from_index(index: usize) -> Option<BufferId> {
        Self::ALL.get(index).copied()
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn role(self) -> BufferRole {
        BUFFER_LAYOUT[self.index()].role
    }

    /// Whether this buffer belongs to the producer group
    pub const fn is_producer_group(self) -> bool {
        self.index() >= GROUP_SIZE
    }

    /// Acknowledge register guarding this buffer's group
    pub const fn ack_register(self) -> BufferId {
        if self.is_producer_group() {
            BufferId::AckRegProd
        } else {
            BufferId::AckRegCons
        }
    }

    /// Bit in the acknowledge register.  Position within the group, so a
    /// producer buffer and its mirrored consumer buffer share the bit.
    pub const fn ack_mask(self) -> u32 {
        1 << (self.index() % GROUP_SIZE)
    }
}

/// Role of a buffer from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Acknowledge register of a group
    Ack,
    /// Written by the peer, read locally
    Consumer,
    /// Written locally, read by the peer
    Producer,
}

/// One entry of the layout table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub id: BufferId,
    /// Offset from the start of the image, headers excluded
    pub offset: usize,
    pub size: usize,
    pub role: BufferRole,
}

const fn entry(id: BufferId, offset: usize, size: usize, role: BufferRole) -> BufferLayout {
    BufferLayout {
        id,
        offset,
        size,
        role,
    }
}

const OFF_CYCLIC_IN: usize = ACK_REGISTER_SIZE;
const OFF_SSDO_RX0: usize = OFF_CYCLIC_IN + CYCLIC_IMAGE_SIZE;
const OFF_SSDO_RX1: usize = OFF_SSDO_RX0 + SSDO_FRAME_SIZE;
const OFF_STATUS_IN: usize = OFF_SSDO_RX1 + SSDO_FRAME_SIZE;
const OFF_ACK_PROD: usize = OFF_STATUS_IN + STATUS_FRAME_SIZE;
const OFF_CYCLIC_OUT: usize = OFF_ACK_PROD + ACK_REGISTER_SIZE;
const OFF_SSDO_TX0: usize = OFF_CYCLIC_OUT + CYCLIC_IMAGE_SIZE;
const OFF_SSDO_TX1: usize = OFF_SSDO_TX0 + SSDO_FRAME_SIZE;
const OFF_STATUS_OUT: usize = OFF_SSDO_TX1 + SSDO_FRAME_SIZE;
const OFF_END: usize = OFF_STATUS_OUT + STATUS_FRAME_SIZE;

/// The static layout table
pub const BUFFER_LAYOUT: [BufferLayout; BUFFER_COUNT] = [
    entry(BufferId::AckRegCons, 0, ACK_REGISTER_SIZE, BufferRole::Ack),
    entry(BufferId::CyclicIn, OFF_CYCLIC_IN, CYCLIC_IMAGE_SIZE, BufferRole::Consumer),
    entry(BufferId::SsdoRx0, OFF_SSDO_RX0, SSDO_FRAME_SIZE, BufferRole::Consumer),
    entry(BufferId::SsdoRx1, OFF_SSDO_RX1, SSDO_FRAME_SIZE, BufferRole::Consumer),
    entry(BufferId::StatusIn, OFF_STATUS_IN, STATUS_FRAME_SIZE, BufferRole::Consumer),
    entry(BufferId::AckRegProd, OFF_ACK_PROD, ACK_REGISTER_SIZE, BufferRole::Ack),
    entry(BufferId::CyclicOut, OFF_CYCLIC_OUT, CYCLIC_IMAGE_SIZE, BufferRole::Producer),
    entry(BufferId::SsdoTx0, OFF_SSDO_TX0, SSDO_FRAME_SIZE, BufferRole::Producer),
    entry(BufferId::SsdoTx1, OFF_SSDO_TX1, SSDO_FRAME_SIZE, BufferRole::Producer),
    entry(BufferId::StatusOut, OFF_STATUS_OUT, STATUS_FRAME_SIZE, BufferRole::Producer),
];

/// Size of the consumer region handed to the transport, header included
pub const CONSUMER_REGION_SIZE: usize = TBUF_INIT_HEADER_SIZE + OFF_ACK_PROD;

/// Size of the producer region handed to the transport, header included
pub const PRODUCER_REGION_SIZE: usize = TBUF_INIT_HEADER_SIZE + (OFF_END - OFF_ACK_PROD);

/// Total size of the shared image
pub const IMAGE_SIZE: usize = CONSUMER_REGION_SIZE + PRODUCER_REGION_SIZE;

const _: () = {
    assert!(CONSUMER_REGION_SIZE == PRODUCER_REGION_SIZE);
    assert!(BUFFER_COUNT <= 32);
};

/// Size of the structure a buffer carries.  Each layout entry must match it.
pub const fn expected_size(id: BufferId) -> usize {
    match id {
        BufferId::AckRegCons | BufferId::AckRegProd => ACK_REGISTER_SIZE,
        BufferId::CyclicIn | BufferId::CyclicOut => CYCLIC_IMAGE_SIZE,
        BufferId::SsdoRx0 | BufferId::SsdoRx1 | BufferId::SsdoTx0 | BufferId::SsdoTx1 => {
            SSDO_FRAME_SIZE
        }
        BufferId::StatusIn | BufferId::StatusOut => STATUS_FRAME_SIZE,
    }
}

/// Number of initialization headers ahead of a layout entry.
///
/// The consumer acknowledge register and the consumer buffers sit behind one
/// header, the producer acknowledge register and the producer buffers behind
/// two.
pub const fn init_offset(layout: &BufferLayout) -> usize {
    match layout.role {
        BufferRole::Consumer => TBUF_INIT_HEADER_SIZE,
        BufferRole::Producer => 2 * TBUF_INIT_HEADER_SIZE,
        BufferRole::Ack => {
            if layout.id.is_producer_group() {
                2 * TBUF_INIT_HEADER_SIZE
            } else {
                TBUF_INIT_HEADER_SIZE
            }
        }
    }
}

/// Location of one buffer in memory
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub base: usize,
    pub size: usize,
}

impl BufferDescriptor {
    pub const fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }
}

/// Generate the descriptor list for an image starting at `base`.
///
/// Fills `out` in table order and returns the number of descriptors written.
///
/// Arguments:
/// - `base` - Address of the start of the image.  Zero is rejected, as is
///   an image which would run past the end of the address space.
/// - `out` - Output list, at least [`BUFFER_COUNT`] entries
pub fn generate_descriptor_list(base: usize, out: &mut [BufferDescriptor]) -> Result<usize> {
    if base == 0 {
        return Err(Error::InvalidParameter);
    }
    if out.len() < BUFFER_LAYOUT.len() {
        return Err(Error::InvalidParameter);
    }

    if base.checked_add(IMAGE_SIZE).is_none() {
        return Err(Error::InvalidParameter);
    }

    for (desc, layout) in out.iter_mut().zip(BUFFER_LAYOUT.iter()) {
        *desc = BufferDescriptor {
            base: base + layout.offset + init_offset(layout),
            size: layout.size,
        };
    }

    trace!("Generated {} descriptors at {base:#010X}", BUFFER_LAYOUT.len());

    Ok(BUFFER_LAYOUT.len())
}

/// Check every layout entry against the size of the structure it carries.
pub fn check_layout() -> Result<()> {
    for (index, layout) in BUFFER_LAYOUT.iter().enumerate() {
        if layout.id.index() != index {
            error!("Layout entry {index} holds buffer {:?}", layout.id);
            return Err(Error::InvalidParameter);
        }
        let expected = expected_size(layout.id);
        if layout.size != expected {
            error!(
                "Buffer {:?} is {} bytes, structure needs {expected}",
                layout.id, layout.size
            );
            return Err(Error::SizeMismatch);
        }
    }
    Ok(())
}

/// SSDO transmit buffer of a channel
pub fn ssdo_tx_buffer(channel: u8) -> Result<BufferId> {
    match channel {
        0 => Ok(BufferId::SsdoTx0),
        1 => Ok(BufferId::SsdoTx1),
        _ => Err(Error::InvalidChannel),
    }
}

/// SSDO receive buffer of a channel
pub fn ssdo_rx_buffer(channel: u8) -> Result<BufferId> {
    match channel {
        0 => Ok(BufferId::SsdoRx0),
        1 => Ok(BufferId::SsdoRx1),
        _ => Err(Error::InvalidChannel),
    }
}
