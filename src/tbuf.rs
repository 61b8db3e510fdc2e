//! Triple buffers.
//!
//! A triple buffer is one logical buffer of the shared image with a single
//! writer.  [`TbufInstance`] records where it lives, [`TbufTable`] holds one
//! instance per [`BufferId`], and [`Tbuf`] is the view handed to actions for
//! the duration of one call.
//!
//! Every access through [`Tbuf`] is bounds checked and fails with
//! [`Error::OutOfBounds`] rather than touching memory outside the buffer.
//! Multi-byte values are little endian.
//!
//! The acknowledge protocol: a producer calls [`Tbuf::set_ack()`] after
//! writing fresh data.  The stream sets the buffer's bit in the group's
//! acknowledge register once the action returns.  A consumer checks
//! [`Tbuf::ack_pending()`] to learn whether the peer flagged the buffer in
//! the register it sent this cycle.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{Ordering, compiler_fence};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::layout::{ACK_REGISTER_SIZE, BUFFER_COUNT, BufferId};
use crate::{Error, Result};

/// Parameters for creating a triple buffer instance.  Offsets are relative
/// to the start of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbufInitParams {
    pub id: BufferId,
    pub base: usize,
    pub ack_base: usize,
    pub size: usize,
}

/// Location of one triple buffer and its acknowledge register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbufInstance {
    id: BufferId,
    base: usize,
    size: usize,
    ack_base: usize,
}

impl TbufInstance {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn ack_base(&self) -> usize {
        self.ack_base
    }

    /// Read the acknowledge register guarding this buffer
    pub fn read_ack(&self, image: &[u8]) -> Result<u32> {
        let reg = image
            .get(register_range(self.ack_base)?)
            .ok_or(Error::OutOfBounds)?;
        compiler_fence(Ordering::Acquire);
        Ok(u32::from_le_bytes([reg[0], reg[1], reg[2], reg[3]]))
    }

    /// Set this buffer's bit in its acknowledge register
    pub fn set_ack(&self, image: &mut [u8]) -> Result<()> {
        let value = self.read_ack(image)? | self.id.ack_mask();
        write_ack(image, self.ack_base, value)
    }

    /// Whether the acknowledge register has this buffer's bit set
    pub fn ack_pending(&self, image: &[u8]) -> Result<bool> {
        Ok(self.read_ack(image)? & self.id.ack_mask() != 0)
    }

    /// Borrow a checked view of this buffer for one call
    pub fn view<'b>(&self, image: &'b mut [u8]) -> Result<Tbuf<'b>> {
        let peer_ack = self.ack_pending(image)?;
        let end = self.base.checked_add(self.size).ok_or(Error::OutOfBounds)?;
        let data = image.get_mut(self.base..end).ok_or(Error::OutOfBounds)?;
        Ok(Tbuf::new(self.id, data, peer_ack))
    }
}

fn register_range(ack_base: usize) -> Result<core::ops::Range<usize>> {
    let end = ack_base
        .checked_add(ACK_REGISTER_SIZE)
        .ok_or(Error::OutOfBounds)?;
    Ok(ack_base..end)
}

/// Overwrite an acknowledge register
pub(crate) fn write_ack(image: &mut [u8], ack_base: usize, value: u32) -> Result<()> {
    let reg = image
        .get_mut(register_range(ack_base)?)
        .ok_or(Error::OutOfBounds)?;
    compiler_fence(Ordering::Release);
    reg.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Fixed table of triple buffer instances, one slot per [`BufferId`]
#[derive(Debug, Clone)]
pub struct TbufTable {
    slots: [Option<TbufInstance>; BUFFER_COUNT],
}

impl TbufTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; BUFFER_COUNT],
        }
    }

    /// Create the instance for `params.id`.
    ///
    /// Fails with [`Error::InvalidParameter`] for an empty buffer and with
    /// [`Error::NoResource`] if the slot for this id is taken.
    pub fn create(&mut self, params: TbufInitParams) -> Result<TbufInstance> {
        if params.size == 0 {
            return Err(Error::InvalidParameter);
        }

        let slot = &mut self.slots[params.id.index()];
        if slot.is_some() {
            return Err(Error::NoResource);
        }

        let instance = TbufInstance {
            id: params.id,
            base: params.base,
            size: params.size,
            ack_base: params.ack_base,
        };
        *slot = Some(instance);

        trace!(
            "Created tbuf {:?} at +{:#06X} size {} ack +{:#06X}",
            params.id, params.base, params.size, params.ack_base
        );

        Ok(instance)
    }

    /// Free the slot of `id`
    pub fn destroy(&mut self, id: BufferId) -> Result<()> {
        match self.slots[id.index()].take() {
            Some(_) => Ok(()),
            None => Err(Error::InvalidHandle),
        }
    }

    pub fn get(&self, id: BufferId) -> Option<TbufInstance> {
        self.slots[id.index()]
    }
}

impl Default for TbufTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked view of one triple buffer, valid for a single action call
#[derive(Debug)]
pub struct Tbuf<'b> {
    id: BufferId,
    data: &'b mut [u8],
    peer_ack: bool,
    ack_requested: bool,
}

impl<'b> Tbuf<'b> {
    /// Wrap `data` as the contents of buffer `id`.
    ///
    /// `peer_ack` is the state of the buffer's bit in its acknowledge
    /// register.
    pub fn new(id: BufferId, data: &'b mut [u8], peer_ack: bool) -> Self {
        Self {
            id,
            data,
            peer_ack,
            ack_requested: false,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data
    }

    /// Borrow `len` bytes starting at `offset`
    pub fn get(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(Error::OutOfBounds)?;
        self.data.get(offset..end).ok_or(Error::OutOfBounds)
    }

    fn get_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let end = offset.checked_add(len).ok_or(Error::OutOfBounds)?;
        self.data.get_mut(offset..end).ok_or(Error::OutOfBounds)
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.data.get(offset).copied().ok_or(Error::OutOfBounds)
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        let bytes = self.get(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes = self.get(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    pub fn read_stream(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self.get(offset, buf.len())?);
        Ok(())
    }

    /// Read a byte which guards the rest of the buffer, such as a sequence
    /// number.  Reads of the guarded data are not moved ahead of it.
    pub fn read_u8_acquire(&self, offset: usize) -> Result<u8> {
        let value = self.read_u8(offset)?;
        compiler_fence(Ordering::Acquire);
        Ok(value)
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        let byte = self.data.get_mut(offset).ok_or(Error::OutOfBounds)?;
        *byte = value;
        Ok(())
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.get_mut(offset, 2)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.get_mut(offset, 4)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Copy `data` into the buffer starting at `offset`
    pub fn write_stream(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.get_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Write a byte which publishes the rest of the buffer.  Earlier writes
    /// are not moved behind it.
    pub fn write_u8_release(&mut self, offset: usize, value: u8) -> Result<()> {
        compiler_fence(Ordering::Release);
        self.write_u8(offset, value)
    }

    /// Flag this buffer as holding fresh data
    pub fn set_ack(&mut self) {
        self.ack_requested = true;
    }

    /// Whether [`Self::set_ack()`] was called on this view
    pub fn ack_requested(&self) -> bool {
        self.ack_requested
    }

    /// Whether the buffer's bit was set in its acknowledge register when the
    /// view was taken
    pub fn ack_pending(&self) -> bool {
        self.peer_ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(id: BufferId, base: usize, size: usize) -> TbufInitParams {
        TbufInitParams {
            id,
            base,
            ack_base: 0,
            size,
        }
    }

    #[test]
    fn create_rejects_empty_and_duplicate() {
        let mut table = TbufTable::new();
        assert_eq!(
            table.create(params(BufferId::CyclicIn, 4, 0)),
            Err(Error::InvalidParameter)
        );
        let inst = table.create(params(BufferId::CyclicIn, 4, 16)).unwrap();
        assert_eq!(
            table.create(params(BufferId::CyclicIn, 4, 16)),
            Err(Error::NoResource)
        );
        assert_eq!(table.get(BufferId::CyclicIn), Some(inst));

        table.destroy(BufferId::CyclicIn).unwrap();
        assert_eq!(table.get(BufferId::CyclicIn), None);
        assert_eq!(table.destroy(BufferId::CyclicIn), Err(Error::InvalidHandle));
        assert!(table.create(params(BufferId::CyclicIn, 4, 16)).is_ok());
    }

    #[test]
    fn accesses_are_bounds_checked() {
        let mut data = [0u8; 8];
        let mut buf = Tbuf::new(BufferId::CyclicOut, &mut data, false);

        buf.write_u32(4, 0xDEAD_BEEF).unwrap();
        assert_eq!(buf.read_u32(4), Ok(0xDEAD_BEEF));
        assert_eq!(buf.read_u8(4), Ok(0xEF));
        assert_eq!(buf.read_u16(6), Ok(0xDEAD));

        assert_eq!(buf.write_u32(5, 1), Err(Error::OutOfBounds));
        assert_eq!(buf.write_u8(8, 1), Err(Error::OutOfBounds));
        assert_eq!(buf.read_u16(7), Err(Error::OutOfBounds));
        assert_eq!(buf.write_stream(6, &[1, 2, 3]), Err(Error::OutOfBounds));
        assert_eq!(buf.get(usize::MAX, 2), Err(Error::OutOfBounds));

        buf.write_stream(0, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 3];
        buf.read_stream(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn ack_register_bits() {
        let mut image = [0u8; 32];
        let inst = TbufTable::new()
            .create(TbufInitParams {
                id: BufferId::SsdoTx1,
                base: 8,
                ack_base: 0,
                size: 8,
            })
            .unwrap();

        assert_eq!(inst.ack_pending(&image), Ok(false));
        inst.set_ack(&mut image).unwrap();
        assert_eq!(inst.read_ack(&image), Ok(BufferId::SsdoTx1.ack_mask()));
        assert!(inst.view(&mut image).unwrap().ack_pending());

        write_ack(&mut image, 0, 0).unwrap();
        let mut view = inst.view(&mut image).unwrap();
        assert!(!view.ack_pending());
        view.set_ack();
        assert!(view.ack_requested());
    }

    #[test]
    fn view_outside_image_fails() {
        let mut image = [0u8; 16];
        let inst = TbufTable::new()
            .create(params(BufferId::CyclicOut, 12, 8))
            .unwrap();
        assert_eq!(inst.view(&mut image).err(), Some(Error::OutOfBounds));
    }

    #[test]
    fn offsets_near_address_limit_fail() {
        let mut image = [0u8; 16];
        let mut table = TbufTable::new();
        let far = table
            .create(TbufInitParams {
                id: BufferId::CyclicOut,
                base: usize::MAX - 2,
                ack_base: usize::MAX - 1,
                size: 8,
            })
            .unwrap();
        assert_eq!(far.view(&mut image).err(), Some(Error::OutOfBounds));
        assert_eq!(far.read_ack(&image), Err(Error::OutOfBounds));
        assert_eq!(far.set_ack(&mut image), Err(Error::OutOfBounds));
        assert_eq!(
            write_ack(&mut image, usize::MAX, 1),
            Err(Error::OutOfBounds)
        );
    }
}
