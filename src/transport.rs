//! Transports moving the image between the two processors.
//!
//! - [`BufferTransport`] - copies to and from byte slices.  Useful for
//!   simulating a link in a single process.
//! - [`RamTransport`] - copies to and from fixed addresses, for dual-ported
//!   RAM or a DMA window.
//! - [`ReaderWriterTransport`] - async, reaches the peer's memory through
//!   [`crate::io::Reader`] and [`crate::io::Writer`], for example over SWD.
//!
//! In every case the local producer region is sent to the peer's consumer
//! region, and the peer's producer region is fetched into the local consumer
//! region.  The two regions are the same size.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
use alloc::boxed::Box;
#[cfg(feature = "async")]
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

#[cfg(feature = "async")]
use crate::io::{Reader, Writer};
use crate::layout::{CONSUMER_REGION_SIZE, PRODUCER_REGION_SIZE};
#[cfg(feature = "async")]
use crate::stream::AsyncTransport;
use crate::stream::{TransferParams, Transport};
use crate::{Error, Result};

/// Transport over two byte slices
#[derive(Debug)]
pub struct BufferTransport<'w> {
    tx: &'w mut [u8],
    rx: &'w [u8],
}

impl<'w> BufferTransport<'w> {
    /// Send to `tx` and receive from `rx`.  Both must be exactly one region
    /// in size.
    pub fn new(tx: &'w mut [u8], rx: &'w [u8]) -> Result<Self> {
        if tx.len() != PRODUCER_REGION_SIZE || rx.len() != CONSUMER_REGION_SIZE {
            warn!(
                "Transport buffers {}/{} bytes, need {PRODUCER_REGION_SIZE}/{CONSUMER_REGION_SIZE}",
                tx.len(),
                rx.len()
            );
            return Err(Error::SizeMismatch);
        }
        Ok(Self { tx, rx })
    }
}

impl Transport for BufferTransport<'_> {
    fn transfer(&mut self, params: TransferParams<'_>) -> Result<()> {
        self.tx.copy_from_slice(params.producer_data);
        params.consumer_data.copy_from_slice(self.rx);
        Ok(())
    }
}

/// Transport using direct memory access
#[derive(Debug, Clone, Copy)]
pub struct RamTransport {
    tx_addr: usize,
    rx_addr: usize,
}

impl RamTransport {
    /// Create a transport sending to `tx_addr` and receiving from `rx_addr`.
    ///
    /// # Safety
    ///
    /// Both addresses must stay valid for one region's worth of volatile
    /// byte accesses for as long as the transport is used, and nothing else
    /// in this program may hold a reference to that memory.
    pub const unsafe fn new(tx_addr: usize, rx_addr: usize) -> Self {
        Self { tx_addr, rx_addr }
    }
}

impl Transport for RamTransport {
    fn transfer(&mut self, params: TransferParams<'_>) -> Result<()> {
        if self.tx_addr == 0 || self.rx_addr == 0 {
            return Err(Error::InvalidParameter);
        }
        let tx = self.tx_addr as *mut u8;
        for (ii, byte) in params.producer_data.iter().enumerate() {
            unsafe { core::ptr::write_volatile(tx.add(ii), *byte) };
        }
        let rx = self.rx_addr as *const u8;
        for (ii, byte) in params.consumer_data.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile(rx.add(ii)) };
        }
        Ok(())
    }
}

/// Async transport using [`crate::io::Reader`] and [`crate::io::Writer`].
///
/// The local producer region is written to `tx_addr` in the peer's memory
/// map, and the peer's producer region is read from `rx_addr`.
#[cfg(feature = "async")]
pub struct ReaderWriterTransport<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
    tx_addr: u32,
    rx_addr: u32,
}

#[cfg(feature = "async")]
impl<'a, R: Reader, W: Writer> ReaderWriterTransport<'a, R, W> {
    pub fn new(reader: &'a mut R, writer: &'a mut W, tx_addr: u32, rx_addr: u32) -> Self {
        Self {
            reader,
            writer,
            tx_addr,
            rx_addr,
        }
    }

    /// Point the transport at new peer addresses, for example after the
    /// peer has reported where its image lives.
    pub fn relocate(&mut self, tx_addr: u32, rx_addr: u32) {
        debug!("Transport relocated to tx {tx_addr:#010X} rx {rx_addr:#010X}");
        self.tx_addr = tx_addr;
        self.rx_addr = rx_addr;
        self.writer.update_base_address(tx_addr);
        self.reader.update_base_address(rx_addr);
    }
}

#[cfg(feature = "async")]
#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncTransport for ReaderWriterTransport<'_, R, W> {
    async fn transfer(&mut self, params: TransferParams<'_>) -> Result<()> {
        self.writer
            .write(self.tx_addr, params.producer_data)
            .await
            .map_err(|e| {
                warn!("Write to {:#010X} failed: {e:?}", self.tx_addr);
                Error::Io
            })?;
        self.reader
            .read(self.rx_addr, params.consumer_data)
            .await
            .map_err(|e| {
                warn!("Read from {:#010X} failed: {e:?}", self.rx_addr);
                Error::Io
            })
    }
}
