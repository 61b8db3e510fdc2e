//! Async I/O traits for reaching the peer's memory.
//!
//! Used by [`crate::transport::ReaderWriterTransport`] when the image of the
//! peer processor is not directly addressable, for example when a host
//! drives the link through a debug probe.
//!
//! # Possible implementations
//!
//! - SWD or JTAG memory access to the peer's RAM
//! - A bridge processor forwarding reads and writes over SPI or USB
//! - Plain buffers, when simulating both processors in one program
//!
//! # Address Space
//!
//! Addresses are absolute, as they appear in the peer's memory map.  The
//! implementation translates them to whatever it uses internally.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Reads from the peer's memory
pub trait Reader {
    /// The error type returned by read operations.
    ///
    /// This allows implementations to use their own error types, such as
    /// probe errors.
    type Error: core::fmt::Debug;

    /// Fill `buf` from the peer's memory, starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address range is not readable or the
    /// underlying access fails.
    ///
    /// # Performance Notes
    ///
    /// A transfer reads one whole region in a single call.  Implementations
    /// accessing the peer through a debug interface should use bulk reads.
    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Updates the reader's base address if it is later detected that it needs
    /// to change.
    fn update_base_address(&mut self, new_base: u32);
}

/// Writes to the peer's memory
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write `data` to the peer's memory, starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address range is not writable or the
    /// underlying access fails.
    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;

    /// Updates the writer's base address if it is later detected that it needs
    /// to change.
    fn update_base_address(&mut self, new_base: u32);
}
