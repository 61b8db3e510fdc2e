//! Triple-buffer streaming core for the application interface (App-IF) between
//! a communication processor (PCP) and an application processor (AP).
//!
//! The two processors exchange a contiguous shared memory image once per
//! real-time cycle.  The image is cut into logical buffers by a static layout
//! table ([`layout`]).  Each buffer has exactly one writer: the producer group
//! is written locally and copied to the peer, the consumer group is written by
//! the peer and only read locally.  No lock protects the image.  Freshness is
//! signalled by an acknowledge register per group and, for the asynchronous
//! channels, by an alternating sequence number.
//!
//! `no_std`.  Requires `alloc` only for the async transport trait.
//!
//! ## Cycle
//!
//! Every cycle, triggered by the synchronous interrupt, [`stream::Stream`]:
//!
//! 1. runs the registered pre actions, which pack outgoing data into the
//!    producer buffers,
//! 2. calls the injected transport, which moves the bytes to/from the peer,
//! 3. runs the registered post actions, which unpack the consumer buffers,
//! 4. runs the synchronous callback, if any.
//!
//! A failing phase aborts the rest of the cycle.  The next cycle starts
//! from scratch.
//!
//! ## Modules
//!
//! - [`layout`] - Buffer layout table, descriptors and frame structures
//! - [`tbuf`] - Triple-buffer instances and the checked per-cycle buffer view
//! - [`stream`] - The stream engine running one transfer cycle
//! - [`timeout`] - Cycle-counted timers from a fixed pool
//! - [`seqnr`] - Alternating sequence number token
//! - [`status`] - Status/flag exchange used for flow control
//! - [`ssdo`] - Asynchronous SSDO channels (transmit/receive state machines)
//! - [`appif`] - Composition of status, timeouts and SSDO channels
//! - [`transport`] - Transport implementations
//! - [`io`] - Async I/O traits for remote memory access
//!
//! ## Getting Started
//!
//! 1. Reserve the shared image, [`layout::IMAGE_SIZE`] bytes.
//! 2. Create a [`stream::Stream`] over it.
//! 3. Create an [`appif::AppIf`], create the SSDO channels you need, and
//!    call [`appif::AppIf::register`] to hook it into the stream.
//! 4. Register further actions for the cyclic buffers.
//! 5. From the synchronous interrupt, call [`stream::Stream::process`] with
//!    your transport.
//! 6. Post payloads with [`appif::AppIf::post_payload`] between cycles.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable [`stream::AsyncTransport`] and the async cycle (requires
//!   `alloc`).
//!
//! Compile with `--no-default-features` for a target without an allocator.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

pub mod appif;
pub mod io;
pub mod layout;
pub mod seqnr;
pub mod ssdo;
pub mod status;
pub mod stream;
pub mod tbuf;
pub mod timeout;
pub mod transport;

/// App-IF errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Null base address, invalid id or similar
    InvalidParameter,
    /// No free slot in a fixed pool
    NoResource,
    /// Buffer size does not match the structure it carries
    SizeMismatch,
    /// Handle does not refer to a live instance
    InvalidHandle,
    /// Access beyond the end of a buffer
    OutOfBounds,
    /// I/O error in a transport
    Io,
    /// A pre action failed
    PreActionFailed,
    /// The transport failed
    TransferFailed,
    /// A post action failed
    PostActionFailed,
    /// The synchronous callback failed
    SyncCallbackFailed,
    /// Action list for this phase is full
    ActionListFull,
    /// Channel has an unacknowledged frame in flight
    Busy,
    /// Frame dropped after the configured number of retries
    RetryLimitReached,
    /// Timeout pool exhausted
    TimeoutPoolExhausted,
    /// Payload exceeds the channel capacity
    PayloadTooLarge,
    /// Channel instance already exists
    ChannelInUse,
    /// Channel id out of range or channel not created
    InvalidChannel,
    /// Receive handler rejected a frame
    RxHandlerFailed,
}

impl Error {
    /// Flat status code, grouped by subsystem.
    ///
    /// - `0x01..=0x0F` general and configuration
    /// - `0x20..=0x2F` sync processing
    /// - `0x30..=0x3F` async processing
    /// - `0x90..=0x9F` SSDO
    pub const fn code(self) -> u16 {
        match self {
            Error::InvalidParameter => 0x01,
            Error::NoResource => 0x02,
            Error::SizeMismatch => 0x03,
            Error::InvalidHandle => 0x04,
            Error::OutOfBounds => 0x05,
            Error::Io => 0x06,
            Error::PreActionFailed => 0x20,
            Error::TransferFailed => 0x21,
            Error::PostActionFailed => 0x22,
            Error::SyncCallbackFailed => 0x23,
            Error::ActionListFull => 0x24,
            Error::Busy => 0x30,
            Error::RetryLimitReached => 0x31,
            Error::TimeoutPoolExhausted => 0x32,
            Error::PayloadTooLarge => 0x90,
            Error::ChannelInUse => 0x91,
            Error::InvalidChannel => 0x92,
            Error::RxHandlerFailed => 0x93,
        }
    }
}

/// Type to represent the result of an App-IF operation
pub type Result<T> = core::result::Result<T, Error>;

/// Module that raised an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Cycle aborted by the stream engine
    Stream,
    /// Soft error of an SSDO channel
    Ssdo,
}

/// Diagnostic record passed to an [`ErrorHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub source: ErrorSource,
    pub error: Error,
}

impl ErrorInfo {
    pub const fn new(source: ErrorSource, error: Error) -> Self {
        Self { source, error }
    }

    /// Status code of the contained error
    pub const fn code(&self) -> u16 {
        self.error.code()
    }
}

/// Receives internal failures for diagnostic forwarding.
///
/// Optional everywhere it is accepted.  Without one, errors are only logged.
pub trait ErrorHandler {
    fn report(&self, info: ErrorInfo);
}

impl<F: Fn(ErrorInfo)> ErrorHandler for F {
    fn report(&self, info: ErrorInfo) {
        self(info)
    }
}

// Forward to the optional handler, if present.
pub(crate) fn report(handler: Option<&dyn ErrorHandler>, source: ErrorSource, error: Error) {
    if let Some(handler) = handler {
        handler.report(ErrorInfo::new(source, error));
    }
}
