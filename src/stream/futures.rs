//! Asynchronous cycle - typically used by a host driving the link over a
//! debug probe or an async SPI driver.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::stream::{Stream, TransferParams};

/// Moves the image between the two processors.
///
/// Async version, for transports which yield while the exchange is in
/// progress.
#[async_trait(?Send)]
pub trait AsyncTransport {
    /// Send `params.producer_data` to the peer and fill
    /// `params.consumer_data` from it.
    async fn transfer(&mut self, params: TransferParams<'_>) -> Result<()>;
}

impl<C> Stream<'_, C> {
    /// Run one cycle with an async transport.
    ///
    /// Same phases and errors as [`Stream::process()`].  Only the transfer
    /// yields; the actions and the sync callback run to completion.
    pub async fn process_async<T: AsyncTransport + ?Sized>(
        &mut self,
        ctx: &mut C,
        transport: &mut T,
    ) -> Result<()> {
        self.run_pre(ctx)?;
        let result = transport.transfer(self.transfer_params()).await;
        self.finish_transfer(result)?;
        self.run_post(ctx)
    }
}
