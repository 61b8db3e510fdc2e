//! Synchronous cycle - typically run from the synchronous interrupt.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::stream::{Stream, TransferParams};

/// Moves the image between the two processors.
///
/// Sync version, for transports which complete the exchange before they
/// return, such as an SPI master in blocking mode or dual-ported RAM.
pub trait Transport {
    /// Send `params.producer_data` to the peer and fill
    /// `params.consumer_data` from it.
    fn transfer(&mut self, params: TransferParams<'_>) -> Result<()>;
}

impl<F: FnMut(TransferParams<'_>) -> Result<()>> Transport for F {
    fn transfer(&mut self, params: TransferParams<'_>) -> Result<()> {
        self(params)
    }
}

impl<C> Stream<'_, C> {
    /// Run one cycle: pre actions, transfer, post actions, sync callback.
    ///
    /// Returns the error of the phase which aborted the cycle:
    /// [`crate::Error::PreActionFailed`], [`crate::Error::TransferFailed`],
    /// [`crate::Error::PostActionFailed`] or
    /// [`crate::Error::SyncCallbackFailed`].
    pub fn process<T: Transport + ?Sized>(&mut self, ctx: &mut C, transport: &mut T) -> Result<()> {
        self.run_pre(ctx)?;
        let result = transport.transfer(self.transfer_params());
        self.finish_transfer(result)?;
        self.run_post(ctx)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use crate::layout::{BUFFER_COUNT, BufferId, IMAGE_SIZE, PRODUCER_REGION_SIZE};
    use crate::stream::{ActionKind, Phase, Stream, TransferParams};
    use crate::tbuf::Tbuf;
    use crate::{Error, ErrorInfo, ErrorSource, Result};

    // Context recording the order things ran in
    #[derive(Default)]
    struct Trace {
        events: Vec<&'static str>,
        readback: Option<u8>,
    }

    // Consumer bytes come back as producer bytes
    fn loopback(params: TransferParams<'_>) -> Result<()> {
        assert_eq!(params.producer_data.len(), PRODUCER_REGION_SIZE);
        params.producer_data.copy_from_slice(params.consumer_data);
        Ok(())
    }

    #[test]
    fn end_to_end_loopback() {
        let mut image = [0u8; IMAGE_SIZE];
        let pre = |buf: &mut Tbuf<'_>, _: &mut Trace| -> Result<()> { buf.write_u8(0, 0xAA) };
        let post = |buf: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.readback = Some(buf.read_u8(0)?);
            assert_eq!(buf.read_u8(0), Ok(0xAA));
            Ok(())
        };

        let mut stream: Stream<'_, Trace> = Stream::new(&mut image).unwrap();
        for index in 0..BUFFER_COUNT {
            assert!(stream.get_buffer_param(index).is_some());
        }
        assert_eq!(stream.get_buffer_param(BUFFER_COUNT), None);

        stream
            .register_action(ActionKind::Pre, BufferId::SsdoRx1, &pre)
            .unwrap();
        stream
            .register_action(ActionKind::Post, BufferId::SsdoRx1, &post)
            .unwrap();

        let mut ctx = Trace::default();
        assert_eq!(stream.process(&mut ctx, &mut loopback), Ok(()));
        assert_eq!(ctx.readback, Some(0xAA));
        assert_eq!(stream.phase(), Phase::Idle);
        assert_eq!(stream.cycles(), 1);

        // The mirrored producer buffer carries the looped back byte
        let image_base = stream.image().as_ptr() as usize;
        let mirror = stream.get_buffer_param(BufferId::SsdoTx1.index()).unwrap();
        assert_eq!(stream.image()[mirror.base - image_base], 0xAA);
    }

    #[test]
    fn phases_run_in_order() {
        let mut image = [0u8; IMAGE_SIZE];
        let pre_a = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("pre-a");
            Ok(())
        };
        let pre_b = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("pre-b");
            Ok(())
        };
        let post = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("post");
            Ok(())
        };
        let sync = |ctx: &mut Trace| -> Result<()> {
            ctx.events.push("sync");
            Ok(())
        };

        let mut stream: Stream<'_, Trace> = Stream::new(&mut image).unwrap();
        stream
            .register_action(ActionKind::Post, BufferId::CyclicIn, &post)
            .unwrap();
        stream
            .register_action(ActionKind::Pre, BufferId::CyclicOut, &pre_a)
            .unwrap();
        stream
            .register_action(ActionKind::Pre, BufferId::StatusOut, &pre_b)
            .unwrap();
        stream.register_sync_callback(&sync);

        let mut ctx = Trace::default();
        for _ in 0..2 {
            stream
                .process(&mut ctx, &mut |_: TransferParams<'_>| -> Result<()> { Ok(()) })
                .unwrap();
        }
        assert_eq!(
            ctx.events,
            ["pre-a", "pre-b", "post", "sync", "pre-a", "pre-b", "post", "sync"]
        );
    }

    #[test]
    fn failure_skips_later_phases() {
        let mut image = [0u8; IMAGE_SIZE];
        let pre_ok = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("pre");
            Ok(())
        };
        let pre_fail = |_: &mut Tbuf<'_>, _: &mut Trace| -> Result<()> { Err(Error::Io) };
        let post = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("post");
            Ok(())
        };
        let sync = |ctx: &mut Trace| -> Result<()> {
            ctx.events.push("sync");
            Ok(())
        };
        let reported = core::cell::RefCell::new(Vec::new());
        let handler = |info: ErrorInfo| reported.borrow_mut().push(info);

        let mut stream: Stream<'_, Trace> = Stream::new(&mut image).unwrap();
        stream.set_error_handler(&handler);
        stream
            .register_action(ActionKind::Pre, BufferId::CyclicOut, &pre_ok)
            .unwrap();
        stream
            .register_action(ActionKind::Post, BufferId::CyclicIn, &post)
            .unwrap();
        stream.register_sync_callback(&sync);

        // Transfer fails
        let mut ctx = Trace::default();
        let mut transferred = 0;
        let result = stream.process(&mut ctx, &mut |_: TransferParams<'_>| -> Result<()> {
            transferred += 1;
            Err(Error::Io)
        });
        assert_eq!(result, Err(Error::TransferFailed));
        assert_eq!(stream.phase(), Phase::Failed);
        assert_eq!(ctx.events, ["pre"]);
        assert_eq!(transferred, 1);

        // Next cycle is unaffected
        ctx.events.clear();
        stream
            .process(&mut ctx, &mut |_: TransferParams<'_>| -> Result<()> { Ok(()) })
            .unwrap();
        assert_eq!(ctx.events, ["pre", "post", "sync"]);
        assert_eq!(stream.cycles(), 1);

        // A failing pre action stops the cycle before the transfer
        stream
            .register_action(ActionKind::Pre, BufferId::SsdoTx0, &pre_fail)
            .unwrap();
        ctx.events.clear();
        let mut transferred = 0;
        let result = stream.process(&mut ctx, &mut |_: TransferParams<'_>| -> Result<()> {
            transferred += 1;
            Ok(())
        });
        assert_eq!(result, Err(Error::PreActionFailed));
        assert_eq!(ctx.events, ["pre"]);
        assert_eq!(transferred, 0);

        assert_eq!(
            *reported.borrow(),
            [
                ErrorInfo::new(ErrorSource::Stream, Error::TransferFailed),
                ErrorInfo::new(ErrorSource::Stream, Error::PreActionFailed),
            ]
        );
    }

    #[test]
    fn failing_sync_callback_keeps_post_actions() {
        let mut image = [0u8; IMAGE_SIZE];
        let post = |buf: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.readback = Some(buf.read_u8(0)?);
            Ok(())
        };
        let sync = |_: &mut Trace| -> Result<()> { Err(Error::Io) };

        let mut stream: Stream<'_, Trace> = Stream::new(&mut image).unwrap();
        stream
            .register_action(ActionKind::Post, BufferId::CyclicIn, &post)
            .unwrap();
        stream.register_sync_callback(&sync);

        let mut ctx = Trace::default();
        let result = stream.process(&mut ctx, &mut |params: TransferParams<'_>| -> Result<()> {
            params.consumer_data.fill(0x5A);
            Ok(())
        });
        assert_eq!(result, Err(Error::SyncCallbackFailed));
        assert_eq!(ctx.readback, Some(0x5A));
        assert_eq!(stream.phase(), Phase::Failed);
    }

    #[test]
    fn action_lists_are_bounded() {
        let mut image = [0u8; IMAGE_SIZE];
        let pre = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("pre");
            Ok(())
        };
        let extra = |_: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.events.push("extra");
            Ok(())
        };

        let mut stream: Stream<'_, Trace> = Stream::new(&mut image).unwrap();
        for id in BufferId::ALL {
            stream.register_action(ActionKind::Pre, id, &pre).unwrap();
        }
        assert_eq!(
            stream.register_action(ActionKind::Pre, BufferId::CyclicOut, &extra),
            Err(Error::ActionListFull)
        );
        // Post list is separate
        assert_eq!(
            stream.register_action(ActionKind::Post, BufferId::CyclicIn, &extra),
            Ok(())
        );

        let mut ctx = Trace::default();
        stream
            .process(&mut ctx, &mut |_: TransferParams<'_>| -> Result<()> { Ok(()) })
            .unwrap();
        assert_eq!(ctx.events.len(), BUFFER_COUNT + 1);
        assert_eq!(ctx.events.iter().filter(|e| **e == "pre").count(), BUFFER_COUNT);
    }

    #[test]
    fn ack_bits_follow_set_ack() {
        let mut image = [0u8; IMAGE_SIZE];
        let fresh = |buf: &mut Tbuf<'_>, _: &mut Trace| -> Result<()> {
            buf.write_u8(0, 1)?;
            buf.set_ack();
            Ok(())
        };
        let check = |buf: &mut Tbuf<'_>, ctx: &mut Trace| -> Result<()> {
            ctx.readback = Some(buf.ack_pending() as u8);
            Ok(())
        };

        let mut stream: Stream<'_, Trace> = Stream::new(&mut image).unwrap();
        stream
            .register_action(ActionKind::Pre, BufferId::SsdoTx1, &fresh)
            .unwrap();
        stream
            .register_action(ActionKind::Post, BufferId::SsdoRx1, &check)
            .unwrap();

        // Crossed over: our producer region becomes our consumer region
        let mut ctx = Trace::default();
        stream
            .process(&mut ctx, &mut |params: TransferParams<'_>| -> Result<()> {
                params.consumer_data.copy_from_slice(params.producer_data);
                Ok(())
            })
            .unwrap();
        assert_eq!(ctx.readback, Some(1));

        let ack = stream.get_buffer_param(BufferId::AckRegProd.index()).unwrap();
        let image_base = stream.image().as_ptr() as usize;
        let offset = ack.base - image_base;
        assert_eq!(
            stream.image()[offset],
            BufferId::SsdoTx1.ack_mask() as u8
        );
    }

    #[test]
    fn image_too_small() {
        let mut image = [0u8; IMAGE_SIZE - 1];
        assert_eq!(
            Stream::<Trace>::new(&mut image).err(),
            Some(Error::SizeMismatch)
        );
    }
}
