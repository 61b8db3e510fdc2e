//! Stream engine.
//!
//! [`Stream`] owns the shared image for the lifetime of the link and runs one
//! transfer cycle per call:
//!
//! ```text
//! Idle -> PreActions -> Transfer -> PostActions -> SyncCallback -> Idle
//!              |            |             |              |
//!              +------------+-------------+--------------+--> Failed
//! ```
//!
//! A failure aborts the remaining phases of that cycle only.  Data a failed
//! action had partly written stays in the image as it is.
//!
//! Actions and the sync callback receive a context `C`, passed to every
//! cycle.  Put whatever the actions need into it, for example an
//! [`crate::appif::AppIf`].
//!
//! See [`sync`] for the blocking cycle and [`futures`] for the async one.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::AsyncTransport;
pub use sync::Transport;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::layout::{
    BUFFER_COUNT, BUFFER_LAYOUT, BufferDescriptor, BufferId, CONSUMER_REGION_SIZE, IMAGE_SIZE,
    PRODUCER_REGION_SIZE, check_layout, generate_descriptor_list,
};
use crate::tbuf::{Tbuf, TbufInitParams, TbufInstance, TbufTable, write_ack};
use crate::{Error, ErrorHandler, ErrorSource, Result, report};

/// Phase an action runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Before the transfer, packs outgoing data
    Pre,
    /// After the transfer, unpacks incoming data
    Post,
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PreActions,
    Transfer,
    PostActions,
    SyncCallback,
    /// The last cycle was aborted
    Failed,
}

/// Action run on one buffer every cycle
pub trait BufferAction<C> {
    fn act(&self, buf: &mut Tbuf<'_>, ctx: &mut C) -> Result<()>;
}

impl<C, F: Fn(&mut Tbuf<'_>, &mut C) -> Result<()>> BufferAction<C> for F {
    fn act(&self, buf: &mut Tbuf<'_>, ctx: &mut C) -> Result<()> {
        self(buf, ctx)
    }
}

/// Callback run once per cycle after the post actions
pub trait SyncCallback<C> {
    fn on_sync(&self, ctx: &mut C) -> Result<()>;
}

impl<C, F: Fn(&mut C) -> Result<()>> SyncCallback<C> for F {
    fn on_sync(&self, ctx: &mut C) -> Result<()> {
        self(ctx)
    }
}

/// What the transport gets to see of the image
#[derive(Debug)]
pub struct TransferParams<'b> {
    /// Location of the consumer region, header included
    pub consumer: BufferDescriptor,
    /// Location of the producer region, header included
    pub producer: BufferDescriptor,
    /// Consumer region, to be filled from the peer
    pub consumer_data: &'b mut [u8],
    /// Producer region, to be sent to the peer.  Mutable for transports
    /// which exchange in place.
    pub producer_data: &'b mut [u8],
}

struct ActionEntry<'a, C> {
    id: BufferId,
    action: &'a dyn BufferAction<C>,
}

// Derived impls would require `C: Copy`
impl<C> Clone for ActionEntry<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ActionEntry<'_, C> {}

struct ActionList<'a, C> {
    entries: [Option<ActionEntry<'a, C>>; BUFFER_COUNT],
    len: usize,
}

impl<'a, C> ActionList<'a, C> {
    fn new() -> Self {
        Self {
            entries: [None; BUFFER_COUNT],
            len: 0,
        }
    }

    fn push(&mut self, entry: ActionEntry<'a, C>) -> Result<()> {
        let slot = self.entries.get_mut(self.len).ok_or(Error::ActionListFull)?;
        *slot = Some(entry);
        self.len += 1;
        Ok(())
    }

    fn get(&self, index: usize) -> Option<ActionEntry<'a, C>> {
        self.entries.get(index).copied().flatten()
    }
}

/// The stream engine
pub struct Stream<'a, C> {
    image: &'a mut [u8],
    descriptors: [BufferDescriptor; BUFFER_COUNT],
    tbufs: TbufTable,
    pre: ActionList<'a, C>,
    post: ActionList<'a, C>,
    sync_callback: Option<&'a dyn SyncCallback<C>>,
    error_handler: Option<&'a dyn ErrorHandler>,
    phase: Phase,
    cycles: u32,
}

impl<'a, C> Stream<'a, C> {
    /// Create a stream over `image`, which must hold at least
    /// [`IMAGE_SIZE`] bytes.
    ///
    /// Checks the layout table against the structures it carries, generates
    /// the descriptor list and creates one triple buffer per layout entry.
    /// Both acknowledge registers are cleared.
    pub fn new(image: &'a mut [u8]) -> Result<Self> {
        if image.len() < IMAGE_SIZE {
            error!(
                "Image of {} bytes too small, need {IMAGE_SIZE}",
                image.len()
            );
            return Err(Error::SizeMismatch);
        }
        check_layout()?;

        let image_base = image.as_ptr() as usize;
        let mut descriptors = [BufferDescriptor::default(); BUFFER_COUNT];
        generate_descriptor_list(image_base, &mut descriptors)?;

        let mut tbufs = TbufTable::new();
        for (desc, layout) in descriptors.iter().zip(BUFFER_LAYOUT.iter()) {
            let ack = descriptors[layout.id.ack_register().index()];
            tbufs.create(TbufInitParams {
                id: layout.id,
                base: desc.base - image_base,
                ack_base: ack.base - image_base,
                size: desc.size,
            })?;
        }

        for id in [BufferId::AckRegCons, BufferId::AckRegProd] {
            write_ack(image, descriptors[id.index()].base - image_base, 0)?;
        }

        debug!("Created stream at {image_base:#010X} size {IMAGE_SIZE} bytes");

        Ok(Self {
            image,
            descriptors,
            tbufs,
            pre: ActionList::new(),
            post: ActionList::new(),
            sync_callback: None,
            error_handler: None,
            phase: Phase::Idle,
            cycles: 0,
        })
    }

    /// Forward cycle failures to `handler`
    pub fn set_error_handler(&mut self, handler: &'a dyn ErrorHandler) {
        self.error_handler = Some(handler);
    }

    /// Register an action on buffer `id`.
    ///
    /// Actions of a kind run in registration order.  Each list holds at most
    /// [`BUFFER_COUNT`] actions; beyond that [`Error::ActionListFull`] is
    /// returned and the registered actions are unchanged.
    pub fn register_action(
        &mut self,
        kind: ActionKind,
        id: BufferId,
        action: &'a dyn BufferAction<C>,
    ) -> Result<()> {
        let list = match kind {
            ActionKind::Pre => &mut self.pre,
            ActionKind::Post => &mut self.post,
        };
        list.push(ActionEntry { id, action }).inspect_err(|_| {
            warn!("No room for {kind:?} action on {id:?}");
        })
    }

    /// Register the callback run after the post actions
    pub fn register_sync_callback(&mut self, callback: &'a dyn SyncCallback<C>) {
        self.sync_callback = Some(callback);
    }

    /// Descriptor of buffer `index`, `None` if out of range
    pub fn get_buffer_param(&self, index: usize) -> Option<BufferDescriptor> {
        self.descriptors.get(index).copied()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of cycles completed without failure
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Read-only view of the whole image
    pub fn image(&self) -> &[u8] {
        self.image
    }

    // Start a cycle: clear the producer acknowledge register and run the
    // pre actions.
    pub(crate) fn run_pre(&mut self, ctx: &mut C) -> Result<()> {
        self.phase = Phase::PreActions;
        let cleared = self
            .tbuf(BufferId::AckRegProd)
            .and_then(|ack| write_ack(self.image, ack.base(), 0));
        if let Err(e) = cleared {
            return Err(self.fail(e, Error::PreActionFailed));
        }
        for index in 0..self.pre.len {
            if let Some(entry) = self.pre.get(index) {
                if let Err(e) = self.run_action(entry, ctx) {
                    return Err(self.fail(e, Error::PreActionFailed));
                }
            }
        }
        self.phase = Phase::Transfer;
        Ok(())
    }

    pub(crate) fn transfer_params(&mut self) -> TransferParams<'_> {
        let image_base = self.image.as_ptr() as usize;
        let (consumer_data, rest) = self.image.split_at_mut(CONSUMER_REGION_SIZE);
        TransferParams {
            consumer: BufferDescriptor {
                base: image_base,
                size: CONSUMER_REGION_SIZE,
            },
            producer: BufferDescriptor {
                base: image_base + CONSUMER_REGION_SIZE,
                size: PRODUCER_REGION_SIZE,
            },
            consumer_data,
            producer_data: &mut rest[..PRODUCER_REGION_SIZE],
        }
    }

    pub(crate) fn finish_transfer(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e, Error::TransferFailed)),
        }
    }

    // Run the post actions, then the sync callback, and end the cycle.
    pub(crate) fn run_post(&mut self, ctx: &mut C) -> Result<()> {
        self.phase = Phase::PostActions;
        for index in 0..self.post.len {
            if let Some(entry) = self.post.get(index) {
                if let Err(e) = self.run_action(entry, ctx) {
                    return Err(self.fail(e, Error::PostActionFailed));
                }
            }
        }

        if let Some(callback) = self.sync_callback {
            self.phase = Phase::SyncCallback;
            if let Err(e) = callback.on_sync(ctx) {
                return Err(self.fail(e, Error::SyncCallbackFailed));
            }
        }

        self.phase = Phase::Idle;
        self.cycles = self.cycles.wrapping_add(1);
        Ok(())
    }

    fn tbuf(&self, id: BufferId) -> Result<TbufInstance> {
        self.tbufs.get(id).ok_or(Error::InvalidHandle)
    }

    fn run_action(&mut self, entry: ActionEntry<'a, C>, ctx: &mut C) -> Result<()> {
        let instance = self.tbuf(entry.id)?;
        let ack_requested = {
            let mut buf = instance.view(self.image)?;
            entry.action.act(&mut buf, ctx)?;
            buf.ack_requested()
        };
        if ack_requested {
            instance.set_ack(self.image)?;
        }
        Ok(())
    }

    fn fail(&mut self, cause: Error, error: Error) -> Error {
        warn!("{:?} aborted cycle: {cause:?}", self.phase);
        self.phase = Phase::Failed;
        report(self.error_handler, ErrorSource::Stream, error);
        error
    }
}

impl<C> core::fmt::Debug for Stream<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stream")
            .field("descriptors", &self.descriptors)
            .field("pre_actions", &self.pre.len)
            .field("post_actions", &self.post.len)
            .field("phase", &self.phase)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}
