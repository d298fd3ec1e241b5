// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor ring buffer implementations.
//!
//! The thing we're calling a "descriptor ring buffer" is a data structure that
//! has an array of *descriptors* that can be used to send commands to the
//! Ethernet DMA engine, and an array of *buffers* that can be used to hold
//! Ethernet frame data. Each descriptor is permanently associated with the
//! buffer at the same index.
//!
//! # Descriptor ownership
//!
//! A descriptor is either owned by the hardware or by software, as recorded by
//! the OWN bit in its last word. Software sets OWN to hand a descriptor (and
//! its buffer) to the DMA; the DMA clears it when it is done. The OWN bit is
//! the only synchronization between the two.
//!
//! From a Rust perspective, the hardware acts as another mutator/observer of
//! the descriptor and buffer. So:
//!
//! - Descriptor words are `VolatileCell`s and we only ever hold shared
//!   references to descriptors.
//! - Buffers live in `UnsafeCell`s, and we only materialize a slice of one
//!   after checking that its descriptor is not OWNed, and only for the
//!   duration of a caller-provided closure, so it can't escape.
//!
//! # Storage
//!
//! The descriptors and buffers live in a [`RingStorage`], which on target is
//! a `static` placed in DMA-reachable RAM. A `Ring` borrows its storage and
//! claims it on creation; handing the same storage to a second ring panics,
//! since two cursors over one set of descriptors would hand the DMA the same
//! buffer twice.
//!
//! ```text
//!   +------------------------------------------------+
//!   |  avail   |    OWNED  |  avail                  |
//!   +------------------------------------------------+
//!      next, --^            ^-- next, when tx
//!      when rx
//! ```
//!
//! In the transmit case, all descriptors start out owned by software. To send,
//! software fills the buffer at `next`, marks the descriptor OWNed and
//! advances. If `next` is still OWNed, the ring is full.
//!
//! In the receive case, all descriptors start out owned by the hardware. The
//! DMA fills buffers in order and clears OWN; software consumes the buffer at
//! `next`, re-arms the descriptor and advances. If `next` is still OWNed, the
//! ring is empty.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::cache;
use crate::desc::{Descriptor, RxDescriptor, TxDescriptor};

/// Size of each frame buffer. Must fit in the 14-bit `RBSZ` field and be a
/// multiple of both 4 (DMA requirement) and the cache line.
pub const BUFSZ: usize = 1536;

static_assertions::const_assert!(BUFSZ < (1 << 14));
static_assertions::const_assert_eq!(BUFSZ % cache::LINE, 0);

/// Largest ring the DMA's 10-bit ring length registers can describe.
pub const MAX_RING_LEN: usize = 1024;

/// One frame buffer, cache-line aligned.
#[repr(C, align(32))]
pub struct Buffer(UnsafeCell<[u8; BUFSZ]>);

impl Buffer {
    pub const fn new() -> Self {
        Self(UnsafeCell::new([0; BUFSZ]))
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.0.get().cast()
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing memory for a ring of `N` descriptors and `N` buffers.
pub struct RingStorage<D, const N: usize> {
    descriptors: [D; N],
    buffers: [Buffer; N],
    claimed: AtomicBool,
}

// Safety: buffers are only accessed through the single `Ring` that has
// claimed the storage, and descriptors are `Sync` themselves.
unsafe impl<D: Sync, const N: usize> Sync for RingStorage<D, N> {}

pub type TxStorage<const N: usize> = RingStorage<TxDescriptor, N>;
pub type RxStorage<const N: usize> = RingStorage<RxDescriptor, N>;

impl<const N: usize> RingStorage<TxDescriptor, N> {
    pub const fn new() -> Self {
        const D: TxDescriptor = TxDescriptor::new();
        const B: Buffer = Buffer::new();
        Self {
            descriptors: [D; N],
            buffers: [B; N],
            claimed: AtomicBool::new(false),
        }
    }
}

impl<const N: usize> RingStorage<RxDescriptor, N> {
    pub const fn new() -> Self {
        const D: RxDescriptor = RxDescriptor::new();
        const B: Buffer = Buffer::new();
        Self {
            descriptors: [D; N],
            buffers: [B; N],
            claimed: AtomicBool::new(false),
        }
    }
}

impl<D, const N: usize> RingStorage<D, N> {
    pub(crate) fn descriptors(&self) -> &[D; N] {
        &self.descriptors
    }
}

/// Index into a ring of `N` entries. Always `< N`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RingIndex<const N: usize>(usize);

impl<const N: usize> RingIndex<N> {
    pub const ZERO: Self = Self(0);

    pub fn new(index: usize) -> Option<Self> {
        (index < N).then_some(Self(index))
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// The following index, wrapping to 0 after `N - 1`.
    #[must_use]
    pub fn next(self) -> Self {
        Self((self.0 + 1).checked_rem(N).unwrap_or(0))
    }

    pub fn last() -> Self {
        Self(N.saturating_sub(1))
    }
}

/// Transmit failures. Neither consumes a descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendError {
    /// The next descriptor is still owned by the DMA.
    Busy,
    /// The frame doesn't fit in a ring buffer.
    TooLong,
    /// A zero-length frame, which the DMA would have nothing to send for.
    Empty,
}

/// Outcome of checking the receive ring once.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxPoll<R> {
    /// The next descriptor still belongs to the DMA.
    Empty,
    /// The next descriptor held a damaged or oversized frame, which has been
    /// discarded and its descriptor returned to the DMA.
    Dropped,
    /// A frame was handed to the reader, which produced this.
    Frame(R),
}

/// A ring of descriptors, and a matching ring of buffers, with a software
/// cursor.
pub struct Ring<'a, D, const N: usize> {
    storage: &'a RingStorage<D, N>,
    next: RingIndex<N>,
}

pub type TxRing<'a, const N: usize> = Ring<'a, TxDescriptor, N>;
pub type RxRing<'a, const N: usize> = Ring<'a, RxDescriptor, N>;

impl<'a, D: Descriptor, const N: usize> Ring<'a, D, N> {
    const VALID_LEN: () = assert!(
        N > 0 && N <= MAX_RING_LEN,
        "ring length must be between 1 and 1024"
    );

    /// Claims `storage` and puts every descriptor in its starting state.
    ///
    /// # Panics
    ///
    /// If `storage` has already been bound to a ring.
    pub fn new(storage: &'a RingStorage<D, N>) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_LEN;

        if storage.claimed.swap(true, Ordering::AcqRel) {
            panic!("ring storage bound twice");
        }

        for (desc, buf) in storage.descriptors.iter().zip(&storage.buffers) {
            // Safety: we just claimed the storage, so no other ring is using
            // these descriptors, and `buf` is the buffer paired with `desc`.
            unsafe { desc.reset(buf.as_mut_ptr()) };
            cache::clean(desc);
        }

        Self {
            storage,
            next: RingIndex::ZERO,
        }
    }

    fn current(&self) -> (&'a D, &'a Buffer) {
        let i = self.next.get();
        (&self.storage.descriptors[i], &self.storage.buffers[i])
    }

    /// Checks whether the descriptor at the cursor is software-owned. Fresh
    /// from memory, never cached.
    pub fn is_next_free(&self) -> bool {
        let (d, _) = self.current();
        cache::invalidate(d);
        !d.is_owned_by_hw()
    }

    pub fn next_index(&self) -> RingIndex<N> {
        self.next
    }

    /// Pointer to the lowest address of the descriptor ring, which is what the
    /// DMA's list address register wants.
    pub fn base_ptr(&self) -> *const D {
        self.storage.descriptors.as_ptr()
    }

    /// Pointer to the descriptor at `index`.
    pub fn descriptor_ptr(&self, index: RingIndex<N>) -> *const D {
        &self.storage.descriptors[index.get()]
    }

    /// Pointer to the descriptor at the cursor. This is the value the DMA's
    /// tail pointer "doorbell" wants after software has produced or consumed
    /// a descriptor.
    pub fn next_ptr(&self) -> *const D {
        self.descriptor_ptr(self.next)
    }

    pub(crate) fn len(&self) -> usize {
        N
    }

    fn advance(&mut self) {
        self.next = self.next.next();
    }

    /// Descriptor at `index`, as the DMA would see it.
    #[cfg(test)]
    pub(crate) fn descriptor(&self, index: usize) -> &'a D {
        &self.storage.descriptors[index]
    }

    /// Raw pointer to the buffer at `index`, as the DMA would see it.
    #[cfg(test)]
    pub(crate) fn buffer_ptr(&self, index: usize) -> *mut u8 {
        self.storage.buffers[index].as_mut_ptr()
    }
}

impl<'a, const N: usize> Ring<'a, TxDescriptor, N> {
    /// Tries to queue a `len`-byte frame.
    ///
    /// If the descriptor at the cursor is free, calls `fillout` with the first
    /// `len` bytes of its buffer, which `fillout` is expected to overwrite
    /// entirely. The descriptor is then handed to the DMA and the cursor
    /// advanced.
    ///
    /// If `len` is zero or exceeds [`BUFSZ`], or the ring is full, `fillout`
    /// is not called and nothing is modified.
    pub fn try_send<R>(
        &mut self,
        len: usize,
        fillout: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, SendError> {
        if len == 0 {
            return Err(SendError::Empty);
        }
        if len > BUFSZ {
            return Err(SendError::TooLong);
        }
        if !self.is_next_free() {
            return Err(SendError::Busy);
        }

        let (desc, buf) = self.current();
        // Safety: the descriptor isn't OWNed, so the DMA is done with this
        // buffer, and we are the only ring over this storage. The slice does
        // not outlive `fillout`.
        let result = fillout(unsafe {
            core::slice::from_raw_parts_mut(buf.as_mut_ptr(), len)
        });

        desc.prepare(buf.as_mut_ptr(), len);
        cache::clean(buf);
        // Everything above must land before the DMA can see OWN.
        cache::barrier();
        desc.give_to_hw(len);
        cache::clean(desc);

        self.advance();
        Ok(result)
    }
}

impl<'a, const N: usize> Ring<'a, RxDescriptor, N> {
    /// Checks the descriptor at the cursor for a received frame.
    ///
    /// If the DMA has completed a good, single-buffer frame there, `readout`
    /// is called with its bytes. Either way, once the DMA has released the
    /// descriptor it is re-armed and the cursor advanced.
    pub fn try_receive<R>(
        &mut self,
        readout: impl FnOnce(&[u8]) -> R,
    ) -> RxPoll<R> {
        if !self.is_next_free() {
            return RxPoll::Empty;
        }

        let (desc, buf) = self.current();
        let status = desc.status();
        let result = if status.is_deliverable() {
            let len = status.len.min(BUFSZ);
            cache::invalidate(buf);
            // Safety: as in `try_send`, plus the DMA only ever writes to a
            // buffer while its descriptor is OWNed, which it isn't.
            let bytes =
                unsafe { core::slice::from_raw_parts(buf.as_mut_ptr(), len) };
            RxPoll::Frame(readout(bytes))
        } else {
            RxPoll::Dropped
        };

        desc.arm(buf.as_mut_ptr());
        cache::clean(desc);

        self.advance();
        result
    }
}
