// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static trace ring buffers for drivers that have nowhere to print.
//!
//! A ring buffer is a fixed array of entries living in a `static`, so a
//! debugger can dump it from a halted (or wedged) board. Each entry records
//! the source line that produced it, a payload of some `Copy + PartialEq`
//! type, a generation number, and a repeat count. Recording the same payload
//! from the same line twice in a row bumps the count of the existing entry
//! instead of consuming a new slot, so a polling loop that keeps hitting the
//! same condition costs one entry, not the whole buffer.
//!
//! ## Declaring and recording
//!
//! ```
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::LinkUp);
//! ```
//!
//! The unnamed form declares a static called `__RINGBUF`, which allows one
//! per module. Give it a name to have more than one:
//!
//! ```
//! ringbuf!(PHY_RINGBUF, Trace, 16, Trace::None);
//!
//! ringbuf_entry!(PHY_RINGBUF, Trace::LinkUp);
//! ```
//!
//! ## Locking
//!
//! Entries are written inside a `critical_section`. Firmware must link a
//! critical-section implementation (on a single-core Cortex-M, enable the
//! `critical-section-single-core` feature of `cortex-m`); host tests use the
//! `std` implementation.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;
use critical_section::Mutex;

/// Declares a ring buffer in the current module.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a `static` named `NAME` holding `N`
/// entries of `Type`, all initialized to `expr`. If you omit the name, it
/// defaults to `__RINGBUF`.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticRingbuf<$t, $n> =
            $crate::StaticRingbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Records an entry in a ring buffer declared with [`ringbuf!`].
///
/// `ringbuf_entry!(NAME, expr)` records `expr` in the buffer called `NAME`;
/// without a name it records into `__RINGBUF`.
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before borrowing the buffer, so the payload
        // expression cannot observe the buffer's lock.
        let (p, buf) = ($payload, &$buf);
        $crate::StaticRingbuf::record(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// One slot of a [`Ringbuf`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of `N` entries.
///
/// You normally reach this through [`StaticRingbuf`], which adds the locking
/// needed to put it in a `static`.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    /// Records `payload` as coming from `line`.
    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        // Slot 0 on first use, otherwise the one after `last`. A zero-length
        // buffer records nothing.
        let ndx = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };
        let Some(ent) = self.buffer.get_mut(ndx) else {
            return;
        };
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// The most recently written entry, if any.
    pub fn last_entry(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Iterates over recorded entries, oldest first. Slots that have never
    /// been written are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> {
        let start = self.last.map_or(0, |l| l + 1);
        self.buffer[start.min(N)..]
            .iter()
            .chain(self.buffer[..start.min(N)].iter())
            .filter(|e| e.count != 0)
    }
}

/// A [`Ringbuf`] that can live in a `static`.
pub struct StaticRingbuf<T: Copy + PartialEq, const N: usize> {
    inner: Mutex<RefCell<Ringbuf<T, N>>>,
}

impl<T: Copy + PartialEq, const N: usize> StaticRingbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Ringbuf::new(init))),
        }
    }

    /// Records an entry. With the `disabled` feature this does nothing.
    pub fn record(&self, line: u16, payload: T) {
        if cfg!(feature = "disabled") {
            return;
        }
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).entry(line, payload)
        });
    }

    /// Runs `body` against the current contents.
    pub fn inspect<R>(&self, body: impl FnOnce(&Ringbuf<T, N>) -> R) -> R {
        critical_section::with(|cs| body(&self.inner.borrow_ref(cs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Trace {
        None,
        Poll,
        Got(u8),
    }

    #[test]
    fn empty_buffer_has_no_entries() {
        let rb = Ringbuf::<Trace, 4>::new(Trace::None);
        assert!(rb.last_entry().is_none());
        assert_eq!(rb.iter().count(), 0);
    }

    #[test]
    fn repeats_coalesce() {
        let mut rb = Ringbuf::<Trace, 4>::new(Trace::None);
        for _ in 0..10 {
            rb.entry(7, Trace::Poll);
        }
        assert_eq!(rb.iter().count(), 1);
        let e = rb.last_entry().unwrap();
        assert_eq!(e.count, 10);
        assert_eq!(e.line, 7);
        assert_eq!(e.generation, 1);
    }

    #[test]
    fn same_payload_different_line_is_new_entry() {
        let mut rb = Ringbuf::<Trace, 4>::new(Trace::None);
        rb.entry(1, Trace::Poll);
        rb.entry(2, Trace::Poll);
        assert_eq!(rb.iter().count(), 2);
    }

    #[test]
    fn wraps_and_keeps_order() {
        let mut rb = Ringbuf::<Trace, 3>::new(Trace::None);
        for i in 0..5 {
            rb.entry(1, Trace::Got(i));
        }
        let got: Vec<_> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(got, [Trace::Got(2), Trace::Got(3), Trace::Got(4)]);
        // Slots 0 and 1 have been written twice.
        let gens: Vec<_> = rb.iter().map(|e| e.generation).collect();
        assert_eq!(gens, [1, 2, 2]);
    }

    #[test]
    fn zero_length_buffer_is_inert() {
        let mut rb = Ringbuf::<Trace, 0>::new(Trace::None);
        rb.entry(1, Trace::Poll);
        assert!(rb.last_entry().is_none());
    }

    ringbuf!(TEST_RINGBUF, Trace, 8, Trace::None);

    #[test]
    fn macros_record_into_static() {
        ringbuf_entry!(TEST_RINGBUF, Trace::Got(42));
        let last = TEST_RINGBUF.inspect(|rb| rb.last_entry().copied());
        let last = last.unwrap();
        assert_eq!(last.payload, Trace::Got(42));
        assert_ne!(last.line, 0);
    }
}
