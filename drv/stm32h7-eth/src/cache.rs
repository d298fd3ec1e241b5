// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data cache maintenance around DMA handoffs.
//!
//! The Cortex-M7 D-cache is not coherent with the Ethernet DMA. Descriptors
//! and buffers are each aligned to, and sized in multiples of, a 32-byte cache
//! line, so cleaning or invalidating one never touches its neighbours.
//!
//! Off target these degrade to compiler/CPU fences, which is what the host
//! tests need to keep descriptor accesses ordered.

/// Cortex-M7 D-cache line size.
pub const LINE: usize = 32;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        fn scb() -> cortex_m::peripheral::SCB {
            // Safety: we only use the SCB for by-address cache maintenance,
            // which does not conflict with anything else the firmware does
            // with it.
            unsafe { cortex_m::Peripherals::steal() }.SCB
        }

        /// Writes back any dirty lines covering `len` bytes at `addr`, so the
        /// DMA sees what the CPU wrote.
        pub fn clean_range(addr: usize, len: usize) {
            scb().clean_dcache_by_address(addr, len);
        }

        /// Discards any lines covering `len` bytes at `addr`, so the CPU sees
        /// what the DMA wrote.
        ///
        /// Callers must only pass whole lines they have no unsaved writes in.
        pub fn invalidate_range(addr: usize, len: usize) {
            // Safety: every object we invalidate is line-aligned and a whole
            // number of lines long, and has already been cleaned after our
            // last write.
            unsafe { scb().invalidate_dcache_by_address(addr, len) }
        }

        /// Orders memory accesses on either side of it as seen by bus
        /// masters.
        pub fn barrier() {
            cortex_m::asm::dmb();
        }
    } else {
        use core::sync::atomic::{fence, Ordering};

        pub fn clean_range(_addr: usize, _len: usize) {
            fence(Ordering::SeqCst);
        }

        pub fn invalidate_range(_addr: usize, _len: usize) {
            fence(Ordering::SeqCst);
        }

        pub fn barrier() {
            fence(Ordering::SeqCst);
        }
    }
}

pub fn clean<T>(obj: &T) {
    clean_range(obj as *const T as usize, core::mem::size_of::<T>());
}

pub fn invalidate<T>(obj: &T) {
    invalidate_range(obj as *const T as usize, core::mem::size_of::<T>());
}
