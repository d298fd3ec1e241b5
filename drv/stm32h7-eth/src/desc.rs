// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmit and receive DMA descriptors.
//!
//! The STM32H7 uses "normal" descriptors of four 32-bit words. The hardware
//! reads a different layout from the one it writes back on completion; the
//! constants below are named for the format they apply to.
//!
//! Each descriptor sits alone in a 32-byte cache line. The DMA is told to
//! skip the 16 trailing bytes (see `DESCRIPTOR_SKIP_DWORDS`), so the
//! hardware's stride matches the array's.

use core::mem::size_of;
use static_assertions::const_assert_eq;
use vcell::VolatileCell;

/// Owned by the DMA. Bit 31 of word 3 in every format.
pub const OWN: u32 = 1 << 31;

pub mod tdes2 {
    pub const B1L_MASK: u32 = 0x3FFF;
}

pub mod tdes3 {
    /// First descriptor of a frame.
    pub const FD: u32 = 1 << 29;
    /// Last descriptor of a frame.
    pub const LD: u32 = 1 << 28;
    /// Insert IP header and payload checksums, pseudo-header included.
    pub const CIC_FULL: u32 = 0b11 << 16;
    pub const FL_MASK: u32 = 0x7FFF;
}

pub mod rdes3 {
    /// Read format: interrupt on completion.
    pub const IOC: u32 = 1 << 30;
    /// Read format: buffer 1 address is valid.
    pub const BUF1V: u32 = 1 << 24;
    /// Write-back format: first descriptor of the frame.
    pub const FD: u32 = 1 << 29;
    /// Write-back format: last descriptor of the frame.
    pub const LD: u32 = 1 << 28;
    /// Write-back format: error summary.
    pub const ES: u32 = 1 << 15;
    /// Write-back format: packet length.
    pub const PL_MASK: u32 = 0x7FFF;
}

/// Number of 64-bit words the DMA skips between descriptors, i.e. the
/// padding after the four descriptor words.
pub const DESCRIPTOR_SKIP_DWORDS: u32 = 2;

/// Operations a ring needs from its descriptors.
///
/// Everything that changes a descriptor is either `unsafe` or private to
/// this crate, so only the [`Ring`](crate::ring::Ring) that claimed a
/// descriptor's storage can move its `OWN` bit or its buffer address.
///
/// # Safety
///
/// `reset` is the only place an implementation may set `OWN` outside of its
/// own handoff methods, and `is_owned_by_hw` must report the real state of
/// the `OWN` bit. Getting either wrong lets software and the DMA touch the
/// same buffer at once.
pub unsafe trait Descriptor: Sync {
    /// Puts the descriptor into its starting state, bound to the buffer at
    /// `buf`.
    ///
    /// # Safety
    ///
    /// The caller must own the ring this descriptor belongs to, and `buf`
    /// must point to a buffer of at least `BUFSZ` bytes that nothing else
    /// uses. An RX descriptor hands `buf` straight to the DMA.
    unsafe fn reset(&self, buf: *mut u8);

    fn is_owned_by_hw(&self) -> bool;

    /// Raw descriptor words, for inspection.
    fn words(&self) -> [u32; 4];
}

#[repr(C, align(32))]
pub struct TxDescriptor {
    tdes: [VolatileCell<u32>; 4],
}

#[repr(C, align(32))]
pub struct RxDescriptor {
    rdes: [VolatileCell<u32>; 4],
}

const_assert_eq!(size_of::<TxDescriptor>(), 32);
const_assert_eq!(size_of::<RxDescriptor>(), 32);
const_assert_eq!(
    (size_of::<TxDescriptor>() - 4 * size_of::<u32>()) / 8,
    DESCRIPTOR_SKIP_DWORDS as usize
);

const fn zeroed_words() -> [VolatileCell<u32>; 4] {
    [
        VolatileCell::new(0),
        VolatileCell::new(0),
        VolatileCell::new(0),
        VolatileCell::new(0),
    ]
}

fn addr32(p: *const u8) -> u32 {
    // The DMA has a 32-bit address bus. On target this is lossless; on a
    // 64-bit test host only the low half lands in the descriptor, which
    // nothing there dereferences.
    p as usize as u32
}

impl TxDescriptor {
    pub const fn new() -> Self {
        Self {
            tdes: zeroed_words(),
        }
    }

    /// Fills in the buffer words for a `len`-byte frame held in `buf`. Does
    /// not touch word 3.
    pub(crate) fn prepare(&self, buf: *const u8, len: usize) {
        self.tdes[0].set(addr32(buf));
        self.tdes[1].set(0);
        self.tdes[2].set(len as u32 & tdes2::B1L_MASK);
    }

    /// Writes word 3, handing the descriptor to the DMA as a complete,
    /// single-buffer frame of `len` bytes.
    ///
    /// Callers are responsible for ordering this after [`prepare`] and after
    /// the buffer contents are visible to the DMA.
    ///
    /// [`prepare`]: Self::prepare
    pub(crate) fn give_to_hw(&self, len: usize) {
        self.tdes[3].set(
            OWN | tdes3::FD
                | tdes3::LD
                | tdes3::CIC_FULL
                | (len as u32 & tdes3::FL_MASK),
        );
    }

    #[cfg(test)]
    pub(crate) fn hw_write_back(&self, word3: u32) {
        self.tdes[3].set(word3);
    }
}

impl Default for TxDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for TxDescriptor {}

unsafe impl Descriptor for TxDescriptor {
    unsafe fn reset(&self, _buf: *mut u8) {
        for w in &self.tdes {
            w.set(0);
        }
    }

    fn is_owned_by_hw(&self) -> bool {
        self.tdes[3].get() & OWN != 0
    }

    fn words(&self) -> [u32; 4] {
        [
            self.tdes[0].get(),
            self.tdes[1].get(),
            self.tdes[2].get(),
            self.tdes[3].get(),
        ]
    }
}

/// Decoded write-back status of a completed receive descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RxStatus {
    pub error: bool,
    pub first: bool,
    pub last: bool,
    pub len: usize,
}

impl RxStatus {
    /// True if the frame arrived intact and fit in a single buffer.
    pub fn is_deliverable(&self) -> bool {
        !self.error && self.first && self.last
    }
}

impl RxDescriptor {
    pub const fn new() -> Self {
        Self {
            rdes: zeroed_words(),
        }
    }

    /// Rewrites the read format and returns the descriptor to the DMA.
    pub(crate) fn arm(&self, buf: *mut u8) {
        self.rdes[0].set(addr32(buf));
        self.rdes[1].set(0);
        self.rdes[2].set(0);
        crate::cache::barrier();
        self.rdes[3].set(OWN | rdes3::IOC | rdes3::BUF1V);
    }

    /// Decodes the write-back format. Only meaningful once the DMA has
    /// released the descriptor.
    pub fn status(&self) -> RxStatus {
        let w = self.rdes[3].get();
        RxStatus {
            error: w & rdes3::ES != 0,
            first: w & rdes3::FD != 0,
            last: w & rdes3::LD != 0,
            len: (w & rdes3::PL_MASK) as usize,
        }
    }

    #[cfg(test)]
    pub(crate) fn hw_write_back(&self, word3: u32) {
        self.rdes[3].set(word3);
    }
}

impl Default for RxDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Sync for RxDescriptor {}

unsafe impl Descriptor for RxDescriptor {
    unsafe fn reset(&self, buf: *mut u8) {
        self.arm(buf);
    }

    fn is_owned_by_hw(&self) -> bool {
        self.rdes[3].get() & OWN != 0
    }

    fn words(&self) -> [u32; 4] {
        [
            self.rdes[0].get(),
            self.rdes[1].get(),
            self.rdes[2].get(),
            self.rdes[3].get(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_handoff_words() {
        let d = TxDescriptor::new();
        let buf = [0u8; 64];
        d.prepare(buf.as_ptr(), 60);
        assert!(!d.is_owned_by_hw());
        d.give_to_hw(60);
        let w = d.words();
        assert_eq!(w[0], buf.as_ptr() as usize as u32);
        assert_eq!(w[1], 0);
        assert_eq!(w[2], 60);
        assert_eq!(w[3], OWN | tdes3::FD | tdes3::LD | (0b11 << 16) | 60);
        assert!(d.is_owned_by_hw());
    }

    #[test]
    fn tx_reset_clears_everything() {
        let d = TxDescriptor::new();
        d.prepare(core::ptr::null(), 10);
        d.give_to_hw(10);
        unsafe { d.reset(core::ptr::null_mut()) };
        assert_eq!(d.words(), [0; 4]);
    }

    #[test]
    fn rx_arm_words() {
        let d = RxDescriptor::new();
        let mut buf = [0u8; 32];
        d.arm(buf.as_mut_ptr());
        let w = d.words();
        assert_eq!(w[0], buf.as_ptr() as usize as u32);
        assert_eq!(w[1], 0);
        assert_eq!(w[2], 0);
        assert_eq!(w[3], 0xC100_0000);
        assert!(d.is_owned_by_hw());
    }

    #[test]
    fn rx_status_decode() {
        let d = RxDescriptor::new();
        d.hw_write_back(rdes3::FD | rdes3::LD | 98);
        assert_eq!(
            d.status(),
            RxStatus {
                error: false,
                first: true,
                last: true,
                len: 98
            }
        );
        assert!(d.status().is_deliverable());

        d.hw_write_back(rdes3::FD | rdes3::LD | rdes3::ES | 98);
        assert!(!d.status().is_deliverable());

        d.hw_write_back(rdes3::FD | 1536);
        assert!(!d.status().is_deliverable());
    }
}
