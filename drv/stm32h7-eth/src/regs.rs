// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register blocks for the Ethernet MAC, MTL and DMA.
//!
//! Only the registers this driver touches are named; everything in between is
//! reserved padding so that field offsets match RM0433. The offsets are
//! checked at compile time at the bottom of this file.
//!
//! Bit positions live in a submodule per register, e.g. `maccr::TE`.

use static_assertions::const_assert_eq;
use vcell::VolatileCell;

/// A single 32-bit memory-mapped register.
#[repr(transparent)]
pub struct Reg(VolatileCell<u32>);

impl Reg {
    #[inline(always)]
    pub fn read(&self) -> u32 {
        self.0.get()
    }

    #[inline(always)]
    pub fn write(&self, value: u32) {
        self.0.set(value)
    }

    /// Read-modify-write.
    #[inline(always)]
    pub fn modify(&self, f: impl FnOnce(u32) -> u32) {
        self.write(f(self.read()))
    }

    #[inline(always)]
    pub fn set_bits(&self, mask: u32) {
        self.modify(|v| v | mask)
    }

    #[inline(always)]
    pub fn clear_bits(&self, mask: u32) {
        self.modify(|v| v & !mask)
    }

    /// Returns true if any bit of `mask` is set.
    #[inline(always)]
    pub fn is_set(&self, mask: u32) -> bool {
        self.read() & mask != 0
    }
}

macro_rules! accessors {
    ($($name:ident),* $(,)?) => {
        $(
            #[inline(always)]
            pub fn $name(&self) -> &Reg {
                &self.$name
            }
        )*
    };
}

/// Base address of the MAC register block; the MTL and DMA blocks follow it.
pub const ETH_BASE: usize = 0x4002_8000;
pub const MTL_OFFSET: usize = 0x0C00;
pub const DMA_OFFSET: usize = 0x1000;

#[repr(C)]
pub struct MacRegisters {
    maccr: Reg,
    _macecr: Reg,
    macpfr: Reg,
    _reserved0: [Reg; 65],
    _macvr: Reg,
    _reserved1: [Reg; 59],
    macmdioar: Reg,
    macmdiodr: Reg,
    _reserved2: [Reg; 62],
    maca0hr: Reg,
    maca0lr: Reg,
}

impl MacRegisters {
    accessors!(maccr, macpfr, macmdioar, macmdiodr, maca0hr, maca0lr);
}

#[repr(C)]
pub struct MtlRegisters {
    _mtlomr: Reg,
    _reserved0: [Reg; 63],
    mtltqomr: Reg,
    _reserved1: [Reg; 11],
    mtlrqomr: Reg,
}

impl MtlRegisters {
    accessors!(mtltqomr, mtlrqomr);
}

#[repr(C)]
pub struct DmaRegisters {
    dmamr: Reg,
    _dmasbmr: Reg,
    _dmaisr: Reg,
    _reserved0: [Reg; 61],
    dmaccr: Reg,
    dmactcr: Reg,
    dmacrcr: Reg,
    _reserved1: [Reg; 2],
    dmactdlar: Reg,
    _reserved2: Reg,
    dmacrdlar: Reg,
    dmactdtpr: Reg,
    _reserved3: Reg,
    dmacrdtpr: Reg,
    dmactdrlr: Reg,
    dmacrdrlr: Reg,
    dmacier: Reg,
    _reserved4: [Reg; 10],
    _dmacsr: Reg,
    _reserved5: [Reg; 2],
    dmacmfcr: Reg,
}

impl DmaRegisters {
    accessors!(
        dmamr, dmaccr, dmactcr, dmacrcr, dmactdlar, dmacrdlar, dmactdtpr,
        dmacrdtpr, dmactdrlr, dmacrdrlr, dmacier, dmacmfcr,
    );
}

/// The three register blocks making up the Ethernet peripheral.
#[derive(Copy, Clone)]
pub struct EthRegisters<'a> {
    pub mac: &'a MacRegisters,
    pub mtl: &'a MtlRegisters,
    pub dma: &'a DmaRegisters,
}

impl EthRegisters<'static> {
    /// Returns the register blocks at their fixed STM32H7 addresses.
    ///
    /// # Safety
    ///
    /// Only meaningful on an STM32H74x/H75x with the Ethernet clocks enabled.
    /// The caller must not hand out a second `EthRegisters` to code that would
    /// drive the peripheral concurrently.
    pub unsafe fn stm32h7() -> Self {
        unsafe {
            Self {
                mac: &*(ETH_BASE as *const MacRegisters),
                mtl: &*((ETH_BASE + MTL_OFFSET) as *const MtlRegisters),
                dma: &*((ETH_BASE + DMA_OFFSET) as *const DmaRegisters),
            }
        }
    }
}

pub mod maccr {
    pub const RE: u32 = 1 << 0;
    pub const TE: u32 = 1 << 1;
    pub const DM: u32 = 1 << 13;
    pub const FES: u32 = 1 << 14;
    pub const ACS: u32 = 1 << 20;
    pub const CST: u32 = 1 << 21;
    pub const IPC: u32 = 1 << 27;
}

pub mod macpfr {
    pub const PR: u32 = 1 << 0;
}

pub mod maca0hr {
    pub const AE: u32 = 1 << 31;
}

pub mod macmdioar {
    pub const MB: u32 = 1 << 0;
    pub const GOC_SHIFT: u32 = 2;
    pub const GOC_WRITE: u32 = 0b01 << GOC_SHIFT;
    pub const GOC_READ: u32 = 0b11 << GOC_SHIFT;
    pub const CR_SHIFT: u32 = 8;
    pub const CR_MASK: u32 = 0xF << CR_SHIFT;
    pub const RDA_SHIFT: u32 = 16;
    pub const PA_SHIFT: u32 = 21;
}

pub mod macmdiodr {
    pub const MD_MASK: u32 = 0xFFFF;
}

pub mod mtltqomr {
    pub const TSF: u32 = 1 << 1;
    pub const TQS_SHIFT: u32 = 16;
    /// Whole 2 KiB of TX queue RAM, in 256-byte blocks minus one.
    pub const TQS_2K: u32 = 0b111 << TQS_SHIFT;
}

pub mod mtlrqomr {
    pub const RSF: u32 = 1 << 5;
    pub const RQS_SHIFT: u32 = 20;
    pub const RQS_2K: u32 = 0b111 << RQS_SHIFT;
}

pub mod dmamr {
    pub const SWR: u32 = 1 << 0;
}

pub mod dmaccr {
    pub const DSL_SHIFT: u32 = 18;
    pub const DSL_MASK: u32 = 0b111 << DSL_SHIFT;
}

pub mod dmactcr {
    pub const ST: u32 = 1 << 0;
    pub const TXPBL_SHIFT: u32 = 16;
}

pub mod dmacrcr {
    pub const SR: u32 = 1 << 0;
    pub const RBSZ_SHIFT: u32 = 1;
    pub const RBSZ_MASK: u32 = 0x3FFF << RBSZ_SHIFT;
    pub const RXPBL_SHIFT: u32 = 16;
}

pub mod dmacmfcr {
    pub const MFC_MASK: u32 = 0x7FF;
}

macro_rules! check_offsets {
    ($ty:ty { $($field:ident = $off:expr),* $(,)? }) => {
        $(const_assert_eq!(core::mem::offset_of!($ty, $field), $off);)*
    };
}

check_offsets!(MacRegisters {
    maccr = 0x000,
    macpfr = 0x008,
    _macvr = 0x110,
    macmdioar = 0x200,
    macmdiodr = 0x204,
    maca0hr = 0x300,
    maca0lr = 0x304,
});

check_offsets!(MtlRegisters {
    _mtlomr = 0x000,
    mtltqomr = 0x100,
    mtlrqomr = 0x130,
});

check_offsets!(DmaRegisters {
    dmamr = 0x000,
    _dmasbmr = 0x004,
    _dmaisr = 0x008,
    dmaccr = 0x100,
    dmactcr = 0x104,
    dmacrcr = 0x108,
    dmactdlar = 0x114,
    dmacrdlar = 0x11C,
    dmactdtpr = 0x120,
    dmacrdtpr = 0x128,
    dmactdrlr = 0x12C,
    dmacrdrlr = 0x130,
    dmacier = 0x134,
    _dmacsr = 0x160,
    dmacmfcr = 0x16C,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_helpers() {
        let r = Reg(VolatileCell::new(0));
        r.set_bits(0b1010);
        assert_eq!(r.read(), 0b1010);
        r.clear_bits(0b0010);
        assert_eq!(r.read(), 0b1000);
        assert!(r.is_set(0b1100));
        assert!(!r.is_set(0b0111));
        r.modify(|v| v << 1);
        assert_eq!(r.read(), 0b1_0000);
    }
}
