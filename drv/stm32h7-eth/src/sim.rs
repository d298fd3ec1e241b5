// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-ins for the hardware, for host tests.
//!
//! Register blocks are zero-filled RAM. They remember what the driver wrote
//! but never change on their own, so anything that waits for a self-clearing
//! bit times out.
//!
//! `FakeDma` plays the DMA engine's side of the descriptor rings, and
//! `FakePhy` answers MDIO like a LAN8742A.

use crate::desc::{rdes3, tdes2, Descriptor, OWN};
use crate::mdio::{Smi, SmiTimeout};
use crate::phy::{bcr, bsr, sr, SmiClause22Register, SPECIAL_STATUS};
use crate::regs::{
    DmaRegisters, EthRegisters, MacRegisters, MtlRegisters,
};
use crate::ring::{RxRing, TxRing, BUFSZ};

fn zeroed_box<T>() -> Box<T> {
    // Safety: only used for register blocks, which are nothing but u32
    // cells, for which all-zeros is valid.
    Box::new(unsafe { core::mem::zeroed() })
}

pub struct FakeRegisters {
    mac: Box<MacRegisters>,
    mtl: Box<MtlRegisters>,
    dma: Box<DmaRegisters>,
}

impl FakeRegisters {
    pub fn new() -> Self {
        Self {
            mac: zeroed_box(),
            mtl: zeroed_box(),
            dma: zeroed_box(),
        }
    }

    pub fn mac(&self) -> &MacRegisters {
        &self.mac
    }

    pub fn mtl(&self) -> &MtlRegisters {
        &self.mtl
    }

    pub fn dma(&self) -> &DmaRegisters {
        &self.dma
    }

    pub fn regs(&self) -> EthRegisters<'_> {
        EthRegisters {
            mac: &self.mac,
            mtl: &self.mtl,
            dma: &self.dma,
        }
    }
}

/// The DMA engine's view of the rings: its own cursors, walking the
/// descriptors in order.
#[derive(Default)]
pub struct FakeDma {
    tx_next: usize,
    rx_next: usize,
}

impl FakeDma {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmits every frame software has queued, oldest first, releasing
    /// each descriptor.
    pub fn transmit_all<const N: usize>(
        &mut self,
        ring: &TxRing<'_, N>,
    ) -> Vec<Vec<u8>> {
        let mut sent = vec![];
        loop {
            let d = ring.descriptor(self.tx_next);
            if !d.is_owned_by_hw() {
                break;
            }
            let words = d.words();
            let len = (words[2] & tdes2::B1L_MASK) as usize;
            let bytes = unsafe {
                core::slice::from_raw_parts(ring.buffer_ptr(self.tx_next), len)
            };
            sent.push(bytes.to_vec());
            d.hw_write_back(words[3] & !OWN);
            self.tx_next = (self.tx_next + 1) % N;
        }
        sent
    }

    /// Writes `word3` back into the next RX descriptor, after copying `frame`
    /// into its buffer. Returns false, like a real MAC dropping the frame, if
    /// software hasn't returned the descriptor yet.
    fn complete_rx<const N: usize>(
        &mut self,
        ring: &RxRing<'_, N>,
        frame: &[u8],
        word3: u32,
    ) -> bool {
        let d = ring.descriptor(self.rx_next);
        if !d.is_owned_by_hw() {
            return false;
        }
        let n = frame.len().min(BUFSZ);
        unsafe {
            ring.buffer_ptr(self.rx_next).copy_from(frame.as_ptr(), n);
        }
        d.hw_write_back(word3);
        self.rx_next = (self.rx_next + 1) % N;
        true
    }

    /// Delivers a good frame.
    pub fn deliver<const N: usize>(
        &mut self,
        ring: &RxRing<'_, N>,
        frame: &[u8],
    ) -> bool {
        let word3 = rdes3::FD | rdes3::LD | frame.len() as u32;
        self.complete_rx(ring, frame, word3)
    }

    /// Delivers a frame with the error summary bit set.
    pub fn deliver_errored<const N: usize>(
        &mut self,
        ring: &RxRing<'_, N>,
        frame: &[u8],
    ) -> bool {
        let word3 = rdes3::FD | rdes3::LD | rdes3::ES | frame.len() as u32;
        self.complete_rx(ring, frame, word3)
    }

    /// Delivers the first buffer of a frame too big for one buffer.
    pub fn deliver_first_fragment<const N: usize>(
        &mut self,
        ring: &RxRing<'_, N>,
        frame: &[u8],
    ) -> bool {
        let word3 = rdes3::FD | frame.len() as u32;
        self.complete_rx(ring, frame, word3)
    }

    /// Transmits everything queued on `tx` and receives it on `rx`, as if
    /// the MAC were in loopback. Returns the number of frames looped.
    pub fn loopback<const TXN: usize, const RXN: usize>(
        &mut self,
        tx: &TxRing<'_, TXN>,
        rx: &RxRing<'_, RXN>,
    ) -> usize {
        let frames = self.transmit_all(tx);
        frames.iter().filter(|f| self.deliver(rx, f)).count()
    }
}

/// A LAN8742A on a management bus.
pub struct FakePhy {
    pub addr: u8,
    pub id: (u16, u16),
    /// BCR reads that still show RESET after a reset is written.
    pub reset_polls: u32,
    /// BSR reads that show the link down before it comes up.
    pub link_polls: u32,
    /// Speed/duplex field reported in the special status register.
    pub mode: u16,
    /// Every transaction times out.
    pub bus_dead: bool,
    /// (register, value) for every write addressed to this PHY.
    pub writes: Vec<(u8, u16)>,
    resetting: u32,
    link_reads: u32,
}

impl FakePhy {
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            id: (0x0007, 0xC131),
            reset_polls: 3,
            link_polls: 0,
            mode: sr::FULL_100,
            bus_dead: false,
            writes: vec![],
            resetting: 0,
            link_reads: 0,
        }
    }

    fn link_up(&self) -> bool {
        self.link_reads >= self.link_polls
    }
}

impl Smi for FakePhy {
    fn smi_read(&mut self, phy: u8, register: u8) -> Result<u16, SmiTimeout> {
        if self.bus_dead {
            return Err(SmiTimeout);
        }
        if phy != self.addr {
            // Nobody home; the bus is pulled up.
            return Ok(0xFFFF);
        }
        const BCR: u8 = SmiClause22Register::Control as u8;
        const BSR: u8 = SmiClause22Register::Status as u8;
        const ID1: u8 = SmiClause22Register::PhyIdent2 as u8;
        const ID2: u8 = SmiClause22Register::PhyIdent3 as u8;
        Ok(match register {
            BCR if self.resetting > 0 => {
                self.resetting -= 1;
                bcr::RESET
            }
            BCR => bcr::AN_ENABLE,
            BSR if self.link_up() => bsr::LINK_UP | bsr::AN_COMPLETE,
            BSR => {
                self.link_reads += 1;
                0
            }
            ID1 => self.id.0,
            ID2 => self.id.1,
            SPECIAL_STATUS if self.link_up() => sr::AN_DONE | self.mode,
            _ => 0,
        })
    }

    fn smi_write(
        &mut self,
        phy: u8,
        register: u8,
        value: u16,
    ) -> Result<(), SmiTimeout> {
        if self.bus_dead {
            return Err(SmiTimeout);
        }
        if phy != self.addr {
            return Ok(());
        }
        self.writes.push((register, value));
        if register == SmiClause22Register::Control as u8
            && value & bcr::RESET != 0
        {
            self.resetting = self.reset_polls;
        }
        Ok(())
    }
}
