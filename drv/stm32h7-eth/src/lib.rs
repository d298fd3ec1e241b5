// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the STM32H7 Ethernet MAC and associated stuff.
//!
//! This is a polled driver: nothing here takes interrupts. Bring-up resets the
//! DMA, brings the LAN8742A PHY up over MDIO, lays out the descriptor rings
//! and starts the MAC; after that, [`Ethernet::send`] and
//! [`Ethernet::receive`] never wait on the hardware.
//!
//! Descriptors and buffers must live somewhere the Ethernet DMA can reach
//! (AXI SRAM or SRAM1-3 on the H7, *not* the DTCM), which is up to the caller
//! when placing the [`TxStorage`] and [`RxStorage`] statics.
//!
//! The driver itself doesn't care which H74x/H75x part it's on.

#![cfg_attr(not(test), no_std)]

pub mod cache;
pub mod desc;
pub mod frame;
pub mod mdio;
pub mod phy;
pub mod regs;
pub mod ring;
pub mod spin;

#[cfg(test)]
mod sim;

use ringbuf::{ringbuf, ringbuf_entry};

pub use crate::frame::{EtherType, MacAddress};
pub use crate::mdio::{Mdio, MdioClock, Smi, SmiTimeout};
pub use crate::phy::{Duplex, LinkStatus, PhyError, Speed};
pub use crate::regs::EthRegisters;
pub use crate::ring::{RxStorage, SendError, TxStorage, BUFSZ};

use crate::desc::DESCRIPTOR_SKIP_DWORDS;
use crate::phy::Lan8742a;
use crate::regs::{
    dmaccr, dmacmfcr, dmacrcr, dmactcr, dmamr, maca0hr, maccr, macpfr,
    mtlrqomr, mtltqomr, DmaRegisters,
};
use crate::ring::{RxPoll, RxRing, TxRing};
use crate::spin::spin_until;

/// Attempt budgets for each bounded wait in bring-up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timeouts {
    pub dma_reset: u32,
    /// Per wait for the MDIO bus to go idle.
    pub smi_busy: u32,
    pub phy_reset: u32,
    pub link: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dma_reset: 100_000,
            smi_busy: 100_000,
            phy_reset: 100_000,
            link: 1_000_000,
        }
    }
}

/// Init-time settings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub mac_address: MacAddress,
    /// MDIO address of the PHY.
    pub phy_address: u8,
    pub mdio_clock: MdioClock,
    /// Accept every frame regardless of destination address.
    pub promiscuous: bool,
    pub timeouts: Timeouts,
}

impl Default for Config {
    /// Settings for a Nucleo-H7 board: PHY strapped to address 0, AHB at
    /// 200 MHz, and a locally administered address.
    fn default() -> Self {
        Self {
            mac_address: MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            phy_address: 0,
            mdio_clock: MdioClock::Div102,
            promiscuous: false,
            timeouts: Timeouts::default(),
        }
    }
}

/// Counters, for looking at from a debugger. All wrap on overflow.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub frames_sent: u32,
    /// `send` calls that found the TX ring full.
    pub tx_busy: u32,
    pub frames_received: u32,
    /// Errored or oversized frames discarded by `receive`.
    pub rx_dropped: u32,
    /// Frames the DMA had to discard because the RX ring was full.
    pub missed_by_hw: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BringUpError {
    /// The DMA soft reset never completed. Usually means the Ethernet clocks
    /// are off, or the RMII reference clock is missing.
    DmaResetTimeout,
    Phy(PhyError),
}

impl From<PhyError> for BringUpError {
    fn from(e: PhyError) -> Self {
        Self::Phy(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    DmaReset,
    DmaResetTimeout,
    RingsReady { tx: usize, rx: usize },
    Started(LinkStatus),
    TxBusy,
    TxRejected(usize),
    RxDropped,
}

ringbuf!(Trace, 16, Trace::None);

/// Soft-resets the whole Ethernet peripheral through the DMA's `SWR` bit.
///
/// This is needed even straight out of chip reset, because without it some
/// state is scrambled. The bit self-clears once the reset finishes, and the
/// registers must not be touched before then.
pub fn soft_reset(
    dma: &DmaRegisters,
    attempts: u32,
) -> Result<(), BringUpError> {
    dma.dmamr().set_bits(dmamr::SWR);
    spin_until(attempts, || !dma.dmamr().is_set(dmamr::SWR)).map_err(|_| {
        ringbuf_entry!(Trace::DmaResetTimeout);
        BringUpError::DmaResetTimeout
    })?;
    ringbuf_entry!(Trace::DmaReset);
    Ok(())
}

/// Brings the whole interface up: DMA soft reset, PHY reset and negotiation,
/// ring setup, MAC start.
///
/// # Preconditions
///
/// - The Ethernet MAC/TX/RX clocks are on and the peripheral is out of reset.
/// - RMII is selected in SYSCFG.
/// - The pins are configured for your board.
pub fn bring_up<'a, const TXN: usize, const RXN: usize>(
    regs: EthRegisters<'a>,
    config: &Config,
    tx_storage: &'a TxStorage<TXN>,
    rx_storage: &'a RxStorage<RXN>,
) -> Result<Ethernet<'a, TXN, RXN>, BringUpError> {
    soft_reset(regs.dma, config.timeouts.dma_reset)?;
    // The soft reset also cleared the MDIO clock divider, so this has to come
    // after it.
    let mut mdio =
        Mdio::new(regs.mac, config.mdio_clock, config.timeouts.smi_busy);
    bring_up_after_reset(regs, config, &mut mdio, tx_storage, rx_storage)
}

/// The part of [`bring_up`] after the DMA soft reset, reaching the PHY
/// through `smi`.
pub fn bring_up_after_reset<'a, S: Smi, const TXN: usize, const RXN: usize>(
    regs: EthRegisters<'a>,
    config: &Config,
    smi: &mut S,
    tx_storage: &'a TxStorage<TXN>,
    rx_storage: &'a RxStorage<RXN>,
) -> Result<Ethernet<'a, TXN, RXN>, BringUpError> {
    let link = Lan8742a::new(smi, config.phy_address)
        .bring_up(config.timeouts.phy_reset, config.timeouts.link)?
        .unwrap_or_default();

    let mut eth = Ethernet::new(regs, config, tx_storage, rx_storage);
    eth.start(link);
    Ok(eth)
}

/// Control block for ethernet driver.
pub struct Ethernet<'a, const TXN: usize, const RXN: usize> {
    regs: EthRegisters<'a>,
    tx_ring: TxRing<'a, TXN>,
    rx_ring: RxRing<'a, RXN>,
    promiscuous: bool,
    link: Option<LinkStatus>,
    stats: Stats,
}

impl<'a, const TXN: usize, const RXN: usize> Ethernet<'a, TXN, RXN> {
    /// Lays out the descriptor rings in `tx_storage` and `rx_storage`, points
    /// the DMA at them, and programs the station address. Nothing is started
    /// until [`start`](Self::start).
    ///
    /// Expects a freshly soft-reset peripheral.
    ///
    /// # Panics
    ///
    /// If either storage has already been handed to a driver.
    pub fn new(
        regs: EthRegisters<'a>,
        config: &Config,
        tx_storage: &'a TxStorage<TXN>,
        rx_storage: &'a RxStorage<RXN>,
    ) -> Self {
        let tx_ring = TxRing::new(tx_storage);
        let rx_ring = RxRing::new(rx_storage);
        let (mac, dma) = (regs.mac, regs.dma);

        // Descriptors are padded out to a cache line; tell the DMA to skip
        // the padding.
        dma.dmaccr().modify(|v| {
            (v & !dmaccr::DSL_MASK)
                | DESCRIPTOR_SKIP_DWORDS << dmaccr::DSL_SHIFT
        });

        // Burst length 1 on both channels, to avoid monopolizing the bus
        // fabric. The receive buffer size is set centrally rather than per
        // descriptor.
        dma.dmactcr().write(1 << dmactcr::TXPBL_SHIFT);
        dma.dmacrcr().write(
            1 << dmacrcr::RXPBL_SHIFT
                | ((BUFSZ as u32) << dmacrcr::RBSZ_SHIFT & dmacrcr::RBSZ_MASK),
        );

        // Ring locations and lengths. The length registers take the number
        // of descriptors minus one.
        dma.dmactdlar().write(tx_ring.base_ptr() as usize as u32);
        dma.dmactdrlr().write(tx_ring.len() as u32 - 1);
        dma.dmacrdlar().write(rx_ring.base_ptr() as usize as u32);
        dma.dmacrdrlr().write(rx_ring.len() as u32 - 1);

        // Nothing queued for transmit yet, so the TX tail is where the
        // cursor is. Every RX descriptor is armed, so the RX tail is the
        // last one.
        dma.dmactdtpr().write(tx_ring.next_ptr() as usize as u32);
        dma.dmacrdtpr().write(
            rx_ring.descriptor_ptr(ring::RingIndex::last()) as usize as u32,
        );

        // Polled operation only.
        dma.dmacier().write(0);

        let a = config.mac_address.0;
        mac.maca0hr().write(
            maca0hr::AE | u32::from(a[5]) << 8 | u32::from(a[4]),
        );
        mac.maca0lr().write(u32::from_le_bytes([a[0], a[1], a[2], a[3]]));

        ringbuf_entry!(Trace::RingsReady {
            tx: TXN,
            rx: RXN
        });

        Self {
            regs,
            tx_ring,
            rx_ring,
            promiscuous: config.promiscuous,
            link: None,
            stats: Stats::default(),
        }
    }

    /// Configures the MTL queues and MAC for `link`, then starts transmit and
    /// receive.
    pub fn start(&mut self, link: LinkStatus) {
        let EthRegisters { mac, mtl, dma } = self.regs;

        // Store-and-forward in both directions, so the MAC can generate and
        // check checksums, with all 2 KiB of queue RAM each way.
        mtl.mtltqomr().write(mtltqomr::TSF | mtltqomr::TQS_2K);
        mtl.mtlrqomr().write(mtlrqomr::RSF | mtlrqomr::RQS_2K);

        let mut cr = maccr::IPC | maccr::CST | maccr::ACS;
        if link.speed == Speed::Speed100 {
            cr |= maccr::FES;
        }
        if link.duplex == Duplex::Full {
            cr |= maccr::DM;
        }
        mac.maccr().write(cr);
        // The peripheral seems to want TE/RE done in a separate write.
        mac.maccr().set_bits(maccr::TE | maccr::RE);

        if self.promiscuous {
            mac.macpfr().set_bits(macpfr::PR);
        }

        dma.dmactcr().set_bits(dmactcr::ST);
        dma.dmacrcr().set_bits(dmacrcr::SR);

        self.link = Some(link);
        ringbuf_entry!(Trace::Started(link));
    }

    /// The mode the MAC was started in.
    pub fn link(&self) -> Option<LinkStatus> {
        self.link
    }

    pub fn can_send(&self) -> bool {
        self.tx_ring.is_next_free()
    }

    /// Queues `frame` for transmission, if there is room.
    ///
    /// Never waits: if the next TX descriptor is still owned by the DMA this
    /// returns `SendError::Busy` and the caller should try again later.
    /// Empty frames are refused with `SendError::Empty`.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), SendError> {
        self.try_send(frame.len(), |buf| buf.copy_from_slice(frame))
    }

    /// Tries to send a packet, if TX buffer space is available.
    ///
    /// This will attempt to get a free descriptor/buffer from the TX ring. If
    /// successful, it will call `fillout` with the packet buffer, so that it
    /// can be filled out. `fillout` is expected to overwrite the (arbitrary)
    /// contents of the packet buffer. This routine will then arrange for the
    /// hardware to notice an outgoing packet.
    ///
    /// If the TX ring is full, or `len` is zero or won't fit in a buffer,
    /// this returns an error without calling `fillout`.
    pub fn try_send<R>(
        &mut self,
        len: usize,
        fillout: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, SendError> {
        match self.tx_ring.try_send(len, fillout) {
            Ok(result) => {
                self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                // The DMA may have suspended after running out of
                // descriptors. Poke the tail pointer so it rechecks.
                self.regs
                    .dma
                    .dmactdtpr()
                    .write(self.tx_ring.next_ptr() as usize as u32);
                Ok(result)
            }
            Err(SendError::Busy) => {
                self.stats.tx_busy = self.stats.tx_busy.wrapping_add(1);
                ringbuf_entry!(Trace::TxBusy);
                Err(SendError::Busy)
            }
            Err(e @ (SendError::TooLong | SendError::Empty)) => {
                ringbuf_entry!(Trace::TxRejected(len));
                Err(e)
            }
        }
    }

    pub fn can_recv(&self) -> bool {
        self.rx_ring.is_next_free()
    }

    /// Copies the next received frame into `buf`, returning its length
    /// (truncated to `buf.len()`), or 0 if there was no good frame.
    ///
    /// Frames the hardware flagged as bad are discarded silently; they still
    /// return 0.
    pub fn receive(&mut self, buf: &mut [u8]) -> usize {
        self.try_recv(|frame| {
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            n
        })
        .unwrap_or(0)
    }

    /// Tries to receive a packet, if one is present in the RX ring.
    ///
    /// If a good frame is waiting, calls `readout` with it and returns what
    /// `readout` returned. Either way, once the descriptor has been handled
    /// it goes back to the hardware.
    ///
    /// If there are no packets waiting in the RX ring, this returns `None`
    /// without touching any registers.
    pub fn try_recv<R>(
        &mut self,
        readout: impl FnOnce(&[u8]) -> R,
    ) -> Option<R> {
        let result = match self.rx_ring.try_receive(readout) {
            RxPoll::Empty => return None,
            RxPoll::Dropped => {
                self.stats.rx_dropped = self.stats.rx_dropped.wrapping_add(1);
                ringbuf_entry!(Trace::RxDropped);
                None
            }
            RxPoll::Frame(r) => {
                self.stats.frames_received =
                    self.stats.frames_received.wrapping_add(1);
                Some(r)
            }
        };
        // We have returned a descriptor. The hardware might not realize there
        // is room in the RX ring now. Poke it.
        self.regs
            .dma
            .dmacrdtpr()
            .write(self.rx_ring.next_ptr() as usize as u32);
        result
    }

    /// Current counters. The hardware's missed-frame counter clears when
    /// read, so it is folded into ours here.
    pub fn stats(&mut self) -> Stats {
        let missed = self.regs.dma.dmacmfcr().read() & dmacmfcr::MFC_MASK;
        self.stats.missed_by_hw = self.stats.missed_by_hw.wrapping_add(missed);
        self.stats
    }

    #[cfg(test)]
    pub(crate) fn tx_ring(&self) -> &TxRing<'a, TXN> {
        &self.tx_ring
    }

    #[cfg(test)]
    pub(crate) fn rx_ring(&self) -> &RxRing<'a, RXN> {
        &self.rx_ring
    }
}
