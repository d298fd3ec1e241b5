// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Station management (SMI/MDIO) access to the PHY.

use crate::regs::{macmdioar, macmdiodr, MacRegisters};
use crate::spin::spin_until;

/// An MDIO transaction didn't finish within its attempt budget.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SmiTimeout;

/// Clause 22 register access to PHYs on a management bus.
pub trait Smi {
    fn smi_read(&mut self, phy: u8, register: u8) -> Result<u16, SmiTimeout>;

    fn smi_write(
        &mut self,
        phy: u8,
        register: u8,
        value: u16,
    ) -> Result<(), SmiTimeout>;
}

/// MDC clock divider applied to the AHB clock (`MACMDIOAR.CR`). MDC must
/// stay between 1 and 2.5 MHz.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MdioClock {
    Div42 = 0b0000,
    Div62 = 0b0001,
    Div16 = 0b0010,
    Div26 = 0b0011,
    Div102 = 0b0100,
    Div124 = 0b0101,
}

impl MdioClock {
    /// Picks the divider for an AHB clock of `hclk` Hz, or `None` if even
    /// the largest divider would run MDC too fast.
    pub fn for_hclk(hclk: u32) -> Option<Self> {
        Some(match hclk / 1_000_000 {
            0..=34 => Self::Div16,
            35..=59 => Self::Div26,
            60..=99 => Self::Div42,
            100..=149 => Self::Div62,
            150..=249 => Self::Div102,
            250..=310 => Self::Div124,
            _ => return None,
        })
    }

    fn bits(self) -> u32 {
        (self as u32) << macmdioar::CR_SHIFT
    }
}

impl Default for MdioClock {
    /// Right for the 200 MHz AHB clock the Nucleo boards normally run.
    fn default() -> Self {
        Self::Div102
    }
}

/// The MAC's own MDIO master.
pub struct Mdio<'a> {
    mac: &'a MacRegisters,
    clock: MdioClock,
    busy_attempts: u32,
}

impl<'a> Mdio<'a> {
    /// Programs the MDC divider and returns the bus. Each wait for the bus to
    /// go idle is bounded by `busy_attempts` polls.
    pub fn new(
        mac: &'a MacRegisters,
        clock: MdioClock,
        busy_attempts: u32,
    ) -> Self {
        mac.macmdioar().write(clock.bits());
        Self {
            mac,
            clock,
            busy_attempts,
        }
    }

    fn wait_idle(&self) -> Result<(), SmiTimeout> {
        spin_until(self.busy_attempts, || {
            !self.mac.macmdioar().is_set(macmdioar::MB)
        })
        .map_err(|_| SmiTimeout)
    }

    fn start(&self, phy: u8, register: u8, op: u32) {
        // The whole register is rewritten, so the clock divider has to be
        // carried along.
        self.mac.macmdioar().write(
            (u32::from(phy) & 0x1F) << macmdioar::PA_SHIFT
                | (u32::from(register) & 0x1F) << macmdioar::RDA_SHIFT
                | self.clock.bits()
                | op
                | macmdioar::MB,
        );
    }
}

impl Smi for Mdio<'_> {
    fn smi_read(&mut self, phy: u8, register: u8) -> Result<u16, SmiTimeout> {
        self.wait_idle()?;
        self.start(phy, register, macmdioar::GOC_READ);
        self.wait_idle()?;
        Ok((self.mac.macmdiodr().read() & macmdiodr::MD_MASK) as u16)
    }

    fn smi_write(
        &mut self,
        phy: u8,
        register: u8,
        value: u16,
    ) -> Result<(), SmiTimeout> {
        self.wait_idle()?;
        // Data first; setting MB starts the transaction.
        self.mac.macmdiodr().write(u32::from(value));
        self.start(phy, register, macmdioar::GOC_WRITE);
        self.wait_idle()
    }
}
