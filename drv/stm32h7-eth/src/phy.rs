// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up for the Microchip LAN8742A RMII PHY found on Nucleo-H7 boards.
//!
//! Nothing about the PHY is cached here: every question is answered with a
//! fresh MDIO read.

use ringbuf::{ringbuf, ringbuf_entry};

use crate::mdio::{Smi, SmiTimeout};
use crate::spin::{poll_until, SpinError};

/// Standard MDIO registers laid out in IEEE 802.3 standard clause 22. Vendors
/// often add to this set in the 16+ range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmiClause22Register {
    Control = 0,
    Status = 1,
    PhyIdent2 = 2,
    PhyIdent3 = 3,
}

impl From<SmiClause22Register> for u8 {
    fn from(x: SmiClause22Register) -> Self {
        x as u8
    }
}

/// LAN8742A PHY Special Control/Status register (vendor specific).
pub const SPECIAL_STATUS: u8 = 31;

/// Basic control register bits.
pub mod bcr {
    pub const RESET: u16 = 1 << 15;
    pub const AN_ENABLE: u16 = 1 << 12;
    pub const AN_RESTART: u16 = 1 << 9;
}

/// Basic status register bits.
pub mod bsr {
    pub const LINK_UP: u16 = 1 << 2;
    pub const AN_COMPLETE: u16 = 1 << 5;
}

/// Special control/status register bits.
pub mod sr {
    pub const AN_DONE: u16 = 1 << 12;
    pub const SPEED_SHIFT: u16 = 2;
    pub const SPEED_MASK: u16 = 0b111 << SPEED_SHIFT;
    pub const HALF_10: u16 = 0b001 << SPEED_SHIFT;
    pub const HALF_100: u16 = 0b010 << SPEED_SHIFT;
    pub const FULL_10: u16 = 0b101 << SPEED_SHIFT;
    pub const FULL_100: u16 = 0b110 << SPEED_SHIFT;
}

/// Identifier (ID1 in the top half, ID2 in the bottom) of a LAN8742A with
/// the revision nibble cleared.
pub const LAN8742A_ID: u32 = 0x0007_C130;
const REVISION_MASK: u32 = 0xF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PhyError {
    /// The PHY didn't come out of reset, didn't answer on the bus, or isn't
    /// a LAN8742A.
    WrongOrUnresponsivePhy,
    /// Auto-negotiation didn't produce a link in time.
    LinkTimeout,
}

impl From<SmiTimeout> for PhyError {
    fn from(_: SmiTimeout) -> Self {
        Self::WrongOrUnresponsivePhy
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Speed {
    Speed10,
    Speed100,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Duplex {
    Half,
    Full,
}

/// Negotiated link mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkStatus {
    pub speed: Speed,
    pub duplex: Duplex,
}

impl Default for LinkStatus {
    /// What the MAC runs at when the PHY won't say.
    fn default() -> Self {
        Self {
            speed: Speed::Speed100,
            duplex: Duplex::Full,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    ResetTimeout,
    Identified(u32),
    WrongPhy(u32),
    LinkTimeout,
    LinkUp(LinkStatus),
    UnresolvedMode(u16),
}

ringbuf!(Trace, 16, Trace::None);

pub struct Lan8742a<'s, S: Smi> {
    smi: &'s mut S,
    addr: u8,
}

impl<'s, S: Smi> Lan8742a<'s, S> {
    pub fn new(smi: &'s mut S, addr: u8) -> Self {
        Self { smi, addr }
    }

    fn read(&mut self, reg: impl Into<u8>) -> Result<u16, SmiTimeout> {
        self.smi.smi_read(self.addr, reg.into())
    }

    fn write(
        &mut self,
        reg: impl Into<u8>,
        value: u16,
    ) -> Result<(), SmiTimeout> {
        self.smi.smi_write(self.addr, reg.into(), value)
    }

    /// Soft-resets the PHY, waits up to `attempts` polls for the reset to
    /// finish, and checks that it identifies as a LAN8742A. Returns the full
    /// identifier, revision included.
    pub fn reset_and_identify(
        &mut self,
        attempts: u32,
    ) -> Result<u32, PhyError> {
        self.write(SmiClause22Register::Control, bcr::RESET)?;
        poll_until(attempts, || {
            Ok::<_, SmiTimeout>(
                self.read(SmiClause22Register::Control)? & bcr::RESET == 0,
            )
        })
        .map_err(|_| {
            ringbuf_entry!(Trace::ResetTimeout);
            PhyError::WrongOrUnresponsivePhy
        })?;

        let id1 = self.read(SmiClause22Register::PhyIdent2)?;
        let id2 = self.read(SmiClause22Register::PhyIdent3)?;
        let id = u32::from(id1) << 16 | u32::from(id2);
        if id & !REVISION_MASK != LAN8742A_ID {
            ringbuf_entry!(Trace::WrongPhy(id));
            return Err(PhyError::WrongOrUnresponsivePhy);
        }
        ringbuf_entry!(Trace::Identified(id));
        Ok(id)
    }

    /// Turns on and restarts auto-negotiation, then waits up to `attempts`
    /// polls for the link to come up.
    pub fn enable_autonegotiation(
        &mut self,
        attempts: u32,
    ) -> Result<(), PhyError> {
        self.write(
            SmiClause22Register::Control,
            bcr::AN_ENABLE | bcr::AN_RESTART,
        )?;
        poll_until(attempts, || {
            Ok::<_, SmiTimeout>(
                self.read(SmiClause22Register::Status)? & bsr::LINK_UP != 0,
            )
        })
        .map_err(|e| match e {
            SpinError::TimedOut => {
                ringbuf_entry!(Trace::LinkTimeout);
                PhyError::LinkTimeout
            }
            SpinError::Check(e) => PhyError::from(e),
        })
    }

    /// Reports the negotiated link mode, or `None` if the link is down or
    /// negotiation hasn't resolved a mode.
    pub fn link_status(&mut self) -> Result<Option<LinkStatus>, PhyError> {
        // Link status in the BSR is latched low; read it twice to get the
        // current state.
        self.read(SmiClause22Register::Status)?;
        let basic = self.read(SmiClause22Register::Status)?;
        if basic & bsr::LINK_UP == 0 {
            return Ok(None);
        }
        let special = self.read(SPECIAL_STATUS)?;
        if special & sr::AN_DONE == 0 {
            return Ok(None);
        }
        let (speed, duplex) = match special & sr::SPEED_MASK {
            sr::HALF_10 => (Speed::Speed10, Duplex::Half),
            sr::FULL_10 => (Speed::Speed10, Duplex::Full),
            sr::HALF_100 => (Speed::Speed100, Duplex::Half),
            sr::FULL_100 => (Speed::Speed100, Duplex::Full),
            _ => {
                ringbuf_entry!(Trace::UnresolvedMode(special));
                return Ok(None);
            }
        };
        let status = LinkStatus { speed, duplex };
        ringbuf_entry!(Trace::LinkUp(status));
        Ok(Some(status))
    }

    /// Reset, identify, negotiate, and report what was negotiated.
    pub fn bring_up(
        &mut self,
        reset_attempts: u32,
        link_attempts: u32,
    ) -> Result<Option<LinkStatus>, PhyError> {
        self.reset_and_identify(reset_attempts)?;
        self.enable_autonegotiation(link_attempts)?;
        self.link_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::FakePhy;

    #[test]
    fn identifies_lan8742a() {
        let mut smi = FakePhy::new(0);
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(phy.reset_and_identify(100), Ok(0x0007_C131));
        // Reset was written, then polled until clear.
        assert!(smi.writes.contains(&(0, bcr::RESET)));
    }

    #[test]
    fn slow_reset_within_budget() {
        let mut smi = FakePhy::new(0);
        smi.reset_polls = 50;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert!(phy.reset_and_identify(100).is_ok());
    }

    #[test]
    fn stuck_reset_is_unresponsive() {
        let mut smi = FakePhy::new(0);
        smi.reset_polls = u32::MAX;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(
            phy.reset_and_identify(100),
            Err(PhyError::WrongOrUnresponsivePhy)
        );
    }

    #[test]
    fn wrong_id_is_rejected() {
        let mut smi = FakePhy::new(0);
        smi.id = (0x0022, 0x1561);
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(
            phy.reset_and_identify(100),
            Err(PhyError::WrongOrUnresponsivePhy)
        );
    }

    #[test]
    fn wrong_address_is_unresponsive() {
        // Nobody answers at address 5; the bus floats high, so BCR.RESET
        // never reads clear.
        let mut smi = FakePhy::new(0);
        let mut phy = Lan8742a::new(&mut smi, 5);
        assert_eq!(
            phy.reset_and_identify(100),
            Err(PhyError::WrongOrUnresponsivePhy)
        );
    }

    #[test]
    fn bus_timeout_is_unresponsive() {
        let mut smi = FakePhy::new(0);
        smi.bus_dead = true;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(
            phy.reset_and_identify(100),
            Err(PhyError::WrongOrUnresponsivePhy)
        );
    }

    #[test]
    fn autonegotiation_waits_for_link() {
        let mut smi = FakePhy::new(0);
        smi.link_polls = 10;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(phy.enable_autonegotiation(100), Ok(()));
        assert!(smi
            .writes
            .contains(&(0, bcr::AN_ENABLE | bcr::AN_RESTART)));
    }

    #[test]
    fn no_cable_times_out() {
        let mut smi = FakePhy::new(0);
        smi.link_polls = u32::MAX;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(
            phy.enable_autonegotiation(1000),
            Err(PhyError::LinkTimeout)
        );
    }

    #[test]
    fn link_status_decodes_mode() {
        let mut smi = FakePhy::new(0);
        smi.mode = sr::HALF_10;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(
            phy.link_status(),
            Ok(Some(LinkStatus {
                speed: Speed::Speed10,
                duplex: Duplex::Half
            }))
        );
    }

    #[test]
    fn link_down_has_no_status() {
        let mut smi = FakePhy::new(0);
        smi.link_polls = u32::MAX;
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(phy.link_status(), Ok(None));
    }

    #[test]
    fn bring_up_reports_mode() {
        let mut smi = FakePhy::new(0);
        let mut phy = Lan8742a::new(&mut smi, 0);
        assert_eq!(phy.bring_up(100, 100), Ok(Some(LinkStatus::default())));
    }
}
