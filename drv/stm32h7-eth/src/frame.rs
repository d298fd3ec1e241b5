// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ethernet II frame layout.
//!
//! The MAC appends the FCS on transmit and strips it on receive, so frames
//! here run from the destination address to the end of the payload.

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, IntoBytes};

pub const HEADER_LEN: usize = 14;
/// Shortest frame the wire accepts, without FCS. Shorter frames are padded.
pub const MIN_FRAME_LEN: usize = 60;
pub const MAX_PAYLOAD: usize = 1500;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    PayloadTooLarge,
    BufferTooSmall,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Immutable,
    zerocopy_derive::Unaligned,
)]
#[repr(transparent)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: Self = Self([0xFF; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit: set for multicast (and broadcast) addresses.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// U/L bit: set for addresses that weren't assigned by a vendor.
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EtherType(pub u16);

impl EtherType {
    pub const IPV4: Self = Self(0x0800);
    pub const ARP: Self = Self(0x0806);
    pub const VLAN: Self = Self(0x8100);
    pub const IPV6: Self = Self(0x86DD);
}

#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    zerocopy_derive::FromBytes,
    zerocopy_derive::IntoBytes,
    zerocopy_derive::KnownLayout,
    zerocopy_derive::Immutable,
    zerocopy_derive::Unaligned,
)]
#[repr(C)]
pub struct EthernetHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    ethertype: U16,
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<EthernetHeader>(),
    HEADER_LEN
);

impl EthernetHeader {
    pub fn new(dst: MacAddress, src: MacAddress, ethertype: EtherType) -> Self {
        Self {
            dst,
            src,
            ethertype: U16::new(ethertype.0),
        }
    }

    pub fn ethertype(&self) -> EtherType {
        EtherType(self.ethertype.get())
    }
}

/// Writes a frame into `out`: header, `payload`, then zeros up to
/// [`MIN_FRAME_LEN`]. Returns the number of bytes written, which is what
/// should be sent.
pub fn build(
    out: &mut [u8],
    dst: MacAddress,
    src: MacAddress,
    ethertype: EtherType,
    payload: &[u8],
) -> Result<usize, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge);
    }
    let len = (HEADER_LEN + payload.len()).max(MIN_FRAME_LEN);
    let out = out.get_mut(..len).ok_or(FrameError::BufferTooSmall)?;

    let (header, rest) = out.split_at_mut(HEADER_LEN);
    header.copy_from_slice(
        EthernetHeader::new(dst, src, ethertype).as_bytes(),
    );
    let (body, pad) = rest.split_at_mut(payload.len());
    body.copy_from_slice(payload);
    pad.fill(0);

    Ok(len)
}

/// Splits a received frame into its header and everything after it (which
/// may include padding). `None` if it's too short to have a header.
pub fn parse(frame: &[u8]) -> Option<(&EthernetHeader, &[u8])> {
    EthernetHeader::ref_from_prefix(frame).ok()
}
