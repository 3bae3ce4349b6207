//! Data Channel PDU structures.
//!
//! A data channel PDU consists of a 16-bit header and a payload of up to 251 Bytes (Bluetooth 4.2
//! with the Packet Length Extension; without it, 27 Bytes):
//!
//! ```notrust
//! LSB                                                                MSB
//! +----------+---------+---------+---------+------------+--------------+
//! |   LLID   |  NESN   |   SN    |   MD    |    RFU     |    Length    |
//! | (2 bits) | (1 bit) | (1 bit) | (1 bit) |  (3 bits)  |   (8 bits)   |
//! +----------+---------+---------+---------+------------+--------------+
//! ```
//!
//! The payload format depends on the 2-bit `LLID` field, see [`Llid`].
//!
//! ## Sequence Numbers
//!
//! The `NESN` and `SN` fields implement the Link-Layer's stop-and-wait ARQ. Each side keeps two
//! 1-bit counters, `transmitSeqNum` and `nextExpectedSeqNum`, both starting at 0 when the
//! connection is created.
//!
//! When a PDU is sent for the first time, its `SN` field is set to `transmitSeqNum`; a
//! retransmitted PDU keeps its old `SN`. In both cases `NESN` carries `nextExpectedSeqNum`.
//!
//! On reception, a packet whose `SN` equals the local `nextExpectedSeqNum` carries new data and
//! toggles `nextExpectedSeqNum`; any other `SN` marks a retransmission. A packet whose `NESN`
//! differs from the local `transmitSeqNum` acknowledges the last transmitted PDU and toggles
//! `transmitSeqNum`; an unchanged `NESN` requests a retransmission.

use crate::link::SeqNum;
use crate::{bytes::*, Error};
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

/// Maximum data channel PDU payload supported by this stack (Bluetooth 4.2 with the Packet Length
/// Extension).
pub const MAX_PAYLOAD: usize = 251;

/// Data channel payload size every implementation must support.
///
/// This is also the fragment size used by the L2CAP layer unless a larger budget is configured.
pub const MIN_PAYLOAD: usize = 27;

/// 16-bit data channel header preceding the payload.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header(u16);

const NESN_MASK: u16 = 0b0000_0100;
const SN_MASK: u16 = 0b0000_1000;
const MD_MASK: u16 = 0b0001_0000;

impl Header {
    /// Creates a header with the given LLID field and all other fields set to 0 (including the
    /// payload length).
    pub fn new(llid: Llid) -> Self {
        Header(llid as u16)
    }

    /// Parses a header from raw bytes.
    ///
    /// # Panics
    ///
    /// Panics when `raw` contains less than 2 Bytes.
    pub fn parse(raw: &[u8]) -> Self {
        Header(LittleEndian::read_u16(raw))
    }

    /// Returns the raw representation of the header.
    ///
    /// The returned `u16` must be transmitted LSB and LSb first as the first 2 octets of the PDU.
    pub fn to_u16(&self) -> u16 {
        self.0
    }

    /// Returns the `LLID` field (PDU type).
    pub fn llid(&self) -> Llid {
        match self.0 & 0b11 {
            0b00 => Llid::Reserved,
            0b01 => Llid::DataCont,
            0b10 => Llid::DataStart,
            0b11 => Llid::Control,
            _ => unreachable!(),
        }
    }

    /// Returns the value of the `NESN` field (Next Expected Sequence Number).
    pub fn nesn(&self) -> SeqNum {
        SeqNum::from(self.0 & NESN_MASK != 0)
    }

    /// Sets the value of the `NESN` field.
    pub fn set_nesn(&mut self, nesn: SeqNum) {
        if nesn.bit() {
            self.0 |= NESN_MASK;
        } else {
            self.0 &= !NESN_MASK;
        }
    }

    /// Returns the value of the `SN` field (Sequence Number).
    pub fn sn(&self) -> SeqNum {
        SeqNum::from(self.0 & SN_MASK != 0)
    }

    /// Sets the value of the `SN` field.
    pub fn set_sn(&mut self, sn: SeqNum) {
        if sn.bit() {
            self.0 |= SN_MASK;
        } else {
            self.0 &= !SN_MASK;
        }
    }

    /// Returns whether the `MD` field is set (More Data).
    ///
    /// A device that has another PDU queued for the current connection event announces it here.
    pub fn md(&self) -> bool {
        self.0 & MD_MASK != 0
    }

    /// Sets the value of the `MD` field.
    pub fn set_md(&mut self, md: bool) {
        if md {
            self.0 |= MD_MASK;
        } else {
            self.0 &= !MD_MASK;
        }
    }

    /// Returns the length of the payload in octets as specified in the `Length` field.
    pub fn payload_length(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Sets the payload length field to `len`.
    pub fn set_payload_length(&mut self, len: u8) {
        self.0 = (u16::from(len) << 8) | (self.0 & 0x00ff);
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("LLID", &self.llid())
            .field("NESN", &self.nesn())
            .field("SN", &self.sn())
            .field("MD", &self.md())
            .field("Length", &self.payload_length())
            .finish()
    }
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Header(bytes.read_u16_le()?))
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}

/// Values of the LLID field in [`Header`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Llid {
    /// Reserved for future use.
    Reserved = 0b00,

    /// Continuation of an L2CAP message, or empty PDU.
    DataCont = 0b01,

    /// Start of an L2CAP message (or a complete message if no fragmentation was necessary).
    DataStart = 0b10,

    /// LL Control PDU.
    Control = 0b11,
}
