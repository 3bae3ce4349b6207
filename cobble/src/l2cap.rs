//! The Logical Link Control and Adaptation Protocol (L2CAP), fixed-channel flavor.
//!
//! L2CAP provides "channels" to the upper layers that are multiplexed over the Link-Layer data
//! stream. A channel is identified by a 16-bit CID; the only one this Central uses is `0x0004`,
//! the Attribute Protocol channel, which is connected by default as soon as the Link-Layer
//! connection exists.
//!
//! Outgoing protocol PDUs get the 4-byte `Length | CID` header prepended and are cut into
//! Link-Layer sized fragments: the first fragment travels with `LLID = DataStart`, continuations
//! with `LLID = DataCont`. Incoming fragments are reassembled by the same rule; frames addressed
//! to a CID nobody listens on are dropped.

use crate::att;
use crate::bytes::*;
use crate::link::data::{Llid, MIN_PAYLOAD};
use crate::utils::HexSlice;
use crate::Error;
use core::fmt;
use heapless::Vec;

/// An L2CAP channel identifier (CID).
///
/// A number of channel identifiers are reserved for predefined functions:
///
/// * `0x0000`: The null identifier. Must never be used as a destination endpoint.
/// * `0x0004`: Attribute protocol (ATT). BLE only.
/// * `0x0005`: LE L2CAP signaling channel.
/// * `0x0006`: LE Security Manager protocol.
///
/// For BLE, channels `0x0040`-`0x007F` are dynamically allocated by the signaling channel, which
/// this stack does not implement.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Channel(u16);

impl Channel {
    /// The null channel identifier. Must not be used as a destination endpoint.
    pub const NULL: Self = Channel(0x0000);

    /// The channel used by the Attribute Protocol (ATT).
    pub const ATT: Self = Channel(0x0004);

    /// LE L2CAP signaling channel (connectionless).
    pub const LE_SIGNALING: Self = Channel(0x0005);

    /// LE Security Manager channel.
    pub const LE_SECURITY_MANAGER: Self = Channel(0x0006);

    /// Returns the channel identifier (CID) as a raw `u16`.
    pub fn as_raw(&self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl FromBytes<'_> for Channel {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Channel(bytes.read_u16_le()?))
    }
}

impl ToBytes for Channel {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}

/// Header prepended to *all* L2CAP PDUs.
#[derive(Debug, Copy, Clone)]
pub struct Header {
    /// Length of the payload following the length and channel fields (after reassembly).
    pub length: u16,
    /// Destination endpoint of the PDU.
    pub channel: Channel,
}

impl Header {
    /// The size of an L2CAP message header in Bytes.
    pub const SIZE: usize = 2 + 2;
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let length = bytes.read_u16_le()?;
        let channel = Channel::from_bytes(bytes)?;
        Ok(Self { length, channel })
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.length)?;
        writer.write_u16_le(self.channel.as_raw())?;
        Ok(())
    }
}

/// Largest L2CAP frame this stack produces or accepts on the ATT channel: the maximum ATT MTU
/// plus the frame header.
pub const MAX_FRAME: usize = att::MTU_MAX as usize + Header::SIZE;

/// Builds a complete L2CAP frame (header + payload) addressed to `channel` into `out`.
///
/// Returns the number of bytes written.
pub fn frame(channel: Channel, payload: &[u8], out: &mut [u8]) -> Result<usize, Error> {
    if payload.len() > usize::from(u16::max_value()) {
        return Err(Error::InvalidLength);
    }
    let mut writer = ByteWriter::new(out);
    let total = writer.space_left();
    Header {
        length: payload.len() as u16,
        channel,
    }
    .to_bytes(&mut writer)?;
    writer.write_slice(payload)?;
    Ok(total - writer.space_left())
}

/// Iterator cutting an L2CAP frame into Link-Layer fragments.
///
/// The first fragment is tagged `DataStart`, every following one `DataCont`. The Link-Layer's
/// MD bit falls out of its TX queue depth, so fragments only carry LLID and bytes.
pub struct Fragments<'a> {
    frame: &'a [u8],
    fragment_size: usize,
    first: bool,
}

impl<'a> Fragments<'a> {
    /// Creates a fragment iterator over a complete frame.
    ///
    /// `fragment_size` is the Link-Layer payload budget, at least [`MIN_PAYLOAD`].
    pub fn new(frame: &'a [u8], fragment_size: usize) -> Self {
        debug_assert!(fragment_size >= MIN_PAYLOAD);
        Self {
            frame,
            fragment_size,
            first: true,
        }
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = (Llid, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.frame.is_empty() {
            return None;
        }
        let llid = if self.first {
            Llid::DataStart
        } else {
            Llid::DataCont
        };
        self.first = false;
        let len = self.frame.len().min(self.fragment_size);
        let (head, rest) = self.frame.split_at(len);
        self.frame = rest;
        Some((llid, head))
    }
}

/// A fully reassembled L2CAP frame.
#[derive(Debug)]
pub struct Frame<'a> {
    /// The destination channel.
    pub channel: Channel,
    /// The protocol payload.
    pub payload: &'a [u8],
}

/// Reassembles Link-Layer fragments into L2CAP frames.
///
/// `CAP` bounds the reassembled frame size; frames announcing a larger length are rejected as a
/// protocol violation.
pub struct Reassembler<const CAP: usize = MAX_FRAME> {
    buf: Vec<u8, CAP>,
    /// Total frame size (header + payload) announced by the in-progress frame.
    expected: Option<usize>,
}

impl<const CAP: usize> Reassembler<CAP> {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            expected: None,
        }
    }

    /// Discards any partially reassembled frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = None;
    }

    /// Feeds one Link-Layer fragment into the reassembler.
    ///
    /// Returns the finished frame once all announced bytes have arrived. Frames addressed to a
    /// channel other than [`Channel::ATT`] are dropped here (with `Ok(None)`), so callers only
    /// ever see ATT traffic.
    pub fn push(&mut self, llid: Llid, payload: &[u8]) -> Result<Option<Frame<'_>>, Error> {
        match llid {
            Llid::DataStart => {
                if self.expected.is_some() {
                    warn!("new L2CAP frame started mid-reassembly, dropping old frame");
                }
                self.reset();

                if payload.len() < Header::SIZE {
                    // The header always fits the first fragment; anything shorter is garbage.
                    return Err(Error::InvalidLength);
                }
                let header = Header::from_bytes(&mut ByteReader::new(payload))?;
                let total = Header::SIZE + usize::from(header.length);
                if total > CAP {
                    return Err(Error::InvalidLength);
                }
                self.buf.extend_from_slice(payload).map_err(|()| Error::Eof)?;
                self.expected = Some(total);
            }
            Llid::DataCont => {
                if self.expected.is_none() {
                    warn!(
                        "continuation without a frame in progress: {:?}",
                        HexSlice(payload)
                    );
                    return Ok(None);
                }
                self.buf.extend_from_slice(payload).map_err(|()| Error::Eof)?;
            }
            _ => return Err(Error::InvalidValue),
        }

        let expected = self.expected.unwrap();
        if self.buf.len() < expected {
            return Ok(None);
        }
        if self.buf.len() > expected {
            self.reset();
            return Err(Error::InvalidLength);
        }

        self.expected = None;
        let header = Header::from_bytes(&mut ByteReader::new(&self.buf))?;
        if header.channel != Channel::ATT {
            warn!("dropping frame for unconnected channel {:?}", header.channel);
            self.buf.clear();
            return Ok(None);
        }
        let mut reader = ByteReader::new(&self.buf);
        let header = Header::from_bytes(&mut reader)?;
        Ok(Some(Frame {
            channel: header.channel,
            payload: reader.into_rest(),
        }))
    }
}

impl<const CAP: usize> Default for Reassembler<CAP> {
    fn default() -> Self {
        Self::new()
    }
}
