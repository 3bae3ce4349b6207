//! Attribute handles.

use crate::{bytes::*, Error};
use core::fmt;

/// A 16-bit handle uniquely identifying an attribute on an ATT server.
///
/// The `0x0000` handle (`NULL`) is invalid and must not be used.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Handle(u16);

impl Handle {
    /// The `0x0000` handle is not used for actual attributes, but as a special placeholder when no
    /// attribute handle is valid (eg. in error responses).
    pub const NULL: Self = Handle(0x0000);

    /// Create an attribute handle from a raw `u16`.
    pub const fn from_raw(raw: u16) -> Self {
        Handle(raw)
    }

    /// Returns the raw 16-bit integer representing this handle.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl FromBytes<'_> for Handle {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Handle(bytes.read_u16_le()?))
    }
}

impl ToBytes for Handle {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}

/// An inclusive range of attribute handles, as carried in discovery requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HandleRange {
    /// First handle of the range.
    pub start: Handle,
    /// Last handle of the range (inclusive).
    pub end: Handle,
}

impl HandleRange {
    /// The full handle space, `0x0001..=0xFFFF`.
    pub const FULL: Self = HandleRange {
        start: Handle::from_raw(0x0001),
        end: Handle::from_raw(0xFFFF),
    };

    /// Checks that the range is well-formed: no null start, start not after end.
    pub fn is_valid(&self) -> bool {
        self.start != Handle::NULL && self.start.as_u16() <= self.end.as_u16()
    }
}

impl FromBytes<'_> for HandleRange {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            start: Handle::from_bytes(bytes)?,
            end: Handle::from_bytes(bytes)?,
        })
    }
}

impl ToBytes for HandleRange {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        self.start.to_bytes(writer)?;
        self.end.to_bytes(writer)
    }
}
