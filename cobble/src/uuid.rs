//! Bluetooth UUIDs.
//!
//! Everything this stack touches (the GATT declaration attributes and the shortlist of known
//! vendor services) is identified by 16-bit SIG-assigned UUIDs, so only those are implemented.

use crate::bytes::*;
use crate::Error;
use core::fmt;

/// A 16-bit UUID allocated by the Bluetooth SIG.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Uuid16(pub u16);

impl Uuid16 {
    /// Returns the raw 16-bit integer.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid16({:#06X})", self.0)
    }
}

impl FromBytes<'_> for Uuid16 {
    fn from_bytes(bytes: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Uuid16(bytes.read_u16_le()?))
    }
}

impl ToBytes for Uuid16 {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.0)
    }
}
