use core::fmt;

use rand_core::RngCore;

/// Specifies whether a device address is randomly generated or a registered LAN MAC address.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AddressKind {
    /// Publicly registered IEEE 802-2001 LAN MAC address.
    Public,
    /// Randomly generated address.
    Random,
}

/// A Bluetooth device address.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    bytes: [u8; 6],
    kind: AddressKind,
}

impl DeviceAddress {
    /// Create a new device address from 6 raw Bytes and an address kind specifier.
    ///
    /// The `bytes` array contains the address Bytes as they are sent over the air (LSB first).
    pub fn new(bytes: [u8; 6], kind: AddressKind) -> Self {
        DeviceAddress { bytes, kind }
    }

    /// Generates a random static device address from `rng`.
    ///
    /// Random static addresses carry `11` in the two most significant bits of the address.
    pub fn random_static(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0; 6];
        rng.fill_bytes(&mut bytes);
        bytes[5] |= 0b1100_0000;
        DeviceAddress::new(bytes, AddressKind::Random)
    }

    /// Returns the address kind.
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Returns whether this address is randomly generated.
    pub fn is_random(&self) -> bool {
        self.kind == AddressKind::Random
    }

    /// Returns the raw bytes making up this address (LSB first).
    pub fn raw(&self) -> &[u8; 6] {
        &self.bytes
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bluetooth device addresses are usually displayed MSB first, so that the OUI
        // (Organizationally Unique Identifier) acts as a prefix, not as a suffix.
        for (i, b) in self.bytes.iter().rev().enumerate() {
            if i != 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }

        write!(f, "[{:?}]", self.kind)?;

        Ok(())
    }
}
