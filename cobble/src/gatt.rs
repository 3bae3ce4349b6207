//! A thin GATT client facade for UART-style peripherals.
//!
//! A full GATT client would walk the peripheral's service tree; the devices this stack targets
//! (Nordic-UART-style serial bridges and Xiaomi wearables) all expose a fixed, well-known
//! attribute layout, so the facade only has to figure out *which* of the known layouts it is
//! talking to. Detection goes through the Device Name characteristic first and falls back to a
//! primary-service lookup; both paths end in a [`PeripheralKind`] whose handle table drives all
//! subsequent traffic.

use crate::att::{Handle, HandleRange};
use crate::bytes::{ByteReader, FromBytes};
use crate::time::Duration;
use crate::uuid::Uuid16;
use crate::Error;

/// UUID of the *Primary Service* grouping attribute (`0x2800`).
pub const PRIMARY_SERVICE: Uuid16 = Uuid16(0x2800);

/// UUID of the Client Characteristic Configuration Descriptor (`0x2902`).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid16 = Uuid16(0x2902);

/// Service UUID of the Xiaomi wearable protocol.
pub const XIAOMI_SERVICE: Uuid16 = Uuid16(0xFEE0);

/// Service UUID of HM-10/Nordic-style UART bridges.
pub const NORDIC_UART_SERVICE: Uuid16 = Uuid16(0xFFE0);

/// Handle of the GAP Device Name characteristic value.
///
/// The GAP service occupies the start of the attribute table on every device this facade knows,
/// putting the Device Name value at `0x0003`.
pub const DEVICE_NAME_HANDLE: Handle = Handle::from_raw(0x0003);

/// Handle range queried when falling back to service detection.
pub const DISCOVERY_RANGE: HandleRange = HandleRange::FULL;

/// Value written to a CCCD to enable notifications.
pub const CCCD_ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

/// Pause between consecutive chunk writes of a text payload.
///
/// Cheap peripherals drain their UART-side buffer slowly; pacing the writes keeps them from
/// silently dropping bytes.
pub const WRITE_CHUNK_SPACING: Duration = Duration::from_millis(20);

/// The kind of peripheral on the other end, selecting the fixed attribute layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeripheralKind {
    /// Xiaomi wearable (Mi Band family).
    Xiaomi,
    /// Nordic-UART-style serial bridge.
    NordicUart,
    /// Anything else; treated like a UART bridge with the default layout.
    Custom,
}

/// The four handles the facade works with, fixed per [`PeripheralKind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProfileHandles {
    /// The service declaration.
    pub service: Handle,
    /// Characteristic value written to push data *to* the peripheral.
    pub tx_char: Handle,
    /// Characteristic value the peripheral notifies data *from*.
    pub rx_char: Handle,
    /// CCCD of `rx_char`.
    pub cccd: Handle,
}

impl PeripheralKind {
    /// Picks the peripheral kind from the GAP Device Name.
    ///
    /// Unrecognized names select `Custom`; callers that could not read the name at all should
    /// fall back to [`match_services`].
    pub fn from_device_name(name: &str) -> Self {
        if name.contains("Mi Band") {
            PeripheralKind::Xiaomi
        } else if name.contains("Nordic") {
            PeripheralKind::NordicUart
        } else {
            PeripheralKind::Custom
        }
    }

    /// Picks the peripheral kind from a primary-service UUID, if it is a known one.
    pub fn from_service_uuid(uuid: Uuid16) -> Option<Self> {
        match uuid {
            XIAOMI_SERVICE => Some(PeripheralKind::Xiaomi),
            NORDIC_UART_SERVICE => Some(PeripheralKind::NordicUart),
            _ => None,
        }
    }

    /// Returns the fixed handle table of this peripheral kind.
    pub fn handles(&self) -> ProfileHandles {
        match self {
            PeripheralKind::Xiaomi => ProfileHandles {
                service: Handle::from_raw(0x0020),
                tx_char: Handle::from_raw(0x0022),
                rx_char: Handle::from_raw(0x0024),
                cccd: Handle::from_raw(0x0025),
            },
            PeripheralKind::NordicUart | PeripheralKind::Custom => ProfileHandles {
                service: Handle::from_raw(0x000C),
                tx_char: Handle::from_raw(0x000E),
                rx_char: Handle::from_raw(0x0010),
                cccd: Handle::from_raw(0x0011),
            },
        }
    }

    /// Whether this peripheral demands an authentication exchange before accepting payload
    /// writes.
    ///
    /// The exchange itself is proprietary and lives behind
    /// [`Hooks::authenticate`](crate::central::Hooks::authenticate).
    pub fn requires_authentication(&self) -> bool {
        matches!(self, PeripheralKind::Xiaomi)
    }
}

/// Scans a `READ_BY_TYPE_RSP` data list for the first known service UUID.
///
/// `length` is the response's per-entry length field; entries are `handle | value`, and a
/// 16-bit-UUID service value makes for 4-byte entries. Entries of any other size cannot hold a
/// `Uuid16` and select nothing.
pub fn match_services(length: u8, data_list: &[u8]) -> Result<Option<PeripheralKind>, Error> {
    if length != 4 {
        return Ok(None);
    }
    let mut reader = ByteReader::new(data_list);
    while reader.bytes_left() >= 4 {
        let _handle = Handle::from_bytes(&mut reader)?;
        let uuid = Uuid16::from_bytes(&mut reader)?;
        if let Some(kind) = PeripheralKind::from_service_uuid(uuid) {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}

/// Iterator slicing a text payload into ATT-write-sized chunks.
///
/// Chunks are `mtu - 3` bytes: the Write Request header (opcode + handle) eats 3 bytes of the
/// MTU. The split is byte-oriented; UTF-8 sequences may straddle chunks and the receiving side
/// is expected to treat the stream as raw bytes.
pub struct TextChunks<'a> {
    bytes: &'a [u8],
    chunk: usize,
}

impl<'a> TextChunks<'a> {
    /// Cuts `text` into chunks fitting the given ATT MTU.
    pub fn new(text: &'a str, mtu: u16) -> Self {
        Self {
            bytes: text.as_bytes(),
            chunk: usize::from(mtu) - 3,
        }
    }
}

impl<'a> Iterator for TextChunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let len = self.bytes.len().min(self.chunk);
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Some(head)
    }
}
