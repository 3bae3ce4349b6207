//! Advertising channel operations.
//!
//! This module defines the PDU header and types used on the three advertising channels, and the
//! `CONNECT_REQ` PDU a Central transmits to turn an advertisement into a connection. A scanner
//! only needs the header and the advertiser address in the first 6 payload bytes, so full
//! AD-structure parsing is intentionally absent.

use crate::link::channel_map::ChannelMap;
use crate::link::{AddressKind, DeviceAddress};
use crate::time::Duration;
use crate::{bytes::*, Error};
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

/// The Access Address to use for all advertising channel packets.
pub const ACCESS_ADDRESS: u32 = 0x8E89_BED6;

/// CRC initialization value for advertising channel packets.
pub const CRC_PRESET: u32 = 0x0055_5555;

/// Number of bytes in a `CONNECT_REQ` PDU payload: `InitA`, `AdvA` and the 22-byte `LLData`.
pub const CONNECT_REQ_PDU_SIZE: u8 = 6 + 6 + 22;

/// 16-bit advertising channel PDU header preceding the payload.
///
/// ```notrust
/// LSB                                                                     MSB
/// +------------+------------+---------+---------+--------------+------------+
/// |  PDU Type  |    RFU     |  TxAdd  |  RxAdd  |    Length    |    RFU     |
/// |  (4 bits)  |  (2 bits)  | (1 bit) | (1 bit) |   (6 bits)   |  (2 bits)  |
/// +------------+------------+---------+---------+--------------+------------+
/// ```
///
/// The `TxAdd` and `RxAdd` fields are only defined for some PDU types; for all others they must
/// be 0. Length may be in range 6 to 37 (inclusive).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header(u16);

const TXADD_MASK: u16 = 0b00000000_01000000;
const RXADD_MASK: u16 = 0b00000000_10000000;

impl Header {
    /// Creates a new advertising channel PDU header specifying the payload type `ty`.
    pub fn new(ty: PduType) -> Self {
        Header(u16::from(u8::from(ty)))
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
    /// The returned `u16` must be transmitted LSb first as the first 2 octets of the PDU.
    pub fn to_u16(&self) -> u16 {
        self.0
    }

    /// Returns the PDU type specified in the header.
    pub fn type_(&self) -> PduType {
        PduType::from((self.0 & 0b1111) as u8)
    }

    /// Returns the state of the `TxAdd` field.
    ///
    /// When set, the transmitting device uses a random address.
    pub fn tx_add(&self) -> bool {
        self.0 & TXADD_MASK != 0
    }

    /// Sets the `TxAdd` field's value.
    pub fn set_tx_add(&mut self, value: bool) {
        if value {
            self.0 |= TXADD_MASK;
        } else {
            self.0 &= !TXADD_MASK;
        }
    }

    /// Returns the state of the `RxAdd` field.
    pub fn rx_add(&self) -> bool {
        self.0 & RXADD_MASK != 0
    }

    /// Sets the `RxAdd` field's value.
    pub fn set_rx_add(&mut self, value: bool) {
        if value {
            self.0 |= RXADD_MASK;
        } else {
            self.0 &= !RXADD_MASK;
        }
    }

    /// Returns the length of the payload in octets as specified in the `Length` field.
    pub fn payload_length(&self) -> u8 {
        ((self.0 & 0b00111111_00000000) >> 8) as u8
    }

    /// Sets the payload length of this PDU.
    ///
    /// # Panics
    ///
    /// Panics unless `length` is in range 6..=37.
    pub fn set_payload_length(&mut self, length: u8) {
        assert!(6 <= length && length <= 37);
        self.0 = (self.0 & !0b00111111_00000000) | (u16::from(length) << 8);
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("PDU Type", &self.type_())
            .field("TxAdd", &self.tx_add())
            .field("RxAdd", &self.rx_add())
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

enum_with_unknown! {
    /// 4-bit PDU type in the advertising channel header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum PduType(u8) {
        /// Connectable undirected advertising event.
        AdvInd = 0b0000,
        /// Connectable directed advertising event.
        AdvDirectInd = 0b0001,
        /// Non-connectable undirected advertising event.
        AdvNonconnInd = 0b0010,
        ScanReq = 0b0011,
        ScanRsp = 0b0100,
        ConnectReq = 0b0101,
        /// Scannable undirected advertising event.
        AdvScanInd = 0b0110,
    }
}

impl PduType {
    /// Returns whether a Central may answer this PDU type with a `CONNECT_REQ`.
    pub fn is_connectable(&self) -> bool {
        matches!(
            self,
            PduType::AdvInd | PduType::AdvDirectInd | PduType::AdvScanInd
        )
    }
}

/// Extracts the advertiser address from the payload of an `ADV_*` PDU.
///
/// For every advertising event type the advertiser's address occupies the first 6 payload bytes;
/// the address kind is carried in the header's `TxAdd` bit.
pub fn advertiser_address(header: Header, payload: &[u8]) -> Result<DeviceAddress, Error> {
    let mut bytes = ByteReader::new(payload);
    let raw: [u8; 6] = bytes.read_array()?;
    let kind = if header.tx_add() {
        AddressKind::Random
    } else {
        AddressKind::Public
    };
    Ok(DeviceAddress::new(raw, kind))
}

/// The `CONNECT_REQ` PDU payload: initiator and advertiser addresses followed by the 22-byte
/// `LLData` block that seeds the entire connection state.
///
/// ```notrust
/// +-------+-------+----+---------+---------+-----------+----------+---------+---------+-----+-----+-----+
/// | InitA | AdvA  | AA | CRCInit | WinSize | WinOffset | Interval | Latency | Timeout | ChM | Hop | SCA |
/// | (6 B) | (6 B) | 4B |   3 B   |   1 B   |    2 B    |   2 B    |   2 B   |   2 B   | 5 B | 5bit| 3bit|
/// +-------+-------+----+---------+---------+-----------+----------+---------+---------+-----+-----+-----+
/// ```
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub init_addr: DeviceAddress,
    pub adv_addr: DeviceAddress,
    /// Freshly generated Access Address of the new connection.
    pub access_address: u32,
    /// 24-bit CRC initialization value for the data channels.
    pub crc_init: u32,
    /// Transmit window size in 1.25 ms units (`transmitWindowSize`).
    pub win_size: u8,
    /// Transmit window offset in 1.25 ms units (`transmitWindowOffset`).
    pub win_offset: u16,
    /// Connection interval in 1.25 ms units (`connInterval`).
    pub interval: u16,
    /// Slave latency in connection events (`connSlaveLatency`).
    pub latency: u16,
    /// Supervision timeout in 10 ms units (`connSupervisionTimeout`).
    pub timeout: u16,
    /// Set of data channels to hop over.
    pub channel_map: ChannelMap,
    /// Channel hop increment, 5..=16.
    pub hop: u8,
    /// Master's sleep clock accuracy category (0 = 251-500 ppm ... 7 = 0-20 ppm).
    pub sca: u8,
}

impl ConnectRequest {
    /// Returns the transmit window size as a duration.
    pub fn win_size(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_size) * 1_250)
    }

    /// Returns the transmit window offset as a duration.
    pub fn win_offset(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_offset) * 1_250)
    }

    /// Returns the duration between two connection events.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(u32::from(self.interval) * 1_250)
    }

    /// Returns the connection supervision timeout.
    pub fn supervision_timeout(&self) -> Duration {
        Duration::from_micros(u32::from(self.timeout) * 10_000)
    }

    /// Returns the header to transmit this PDU with.
    pub fn header(&self) -> Header {
        let mut header = Header::new(PduType::ConnectReq);
        header.set_payload_length(CONNECT_REQ_PDU_SIZE);
        header.set_tx_add(self.init_addr.is_random());
        header.set_rx_add(self.adv_addr.is_random());
        header
    }
}

impl<'a> FromBytes<'a> for ConnectRequest {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        // The address kinds live in the header's TxAdd/RxAdd bits, which the caller has to patch
        // in afterwards; the payload alone decodes them as public.
        let init_addr = DeviceAddress::new(bytes.read_array()?, AddressKind::Public);
        let adv_addr = DeviceAddress::new(bytes.read_array()?, AddressKind::Public);
        let access_address = bytes.read_u32_le()?;
        let crc_init = bytes.read_u24_le()?;
        let win_size = bytes.read_u8()?;
        let win_offset = bytes.read_u16_le()?;
        let interval = bytes.read_u16_le()?;
        let latency = bytes.read_u16_le()?;
        let timeout = bytes.read_u16_le()?;
        let channel_map = ChannelMap::from_raw(bytes.read_array()?);
        let hop_sca = bytes.read_u8()?;

        Ok(Self {
            init_addr,
            adv_addr,
            access_address,
            crc_init,
            win_size,
            win_offset,
            interval,
            latency,
            timeout,
            channel_map,
            hop: hop_sca & 0b11111,
            sca: hop_sca >> 5,
        })
    }
}

impl ToBytes for ConnectRequest {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_slice(self.init_addr.raw())?;
        writer.write_slice(self.adv_addr.raw())?;
        writer.write_u32_le(self.access_address)?;
        writer.write_u24_le(self.crc_init)?;
        writer.write_u8(self.win_size)?;
        writer.write_u16_le(self.win_offset)?;
        writer.write_u16_le(self.interval)?;
        writer.write_u16_le(self.latency)?;
        writer.write_u16_le(self.timeout)?;
        writer.write_slice(&self.channel_map.to_raw())?;
        writer.write_u8((self.sca << 5) | (self.hop & 0b11111))
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("init_addr", &self.init_addr)
            .field("adv_addr", &self.adv_addr)
            .field("access_address", &format_args!("{:#010x}", self.access_address))
            .field("crc_init", &format_args!("{:#08x}", self.crc_init))
            .field("interval", &self.interval())
            .field("timeout", &self.supervision_timeout())
            .field("hop", &self.hop)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bits() {
        let mut header = Header::new(PduType::ConnectReq);
        header.set_payload_length(34);
        header.set_tx_add(true);
        assert_eq!(header.to_u16().to_le_bytes(), [0b0100_0101, 34]);
        assert_eq!(header.type_(), PduType::ConnectReq);
        assert!(header.tx_add());
        assert!(!header.rx_add());
        assert_eq!(header.payload_length(), 34);
    }

    #[test]
    fn connectable_types() {
        assert!(PduType::AdvInd.is_connectable());
        assert!(PduType::AdvDirectInd.is_connectable());
        assert!(PduType::AdvScanInd.is_connectable());
        assert!(!PduType::AdvNonconnInd.is_connectable());
        assert!(!PduType::ScanRsp.is_connectable());
    }

    #[test]
    fn connect_req_round_trip() {
        let req = ConnectRequest {
            init_addr: DeviceAddress::new([1, 2, 3, 4, 5, 0xC6], AddressKind::Public),
            adv_addr: DeviceAddress::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11], AddressKind::Public),
            access_address: 0xAF9A_1234,
            crc_init: 0x00ABCDEF,
            win_size: 2,
            win_offset: 1,
            interval: 40,
            latency: 0,
            timeout: 200,
            channel_map: ChannelMap::with_all_channels(),
            hop: 9,
            sca: 0,
        };

        let mut buf = [0; CONNECT_REQ_PDU_SIZE as usize];
        let mut writer = ByteWriter::new(&mut buf);
        req.to_bytes(&mut writer).unwrap();
        assert_eq!(writer.space_left(), 0);

        let mut reader = ByteReader::new(&buf);
        let decoded = ConnectRequest::from_bytes(&mut reader).unwrap();
        assert!(reader.is_empty());
        assert_eq!(decoded, req);
    }

    #[test]
    fn connect_req_wire_layout() {
        let req = ConnectRequest {
            init_addr: DeviceAddress::new([0xA0; 6], AddressKind::Random),
            adv_addr: DeviceAddress::new([0xB0; 6], AddressKind::Public),
            access_address: 0x5050_AA3C,
            crc_init: 0x123456,
            win_size: 1,
            win_offset: 0,
            interval: 6,
            latency: 0,
            timeout: 100,
            channel_map: ChannelMap::from_raw([0xFF, 0, 0, 0, 0]),
            hop: 16,
            sca: 0,
        };

        let mut buf = [0; 34];
        req.to_bytes(&mut ByteWriter::new(&mut buf)).unwrap();

        assert_eq!(&buf[0..6], &[0xA0; 6]);
        assert_eq!(&buf[6..12], &[0xB0; 6]);
        assert_eq!(&buf[12..16], &[0x3C, 0xAA, 0x50, 0x50]); // AA, little-endian
        assert_eq!(&buf[16..19], &[0x56, 0x34, 0x12]); // CRCInit, little-endian
        assert_eq!(buf[19], 1); // WinSize
        assert_eq!(&buf[20..22], &[0, 0]); // WinOffset
        assert_eq!(&buf[22..24], &[6, 0]); // Interval
        assert_eq!(&buf[24..26], &[0, 0]); // Latency
        assert_eq!(&buf[26..28], &[100, 0]); // Timeout
        assert_eq!(&buf[28..33], &[0xFF, 0, 0, 0, 0]); // ChM
        assert_eq!(buf[33], 16); // SCA=0 | Hop=16

        let header = req.header();
        assert_eq!(header.type_(), PduType::ConnectReq);
        assert!(header.tx_add());
        assert!(!header.rx_add());
        assert_eq!(header.payload_length(), 34);
    }

    #[test]
    fn unit_conversions() {
        let req = ConnectRequest {
            init_addr: DeviceAddress::new([0; 6], AddressKind::Public),
            adv_addr: DeviceAddress::new([0; 6], AddressKind::Public),
            access_address: 0,
            crc_init: 0,
            win_size: 2,
            win_offset: 4,
            interval: 40,
            latency: 0,
            timeout: 200,
            channel_map: ChannelMap::with_all_channels(),
            hop: 5,
            sca: 0,
        };
        assert_eq!(req.win_size(), Duration::from_micros(2_500));
        assert_eq!(req.win_offset(), Duration::from_millis(5));
        assert_eq!(req.interval(), Duration::from_millis(50));
        assert_eq!(req.supervision_timeout(), Duration::from_secs(2));
    }
}
