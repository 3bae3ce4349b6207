use crate::{bytes::*, Error};
use bitflags::bitflags;

bitflags! {
    /// A set of optional Link Layer features, exchanged via `LL_FEATURE_REQ`/`LL_FEATURE_RSP`.
    pub struct FeatureSet: u64 {
        /// Low-Energy data encryption (requires the encryption LLCPDUs and procedures).
        const LE_ENCRYPTION = 1 << 0;

        /// Connection parameters request procedure.
        const CONN_PARAM_REQ = 1 << 1;

        /// Support for the `LL_REJECT_IND_EXT` control PDU.
        const EXTENDED_REJECT_INDICATION = 1 << 2;

        /// Slave-initiated feature exchange.
        const SLAVE_FEATURE_EXCHANGE = 1 << 3;

        /// Low-Energy Link-Layer ping exchange.
        const LE_PING = 1 << 4;

        /// Data channel PDUs with more than 31 Bytes (Data Length Update procedure).
        const LE_PACKET_LENGTH_EXTENSION = 1 << 5;
    }
}

impl FeatureSet {
    /// Returns the feature set supported by this stack.
    ///
    /// None of the optional procedures are implemented, so the advertised bitmap is empty.
    pub fn supported() -> Self {
        FeatureSet::empty()
    }
}

impl ToBytes for FeatureSet {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u64_le(self.bits())
    }
}

impl<'a> FromBytes<'a> for FeatureSet {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let raw = bytes.read_u64_le()?;
        Ok(Self::from_bits_truncate(raw))
    }
}
