//! Link Layer Control Protocol PDUs.
//!
//! LL Control PDUs travel inside data channel PDUs with `LLID = 0b11` and manage the connection
//! in-band. Only the opcodes a Central without encryption support has to handle are given
//! structured representations; everything else decodes to [`ControlPdu::Unknown`] and is answered
//! with `LL_UNKNOWN_RSP`.

use crate::link::features::FeatureSet;
use crate::{bytes::*, Error};

enum_with_unknown! {
    /// Enumeration of all known LL Control PDU opcodes (not all of which are supported).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum ControlOpcode(u8) {
        ConnectionUpdateReq = 0x00,
        ChannelMapReq = 0x01,
        TerminateInd = 0x02,
        EncReq = 0x03,
        EncRsp = 0x04,
        StartEncReq = 0x05,
        StartEncRsp = 0x06,
        UnknownRsp = 0x07,
        FeatureReq = 0x08,
        FeatureRsp = 0x09,
        PauseEncReq = 0x0A,
        PauseEncRsp = 0x0B,
        VersionInd = 0x0C,
        RejectInd = 0x0D,
        SlaveFeatureReq = 0x0E,
        ConnectionParamReq = 0x0F,
        ConnectionParamRsp = 0x10,
        RejectIndExt = 0x11,
        PingReq = 0x12,
        PingRsp = 0x13,
        LengthReq = 0x14,
        LengthRsp = 0x15,
    }
}

enum_with_unknown! {
    /// Enumeration of all possible `VersNr` values for `LL_VERSION_IND` PDUs.
    ///
    /// According to <https://www.bluetooth.com/specifications/assigned-numbers/link-layer>
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum VersionNumber(u8) {
        V4_0 = 6,
        V4_1 = 7,
        V4_2 = 8,
        V5_0 = 9,
        V5_1 = 10,
    }
}

/// Company identifier from the Bluetooth SIG assigned-numbers list, carried in `LL_VERSION_IND`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompanyId(u16);

impl CompanyId {
    /// Company id reserved for tests and prototypes.
    pub const TEST: Self = CompanyId(0xFFFF);

    /// Creates a `CompanyId` from its raw 16-bit value.
    pub fn from_raw(raw: u16) -> Self {
        CompanyId(raw)
    }

    /// Returns the raw 16-bit value.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// Structured representation of a supported LL Control PDU, including the opcode byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlPdu {
    /// `LL_TERMINATE_IND` - the peer (or we) tear the connection down.
    TerminateInd {
        /// Controller error code naming the disconnect reason.
        error_code: u8,
    },

    /// `LL_UNKNOWN_RSP` - answer to a control PDU with an unsupported opcode.
    UnknownRsp {
        /// The opcode that was not understood.
        unknown_type: ControlOpcode,
    },

    /// `LL_FEATURE_REQ` - master asks for the slave's feature set.
    FeatureReq {
        /// Feature set of the master.
        features_master: FeatureSet,
    },

    /// `LL_FEATURE_RSP` - feature sets usable on this connection.
    FeatureRsp {
        /// Features the master and slave both support.
        features_used: FeatureSet,
    },

    /// `LL_VERSION_IND` - Link-Layer version information exchange.
    VersionInd {
        vers_nr: VersionNumber,
        comp_id: CompanyId,
        sub_vers_nr: u16,
    },

    /// A control PDU with an opcode we have no structured representation for.
    ///
    /// The Link-Layer answers these with `LL_UNKNOWN_RSP`.
    Unknown {
        /// The opcode of the PDU.
        opcode: ControlOpcode,
    },
}

impl ControlPdu {
    /// Returns the opcode of this PDU.
    pub fn opcode(&self) -> ControlOpcode {
        match self {
            ControlPdu::TerminateInd { .. } => ControlOpcode::TerminateInd,
            ControlPdu::UnknownRsp { .. } => ControlOpcode::UnknownRsp,
            ControlPdu::FeatureReq { .. } => ControlOpcode::FeatureReq,
            ControlPdu::FeatureRsp { .. } => ControlOpcode::FeatureRsp,
            ControlPdu::VersionInd { .. } => ControlOpcode::VersionInd,
            ControlPdu::Unknown { opcode } => *opcode,
        }
    }
}

impl<'a> FromBytes<'a> for ControlPdu {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let opcode = ControlOpcode::from(bytes.read_u8()?);
        Ok(match opcode {
            ControlOpcode::TerminateInd => ControlPdu::TerminateInd {
                error_code: bytes.read_u8()?,
            },
            ControlOpcode::UnknownRsp => ControlPdu::UnknownRsp {
                unknown_type: ControlOpcode::from(bytes.read_u8()?),
            },
            ControlOpcode::FeatureReq => ControlPdu::FeatureReq {
                features_master: FeatureSet::from_bytes(bytes)?,
            },
            ControlOpcode::FeatureRsp => ControlPdu::FeatureRsp {
                features_used: FeatureSet::from_bytes(bytes)?,
            },
            ControlOpcode::VersionInd => ControlPdu::VersionInd {
                vers_nr: VersionNumber::from(bytes.read_u8()?),
                comp_id: CompanyId::from_raw(bytes.read_u16_le()?),
                sub_vers_nr: bytes.read_u16_le()?,
            },
            _ => {
                // The CtrData of unsupported PDUs is irrelevant, we only echo the opcode back.
                bytes.read_rest();
                ControlPdu::Unknown { opcode }
            }
        })
    }
}

impl ToBytes for ControlPdu {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.opcode().into())?;
        match self {
            ControlPdu::TerminateInd { error_code } => writer.write_u8(*error_code),
            ControlPdu::UnknownRsp { unknown_type } => writer.write_u8((*unknown_type).into()),
            ControlPdu::FeatureReq { features_master } => features_master.to_bytes(writer),
            ControlPdu::FeatureRsp { features_used } => features_used.to_bytes(writer),
            ControlPdu::VersionInd {
                vers_nr,
                comp_id,
                sub_vers_nr,
            } => {
                writer.write_u8((*vers_nr).into())?;
                writer.write_u16_le(comp_id.as_u16())?;
                writer.write_u16_le(*sub_vers_nr)
            }
            ControlPdu::Unknown { .. } => Ok(()),
        }
    }
}
