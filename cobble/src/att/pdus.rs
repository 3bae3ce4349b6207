//! Packets and types used in the ATT protocol.

use super::{Handle, HandleRange};
use crate::utils::HexSlice;
use crate::uuid::Uuid16;
use crate::{bytes::*, Error};

enum_with_unknown! {
    /// Error codes that an ATT server can attach to an `ERROR_RSP`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum ErrorCode(u8) {
        /// Attempted to use a `Handle` that isn't valid on this server.
        InvalidHandle = 0x01,
        /// Attribute isn't readable.
        ReadNotPermitted = 0x02,
        /// Attribute isn't writable.
        WriteNotPermitted = 0x03,
        /// Attribute PDU is invalid.
        InvalidPdu = 0x04,
        /// Authentication needed before attribute can be read/written.
        InsufficientAuthentication = 0x05,
        /// Server doesn't support this operation.
        RequestNotSupported = 0x06,
        /// Offset was past the end of the attribute.
        InvalidOffset = 0x07,
        /// Authorization needed before attribute can be read/written.
        InsufficientAuthorization = 0x08,
        /// Too many "prepare write" requests have been queued.
        PrepareQueueFull = 0x09,
        /// No attribute found within the specified attribute handle range.
        AttributeNotFound = 0x0A,
        /// Attribute can't be read/written using *Read Blob* requests.
        AttributeNotLong = 0x0B,
        /// The encryption key in use is too weak to access an attribute.
        InsufficientEncryptionKeySize = 0x0C,
        /// Attribute value has an incorrect length for the operation.
        InvalidAttributeValueLength = 0x0D,
        /// Request has encountered an "unlikely" error and could not be completed.
        UnlikelyError = 0x0E,
        /// Attribute cannot be read/written without an encrypted connection.
        InsufficientEncryption = 0x0F,
        /// Attribute type is an invalid grouping attribute according to a higher-layer spec.
        UnsupportedGroupType = 0x10,
        /// Server didn't have enough resources to complete a request.
        InsufficientResources = 0x11,
    }
}

enum_with_unknown! {
    /// Specifies an ATT operation to perform.
    ///
    /// The byte values assigned to opcodes are chosen so that the most significant 2 bits indicate
    /// additional information:
    ///
    /// ```notrust
    /// MSb                            LSb
    /// +-----------+---------+----------+
    /// | Signature | Command |  Method  |
    /// |   1 bit   |  1 bit  |  6 bits  |
    /// +-----------+---------+----------+
    /// ```
    ///
    /// * **`Signature`** is set to 1 to indicate that the PDU carries an Authentication Signature
    ///   (only the *Signed Write Command* does, which this client never sends).
    /// * **`Command`** is set to 1 when the PDU is a command: it is not followed by a server
    ///   response and unknown commands are silently ignored by servers.
    /// * **`Method`** defines which operation to perform.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum Opcode(u8) {
        ErrorRsp = 0x01,
        ExchangeMtuReq = 0x02,
        ExchangeMtuRsp = 0x03,
        ReadByTypeReq = 0x08,
        ReadByTypeRsp = 0x09,
        ReadReq = 0x0A,
        ReadRsp = 0x0B,
        ReadByGroupReq = 0x10,
        ReadByGroupRsp = 0x11,
        WriteReq = 0x12,
        WriteRsp = 0x13,
        WriteCommand = 0x52,
        HandleValueNotification = 0x1B,
        HandleValueIndication = 0x1D,
        HandleValueConfirmation = 0x1E,
    }
}

impl Opcode {
    /// Returns the raw byte corresponding to the opcode `self`.
    pub fn raw(&self) -> u8 {
        u8::from(*self)
    }

    /// Returns whether the `Command` bit in this opcode is set.
    ///
    /// Commands are not answered by the server, so they complete as soon as they are on air.
    pub fn is_command(&self) -> bool {
        self.raw() & 0x40 != 0
    }

    /// For a client-initiated request, returns the response opcode that completes it.
    ///
    /// Commands and server-initiated opcodes have no response and return `None`.
    pub fn response_opcode(&self) -> Option<Opcode> {
        Some(match self {
            Opcode::ExchangeMtuReq => Opcode::ExchangeMtuRsp,
            Opcode::ReadByTypeReq => Opcode::ReadByTypeRsp,
            Opcode::ReadReq => Opcode::ReadRsp,
            Opcode::ReadByGroupReq => Opcode::ReadByGroupRsp,
            Opcode::WriteReq => Opcode::WriteRsp,
            _ => return None,
        })
    }
}

/// Structured representation of an ATT PDU (the client-relevant subset).
#[derive(Debug, PartialEq, Eq)]
pub enum AttPdu<'a> {
    /// Request could not be completed due to an error.
    ErrorRsp {
        /// The opcode of the request that failed.
        req_opcode: Opcode,
        /// The attribute handle on which the operation failed.
        handle: Handle,
        /// An error code describing the kind of error that occurred.
        error_code: ErrorCode,
    },
    ExchangeMtuReq {
        mtu: u16,
    },
    ExchangeMtuRsp {
        mtu: u16,
    },
    /// Reads attributes of a given type inside a handle range (used here with the *Primary
    /// Service* type for the profile-detection fallback).
    ReadByTypeReq {
        handle_range: HandleRange,
        attribute_type: Uuid16,
    },
    ReadByTypeRsp {
        /// The length of each attribute handle-value pair in the list.
        length: u8,
        data_list: HexSlice<&'a [u8]>,
    },
    ReadReq {
        handle: Handle,
    },
    ReadRsp {
        value: HexSlice<&'a [u8]>,
    },
    ReadByGroupReq {
        handle_range: HandleRange,
        group_type: Uuid16,
    },
    ReadByGroupRsp {
        length: u8,
        data_list: HexSlice<&'a [u8]>,
    },
    WriteReq {
        handle: Handle,
        value: HexSlice<&'a [u8]>,
    },
    WriteRsp,
    WriteCommand {
        handle: Handle,
        value: HexSlice<&'a [u8]>,
    },
    /// Attribute value change notification sent from server to client. Not acknowledged.
    HandleValueNotification {
        handle: Handle,
        value: HexSlice<&'a [u8]>,
    },
    /// Attribute value change indication sent by the server, acknowledged by the client with a
    /// `HandleValueConfirmation`.
    HandleValueIndication {
        handle: Handle,
        value: HexSlice<&'a [u8]>,
    },
    /// Confirmation returned by the client in response to a `HandleValueIndication`.
    HandleValueConfirmation,
    /// A PDU whose opcode this client does not know.
    Unknown {
        opcode: Opcode,
        params: HexSlice<&'a [u8]>,
    },
}

impl<'a> FromBytes<'a> for AttPdu<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let opcode = Opcode::from(bytes.read_u8()?);
        Ok(match opcode {
            Opcode::ErrorRsp => AttPdu::ErrorRsp {
                req_opcode: Opcode::from(bytes.read_u8()?),
                handle: Handle::from_bytes(bytes)?,
                error_code: ErrorCode::from(bytes.read_u8()?),
            },
            Opcode::ExchangeMtuReq => AttPdu::ExchangeMtuReq {
                mtu: bytes.read_u16_le()?,
            },
            Opcode::ExchangeMtuRsp => AttPdu::ExchangeMtuRsp {
                mtu: bytes.read_u16_le()?,
            },
            Opcode::ReadByTypeReq => AttPdu::ReadByTypeReq {
                handle_range: HandleRange::from_bytes(bytes)?,
                attribute_type: Uuid16::from_bytes(bytes)?,
            },
            Opcode::ReadByTypeRsp => AttPdu::ReadByTypeRsp {
                length: bytes.read_u8()?,
                data_list: HexSlice(bytes.read_rest()),
            },
            Opcode::ReadReq => AttPdu::ReadReq {
                handle: Handle::from_bytes(bytes)?,
            },
            Opcode::ReadRsp => AttPdu::ReadRsp {
                value: HexSlice(bytes.read_rest()),
            },
            Opcode::ReadByGroupReq => AttPdu::ReadByGroupReq {
                handle_range: HandleRange::from_bytes(bytes)?,
                group_type: Uuid16::from_bytes(bytes)?,
            },
            Opcode::ReadByGroupRsp => AttPdu::ReadByGroupRsp {
                length: bytes.read_u8()?,
                data_list: HexSlice(bytes.read_rest()),
            },
            Opcode::WriteReq => AttPdu::WriteReq {
                handle: Handle::from_bytes(bytes)?,
                value: HexSlice(bytes.read_rest()),
            },
            Opcode::WriteRsp => AttPdu::WriteRsp,
            Opcode::WriteCommand => AttPdu::WriteCommand {
                handle: Handle::from_bytes(bytes)?,
                value: HexSlice(bytes.read_rest()),
            },
            Opcode::HandleValueNotification => AttPdu::HandleValueNotification {
                handle: Handle::from_bytes(bytes)?,
                value: HexSlice(bytes.read_rest()),
            },
            Opcode::HandleValueIndication => AttPdu::HandleValueIndication {
                handle: Handle::from_bytes(bytes)?,
                value: HexSlice(bytes.read_rest()),
            },
            Opcode::HandleValueConfirmation => AttPdu::HandleValueConfirmation,
            Opcode::Unknown(_) => AttPdu::Unknown {
                opcode,
                params: HexSlice(bytes.read_rest()),
            },
        })
    }
}

impl<'a> ToBytes for AttPdu<'a> {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.opcode().into())?;

        match *self {
            AttPdu::ErrorRsp {
                req_opcode,
                handle,
                error_code,
            } => {
                writer.write_u8(req_opcode.into())?;
                handle.to_bytes(writer)?;
                writer.write_u8(error_code.into())?;
            }
            AttPdu::ExchangeMtuReq { mtu } | AttPdu::ExchangeMtuRsp { mtu } => {
                writer.write_u16_le(mtu)?;
            }
            AttPdu::ReadByTypeReq {
                handle_range,
                attribute_type,
            } => {
                handle_range.to_bytes(writer)?;
                attribute_type.to_bytes(writer)?;
            }
            AttPdu::ReadByTypeRsp { length, data_list }
            | AttPdu::ReadByGroupRsp { length, data_list } => {
                writer.write_u8(length)?;
                writer.write_slice(data_list.as_ref())?;
            }
            AttPdu::ReadReq { handle } => {
                handle.to_bytes(writer)?;
            }
            AttPdu::ReadRsp { value } => {
                writer.write_slice(value.as_ref())?;
            }
            AttPdu::ReadByGroupReq {
                handle_range,
                group_type,
            } => {
                handle_range.to_bytes(writer)?;
                group_type.to_bytes(writer)?;
            }
            AttPdu::WriteReq { handle, value } | AttPdu::WriteCommand { handle, value } => {
                handle.to_bytes(writer)?;
                writer.write_slice(value.as_ref())?;
            }
            AttPdu::WriteRsp => {}
            AttPdu::HandleValueNotification { handle, value }
            | AttPdu::HandleValueIndication { handle, value } => {
                handle.to_bytes(writer)?;
                writer.write_slice(value.as_ref())?;
            }
            AttPdu::HandleValueConfirmation => {}
            AttPdu::Unknown { opcode: _, params } => {
                writer.write_slice(params.as_ref())?;
            }
        }

        Ok(())
    }
}

impl AttPdu<'_> {
    /// Returns the opcode identifying this PDU on the wire.
    pub fn opcode(&self) -> Opcode {
        match self {
            AttPdu::ErrorRsp { .. } => Opcode::ErrorRsp,
            AttPdu::ExchangeMtuReq { .. } => Opcode::ExchangeMtuReq,
            AttPdu::ExchangeMtuRsp { .. } => Opcode::ExchangeMtuRsp,
            AttPdu::ReadByTypeReq { .. } => Opcode::ReadByTypeReq,
            AttPdu::ReadByTypeRsp { .. } => Opcode::ReadByTypeRsp,
            AttPdu::ReadReq { .. } => Opcode::ReadReq,
            AttPdu::ReadRsp { .. } => Opcode::ReadRsp,
            AttPdu::ReadByGroupReq { .. } => Opcode::ReadByGroupReq,
            AttPdu::ReadByGroupRsp { .. } => Opcode::ReadByGroupRsp,
            AttPdu::WriteReq { .. } => Opcode::WriteReq,
            AttPdu::WriteRsp => Opcode::WriteRsp,
            AttPdu::WriteCommand { .. } => Opcode::WriteCommand,
            AttPdu::HandleValueNotification { .. } => Opcode::HandleValueNotification,
            AttPdu::HandleValueIndication { .. } => Opcode::HandleValueIndication,
            AttPdu::HandleValueConfirmation => Opcode::HandleValueConfirmation,
            AttPdu::Unknown { opcode, .. } => *opcode,
        }
    }
}
