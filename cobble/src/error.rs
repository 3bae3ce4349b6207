use crate::att::ErrorCode;
use crate::radio::RadioError;
use core::fmt;

/// Errors returned by the BLE stack.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Packet specified an invalid length value or was too short.
    ///
    /// This indicates a protocol violation, so the connection should be
    /// considered lost (if one is currently established).
    InvalidLength,

    /// Invalid value supplied for field.
    InvalidValue,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when the application tries to fit too much data into
    /// a PDU or other fixed-size buffer, and also when reaching EOF
    /// prematurely while reading data from a buffer.
    Eof,

    /// Parsing didn't consume the entire buffer.
    IncompleteParse,

    /// Invalid argument at an API boundary (out of range, empty, wrong role).
    ///
    /// The caller's fault; retrying with the same arguments will fail again.
    Param,

    /// The addressed resource is already engaged (scan while scanning, a
    /// second ATT request while one is outstanding). The caller may retry
    /// once the resource is free.
    Busy,

    /// A deadline was exceeded (radio busy wait, RX window, ATT response).
    Timeout,

    /// The operation requires a live connection.
    NotConnected,

    /// The remote peer answered a request with an ATT `ERROR_RSP`, or sent a
    /// response that violates the protocol. Carries the remote error code.
    Protocol(ErrorCode),

    /// HAL-level radio failure, lifted into the stack at the Link-Layer
    /// boundary. Fatal for the current connection event only.
    Radio(RadioError),
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Error::Radio(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLength => f.write_str("invalid length value specified"),
            Error::InvalidValue => f.write_str("invalid value for field"),
            Error::Eof => f.write_str("end of buffer"),
            Error::IncompleteParse => f.write_str("excess data in buffer"),
            Error::Param => f.write_str("invalid parameter"),
            Error::Busy => f.write_str("resource busy"),
            Error::Timeout => f.write_str("deadline exceeded"),
            Error::NotConnected => f.write_str("no live connection"),
            Error::Protocol(code) => write!(f, "protocol error ({:?})", code),
            Error::Radio(e) => write!(f, "radio error ({:?})", e),
        }
    }
}
