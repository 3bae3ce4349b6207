//! Implementation of the Attribute Protocol (ATT), client side.
//!
//! ATT always runs over L2CAP channel `0x0004`, which is connected by default as soon as the
//! Link-Layer connection is established. GATT, the *Generic Attribute Profile*, is a set of
//! conventions layered on top; see the [`gatt`](crate::gatt) module.
//!
//! The client issues requests (reads, writes, the MTU exchange) and consumes server-initiated
//! notifications and indications. ATT allows **one outstanding request at a time**: a second
//! request is rejected with `Error::Busy` until the first one completes, times out, or dies with
//! the connection. The [`Client`] here is a pure state machine; moving bytes between it and the
//! Link-Layer is the host's job (see [`Central`](crate::central::Central)).

mod handle;
mod pdus;

pub use self::handle::{Handle, HandleRange};
pub use self::pdus::{AttPdu, ErrorCode, Opcode};

use crate::bytes::*;
use crate::time::{Duration, Instant};
use crate::Error;
use heapless::Vec;

/// The ATT MTU every implementation must support, and the value in force until an MTU exchange
/// completes.
pub const MTU_MIN: u16 = 23;

/// Largest ATT MTU this client can be talked up to.
pub const MTU_MAX: u16 = 247;

/// How long the client waits for the response to a request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// A server-initiated value push handed to the host for delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum Served<'a> {
    /// The response to the outstanding request arrived; fetch it with
    /// [`Client::take_response`].
    ResponseReady,

    /// `HANDLE_VALUE_NTF`: deliver to the application, nothing else to do.
    Notification { handle: Handle, value: &'a [u8] },

    /// `HANDLE_VALUE_IND`: deliver to the application *and* send a `HANDLE_VALUE_CFM` back.
    Indication { handle: Handle, value: &'a [u8] },

    /// The PDU required no action (stray response, unknown opcode).
    Ignored,
}

struct PendingRequest {
    request: Opcode,
    expected: Opcode,
    issued: Instant,
}

/// ATT client state machine: one outstanding request, the negotiated MTU, and the most recent
/// response.
pub struct Client {
    mtu: u16,
    /// Client RX MTU announced in the last `EXCHANGE_MTU_REQ`.
    requested_mtu: u16,
    pending: Option<PendingRequest>,
    response: Vec<u8, { MTU_MAX as usize }>,
    response_ready: bool,
}

impl Client {
    /// Creates a client with the protocol-default MTU of 23.
    pub fn new() -> Self {
        Self {
            mtu: MTU_MIN,
            requested_mtu: MTU_MIN,
            pending: None,
            response: Vec::new(),
            response_ready: false,
        }
    }

    /// Returns the MTU in force.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Largest attribute value a single Write Request can carry: opcode + handle eat 3 bytes.
    pub fn payload_limit(&self) -> usize {
        usize::from(self.mtu) - 3
    }

    /// Returns whether a request is outstanding.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Encodes `pdu` into `buf` and, for requests, marks it outstanding.
    ///
    /// Commands and the indication confirmation are fire-and-forget: they encode without
    /// claiming the request slot. A second request while one is outstanding is rejected with
    /// `Error::Busy`.
    pub fn encode_outgoing(
        &mut self,
        pdu: &AttPdu<'_>,
        now: Instant,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let opcode = pdu.opcode();
        let expected = opcode.response_opcode();

        if expected.is_some() {
            if self.pending.is_some() {
                return Err(Error::Busy);
            }
        }

        let mut writer = ByteWriter::new(buf);
        let space = writer.space_left();
        pdu.to_bytes(&mut writer)?;
        let used = space - writer.space_left();
        if used > usize::from(self.mtu) {
            return Err(Error::Param);
        }

        if let AttPdu::ExchangeMtuReq { mtu } = pdu {
            if *mtu < MTU_MIN {
                return Err(Error::Param);
            }
            self.requested_mtu = (*mtu).min(MTU_MAX);
        }

        if let Some(expected) = expected {
            self.pending = Some(PendingRequest {
                request: opcode,
                expected,
                issued: now,
            });
            self.response_ready = false;
            self.response.clear();
        }

        Ok(used)
    }

    /// Digests one incoming ATT PDU.
    ///
    /// Responses complete the outstanding request; an `ERROR_RSP` naming the outstanding request
    /// fails it with `Error::Protocol`. Notifications and indications are returned for delivery
    /// regardless of the request state.
    pub fn process<'a>(&mut self, pdu_bytes: &'a [u8]) -> Result<Served<'a>, Error> {
        let pdu = AttPdu::from_bytes(&mut ByteReader::new(pdu_bytes))?;

        match pdu {
            AttPdu::HandleValueNotification { handle, value } => {
                return Ok(Served::Notification {
                    handle,
                    value: value.0,
                });
            }
            AttPdu::HandleValueIndication { handle, value } => {
                return Ok(Served::Indication {
                    handle,
                    value: value.0,
                });
            }
            _ => {}
        }

        let opcode = pdu.opcode();
        let pending = match &self.pending {
            Some(p) => p,
            None => {
                warn!("unsolicited {:?}, ignoring", opcode);
                return Ok(Served::Ignored);
            }
        };

        if let AttPdu::ErrorRsp {
            req_opcode,
            handle,
            error_code,
        } = pdu
        {
            if req_opcode == pending.request {
                debug!("request {:?} failed on {:?}: {:?}", req_opcode, handle, error_code);
                self.pending = None;
                return Err(Error::Protocol(error_code));
            }
            warn!("ERROR_RSP for {:?}, which is not outstanding", req_opcode);
            return Ok(Served::Ignored);
        }

        if opcode != pending.expected {
            warn!(
                "expected {:?}, got {:?}; dropping",
                pending.expected, opcode
            );
            return Ok(Served::Ignored);
        }

        if let AttPdu::ExchangeMtuRsp { mtu } = pdu {
            self.mtu = self.requested_mtu.min(mtu).max(MTU_MIN).min(MTU_MAX);
            debug!("MTU negotiated: {}", self.mtu);
        }

        self.response.clear();
        self.response
            .extend_from_slice(pdu_bytes)
            .map_err(|()| Error::InvalidLength)?;
        self.response_ready = true;
        self.pending = None;
        Ok(Served::ResponseReady)
    }

    /// Hands out the raw response PDU that completed the last request, once.
    pub fn take_response(&mut self) -> Option<Vec<u8, { MTU_MAX as usize }>> {
        if self.response_ready {
            self.response_ready = false;
            Some(core::mem::replace(&mut self.response, Vec::new()))
        } else {
            None
        }
    }

    /// Fails the outstanding request with `Error::Timeout` once its deadline passes.
    pub fn poll_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if let Some(pending) = &self.pending {
            if now.duration_since(pending.issued) > REQUEST_TIMEOUT {
                debug!("request {:?} timed out", pending.request);
                self.pending = None;
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Tears down all request state. Called when the connection goes away; the host reports the
    /// aborted request as disconnected.
    pub fn reset(&mut self) {
        self.pending = None;
        self.response_ready = false;
        self.response.clear();
        self.mtu = MTU_MIN;
        self.requested_mtu = MTU_MIN;
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now(micros: u64) -> Instant {
        Instant::from_raw_micros(micros)
    }

    fn encode(client: &mut Client, pdu: &AttPdu<'_>, at: Instant) -> Result<usize, Error> {
        let mut buf = [0; MTU_MAX as usize];
        client.encode_outgoing(pdu, at, &mut buf)
    }

    #[test]
    fn one_outstanding_request() {
        let mut client = Client::new();
        let read = AttPdu::ReadReq {
            handle: Handle::from_raw(0x0003),
        };
        encode(&mut client, &read, now(0)).unwrap();
        assert!(client.has_pending());
        assert_eq!(encode(&mut client, &read, now(10)).unwrap_err(), Error::Busy);

        // Commands bypass the request slot.
        let cmd = AttPdu::WriteCommand {
            handle: Handle::from_raw(0x000E),
            value: crate::utils::HexSlice(&[1]),
        };
        encode(&mut client, &cmd, now(20)).unwrap();
    }

    #[test]
    fn response_completes_request() {
        let mut client = Client::new();
        encode(
            &mut client,
            &AttPdu::ReadReq {
                handle: Handle::from_raw(0x0003),
            },
            now(0),
        )
        .unwrap();

        let served = client.process(&[0x0B, b'M', b'i']).unwrap();
        assert_eq!(served, Served::ResponseReady);
        assert!(!client.has_pending());
        assert_eq!(&client.take_response().unwrap()[..], &[0x0B, b'M', b'i']);
        assert!(client.take_response().is_none());
    }

    #[test]
    fn error_rsp_fails_request_with_remote_code() {
        let mut client = Client::new();
        encode(
            &mut client,
            &AttPdu::ReadReq {
                handle: Handle::from_raw(0x0003),
            },
            now(0),
        )
        .unwrap();

        // ERROR_RSP { req = ReadReq, handle 0x0003, ReadNotPermitted }
        let err = client.process(&[0x01, 0x0A, 0x03, 0x00, 0x02]).unwrap_err();
        assert_eq!(err, Error::Protocol(ErrorCode::ReadNotPermitted));
        assert!(!client.has_pending());
    }

    #[test]
    fn mtu_negotiation_clamps() {
        let mut client = Client::new();
        encode(&mut client, &AttPdu::ExchangeMtuReq { mtu: 185 }, now(0)).unwrap();
        client.process(&[0x03, 0xF7, 0x00]).unwrap(); // server offers 247
        assert_eq!(client.mtu(), 185); // min(requested, offered)

        encode(&mut client, &AttPdu::ExchangeMtuReq { mtu: 500 }, now(0)).unwrap();
        client.process(&[0x03, 0xFF, 0xFF]).unwrap(); // server offers 65535
        assert_eq!(client.mtu(), MTU_MAX);

        encode(&mut client, &AttPdu::ExchangeMtuReq { mtu: 23 }, now(0)).unwrap();
        client.process(&[0x03, 0x05, 0x00]).unwrap(); // server offers a bogus 5
        assert_eq!(client.mtu(), MTU_MIN);

        assert_eq!(
            encode(&mut client, &AttPdu::ExchangeMtuReq { mtu: 10 }, now(0)).unwrap_err(),
            Error::Param
        );
    }

    #[test]
    fn notifications_pass_through_without_request() {
        let mut client = Client::new();
        let served = client.process(&[0x1B, 0x10, 0x00, 0xAB]).unwrap();
        assert_eq!(
            served,
            Served::Notification {
                handle: Handle::from_raw(0x0010),
                value: &[0xAB],
            }
        );

        let served = client.process(&[0x1D, 0x10, 0x00, 0xCD]).unwrap();
        assert_eq!(
            served,
            Served::Indication {
                handle: Handle::from_raw(0x0010),
                value: &[0xCD],
            }
        );
    }

    #[test]
    fn request_times_out() {
        let mut client = Client::new();
        encode(
            &mut client,
            &AttPdu::ReadReq {
                handle: Handle::from_raw(0x0003),
            },
            now(0),
        )
        .unwrap();

        client.poll_timeout(now(900_000)).unwrap();
        assert!(client.has_pending());
        assert_eq!(
            client.poll_timeout(now(1_100_000)).unwrap_err(),
            Error::Timeout
        );
        assert!(!client.has_pending());
    }

    #[test]
    fn mismatched_response_is_ignored() {
        let mut client = Client::new();
        encode(
            &mut client,
            &AttPdu::ReadReq {
                handle: Handle::from_raw(0x0003),
            },
            now(0),
        )
        .unwrap();

        assert_eq!(client.process(&[0x13]).unwrap(), Served::Ignored); // WriteRsp
        assert!(client.has_pending());
    }
}
