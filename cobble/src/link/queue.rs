//! Outgoing PDU queue for the connection-event loop.
//!
//! Upper layers hand complete LL payloads (L2CAP fragments, control PDUs) to this queue; the
//! connection-event loop drains it one PDU per event, keeping the front entry in place until the
//! peer acknowledges it. Control PDUs jump the queue since link management must not starve behind
//! a long fragmented write.
//!
//! The queue is sized so that one maximum-size L2CAP frame (ATT MTU 247 plus the 4-byte header)
//! fits even when fragmented into minimum-size LL payloads, plus a slot for a control PDU. All
//! storage is fixed at construction; nothing allocates.

use crate::link::data::{Llid, MAX_PAYLOAD, MIN_PAYLOAD};
use crate::Error;
use heapless::{Deque, Vec};

/// Queue depth: a 251-byte L2CAP frame split into 27-byte fragments, plus one control PDU.
pub const QUEUE_DEPTH: usize = (MAX_PAYLOAD + MIN_PAYLOAD - 1) / MIN_PAYLOAD + 1;

/// A single queued LL payload.
pub struct Fragment {
    llid: Llid,
    data: Vec<u8, MAX_PAYLOAD>,
}

impl Fragment {
    /// Returns the LLID this payload must be transmitted with.
    pub fn llid(&self) -> Llid {
        self.llid
    }

    /// Returns the payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// FIFO of outgoing LL payloads with a priority lane for control PDUs.
pub struct TxQueue {
    queue: Deque<Fragment, QUEUE_DEPTH>,
}

impl TxQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { queue: Deque::new() }
    }

    /// Appends a data payload to the back of the queue.
    ///
    /// Fails with `Error::Busy` when the queue is full and with `Error::Eof` when `data` exceeds
    /// the maximum LL payload size.
    pub fn push(&mut self, llid: Llid, data: &[u8]) -> Result<(), Error> {
        let fragment = Self::fragment(llid, data)?;
        self.queue.push_back(fragment).map_err(|_| Error::Busy)
    }

    /// Inserts a control payload in front of all queued data.
    ///
    /// Relative order of multiple queued control PDUs is preserved only if they are pushed in
    /// reverse; the Link-Layer never has more than one outstanding control response plus a
    /// termination request, which is the one pair where ordering matters and which it pushes
    /// back-to-front.
    pub fn push_control(&mut self, data: &[u8]) -> Result<(), Error> {
        let fragment = Self::fragment(Llid::Control, data)?;
        self.queue.push_front(fragment).map_err(|_| Error::Busy)
    }

    fn fragment(llid: Llid, data: &[u8]) -> Result<Fragment, Error> {
        Ok(Fragment {
            llid,
            data: Vec::from_slice(data).map_err(|()| Error::Eof)?,
        })
    }

    /// Returns the payload to transmit next, if any.
    ///
    /// The fragment stays queued; it is removed by [`acknowledge`](Self::acknowledge) once the
    /// peer confirms reception.
    pub fn front(&self) -> Option<&Fragment> {
        self.queue.front()
    }

    /// Drops the front fragment after the peer acknowledged it.
    pub fn acknowledge(&mut self) -> Option<Fragment> {
        self.queue.pop_front()
    }

    /// Returns whether more payloads are waiting *behind* the one currently being transmitted.
    ///
    /// This is the value of the MD bit to send alongside the front fragment.
    pub fn has_more(&self) -> bool {
        self.queue.len() > 1
    }

    /// Returns whether the queue holds no payloads at all.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Discards all queued payloads.
    pub fn clear(&mut self) {
        self.queue = Deque::new();
    }
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new()
    }
}
