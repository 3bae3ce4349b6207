//! Master-side connection management: the connection context and the connection-event loop.

use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::config::Config;
use crate::link::advertising::ConnectRequest;
use crate::link::channel_map::ChannelMap;
use crate::link::data::{Header, Llid, MAX_PAYLOAD};
use crate::link::llcp::{CompanyId, ControlOpcode, ControlPdu};
use crate::link::queue::TxQueue;
use crate::link::{FeatureSet, SeqNum};
use crate::phy::DataChannel;
use crate::radio::{Irq, Radio};
use crate::time::{Duration, Instant, Timer};
use crate::utils::HexSlice;
use crate::{Error, BLUETOOTH_VERSION};
use core::num::Wrapping;

/// Disconnect reason: connection supervision timeout (controller error code 0x08).
pub const REASON_CONNECTION_TIMEOUT: u8 = 0x08;

/// Disconnect reason: remote user terminated connection (controller error code 0x13).
pub const REASON_REMOTE_USER_TERMINATED: u8 = 0x13;

/// RX window floor applied whenever the peer's exact timing is not yet known.
const MIN_RX_WINDOW: Duration = Duration::from_millis(2);

/// Combined master+peer sleep-clock inaccuracy assumed for window widening, in ppm.
///
/// 32 µs of drift per second of elapsed interval, the simplified figure for two ±50 ppm-class
/// crystals that have been measured to stay well inside their rating.
const WINDOW_WIDENING_PPM: u32 = 32;

/// Number of consecutive bad receptions tolerated while the connection has never been
/// established.
const MAX_UNESTABLISHED_CRC_ERRORS: u8 = 6;

/// Extra slack added to IRQ-poll deadlines to absorb radio ramp-up, in microseconds.
const IRQ_POLL_SLACK: Duration = Duration::from_millis(1);

/// What a single connection event produced.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EventOutcome {
    /// The connection lives on. `new_data` tells the caller whether a received payload is
    /// available from [`Connection::rx_pdu`], `established` whether this event completed the
    /// link establishment.
    Continue { new_data: bool, established: bool },

    /// The connection ended: the peer terminated it, the supervision timeout hit, or a locally
    /// requested termination completed.
    Closed { reason: u8 },
}

/// Connection state and parameters, exclusively mutated by the connection-event loop.
pub struct Connection {
    access_address: u32,
    crc_init: u32,
    channel_map: ChannelMap,

    /// Number of (unmapped) channels to hop between each connection event, 5..=16.
    hop: u8,

    conn_interval: Duration,
    slave_latency: u16,
    supervision_timeout: Duration,
    win_size: Duration,

    /// Connection event counter (`connEventCount` in the Bluetooth spec).
    conn_event_count: Wrapping<u16>,

    /// Unmapped data channel of the previous connection event (`lastUnmappedChannel`).
    unmapped_channel: DataChannel,

    /// Actual (remapped) data channel of the current connection event.
    channel: DataChannel,

    /// Scheduled start of the next connection event.
    anchor: Instant,

    /// Accumulated clock-drift allowance since the last successfully received packet.
    window_widening: Duration,

    // Acknowledgement / flow control state.
    tx_seq_num: SeqNum,
    next_expected_seq_num: SeqNum,

    /// Whether the front of `tx` has been transmitted at least once and awaits acknowledgement.
    tx_pending: bool,

    /// The peer's MD bit from its last PDU.
    peer_more_data: bool,

    tx: TxQueue,

    /// Whether any packet has been received in this connection.
    established: bool,

    /// Time of the last successfully received packet; meaningful once `established`.
    last_rx: Instant,

    /// Time the connection was created, for supervising the establishment phase.
    created: Instant,

    consecutive_crc_errors: u8,
    total_crc_errors: u32,
    last_rssi: i8,

    /// Reason of a locally requested termination in flight.
    local_terminate: Option<u8>,

    /// VERSION_IND is answered at most once per connection.
    version_answered: bool,

    rx_llid: Llid,
    rx_len: u8,
    rx_buf: [u8; MAX_PAYLOAD],
}

impl Connection {
    /// Initializes the Master-side connection state from the `CONNECT_REQ` this device just
    /// transmitted.
    ///
    /// The first connection event is scheduled at `tx_end + 1.25 ms + WinOffset`.
    pub(crate) fn create(request: &ConnectRequest, tx_end: Instant) -> Self {
        let anchor = tx_end + Duration::from_micros(1_250) + request.win_offset();
        Self {
            access_address: request.access_address,
            crc_init: request.crc_init,
            channel_map: request.channel_map,
            hop: request.hop,
            conn_interval: request.interval(),
            slave_latency: request.latency,
            supervision_timeout: request.supervision_timeout(),
            win_size: request.win_size(),
            conn_event_count: Wrapping(0),
            unmapped_channel: DataChannel::new(0),
            channel: DataChannel::new(0),
            anchor,
            window_widening: Duration::from_micros(0),
            tx_seq_num: SeqNum::ZERO,
            next_expected_seq_num: SeqNum::ZERO,
            tx_pending: false,
            peer_more_data: false,
            tx: TxQueue::new(),
            established: false,
            last_rx: tx_end,
            created: tx_end,
            consecutive_crc_errors: 0,
            total_crc_errors: 0,
            last_rssi: i8::min_value(),
            local_terminate: None,
            version_answered: false,
            rx_llid: Llid::DataCont,
            rx_len: 0,
            rx_buf: [0; MAX_PAYLOAD],
        }
    }

    /// Programs the per-connection radio parameters (sync word and CRC seed).
    ///
    /// Per-event parameters (frequency, whitening) are programmed by the event loop.
    pub(crate) fn configure_radio<R: Radio>(&self, radio: &mut R) -> Result<(), Error> {
        radio.set_access_address(self.access_address)?;
        radio.set_crc_init(self.crc_init)?;
        Ok(())
    }

    /// Runs one connection event: hop, wait for the anchor, transmit, T_IFS, receive, process,
    /// advance.
    pub(crate) fn conn_event<C: Config>(
        &mut self,
        radio: &mut C::Radio,
        timer: &mut C::Timer,
    ) -> Result<EventOutcome, Error> {
        self.skip_latency_events(timer);

        // Step 1: select the data channel and program the per-event radio parameters.
        self.hop_channel();
        radio.set_frequency(self.channel.freq_hz())?;
        radio.set_whitening_seed(self.channel.whitening_iv())?;

        // Step 2: wait for the anchor point, opening the event early by the accumulated drift
        // allowance.
        timer.wait_until(self.anchor - self.window_widening);

        // Step 3: transmit exactly one PDU. An empty PDU keeps the event alive when there is
        // nothing to send.
        let mut header = match self.tx.front() {
            Some(fragment) => {
                let mut header = Header::new(fragment.llid());
                header.set_payload_length(fragment.data().len() as u8);
                radio.write_buffer(2, fragment.data())?;
                self.tx_pending = true;
                header
            }
            None => Header::new(Llid::DataCont),
        };
        header.set_sn(self.tx_seq_num);
        header.set_nesn(self.next_expected_seq_num);
        header.set_md(self.tx.has_more());
        radio.write_buffer(0, &header.to_u16().to_le_bytes())?;

        radio.transmit()?;
        let tx_deadline = timer.now() + max_pdu_airtime() + IRQ_POLL_SLACK;
        wait_irq(radio, timer, Irq::TX_DONE, tx_deadline)?;

        // Step 4: inter-frame space.
        timer.delay_micros(Duration::T_IFS.as_micros());

        // Step 5: receive the peer's PDU within a bounded window.
        let rx_window = self.rx_window();
        radio.receive(rx_window.whole_millis().max(1))?;
        let rx_deadline = timer.now() + rx_window + max_pdu_airtime() + IRQ_POLL_SLACK;
        let irq = wait_irq(
            radio,
            timer,
            Irq::RX_DONE | Irq::CRC_ERROR | Irq::RX_TIMEOUT,
            rx_deadline,
        );
        radio.standby()?;

        trace!("#{} DATA-> {:?}", self.conn_event_count.0, header);

        // Step 6: process the reception.
        let mut outcome = EventOutcome::Continue {
            new_data: false,
            established: false,
        };
        let rx_ok = match irq {
            Ok(irq) if irq.contains(Irq::RX_DONE) => {
                let closed = self.process_rx::<C>(radio, timer, &mut outcome)?;
                if let Some(reason) = closed {
                    return Ok(EventOutcome::Closed { reason });
                }
                true
            }
            Ok(_) | Err(Error::Timeout) => {
                // CRC error or empty window: sequence numbers stay untouched so the next event
                // retransmits.
                self.consecutive_crc_errors = self.consecutive_crc_errors.saturating_add(1);
                self.total_crc_errors += 1;
                false
            }
            Err(e) => return Err(e),
        };

        // Step 7: advance the timing state.
        self.conn_event_count += Wrapping(1);
        self.anchor += self.conn_interval;
        let step = self.widening_step();
        self.window_widening = if rx_ok {
            step
        } else {
            self.widening_cap().min(self.window_widening + step)
        };

        // Step 8: supervision.
        let now = timer.now();
        if self.established {
            if now.duration_since(self.last_rx) > self.supervision_timeout {
                debug!("supervision timeout, closing");
                return Ok(EventOutcome::Closed {
                    reason: REASON_CONNECTION_TIMEOUT,
                });
            }
        } else if self.consecutive_crc_errors > MAX_UNESTABLISHED_CRC_ERRORS
            || now.duration_since(self.created) > self.supervision_timeout
        {
            debug!("connection never established, closing");
            return Ok(EventOutcome::Closed {
                reason: REASON_CONNECTION_TIMEOUT,
            });
        }

        Ok(outcome)
    }

    /// Handles a successfully received PDU. Returns the disconnect reason when the reception
    /// closes the connection.
    fn process_rx<C: Config>(
        &mut self,
        radio: &mut C::Radio,
        timer: &mut C::Timer,
        outcome: &mut EventOutcome,
    ) -> Result<Option<u8>, Error> {
        let mut raw_header = [0; 2];
        radio.read_buffer(0, &mut raw_header)?;
        let header = Header::parse(&raw_header);

        let len = usize::from(header.payload_length());
        if len > MAX_PAYLOAD {
            // A length this large cannot have left a conforming peer; treat it like a corrupted
            // reception.
            self.consecutive_crc_errors = self.consecutive_crc_errors.saturating_add(1);
            self.total_crc_errors += 1;
            return Ok(None);
        }
        self.rx_len = len as u8;
        radio.read_buffer(2, &mut self.rx_buf[..len])?;
        if let Ok(rssi) = radio.rssi() {
            self.last_rssi = rssi;
        }

        self.consecutive_crc_errors = 0;
        self.last_rx = timer.now();
        if !self.established {
            self.established = true;
            if let EventOutcome::Continue { established, .. } = outcome {
                *established = true;
            }
            debug!("connection established on channel {:?}", self.channel);
        }

        trace!(
            "#{} DATA<- {:?}, {:?}",
            self.conn_event_count.0,
            header,
            HexSlice(&self.rx_buf[..len])
        );

        // The peer acknowledged our last PDU iff its NESN moved past our SN.
        if header.nesn() != self.tx_seq_num {
            self.tx_seq_num.toggle();
            if self.tx_pending {
                self.tx_pending = false;
                let acked = self.tx.acknowledge();
                if let (Some(fragment), Some(reason)) = (acked, self.local_terminate) {
                    if fragment.llid() == Llid::Control
                        && fragment.data().first() == Some(&u8::from(ControlOpcode::TerminateInd))
                    {
                        debug!("local termination acknowledged");
                        return Ok(Some(reason));
                    }
                }
            }
        }

        self.peer_more_data = header.md();

        // New data iff the peer's SN matches what we expect next; everything else is a
        // retransmission we have already consumed.
        if header.sn() == self.next_expected_seq_num {
            if len == 0 {
                self.next_expected_seq_num.toggle();
            } else if header.llid() == Llid::Control {
                let ctrl = self.rx_buf;
                match self.process_control_pdu(&ctrl[..len]) {
                    Ok(()) => self.next_expected_seq_num.toggle(),
                    Err(ControlAction::Closed(reason)) => return Ok(Some(reason)),
                    Err(ControlAction::NoSpace) => {
                        // Leave NESN untouched; the peer will retransmit and we retry once the
                        // queue has drained.
                    }
                }
            } else {
                self.rx_llid = header.llid();
                self.next_expected_seq_num.toggle();
                if let EventOutcome::Continue { new_data, .. } = outcome {
                    *new_data = true;
                }
            }
        }

        Ok(None)
    }

    /// Reacts to an LL Control PDU.
    fn process_control_pdu(&mut self, payload: &[u8]) -> Result<(), ControlAction> {
        let pdu = match ControlPdu::from_bytes(&mut ByteReader::new(payload)) {
            Ok(pdu) => pdu,
            // Unparseable control data; NACK and hope the retransmission fares better.
            Err(_) => return Err(ControlAction::NoSpace),
        };

        info!("LLCP<- {:?}", pdu);

        let response = match pdu {
            ControlPdu::TerminateInd { error_code } => {
                return Err(ControlAction::Closed(error_code));
            }
            ControlPdu::UnknownRsp { unknown_type } => {
                debug!("peer does not understand {:?}", unknown_type);
                return Ok(());
            }
            ControlPdu::FeatureReq { .. } => ControlPdu::FeatureRsp {
                features_used: FeatureSet::supported(),
            },
            ControlPdu::FeatureRsp { .. } => return Ok(()),
            ControlPdu::VersionInd { .. } => {
                if self.version_answered {
                    return Ok(());
                }
                self.version_answered = true;
                ControlPdu::VersionInd {
                    vers_nr: BLUETOOTH_VERSION,
                    comp_id: CompanyId::TEST,
                    sub_vers_nr: 0,
                }
            }
            ControlPdu::Unknown { opcode } => ControlPdu::UnknownRsp {
                unknown_type: opcode,
            },
        };

        info!("LLCP-> {:?}", response);
        self.queue_control(&response)
            .map_err(|_| ControlAction::NoSpace)
    }

    fn queue_control(&mut self, pdu: &ControlPdu) -> Result<(), Error> {
        let mut buf = [0; 27];
        let mut writer = ByteWriter::new(&mut buf);
        pdu.to_bytes(&mut writer)?;
        let used = 27 - writer.space_left();

        // A control response must not displace the front fragment if that one is already on air
        // awaiting its acknowledgement.
        if self.tx_pending {
            return Err(Error::Busy);
        }
        self.tx.push_control(&buf[..used])
    }

    /// Starts a graceful local termination: `LL_TERMINATE_IND` jumps the TX queue and the
    /// connection closes once the peer acknowledges it.
    pub(crate) fn begin_disconnect(&mut self, reason: u8) -> Result<(), Error> {
        if self.local_terminate.is_some() {
            return Ok(());
        }
        let pdu = ControlPdu::TerminateInd { error_code: reason };
        let mut buf = [0; 2];
        let mut writer = ByteWriter::new(&mut buf);
        pdu.to_bytes(&mut writer)?;

        // Displacing an on-air fragment would corrupt the ARQ state, so wait for it.
        if self.tx_pending {
            return Err(Error::Busy);
        }
        self.tx.push_control(&buf)?;
        self.local_terminate = Some(reason);
        Ok(())
    }

    /// Whether a local termination has been queued.
    pub(crate) fn disconnecting(&self) -> bool {
        self.local_terminate.is_some()
    }

    /// Queues an outgoing data payload.
    pub(crate) fn enqueue(&mut self, llid: Llid, payload: &[u8]) -> Result<(), Error> {
        self.tx.push(llid, payload)
    }

    /// Returns the payload received during the last connection event.
    pub(crate) fn rx_pdu(&self) -> (Llid, &[u8]) {
        (self.rx_llid, &self.rx_buf[..usize::from(self.rx_len)])
    }

    /// Whether the peer has ever talked back on this connection.
    pub(crate) fn is_established(&self) -> bool {
        self.established
    }

    /// Advances `unmapped_channel` and `channel` to the data channel of the next connection
    /// event, according to channel selection algorithm #1.
    fn hop_channel(&mut self) {
        let (unmapped, mapped) = next_channel(self.unmapped_channel, self.hop, &self.channel_map);
        self.unmapped_channel = unmapped;
        self.channel = mapped;
    }

    /// Consumes permitted event skips when the slave latency allows it.
    ///
    /// Skipping is only allowed while nothing is queued or in flight and the peer did not
    /// announce more data. The skip is capped so the radio still listens well before the
    /// supervision timeout can strike.
    fn skip_latency_events(&mut self, timer: &mut impl Timer) {
        if self.slave_latency == 0
            || !self.established
            || self.tx_pending
            || !self.tx.is_empty()
            || self.peer_more_data
        {
            return;
        }

        let interval = self.conn_interval.as_micros();
        let budget = self
            .supervision_timeout
            .as_micros()
            .saturating_sub(timer.now().duration_since(self.last_rx).as_micros())
            / 2;
        let max_by_time = (budget / interval.max(1)) as u16;
        let skip = self.slave_latency.min(max_by_time);

        for _ in 0..skip {
            self.hop_channel();
            self.anchor += self.conn_interval;
            self.conn_event_count += Wrapping(1);
            self.window_widening = self.widening_cap().min(self.window_widening + self.widening_step());
        }
        if skip > 0 {
            trace!("latency: skipped {} events", skip);
        }
    }

    /// RX window for the current event: the transmit-window size plus drift allowance on either
    /// side, floored at 2 ms, which also covers the events before the peer's timing is known.
    fn rx_window(&self) -> Duration {
        MIN_RX_WINDOW.max(self.win_size + self.window_widening + self.window_widening)
    }

    /// Window-widening contribution of a single connection interval, rounded up.
    fn widening_step(&self) -> Duration {
        let micros =
            (self.conn_interval.as_micros() * WINDOW_WIDENING_PPM + 999_999) / 1_000_000;
        Duration::from_micros(micros.max(1))
    }

    /// Upper bound on the accumulated widening: half the connection interval.
    fn widening_cap(&self) -> Duration {
        Duration::from_micros(self.conn_interval.as_micros() / 2)
    }
}

// Public accessors (surfaced through `LinkLayer::connection`).
impl Connection {
    /// Returns the configured interval between connection events.
    pub fn connection_interval(&self) -> Duration {
        self.conn_interval
    }

    /// Returns the Access Address identifying this connection.
    pub fn access_address(&self) -> u32 {
        self.access_address
    }

    /// Returns the connection event counter.
    pub fn event_count(&self) -> u16 {
        self.conn_event_count.0
    }

    /// Returns the RSSI of the last received packet in dBm, or `i8::MIN` before the first
    /// reception.
    pub fn last_rssi(&self) -> i8 {
        self.last_rssi
    }

    /// Number of consecutive connection events that ended in a CRC error or an empty RX window.
    pub fn consecutive_crc_errors(&self) -> u8 {
        self.consecutive_crc_errors
    }

    /// Total number of failed receptions over the lifetime of this connection.
    pub fn total_crc_errors(&self) -> u32 {
        self.total_crc_errors
    }

    /// Returns whether every queued outgoing payload has been transmitted and acknowledged.
    pub fn tx_idle(&self) -> bool {
        self.tx.is_empty()
    }
}

enum ControlAction {
    /// The connection is gone (peer termination or acknowledged local termination).
    Closed(u8),
    /// The PDU could not be handled right now; do not acknowledge it.
    NoSpace,
}

/// Channel selection algorithm #1.
///
/// Advances the unmapped channel by the hop increment (mod 37) and remaps it through the
/// used-channel map when it lands on an unused channel. The unmapped channel advances even when
/// remapping occurs.
pub(crate) fn next_channel(
    last_unmapped: DataChannel,
    hop: u8,
    map: &ChannelMap,
) -> (DataChannel, DataChannel) {
    let unmapped = DataChannel::new((last_unmapped.index() + hop) % 37);

    let mapped = if map.is_used(unmapped) {
        unmapped
    } else {
        let remap_index = unmapped.index() % map.num_used_channels();
        map.nth_used(remap_index)
    };

    (unmapped, mapped)
}

/// Polls the radio's IRQ status until one of the bits in `mask` fires or `deadline` passes.
pub(crate) fn wait_irq<R: Radio>(
    radio: &mut R,
    timer: &mut impl Timer,
    mask: Irq,
    deadline: Instant,
) -> Result<Irq, Error> {
    loop {
        let status = radio.irq_status()?;
        let hit = status & mask;
        if !hit.is_empty() {
            radio.clear_irq(hit)?;
            return Ok(hit);
        }
        if timer.now() >= deadline {
            return Err(Error::Timeout);
        }
    }
}

/// Worst-case airtime of a data channel PDU at 1 Mbps: preamble, access address, header, 251
/// payload bytes and the CRC trailer.
fn max_pdu_airtime() -> Duration {
    Duration::from_micros((1 + 4 + 2 + MAX_PAYLOAD as u32 + 3) * 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hops_stay_in_used_set() {
        let map = ChannelMap::from_raw([0xAA, 0x55, 0xF0, 0x0F, 0x11]);
        for hop in 5..=16 {
            let mut ch = DataChannel::new(0);
            for _ in 0..100 {
                let (unmapped, mapped) = next_channel(ch, hop, &map);
                assert!(map.is_used(mapped), "hop={} landed on {:?}", hop, mapped);
                ch = unmapped;
            }
        }
    }

    #[test]
    fn single_used_channel_always_remaps_to_it() {
        let map = ChannelMap::from_raw([0x01, 0, 0, 0, 0]);
        for hop in 5..=16 {
            let mut ch = DataChannel::new(0);
            for _ in 0..50 {
                let (unmapped, mapped) = next_channel(ch, hop, &map);
                assert_eq!(mapped.index(), 0);
                ch = unmapped;
            }
        }
    }

    #[test]
    fn unmapped_channel_advances_under_remapping() {
        let map = ChannelMap::from_raw([0x01, 0, 0, 0, 0]);
        let (unmapped, _) = next_channel(DataChannel::new(0), 7, &map);
        assert_eq!(unmapped.index(), 7);
        let (unmapped, _) = next_channel(unmapped, 7, &map);
        assert_eq!(unmapped.index(), 14);
        let (unmapped, _) = next_channel(DataChannel::new(35), 7, &map);
        assert_eq!(unmapped.index(), 5);
    }

    #[test]
    fn full_map_never_remaps() {
        let map = ChannelMap::with_all_channels();
        let (unmapped, mapped) = next_channel(DataChannel::new(10), 11, &map);
        assert_eq!(unmapped, mapped);
        assert_eq!(mapped.index(), 21);
    }
}
