//! Test doubles: a mock radio/timer pair driven by a scripted fake peripheral.
//!
//! The mock radio implements the same driver contract as real hardware, but instead of RF it
//! hands every transmitted PDU to a `PeripheralState` that plays the other end of the link:
//! it advertises, accepts the CONNECT_REQ, keeps its own NESN/SN bits, reassembles the Central's
//! L2CAP frames and answers ATT requests from a small scripted attribute server. Time is
//! simulated; waiting jumps the shared clock forward.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use cobble::att::Handle;
use cobble::bytes::{ByteReader, FromBytes};
use cobble::central::{Central, CentralConfig, Hooks};
use cobble::config::Config;
use cobble::link::access_address::Lfsr;
use cobble::link::advertising::{ConnectRequest, PduType};
use cobble::link::DeviceAddress;
use cobble::radio::{Irq, Radio, RadioError};
use cobble::time::{Instant, Timer};

pub const ADV_ACCESS_ADDRESS: u32 = 0x8E89_BED6;

/// What the radio "hears" after a transmission or while listening.
pub enum RxOutcome {
    /// A complete PDU (header + payload) with a good CRC.
    Pdu(Vec<u8>),
    /// Sync detected but the CRC check failed.
    Corrupt,
    /// Nothing on the air.
    Timeout,
}

/// The scripted peer device.
pub struct PeripheralState {
    // Script knobs.
    pub advertising: bool,
    pub adv_addr: [u8; 6],
    pub device_name: Option<Vec<u8>>,
    /// Raw `READ_BY_TYPE_RSP` served for primary-service lookups; `ERROR_RSP` when absent.
    pub service_list_rsp: Option<Vec<u8>>,
    pub server_mtu: u16,
    /// Stop answering data-channel traffic (supervision-timeout scenarios).
    pub silent: bool,
    /// Corrupt this many of the next data-channel responses.
    pub corrupt_next: u32,
    /// Server-initiated ATT PDUs (notifications/indications) pushed when the link idles.
    pub pushes: VecDeque<Vec<u8>>,

    // Observations for assertions.
    pub connect_req: Option<ConnectRequest>,
    pub writes: Vec<(u16, Vec<u8>)>,
    pub write_commands: Vec<(u16, Vec<u8>)>,
    pub confirmations: u32,
    pub terminate_reason: Option<u8>,

    // Link-layer state of the peer.
    connected: bool,
    sn: bool,
    nesn: bool,
    last_sent: Option<(u8, Vec<u8>)>,
    tx_fragments: VecDeque<(u8, Vec<u8>)>,
    rx_frame: Vec<u8>,
}

impl PeripheralState {
    pub fn new() -> Self {
        Self {
            advertising: true,
            adv_addr: [0x66, 0x55, 0x44, 0x33, 0x22, 0x11],
            device_name: Some(b"Nordic_UART".to_vec()),
            service_list_rsp: None,
            server_mtu: 23,
            silent: false,
            corrupt_next: 0,
            pushes: VecDeque::new(),
            connect_req: None,
            writes: Vec::new(),
            write_commands: Vec::new(),
            confirmations: 0,
            terminate_reason: None,
            connected: false,
            sn: false,
            nesn: false,
            last_sent: None,
            tx_fragments: VecDeque::new(),
            rx_frame: Vec::new(),
        }
    }

    /// Advertisement offered while the Central listens on an advertising channel.
    fn on_listen(&mut self, freq_hz: u32) -> RxOutcome {
        if self.advertising && freq_hz == 2_402_000_000 {
            // ADV_IND, public address, no AD payload.
            let mut pdu = vec![0x00, 0x06];
            pdu.extend_from_slice(&self.adv_addr);
            RxOutcome::Pdu(pdu)
        } else {
            RxOutcome::Timeout
        }
    }

    /// The Central transmitted on an advertising channel (a CONNECT_REQ, in this stack).
    fn on_adv_tx(&mut self, pdu: &[u8]) {
        let header_type = pdu[0] & 0x0F;
        if header_type == u8::from(PduType::ConnectReq) {
            let req = ConnectRequest::from_bytes(&mut ByteReader::new(&pdu[2..]))
                .expect("malformed CONNECT_REQ");
            self.connect_req = Some(req);
            self.connected = true;
            self.sn = false;
            self.nesn = false;
            self.last_sent = None;
            self.tx_fragments.clear();
            self.rx_frame.clear();
        }
    }

    /// The Central transmitted a data-channel PDU; produce what it will receive back.
    fn on_data_tx(&mut self, pdu: &[u8]) -> RxOutcome {
        if self.silent || !self.connected {
            return RxOutcome::Timeout;
        }
        if self.corrupt_next > 0 {
            self.corrupt_next -= 1;
            return RxOutcome::Corrupt;
        }

        let b0 = pdu[0];
        let len = usize::from(pdu[1]);
        let llid = b0 & 0b11;
        let nesn = b0 & 0b100 != 0;
        let sn = b0 & 0b1000 != 0;

        // Their NESN moving past our SN acknowledges our last PDU.
        if nesn != self.sn {
            self.sn = !self.sn;
            self.last_sent = None;
        }

        // A matching SN means new data (not a retransmission).
        if sn == self.nesn {
            self.nesn = !self.nesn;
            if len > 0 {
                self.process_payload(llid, &pdu[2..2 + len]);
            }
        }

        if self.last_sent.is_none() {
            self.last_sent = Some(self.next_payload());
        }
        let (tx_llid, data) = self.last_sent.clone().unwrap();
        let md = !self.tx_fragments.is_empty();

        let mut out = vec![
            tx_llid
                | (u8::from(self.nesn) << 2)
                | (u8::from(self.sn) << 3)
                | (u8::from(md) << 4),
            data.len() as u8,
        ];
        out.extend_from_slice(&data);
        RxOutcome::Pdu(out)
    }

    fn process_payload(&mut self, llid: u8, payload: &[u8]) {
        match llid {
            0b11 => {
                // LL control: the only one a Central sends us unprompted is TERMINATE_IND.
                if payload[0] == 0x02 {
                    self.terminate_reason = Some(payload[1]);
                }
            }
            0b10 => {
                self.rx_frame.clear();
                self.rx_frame.extend_from_slice(payload);
                self.try_complete_frame();
            }
            0b01 => {
                self.rx_frame.extend_from_slice(payload);
                self.try_complete_frame();
            }
            _ => {}
        }
    }

    fn try_complete_frame(&mut self) {
        if self.rx_frame.len() < 4 {
            return;
        }
        let length = usize::from(u16::from_le_bytes([self.rx_frame[0], self.rx_frame[1]]));
        if self.rx_frame.len() < 4 + length {
            return;
        }
        let pdu = self.rx_frame[4..4 + length].to_vec();
        self.rx_frame.clear();
        self.handle_att(&pdu);
    }

    fn handle_att(&mut self, pdu: &[u8]) {
        let opcode = pdu[0];
        let rsp: Option<Vec<u8>> = match opcode {
            // EXCHANGE_MTU_REQ
            0x02 => Some(vec![0x03, self.server_mtu as u8, (self.server_mtu >> 8) as u8]),
            // READ_REQ
            0x0A => {
                let handle = u16::from_le_bytes([pdu[1], pdu[2]]);
                match (&self.device_name, handle) {
                    (Some(name), 0x0003) => {
                        let mut rsp = vec![0x0B];
                        rsp.extend_from_slice(name);
                        Some(rsp)
                    }
                    // READ_NOT_PERMITTED
                    _ => Some(vec![0x01, 0x0A, pdu[1], pdu[2], 0x02]),
                }
            }
            // READ_BY_TYPE_REQ
            0x08 => Some(self.service_list_rsp.clone().unwrap_or_else(|| {
                // ATTRIBUTE_NOT_FOUND
                vec![0x01, 0x08, 0x01, 0x00, 0x0A]
            })),
            // WRITE_REQ
            0x12 => {
                let handle = u16::from_le_bytes([pdu[1], pdu[2]]);
                self.writes.push((handle, pdu[3..].to_vec()));
                Some(vec![0x13])
            }
            // WRITE_CMD
            0x52 => {
                let handle = u16::from_le_bytes([pdu[1], pdu[2]]);
                self.write_commands.push((handle, pdu[3..].to_vec()));
                None
            }
            // HANDLE_VALUE_CFM
            0x1E => {
                self.confirmations += 1;
                None
            }
            // REQUEST_NOT_SUPPORTED
            _ => Some(vec![0x01, opcode, 0x00, 0x00, 0x06]),
        };

        if let Some(rsp) = rsp {
            self.queue_att(&rsp);
        }
    }

    /// Frames an ATT PDU for L2CAP and cuts it into LL fragments, peer-side.
    fn queue_att(&mut self, pdu: &[u8]) {
        let mut frame = Vec::with_capacity(4 + pdu.len());
        frame.extend_from_slice(&(pdu.len() as u16).to_le_bytes());
        frame.extend_from_slice(&[0x04, 0x00]);
        frame.extend_from_slice(pdu);

        let mut first = true;
        for chunk in frame.chunks(27) {
            let llid = if first { 0b10 } else { 0b01 };
            first = false;
            self.tx_fragments.push_back((llid, chunk.to_vec()));
        }
    }

    fn next_payload(&mut self) -> (u8, Vec<u8>) {
        if let Some(fragment) = self.tx_fragments.pop_front() {
            return fragment;
        }
        if let Some(push) = self.pushes.pop_front() {
            self.queue_att(&push);
            return self.tx_fragments.pop_front().unwrap();
        }
        (0b01, Vec::new())
    }
}

/// Simulated clock shared between the mock radio and the mock timer.
pub type SharedClock = Rc<RefCell<u64>>;

pub struct MockTimer {
    clock: SharedClock,
}

impl MockTimer {
    pub fn from_clock(clock: SharedClock) -> Self {
        Self { clock }
    }
}

impl Timer for MockTimer {
    fn now(&mut self) -> Instant {
        Instant::from_raw_micros(*self.clock.borrow())
    }

    fn delay_micros(&mut self, micros: u32) {
        *self.clock.borrow_mut() += u64::from(micros);
    }

    fn wait_until(&mut self, deadline: Instant) {
        let mut clock = self.clock.borrow_mut();
        if deadline.raw_micros() > *clock {
            *clock = deadline.raw_micros();
        }
    }
}

pub struct MockRadio {
    peer: Rc<RefCell<PeripheralState>>,
    clock: SharedClock,
    buffer: [u8; 300],
    irq: u16,
    freq_hz: u32,
    access_address: u32,
    pending: Option<RxOutcome>,
}

impl MockRadio {
    pub fn new(peer: Rc<RefCell<PeripheralState>>, clock: SharedClock) -> Self {
        Self {
            peer,
            clock,
            buffer: [0; 300],
            irq: 0,
            freq_hz: 0,
            access_address: 0,
            pending: None,
        }
    }

    fn advance(&mut self, micros: u64) {
        *self.clock.borrow_mut() += micros;
    }
}

impl Radio for MockRadio {
    fn enter_ble_mode(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), RadioError> {
        self.freq_hz = hz;
        Ok(())
    }

    fn set_access_address(&mut self, access_address: u32) -> Result<(), RadioError> {
        self.access_address = access_address;
        Ok(())
    }

    fn set_crc_init(&mut self, _init: u32) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_whitening_seed(&mut self, _seed: u8) -> Result<(), RadioError> {
        Ok(())
    }

    fn write_buffer(&mut self, offset: u8, data: &[u8]) -> Result<(), RadioError> {
        let offset = usize::from(offset);
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, offset: u8, data: &mut [u8]) -> Result<(), RadioError> {
        let offset = usize::from(offset);
        data.copy_from_slice(&self.buffer[offset..offset + data.len()]);
        Ok(())
    }

    fn standby(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn transmit(&mut self) -> Result<(), RadioError> {
        let advertising = self.access_address == ADV_ACCESS_ADDRESS;
        let len = if advertising {
            usize::from(self.buffer[1] & 0x3F)
        } else {
            usize::from(self.buffer[1])
        };
        let pdu = self.buffer[..2 + len].to_vec();

        if advertising {
            self.peer.borrow_mut().on_adv_tx(&pdu);
            self.pending = None;
        } else {
            let outcome = self.peer.borrow_mut().on_data_tx(&pdu);
            self.pending = Some(outcome);
        }

        self.advance((pdu.len() as u64 + 8) * 8);
        self.irq |= Irq::TX_DONE.bits();
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<(), RadioError> {
        let outcome = match self.pending.take() {
            Some(outcome) => outcome,
            None if self.access_address == ADV_ACCESS_ADDRESS => {
                self.peer.borrow_mut().on_listen(self.freq_hz)
            }
            None => RxOutcome::Timeout,
        };

        match outcome {
            RxOutcome::Pdu(bytes) => {
                self.buffer[..bytes.len()].copy_from_slice(&bytes);
                self.advance((bytes.len() as u64 + 8) * 8);
                self.irq |= (Irq::SYNC_VALID | Irq::RX_DONE).bits();
            }
            RxOutcome::Corrupt => {
                self.advance(300);
                self.irq |= (Irq::SYNC_VALID | Irq::CRC_ERROR).bits();
            }
            RxOutcome::Timeout => {
                self.advance(u64::from(timeout_ms) * 1_000);
                self.irq |= Irq::RX_TIMEOUT.bits();
            }
        }
        Ok(())
    }

    fn irq_status(&mut self) -> Result<Irq, RadioError> {
        Ok(Irq::from_bits_truncate(self.irq))
    }

    fn clear_irq(&mut self, mask: Irq) -> Result<(), RadioError> {
        self.irq &= !mask.bits();
        Ok(())
    }

    fn rssi(&mut self) -> Result<i8, RadioError> {
        Ok(-40)
    }
}

pub struct TestConfig;

impl Config for TestConfig {
    type Timer = MockTimer;
    type Radio = MockRadio;
    type Rng = Lfsr;
}

/// Records every hook invocation for assertions, and optionally runs a scripted authentication
/// exchange.
#[derive(Default)]
pub struct RecordingHooks {
    pub connected: Vec<DeviceAddress>,
    pub disconnects: Vec<u8>,
    pub notifications: Vec<(u16, Vec<u8>)>,
    pub accept_any_advertiser: bool,
    /// Value written to the profile's TX characteristic from inside `authenticate`.
    pub auth_write: Option<Vec<u8>>,
    pub auth_runs: u32,
}

impl Hooks for RecordingHooks {
    fn on_connected(&mut self, peer: &DeviceAddress) {
        self.connected.push(*peer);
    }

    fn on_disconnected(&mut self, reason: u8) {
        self.disconnects.push(reason);
    }

    fn on_notification(&mut self, handle: Handle, value: &[u8]) {
        self.notifications.push((handle.as_u16(), value.to_vec()));
    }

    fn accept_advertiser(&mut self, _peer: &DeviceAddress, _pdu_type: PduType) -> bool {
        self.accept_any_advertiser
    }

    fn authenticate(
        &mut self,
        kind: cobble::gatt::PeripheralKind,
        gatt: &mut dyn cobble::central::GattExchange,
    ) -> Result<(), cobble::Error> {
        self.auth_runs += 1;
        if let Some(value) = self.auth_write.clone() {
            gatt.write(kind.handles().tx_char, &value)?;
        }
        Ok(())
    }
}

/// The peer address used across the test suite, `11:22:33:44:55:66`.
pub fn target_address() -> DeviceAddress {
    DeviceAddress::new(
        [0x66, 0x55, 0x44, 0x33, 0x22, 0x11],
        cobble::link::AddressKind::Public,
    )
}

/// Builds a `Central` wired to a fresh scripted peripheral.
///
/// Also hands back the shared clock, for tests that need to let simulated time pass outside of
/// stack calls.
pub fn build_central(
    config: CentralConfig,
    script: impl FnOnce(&mut PeripheralState),
) -> (
    Central<TestConfig>,
    Rc<RefCell<PeripheralState>>,
    SharedClock,
) {
    let clock: SharedClock = Rc::new(RefCell::new(0));
    let peer = Rc::new(RefCell::new(PeripheralState::new()));
    script(&mut peer.borrow_mut());

    let radio = MockRadio::new(peer.clone(), clock.clone());
    let timer = MockTimer::from_clock(clock.clone());
    let central = Central::new(radio, timer, Lfsr::new(0x1357_9BDF), config)
        .expect("central init failed");
    (central, peer, clock)
}

/// Convenience: value bytes of an ATT notification PDU.
pub fn notification_pdu(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = vec![0x1B];
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.extend_from_slice(value);
    pdu
}

/// Convenience: value bytes of an ATT indication PDU.
pub fn indication_pdu(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut pdu = vec![0x1D];
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.extend_from_slice(value);
    pdu
}
