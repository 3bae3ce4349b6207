//! Link-Layer.
//!
//! This is the scheduling authority of the stack: it owns the radio during scanning and during
//! every connection event, decides when to transmit, and is the only layer that talks to the
//! [`Radio`](crate::radio::Radio) driver. Everything above (L2CAP, ATT, GATT) sees a stream of
//! link events and a queue for outgoing payloads.
//!
//! # Packet Format
//!
//! All following graphics are based on the Bluetooth specification. If a field is marked with
//! `-`, it should be set to 0 when sending such a packet, and ignored when receiving it (the
//! spec calls these "RFU" = Reserved for Future Use).
//!
//! All values are transmitted in little-endian bit order unless otherwise noted. The following
//! graphic illustrates the raw in-air packet format:
//!
//! ```notrust
//! LSB                                                     MSB
//! +-----------+----------------+---------------+------------+
//! | Preamble  | Access Address |     PDU       |  CRC       |
//! | (1 octet) | (4 octets)     | (2-253 octets)| (3 octets) |
//! +-----------+----------------+---------------+------------+
//!                              \---------------/      ^
//!                                      |              |
//!                                      +--------------+
//!                                     CRC is calculated
//!                                       over the PDU
//!
//!                              \----------------------------/
//!                                    Data Whitening is
//!                                 applied to PDU and CRC
//! ```
//!
//! The radio hardware behind the [`Radio`](crate::radio::Radio) contract handles preamble, sync
//! word (access address) matching, CRC generation/checking and whitening; this module deals in
//! PDUs.

pub mod access_address;
pub mod advertising;
mod channel_map;
mod connection;
pub mod data;
mod device_address;
mod features;
pub mod llcp;
pub mod queue;
mod seq_num;

pub use self::channel_map::ChannelMap;
pub use self::connection::{Connection, REASON_CONNECTION_TIMEOUT, REASON_REMOTE_USER_TERMINATED};
pub use self::device_address::*;
pub use self::features::*;
pub use self::seq_num::SeqNum;

use self::advertising::{ConnectRequest, PduType};
use self::connection::EventOutcome;
use self::data::Llid;
use crate::bytes::{ByteWriter, ToBytes};
use crate::config::Config;
use crate::phy::AdvertisingChannel;
use crate::radio::{Irq, Radio};
use crate::time::{Duration, Instant, Timer};
use crate::Error;
use core::marker::PhantomData;
use rand_core::RngCore;

/// Time spent listening on one advertising channel before moving to the next.
pub const SCAN_CHANNEL_INTERVAL: Duration = Duration::from_millis(10);

/// The BLE role of a device. Only the Master (Central) role is implemented by this stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Central: scans, initiates connections, and arbitrates connection timing.
    Master,
    /// Peripheral: advertises and accepts connections. Not implemented; selecting this role is
    /// rejected at the API boundary.
    Slave,
}

/// Coarse Link-Layer state, following the connection state machine of the Link Layer
/// specification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Initiating,
    Connecting,
    Connected,
    Disconnecting,
}

/// An advertisement heard while scanning.
#[derive(Debug, Copy, Clone)]
pub struct AdvReport {
    /// Address of the advertiser.
    pub peer: DeviceAddress,
    /// Advertising PDU type that carried the report.
    pub pdu_type: PduType,
    /// Received signal strength in dBm.
    pub rssi: i8,
    /// Channel the advertisement arrived on. `CONNECT_REQ` goes out on the same channel.
    pub channel: AdvertisingChannel,
}

/// Something the Link-Layer wants the upper layers to know about.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The first packet from the peer arrived; the connection is established.
    Established,
    /// A data PDU arrived; fetch it with [`LinkLayer::rx_pdu`].
    Data,
    /// The connection ended, carrying the controller error code naming the reason.
    Disconnected {
        reason: u8,
    },
}

enum State {
    Idle,
    Scanning(Scanner),
    Connection { conn: Connection },
}

struct Scanner {
    channel: AdvertisingChannel,
    switch_at: Instant,
    /// Set once a report has been returned, while the caller decides whether to initiate.
    hit: bool,
}

/// Connection-parameter set used when initiating.
///
/// All values use the raw on-air units of the `CONNECT_REQ` PDU (1.25 ms for the interval and
/// window fields, 10 ms for the supervision timeout).
#[derive(Debug, Copy, Clone)]
pub struct ConnectionParameters {
    /// Connection interval in 1.25 ms units. Valid range 6..=3200 (7.5 ms to 4 s).
    pub interval: u16,
    /// Slave latency in connection events.
    pub latency: u16,
    /// Supervision timeout in 10 ms units. Valid range 10..=3200 (100 ms to 32 s).
    pub timeout: u16,
    /// Transmit window size in 1.25 ms units.
    pub win_size: u8,
    /// Transmit window offset in 1.25 ms units.
    pub win_offset: u16,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            interval: 40, // 50 ms
            latency: 0,
            timeout: 200, // 2 s
            win_size: 2,
            win_offset: 0,
        }
    }
}

impl ConnectionParameters {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !(6..=3200).contains(&self.interval)
            || !(10..=3200).contains(&self.timeout)
            || self.win_size == 0
            || u16::from(self.win_size) > self.interval
        {
            return Err(Error::Param);
        }
        Ok(())
    }
}

/// Implementation of the Central-side BLE Link-Layer logic.
///
/// Users of this struct must provide the platform services declared by [`Config`].
pub struct LinkLayer<C: Config> {
    dev_addr: DeviceAddress,
    state: State,
    _p: PhantomData<C>,
}

impl<C: Config> LinkLayer<C> {
    /// Creates a new Link-Layer with the given local device address.
    pub fn new(dev_addr: DeviceAddress) -> Self {
        trace!("new LinkLayer, dev={:?}", dev_addr);
        Self {
            dev_addr,
            state: State::Idle,
            _p: PhantomData,
        }
    }

    /// Returns the local device address.
    pub fn device_address(&self) -> DeviceAddress {
        self.dev_addr
    }

    /// Returns the coarse connection state.
    pub fn state(&self) -> ConnectionState {
        match &self.state {
            State::Idle => ConnectionState::Idle,
            State::Scanning(s) if s.hit => ConnectionState::Initiating,
            State::Scanning(_) => ConnectionState::Scanning,
            State::Connection { conn } if conn.disconnecting() => ConnectionState::Disconnecting,
            State::Connection { conn } if conn.is_established() => ConnectionState::Connected,
            State::Connection { .. } => ConnectionState::Connecting,
        }
    }

    /// Returns a reference to the connection state, if currently in a connection.
    pub fn connection(&self) -> Option<&Connection> {
        match &self.state {
            State::Connection { conn } => Some(conn),
            _ => None,
        }
    }

    /// Starts listening for advertisements on channel 37.
    ///
    /// Fails with `Error::Busy` unless the Link-Layer is idle.
    pub fn start_scan(
        &mut self,
        radio: &mut C::Radio,
        timer: &mut C::Timer,
    ) -> Result<(), Error> {
        match self.state {
            State::Idle => {}
            _ => return Err(Error::Busy),
        }

        let channel = AdvertisingChannel::first();
        Self::prepare_advertising_channel(radio, channel)?;
        radio.set_access_address(advertising::ACCESS_ADDRESS)?;
        radio.set_crc_init(advertising::CRC_PRESET)?;

        debug!("scan started");
        self.state = State::Scanning(Scanner {
            channel,
            switch_at: timer.now() + SCAN_CHANNEL_INTERVAL,
            hit: false,
        });
        Ok(())
    }

    /// Stops scanning and returns to idle. No-op when not scanning.
    pub fn stop_scan(&mut self, radio: &mut C::Radio) -> Result<(), Error> {
        if let State::Scanning(_) = self.state {
            radio.standby()?;
            self.state = State::Idle;
        }
        Ok(())
    }

    /// Listens for one bounded stretch and reports a connectable advertisement, if one arrived.
    ///
    /// Advances through the advertising channels on the scan cadence. Returns `Ok(None)` when
    /// nothing (or nothing connectable) was received; call it again to keep scanning.
    pub fn poll_scan(
        &mut self,
        radio: &mut C::Radio,
        timer: &mut C::Timer,
    ) -> Result<Option<AdvReport>, Error> {
        let scanner = match &mut self.state {
            State::Scanning(s) => s,
            _ => return Err(Error::NotConnected),
        };

        let now = timer.now();
        if now >= scanner.switch_at {
            scanner.channel = scanner.channel.cycle();
            scanner.switch_at = now + SCAN_CHANNEL_INTERVAL;
            Self::prepare_advertising_channel(radio, scanner.channel)?;
        }

        let window = scanner.switch_at.duration_since(now);
        radio.receive(window.whole_millis().max(1))?;
        let deadline = now + window + Duration::from_millis(2);
        let irq = match connection::wait_irq(
            radio,
            timer,
            Irq::RX_DONE | Irq::CRC_ERROR | Irq::RX_TIMEOUT,
            deadline,
        ) {
            Ok(irq) => irq,
            Err(Error::Timeout) => return Ok(None),
            Err(e) => return Err(e),
        };

        if !irq.contains(Irq::RX_DONE) {
            return Ok(None);
        }

        let mut raw_header = [0; 2];
        radio.read_buffer(0, &mut raw_header)?;
        let header = advertising::Header::parse(&raw_header);
        if !header.type_().is_connectable() {
            return Ok(None);
        }

        let len = usize::from(header.payload_length().min(37));
        let mut payload = [0; 37];
        radio.read_buffer(2, &mut payload[..len])?;

        let peer = match advertising::advertiser_address(header, &payload[..len]) {
            Ok(addr) => addr,
            Err(_) => return Ok(None),
        };
        let rssi = radio.rssi().unwrap_or(i8::min_value());

        trace!("ADV<- {:?} from {:?} ({} dBm)", header, peer, rssi);

        scanner.hit = true;
        Ok(Some(AdvReport {
            peer,
            pdu_type: header.type_(),
            rssi,
            channel: scanner.channel,
        }))
    }

    /// Transmits a `CONNECT_REQ` answering `report` and switches into the new connection.
    ///
    /// Access address, CRC initialization value and hop increment are freshly generated from the
    /// registered RNG. The first connection event is scheduled 1.25 ms plus the transmit window
    /// offset after the request leaves the air.
    pub fn initiate(
        &mut self,
        radio: &mut C::Radio,
        timer: &mut C::Timer,
        rng: &mut C::Rng,
        report: &AdvReport,
        params: &ConnectionParameters,
    ) -> Result<(), Error> {
        match &self.state {
            State::Scanning(_) => {}
            _ => return Err(Error::Busy),
        }
        params.validate()?;

        let request = ConnectRequest {
            init_addr: self.dev_addr,
            adv_addr: report.peer,
            access_address: access_address::generate(rng),
            crc_init: rng.next_u32() & 0x00FF_FFFF,
            win_size: params.win_size,
            win_offset: params.win_offset,
            interval: params.interval,
            latency: params.latency,
            timeout: params.timeout,
            channel_map: ChannelMap::with_all_channels(),
            hop: 5 + (rng.next_u32() % 12) as u8,
            sca: 0,
        };

        debug!("CONNECT_REQ-> {:?}", request);

        // The request goes out on the channel the advertisement came in on; the radio is still
        // tuned to it from the scan.
        let header = request.header();
        let mut pdu = [0; 2 + advertising::CONNECT_REQ_PDU_SIZE as usize];
        pdu[..2].copy_from_slice(&header.to_u16().to_le_bytes());
        let mut writer = ByteWriter::new(&mut pdu[2..]);
        request.to_bytes(&mut writer)?;
        radio.write_buffer(0, &pdu)?;

        radio.transmit()?;
        let deadline = timer.now() + Duration::from_millis(2);
        connection::wait_irq(radio, timer, Irq::TX_DONE, deadline)?;
        let tx_end = timer.now();
        radio.standby()?;

        let conn = Connection::create(&request, tx_end);
        conn.configure_radio(&mut *radio)?;
        self.state = State::Connection { conn };
        Ok(())
    }

    /// Runs one connection event and translates its outcome into a [`LinkEvent`].
    ///
    /// On `LinkEvent::Disconnected` the Link-Layer has already returned to idle.
    pub fn conn_event(
        &mut self,
        radio: &mut C::Radio,
        timer: &mut C::Timer,
    ) -> Result<Option<LinkEvent>, Error> {
        let conn = match &mut self.state {
            State::Connection { conn } => conn,
            _ => return Err(Error::NotConnected),
        };

        match conn.conn_event::<C>(radio, timer) {
            Ok(EventOutcome::Continue {
                new_data,
                established,
            }) => Ok(if new_data {
                Some(LinkEvent::Data)
            } else if established {
                Some(LinkEvent::Established)
            } else {
                None
            }),
            Ok(EventOutcome::Closed { reason }) => {
                debug!("connection closed, reason {:#04x}", reason);
                let _ = radio.standby();
                self.state = State::Idle;
                Ok(Some(LinkEvent::Disconnected { reason }))
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the payload received by the connection event that reported [`LinkEvent::Data`].
    pub fn rx_pdu(&self) -> Result<(Llid, &[u8]), Error> {
        match &self.state {
            State::Connection { conn } => Ok(conn.rx_pdu()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Queues an outgoing data-channel payload (an L2CAP fragment).
    pub fn enqueue(&mut self, llid: Llid, payload: &[u8]) -> Result<(), Error> {
        match &mut self.state {
            State::Connection { conn } => conn.enqueue(llid, payload),
            _ => Err(Error::NotConnected),
        }
    }

    /// Begins a graceful disconnect with the given reason code.
    ///
    /// The connection keeps running until the peer acknowledges the `LL_TERMINATE_IND`, which
    /// surfaces as `LinkEvent::Disconnected` from a subsequent [`conn_event`](Self::conn_event)
    /// call. Fails with `Error::Busy` while an unacknowledged PDU occupies the radio buffer; run
    /// another connection event and retry.
    pub fn disconnect(&mut self, reason: u8) -> Result<(), Error> {
        match &mut self.state {
            State::Connection { conn } => conn.begin_disconnect(reason),
            _ => Err(Error::NotConnected),
        }
    }

    /// Drops any connection or scan state and returns to idle without notifying the peer.
    ///
    /// Used as the last resort when a graceful disconnect cannot complete.
    pub fn force_idle(&mut self, radio: &mut C::Radio) {
        let _ = radio.standby();
        self.state = State::Idle;
    }

    fn prepare_advertising_channel(
        radio: &mut C::Radio,
        channel: AdvertisingChannel,
    ) -> Result<(), Error> {
        radio.set_frequency(channel.freq_hz())?;
        radio.set_whitening_seed(channel.whitening_iv())?;
        Ok(())
    }
}
