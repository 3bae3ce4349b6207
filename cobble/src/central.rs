//! The host-side glue: application state machine, blocking GATT operations, and the callback
//! table.
//!
//! [`Central`] owns the platform services and every protocol layer, and drives the Link-Layer
//! event loop from blocking calls: `connect` runs the scanner and initiator until a connection is
//! established, `send_text` pushes chunked writes through the ATT client, and each of them keeps
//! servicing connection events (acknowledgements, retransmissions, notifications) while it waits.
//!
//! Applications observe the stack through the [`Hooks`] trait, a typed callback table whose
//! methods all default to no-ops.

use crate::att::{self, AttPdu, Handle, Served};
use crate::config::Config;
use crate::gatt::{
    self, PeripheralKind, ProfileHandles, CCCD_ENABLE_NOTIFICATIONS, DEVICE_NAME_HANDLE,
    DISCOVERY_RANGE, PRIMARY_SERVICE, WRITE_CHUNK_SPACING,
};
use crate::l2cap::{self, Channel, Fragments, Reassembler};
use crate::link::advertising::PduType;
use crate::link::data::{MAX_PAYLOAD, MIN_PAYLOAD};
use crate::link::{
    ConnectionParameters, DeviceAddress, LinkEvent, LinkLayer, Role,
    REASON_REMOTE_USER_TERMINATED,
};
use crate::radio::Radio;
use crate::time::{Duration, Instant, Timer};
use crate::utils::HexSlice;
use crate::Error;
use heapless::{Deque, Vec};

/// An attribute value, sized for the largest supported MTU.
pub type AttValue = Vec<u8, { att::MTU_MAX as usize }>;

/// Cool-down spent in the `Error` state before returning to `Idle`.
const ERROR_COOLDOWN: Duration = Duration::from_secs(3);

/// Application-level state of the host.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AppState {
    /// Platform services handed over, radio not yet configured.
    Init,
    /// Ready; no radio activity.
    Idle,
    /// Listening for the target's advertisements.
    Scanning,
    /// CONNECT_REQ sent, waiting for the link to come up.
    Connecting,
    /// Link established and serviced.
    Connected,
    /// A text payload is being pushed.
    Sending,
    /// Graceful termination in flight.
    Disconnecting,
    /// A connection attempt failed terminally; cooling down before returning to `Idle`.
    Error,
}

/// Configuration of the host stack.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// BLE role. Only [`Role::Master`] is accepted.
    pub role: Role,
    /// Local device address; a random static address is generated when absent.
    pub local_addr: Option<DeviceAddress>,
    /// Parameters for initiated connections.
    pub connection: ConnectionParameters,
    /// How long a single scan attempt may take before it counts as a failed attempt.
    pub scan_timeout: Duration,
    /// Client RX MTU announced during the MTU exchange, 23..=247.
    pub mtu: u16,
    /// Link-Layer payload budget for outgoing L2CAP fragments, 27..=251.
    pub fragment_size: usize,
    /// Scan attempts after the first before a connect call gives up.
    pub max_retry_count: u8,
    /// Back-off delay between connect attempts.
    pub retry_delay: Duration,
    /// Reconnect to the last target after an unsolicited disconnect (serviced by
    /// [`Central::poll`]).
    pub auto_reconnect: bool,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            local_addr: None,
            connection: ConnectionParameters::default(),
            scan_timeout: Duration::from_secs(10),
            mtu: att::MTU_MIN,
            fragment_size: MIN_PAYLOAD,
            max_retry_count: 3,
            retry_delay: Duration::from_millis(500),
            auto_reconnect: false,
        }
    }
}

impl CentralConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.role != Role::Master {
            return Err(Error::Param);
        }
        if !(att::MTU_MIN..=att::MTU_MAX).contains(&self.mtu) {
            return Err(Error::Param);
        }
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&self.fragment_size) {
            return Err(Error::Param);
        }
        self.connection.validate()
    }
}

/// Typed callback table populated at initialization. Unimplemented methods are no-ops.
pub trait Hooks {
    /// A connection to `peer` has been established.
    fn on_connected(&mut self, _peer: &DeviceAddress) {}

    /// The connection ended; `reason` is the controller error code (0x08 supervision timeout,
    /// 0x13 user termination, ...).
    fn on_disconnected(&mut self, _reason: u8) {}

    /// A notification or indication arrived on `handle`.
    fn on_notification(&mut self, _handle: Handle, _value: &[u8]) {}

    /// Widens the scan filter: return `true` to connect to an advertiser other than the
    /// requested target.
    fn accept_advertiser(&mut self, _peer: &DeviceAddress, _pdu_type: PduType) -> bool {
        false
    }

    /// Runs the peripheral's proprietary authentication exchange.
    ///
    /// Called after profile selection and before the first payload write, only for peripherals
    /// that require it. The default implementation does nothing, which is correct for open
    /// peripherals and leaves authenticated ones (Xiaomi) to the application.
    fn authenticate(
        &mut self,
        _kind: PeripheralKind,
        _gatt: &mut dyn GattExchange,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// A `Hooks` implementation that leaves every callback at its default.
pub struct NoHooks;

impl Hooks for NoHooks {}

/// GATT primitives handed to [`Hooks::authenticate`].
///
/// The authentication hook runs in the middle of a blocking host operation, so it gets its own
/// narrow window into the stack instead of the full [`Central`] API.
pub trait GattExchange {
    /// Reads an attribute value.
    fn read(&mut self, handle: Handle) -> Result<AttValue, Error>;

    /// Writes an attribute value (acknowledged Write Request).
    fn write(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error>;

    /// Writes an attribute value without acknowledgement (Write Command).
    fn write_cmd(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error>;

    /// Enables notifications by writing `0x0001` to the given CCCD.
    fn enable_notifications(&mut self, cccd: Handle) -> Result<(), Error>;

    /// Waits for the next notification/indication, servicing the connection meanwhile.
    fn read_notification(&mut self, timeout: Duration) -> Result<(Handle, AttValue), Error>;
}

struct Notification {
    handle: Handle,
    value: AttValue,
}

/// The BLE Central host stack.
pub struct Central<C: Config> {
    radio: C::Radio,
    timer: C::Timer,
    rng: C::Rng,
    ll: LinkLayer<C>,
    reassembler: Reassembler,
    att: att::Client,
    notifications: Deque<Notification, 4>,
    profile: Option<(PeripheralKind, ProfileHandles)>,
    state: AppState,
    error_since: Option<Instant>,
    target: Option<DeviceAddress>,
    reconnect_wanted: bool,
    local_disconnect: bool,
    unreported_disconnect: Option<u8>,
    config: CentralConfig,
}

impl<C: Config> Central<C> {
    /// Initializes the host stack and puts the radio into BLE mode.
    ///
    /// Rejects configurations requesting the Slave role or out-of-range parameters with
    /// `Error::Param`.
    pub fn new(
        radio: C::Radio,
        timer: C::Timer,
        mut rng: C::Rng,
        config: CentralConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let local_addr = config
            .local_addr
            .unwrap_or_else(|| DeviceAddress::random_static(&mut rng));

        let mut this = Self {
            radio,
            timer,
            rng,
            ll: LinkLayer::new(local_addr),
            reassembler: Reassembler::new(),
            att: att::Client::new(),
            notifications: Deque::new(),
            profile: None,
            state: AppState::Init,
            error_since: None,
            target: None,
            reconnect_wanted: false,
            local_disconnect: false,
            unreported_disconnect: None,
            config,
        };

        this.radio.enter_ble_mode()?;
        this.state = AppState::Idle;
        info!("central up, local address {:?}", local_addr);
        Ok(this)
    }

    /// Returns the application state.
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Returns the Link-Layer, for inspection of the connection context.
    pub fn link(&self) -> &LinkLayer<C> {
        &self.ll
    }

    /// Returns the detected peripheral kind, once profile selection has run.
    pub fn profile(&self) -> Option<PeripheralKind> {
        self.profile.map(|(kind, _)| kind)
    }

    /// Returns the ATT MTU in force.
    pub fn mtu(&self) -> u16 {
        self.att.mtu()
    }

    /// Scans for `target` and connects to it, retrying per the configured policy.
    ///
    /// Blocks until the connection is established or every attempt failed. On terminal failure
    /// the host enters the `Error` state and cools down before accepting new commands.
    pub fn connect<H: Hooks>(
        &mut self,
        hooks: &mut H,
        target: DeviceAddress,
    ) -> Result<(), Error> {
        match self.state {
            AppState::Idle => {}
            _ => return Err(Error::Busy),
        }

        self.target = Some(target);
        self.local_disconnect = false;

        let mut attempt = 0;
        loop {
            self.state = AppState::Scanning;
            match self.try_connect(hooks, target) {
                Ok(()) => {
                    self.state = AppState::Connected;
                    hooks.on_connected(&target);
                    return Ok(());
                }
                Err(e) => {
                    self.ll.force_idle(&mut self.radio);
                    self.att.reset();
                    self.reassembler.reset();
                    attempt += 1;
                    if attempt > self.config.max_retry_count {
                        warn!("connect failed terminally: {:?}", e);
                        self.enter_error();
                        return Err(e);
                    }
                    debug!("connect attempt {} failed ({:?}), retrying", attempt, e);
                    self.timer
                        .delay_micros(self.config.retry_delay.as_micros());
                }
            }
        }
    }

    fn try_connect<H: Hooks>(&mut self, hooks: &mut H, target: DeviceAddress) -> Result<(), Error> {
        self.ll.start_scan(&mut self.radio, &mut self.timer)?;

        let deadline = self.timer.now() + self.config.scan_timeout;
        let report = loop {
            if let Some(report) = self.ll.poll_scan(&mut self.radio, &mut self.timer)? {
                if report.peer == target || hooks.accept_advertiser(&report.peer, report.pdu_type)
                {
                    break report;
                }
            }
            if self.timer.now() >= deadline {
                self.ll.stop_scan(&mut self.radio)?;
                return Err(Error::Timeout);
            }
        };

        info!("initiating to {:?} ({} dBm)", report.peer, report.rssi);
        self.ll.initiate(
            &mut self.radio,
            &mut self.timer,
            &mut self.rng,
            &report,
            &self.config.connection,
        )?;
        self.state = AppState::Connecting;

        loop {
            match self.drive_event()? {
                Some(LinkEvent::Established) | Some(LinkEvent::Data) => return Ok(()),
                Some(LinkEvent::Disconnected { .. }) => {
                    // Attempt-internal failure; retried by the caller, not reported as a
                    // disconnect of an established link.
                    self.unreported_disconnect = None;
                    self.reconnect_wanted = false;
                    return Err(Error::Timeout);
                }
                _ => {}
            }
        }
    }

    /// Negotiates the ATT MTU configured in [`CentralConfig::mtu`] and returns the agreed value.
    pub fn exchange_mtu<H: Hooks>(&mut self, hooks: &mut H) -> Result<u16, Error> {
        let result = self.request(&AttPdu::ExchangeMtuReq {
            mtu: self.config.mtu,
        });
        self.settle(hooks);
        result.map(|_| self.att.mtu())
    }

    /// Reads the value of `handle`.
    pub fn read<H: Hooks>(&mut self, hooks: &mut H, handle: Handle) -> Result<AttValue, Error> {
        let result = self.read_inner(handle);
        self.settle(hooks);
        result
    }

    /// Writes `value` to `handle` with an acknowledged Write Request.
    pub fn write<H: Hooks>(
        &mut self,
        hooks: &mut H,
        handle: Handle,
        value: &[u8],
    ) -> Result<(), Error> {
        let result = self
            .request(&AttPdu::WriteReq {
                handle,
                value: HexSlice(value),
            })
            .map(|_| ());
        self.settle(hooks);
        result
    }

    /// Writes `value` to `handle` fire-and-forget (Write Command).
    pub fn write_cmd<H: Hooks>(
        &mut self,
        hooks: &mut H,
        handle: Handle,
        value: &[u8],
    ) -> Result<(), Error> {
        let result = self.write_cmd_inner(handle, value);
        self.settle(hooks);
        result
    }

    /// Subscribes to notifications from the detected profile's RX characteristic.
    pub fn enable_notifications<H: Hooks>(&mut self, hooks: &mut H) -> Result<(), Error> {
        let result = (|| {
            let (_, handles) = self.ensure_profile()?;
            self.request(&AttPdu::WriteReq {
                handle: handles.cccd,
                value: HexSlice(&CCCD_ENABLE_NOTIFICATIONS),
            })
            .map(|_| ())
        })();
        self.settle(hooks);
        result
    }

    /// Pushes a text payload to the peripheral's TX characteristic.
    ///
    /// Runs profile selection on first use, then the authentication hook when the profile
    /// demands one, then writes the text in MTU-sized chunks with acknowledged writes and the
    /// standard inter-chunk spacing.
    pub fn send_text<H: Hooks>(&mut self, hooks: &mut H, text: &str) -> Result<(), Error> {
        if self.state != AppState::Connected {
            return Err(Error::NotConnected);
        }
        if text.is_empty() {
            return Err(Error::Param);
        }

        self.state = AppState::Sending;
        let result = self.send_text_inner(hooks, text);
        if self.state == AppState::Sending {
            self.state = AppState::Connected;
        }
        self.settle(hooks);
        result
    }

    fn send_text_inner<H: Hooks>(&mut self, hooks: &mut H, text: &str) -> Result<(), Error> {
        let (kind, handles) = self.ensure_profile()?;

        if kind.requires_authentication() {
            debug!("running authentication hook for {:?}", kind);
            let mut exchange = ExchangeImpl { central: self };
            hooks.authenticate(kind, &mut exchange)?;
        }

        let mtu = self.att.mtu();
        for chunk in gatt::TextChunks::new(text, mtu) {
            self.request(&AttPdu::WriteReq {
                handle: handles.tx_char,
                value: HexSlice(chunk),
            })?;
            self.timer.delay_micros(WRITE_CHUNK_SPACING.as_micros());
        }
        Ok(())
    }

    /// Gracefully terminates the connection (reason 0x13, remote user terminated).
    pub fn disconnect<H: Hooks>(&mut self, hooks: &mut H) -> Result<(), Error> {
        if self.ll.connection().is_none() {
            return Err(Error::NotConnected);
        }

        self.state = AppState::Disconnecting;
        self.local_disconnect = true;
        let deadline = self.timer.now() + self.supervision_timeout();

        // An unacknowledged PDU may still occupy the radio buffer; keep the events rolling until
        // the termination request can be queued.
        while self.ll.connection().is_some() {
            match self.ll.disconnect(REASON_REMOTE_USER_TERMINATED) {
                Ok(()) => break,
                Err(Error::Busy) => {
                    self.drive_event()?;
                }
                Err(Error::NotConnected) => break,
                Err(e) => return Err(e),
            }
            if self.timer.now() >= deadline {
                break;
            }
        }

        while self.ll.connection().is_some() {
            if self.timer.now() >= deadline {
                debug!("termination unacknowledged, dropping link");
                self.ll.force_idle(&mut self.radio);
                self.finish_disconnect(REASON_REMOTE_USER_TERMINATED);
                break;
            }
            self.drive_event()?;
        }

        self.state = AppState::Idle;
        self.settle(hooks);
        Ok(())
    }

    /// Services the stack while the application has nothing else to do.
    ///
    /// Keeps an established connection alive (acknowledgements, notifications, supervision),
    /// ages out the error cool-down, and performs the configured auto-reconnect.
    pub fn poll<H: Hooks>(&mut self, hooks: &mut H) -> Result<(), Error> {
        match self.state {
            AppState::Connected => {
                self.drive_event()?;
                self.settle(hooks);
                Ok(())
            }
            AppState::Error => {
                if let Some(since) = self.error_since {
                    if self.timer.now().duration_since(since) >= ERROR_COOLDOWN {
                        self.error_since = None;
                        self.state = AppState::Idle;
                        debug!("error cool-down over");
                    }
                }
                Ok(())
            }
            AppState::Idle => {
                if self.reconnect_wanted && self.config.auto_reconnect {
                    if let Some(target) = self.target {
                        self.reconnect_wanted = false;
                        info!("auto-reconnecting to {:?}", target);
                        return self.connect(hooks, target);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn read_inner(&mut self, handle: Handle) -> Result<AttValue, Error> {
        let rsp = self.request(&AttPdu::ReadReq { handle })?;
        AttValue::from_slice(&rsp[1..]).map_err(|()| Error::InvalidLength)
    }

    fn write_cmd_inner(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error> {
        let mut buf = [0; att::MTU_MAX as usize];
        let len = self.att.encode_outgoing(
            &AttPdu::WriteCommand {
                handle,
                value: HexSlice(value),
            },
            self.timer.now(),
            &mut buf,
        )?;
        self.send_att(&buf[..len])?;
        self.flush_tx()
    }

    /// Runs profile selection: Device Name first, primary-service lookup as the fallback.
    fn ensure_profile(&mut self) -> Result<(PeripheralKind, ProfileHandles), Error> {
        if let Some(profile) = self.profile {
            return Ok(profile);
        }

        let kind = match self.request(&AttPdu::ReadReq {
            handle: DEVICE_NAME_HANDLE,
        }) {
            Ok(rsp) => {
                let name = core::str::from_utf8(&rsp[1..]).unwrap_or("");
                debug!("device name: {:?}", name);
                PeripheralKind::from_device_name(name)
            }
            Err(Error::Protocol(_)) | Err(Error::Timeout) => {
                debug!("device name unreadable, falling back to service lookup");
                let rsp = self.request(&AttPdu::ReadByTypeReq {
                    handle_range: DISCOVERY_RANGE,
                    attribute_type: PRIMARY_SERVICE,
                })?;
                if rsp.len() < 2 {
                    return Err(Error::InvalidLength);
                }
                gatt::match_services(rsp[1], &rsp[2..])?.unwrap_or(PeripheralKind::Custom)
            }
            Err(e) => return Err(e),
        };

        let handles = kind.handles();
        info!("profile selected: {:?}", kind);
        self.profile = Some((kind, handles));
        Ok((kind, handles))
    }

    /// Issues one ATT request and drives connection events until its response arrives.
    ///
    /// Returns the raw response PDU. The request times out per the ATT request timeout without
    /// tearing down the connection; a disconnect while waiting fails with `Error::NotConnected`.
    fn request(&mut self, pdu: &AttPdu<'_>) -> Result<AttValue, Error> {
        if self.ll.connection().is_none() {
            return Err(Error::NotConnected);
        }

        let mut buf = [0; att::MTU_MAX as usize];
        let len = self
            .att
            .encode_outgoing(pdu, self.timer.now(), &mut buf)?;
        self.send_att(&buf[..len])?;

        if pdu.opcode().response_opcode().is_none() {
            self.flush_tx()?;
            return Ok(AttValue::new());
        }

        loop {
            match self.drive_event() {
                Ok(Some(LinkEvent::Disconnected { .. })) => return Err(Error::NotConnected),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
            if let Some(rsp) = self.att.take_response() {
                return Ok(rsp);
            }
            self.att.poll_timeout(self.timer.now())?;
        }
    }

    /// Frames an ATT PDU for L2CAP and queues its Link-Layer fragments.
    fn send_att(&mut self, att_pdu: &[u8]) -> Result<(), Error> {
        let mut frame_buf = [0; l2cap::MAX_FRAME];
        let len = l2cap::frame(Channel::ATT, att_pdu, &mut frame_buf)?;
        for (llid, chunk) in Fragments::new(&frame_buf[..len], self.config.fragment_size) {
            self.ll.enqueue(llid, chunk)?;
        }
        Ok(())
    }

    /// Drives connection events until the TX queue has drained.
    fn flush_tx(&mut self) -> Result<(), Error> {
        while self
            .ll
            .connection()
            .map_or(false, |conn| !conn.tx_idle())
        {
            if let Some(LinkEvent::Disconnected { .. }) = self.drive_event()? {
                return Err(Error::NotConnected);
            }
        }
        Ok(())
    }

    /// Runs one connection event and feeds whatever it produced into L2CAP and ATT.
    fn drive_event(&mut self) -> Result<Option<LinkEvent>, Error> {
        let event = self.ll.conn_event(&mut self.radio, &mut self.timer)?;

        match event {
            Some(LinkEvent::Data) => {
                let mut pdu_buf = [0; l2cap::MAX_FRAME];
                let pdu_len = {
                    let (llid, payload) = self.ll.rx_pdu()?;
                    match self.reassembler.push(llid, payload) {
                        Ok(Some(frame)) => {
                            let len = frame.payload.len();
                            pdu_buf[..len].copy_from_slice(frame.payload);
                            len
                        }
                        Ok(None) => return Ok(event),
                        Err(e) => {
                            warn!("reassembly failed: {:?}", e);
                            self.reassembler.reset();
                            return Ok(event);
                        }
                    }
                };

                let mut confirmation_due = false;
                match self.att.process(&pdu_buf[..pdu_len]) {
                    Ok(Served::ResponseReady) | Ok(Served::Ignored) => {}
                    Ok(Served::Notification { handle, value }) => {
                        self.queue_notification(handle, value);
                    }
                    Ok(Served::Indication { handle, value }) => {
                        self.queue_notification(handle, value);
                        confirmation_due = true;
                    }
                    Err(e) => return Err(e),
                }

                if confirmation_due {
                    let mut buf = [0; 4];
                    let len = self.att.encode_outgoing(
                        &AttPdu::HandleValueConfirmation,
                        self.timer.now(),
                        &mut buf,
                    )?;
                    self.send_att(&buf[..len])?;
                }
            }
            Some(LinkEvent::Disconnected { reason }) => {
                self.finish_disconnect(reason);
            }
            _ => {}
        }

        Ok(event)
    }

    fn queue_notification(&mut self, handle: Handle, value: &[u8]) {
        let value = match AttValue::from_slice(value) {
            Ok(v) => v,
            Err(()) => {
                warn!("oversized notification on {:?}, dropping", handle);
                return;
            }
        };
        if self
            .notifications
            .push_back(Notification { handle, value })
            .is_err()
        {
            warn!("notification queue full, dropping value for {:?}", handle);
        }
    }

    /// Cleans up after the link went away, whatever the trigger was.
    fn finish_disconnect(&mut self, reason: u8) {
        self.att.reset();
        self.reassembler.reset();
        self.profile = None;
        self.unreported_disconnect = Some(reason);
        if !self.local_disconnect {
            self.reconnect_wanted = true;
        }
        if self.state != AppState::Disconnecting {
            self.state = AppState::Idle;
        }
    }

    /// Delivers queued notifications and a pending disconnect report to the hooks.
    fn settle<H: Hooks>(&mut self, hooks: &mut H) {
        while let Some(n) = self.notifications.pop_front() {
            hooks.on_notification(n.handle, &n.value);
        }
        if let Some(reason) = self.unreported_disconnect.take() {
            hooks.on_disconnected(reason);
        }
    }

    fn enter_error(&mut self) {
        self.state = AppState::Error;
        self.error_since = Some(self.timer.now());
    }

    fn supervision_timeout(&self) -> Duration {
        Duration::from_micros(u32::from(self.config.connection.timeout) * 10_000)
    }
}

struct ExchangeImpl<'a, C: Config> {
    central: &'a mut Central<C>,
}

impl<'a, C: Config> GattExchange for ExchangeImpl<'a, C> {
    fn read(&mut self, handle: Handle) -> Result<AttValue, Error> {
        self.central.read_inner(handle)
    }

    fn write(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error> {
        self.central
            .request(&AttPdu::WriteReq {
                handle,
                value: HexSlice(value),
            })
            .map(|_| ())
    }

    fn write_cmd(&mut self, handle: Handle, value: &[u8]) -> Result<(), Error> {
        self.central.write_cmd_inner(handle, value)
    }

    fn enable_notifications(&mut self, cccd: Handle) -> Result<(), Error> {
        self.write(cccd, &CCCD_ENABLE_NOTIFICATIONS)
    }

    fn read_notification(&mut self, timeout: Duration) -> Result<(Handle, AttValue), Error> {
        let deadline = self.central.timer.now() + timeout;
        loop {
            if let Some(n) = self.central.notifications.pop_front() {
                return Ok((n.handle, n.value));
            }
            if self.central.timer.now() >= deadline {
                return Err(Error::Timeout);
            }
            if let Some(LinkEvent::Disconnected { .. }) = self.central.drive_event()? {
                return Err(Error::NotConnected);
            }
        }
    }
}
