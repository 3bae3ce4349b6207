//! End-to-end scenarios against the scripted fake peripheral.

mod common;

use common::*;

use cobble::att::Handle;
use cobble::central::{AppState, CentralConfig, NoHooks};
use cobble::gatt::PeripheralKind;
use cobble::link::access_address;
use cobble::Error;

#[test]
fn happy_path_text_send() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();

    central.connect(&mut hooks, target_address()).unwrap();
    assert_eq!(central.state(), AppState::Connected);
    assert_eq!(hooks.connected.len(), 1);

    // The CONNECT_REQ that went out carries a valid generated access address and a hop increment
    // from the allowed range.
    {
        let peer = peer.borrow();
        let req = peer.connect_req.as_ref().expect("no CONNECT_REQ seen");
        assert!(access_address::is_valid(req.access_address));
        assert!((5..=16).contains(&req.hop));
        assert_eq!(req.channel_map.num_used_channels(), 37);
        assert_eq!(req.adv_addr, target_address());
    }

    assert_eq!(central.exchange_mtu(&mut hooks).unwrap(), 23);

    central.send_text(&mut hooks, "Hello").unwrap();
    assert_eq!(central.profile(), Some(PeripheralKind::NordicUart));
    {
        let peer = peer.borrow();
        assert_eq!(peer.writes.len(), 1);
        assert_eq!(peer.writes[0], (0x000E, b"Hello".to_vec()));
    }

    central.disconnect(&mut hooks).unwrap();
    assert_eq!(central.state(), AppState::Idle);
    assert_eq!(peer.borrow().terminate_reason, Some(0x13));
    assert_eq!(hooks.disconnects, vec![0x13]);
}

#[test]
fn crc_error_tolerance() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();

    peer.borrow_mut().corrupt_next = 3;

    for expected in 1..=3 {
        central.poll(&mut hooks).unwrap();
        let conn = central.link().connection().expect("connection dropped");
        assert_eq!(conn.consecutive_crc_errors(), expected);
    }

    // One clean event resets the streak; the connection survived throughout.
    central.poll(&mut hooks).unwrap();
    let conn = central.link().connection().expect("connection dropped");
    assert_eq!(conn.consecutive_crc_errors(), 0);
    assert_eq!(conn.total_crc_errors(), 3);
    assert_eq!(central.state(), AppState::Connected);
    assert!(hooks.disconnects.is_empty());
}

#[test]
fn supervision_timeout_disconnects_with_0x08() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();

    peer.borrow_mut().silent = true;

    // Default parameters: 2 s supervision timeout at a 50 ms interval.
    for _ in 0..100 {
        central.poll(&mut hooks).unwrap();
        if central.state() != AppState::Connected {
            break;
        }
    }

    assert_eq!(central.state(), AppState::Idle);
    assert_eq!(hooks.disconnects, vec![0x08]);
}

#[test]
fn connect_gives_up_after_retries_and_cools_down() {
    let (mut central, _peer, _clock) = build_central(CentralConfig::default(), |peer| {
        // Advertises, but never answers on the data channels: every attempt dies during
        // establishment.
        peer.silent = true;
    });
    let mut hooks = RecordingHooks::default();

    assert_eq!(
        central.connect(&mut hooks, target_address()).unwrap_err(),
        Error::Timeout
    );
    assert_eq!(central.state(), AppState::Error);
    assert!(hooks.connected.is_empty());
    assert!(hooks.disconnects.is_empty());

    // Commands are refused while cooling down; after the fixed 3 s the host returns to Idle.
    central.poll(&mut NoHooks).unwrap();
    assert_eq!(central.state(), AppState::Error);

    *_clock.borrow_mut() += 3_100_000;
    central.poll(&mut NoHooks).unwrap();
    assert_eq!(central.state(), AppState::Idle);
}

#[test]
fn mtu_write_fragmentation_five_chunks() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();
    central.exchange_mtu(&mut hooks).unwrap();

    let text: String = core::iter::repeat('x').take(100).collect();
    central.send_text(&mut hooks, &text).unwrap();

    let peer = peer.borrow();
    assert_eq!(peer.writes.len(), 5);
    for (handle, chunk) in &peer.writes {
        assert_eq!(*handle, 0x000E);
        assert_eq!(chunk.len(), 20);
    }
    let received: Vec<u8> = peer.writes.iter().flat_map(|(_, c)| c.clone()).collect();
    assert_eq!(received, text.as_bytes());
}

#[test]
fn fragmented_write_reassembles_at_the_peer() {
    let mut config = CentralConfig::default();
    config.mtu = 100;
    let (mut central, peer, _clock) = build_central(config, |peer| {
        peer.server_mtu = 100;
    });
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();
    assert_eq!(central.exchange_mtu(&mut hooks).unwrap(), 100);

    // 97 value bytes -> 100-byte ATT PDU -> 104-byte L2CAP frame -> four LL fragments.
    let value: Vec<u8> = (0..97u8).collect();
    central
        .write(&mut hooks, Handle::from_raw(0x000E), &value)
        .unwrap();

    let peer = peer.borrow();
    assert_eq!(peer.writes.len(), 1);
    assert_eq!(peer.writes[0].1, value);
}

#[test]
fn max_length_pdu_write_command() {
    let mut config = CentralConfig::default();
    config.mtu = 247;
    config.fragment_size = 251;
    let (mut central, peer, _clock) = build_central(config, |peer| {
        peer.server_mtu = 247;
    });
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();
    assert_eq!(central.exchange_mtu(&mut hooks).unwrap(), 247);

    // A 244-byte value makes a 247-byte ATT PDU and a 251-byte LL payload: the largest PDU the
    // stack supports, in a single fragment.
    let value = [0xAB; 244];
    central
        .write_cmd(&mut hooks, Handle::from_raw(0x000E), &value)
        .unwrap();

    let peer = peer.borrow();
    assert_eq!(peer.write_commands.len(), 1);
    assert_eq!(peer.write_commands[0].1, value.to_vec());
}

#[test]
fn empty_pdus_keep_the_link_alive() {
    let (mut central, _peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();

    let start = central.link().connection().unwrap().event_count();
    for _ in 0..10 {
        central.poll(&mut hooks).unwrap();
    }
    let conn = central.link().connection().unwrap();
    assert_eq!(conn.event_count(), start + 10);
    assert_eq!(conn.total_crc_errors(), 0);
    assert_eq!(central.state(), AppState::Connected);
}

#[test]
fn notifications_and_indications_reach_the_hooks() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();

    central.enable_notifications(&mut hooks).unwrap();
    {
        let peer = peer.borrow();
        // CCCD of the Nordic-UART layout, enable-notifications value.
        assert_eq!(peer.writes.last().unwrap(), &(0x0011, vec![0x01, 0x00]));
    }

    peer.borrow_mut()
        .pushes
        .push_back(notification_pdu(0x0010, &[0xAA, 0xBB]));
    peer.borrow_mut()
        .pushes
        .push_back(indication_pdu(0x0010, &[0xCC]));

    for _ in 0..6 {
        central.poll(&mut hooks).unwrap();
    }

    assert_eq!(
        hooks.notifications,
        vec![(0x0010, vec![0xAA, 0xBB]), (0x0010, vec![0xCC])]
    );
    assert_eq!(peer.borrow().confirmations, 1);
}

#[test]
fn profile_falls_back_to_service_discovery() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |peer| {
        peer.device_name = None;
        // One entry: handle 0x0020, service UUID 0xFEE0 (Xiaomi).
        peer.service_list_rsp = Some(vec![0x09, 4, 0x20, 0x00, 0xE0, 0xFE]);
    });
    let mut hooks = RecordingHooks::default();
    central.connect(&mut hooks, target_address()).unwrap();

    central.send_text(&mut hooks, "hi").unwrap();
    assert_eq!(central.profile(), Some(PeripheralKind::Xiaomi));

    // The Xiaomi layout routes payload writes to its own TX characteristic.
    let peer = peer.borrow();
    assert_eq!(peer.writes.last().unwrap().0, 0x0022);
}

#[test]
fn authentication_hook_runs_before_payload_writes() {
    let (mut central, peer, _clock) = build_central(CentralConfig::default(), |peer| {
        peer.device_name = Some(b"Mi Band 2".to_vec());
    });
    let mut hooks = RecordingHooks {
        auth_write: Some(vec![0xA5]),
        ..RecordingHooks::default()
    };
    central.connect(&mut hooks, target_address()).unwrap();

    central.send_text(&mut hooks, "hi").unwrap();
    assert_eq!(central.profile(), Some(PeripheralKind::Xiaomi));
    assert_eq!(hooks.auth_runs, 1);

    let peer = peer.borrow();
    assert_eq!(peer.writes[0], (0x0022, vec![0xA5]));
    assert_eq!(peer.writes[1], (0x0022, b"hi".to_vec()));
}

#[test]
fn scan_filter_hook_admits_other_advertisers() {
    let other = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
    let (mut central, _peer, _clock) = build_central(CentralConfig::default(), |peer| {
        peer.adv_addr = other;
    });
    let mut hooks = RecordingHooks {
        accept_any_advertiser: true,
        ..RecordingHooks::default()
    };

    // The requested target never advertises, but the filter hook lets the stray peripheral in.
    central.connect(&mut hooks, target_address()).unwrap();
    assert_eq!(central.state(), AppState::Connected);
}

#[test]
fn requests_require_a_connection() {
    let (mut central, _peer, _clock) = build_central(CentralConfig::default(), |_| {});
    let mut hooks = RecordingHooks::default();

    assert_eq!(
        central.exchange_mtu(&mut hooks).unwrap_err(),
        Error::NotConnected
    );
    assert_eq!(
        central.send_text(&mut hooks, "hi").unwrap_err(),
        Error::NotConnected
    );
    assert_eq!(central.disconnect(&mut hooks).unwrap_err(), Error::NotConnected);
}

#[test]
fn slave_role_is_rejected() {
    let mut config = CentralConfig::default();
    config.role = cobble::link::Role::Slave;

    let clock: SharedClock = std::rc::Rc::new(std::cell::RefCell::new(0));
    let peer = std::rc::Rc::new(std::cell::RefCell::new(PeripheralState::new()));
    let radio = MockRadio::new(peer, clock.clone());
    let timer = MockTimer::from_clock(clock);
    let err = cobble::central::Central::<TestConfig>::new(
        radio,
        timer,
        cobble::link::access_address::Lfsr::new(1),
        config,
    )
    .map(|_| ())
    .unwrap_err();
    assert_eq!(err, Error::Param);
}
