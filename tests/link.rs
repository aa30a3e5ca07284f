mod common;

use core::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use dswifi_link::{
    hardware::{rx_memory_offset, InterruptFlags, Register, RX_BUFFER_BEGIN, RX_BUFFER_END},
    sync::FrameNotifier,
    AssociationStatus, AuthLevel, ConnectParams, ControlBlock, DataRate, EngineConfig,
    PacketFlags, Ssid, Stat, WepMode, WiFiError, WifiHardware, WifiMode,
};

const AUTHENTICATION: u16 = 0x00b0;
const ASSOCIATION_REQUEST: u16 = 0x0000;
const NULL_DATA: u16 = 0x0148;
const EMPTY_TX_RING: usize = 24 * 1024 - 2;

fn params() -> ConnectParams {
    let mut base_rates = [0u8; 16];
    base_rates[..2].copy_from_slice(&[0x82, 0x84]);
    ConnectParams {
        bssid: AP_MAC,
        ap_mac: AP_MAC,
        channel: AP_CHANNEL,
        ssid: Ssid::new(b"TESTAP"),
        base_rates,
        ..ConnectParams::EMPTY
    }
}
fn data_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = management_frame(0x0208, &[]);
    frame.extend_from_slice(payload);
    frame
}
/// Run through open system authentication and association.
fn associated() -> Harness {
    let harness = Harness::enabled();
    harness.client.connect(&params(), false).unwrap();
    harness.tick();
    harness.receive(&authentication_response(0, 2, 0), 40);
    harness.receive(&association_response(0, 0xc001), 40);
    harness
}

#[test]
fn enable_starts_the_mac() {
    let harness = Harness::new();
    assert_eq!(harness.client.mode(), WifiMode::Disabled);
    assert_eq!(harness.client.mac_address(), OWN_MAC);

    harness.client.enable();
    harness.tick();
    assert_eq!(harness.client.mode(), WifiMode::Normal);
    harness.radio(|radio| {
        assert!(radio.powered);
        assert_eq!(radio.register(Register::MacAddress0), 0x0900);
        assert_ne!(radio.register(Register::InterruptEnable), 0);
    });
    assert_eq!(harness.client.stat(Stat::EngineUpdates), 1);
}

#[test]
fn open_system_association() {
    let harness = Harness::enabled();
    harness.client.connect(&params(), false).unwrap();
    assert_eq!(
        harness.client.association_status(),
        AssociationStatus::Searching
    );
    harness.tick();

    assert_eq!(harness.client.mode(), WifiMode::Associate);
    assert_eq!(
        harness.client.association_status(),
        AssociationStatus::Authenticating
    );
    harness.radio(|radio| {
        assert_eq!(radio.channel, AP_CHANNEL);
        assert_eq!(radio.sent.len(), 1);
        let request = &radio.sent[0];
        assert_eq!(request.frame_control(), AUTHENTICATION);
        assert_eq!(&request.bytes[4..10], &AP_MAC);
        assert_eq!(&request.bytes[10..16], &OWN_MAC);
        assert_eq!(request.u16_at(24), 0);
        assert_eq!(request.u16_at(26), 1);
    });

    harness.receive(&authentication_response(0, 2, 0), 40);
    assert_eq!(harness.client.auth_level(), AuthLevel::Authenticated);
    assert_eq!(
        harness.client.association_status(),
        AssociationStatus::Associating
    );
    harness.radio(|radio| {
        let requests = radio.sent_with(ASSOCIATION_REQUEST);
        assert_eq!(requests.len(), 1);
        // Capability, listen interval and the SSID element.
        assert_eq!(requests[0].u16_at(24), 0x0021);
        assert_eq!(&requests[0].bytes[28..36], b"\x00\x06TESTAP");
        assert_eq!(&requests[0].bytes[36..40], &[1, 2, 0x82, 0x04]);
    });

    harness.receive(&association_response(0, 0xc001), 40);
    assert_eq!(harness.client.mode(), WifiMode::Associated);
    assert_eq!(
        harness.client.association_status(),
        AssociationStatus::Associated
    );
    harness.radio(|radio| {
        assert_eq!(radio.sent_with(ASSOCIATION_REQUEST).len(), 1);
        assert_eq!(radio.register(Register::AssociationIdFull), 0xc001);
    });

    // Both responses were management frames, which pass the default filter.
    let mut buffer = [0u8; 64];
    let frame = harness.client.receive(&mut buffer).unwrap();
    assert_eq!(frame.length(), 30);
    assert_eq!(frame.rssi(), 40);
    assert_eq!(&buffer[..2], &AUTHENTICATION.to_le_bytes());
    assert!(harness.client.receive(&mut buffer).is_some());
    assert!(harness.client.receive(&mut buffer).is_none());
}

#[test]
fn rejected_association() {
    let harness = Harness::enabled();
    harness.client.connect(&params(), false).unwrap();
    harness.tick();
    harness.receive(&authentication_response(0, 2, 0), 40);
    harness.receive(&association_response(17, 0), 40);

    assert_eq!(harness.client.mode(), WifiMode::CannotAssociate);
    assert_eq!(
        harness.client.association_status(),
        AssociationStatus::CannotConnect
    );
    harness.ticks(100);
    assert_eq!(harness.client.mode(), WifiMode::CannotAssociate);

    harness.client.disconnect();
    harness.ticks(2);
    assert_eq!(harness.client.mode(), WifiMode::Normal);
    assert_eq!(
        harness.client.association_status(),
        AssociationStatus::Disconnected
    );
    assert_eq!(harness.client.auth_level(), AuthLevel::Disconnected);
}

#[test]
fn retries_run_out() {
    let harness = Harness::with_config(EngineConfig {
        max_association_retries: 3,
        ..Default::default()
    });
    harness.client.enable();
    harness.tick();
    harness.client.connect(&params(), false).unwrap();
    harness.tick();

    harness.ticks(83);
    assert_eq!(harness.client.mode(), WifiMode::Associate);
    harness.tick();
    assert_eq!(harness.client.mode(), WifiMode::CannotAssociate);
    harness.radio(|radio| assert_eq!(radio.sent_with(AUTHENTICATION).len(), 4));

    harness.ticks(100);
    harness.radio(|radio| assert_eq!(radio.sent_with(AUTHENTICATION).len(), 4));
}

#[test]
fn largest_retry_limit_still_gives_up() {
    let harness = Harness::with_config(EngineConfig {
        max_association_retries: u8::MAX,
        ..Default::default()
    });
    harness.client.enable();
    harness.tick();
    harness.client.connect(&params(), false).unwrap();
    harness.tick();

    harness.ticks(256 * 21 - 1);
    assert_eq!(harness.client.mode(), WifiMode::Associate);
    harness.tick();
    assert_eq!(harness.client.mode(), WifiMode::CannotAssociate);
    harness.radio(|radio| assert_eq!(radio.sent_with(AUTHENTICATION).len(), 256));
}

#[test]
fn frames_for_other_stations_are_ignored() {
    let harness = Harness::enabled();
    harness.client.connect(&params(), false).unwrap();
    harness.tick();

    let mut response = authentication_response(0, 2, 0);
    response[4..10].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
    harness.receive(&response, 40);
    assert_eq!(harness.client.auth_level(), AuthLevel::Disconnected);
    harness.radio(|radio| assert!(radio.sent_with(ASSOCIATION_REQUEST).is_empty()));
}

#[test]
fn shared_key_authentication() {
    let harness = Harness::enabled();
    let mut wep_key = [0u8; 20];
    wep_key[..5].copy_from_slice(b"12345");
    harness
        .client
        .connect(
            &ConnectParams {
                wep_mode: WepMode::Wep40,
                wep_key,
                ..params()
            },
            false,
        )
        .unwrap();
    harness.tick();
    harness.radio(|radio| {
        assert_eq!(radio.register(Register::WepControl), 0x8000);
        assert_eq!(radio.memory(0x1f80), u16::from_le_bytes(*b"12"));
        assert_eq!(radio.memory(0x1fe4), u16::from_le_bytes(*b"5\0"));
    });

    harness.receive(&authentication_response(0, 2, 13), 40);
    harness.radio(|radio| {
        let requests = radio.sent_with(AUTHENTICATION);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].u16_at(24), 1);
        assert_eq!(requests[1].u16_at(26), 1);
    });

    let challenge: Vec<u8> = (0..128).collect();
    let mut response = authentication_response(1, 2, 0);
    response.extend_from_slice(&[16, 128]);
    response.extend_from_slice(&challenge);
    harness.receive(&response, 40);
    harness.radio(|radio| {
        let replies = radio.sent_with(AUTHENTICATION | 0x4000);
        assert_eq!(replies.len(), 1);
        let reply = &replies[0].bytes;
        // Algorithm, sequence and status follow the IV.
        assert_eq!(&reply[28..34], &[1, 0, 3, 0, 0, 0]);
        assert_eq!(&reply[34..36], &[16, 128]);
        assert_eq!(&reply[36..164], &challenge[..]);
    });

    harness.receive(&authentication_response(1, 4, 0), 40);
    assert_eq!(harness.client.auth_level(), AuthLevel::Authenticated);
    harness.radio(|radio| assert_eq!(radio.sent_with(ASSOCIATION_REQUEST).len(), 1));
}

#[test]
fn deauthentication_restarts_authentication() {
    let harness = associated();
    harness.receive(&management_frame(0x00c0, &[1, 0]), 40);

    assert_eq!(harness.client.auth_level(), AuthLevel::Disconnected);
    assert_eq!(harness.client.mode(), WifiMode::Associate);
    harness.radio(|radio| assert_eq!(radio.sent_with(AUTHENTICATION).len(), 2));
}

#[test]
fn ad_hoc_skips_authentication() {
    let harness = Harness::enabled();
    harness.client.connect(&params(), true).unwrap();
    harness.ticks(2);

    assert_eq!(harness.client.mode(), WifiMode::Associated);
    harness.radio(|radio| assert!(radio.sent.is_empty()));
}

#[test]
fn keepalive_after_silence() {
    let harness = Harness::with_config(EngineConfig {
        keepalive_ticks: 5,
        ..Default::default()
    });
    harness.client.enable();
    harness.tick();
    harness.client.connect(&params(), false).unwrap();
    harness.tick();
    harness.receive(&authentication_response(0, 2, 0), 40);
    harness.receive(&association_response(0, 1), 40);
    assert_eq!(harness.client.mode(), WifiMode::Associated);

    harness.ticks(5);
    harness.radio(|radio| assert!(radio.sent_with(NULL_DATA).is_empty()));
    harness.tick();
    harness.radio(|radio| {
        let keepalives = radio.sent_with(NULL_DATA);
        assert_eq!(keepalives.len(), 1);
        assert_eq!(&keepalives[0].bytes[4..10], &AP_MAC);
        assert_eq!(&keepalives[0].bytes[16..22], &AP_MAC);
        // Negotiated through the 0x84 rate of the association response.
        assert_eq!(keepalives[0].rate, 0x14);
    });
}

#[test]
fn tx_ring_is_drained_by_the_pump() {
    let harness = Harness::enabled();
    let client = &harness.client;
    assert_eq!(client.bytes_available_for_transmit(), EMPTY_TX_RING);

    let payload: Vec<u8> = (0..64).collect();
    client.enqueue_transmit(&payload, DataRate::Auto).unwrap();
    assert_eq!(client.bytes_available_for_transmit(), EMPTY_TX_RING - 76);
    assert_eq!(client.stat(Stat::TxQueuedPackets), 1);
    assert_eq!(client.stat(Stat::TxQueuedBytes), 76);

    harness.tick();
    assert_eq!(client.bytes_available_for_transmit(), EMPTY_TX_RING);
    harness.radio(|radio| {
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].bytes, payload);
        assert_eq!(radio.sent[0].rate, 0x0a);
    });
    assert_eq!(client.stat(Stat::TxPackets), 1);
    assert_eq!(client.stat(Stat::TxDataBytes), 64);
}

#[test]
fn busy_hardware_holds_frames_back() {
    let harness = Harness::enabled();
    harness
        .client
        .enqueue_transmit(&[0x08, 0x02, 0, 0], DataRate::Rate2M)
        .unwrap();
    harness.radio(|radio| radio.tx_busy = true);
    harness.tick();
    harness.radio(|radio| assert!(radio.sent.is_empty()));

    harness.radio(|radio| {
        radio.tx_busy = false;
        radio.raise(InterruptFlags::new().with_tx_complete(true));
    });
    harness.interrupt();
    harness.radio(|radio| {
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].rate, 0x14);
    });
}

#[test]
fn bypass_queue_holds_one_frame() {
    let harness = Harness::enabled();
    harness.client.connect(&params(), false).unwrap();
    harness.radio(|radio| radio.tx_busy = true);
    harness.tick();
    harness.radio(|radio| assert!(radio.sent.is_empty()));

    // The association request doesn't fit behind the waiting authentication request.
    harness.receive(&authentication_response(0, 2, 0), 40);
    assert_eq!(harness.client.stat(Stat::TxBypassDropped), 1);

    harness.radio(|radio| {
        radio.tx_busy = false;
        radio.raise(InterruptFlags::new().with_tx_complete(true));
    });
    harness.interrupt();
    harness.radio(|radio| {
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].frame_control(), AUTHENTICATION);
    });
}

#[test]
fn admission_at_the_edge() {
    let harness = Harness::new();
    let client = &harness.client;
    let filler = vec![0u8; 3060];
    for _ in 0..7 {
        client.enqueue_transmit(&filler, DataRate::Auto).unwrap();
    }
    client
        .enqueue_transmit(&vec![0u8; 2984], DataRate::Auto)
        .unwrap();
    assert_eq!(client.bytes_available_for_transmit(), 74);

    let frame = [0x55u8; 64];
    assert_eq!(
        client.enqueue_transmit(&frame, DataRate::Auto),
        Err(WiFiError::QueueFull)
    );
    assert_eq!(client.bytes_available_for_transmit(), 74);
    assert_eq!(client.stat(Stat::TxQueuedRejected), 1);
}

#[test]
fn admission_with_exact_space() {
    let harness = Harness::new();
    let client = &harness.client;
    let filler = vec![0u8; 3060];
    for _ in 0..7 {
        client.enqueue_transmit(&filler, DataRate::Auto).unwrap();
    }
    client
        .enqueue_transmit(&vec![0u8; 2982], DataRate::Auto)
        .unwrap();
    assert_eq!(client.bytes_available_for_transmit(), 76);

    client
        .enqueue_transmit(&[0x55u8; 64], DataRate::Auto)
        .unwrap();
    assert_eq!(client.bytes_available_for_transmit(), 0);
}

#[test]
fn oversized_frames_are_refused() {
    let harness = Harness::new();
    assert_eq!(
        harness
            .client
            .enqueue_transmit(&vec![0u8; 3061], DataRate::Auto),
        Err(WiFiError::FrameTooLarge)
    );
}

#[test]
fn protected_frames_get_a_fresh_iv() {
    let harness = Harness::enabled();
    harness
        .client
        .connect(
            &ConnectParams {
                wep_mode: WepMode::Wep40,
                wep_key_id: 2,
                ..params()
            },
            false,
        )
        .unwrap();
    harness.tick();

    let mut frame = data_frame(&[0; 16]);
    frame[1] |= 0x40;
    harness
        .client
        .enqueue_transmit(&frame, DataRate::Auto)
        .unwrap();
    harness.tick();
    harness.radio(|radio| {
        let sent = radio.sent_with(0x4208);
        assert_eq!(sent.len(), 1);
        let (low, high) = (radio.memory(0x24), radio.memory(0x26));
        assert_eq!(high >> 14, 2);
        assert_ne!((low, high & 0xff), (0, 0));
        assert_eq!(sent[0].u16_at(24), low);
        assert_eq!(sent[0].u16_at(26), high);
    });
}

#[test]
fn queued_beacons_go_to_the_beacon_location() {
    let harness = Harness::enabled();
    harness
        .client
        .enqueue_transmit(&beacon(OWN_MAC, b"DSAP", 6, false), DataRate::Rate1M)
        .unwrap();
    harness.tick();
    harness.radio(|radio| {
        assert_eq!(radio.register(Register::TxBufBeacon), 0x8000);
        assert_eq!(radio.memory(0x0c), 0x0080);
        assert_eq!(radio.register(Register::TxBufLoc3) & 0x8000, 0);
        assert!(radio.sent.is_empty());
    });
    assert_eq!(
        harness.client.bytes_available_for_transmit(),
        EMPTY_TX_RING
    );
}

#[test]
fn beacon_fills_the_ap_table() {
    let harness = Harness::enabled();
    harness.client.set_channel(6).unwrap();
    harness.tick();
    assert_eq!(harness.client.channel(), 6);

    harness.receive(&beacon(AP_MAC, b"TESTAP", 6, false), 0x2a);
    let records: Vec<_> = harness.client.access_points().collect();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.ssid.as_bytes(), b"TESTAP");
    assert_eq!(record.channel, 6);
    assert_eq!(record.rssi_history, [0x2a; 8]);
    assert_eq!(record.average_rssi(), 0x2a);
    assert_eq!(record.bssid, AP_MAC);

    // Beacons aren't part of the default filter.
    assert!(!harness.client.has_received_frame());
}

#[test]
fn packet_filter_and_promiscuous_mode() {
    let harness = Harness::enabled();
    harness.receive(&beacon(AP_MAC, b"TESTAP", 1, false), 30);
    assert!(!harness.client.has_received_frame());

    harness.client.set_promiscuous(true);
    harness.receive(&beacon(AP_MAC, b"TESTAP", 1, false), 30);
    assert!(harness.client.has_received_frame());
    let mut buffer = [0u8; 256];
    harness.client.receive(&mut buffer).unwrap();

    harness.client.set_promiscuous(false);
    harness.client.set_packet_filter(PacketFlags::new().with_management(true));
    harness.receive(&data_frame(b"hello"), 30);
    assert!(!harness.client.has_received_frame());
    assert_eq!(harness.client.stat(Stat::RxPackets), 3);
    assert_eq!(harness.client.stat(Stat::RxQueuedPackets), 1);
}

#[test]
fn received_frames_reach_the_client() {
    let harness = Harness::enabled();
    let frame = data_frame(b"payload!!");
    harness.receive(&frame, 55);

    let mut buffer = [0u8; 128];
    let received = harness.client.receive(&mut buffer).unwrap();
    assert_eq!(received.length(), frame.len());
    assert_eq!(received.copied, frame.len());
    assert_eq!(received.rssi(), 55);
    assert_eq!(&buffer[..frame.len()], &frame[..]);
    assert!(harness.client.receive(&mut buffer).is_none());

    // A short buffer gets what fits, the frame is consumed anyway.
    harness.receive(&frame, 55);
    let mut short = [0u8; 8];
    let received = harness.client.receive(&mut short).unwrap();
    assert_eq!(received.copied, 8);
    assert_eq!(&short, &frame[..8]);
    assert!(!harness.client.has_received_frame());
}

#[test]
fn rx_drain_is_bounded_per_interrupt() {
    let harness = Harness::enabled();
    let frame = data_frame(&[0xab; 20]);
    harness.radio(|radio| {
        for _ in 0..10 {
            radio.deliver(&frame, 20);
        }
    });
    harness.interrupt();
    assert_eq!(harness.client.stat(Stat::RxPackets), 7);

    // The rest is picked up by the next tick.
    harness.tick();
    assert_eq!(harness.client.stat(Stat::RxPackets), 10);
    assert_eq!(harness.client.stat(Stat::RxQueuedPackets), 10);
}

#[test]
fn rx_area_wraps() {
    let harness = Harness::enabled();
    let frame = data_frame(&[0x5a; 200]);
    let mut buffer = [0u8; 256];
    // Enough frames to go around the RX area twice.
    for _ in 0..40 {
        harness.receive(&frame, 20);
        let received = harness.client.receive(&mut buffer).unwrap();
        assert_eq!(&buffer[..received.copied], &frame[..]);
    }
}

#[test]
fn corrupt_length_keeps_the_read_cursor_in_the_rx_area() {
    let harness = Harness::enabled();
    harness.radio(|radio| {
        let base = (radio.register(Register::RxBufWriteCursor) as usize) << 1;
        radio.deliver(&data_frame(&[0; 8]), 20);
        radio.write_mac_memory(base + 8, 0xfff0);
    });
    harness.interrupt();

    let area = rx_memory_offset(RX_BUFFER_BEGIN)..rx_memory_offset(RX_BUFFER_END);
    harness.radio(|radio| {
        let cursor = (radio.register(Register::RxBufReadCursor) as usize) << 1;
        assert!(area.contains(&cursor), "read cursor at {cursor:#x}");
    });
}

#[test]
fn counter_overflow_accumulates() {
    let harness = Harness::enabled();
    harness.radio(|radio| {
        radio.set_register(Register::RxStat1B0, 0x0302);
        radio.set_register(Register::CmdStat1DE, 0x0100);
        radio.raise(InterruptFlags::new().with_rx_event_half_overflow(true));
    });
    harness.interrupt();
    harness.radio(|radio| {
        radio.set_register(Register::RxStat1B0, 0x0001);
        radio.raise(InterruptFlags::new().with_tx_error_half_overflow(true));
    });
    harness.interrupt();

    assert_eq!(harness.client.hardware_counter(0), Some(3));
    assert_eq!(harness.client.hardware_counter(1), Some(3));
    assert_eq!(harness.client.hardware_counter(35), Some(1));
    assert_eq!(harness.client.hardware_counter(36), None);
}

#[test]
fn interrupts_are_cleared_while_stopped() {
    let harness = Harness::new();
    harness.radio(|radio| radio.raise(InterruptFlags::new().with_rx_complete(true)));
    harness.interrupt();
    harness.radio(|radio| assert_eq!(radio.interrupt_flags, 0));
    assert_eq!(harness.client.stat(Stat::RxPackets), 0);
}

#[test]
fn interrupt_during_a_tick_is_serviced_before_it_ends() {
    let harness: &'static Harness = Box::leak(Box::new(Harness::enabled()));
    let frame = data_frame(&[0xa5; 8]);
    let delivered = frame.clone();
    harness.radio(|radio| {
        radio.on_tune = Some(Box::new(move |radio: &mut MockRadio| {
            radio.deliver(&delivered, 30);
            harness.interrupt();
        }));
    });
    harness.client.set_channel(11).unwrap();
    harness.tick();

    let rx_complete = InterruptFlags::new().with_rx_complete(true).into_bits();
    harness.radio(|radio| {
        assert_eq!(radio.channel, 11);
        assert_eq!(radio.interrupt_flags & rx_complete, 0);
    });
    let mut buffer = [0u8; 64];
    let received = harness.client.receive(&mut buffer).unwrap();
    assert_eq!(&buffer[..received.copied], &frame[..]);
}

#[test]
fn scan_hops_channels_and_ages_records() {
    let harness = Harness::with_config(EngineConfig {
        ap_timeout: 2,
        ..Default::default()
    });
    harness.client.enable();
    harness.tick();
    harness.receive(&beacon(AP_MAC, b"TESTAP", 1, false), 30);
    assert_eq!(harness.client.access_points().count(), 1);

    harness.client.scan();
    harness.tick();
    assert_eq!(harness.client.mode(), WifiMode::Scan);

    harness.ticks(14);
    assert_eq!(harness.client.channel(), 6);
    assert_eq!(harness.client.access_points().count(), 1);
    harness.ticks(7);
    assert_eq!(harness.client.channel(), 11);
    assert_eq!(harness.client.access_points().count(), 0);

    harness.client.enable();
    harness.tick();
    assert_eq!(harness.client.mode(), WifiMode::Normal);
    assert_eq!(harness.client.channel(), 1);
}

#[test]
fn disable_stops_and_discards() {
    let harness = associated();
    harness
        .client
        .enqueue_transmit(&[0x08, 0x02, 0, 0], DataRate::Auto)
        .unwrap();
    harness.client.disable();
    harness.tick();

    assert_eq!(harness.client.mode(), WifiMode::Disabled);
    assert_eq!(harness.client.auth_level(), AuthLevel::Disconnected);
    assert_eq!(
        harness.client.bytes_available_for_transmit(),
        EMPTY_TX_RING
    );
    harness.radio(|radio| assert_eq!(radio.register(Register::InterruptEnable), 0));
}

#[test]
fn stop_twice_is_harmless() {
    let harness = Harness::enabled();
    harness
        .client
        .enqueue_transmit(&[0x08, 0x02, 0, 0], DataRate::Auto)
        .unwrap();
    harness.receive(&data_frame(b"x"), 10);

    harness.engine.stop();
    let available = harness.client.bytes_available_for_transmit();
    assert_eq!(available, EMPTY_TX_RING);
    assert!(harness.client.has_received_frame());

    harness.engine.stop();
    assert_eq!(harness.client.mode(), WifiMode::Disabled);
    assert_eq!(harness.client.bytes_available_for_transmit(), available);
    assert!(harness.client.has_received_frame());
}

#[test]
fn invalid_channels_are_refused() {
    let harness = Harness::new();
    assert_eq!(
        harness.client.set_channel(15),
        Err(WiFiError::InvalidChannel)
    );
    assert_eq!(
        harness.client.connect(
            &ConnectParams {
                channel: 0,
                ..params()
            },
            false
        ),
        Err(WiFiError::InvalidChannel)
    );
}

static FRAMES_SIGNALLED: AtomicUsize = AtomicUsize::new(0);
static NOTIFIER: FrameNotifier = FrameNotifier::new();

fn frame_ready() {
    FRAMES_SIGNALLED.fetch_add(1, Ordering::Relaxed);
    NOTIFIER.put();
}

#[test]
fn receive_async_wakes_on_sync() {
    let block = mk_static!(ControlBlock, ControlBlock::new());
    let (engine_view, client_view) = block.split();
    let harness = Harness::from_views(
        engine_view,
        client_view,
        EngineConfig {
            sync_handler: Some(frame_ready),
            ..Default::default()
        },
    );
    harness.client.enable();
    harness.tick();

    let frame = data_frame(b"async");
    harness.receive(&frame, 33);
    assert_eq!(FRAMES_SIGNALLED.load(Ordering::Relaxed), 1);

    let mut buffer = [0u8; 64];
    let received =
        embassy_futures::block_on(harness.client.receive_async(&NOTIFIER, &mut buffer));
    assert_eq!(&buffer[..received.copied], &frame[..]);
}
