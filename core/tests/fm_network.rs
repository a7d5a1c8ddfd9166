//! FM repeater-side framing over loopback UDP.

use std::net::UdpSocket;
use std::time::Duration;

use fmgateway_core::fm::{FmEvent, FmNetwork};

fn repeater_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("failed to bind repeater socket");
    socket
        .set_read_timeout(Some(Duration::from_millis(1000)))
        .expect("failed to set timeout");
    socket
}

fn open_engine(repeater: &UdpSocket) -> FmNetwork {
    let rpt_port = repeater.local_addr().expect("local addr").port();
    let mut network = FmNetwork::new("127.0.0.1", 0, "127.0.0.1", rpt_port, false);
    network.open().expect("failed to open FM network");
    network
}

fn pause() {
    std::thread::sleep(Duration::from_millis(30));
}

#[test]
fn test_outbound_data_frame() {
    let repeater = repeater_socket();
    let mut network = open_engine(&repeater);

    network.write_data(&[0.5; 4]).expect("write failed");

    let mut buffer = [0u8; 1500];
    let (n, _) = repeater.recv_from(&mut buffer).expect("no frame received");
    assert_eq!(n, 3 + 8);
    assert_eq!(&buffer[..3], b"FMD");
    for pair in buffer[3..n].chunks(2) {
        assert_eq!(pair, &[0x00, 0x40]);
    }
}

#[test]
fn test_zero_samples_emit_tag_only() {
    let repeater = repeater_socket();
    let mut network = open_engine(&repeater);

    network.write_data(&[]).expect("write failed");

    let mut buffer = [0u8; 64];
    let (n, _) = repeater.recv_from(&mut buffer).expect("no frame received");
    assert_eq!(&buffer[..n], b"FMD");
}

#[test]
fn test_inbound_framing_order() {
    let repeater = repeater_socket();
    let mut network = open_engine(&repeater);
    let engine_addr = network.local_addr().expect("engine address");

    let mut data_frame = b"FMD".to_vec();
    data_frame.extend_from_slice(&[0x00, 0x40, 0x00, 0x40]);

    repeater
        .send_to(b"FMSKC1ABC", engine_addr)
        .expect("send FMS");
    repeater.send_to(&data_frame, engine_addr).expect("send FMD");
    repeater.send_to(b"FME", engine_addr).expect("send FME");
    pause();

    // One datagram is serviced per clock call.
    network.clock(0);
    network.clock(0);
    network.clock(0);

    assert_eq!(network.read_type(), FmEvent::Start);
    assert_eq!(network.read_start(), "KC1ABC");

    assert_eq!(network.read_type(), FmEvent::Data);
    let mut out = [0.0f32; 16];
    assert_eq!(network.read_data(&mut out), 2);
    assert!((out[0] - 0.25).abs() < 1e-4);

    assert_eq!(network.read_type(), FmEvent::End);
    network.read_end();

    assert_eq!(network.read_type(), FmEvent::None);
}

#[test]
fn test_ping_cadence() {
    let repeater = repeater_socket();
    let mut network = open_engine(&repeater);
    repeater
        .set_read_timeout(Some(Duration::from_millis(300)))
        .expect("set timeout");

    // Nothing before the 5 second mark.
    network.clock(4999);
    let mut buffer = [0u8; 64];
    assert!(repeater.recv_from(&mut buffer).is_err());

    network.clock(1);
    let (n, _) = repeater.recv_from(&mut buffer).expect("no ping received");
    assert_eq!(&buffer[..n], b"FMP");

    // The timer rearms for another full interval.
    network.clock(4999);
    assert!(repeater.recv_from(&mut buffer).is_err());
    network.clock(5000);
    let (n, _) = repeater.recv_from(&mut buffer).expect("no second ping");
    assert_eq!(&buffer[..n], b"FMP");
}

#[test]
fn test_inbound_ping_is_dropped() {
    let repeater = repeater_socket();
    let mut network = open_engine(&repeater);
    let engine_addr = network.local_addr().expect("engine address");

    repeater.send_to(b"FMP", engine_addr).expect("send FMP");
    pause();
    network.clock(0);

    assert_eq!(network.read_type(), FmEvent::None);
}

#[test]
fn test_source_mismatch_is_dropped() {
    let repeater = repeater_socket();
    let stranger = repeater_socket();
    let mut network = open_engine(&repeater);
    let engine_addr = network.local_addr().expect("engine address");

    stranger
        .send_to(b"FMSKC1ABC", engine_addr)
        .expect("send from stranger");
    pause();
    network.clock(0);

    assert_eq!(network.read_type(), FmEvent::None);
}

#[test]
fn test_non_fm_frames_are_dropped() {
    let repeater = repeater_socket();
    let mut network = open_engine(&repeater);
    let engine_addr = network.local_addr().expect("engine address");

    repeater
        .send_to(b"USRPxxxx", engine_addr)
        .expect("send junk");
    pause();
    network.clock(0);

    assert_eq!(network.read_type(), FmEvent::None);
}
