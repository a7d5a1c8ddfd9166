//! End-to-end dispatch: fake repeater on one side, fake USRP peer on
//! the other, the gateway shuttling between them.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fmgateway_core::{Config, Gateway, Protocol};

const FM_PORT: u16 = 40711;
const RPT_PORT: u16 = 40712;
const USRP_PORT: u16 = 40713;
const USRP_PEER_PORT: u16 = 40714;

fn test_config() -> Config {
    let mut config = Config::default();
    config.callsign = "KC1ABC".to_string();
    config.protocol = Protocol::Usrp;
    config.network_local_address = "127.0.0.1".to_string();
    config.network_local_port = FM_PORT;
    config.network_rpt_address = "127.0.0.1".to_string();
    config.network_rpt_port = RPT_PORT;
    config.usrp_local_address = "127.0.0.1".to_string();
    config.usrp_local_port = USRP_PORT;
    config.usrp_remote_address = "127.0.0.1".to_string();
    config.usrp_remote_port = USRP_PEER_PORT;
    config
}

fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buffer = [0u8; 1500];
    let (n, _) = socket.recv_from(&mut buffer).expect("no frame received");
    buffer[..n].to_vec()
}

#[test]
fn test_usrp_pipeline_end_to_end() {
    let repeater = UdpSocket::bind(("127.0.0.1", RPT_PORT)).expect("bind repeater");
    repeater
        .set_read_timeout(Some(Duration::from_millis(2000)))
        .expect("set timeout");
    let usrp_peer = UdpSocket::bind(("127.0.0.1", USRP_PEER_PORT)).expect("bind USRP peer");
    usrp_peer
        .set_read_timeout(Some(Duration::from_millis(2000)))
        .expect("set timeout");

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let handle = thread::spawn(move || {
        let mut gateway = Gateway::new(test_config());
        gateway.run(&flag)
    });

    // Let both engines bind before talking to them.
    thread::sleep(Duration::from_millis(300));

    let gateway_fm = ("127.0.0.1", FM_PORT);
    let gateway_usrp = ("127.0.0.1", USRP_PORT);

    // Repeater keys up, talks, keys down.
    repeater.send_to(b"FMSKC1ABC", gateway_fm).expect("send FMS");
    thread::sleep(Duration::from_millis(50));

    let mut data_frame = b"FMD".to_vec();
    for _ in 0..160 {
        data_frame.extend_from_slice(&[0x00, 0x40]);
    }
    repeater.send_to(&data_frame, gateway_fm).expect("send FMD");
    thread::sleep(Duration::from_millis(50));

    repeater.send_to(b"FME", gateway_fm).expect("send FME");

    let start = recv(&usrp_peer);
    assert_eq!(start.len(), 70);
    assert_eq!(&start[0..4], b"USRP");
    assert_eq!(&start[46..52], b"KC1ABC");

    let audio = recv(&usrp_peer);
    assert_eq!(audio.len(), 352);
    assert_eq!(&audio[12..16], &[0, 0, 0, 1]);
    // 0x4000 over the FM wire decays to 0x2000 after the second
    // float/S16 conversion.
    for pair in audio[32..].chunks(2) {
        assert_eq!(pair, &[0x00, 0x20]);
    }

    let end = recv(&usrp_peer);
    assert_eq!(end.len(), 352);
    assert_eq!(&end[12..16], &[0, 0, 0, 0]);

    // Now the far side talks back.
    let mut inbound = vec![0u8; 32];
    inbound[0..4].copy_from_slice(b"USRP");
    for _ in 0..160 {
        inbound.extend_from_slice(&[0x00, 0x20]);
    }
    usrp_peer.send_to(&inbound, gateway_usrp).expect("send USRP audio");

    let fmd = recv(&repeater);
    assert_eq!(&fmd[0..3], b"FMD");
    assert_eq!(fmd.len(), 3 + 320);
    // 0x2000 halves again on the way back out.
    for pair in fmd[3..].chunks(2) {
        assert_eq!(pair, &[0x00, 0x10]);
    }

    shutdown.store(true, Ordering::Relaxed);
    let result = handle.join().expect("gateway thread panicked");
    assert!(result.is_ok(), "gateway run failed: {:?}", result.err());
}
