//! Repeater-facing FM framing engine.
//!
//! The repeater controller speaks a 3-byte-tagged UDP protocol: `FMS`
//! opens a transmission with a callsign, `FMD` carries S16LE audio,
//! `FME` closes it and `FMP` is a keepalive. Inbound frames are staged
//! whole in a length-prefixed ring so the dispatch loop can peek the
//! event type before consuming the frame.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::clock::Timer;
use crate::error::Result;
use crate::ringbuf::RingBuffer;
use crate::sample;
use crate::udp::{self, MatchType, UdpSocket};
use crate::{MAX_DATAGRAM, RING_SIZE};

/// Keepalive interval toward the repeater.
const PING_INTERVAL_MS: u64 = 5000;

/// Pending event type at the head of the inbound ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmEvent {
    None,
    Start,
    Data,
    End,
}

pub struct FmNetwork {
    local_address: String,
    local_port: u16,
    rpt_address: String,
    rpt_port: u16,
    debug: bool,
    socket: Option<UdpSocket>,
    addr: Option<SocketAddr>,
    buffer: RingBuffer,
    ping_timer: Timer,
}

impl FmNetwork {
    pub fn new(
        local_address: &str,
        local_port: u16,
        rpt_address: &str,
        rpt_port: u16,
        debug: bool,
    ) -> Self {
        Self {
            local_address: local_address.to_string(),
            local_port,
            rpt_address: rpt_address.to_string(),
            rpt_port,
            debug,
            socket: None,
            addr: None,
            buffer: RingBuffer::new(RING_SIZE),
            ping_timer: Timer::new(PING_INTERVAL_MS),
        }
    }

    pub fn open(&mut self) -> Result<()> {
        let addr = udp::lookup(&self.rpt_address, self.rpt_port)?;

        info!("Opening FM network connection");

        self.socket = Some(UdpSocket::bind(&self.local_address, self.local_port)?);
        self.addr = Some(addr);
        self.ping_timer.start();

        Ok(())
    }

    /// The bound local endpoint, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Send one block of samples to the repeater as an `FMD` frame.
    pub fn write_data(&mut self, samples: &[f32]) -> Result<()> {
        let mut frame = Vec::with_capacity(3 + samples.len() * 2);
        frame.extend_from_slice(b"FMD");
        sample::encode_s16le(samples, &mut frame);

        self.send(&frame)
    }

    fn write_ping(&mut self) -> Result<()> {
        self.send(b"FMP")
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if self.debug {
            udp::dump("FM Network Data Sent", frame);
        }

        match (&self.socket, &self.addr) {
            (Some(socket), Some(addr)) => socket.write(frame, addr),
            _ => Ok(()),
        }
    }

    /// Peek the event type at the head of the ring without consuming it.
    pub fn read_type(&self) -> FmEvent {
        let mut head = [0u8; 5];
        if self.buffer.peek(&mut head, 0) < 5 {
            return FmEvent::None;
        }

        match &head[2..5] {
            b"FMS" => FmEvent::Start,
            b"FMD" => FmEvent::Data,
            b"FME" => FmEvent::End,
            _ => FmEvent::Data,
        }
    }

    /// Dequeue one `FMS` frame and return the callsign it carries.
    pub fn read_start(&mut self) -> String {
        let Some(frame) = self.take_frame() else {
            return String::new();
        };
        debug_assert!(frame.starts_with(b"FMS"));

        let callsign = &frame[3..];
        let end = callsign
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(callsign.len());

        String::from_utf8_lossy(&callsign[..end]).into_owned()
    }

    /// Dequeue one `FMD` frame into `out`, returning the sample count.
    pub fn read_data(&mut self, out: &mut [f32]) -> usize {
        let Some(frame) = self.take_frame() else {
            return 0;
        };
        debug_assert!(frame.starts_with(b"FMD"));

        sample::decode_s16le(&frame[3..], out)
    }

    /// Dequeue one `FME` frame.
    pub fn read_end(&mut self) {
        let frame = self.take_frame();
        debug_assert!(frame.map_or(true, |f| f.starts_with(b"FME")));
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let mut prefix = [0u8; 2];
        if self.buffer.get(&mut prefix) < 2 {
            return None;
        }

        let length = usize::from(u16::from_le_bytes(prefix));
        let mut frame = vec![0u8; length];
        let got = self.buffer.get(&mut frame);
        frame.truncate(got);

        Some(frame)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn close(&mut self) {
        self.socket = None;

        info!("Closing FM network connection");
    }

    /// Drive the keepalive timer and service one inbound datagram.
    pub fn clock(&mut self, ms: u64) {
        self.ping_timer.clock(ms);
        if self.ping_timer.is_running() && self.ping_timer.has_expired() {
            let _ = self.write_ping();
            self.ping_timer.start();
        }

        let Some(socket) = &self.socket else {
            return;
        };
        let Some(expected) = &self.addr else {
            return;
        };

        let mut datagram = [0u8; MAX_DATAGRAM];
        let (length, source) = match socket.read(&mut datagram) {
            Ok(Some(received)) => received,
            Ok(None) => return,
            Err(e) => {
                warn!("FM network read error: {}", e);
                return;
            }
        };

        if !udp::source_matches(&source, expected, MatchType::AddressAndPort) {
            info!("FM packet received from an invalid source");
            return;
        }

        let frame = &datagram[..length];
        if !frame.starts_with(b"FM") {
            return;
        }
        if frame.starts_with(b"FMP") {
            return;
        }

        if self.debug {
            udp::dump("FM Network Data Received", frame);
        }

        if frame.starts_with(b"FMD") || frame.starts_with(b"FMS") {
            self.enqueue(frame);
        } else if frame.starts_with(b"FME") {
            self.enqueue(&frame[..3]);
        }
    }

    fn enqueue(&mut self, frame: &[u8]) {
        let length = frame.len() as u16;
        if self.buffer.free() < frame.len() + 2 {
            return;
        }
        self.buffer.add(&length.to_le_bytes());
        self.buffer.add(frame);
    }
}
