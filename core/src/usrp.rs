//! USRP-style remote engine.
//!
//! Every outbound frame is a 32-byte header followed by a payload. The
//! header carries a big-endian sequence counter, a PTT flag and a frame
//! type (0 = audio, 2 = metadata). Transmissions open with a 70-byte
//! metadata frame carrying the callsign in a TLV block, carry audio as
//! S16LE with PTT asserted and close with 320 bytes of silence.

use std::net::SocketAddr;

use tracing::{info, warn};

use crate::error::Result;
use crate::network::RemoteNetwork;
use crate::ringbuf::RingBuffer;
use crate::sample;
use crate::udp::{self, MatchType, UdpSocket};
use crate::{MAX_DATAGRAM, RING_SIZE};

/// Frame magic.
const USRP_MAGIC: &[u8; 4] = b"USRP";

/// Header length in bytes.
const HEADER_LENGTH: usize = 32;

/// Total length of the metadata frame emitted by `write_start`.
const START_FRAME_LENGTH: usize = 70;

/// Silence padding appended by `write_end`.
const END_PADDING: usize = 320;

/// Frame type for audio payloads.
const TYPE_AUDIO: u32 = 0;

/// Frame type for TLV metadata.
const TYPE_METADATA: u32 = 2;

/// TLV tag for the metadata block.
const TLV_TAG_METADATA: u8 = 0x08;

pub struct UsrpNetwork {
    local_address: String,
    local_port: u16,
    remote_address: String,
    remote_port: u16,
    debug: bool,
    socket: Option<UdpSocket>,
    addr: Option<SocketAddr>,
    buffer: RingBuffer,
    seq_no: u32,
}

impl UsrpNetwork {
    pub fn new(
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
        debug: bool,
    ) -> Self {
        Self {
            local_address: local_address.to_string(),
            local_port,
            remote_address: remote_address.to_string(),
            remote_port,
            debug,
            socket: None,
            addr: None,
            buffer: RingBuffer::new(RING_SIZE),
            seq_no: 0,
        }
    }

    /// The bound local endpoint, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn header(&self, ptt: bool, frame_type: u32) -> [u8; HEADER_LENGTH] {
        let mut header = [0u8; HEADER_LENGTH];
        header[0..4].copy_from_slice(USRP_MAGIC);
        header[4..8].copy_from_slice(&self.seq_no.to_be_bytes());
        header[12..16].copy_from_slice(&u32::from(ptt).to_be_bytes());
        header[20..24].copy_from_slice(&frame_type.to_be_bytes());
        header
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if self.debug {
            udp::dump("FM USRP Network Data Sent", frame);
        }

        match (&self.socket, &self.addr) {
            (Some(socket), Some(addr)) => socket.write(frame, addr),
            _ => Ok(()),
        }
    }
}

impl RemoteNetwork for UsrpNetwork {
    fn open(&mut self) -> Result<()> {
        let addr = udp::lookup(&self.remote_address, self.remote_port)?;

        info!("Opening FM USRP network connection");

        self.socket = Some(UdpSocket::bind(&self.local_address, self.local_port)?);
        self.addr = Some(addr);
        self.seq_no = 0;

        Ok(())
    }

    fn write_start(&mut self, callsign: &str) -> Result<()> {
        let mut frame = Vec::with_capacity(START_FRAME_LENGTH);
        frame.extend_from_slice(&self.header(false, TYPE_METADATA));

        frame.push(TLV_TAG_METADATA);
        frame.push(3 + 4 + 3 + 1 + 1 + callsign.len() as u8 + 1);

        // DMR id, repeater id, talkgroup, slot and color code are all
        // zero: this gateway carries analogue FM, not DMR.
        frame.extend_from_slice(&[0u8; 3]);
        frame.extend_from_slice(&[0u8; 4]);
        frame.extend_from_slice(&[0u8; 3]);
        frame.push(0);
        frame.push(0);

        frame.extend_from_slice(callsign.as_bytes());
        frame.push(0);

        frame.resize(START_FRAME_LENGTH, 0);

        self.seq_no = self.seq_no.wrapping_add(1);

        self.send(&frame)
    }

    fn write_data(&mut self, samples: &[f32]) -> Result<()> {
        let mut frame = Vec::with_capacity(HEADER_LENGTH + samples.len() * 2);
        frame.extend_from_slice(&self.header(true, TYPE_AUDIO));
        sample::encode_s16le(samples, &mut frame);

        self.seq_no = self.seq_no.wrapping_add(1);

        self.send(&frame)
    }

    fn write_end(&mut self) -> Result<()> {
        let mut frame = Vec::with_capacity(HEADER_LENGTH + END_PADDING);
        frame.extend_from_slice(&self.header(false, TYPE_AUDIO));
        frame.resize(HEADER_LENGTH + END_PADDING, 0);

        self.seq_no = 0;

        self.send(&frame)
    }

    fn read_data(&mut self, out: &mut [f32]) -> usize {
        let available = self.buffer.len() / 2;
        if available == 0 {
            return 0;
        }

        let n = out.len().min(available);
        let mut bytes = vec![0u8; n * 2];
        self.buffer.get(&mut bytes);

        sample::decode_s16le(&bytes, out)
    }

    fn clock(&mut self, _ms: u64) {
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
                warn!("FM USRP network read error: {}", e);
                return;
            }
        };

        if !udp::source_matches(&source, expected, MatchType::AddressAndPort) {
            info!("FM USRP packet received from an invalid source");
            return;
        }

        let frame = &datagram[..length];
        if self.debug {
            udp::dump("FM USRP Network Data Received", frame);
        }

        if !frame.starts_with(USRP_MAGIC) || frame.len() < HEADER_LENGTH {
            return;
        }

        let frame_type = u32::from_be_bytes([frame[20], frame[21], frame[22], frame[23]]);
        if frame_type == TYPE_AUDIO {
            self.buffer.add(&frame[HEADER_LENGTH..]);
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn close(&mut self) {
        self.socket = None;

        info!("Closing FM USRP network connection");
    }
}
