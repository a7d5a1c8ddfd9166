//! IAX2 remote engine.
//!
//! A strict client-side subset of Inter-Asterisk eXchange v2: one
//! outbound call with optional registration, MD5 challenge/response
//! authentication, mu-law voice over mini frames, keying control and
//! ping/pong keepalive with receiver-report IEs.

use std::net::SocketAddr;

use md5::{Digest, Md5};
use tracing::{debug, error, info, warn};

use crate::clock::{StopWatch, Timer};
use crate::error::Result;
use crate::network::RemoteNetwork;
use crate::ringbuf::RingBuffer;
use crate::sample::float_to_s16;
use crate::udp::{self, MatchType, UdpSocket};
use crate::ulaw;
use crate::{MAX_DATAGRAM, RING_SIZE};

const IAX_PROTO_VERSION: u8 = 2;

/// Frame types.
const FRAME_VOICE: u8 = 2;
const FRAME_CONTROL: u8 = 4;
const FRAME_IAX: u8 = 6;
const FRAME_TEXT: u8 = 7;

/// CONTROL subclasses.
const CONTROL_RINGING: u8 = 3;
const CONTROL_ANSWER: u8 = 4;
const CONTROL_OPTION: u8 = 11;
const CONTROL_KEY: u8 = 12;
const CONTROL_UNKEY: u8 = 13;
const CONTROL_STOP_SOUNDS: u8 = 255;

/// VOICE subclass for G.711 mu-law.
const FORMAT_ULAW: u8 = 4;

/// AUTHMETHODS value for MD5 challenge/response.
const AUTH_MD5: u8 = 2;

/// IAX subclasses (commands).
const COMMAND_NEW: u8 = 1;
const COMMAND_PING: u8 = 2;
const COMMAND_PONG: u8 = 3;
const COMMAND_ACK: u8 = 4;
const COMMAND_HANGUP: u8 = 5;
const COMMAND_REJECT: u8 = 6;
const COMMAND_ACCEPT: u8 = 7;
const COMMAND_AUTHREQ: u8 = 8;
const COMMAND_AUTHREP: u8 = 9;
const COMMAND_LAGRQ: u8 = 11;
const COMMAND_LAGRP: u8 = 12;
const COMMAND_REGREQ: u8 = 13;
const COMMAND_REGAUTH: u8 = 14;
const COMMAND_REGACK: u8 = 15;
const COMMAND_REGREJ: u8 = 16;
const COMMAND_VNAK: u8 = 18;

/// Information element tags.
const IE_CALLED_NUMBER: u8 = 1;
const IE_CALLING_NUMBER: u8 = 2;
const IE_CALLING_NAME: u8 = 4;
const IE_USERNAME: u8 = 6;
const IE_FORMAT: u8 = 9;
const IE_VERSION: u8 = 11;
const IE_AUTHMETHODS: u8 = 14;
const IE_CHALLENGE: u8 = 15;
const IE_MD5_RESULT: u8 = 16;
const IE_REFRESH: u8 = 19;
const IE_CAUSE: u8 = 22;
const IE_RR_JITTER: u8 = 46;
const IE_RR_LOSS: u8 = 47;
const IE_RR_PKTS: u8 = 48;
const IE_RR_DELAY: u8 = 49;
const IE_RR_DROPPED: u8 = 50;
const IE_RR_OOO: u8 = 51;

/// Cause text sent with our HANGUP.
const HANGUP_REASON: &str = "MMDVM Out";

/// Registration refresh offered in REGREQ, in seconds.
const REFRESH_TIME: u16 = 60;

/// Retry cadence while connecting or registering.
const RETRY_MS: u64 = 500;

/// Keepalive cadence once connected.
const PING_MS: u64 = 20_000;

/// Length of the full-frame header.
const FULL_HEADER_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Disconnected,
    Connecting,
    Registering,
    Connected,
}

pub struct IaxNetwork {
    callsign: String,
    username: String,
    password: String,
    node: String,
    local_address: String,
    local_port: u16,
    remote_address: String,
    remote_port: u16,
    debug: bool,
    socket: Option<UdpSocket>,
    addr: Option<SocketAddr>,
    buffer: RingBuffer,
    status: Status,
    retry_timer: Timer,
    ping_timer: Timer,
    seed: Vec<u8>,
    timestamp: StopWatch,
    s_call_no: u16,
    d_call_no: u16,
    i_seq_no: u8,
    o_seq_no: u8,
    rx_jitter: u32,
    rx_loss: u32,
    rx_frames: u32,
    rx_delay: u16,
    rx_dropped: u32,
    rx_ooo: u32,
    keyed: bool,
}

impl IaxNetwork {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        callsign: &str,
        username: &str,
        password: &str,
        node: &str,
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
        debug: bool,
    ) -> Self {
        // Drop any suffix after the first space in the callsign.
        let callsign = match callsign.find(' ') {
            Some(pos) => &callsign[..pos],
            None => callsign,
        };

        Self {
            callsign: callsign.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            node: node.to_string(),
            local_address: local_address.to_string(),
            local_port,
            remote_address: remote_address.to_string(),
            remote_port,
            debug,
            socket: None,
            addr: None,
            buffer: RingBuffer::new(RING_SIZE),
            status: Status::Disconnected,
            retry_timer: Timer::new(RETRY_MS),
            ping_timer: Timer::new(PING_MS),
            seed: Vec::new(),
            timestamp: StopWatch::new(),
            s_call_no: 0,
            d_call_no: 0,
            i_seq_no: 0,
            o_seq_no: 0,
            rx_jitter: 0,
            rx_loss: 0,
            rx_frames: 0,
            rx_delay: 0,
            rx_dropped: 0,
            rx_ooo: 0,
            keyed: false,
        }
    }

    /// The bound local endpoint, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if self.debug {
            udp::dump("FM IAX Network Data Sent", frame);
        }

        match (&self.socket, &self.addr) {
            (Some(socket), Some(addr)) => {
                if let Err(e) = socket.write(frame, addr) {
                    warn!("IAX network write error: {}", e);
                    return Err(e);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Build a 12-byte full-frame header with the current counters.
    fn full_header(&self, frame_type: u8, subclass: u8, d_call: u16, ts: u32) -> Vec<u8> {
        let s_call = self.s_call_no | 0x8000;

        let mut frame = Vec::with_capacity(64);
        frame.extend_from_slice(&s_call.to_be_bytes());
        frame.extend_from_slice(&d_call.to_be_bytes());
        frame.extend_from_slice(&ts.to_be_bytes());
        frame.push(self.o_seq_no);
        frame.push(self.i_seq_no);
        frame.push(frame_type);
        frame.push(subclass);
        frame
    }

    fn md5_digest(&self) -> [u8; 16] {
        let mut hasher = Md5::new();
        hasher.update(&self.seed);
        hasher.update(self.password.as_bytes());
        hasher.finalize().into()
    }

    fn write_new(&mut self, retry: bool) -> Result<()> {
        debug!("IAX NEW sent");

        if !retry {
            self.s_call_no = (self.s_call_no + 1) & 0x7FFF;
        }

        self.timestamp.start();
        self.o_seq_no = 0;
        self.i_seq_no = 0;
        self.d_call_no = 0;

        let mut frame = self.full_header(FRAME_IAX, COMMAND_NEW, 0, 0);
        push_ie(&mut frame, IE_VERSION, &u16::from(IAX_PROTO_VERSION).to_be_bytes());
        push_ie(&mut frame, IE_CALLED_NUMBER, self.node.as_bytes());
        push_ie(&mut frame, IE_CALLING_NUMBER, &[]);
        push_ie(&mut frame, IE_CALLING_NAME, self.callsign.as_bytes());
        push_ie(&mut frame, IE_USERNAME, self.username.as_bytes());
        push_ie(&mut frame, IE_FORMAT, &u32::from(FORMAT_ULAW).to_be_bytes());

        self.send(&frame)
    }

    fn write_auth_rep(&mut self) -> Result<()> {
        debug!("IAX AUTHREP sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let digest = self.md5_digest();
        let ts = self.timestamp.elapsed() as u32;

        let mut frame = self.full_header(FRAME_IAX, COMMAND_AUTHREP, self.d_call_no, ts);
        push_ie(&mut frame, IE_MD5_RESULT, &digest);

        self.send(&frame)
    }

    fn write_reg_req(&mut self, retry: bool) -> Result<()> {
        debug!("IAX REGREQ sent");

        if !retry {
            self.o_seq_no = self.o_seq_no.wrapping_add(1);
        }

        let mut d_call = self.d_call_no;
        if retry {
            d_call |= 0x8000;
        }
        let ts = self.timestamp.elapsed() as u32;

        let mut frame = self.full_header(FRAME_IAX, COMMAND_REGREQ, d_call, ts);
        push_ie(&mut frame, IE_USERNAME, self.username.as_bytes());

        if self.d_call_no > 0 {
            let digest = self.md5_digest();
            push_ie(&mut frame, IE_MD5_RESULT, &digest);
        }

        push_ie(&mut frame, IE_REFRESH, &REFRESH_TIME.to_be_bytes());

        self.send(&frame)
    }

    fn write_key(&mut self, key: bool) -> Result<()> {
        debug!("IAX KEY/UNKEY sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let ts = self.timestamp.elapsed() as u32;
        let subclass = if key { CONTROL_KEY } else { CONTROL_UNKEY };
        let frame = self.full_header(FRAME_CONTROL, subclass, self.d_call_no, ts);

        self.send(&frame)
    }

    fn write_ping(&mut self) -> Result<()> {
        debug!("IAX PING sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let ts = self.timestamp.elapsed() as u32;
        let frame = self.full_header(FRAME_IAX, COMMAND_PING, self.d_call_no, ts);

        self.send(&frame)
    }

    /// Receiver-report IEs appended to every PONG.
    fn receiver_report(&self) -> Vec<u8> {
        let mut ies = Vec::with_capacity(34);

        push_ie(&mut ies, IE_RR_JITTER, &self.rx_jitter.to_be_bytes());

        // First byte carries the loss percentage, the remaining three the
        // low bits of the counter. Peers expect exactly these bytes.
        let percentage = if self.rx_frames > 0 {
            ((self.rx_loss * 100) / self.rx_frames) as u8
        } else {
            0
        };
        let loss = [
            percentage,
            (self.rx_loss >> 16) as u8,
            (self.rx_loss >> 8) as u8,
            self.rx_loss as u8,
        ];
        push_ie(&mut ies, IE_RR_LOSS, &loss);

        push_ie(&mut ies, IE_RR_PKTS, &self.rx_frames.to_be_bytes());
        push_ie(&mut ies, IE_RR_DELAY, &self.rx_delay.to_be_bytes());
        push_ie(&mut ies, IE_RR_DROPPED, &self.rx_dropped.to_be_bytes());
        push_ie(&mut ies, IE_RR_OOO, &self.rx_ooo.to_be_bytes());

        ies
    }

    fn write_pong(&mut self, ts: u32) -> Result<()> {
        debug!("IAX PONG sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let mut frame = self.full_header(FRAME_IAX, COMMAND_PONG, self.d_call_no, ts);
        frame.extend_from_slice(&self.receiver_report());

        self.send(&frame)
    }

    /// ACK inherits the current sequence counters without advancing them.
    fn write_ack(&mut self, ts: u32) -> Result<()> {
        debug!("IAX ACK sent");

        let frame = self.full_header(FRAME_IAX, COMMAND_ACK, self.d_call_no, ts);

        self.send(&frame)
    }

    fn write_lag_rq(&mut self) -> Result<()> {
        debug!("IAX LAGRQ sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let ts = self.timestamp.elapsed() as u32;
        let frame = self.full_header(FRAME_IAX, COMMAND_LAGRQ, self.d_call_no, ts);

        self.send(&frame)
    }

    fn write_lag_rp(&mut self, ts: u32) -> Result<()> {
        debug!("IAX LAGRP sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let frame = self.full_header(FRAME_IAX, COMMAND_LAGRP, self.d_call_no, ts);

        self.send(&frame)
    }

    fn write_hangup(&mut self) -> Result<()> {
        debug!("IAX HANGUP sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let ts = self.timestamp.elapsed() as u32;
        let mut frame = self.full_header(FRAME_IAX, COMMAND_HANGUP, self.d_call_no, ts);
        push_ie(&mut frame, IE_CAUSE, HANGUP_REASON.as_bytes());

        self.send(&frame)
    }

    /// Send one block of linear audio as a full VOICE frame.
    fn write_audio(&mut self, audio: &[i16]) -> Result<()> {
        debug!("IAX ULAW sent");

        self.o_seq_no = self.o_seq_no.wrapping_add(1);

        let ts = self.timestamp.elapsed() as u32;
        let mut frame = self.full_header(FRAME_VOICE, FORMAT_ULAW, self.d_call_no, ts);
        ulaw::encode(audio, &mut frame);

        self.send(&frame)
    }

    /// Pull the challenge out of an AUTHREQ/REGAUTH IE block, provided
    /// the peer offers MD5. Any other auth method is ignored.
    fn parse_challenge(&mut self, frame: &[u8]) -> bool {
        if frame.len() < 18 {
            return false;
        }

        if frame[12] != IE_AUTHMETHODS || frame[15] != AUTH_MD5 || frame[16] != IE_CHALLENGE {
            return false;
        }

        let length = usize::from(frame[17]);
        if frame.len() < 18 + length {
            return false;
        }

        self.seed = frame[18..18 + length].to_vec();
        true
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        // Mini frames carry a clear MSB and only a 16-bit timestamp; they
        // are opaque audio, never ACKed.
        if (frame[0] & 0x80) == 0 {
            debug!("IAX audio received");

            if !self.keyed || frame.len() < 4 {
                return;
            }

            self.buffer.add(&frame[4..]);
            return;
        }

        if frame.len() < FULL_HEADER_LENGTH {
            return;
        }

        let ts = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let o_seq_no = frame[8];
        let frame_type = frame[10];
        let subclass = frame[11];

        // Learn the peer's call number from its first response.
        if self.d_call_no == 0 {
            self.d_call_no = u16::from_be_bytes([frame[0], frame[1]]) & 0x7FFF;
        }

        match (frame_type, subclass) {
            (FRAME_IAX, COMMAND_ACK) => {
                debug!("IAX ACK received");
            }
            (FRAME_IAX, COMMAND_PING) => {
                debug!("IAX PING received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
                let _ = self.write_pong(ts);
            }
            (FRAME_IAX, COMMAND_PONG) => {
                debug!("IAX PONG received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
            }
            (FRAME_IAX, COMMAND_ACCEPT) => {
                debug!("IAX ACCEPT received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.status = Status::Connected;
                self.retry_timer.stop();
                self.ping_timer.start();
            }
            (FRAME_IAX, COMMAND_REGREJ) => {
                error!("Registration rejected by the IAX gateway");

                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.status = Status::Disconnected;
                self.keyed = false;

                self.retry_timer.stop();
                self.ping_timer.stop();
            }
            (FRAME_IAX, COMMAND_REJECT) => {
                error!("Command rejected by the IAX gateway");

                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.status = Status::Disconnected;
                self.keyed = false;

                self.retry_timer.stop();
                self.ping_timer.stop();
            }
            (FRAME_IAX, COMMAND_REGAUTH) => {
                debug!("IAX REGAUTH received");

                self.rx_frames += 1;

                if self.parse_challenge(frame) {
                    self.status = Status::Registering;
                    self.i_seq_no = o_seq_no.wrapping_add(1);

                    self.retry_timer.start();
                    let _ = self.write_reg_req(false);
                }
            }
            (FRAME_IAX, COMMAND_AUTHREQ) => {
                debug!("IAX AUTHREQ received");

                self.rx_frames += 1;

                if self.parse_challenge(frame) {
                    self.i_seq_no = o_seq_no.wrapping_add(1);

                    let _ = self.write_auth_rep();
                }
            }
            (FRAME_IAX, COMMAND_REGACK) => {
                debug!("IAX REGACK received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.status = Status::Connected;
                self.retry_timer.stop();
                self.ping_timer.start();
            }
            (FRAME_IAX, COMMAND_HANGUP) => {
                error!("Hangup from the IAX gateway");

                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.status = Status::Disconnected;
                self.keyed = false;

                self.retry_timer.stop();
                self.ping_timer.stop();
            }
            (FRAME_IAX, COMMAND_VNAK) => {
                error!("Messages rejected by the IAX gateway");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
            }
            (FRAME_IAX, COMMAND_LAGRQ) => {
                debug!("IAX LAGRQ received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_lag_rq();
                let _ = self.write_lag_rp(ts);
            }
            (FRAME_IAX, COMMAND_LAGRP) => {
                debug!("IAX LAGRP received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
            }
            (FRAME_CONTROL, CONTROL_RINGING | CONTROL_ANSWER | CONTROL_OPTION | CONTROL_STOP_SOUNDS) => {
                debug!("IAX control {} received", subclass);

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
            }
            (FRAME_CONTROL, CONTROL_KEY) => {
                debug!("IAX KEY received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.keyed = true;
            }
            (FRAME_CONTROL, CONTROL_UNKEY) => {
                debug!("IAX UNKEY received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                self.keyed = false;
            }
            (FRAME_VOICE, FORMAT_ULAW) => {
                debug!("IAX ULAW received");

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);

                if !self.keyed {
                    return;
                }

                self.buffer.add(&frame[FULL_HEADER_LENGTH..]);
            }
            (FRAME_TEXT, 0) => {
                debug!(
                    "IAX TEXT received - {}",
                    String::from_utf8_lossy(&frame[FULL_HEADER_LENGTH..])
                );

                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
            }
            _ => {
                udp::dump("Unknown IAX message received", frame);

                self.rx_frames += 1;
                self.i_seq_no = o_seq_no.wrapping_add(1);

                let _ = self.write_ack(ts);
            }
        }
    }
}

impl RemoteNetwork for IaxNetwork {
    fn open(&mut self) -> Result<()> {
        let addr = udp::lookup(&self.remote_address, self.remote_port)?;

        info!("Opening FM IAX network connection");

        self.socket = Some(UdpSocket::bind(&self.local_address, self.local_port)?);
        self.addr = Some(addr);

        self.d_call_no = 0;
        self.rx_frames = 0;
        self.keyed = false;

        if let Err(e) = self.write_new(false) {
            self.socket = None;
            return Err(e);
        }

        self.status = Status::Connecting;
        self.retry_timer.start();

        Ok(())
    }

    /// Key the remote side, then prime it with a frame of silence so it
    /// doesn't squelch before the first real audio block arrives.
    fn write_start(&mut self, _callsign: &str) -> Result<()> {
        if self.status != Status::Connected {
            return Ok(());
        }

        self.write_key(true)?;

        let silence = [0i16; 160];
        self.write_audio(&silence)
    }

    fn write_data(&mut self, samples: &[f32]) -> Result<()> {
        if self.status != Status::Connected {
            return Ok(());
        }

        debug!("IAX audio sent");

        let audio: Vec<i16> = samples.iter().map(|&s| float_to_s16(s)).collect();
        let ts = self.timestamp.elapsed() as u16;

        let mut frame = Vec::with_capacity(4 + audio.len());
        frame.extend_from_slice(&(self.s_call_no & 0x7FFF).to_be_bytes());
        frame.extend_from_slice(&ts.to_be_bytes());
        ulaw::encode(&audio, &mut frame);

        self.send(&frame)
    }

    fn write_end(&mut self) -> Result<()> {
        if self.status != Status::Connected {
            return Ok(());
        }

        self.write_key(false)
    }

    fn read_data(&mut self, out: &mut [f32]) -> usize {
        let available = self.buffer.len();
        if available == 0 {
            return 0;
        }

        let n = out.len().min(available);
        let mut bytes = vec![0u8; n];
        self.buffer.get(&mut bytes);

        for (slot, &byte) in out.iter_mut().zip(bytes.iter()) {
            *slot = f32::from(ulaw::decode_sample(byte)) / 65536.0;
        }

        n
    }

    fn clock(&mut self, ms: u64) {
        self.retry_timer.clock(ms);
        if self.retry_timer.is_running() && self.retry_timer.has_expired() {
            match self.status {
                Status::Connecting => {
                    let _ = self.write_new(true);
                }
                Status::Registering => {
                    let _ = self.write_reg_req(true);
                }
                _ => {}
            }

            self.retry_timer.start();
        }

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
                warn!("IAX network read error: {}", e);
                return;
            }
        };

        if !udp::source_matches(&source, expected, MatchType::AddressAndPort) {
            info!("FM IAX packet received from an invalid source");
            return;
        }

        if length < 4 {
            return;
        }

        let frame = &datagram[..length];
        if self.debug {
            udp::dump("FM IAX Network Data Received", frame);
        }

        self.handle_frame(frame);
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn close(&mut self) {
        let _ = self.write_hangup();

        self.socket = None;
        self.status = Status::Disconnected;

        self.retry_timer.stop();
        self.ping_timer.stop();

        info!("Closing FM IAX network connection");
    }
}

fn push_ie(frame: &mut Vec<u8>, tag: u8, value: &[u8]) {
    frame.push(tag);
    frame.push(value.len() as u8);
    frame.extend_from_slice(value);
}
