//! RAW PCM remote engine.
//!
//! Headerless S16LE in both directions. When the configured external
//! rate differs from the repeater's 8 kHz, audio passes through a sinc
//! converter (one per direction, held for the life of the engine).
//! Squelch transitions are mirrored into a sidecar file: `O` on key-up,
//! `Z` on key-down, flushed immediately so follow-on tooling can tail
//! the file.

use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;

use samplerate::{ConverterType, Samplerate};
use tracing::{error, info, warn};

use crate::error::{GatewayError, Result};
use crate::network::RemoteNetwork;
use crate::ringbuf::RingBuffer;
use crate::sample;
use crate::udp::{self, MatchType, UdpSocket};
use crate::{MAX_DATAGRAM, RING_SIZE, SAMPLE_RATE};

pub struct RawNetwork {
    local_address: String,
    local_port: u16,
    remote_address: String,
    remote_port: u16,
    sample_rate: u32,
    squelch_file: String,
    debug: bool,
    socket: Option<UdpSocket>,
    addr: Option<SocketAddr>,
    buffer: RingBuffer,
    tx_resampler: Option<Samplerate>,
    rx_resampler: Option<Samplerate>,
    squelch: Option<File>,
}

impl RawNetwork {
    pub fn new(
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
        sample_rate: u32,
        squelch_file: &str,
        debug: bool,
    ) -> Result<Self> {
        let (tx_resampler, rx_resampler) = if sample_rate != SAMPLE_RATE {
            let tx = Samplerate::new(ConverterType::SincFastest, SAMPLE_RATE, sample_rate, 1)
                .map_err(|e| GatewayError::Resampler(format!("{e:?}")))?;
            let rx = Samplerate::new(ConverterType::SincFastest, sample_rate, SAMPLE_RATE, 1)
                .map_err(|e| GatewayError::Resampler(format!("{e:?}")))?;
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Ok(Self {
            local_address: local_address.to_string(),
            local_port,
            remote_address: remote_address.to_string(),
            remote_port,
            sample_rate,
            squelch_file: squelch_file.to_string(),
            debug,
            socket: None,
            addr: None,
            buffer: RingBuffer::new(RING_SIZE),
            tx_resampler,
            rx_resampler,
            squelch: None,
        })
    }

    /// The bound local endpoint, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn write_squelch(&mut self, marker: u8) -> Result<()> {
        if let Some(file) = &mut self.squelch {
            file.write_all(&[marker])?;
            file.flush()?;
        }
        Ok(())
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if self.debug {
            udp::dump("FM RAW Network Data Sent", payload);
        }

        match (&self.socket, &self.addr) {
            (Some(socket), Some(addr)) => socket.write(payload, addr),
            _ => Ok(()),
        }
    }
}

impl RemoteNetwork for RawNetwork {
    fn open(&mut self) -> Result<()> {
        let addr = udp::lookup(&self.remote_address, self.remote_port)?;

        info!("Opening FM RAW network connection");

        if !self.squelch_file.is_empty() {
            let file =
                File::create(&self.squelch_file).map_err(|source| GatewayError::SquelchFile {
                    path: self.squelch_file.clone(),
                    source,
                })?;
            self.squelch = Some(file);
        }

        self.socket = Some(UdpSocket::bind(&self.local_address, self.local_port)?);
        self.addr = Some(addr);

        Ok(())
    }

    fn write_start(&mut self, _callsign: &str) -> Result<()> {
        self.write_squelch(b'O')
    }

    fn write_data(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut payload = Vec::with_capacity(samples.len() * 2);

        if let Some(resampler) = self.tx_resampler.as_mut() {
            let n_out = (samples.len() * self.sample_rate as usize) / SAMPLE_RATE as usize;

            let mut resampled = match resampler.process(samples) {
                Ok(resampled) => resampled,
                Err(e) => {
                    error!("Error from the write resampler - {:?}", e);
                    return Err(GatewayError::Resampler(format!("{e:?}")));
                }
            };
            resampled.resize(n_out, 0.0);

            sample::encode_s16le(&resampled, &mut payload);
        } else {
            sample::encode_s16le(samples, &mut payload);
        }

        self.send(&payload)
    }

    fn write_end(&mut self) -> Result<()> {
        self.write_squelch(b'Z')
    }

    fn read_data(&mut self, out: &mut [f32]) -> usize {
        let available = self.buffer.len() / 2;
        if available == 0 {
            return 0;
        }

        let Some(resampler) = self.rx_resampler.as_mut() else {
            let n = out.len().min(available);
            let mut bytes = vec![0u8; n * 2];
            self.buffer.get(&mut bytes);

            return sample::decode_s16le(&bytes, out);
        };

        let mut n_out = out.len();
        let mut n_in = (n_out * self.sample_rate as usize) / SAMPLE_RATE as usize;

        if available < n_in {
            n_in = available;
            n_out = (n_in * SAMPLE_RATE as usize) / self.sample_rate as usize;
        }

        let mut bytes = vec![0u8; n_in * 2];
        self.buffer.get(&mut bytes);

        let mut input = vec![0.0f32; n_in];
        sample::decode_s16le(&bytes, &mut input);

        let mut resampled = match resampler.process(&input) {
            Ok(resampled) => resampled,
            Err(e) => {
                error!("Error from the read resampler - {:?}", e);
                return 0;
            }
        };
        resampled.resize(n_out, 0.0);

        out[..n_out].copy_from_slice(&resampled);
        n_out
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
                warn!("FM RAW network read error: {}", e);
                return;
            }
        };

        // The remote end may reply from a different port than it
        // listens on, so only the address is compared.
        if !udp::source_matches(&source, expected, MatchType::AddressOnly) {
            info!("FM RAW packet received from an invalid source");
            return;
        }

        let payload = &datagram[..length];
        if self.debug {
            udp::dump("FM RAW Network Data Received", payload);
        }

        self.buffer.add(payload);
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn close(&mut self) {
        self.socket = None;
        self.squelch = None;

        info!("Closing FM RAW network connection");
    }
}
