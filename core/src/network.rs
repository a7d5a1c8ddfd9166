//! The contract between the dispatch loop and the remote-side engine.

/// Capability set shared by the USRP, RAW and IAX engines.
///
/// Exactly one implementation exists per `run()` invocation. All methods
/// are non-blocking: `clock` processes at most one pending datagram and
/// fires any due timers, `read_data` only drains what is already
/// buffered.
pub trait RemoteNetwork {
    /// Resolve the remote endpoint, bind the socket and start any
    /// protocol-specific handshake.
    fn open(&mut self) -> crate::Result<()>;

    /// Signal that a local transmission has begun.
    fn write_start(&mut self, callsign: &str) -> crate::Result<()>;

    /// Forward one block of PCM samples (at most `BUFFER_LENGTH`).
    fn write_data(&mut self, samples: &[f32]) -> crate::Result<()>;

    /// Signal that the local transmission has ended.
    fn write_end(&mut self) -> crate::Result<()>;

    /// Drain at most `out.len()` buffered samples; returns the count.
    fn read_data(&mut self, out: &mut [f32]) -> usize;

    /// Advance timers by `ms` and service one pending datagram.
    fn clock(&mut self, ms: u64);

    /// Discard any buffered inbound audio.
    fn reset(&mut self);

    /// Protocol-specific teardown, then socket close.
    fn close(&mut self);
}
