//! Hardware transport interface
//!
//! A transport is the one boundary between the pipeline and a concrete
//! audio backend (sound card, network stream). Everything above it moves
//! `f32` samples; the transport moves fixed-point blocks on its own
//! schedule. Real backends live out of tree — the pipeline only needs
//! the operations here, all of them non-blocking:
//!
//! - `open` negotiates geometry (block size/count, rate, channels) from
//!   the global hints and returns what the hardware actually granted.
//! - `read_block`/`write_block` may transfer fewer samples than asked;
//!   a short count is backpressure, never an error.
//! - `queued_output_samples` reports how much written audio the hardware
//!   has not played yet — the only drain-progress signal a transport has,
//!   used to estimate flush settle time.
//!
//! Errors from an open transport are transient by definition: the device
//! multiplexer answers them with a close+reopen retry loop.

use crate::error::{Error, Result};
use wavepipe_common::params::PARAMS;

/// Direction(s) a device is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Capture only
    Read,

    /// Playback only
    Write,

    /// Both directions
    ReadWrite,
}

impl OpenMode {
    /// True if this mode includes capture
    pub fn reads(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    /// True if this mode includes playback
    pub fn writes(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }

    /// True if this mode covers everything `other` needs
    pub fn covers(self, other: OpenMode) -> bool {
        (!other.reads() || self.reads()) && (!other.writes() || self.writes())
    }

    /// Smallest mode covering both
    pub fn combine(self, other: OpenMode) -> OpenMode {
        if self.covers(other) {
            self
        } else if other.covers(self) {
            other
        } else {
            OpenMode::ReadWrite
        }
    }
}

/// Transfer geometry granted by a transport at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    /// Samples per hardware block, per channel
    pub block_size: usize,

    /// Blocks the transport queues internally
    pub block_count: usize,

    /// Samples per second
    pub sample_rate: u32,

    /// Interleaved hardware channels per frame
    pub hw_channels: usize,
}

impl BlockGeometry {
    /// Geometry built from the global hints (what a transport grants when
    /// it has no constraints of its own)
    pub fn from_params() -> Self {
        BlockGeometry {
            block_size: *PARAMS.block_size_hint.read().unwrap(),
            block_count: *PARAMS.block_count_hint.read().unwrap(),
            sample_rate: *PARAMS.sample_rate.read().unwrap(),
            hw_channels: *PARAMS.channel_count.read().unwrap(),
        }
    }

    /// Wall-clock duration of one block
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }
}

/// One hardware backend instance
///
/// Implementations must not block: a transport with no room (or no data)
/// returns a short count and the multiplexer tries again on the next
/// readiness round.
pub trait Transport: Send {
    /// Open the backend for the given direction(s)
    ///
    /// Returns the granted geometry. Failing here is a configuration
    /// error (bad target, unsupported format) unless the device was
    /// previously working, in which case the caller treats it as
    /// transient and retries.
    fn open(&mut self, mode: OpenMode) -> Result<BlockGeometry>;

    /// Release the backend; safe to call when already closed
    fn close(&mut self);

    /// Read up to one block of interleaved samples
    ///
    /// Returns the number of samples actually read (0 = no data ready).
    fn read_block(&mut self, dst: &mut [i16]) -> Result<usize>;

    /// Write interleaved samples
    ///
    /// Returns the number of samples actually accepted; a short count is
    /// resumed on the next readiness round.
    fn write_block(&mut self, src: &[i16]) -> Result<usize>;

    /// Written samples the hardware has not played out yet
    fn queued_output_samples(&self) -> usize;

    /// True if the backend can be open for read and write at once
    fn is_full_duplex(&self) -> bool;
}

/// Factory creating a transport from the target part of a device key
pub type TransportFactory = Box<dyn Fn(&str) -> Result<Box<dyn Transport>> + Send + Sync>;

/// Transport with no hardware behind it
///
/// Accepts every write, reads silence, queues nothing. Useful for demos,
/// tests and muted device slots; also the reference for how little a
/// transport is allowed to do.
#[derive(Debug, Default)]
pub struct NullTransport {
    open: bool,
}

impl NullTransport {
    pub fn new() -> Self {
        NullTransport { open: false }
    }

    /// Factory for registering under a transport type name
    pub fn factory() -> TransportFactory {
        Box::new(|_target| Ok(Box::new(NullTransport::new()) as Box<dyn Transport>))
    }
}

impl Transport for NullTransport {
    fn open(&mut self, _mode: OpenMode) -> Result<BlockGeometry> {
        self.open = true;
        Ok(BlockGeometry::from_params())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read_block(&mut self, dst: &mut [i16]) -> Result<usize> {
        if !self.open {
            return Err(Error::Device("read on closed transport".into()));
        }
        dst.fill(0);
        Ok(dst.len())
    }

    fn write_block(&mut self, src: &[i16]) -> Result<usize> {
        if !self.open {
            return Err(Error::Device("write on closed transport".into()));
        }
        Ok(src.len())
    }

    fn queued_output_samples(&self) -> usize {
        0
    }

    fn is_full_duplex(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_directions() {
        assert!(OpenMode::Read.reads());
        assert!(!OpenMode::Read.writes());
        assert!(OpenMode::Write.writes());
        assert!(!OpenMode::Write.reads());
        assert!(OpenMode::ReadWrite.reads());
        assert!(OpenMode::ReadWrite.writes());
    }

    #[test]
    fn test_open_mode_combine() {
        assert_eq!(OpenMode::Read.combine(OpenMode::Read), OpenMode::Read);
        assert_eq!(OpenMode::Read.combine(OpenMode::Write), OpenMode::ReadWrite);
        assert_eq!(OpenMode::ReadWrite.combine(OpenMode::Write), OpenMode::ReadWrite);
        assert!(OpenMode::ReadWrite.covers(OpenMode::Read));
        assert!(!OpenMode::Read.covers(OpenMode::Write));
    }

    #[test]
    fn test_null_transport_roundtrip() {
        let mut transport = NullTransport::new();
        let geometry = transport.open(OpenMode::ReadWrite).unwrap();
        assert!(geometry.block_size > 0);

        assert_eq!(transport.write_block(&[1, 2, 3]).unwrap(), 3);
        let mut dst = [7i16; 4];
        assert_eq!(transport.read_block(&mut dst).unwrap(), 4);
        assert_eq!(dst, [0, 0, 0, 0]);
        assert_eq!(transport.queued_output_samples(), 0);

        transport.close();
        assert!(transport.write_block(&[1]).is_err());
    }
}
