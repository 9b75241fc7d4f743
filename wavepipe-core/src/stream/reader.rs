//! Push-to-pull adapter: bounded synchronous reads from a push chain
//!
//! Some consumers (the device multiplexer, file writers) want "give me up
//! to N samples now" instead of having samples pushed at them. The
//! adapter is two halves sharing one slot:
//!
//! - [`ReadTap`] sits at the downstream end of a push chain. Outside of a
//!   read it accepts nothing, which is exactly the backpressure that
//!   parks samples in the upstream buffer.
//! - [`StreamReader`] performs the pull: it arms the caller's destination
//!   in the tap, pumps the chain with `resume()` (waking any drain the
//!   chain had deferred), then disarms and reports how many samples
//!   landed.
//!
//! Reads never block: a chain with nothing available fills 0 samples.
//! Flush requests pass through the tap and complete immediately — the tap
//! itself stores nothing.

use super::{AudioSink, FlushDisposition, SinkEvents, StreamState};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct TapSlot {
    /// Staging destination for the read in progress
    dest: Vec<f32>,

    /// Samples wanted by the read in progress
    want: usize,

    /// Samples filled so far
    filled: usize,

    /// A read is in progress; writes may land in `dest`
    armed: bool,
}

/// Downstream end of a pull: the sink a chain drains into during a read
#[derive(Debug, Clone)]
pub struct ReadTap {
    slot: Arc<Mutex<TapSlot>>,
}

impl AudioSink for ReadTap {
    fn write(&mut self, samples: &[f32]) -> usize {
        let mut slot = self.slot.lock().unwrap();
        if !slot.armed {
            return 0;
        }
        let n = samples.len().min(slot.want - slot.filled);
        let at = slot.filled;
        slot.dest[at..at + n].copy_from_slice(&samples[..n]);
        slot.filled += n;
        n
    }

    fn flush(&mut self) -> FlushDisposition {
        // Nothing is stored here; forwarding the completion is immediate.
        FlushDisposition::Complete
    }

    fn resume(&mut self) -> SinkEvents {
        SinkEvents::NONE
    }

    fn discard(&mut self) {
        let mut slot = self.slot.lock().unwrap();
        slot.armed = false;
        slot.want = 0;
        slot.filled = 0;
    }

    fn state(&self) -> StreamState {
        // The tap holds no samples and no flush obligations.
        StreamState::Idle
    }
}

/// Pull front of the adapter
#[derive(Debug)]
pub struct StreamReader {
    slot: Arc<Mutex<TapSlot>>,
}

impl StreamReader {
    /// Create a reader and the tap to embed at the end of the chain
    pub fn new() -> (StreamReader, ReadTap) {
        let slot = Arc::new(Mutex::new(TapSlot::default()));
        (StreamReader { slot: Arc::clone(&slot) }, ReadTap { slot })
    }

    /// Read up to `dst.len()` samples out of `chain`
    ///
    /// Arms `dst` as the chain's drain target, pumps the chain, then
    /// disarms. Returns the count actually filled (0 when the chain had
    /// nothing available — this is a non-blocking read) together with the
    /// upward events the pump produced, which the caller forwards to the
    /// producer side.
    pub fn read_into<U: AudioSink>(&mut self, chain: &mut U, dst: &mut [f32]) -> (usize, SinkEvents) {
        {
            let mut slot = self.slot.lock().unwrap();
            debug_assert!(!slot.armed, "read re-entered while a read is in progress");
            slot.armed = true;
            slot.want = dst.len();
            slot.filled = 0;
            slot.dest.resize(dst.len(), 0.0);
        }

        // Wake the chain: buffered samples drain into the armed tap.
        let events = chain.resume();

        let mut slot = self.slot.lock().unwrap();
        slot.armed = false;
        let filled = slot.filled;
        dst[..filled].copy_from_slice(&slot.dest[..filled]);
        (filled, events)
    }
}
