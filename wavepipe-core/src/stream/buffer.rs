//! Bounded sample buffer with overwrite and pre-buffering policy
//!
//! This is the FIFO stage of a channel chain. It owns its downstream sink
//! and parks samples the downstream cannot take yet:
//!
//! ```text
//! producer → write()
//!               ↓ (fast path: buffer empty → straight through)
//!          SampleBuffer (head/tail ring, capacity fixed until resized)
//!               ↓ drain on: write-full, flush, resume
//!          downstream sink
//! ```
//!
//! Policy knobs:
//! - `overwrite_on_full`: a full ring destructively drops its oldest
//!   sample instead of rejecting the new one (jitter-buffer behavior for
//!   live sources where stale audio is worse than lost audio).
//! - `set_buffering(false)` takes effect only once the ring next becomes
//!   empty — samples already accepted still drain normally, so disabling
//!   buffering never loses data. Re-enabling is immediate.
//!
//! Samples are copied in and out, never aliased across components; the
//! ring storage is owned exclusively by this buffer.

use super::{AudioSink, FlushDisposition, SinkEvents, StreamState};
use tracing::{debug, trace};

/// Ring-buffer FIFO stage owning its downstream sink
pub struct SampleBuffer<D: AudioSink> {
    /// Ring storage; `data.len()` is the capacity
    data: Vec<f32>,

    /// Next write index (mod capacity)
    head: usize,

    /// Next read index (mod capacity)
    tail: usize,

    /// Disambiguates `head == tail`: true means full, false means empty
    is_full: bool,

    /// Idle/Active bookkeeping (Flushing is derived from `flush_pending`)
    state: StreamState,

    /// A flush request is outstanding and not yet completed
    flush_pending: bool,

    /// Our ring drained; waiting on the downstream flush to complete
    awaiting_downstream: bool,

    /// Whether writes may park samples in the ring
    buffering_enabled: bool,

    /// Buffering was disabled mid-stream; applies once the ring empties
    disable_pending: bool,

    /// Full ring drops oldest samples instead of rejecting new ones
    overwrite_on_full: bool,

    /// Last write returned a short count; a later drain owes a resume
    producer_blocked: bool,

    /// Lifetime counters for diagnostics
    total_in: u64,
    total_out: u64,
    overwritten: u64,

    downstream: D,
}

impl<D: AudioSink> SampleBuffer<D> {
    /// Create a buffer with the given capacity in samples
    ///
    /// Buffering starts enabled, overwrite-on-full starts disabled.
    /// Capacity 0 is allowed: the buffer then only passes through what
    /// the downstream takes directly.
    pub fn new(capacity: usize, downstream: D) -> Self {
        SampleBuffer {
            data: vec![0.0; capacity],
            head: 0,
            tail: 0,
            is_full: false,
            state: StreamState::Idle,
            flush_pending: false,
            awaiting_downstream: false,
            buffering_enabled: true,
            disable_pending: false,
            overwrite_on_full: false,
            producer_blocked: false,
            total_in: 0,
            total_out: 0,
            overwritten: 0,
            downstream,
        }
    }

    /// Number of samples currently buffered
    pub fn len(&self) -> usize {
        let cap = self.data.len();
        if self.is_full {
            cap
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            cap - self.tail + self.head
        }
    }

    /// True when no samples are buffered
    pub fn is_empty(&self) -> bool {
        !self.is_full && self.head == self.tail
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Free space in samples
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn overwrite_on_full(&self) -> bool {
        self.overwrite_on_full
    }

    pub fn set_overwrite_on_full(&mut self, overwrite: bool) {
        self.overwrite_on_full = overwrite;
    }

    pub fn buffering_enabled(&self) -> bool {
        self.buffering_enabled
    }

    /// Enable or disable buffering
    ///
    /// Enabling takes effect immediately. Disabling takes effect only
    /// once the ring next becomes empty: in-flight samples still drain
    /// normally so no accepted data is lost.
    pub fn set_buffering(&mut self, enabled: bool) {
        if enabled {
            self.buffering_enabled = true;
            self.disable_pending = false;
        } else if self.is_empty() {
            self.buffering_enabled = false;
            self.disable_pending = false;
        } else {
            self.disable_pending = true;
        }
    }

    /// Change the ring capacity, clearing all contents
    pub fn resize(&mut self, capacity: usize) {
        debug!(
            old = self.data.len(),
            new = capacity,
            dropped = self.len(),
            "resizing sample buffer"
        );
        self.data = vec![0.0; capacity];
        self.head = 0;
        self.tail = 0;
        self.is_full = false;
        if self.disable_pending {
            self.buffering_enabled = false;
            self.disable_pending = false;
        }
    }

    /// Borrow the downstream sink
    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    /// Mutably borrow the downstream sink
    pub fn downstream_mut(&mut self) -> &mut D {
        &mut self.downstream
    }

    /// Snapshot of buffer state for monitoring
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity(),
            occupied: self.len(),
            free: self.free(),
            state: self.state(),
            total_in: self.total_in,
            total_out: self.total_out,
            overwritten: self.overwritten,
        }
    }

    /// Advance the read index after `n` samples left the ring
    fn consume(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.tail = (self.tail + n) % self.data.len();
        self.is_full = false;
        self.total_out += n as u64;
        if self.is_empty() && self.disable_pending {
            self.buffering_enabled = false;
            self.disable_pending = false;
        }
    }

    /// Push as much buffered data as the downstream will take
    fn drain_downstream(&mut self) {
        while !self.is_empty() {
            let run = if self.tail < self.head {
                self.head - self.tail
            } else {
                // wrapped (or full): readable run ends at the ring edge
                self.data.len() - self.tail
            };
            let accepted = self.downstream.write(&self.data[self.tail..self.tail + run]);
            self.consume(accepted);
            if accepted < run {
                break;
            }
        }
    }

    /// Copy samples into the ring, draining/overwriting on full
    fn buffer_samples(&mut self, samples: &[f32]) -> usize {
        let cap = self.data.len();
        if cap == 0 || !self.buffering_enabled {
            return 0;
        }
        let mut copied = 0;
        while copied < samples.len() {
            if self.is_full {
                // A full ring first gets a chance to drain downstream.
                self.drain_downstream();
                if self.is_full {
                    if self.overwrite_on_full {
                        // Drop the oldest sample to make room.
                        self.tail = (self.tail + 1) % cap;
                        self.is_full = false;
                        self.overwritten += 1;
                        if self.overwritten % 1000 == 0 {
                            trace!(total = self.overwritten, "buffer overwrote oldest samples");
                        }
                    } else {
                        break;
                    }
                }
            }
            let run = if self.head >= self.tail {
                cap - self.head
            } else {
                self.tail - self.head
            };
            let n = run.min(samples.len() - copied);
            self.data[self.head..self.head + n].copy_from_slice(&samples[copied..copied + n]);
            self.head = (self.head + n) % cap;
            if self.head == self.tail {
                self.is_full = true;
            }
            copied += n;
        }
        copied
    }

    /// Ask the downstream to flush once our ring has fully drained
    fn flush_downstream(&mut self) -> bool {
        match self.downstream.flush() {
            FlushDisposition::Complete => {
                self.flush_pending = false;
                self.awaiting_downstream = false;
                self.state = StreamState::Idle;
                true
            }
            FlushDisposition::Pending => {
                self.awaiting_downstream = true;
                false
            }
        }
    }
}

impl<D: AudioSink> AudioSink for SampleBuffer<D> {
    fn write(&mut self, samples: &[f32]) -> usize {
        self.state = StreamState::Active;
        self.producer_blocked = false;

        let mut accepted = 0;
        // Fast path: with nothing buffered, hand samples straight to the
        // downstream and only park the remainder.
        if self.is_empty() {
            accepted = self.downstream.write(samples);
        }
        accepted += self.buffer_samples(&samples[accepted..]);

        self.total_in += accepted as u64;
        if accepted < samples.len() {
            self.producer_blocked = true;
            trace!(
                requested = samples.len(),
                accepted,
                occupied = self.len(),
                "buffer write short, producer must wait for resume"
            );
        }
        accepted
    }

    fn flush(&mut self) -> FlushDisposition {
        self.flush_pending = true;
        if !self.is_empty() {
            self.drain_downstream();
        }
        if self.is_empty() && !self.awaiting_downstream && self.flush_downstream() {
            return FlushDisposition::Complete;
        }
        FlushDisposition::Pending
    }

    fn resume(&mut self) -> SinkEvents {
        let mut out = SinkEvents::NONE;

        // Let the downstream advance its own deferred work first; its
        // completion may satisfy our pending flush.
        let down = self.downstream.resume();
        if down.all_flushed && self.awaiting_downstream {
            self.flush_pending = false;
            self.awaiting_downstream = false;
            self.state = StreamState::Idle;
            out.all_flushed = true;
        }

        self.drain_downstream();
        if self.flush_pending && !self.awaiting_downstream && self.is_empty() && self.flush_downstream()
        {
            out.all_flushed = true;
        }

        if self.producer_blocked && self.free() > 0 {
            self.producer_blocked = false;
            out.resume = true;
        }
        out
    }

    fn discard(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.is_full = false;
        self.flush_pending = false;
        self.awaiting_downstream = false;
        self.producer_blocked = false;
        self.state = StreamState::Idle;
        if self.disable_pending {
            self.buffering_enabled = false;
            self.disable_pending = false;
        }
        self.downstream.discard();
    }

    fn state(&self) -> StreamState {
        if self.flush_pending {
            StreamState::Flushing
        } else {
            self.state
        }
    }
}

/// Buffer statistics snapshot
#[derive(Debug, Clone, Copy)]
pub struct BufferStats {
    /// Ring capacity in samples
    pub capacity: usize,

    /// Currently buffered samples
    pub occupied: usize,

    /// Free space in samples
    pub free: usize,

    /// Stream state at snapshot time
    pub state: StreamState,

    /// Lifetime samples accepted (direct + buffered)
    pub total_in: u64,

    /// Lifetime samples handed downstream
    pub total_out: u64,

    /// Lifetime samples destructively dropped by overwrite-on-full
    pub overwritten: u64,
}
