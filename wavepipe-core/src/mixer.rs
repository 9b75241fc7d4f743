//! Software N-to-1 mixer
//!
//! Sums any number of independent streams into one output stream, with no
//! hardware involved. Each input writes into its own small private
//! buffer; the mixer pulls from all of them on a *coalesced* schedule:
//!
//! ```text
//! source 0 → write() → private buffer ┐
//! source 1 → write() → private buffer ┼→ poll(): accumulate → output sink
//! source N → write() → private buffer ┘
//! ```
//!
//! A write or flush on any source arms a one-shot deferred fill; the
//! pipeline driver (or whoever assembles the mixer) runs [`Mixer::poll`]
//! after delivering a batch of input data. Deferring the fill gives every
//! input a chance to contribute before an output block is emitted, so one
//! chatty source does not force sample-at-a-time output.
//!
//! The fill takes `n = min` available over active, non-flushing sources
//! (never outrun the slowest input); when every active source is flushing
//! the bias inverts to the maximum, short sources contributing zeros.
//! Once all flushing sources have drained the combined flush is forwarded
//! downstream. Accumulation is plain `f32` addition with **no clipping**
//! — range reduction is the downstream consumer's decision, and clipping
//! here would destroy headroom it may want.

use crate::stream::{
    forward_events, AudioSink, FlushDisposition, ReadTap, SampleBuffer, SinkEvents, StreamEvent,
    StreamReader, StreamState,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;
use wavepipe_common::params::PARAMS;

struct SourceSlot {
    /// Private FIFO this source writes into
    chain: SampleBuffer<ReadTap>,

    /// Pull front paired with the chain's tap
    reader: StreamReader,

    /// Source requested a flush that has not been folded downstream yet
    flushing: bool,

    /// Source was detached; the slot is skipped everywhere
    detached: bool,

    /// Producer-boundary notifications for this source
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

struct MixerInner {
    sources: Vec<SourceSlot>,

    /// Where the mixed stream goes
    output: Box<dyn AudioSink + Send>,

    /// Mixed samples the output sink has not accepted yet
    out_block: Vec<f32>,
    out_pos: usize,

    /// One-shot deferred-fill flag, re-armed by source activity
    fill_pending: bool,

    /// Reused pull scratch
    scratch: Vec<f32>,

    /// Capacity for new source buffers, captured at mixer creation
    source_capacity: usize,
}

impl MixerInner {
    /// Push leftover mixed output to the sink; false while it is short
    fn drain_output(&mut self) -> bool {
        while self.out_pos < self.out_block.len() {
            let accepted = self.output.write(&self.out_block[self.out_pos..]);
            self.out_pos += accepted;
            if accepted == 0 {
                return false;
            }
        }
        self.out_block.clear();
        self.out_pos = 0;
        true
    }

    /// The deferred fill: run until the inputs have nothing more to give
    fn run_fill(&mut self) {
        self.fill_pending = false;

        // Give the sink a chance to free room, then move the leftovers.
        self.output.resume();
        if !self.drain_output() {
            // Sink still short: keep the fill armed and try again on the
            // next poll.
            self.fill_pending = true;
            return;
        }

        loop {
            let mut any_active = false;
            let mut all_flushing = true;
            let mut min_normal: Option<usize> = None;
            let mut max_flushing = 0usize;

            for slot in self.sources.iter().filter(|s| !s.detached) {
                let queued = slot.chain.len();
                let active =
                    queued > 0 || slot.flushing || slot.chain.state() != StreamState::Idle;
                if !active {
                    continue;
                }
                any_active = true;
                if slot.flushing {
                    max_flushing = max_flushing.max(queued);
                } else {
                    all_flushing = false;
                    min_normal = Some(min_normal.map_or(queued, |m| m.min(queued)));
                }
            }

            if !any_active {
                return;
            }

            let n = if all_flushing {
                max_flushing
            } else {
                min_normal.unwrap_or(0)
            };

            if n == 0 {
                if all_flushing {
                    // Every input flushed and drained: fold the combined
                    // flush downstream. Sources already received their
                    // own completions as their buffers emptied.
                    trace!("all mixer sources flushed, forwarding combined flush");
                    let _ = self.output.flush();
                    for slot in &mut self.sources {
                        slot.flushing = false;
                    }
                }
                return;
            }

            // Accumulate n samples from every active source. Short
            // (flushing) sources contribute zeros for the missing span.
            let base = self.out_block.len();
            self.out_block.resize(base + n, 0.0);
            for slot in &mut self.sources {
                if slot.detached {
                    continue;
                }
                let queued = slot.chain.len();
                if queued == 0 && !slot.flushing && slot.chain.state() == StreamState::Idle {
                    continue;
                }
                self.scratch.clear();
                self.scratch.resize(n, 0.0);
                let (got, events) = slot.reader.read_into(&mut slot.chain, &mut self.scratch);
                forward_events(slot.events.as_ref(), events);
                for i in 0..got {
                    self.out_block[base + i] += self.scratch[i];
                }
            }

            if !self.drain_output() {
                self.fill_pending = true;
                return;
            }
        }
    }
}

/// N-to-1 stream combiner
pub struct Mixer {
    inner: Arc<Mutex<MixerInner>>,
}

/// Handle clone: both handles drive the same mix (the driver holds one
/// to run the deferred fill)
impl Clone for Mixer {
    fn clone(&self) -> Self {
        Mixer { inner: Arc::clone(&self.inner) }
    }
}

impl Mixer {
    /// Create a mixer feeding `output`
    ///
    /// Source buffer capacity comes from the global block hints: enough
    /// for a few hardware blocks, small enough that a stalled mixer
    /// pushes back on its producers quickly.
    pub fn new(output: Box<dyn AudioSink + Send>) -> Self {
        let source_capacity = *PARAMS.block_size_hint.read().unwrap()
            * *PARAMS.block_count_hint.read().unwrap();
        Mixer {
            inner: Arc::new(Mutex::new(MixerInner {
                sources: Vec::new(),
                output,
                out_block: Vec::new(),
                out_pos: 0,
                fill_pending: false,
                scratch: Vec::new(),
                source_capacity,
            })),
        }
    }

    /// Add an input stream
    pub fn add_source(&self) -> MixerSource {
        let mut inner = self.inner.lock().unwrap();
        let (reader, tap) = StreamReader::new();
        let capacity = inner.source_capacity;
        inner.sources.push(SourceSlot {
            chain: SampleBuffer::new(capacity, tap),
            reader,
            flushing: false,
            detached: false,
            events: None,
        });
        MixerSource {
            inner: Arc::clone(&self.inner),
            index: inner.sources.len() - 1,
        }
    }

    /// True when source activity has armed the deferred fill
    pub fn needs_poll(&self) -> bool {
        self.inner.lock().unwrap().fill_pending
    }

    /// Run the deferred fill if it is armed; returns whether it ran
    pub fn poll(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !inner.fill_pending {
            return false;
        }
        inner.run_fill();
        true
    }

    /// Mixed samples the output sink has not accepted yet
    pub fn output_backlog(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.out_block.len() - inner.out_pos
    }
}

/// Input handle for one mixer source
///
/// Implements the stream contract: writes land in the source's private
/// buffer and arm the mixer's deferred fill.
pub struct MixerSource {
    inner: Arc<Mutex<MixerInner>>,
    index: usize,
}

impl MixerSource {
    /// Register the producer-boundary event channel for this source
    pub fn set_event_channel(&self, tx: mpsc::UnboundedSender<StreamEvent>) {
        self.inner.lock().unwrap().sources[self.index].events = Some(tx);
    }

    /// Remove this source from the mix
    pub fn detach(self) {
        let mut inner = self.inner.lock().unwrap();
        let slot = &mut inner.sources[self.index];
        slot.detached = true;
        slot.flushing = false;
        // A detached source must not hold the transfer size down.
        inner.fill_pending = true;
    }
}

impl AudioSink for MixerSource {
    fn write(&mut self, samples: &[f32]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let slot = &mut inner.sources[self.index];
        // New data supersedes any completed flush request.
        slot.flushing = false;
        let accepted = slot.chain.write(samples);
        inner.fill_pending = true;
        accepted
    }

    fn flush(&mut self) -> FlushDisposition {
        let mut inner = self.inner.lock().unwrap();
        let slot = &mut inner.sources[self.index];
        slot.flushing = true;
        let disposition = slot.chain.flush();
        inner.fill_pending = true;
        disposition
    }

    fn resume(&mut self) -> SinkEvents {
        // Deferred work runs in Mixer::poll; resume notifications arrive
        // on the source's event channel.
        SinkEvents::NONE
    }

    fn discard(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        let slot = &mut inner.sources[self.index];
        slot.chain.discard();
        slot.flushing = false;
    }

    fn state(&self) -> StreamState {
        let inner = self.inner.lock().unwrap();
        let slot = &inner.sources[self.index];
        if slot.flushing {
            StreamState::Flushing
        } else {
            slot.chain.state()
        }
    }
}
