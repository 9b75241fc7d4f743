//! Binary open/closed gate with flush-state tracking
//!
//! An open valve is transparent: writes and flushes pass straight through
//! to the downstream sink. A closed valve reports every sample as
//! accepted and silently discards it, and completes flushes immediately —
//! the upstream producer's state machine keeps progressing either way, so
//! muting a stream never stalls or spins its producer.
//!
//! The delicate part is closing *while a flush is pending downstream*:
//! the valve then synthesizes the flush completion at once (closing must
//! never leave the producer hanging) and remembers to swallow the real
//! completion when the downstream eventually drains, so the producer
//! never sees a duplicate. Reopening before that happens does not
//! re-trigger anything.

use super::{AudioSink, FlushDisposition, SinkEvents, StreamState};
use tracing::trace;

/// Open/closed gate stage owning its downstream sink
pub struct Valve<D: AudioSink> {
    open: bool,

    /// Idle/Active bookkeeping (Flushing is derived from `flush_pending`)
    state: StreamState,

    /// We owe the producer a flush completion
    flush_pending: bool,

    /// A flush is outstanding in the downstream sink
    downstream_flush_pending: bool,

    /// Completion was synthesized at close time; the real downstream
    /// completion must be swallowed when it arrives
    synthesized: bool,

    downstream: D,
}

impl<D: AudioSink> Valve<D> {
    /// Create an open valve in front of `downstream`
    pub fn new(downstream: D) -> Self {
        Valve {
            open: true,
            state: StreamState::Idle,
            flush_pending: false,
            downstream_flush_pending: false,
            synthesized: false,
            downstream,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Borrow the downstream sink
    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    /// Mutably borrow the downstream sink
    pub fn downstream_mut(&mut self) -> &mut D {
        &mut self.downstream
    }

    /// Open or close the gate
    ///
    /// Closing with a flush pending synthesizes the completion
    /// immediately; the returned events must be forwarded to the producer
    /// like any other pump result.
    pub fn set_open(&mut self, open: bool) -> SinkEvents {
        let mut out = SinkEvents::NONE;
        if open == self.open {
            return out;
        }
        self.open = open;
        trace!(open, "valve toggled");

        if !open && self.flush_pending {
            // The downstream may take arbitrarily long to drain; the
            // producer gets its completion now and the real one is
            // swallowed later.
            self.flush_pending = false;
            self.state = StreamState::Idle;
            out.all_flushed = true;
            if self.downstream_flush_pending {
                self.synthesized = true;
            }
        }
        out
    }
}

impl<D: AudioSink> AudioSink for Valve<D> {
    fn write(&mut self, samples: &[f32]) -> usize {
        self.state = StreamState::Active;
        if self.open {
            self.downstream.write(samples)
        } else {
            // Closed: report everything accepted, emit nothing.
            samples.len()
        }
    }

    fn flush(&mut self) -> FlushDisposition {
        if !self.open {
            self.state = StreamState::Idle;
            // The sub-chain below the gate still drains and settles; its
            // completion is no longer the producer's concern.
            if !self.downstream_flush_pending {
                if self.downstream.flush() == FlushDisposition::Pending {
                    self.downstream_flush_pending = true;
                    self.synthesized = true;
                }
            }
            return FlushDisposition::Complete;
        }

        // A fresh request while a synthesized completion is still
        // outstanding re-uses the in-flight downstream flush: the real
        // completion now answers this request instead of being swallowed.
        if self.synthesized {
            self.synthesized = false;
        }

        match self.downstream.flush() {
            FlushDisposition::Complete => {
                self.flush_pending = false;
                self.downstream_flush_pending = false;
                self.state = StreamState::Idle;
                FlushDisposition::Complete
            }
            FlushDisposition::Pending => {
                self.flush_pending = true;
                self.downstream_flush_pending = true;
                FlushDisposition::Pending
            }
        }
    }

    fn resume(&mut self) -> SinkEvents {
        let mut out = SinkEvents::NONE;
        let down = self.downstream.resume();

        if down.all_flushed {
            debug_assert!(
                self.downstream_flush_pending,
                "flush completion from downstream with no flush outstanding"
            );
            self.downstream_flush_pending = false;
            if self.synthesized {
                // Already reported when the valve closed.
                self.synthesized = false;
            } else if self.flush_pending {
                self.flush_pending = false;
                self.state = StreamState::Idle;
                out.all_flushed = true;
            }
        }

        if down.resume && self.open {
            out.resume = true;
        }
        out
    }

    fn discard(&mut self) {
        self.state = StreamState::Idle;
        self.flush_pending = false;
        self.downstream_flush_pending = false;
        self.synthesized = false;
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
