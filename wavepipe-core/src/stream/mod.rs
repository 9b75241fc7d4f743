//! Stream contract: the push/pull protocol every pipeline stage implements
//!
//! Samples flow downstream through `AudioSink::write`; flow control and
//! flush completion flow back upstream as explicit values instead of the
//! implicit signal/slot re-entrancy the protocol is usually described
//! with:
//!
//! - A short count from `write` means "stop pushing until resumed".
//! - `flush` returns [`FlushDisposition::Complete`] when the flush
//!   finished synchronously (including the empty-buffer case), or
//!   [`FlushDisposition::Pending`], promising exactly one later
//!   completion.
//! - `resume` pumps deferred work (a downstream drain, a pending flush)
//!   and reports what that produced as [`SinkEvents`].
//!
//! At the producer boundary — where the completion can no longer be a
//! return value because the producer is not in the call stack — events are
//! forwarded over a `tokio::sync::mpsc` channel as [`StreamEvent`]s.
//!
//! # Re-entrancy
//!
//! Any call may produce its paired notification synchronously; callers
//! must handle the returned events before assuming a later wake-up will
//! deliver them. Implementations tolerate being driven again from within
//! event handling (e.g. a `resume` triggering a fresh `write`).

pub mod buffer;
pub mod reader;
pub mod valve;

pub use buffer::{BufferStats, SampleBuffer};
pub use reader::{ReadTap, StreamReader};
pub use valve::Valve;

use tokio::sync::mpsc;

/// Per-stream flow state
///
/// Universal transition rule, honored by every component:
/// write → `Active`; flush while empty → completion emitted immediately;
/// flush while non-empty → `Flushing` until drained; drain completion
/// while `Flushing` → `Idle` plus the completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No data written since the last flush completion
    Idle,

    /// At least one write occurred; more data may still arrive
    Active,

    /// Producer requested a flush; the component is draining
    Flushing,
}

impl Default for StreamState {
    fn default() -> Self {
        StreamState::Idle
    }
}

/// Synchronous answer to a flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDisposition {
    /// The flush finished inside the call; this value *is* the
    /// flush-complete notification (no event follows)
    Complete,

    /// Data is still draining; exactly one `AllFlushed` follows later
    Pending,
}

/// Upward notifications produced while pumping a sink
///
/// The explicit-event replacement for callback re-entrancy: every
/// `resume` call returns the set of notifications it generated, and
/// composite components merge these as they bubble toward the producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkEvents {
    /// A previously short write can continue now
    pub resume: bool,

    /// A pending flush request completed
    pub all_flushed: bool,
}

impl SinkEvents {
    /// No notifications
    pub const NONE: SinkEvents = SinkEvents { resume: false, all_flushed: false };

    /// Combine notifications from two pump steps
    pub fn merge(self, other: SinkEvents) -> SinkEvents {
        SinkEvents {
            resume: self.resume || other.resume,
            all_flushed: self.all_flushed || other.all_flushed,
        }
    }

    /// True if any notification is set
    pub fn any(self) -> bool {
        self.resume || self.all_flushed
    }
}

/// Flow-control notification delivered to an external producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The sink can accept more data after a short write
    Resume,

    /// A flush request has fully drained
    AllFlushed,
}

/// Forward pump notifications onto a producer event channel, if one is
/// registered. Send failures mean the producer dropped its receiver;
/// that is not an error for the pipeline.
pub(crate) fn forward_events(tx: Option<&mpsc::UnboundedSender<StreamEvent>>, events: SinkEvents) {
    let Some(tx) = tx else { return };
    if events.resume {
        let _ = tx.send(StreamEvent::Resume);
    }
    if events.all_flushed {
        let _ = tx.send(StreamEvent::AllFlushed);
    }
}

/// Push-side stream contract implemented by every pipeline stage
pub trait AudioSink {
    /// Push up to `samples.len()` samples downstream
    ///
    /// Returns how many were accepted (`0..=samples.len()`). A short
    /// count is backpressure: the producer must not push more until it
    /// sees a resume notification.
    fn write(&mut self, samples: &[f32]) -> usize;

    /// Declare that no more data is coming right now
    ///
    /// Exactly one completion is delivered per request: synchronously via
    /// the return value, or later as a single `AllFlushed` event. A
    /// repeated flush while one is still pending coalesces with it — the
    /// merged requests share one completion.
    fn flush(&mut self) -> FlushDisposition;

    /// Pump deferred work after downstream capacity may have freed
    ///
    /// Returns the upward notifications the pump produced.
    fn resume(&mut self) -> SinkEvents;

    /// Synchronously and idempotently drop all buffered state without
    /// flushing; no further data is emitted for discarded requests and no
    /// deadline stays armed.
    fn discard(&mut self);

    /// Current stream state
    fn state(&self) -> StreamState;
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn write(&mut self, samples: &[f32]) -> usize {
        (**self).write(samples)
    }

    fn flush(&mut self) -> FlushDisposition {
        (**self).flush()
    }

    fn resume(&mut self) -> SinkEvents {
        (**self).resume()
    }

    fn discard(&mut self) {
        (**self).discard()
    }

    fn state(&self) -> StreamState {
        (**self).state()
    }
}

/// Terminal sink that accepts and discards everything
///
/// Used to cap a chain whose samples have nowhere to go (a muted branch,
/// a mixer source's private buffer before the mixer pulls it, tests).
#[derive(Debug, Default)]
pub struct NullSink {
    state: StreamState,
}

impl NullSink {
    pub fn new() -> Self {
        NullSink { state: StreamState::Idle }
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, samples: &[f32]) -> usize {
        self.state = StreamState::Active;
        samples.len()
    }

    fn flush(&mut self) -> FlushDisposition {
        self.state = StreamState::Idle;
        FlushDisposition::Complete
    }

    fn resume(&mut self) -> SinkEvents {
        SinkEvents::NONE
    }

    fn discard(&mut self) {
        self.state = StreamState::Idle;
    }

    fn state(&self) -> StreamState {
        self.state
    }
}

/// Scriptable sink for unit tests: bounded room, deferrable flushes,
/// recorded samples.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct TestSink {
        /// Samples the sink will still accept (ignored when `auto_room`)
        pub room: usize,
        /// Accept everything regardless of `room`
        pub auto_room: bool,
        /// Every sample accepted, in order
        pub received: Vec<f32>,
        /// Completed flushes (synchronous and deferred)
        pub flushes: usize,
        /// When set, flush requests go pending until `release_flush()`
        pub defer_flush: bool,
        /// Discard call count
        pub discards: usize,
        flush_pending: bool,
        flush_released: bool,
        state: StreamState,
    }

    impl TestSink {
        pub fn new() -> Self {
            TestSink {
                room: 0,
                auto_room: true,
                received: Vec::new(),
                flushes: 0,
                defer_flush: false,
                discards: 0,
                flush_pending: false,
                flush_released: false,
                state: StreamState::Idle,
            }
        }

        pub fn with_room(room: usize) -> Self {
            let mut sink = Self::new();
            sink.auto_room = false;
            sink.room = room;
            sink
        }

        /// Allow `n` more samples through on the next writes
        pub fn add_room(&mut self, n: usize) {
            self.room += n;
        }

        /// Let the next `resume()` complete a deferred flush
        pub fn release_flush(&mut self) {
            self.flush_released = true;
        }
    }

    impl AudioSink for TestSink {
        fn write(&mut self, samples: &[f32]) -> usize {
            self.state = StreamState::Active;
            let n = if self.auto_room { samples.len() } else { samples.len().min(self.room) };
            if !self.auto_room {
                self.room -= n;
            }
            self.received.extend_from_slice(&samples[..n]);
            n
        }

        fn flush(&mut self) -> FlushDisposition {
            if self.defer_flush {
                self.flush_pending = true;
                self.state = StreamState::Flushing;
                FlushDisposition::Pending
            } else {
                self.flushes += 1;
                self.state = StreamState::Idle;
                FlushDisposition::Complete
            }
        }

        fn resume(&mut self) -> SinkEvents {
            if self.flush_pending && self.flush_released {
                self.flush_pending = false;
                self.flush_released = false;
                self.flushes += 1;
                self.state = StreamState::Idle;
                return SinkEvents { resume: false, all_flushed: true };
            }
            SinkEvents::NONE
        }

        fn discard(&mut self) {
            self.discards += 1;
            self.flush_pending = false;
            self.flush_released = false;
            self.state = StreamState::Idle;
        }

        fn state(&self) -> StreamState {
            self.state
        }
    }
}
