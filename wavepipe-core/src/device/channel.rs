//! Channel front-end: one logical stream on a shared device
//!
//! A channel composes the write-path chain
//!
//! ```text
//! producer → Valve → SampleBuffer → ReadTap ⇐ DeviceMux pulls
//! ```
//!
//! and, for devices opened for capture, a read-path buffer the
//! multiplexer pushes de-interleaved hardware samples into:
//!
//! ```text
//! DeviceMux → capture SampleBuffer → downstream consumer
//! ```
//!
//! The multiplexer and the producer share the channel state, so the state
//! lives in a `ChannelCore` behind `Arc<Mutex>`; the public [`Channel`]
//! handle is what producers hold. Lock order is always device before
//! core — channel methods that need both take the device lock first.
//!
//! # Flush handshake
//!
//! The hardware transport has no completion callback, only a queue-depth
//! query. A channel flush therefore runs in two steps: ask the
//! multiplexer to drain what is queued, then estimate the remaining drain
//! time (`samples queued in hardware ÷ sample rate`, plus a small margin)
//! and arm a one-shot settle deadline. The deadline passing — observed by
//! the device tick — delivers the single deferred flush completion.
//! While that completion is owed, chain-level flush completions are
//! absorbed instead of forwarded, so the producer never sees two.

use crate::device::multiplexer::DeviceMux;
use crate::stream::{
    forward_events, AudioSink, FlushDisposition, ReadTap, SampleBuffer, SinkEvents, StreamEvent,
    StreamReader, StreamState, Valve,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::trace;

/// Boxed consumer a capture channel delivers into
pub type CaptureSink = Box<dyn AudioSink + Send>;

/// Shared per-channel state (producers on one side, the multiplexer on
/// the other)
pub(crate) struct ChannelCore {
    /// Write-path chain; the tap at its end is where device pulls land
    chain: Valve<SampleBuffer<ReadTap>>,

    /// Pull front paired with the chain's tap
    reader: StreamReader,

    /// Read-path buffer toward the capture consumer (capture mode only)
    capture: Option<SampleBuffer<CaptureSink>>,

    /// Producer-boundary notification channel
    events: Option<mpsc::UnboundedSender<StreamEvent>>,

    /// Channel is in "must flush now" mode (biases the transfer size)
    flush_urgent: bool,

    /// Settle deadline for the deferred flush completion
    settle_at: Option<Instant>,

    /// Exactly one AllFlushed is owed when the settle deadline passes
    completion_owed: bool,

    /// Captured from device geometry at attach time
    sample_rate: u32,

    /// Captured from global params at attach time
    settle_margin: Duration,
}

impl ChannelCore {
    pub(crate) fn new(buffer_capacity: usize, sample_rate: u32, settle_margin: Duration) -> Self {
        let (reader, tap) = StreamReader::new();
        ChannelCore {
            chain: Valve::new(SampleBuffer::new(buffer_capacity, tap)),
            reader,
            capture: None,
            events: None,
            flush_urgent: false,
            settle_at: None,
            completion_owed: false,
            sample_rate,
            settle_margin,
        }
    }

    /// Samples queued for playback, whether this channel demands a flush,
    /// and whether it takes part in transfer sizing at all
    ///
    /// Activity is judged on the post-valve buffer: a gate-closed channel
    /// whose producer keeps writing must not hold the device's transfer
    /// size down at zero.
    pub(crate) fn playback_status(&self) -> (usize, bool, bool) {
        let buffer = self.chain.downstream();
        let queued = buffer.len();
        let active = queued > 0 || self.flush_urgent || buffer.state() != StreamState::Idle;
        (queued, self.flush_urgent, active)
    }

    /// Pull up to `dst.len()` playback samples for the multiplexer
    ///
    /// Forwards the upward events the pull produced, except that a
    /// chain-level flush completion is absorbed while the hardware settle
    /// deadline owns the channel-level one.
    pub(crate) fn read_playback(&mut self, dst: &mut [f32]) -> usize {
        let (filled, mut events) = self.reader.read_into(&mut self.chain, dst);
        if self.completion_owed {
            events.all_flushed = false;
        }
        forward_events(self.events.as_ref(), events);

        if self.flush_urgent
            && self.chain.state() != StreamState::Flushing
            && self.chain.downstream().is_empty()
        {
            // Everything the flush asked for has left the chain; stop
            // biasing the transfer size.
            self.flush_urgent = false;
        }
        filled
    }

    /// Push de-interleaved capture samples toward the consumer
    pub(crate) fn write_capture(&mut self, samples: &[f32]) {
        if let Some(capture) = &mut self.capture {
            capture.write(samples);
        }
    }

    /// First half of the flush handshake: mark urgency, absorb chain
    /// completions, and start the chain flushing
    pub(crate) fn begin_flush(&mut self) {
        self.flush_urgent = true;
        self.completion_owed = true;
        let _ = self.chain.flush();
    }

    /// Second half: decide between synchronous completion and a settle
    /// deadline sized to what is still queued
    pub(crate) fn finish_flush_request(
        &mut self,
        now: Instant,
        queued_hw: usize,
    ) -> FlushDisposition {
        let drained =
            self.chain.state() != StreamState::Flushing && self.chain.downstream().is_empty();
        if drained && queued_hw == 0 {
            self.completion_owed = false;
            self.flush_urgent = false;
            self.settle_at = None;
            return FlushDisposition::Complete;
        }

        let remaining = self.chain.downstream().len() + queued_hw;
        let drain_time = Duration::from_secs_f64(remaining as f64 / self.sample_rate as f64);
        self.settle_at = Some(now + drain_time + self.settle_margin);
        trace!(
            remaining,
            settle_ms = (drain_time + self.settle_margin).as_millis() as u64,
            "flush settling"
        );
        FlushDisposition::Pending
    }

    /// Fire the settle deadline if it has passed
    pub(crate) fn tick(&mut self, now: Instant) {
        if let Some(at) = self.settle_at {
            if at <= now {
                self.settle_at = None;
                if self.completion_owed {
                    self.completion_owed = false;
                    self.flush_urgent = false;
                    forward_events(
                        self.events.as_ref(),
                        SinkEvents { resume: false, all_flushed: true },
                    );
                }
            }
        }
        // Give a parked capture drain a chance to move. The hardware is
        // the producer on this path, so any upward events are dropped.
        if let Some(capture) = &mut self.capture {
            let _ = capture.resume();
        }
    }

    pub(crate) fn write(&mut self, samples: &[f32]) -> usize {
        self.chain.write(samples)
    }

    pub(crate) fn set_gate_open(&mut self, open: bool) {
        let mut events = self.chain.set_open(open);
        if self.completion_owed {
            events.all_flushed = false;
        }
        forward_events(self.events.as_ref(), events);
    }

    pub(crate) fn gate_open(&self) -> bool {
        self.chain.is_open()
    }

    pub(crate) fn set_event_channel(&mut self, tx: mpsc::UnboundedSender<StreamEvent>) {
        self.events = Some(tx);
    }

    pub(crate) fn set_capture_sink(&mut self, sink: CaptureSink, capacity: usize) {
        // Capture keeps the freshest audio: a stalled consumer loses the
        // oldest samples, not the newest.
        let mut buffer = SampleBuffer::new(capacity, sink);
        buffer.set_overwrite_on_full(true);
        self.capture = Some(buffer);
    }

    pub(crate) fn discard(&mut self) {
        self.chain.discard();
        if let Some(capture) = &mut self.capture {
            capture.discard();
        }
        self.flush_urgent = false;
        self.settle_at = None;
        self.completion_owed = false;
    }

    pub(crate) fn state(&self) -> StreamState {
        if self.completion_owed {
            StreamState::Flushing
        } else {
            self.chain.state()
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.chain.downstream().len()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut SampleBuffer<ReadTap> {
        self.chain.downstream_mut()
    }
}

/// Producer-facing handle for one logical stream on a shared device
///
/// Created by [`DeviceRegistry::attach`](crate::device::DeviceRegistry::attach)
/// and returned to the registry with `detach` when done. Cloning is
/// deliberately not offered: one producer per channel keeps the stream
/// contract's backpressure bookkeeping single-owner.
pub struct Channel {
    pub(crate) key: String,
    pub(crate) index: usize,
    pub(crate) core: Arc<Mutex<ChannelCore>>,
    pub(crate) device: Arc<Mutex<DeviceMux>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("key", &self.key)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Full `transport:target` device key this channel is attached to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Channel index within the device (selects the interleave lane)
    pub fn index(&self) -> usize {
        self.index
    }

    /// Register the producer-boundary event channel
    ///
    /// Resume and deferred flush-complete notifications arrive here.
    pub fn set_event_channel(&self, tx: mpsc::UnboundedSender<StreamEvent>) {
        self.core.lock().unwrap().set_event_channel(tx);
    }

    /// Install the consumer for capture data, with the buffer capacity to
    /// smooth over consumer stalls
    pub fn set_capture_sink(&self, sink: CaptureSink, capacity: usize) {
        self.core.lock().unwrap().set_capture_sink(sink, capacity);
    }

    /// Open or close this channel's gate
    ///
    /// A closed gate keeps accepting (and discarding) producer data so
    /// the producer never stalls on a muted stream.
    pub fn set_gate_open(&self, open: bool) {
        self.core.lock().unwrap().set_gate_open(open);
    }

    pub fn gate_open(&self) -> bool {
        self.core.lock().unwrap().gate_open()
    }

    /// Enable destructive overwrite when the playback buffer fills
    pub fn set_overwrite_on_full(&self, overwrite: bool) {
        self.core.lock().unwrap().buffer_mut().set_overwrite_on_full(overwrite);
    }

    /// Enable or disable pre-buffering on the playback buffer
    pub fn set_buffering(&self, enabled: bool) {
        self.core.lock().unwrap().buffer_mut().set_buffering(enabled);
    }

    /// Samples currently queued for playback
    pub fn queued(&self) -> usize {
        self.core.lock().unwrap().queued()
    }
}

impl AudioSink for Channel {
    fn write(&mut self, samples: &[f32]) -> usize {
        self.core.lock().unwrap().write(samples)
    }

    /// Flush toward the hardware
    ///
    /// Must not be called from inside device callbacks (capture sinks):
    /// it takes the device lock.
    fn flush(&mut self) -> FlushDisposition {
        let now = Instant::now();
        let mut device = self.device.lock().unwrap();
        self.core.lock().unwrap().begin_flush();
        device.pump(now);
        let queued_hw = device.queued_output_samples();
        self.core.lock().unwrap().finish_flush_request(now, queued_hw)
    }

    fn resume(&mut self) -> SinkEvents {
        // Drains are driven by the device pump; there is no deferred work
        // to advance from the producer side.
        SinkEvents::NONE
    }

    fn discard(&mut self) {
        self.core.lock().unwrap().discard();
    }

    fn state(&self) -> StreamState {
        self.core.lock().unwrap().state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NullSink;

    fn make_core() -> ChannelCore {
        ChannelCore::new(64, 8000, Duration::from_millis(20))
    }

    #[test]
    fn test_write_parks_samples_until_pulled() {
        let mut core = make_core();
        assert_eq!(core.write(&[0.1, 0.2, 0.3]), 3);
        let (queued, flushing, active) = core.playback_status();
        assert_eq!(queued, 3);
        assert!(!flushing);
        assert!(active);

        let mut dst = [0.0f32; 2];
        assert_eq!(core.read_playback(&mut dst), 2);
        assert_eq!(dst, [0.1, 0.2]);
        assert_eq!(core.queued(), 1);
    }

    #[test]
    fn test_idle_core_is_inactive() {
        let core = make_core();
        let (queued, flushing, active) = core.playback_status();
        assert_eq!(queued, 0);
        assert!(!flushing);
        assert!(!active);
    }

    #[test]
    fn test_flush_empty_channel_completes_synchronously() {
        let mut core = make_core();
        core.begin_flush();
        let disposition = core.finish_flush_request(Instant::now(), 0);
        assert_eq!(disposition, FlushDisposition::Complete);
        assert_eq!(core.state(), StreamState::Idle);
    }

    #[test]
    fn test_flush_with_hardware_queue_arms_settle_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut core = make_core();
        core.set_event_channel(tx);

        core.write(&[0.5; 16]);
        core.begin_flush();
        // Pretend the multiplexer drained the chain into hardware.
        let mut dst = [0.0f32; 16];
        assert_eq!(core.read_playback(&mut dst), 16);

        let now = Instant::now();
        let disposition = core.finish_flush_request(now, 800); // 100 ms at 8 kHz
        assert_eq!(disposition, FlushDisposition::Pending);
        assert_eq!(core.state(), StreamState::Flushing);

        // The chain-level completion was absorbed: nothing yet.
        assert!(rx.try_recv().is_err());

        // Before the estimate passes nothing fires.
        core.tick(now + Duration::from_millis(50));
        assert!(rx.try_recv().is_err());

        // After estimate (100 ms) + margin (20 ms) the single completion
        // arrives.
        core.tick(now + Duration::from_millis(200));
        assert_eq!(rx.try_recv().unwrap(), StreamEvent::AllFlushed);
        assert!(rx.try_recv().is_err());
        assert_eq!(core.state(), StreamState::Idle);

        // Ticking again does not duplicate it.
        core.tick(now + Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flush_urgency_clears_once_drained() {
        let mut core = make_core();
        core.write(&[0.5; 8]);
        core.begin_flush();
        let (_, flushing, _) = core.playback_status();
        assert!(flushing);

        let mut dst = [0.0f32; 8];
        core.read_playback(&mut dst);
        let (queued, flushing, _) = core.playback_status();
        assert_eq!(queued, 0);
        assert!(!flushing);
    }

    #[test]
    fn test_discard_cancels_settle_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut core = make_core();
        core.set_event_channel(tx);

        core.write(&[0.5; 8]);
        core.begin_flush();
        let now = Instant::now();
        assert_eq!(core.finish_flush_request(now, 800), FlushDisposition::Pending);

        core.discard();
        assert_eq!(core.state(), StreamState::Idle);
        assert_eq!(core.queued(), 0);

        // The discarded flush never completes.
        core.tick(now + Duration::from_secs(5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_capture_path_delivers_to_consumer() {
        let mut core = make_core();
        core.set_capture_sink(Box::new(NullSink::new()), 32);
        core.write_capture(&[0.1, 0.2]);
        // NullSink accepted everything; the capture buffer stays empty.
        core.tick(Instant::now());
    }

    #[test]
    fn test_gate_close_does_not_stall_producer() {
        let mut core = make_core();
        core.set_gate_open(false);
        assert!(!core.gate_open());
        assert_eq!(core.write(&[0.1; 100]), 100);
        assert_eq!(core.queued(), 0);
    }
}
