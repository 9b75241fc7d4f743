//! Device multiplexer: many logical channels, one hardware stream
//!
//! One `DeviceMux` exists per device key and owns the transport. Any
//! number of channels attach; each pump round the mux decides one
//! transfer size for all of them, pulls that much from every active
//! channel, mixes into a single fixed-point block and hands it to the
//! transport (and the reverse for capture).
//!
//! # Transfer sizing
//!
//! The size for a round is the **minimum** queued amount among channels
//! that are not flushing — never outrun the slowest stream. When *every*
//! active channel is flushing the bias inverts to the **maximum**, so the
//! most data gets flushed, not the least. Outside a flush the size is
//! rounded *down* to a block multiple (a partial block never goes out
//! mid-stream); with everyone flushing it is rounded *up* and the tail is
//! zero-padded so the final partial block still gets emitted. This
//! asymmetry is audible contract, not an implementation choice — keep it.
//!
//! # Mixing and underruns
//!
//! Samples are scaled by 32767 with saturation per channel, accumulated
//! in i32 across channels (one lane per channel index, modulo the
//! hardware channel count) and saturated once more on store, so the sum
//! cannot wrap. A channel with less data than the transfer contributes
//! zeros for the missing span. When a round moves nothing at all and the
//! device is configured to zero-fill, one block of silence goes out to
//! keep the hardware clock fed.
//!
//! # Error recovery
//!
//! A transport error closes the device and arms a retry deadline; `tick`
//! attempts close+reopen until it succeeds and transfers stay suppressed
//! while broken. The logical channels never observe the outage.

use crate::device::channel::ChannelCore;
use crate::device::registry::DeviceKey;
use crate::device::transport::{BlockGeometry, OpenMode, Transport};
use crate::error::{Error, Result};
use std::sync::{Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Scale factor between f32 samples in [-1.0, 1.0] and the hardware's
/// fixed-point range
const FIXED_SCALE: f32 = 32767.0;

struct ChannelSlot {
    core: Weak<Mutex<ChannelCore>>,
    index: usize,
}

/// Outcome of one round's transfer sizing
struct TransferRound {
    /// Samples per channel this round
    transfer: usize,

    /// Every active channel is flushing (selects the max/round-up bias)
    all_flushing: bool,
}

/// One shared hardware stream and its attached channels
pub struct DeviceMux {
    key: DeviceKey,
    transport: Box<dyn Transport>,
    mode: Option<OpenMode>,
    geometry: Option<BlockGeometry>,
    channels: Vec<ChannelSlot>,
    next_index: usize,

    /// Mixed block staged for the transport; a short write leaves the
    /// remainder here for the next round
    staged: Vec<i16>,
    staged_pos: usize,

    /// Reused pull/convert scratch (heap, not stack: sized by channel
    /// count and block size at runtime)
    mix_scratch: Vec<f32>,
    accum: Vec<i32>,
    read_scratch: Vec<i16>,
    lane_scratch: Vec<f32>,

    /// Error-recovery state
    broken: bool,
    retry_at: Option<Instant>,
    retry_period: Duration,

    /// Write silence when a round moves nothing
    zero_fill: bool,
}

impl DeviceMux {
    /// Wrap a transport; the device opens lazily on first attach
    pub(crate) fn new(key: DeviceKey, transport: Box<dyn Transport>) -> Self {
        use wavepipe_common::params::PARAMS;
        DeviceMux {
            key,
            transport,
            mode: None,
            geometry: None,
            channels: Vec::new(),
            next_index: 0,
            staged: Vec::new(),
            staged_pos: 0,
            mix_scratch: Vec::new(),
            accum: Vec::new(),
            read_scratch: Vec::new(),
            lane_scratch: Vec::new(),
            broken: false,
            retry_at: None,
            retry_period: Duration::from_millis(*PARAMS.device_retry_ms.read().unwrap()),
            zero_fill: *PARAMS.underrun_zero_fill.read().unwrap(),
        }
    }

    /// Open the transport, widening the mode if a new direction is needed
    pub(crate) fn ensure_open(&mut self, mode: OpenMode) -> Result<()> {
        match self.mode {
            None => {
                let geometry = self.transport.open(mode)?;
                debug!(
                    device = %self.key,
                    ?mode,
                    block_size = geometry.block_size,
                    sample_rate = geometry.sample_rate,
                    hw_channels = geometry.hw_channels,
                    "device opened"
                );
                self.geometry = Some(geometry);
                self.mode = Some(mode);
                Ok(())
            }
            Some(current) if current.covers(mode) => Ok(()),
            Some(current) => {
                if !self.transport.is_full_duplex() {
                    return Err(Error::Config(format!(
                        "device {} cannot be open for read and write at once",
                        self.key
                    )));
                }
                let combined = current.combine(mode);
                self.transport.close();
                let geometry = self.transport.open(combined)?;
                debug!(device = %self.key, ?combined, "device reopened full-duplex");
                self.geometry = Some(geometry);
                self.mode = Some(combined);
                Ok(())
            }
        }
    }

    pub(crate) fn attach_core(&mut self, core: Weak<Mutex<ChannelCore>>) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.channels.push(ChannelSlot { core, index });
        index
    }

    pub(crate) fn detach_core(&mut self, index: usize) {
        self.channels.retain(|slot| slot.index != index);
    }

    pub(crate) fn close(&mut self) {
        self.transport.close();
        self.mode = None;
        self.broken = false;
        self.retry_at = None;
        self.staged.clear();
        self.staged_pos = 0;
        debug!(device = %self.key, "device closed");
    }

    /// Granted geometry, if the device has opened
    pub fn geometry(&self) -> Option<BlockGeometry> {
        self.geometry
    }

    /// Sample rate the device runs at
    pub fn sample_rate(&self) -> u32 {
        self.geometry
            .map(|g| g.sample_rate)
            .unwrap_or_else(|| *wavepipe_common::params::PARAMS.sample_rate.read().unwrap())
    }

    /// Written samples the hardware has not played yet
    pub fn queued_output_samples(&self) -> usize {
        self.transport.queued_output_samples()
    }

    /// True while error recovery is in progress
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn attached_channels(&self) -> usize {
        self.channels.len()
    }

    /// One transfer round: capture in, playback out
    ///
    /// Driven by hardware readiness (the driver's block-period loop) or
    /// an explicit wake such as a channel flush.
    pub fn pump(&mut self, now: Instant) {
        if self.broken {
            return;
        }
        self.pump_read(now);
        self.pump_write(now);
    }

    /// Fire deadlines: device retry and per-channel flush settles
    pub fn tick(&mut self, now: Instant) {
        if self.broken {
            if let Some(at) = self.retry_at {
                if at <= now {
                    self.try_reopen(now);
                }
            }
        }

        self.channels.retain(|slot| slot.core.strong_count() > 0);
        for slot in &self.channels {
            if let Some(core) = slot.core.upgrade() {
                core.lock().unwrap().tick(now);
            }
        }
    }

    fn try_reopen(&mut self, now: Instant) {
        let mode = self.mode.expect("broken device must have been open");
        match self.transport.open(mode) {
            Ok(geometry) => {
                info!(device = %self.key, "device recovered");
                self.geometry = Some(geometry);
                self.broken = false;
                self.retry_at = None;
            }
            Err(e) => {
                debug!(device = %self.key, error = %e, "device reopen failed, will retry");
                self.retry_at = Some(now + self.retry_period);
            }
        }
    }

    fn enter_recovery(&mut self, now: Instant, error: Error) {
        warn!(device = %self.key, error = %error, "device error, entering retry recovery");
        self.transport.close();
        self.broken = true;
        self.staged.clear();
        self.staged_pos = 0;
        self.retry_at = Some(now + self.retry_period);
    }

    fn pump_read(&mut self, now: Instant) {
        let Some(mode) = self.mode else { return };
        let Some(geometry) = self.geometry else { return };
        if !mode.reads() {
            return;
        }

        let frame_samples = geometry.block_size * geometry.hw_channels;
        self.read_scratch.resize(frame_samples, 0);
        let read = match self.transport.read_block(&mut self.read_scratch[..frame_samples]) {
            Ok(n) => n,
            Err(e) => {
                self.enter_recovery(now, e);
                return;
            }
        };
        if read == 0 {
            return;
        }
        let frames = read / geometry.hw_channels;

        // De-interleave one lane per channel and push it up the capture
        // path.
        let mut lane_scratch = std::mem::take(&mut self.lane_scratch);
        for slot in &self.channels {
            let Some(core) = slot.core.upgrade() else { continue };
            let lane = slot.index % geometry.hw_channels;
            lane_scratch.clear();
            lane_scratch.extend(
                (0..frames)
                    .map(|f| self.read_scratch[f * geometry.hw_channels + lane] as f32 / FIXED_SCALE),
            );
            core.lock().unwrap().write_capture(&lane_scratch);
        }
        self.lane_scratch = lane_scratch;
    }

    fn pump_write(&mut self, now: Instant) {
        let Some(mode) = self.mode else { return };
        let Some(geometry) = self.geometry else { return };
        if !mode.writes() {
            return;
        }

        // A previously short block goes out before anything new.
        if !self.push_staged(now) {
            return;
        }

        let Some(round) = self.transfer_size(geometry.block_size) else {
            // No active channel: an idle device is not an underrun.
            return;
        };
        let transfer = round.transfer;
        if transfer == 0 {
            if round.all_flushing {
                // Flush tails fully drained; nothing left to force out.
                return;
            }
            if self.zero_fill {
                // Underrun: one block of silence keeps the clock fed.
                self.staged.clear();
                self.staged
                    .resize(geometry.block_size * geometry.hw_channels, 0);
                self.staged_pos = 0;
                self.push_staged(now);
            }
            return;
        }

        trace!(device = %self.key, transfer, "transfer round");
        let hw = geometry.hw_channels;
        self.accum.clear();
        self.accum.resize(transfer * hw, 0);

        let mut scratch = std::mem::take(&mut self.mix_scratch);
        for slot in &self.channels {
            let Some(core) = slot.core.upgrade() else { continue };
            let mut core = core.lock().unwrap();
            let (_, _, active) = core.playback_status();
            if !active {
                continue;
            }
            scratch.clear();
            scratch.resize(transfer, 0.0);
            let pulled = core.read_playback(&mut scratch);
            drop(core);

            let lane = slot.index % hw;
            for (s, &value) in scratch[..pulled].iter().enumerate() {
                let fixed = (value * FIXED_SCALE).clamp(-FIXED_SCALE, FIXED_SCALE) as i32;
                self.accum[s * hw + lane] += fixed;
            }
        }
        self.mix_scratch = scratch;

        self.staged.clear();
        self.staged
            .extend(self.accum.iter().map(|&v| v.clamp(-32767, 32767) as i16));
        self.staged_pos = 0;
        self.push_staged(now);
    }

    /// Per-round transfer size in samples per channel
    ///
    /// Minimum queued across non-flushing channels, maximum across
    /// flushing ones when no one else is left; rounded down to a block
    /// multiple outside a flush, up (zero-padded) inside one. `None`
    /// when no attached channel is active at all.
    fn transfer_size(&self, block_size: usize) -> Option<TransferRound> {
        let mut any_active = false;
        let mut all_flushing = true;
        let mut min_normal: Option<usize> = None;
        let mut max_flushing = 0usize;

        for slot in &self.channels {
            let Some(core) = slot.core.upgrade() else { continue };
            let (queued, flushing, active) = core.lock().unwrap().playback_status();
            if !active {
                continue;
            }
            any_active = true;
            if flushing {
                max_flushing = max_flushing.max(queued);
            } else {
                all_flushing = false;
                min_normal = Some(min_normal.map_or(queued, |m| m.min(queued)));
            }
        }

        if !any_active {
            return None;
        }

        let raw = if all_flushing {
            max_flushing
        } else {
            min_normal.unwrap_or(0)
        };

        let transfer = if raw % block_size == 0 {
            raw
        } else if all_flushing {
            (raw / block_size + 1) * block_size
        } else {
            (raw / block_size) * block_size
        };
        Some(TransferRound { transfer, all_flushing })
    }

    /// Write the staged block out; false when it could not fully drain
    /// (backpressure or the device breaking)
    fn push_staged(&mut self, now: Instant) -> bool {
        while self.staged_pos < self.staged.len() {
            match self.transport.write_block(&self.staged[self.staged_pos..]) {
                Ok(0) => return false,
                Ok(n) => {
                    self.staged_pos += n;
                    if self.staged_pos < self.staged.len() {
                        // Partial transfer: resume on the next readiness
                        // round.
                        return false;
                    }
                }
                Err(e) => {
                    self.enter_recovery(now, e);
                    return false;
                }
            }
        }
        true
    }
}
