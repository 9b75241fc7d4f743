//! Pipeline driver: the timing loop behind the synchronous components
//!
//! The pipeline itself is synchronous and single-threaded; nothing in
//! `stream`, `device` or `mixer` needs a runtime. What those components
//! do need is somebody to call `pump`/`tick`/`poll` when time passes.
//! This module is that somebody: a current-thread tokio loop that
//!
//! - pumps every registered device at its block cadence (the stand-in
//!   for hardware readiness notification),
//! - fires device retry deadlines and channel flush settles via `tick`,
//! - runs any watched mixer's deferred fill.
//!
//! All pipeline logic stays in the components, so unit tests drive them
//! directly with manufactured `Instant`s and never need a runtime.

use crate::device::DeviceRegistry;
use crate::mixer::Mixer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

/// Fallback cadence before any device has negotiated geometry
const IDLE_PERIOD: Duration = Duration::from_millis(20);

/// Drives a registry's devices (and optionally mixers) until shutdown
pub struct PipelineDriver {
    registry: Arc<DeviceRegistry>,
    mixers: Vec<Mixer>,
}

impl PipelineDriver {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        PipelineDriver { registry, mixers: Vec::new() }
    }

    /// Also run this mixer's deferred fill on every loop turn
    pub fn watch_mixer(&mut self, mixer: &Mixer) {
        self.mixers.push(mixer.clone());
    }

    /// Run until `shutdown` turns true (or its sender is dropped)
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!("pipeline driver started");
        loop {
            let now = Instant::now();
            let mut period = IDLE_PERIOD;

            for device in self.registry.devices() {
                let mut device = device.lock().unwrap();
                device.pump(now);
                device.tick(now);
                if let Some(geometry) = device.geometry() {
                    period = period.min(geometry.block_duration());
                }
            }

            for mixer in &self.mixers {
                mixer.poll();
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("pipeline driver stopped");
    }
}
