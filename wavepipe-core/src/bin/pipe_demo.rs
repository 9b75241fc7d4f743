//! Pipeline demo: two tone generators sharing one (null) device
//!
//! Assembles the full write path — producers → channels → device
//! multiplexer → transport — against the built-in null transport, runs
//! it on the pipeline driver for a while, then flushes and shuts down.
//! Useful for watching the flow-control and flush logging with
//! `RUST_LOG=wavepipe_core=trace`.

use anyhow::{Context, Result};
use clap::Parser;
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavepipe_common::params::PARAMS;
use wavepipe_core::device::{DeviceRegistry, NullTransport, OpenMode};
use wavepipe_core::driver::PipelineDriver;
use wavepipe_core::stream::{AudioSink, FlushDisposition, StreamEvent};

/// Command-line arguments for pipe-demo
#[derive(Parser, Debug)]
#[command(name = "pipe-demo")]
#[command(about = "Stream two tones through a shared wavepipe device")]
#[command(version)]
struct Args {
    /// Config file with tunable parameters
    #[arg(short, long, env = "WAVEPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Device key to attach to
    #[arg(short, long, default_value = "null:demo")]
    device: String,

    /// How long to stream before flushing (ms)
    #[arg(long, default_value = "500")]
    duration_ms: u64,
}

/// Sine generator feeding one channel in small pushes
struct Tone {
    freq: f32,
    phase: f32,
    rate: f32,
}

impl Tone {
    fn new(freq: f32, rate: u32) -> Self {
        Tone { freq, phase: 0.0, rate: rate as f32 }
    }

    fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = 0.4 * (self.phase * TAU).sin();
            self.phase = (self.phase + self.freq / self.rate).fract();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wavepipe_core=debug,wavepipe_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    wavepipe_common::config::init(args.config.as_deref()).context("failed to load config")?;

    let registry = Arc::new(DeviceRegistry::new());
    registry.register_transport("null", NullTransport::factory());

    let mut low = registry
        .attach(&args.device, OpenMode::Write)
        .with_context(|| format!("cannot attach to {}", args.device))?;
    let mut high = registry
        .attach(&args.device, OpenMode::Write)
        .context("cannot attach second channel")?;

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    low.set_event_channel(events_tx.clone());
    high.set_event_channel(events_tx);

    let rate = *PARAMS.sample_rate.read().unwrap();
    info!(device = %args.device, rate, "streaming two tones");

    let driver = PipelineDriver::new(Arc::clone(&registry));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_task = tokio::spawn(driver.run(shutdown_rx));

    let mut tone_low = Tone::new(440.0, rate);
    let mut tone_high = Tone::new(660.0, rate);
    let mut push = vec![0.0f32; *PARAMS.block_size_hint.read().unwrap()];

    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.duration_ms);
    while tokio::time::Instant::now() < deadline {
        tone_low.fill(&mut push);
        let accepted = low.write(&push);
        if accepted < push.len() {
            // Backpressure: wait for the channel's resume notification.
            while !matches!(events_rx.recv().await, Some(StreamEvent::Resume) | None) {}
        }
        tone_high.fill(&mut push);
        high.write(&push);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    info!("flushing");
    for channel in [&mut low, &mut high] {
        if channel.flush() == FlushDisposition::Pending {
            while !matches!(events_rx.recv().await, Some(StreamEvent::AllFlushed) | None) {}
        }
    }
    info!("all channels flushed");

    shutdown_tx.send(true).ok();
    driver_task.await.context("driver task failed")?;

    registry.detach(low);
    registry.detach(high);
    info!("done");
    Ok(())
}
