//! Device-layer integration tests over the public API
//!
//! Uses a scripted transport (implemented against the public `Transport`
//! trait, the way a real backend would be) to observe exactly what the
//! multiplexer puts on the wire.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wavepipe_core::device::{
    BlockGeometry, DeviceRegistry, NullTransport, OpenMode, Transport, TransportFactory,
};
use wavepipe_core::error::{Error, Result};
use wavepipe_core::stream::{AudioSink, FlushDisposition, StreamEvent};

/// What the scripted transport observed and how it should behave
#[derive(Default)]
struct WireState {
    writes: Vec<Vec<i16>>,
    queued_output: usize,
    fail_next_write: bool,
    fail_opens: usize,
    open_count: usize,
}

struct ScriptedTransport {
    state: Arc<Mutex<WireState>>,
    geometry: BlockGeometry,
}

impl Transport for ScriptedTransport {
    fn open(&mut self, _mode: OpenMode) -> Result<BlockGeometry> {
        let mut state = self.state.lock().unwrap();
        state.open_count += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(Error::Device("scripted open failure".into()));
        }
        Ok(self.geometry)
    }

    fn close(&mut self) {}

    fn read_block(&mut self, _dst: &mut [i16]) -> Result<usize> {
        Ok(0)
    }

    fn write_block(&mut self, src: &[i16]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(Error::Device("scripted write failure".into()));
        }
        state.writes.push(src.to_vec());
        state.queued_output += src.len();
        Ok(src.len())
    }

    fn queued_output_samples(&self) -> usize {
        self.state.lock().unwrap().queued_output
    }

    fn is_full_duplex(&self) -> bool {
        true
    }
}

fn scripted_factory(state: Arc<Mutex<WireState>>, block_size: usize) -> TransportFactory {
    Box::new(move |_target| {
        Ok(Box::new(ScriptedTransport {
            state: Arc::clone(&state),
            geometry: BlockGeometry {
                block_size,
                block_count: 4,
                sample_rate: 8000,
                hw_channels: 1,
            },
        }) as Box<dyn Transport>)
    })
}

fn pump(registry: &DeviceRegistry, key: &str, now: Instant) {
    let device = registry.device(key).expect("device exists");
    let mut device = device.lock().unwrap();
    device.pump(now);
    device.tick(now);
}

#[test]
fn device_reference_counting_across_three_channels() {
    let registry = DeviceRegistry::new();
    registry.register_transport("null", NullTransport::factory());

    let a = registry.attach("null:shared", OpenMode::Write).unwrap();
    let b = registry.attach("null:shared", OpenMode::Write).unwrap();
    let c = registry.attach("null:shared", OpenMode::Write).unwrap();

    // Exactly one device behind all three channels.
    assert_eq!(registry.device_count(), 1);
    assert_eq!(registry.use_count("null:shared"), Some(3));

    registry.detach(a);
    registry.detach(b);
    assert_eq!(registry.device_count(), 1, "device must survive while a channel remains");

    registry.detach(c);
    assert_eq!(registry.device_count(), 0, "last detach destroys the device");
}

#[test]
fn streamed_samples_reach_the_wire_block_aligned() {
    let state = Arc::new(Mutex::new(WireState::default()));
    let registry = DeviceRegistry::new();
    registry.register_transport("scripted", scripted_factory(Arc::clone(&state), 64));

    let mut channel = registry.attach("scripted:wire", OpenMode::Write).unwrap();
    assert_eq!(channel.write(&vec![0.5f32; 200]), 200);

    pump(&registry, "scripted:wire", Instant::now());

    // 200 queued, not flushing: rounded down to 192; 8 stay queued.
    let wire = state.lock().unwrap();
    assert_eq!(wire.writes.len(), 1);
    assert_eq!(wire.writes[0].len(), 192);
    drop(wire);
    assert_eq!(channel.queued(), 8);

    registry.detach(channel);
}

#[test]
fn flush_emits_final_partial_block_and_settles() {
    let state = Arc::new(Mutex::new(WireState::default()));
    let registry = DeviceRegistry::new();
    registry.register_transport("scripted", scripted_factory(Arc::clone(&state), 64));

    let mut channel = registry.attach("scripted:flush", OpenMode::Write).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    channel.set_event_channel(tx);

    channel.write(&vec![0.5f32; 100]);
    let start = Instant::now();
    let disposition = channel.flush();
    // Data went to hardware (queued there), so completion defers to the
    // settle deadline.
    assert_eq!(disposition, FlushDisposition::Pending);

    // The flush round rounded 100 up to 128 with a zero-padded tail.
    {
        let wire = state.lock().unwrap();
        assert_eq!(wire.writes.len(), 1);
        assert_eq!(wire.writes[0].len(), 128);
        assert!(wire.writes[0][100..].iter().all(|&v| v == 0));
    }
    assert_eq!(channel.queued(), 0);

    // 128 samples queued at 8 kHz = 16 ms, plus the settle margin:
    // nothing may fire immediately.
    pump(&registry, "scripted:flush", start);
    assert!(rx.try_recv().is_err());

    // Well past the estimate the single completion arrives.
    pump(&registry, "scripted:flush", start + Duration::from_secs(1));
    assert_eq!(rx.try_recv().unwrap(), StreamEvent::AllFlushed);
    assert!(rx.try_recv().is_err());

    registry.detach(channel);
}

#[test]
fn device_error_recovery_is_invisible_to_the_channel() {
    let state = Arc::new(Mutex::new(WireState::default()));
    let registry = DeviceRegistry::new();
    registry.register_transport("scripted", scripted_factory(Arc::clone(&state), 64));

    let mut channel = registry.attach("scripted:flaky", OpenMode::Write).unwrap();
    let device = registry.device("scripted:flaky").unwrap();

    channel.write(&vec![0.5f32; 64]);
    state.lock().unwrap().fail_next_write = true;

    let start = Instant::now();
    pump(&registry, "scripted:flaky", start);
    assert!(device.lock().unwrap().is_broken());

    // The logical channel keeps accepting while the device recovers.
    assert_eq!(channel.write(&vec![0.5f32; 64]), 64);

    // Past the retry period the device reopens and streaming resumes.
    pump(&registry, "scripted:flaky", start + Duration::from_millis(1500));
    assert!(!device.lock().unwrap().is_broken());

    pump(&registry, "scripted:flaky", start + Duration::from_millis(1600));
    let wire = state.lock().unwrap();
    assert!(!wire.writes.is_empty());
    assert_eq!(wire.open_count, 2, "initial open plus one successful reopen");

    drop(wire);
    registry.detach(channel);
}

#[test]
fn two_channels_mix_into_one_wire_stream() {
    let state = Arc::new(Mutex::new(WireState::default()));
    let registry = DeviceRegistry::new();
    registry.register_transport("scripted", scripted_factory(Arc::clone(&state), 64));

    let mut a = registry.attach("scripted:mix", OpenMode::Write).unwrap();
    let mut b = registry.attach("scripted:mix", OpenMode::Write).unwrap();

    a.write(&vec![0.25f32; 64]);
    b.write(&vec![0.25f32; 64]);
    pump(&registry, "scripted:mix", Instant::now());

    let wire = state.lock().unwrap();
    assert_eq!(wire.writes.len(), 1);
    assert_eq!(wire.writes[0].len(), 64);
    // 0.25 + 0.25 scaled by 32767, summed on the wire.
    let expected = ((0.25f32 * 32767.0) as i32 * 2) as i16;
    assert!(wire.writes[0].iter().all(|&v| (v - expected).abs() <= 1));

    drop(wire);
    registry.detach(a);
    registry.detach(b);
}

#[test]
fn gate_closed_channel_contributes_silence() {
    let state = Arc::new(Mutex::new(WireState::default()));
    let registry = DeviceRegistry::new();
    registry.register_transport("scripted", scripted_factory(Arc::clone(&state), 64));

    let mut loud = registry.attach("scripted:gate", OpenMode::Write).unwrap();
    let mut muted = registry.attach("scripted:gate", OpenMode::Write).unwrap();
    muted.set_gate_open(false);

    loud.write(&vec![0.5f32; 64]);
    muted.write(&vec![0.5f32; 64]); // fully accepted, silently dropped
    pump(&registry, "scripted:gate", Instant::now());

    let wire = state.lock().unwrap();
    assert_eq!(wire.writes.len(), 1);
    let expected = (0.5f32 * 32767.0) as i16;
    assert!(wire.writes[0].iter().all(|&v| (v - expected).abs() <= 1));

    drop(wire);
    registry.detach(loud);
    registry.detach(muted);
}
