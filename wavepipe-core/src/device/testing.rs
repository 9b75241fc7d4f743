//! Scriptable transport and sinks for device-layer unit tests

use crate::device::channel::CaptureSink;
use crate::device::transport::{BlockGeometry, OpenMode, Transport};
use crate::error::{Error, Result};
use crate::stream::{AudioSink, FlushDisposition, SinkEvents, StreamState};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared, inspectable state of a [`MockTransport`]
#[derive(Default)]
pub(crate) struct MockState {
    pub open_count: usize,
    pub is_open: bool,
    pub full_duplex: bool,
    /// Every `write_block` call's accepted samples, in order
    pub writes: Vec<Vec<i16>>,
    /// Blocks handed out by successive `read_block` calls
    pub reads_fed: VecDeque<Vec<i16>>,
    pub queued_output: usize,
    /// Cap on samples accepted per `write_block` call
    pub accept_per_call: Option<usize>,
    pub fail_next_write: bool,
    pub fail_next_read: bool,
    /// Number of upcoming `open` calls to fail
    pub fail_opens: usize,
}

/// Transport whose behavior the test scripts through [`MockState`]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
    geometry: BlockGeometry,
}

impl MockTransport {
    pub fn with_geometry(geometry: BlockGeometry) -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState {
            full_duplex: true,
            ..MockState::default()
        }));
        (MockTransport { state: Arc::clone(&state), geometry }, state)
    }

    pub fn with_block_size(block_size: usize) -> (Self, Arc<Mutex<MockState>>) {
        Self::with_geometry(BlockGeometry {
            block_size,
            block_count: 4,
            sample_rate: 8000,
            hw_channels: 1,
        })
    }
}

impl Transport for MockTransport {
    fn open(&mut self, _mode: OpenMode) -> Result<BlockGeometry> {
        let mut state = self.state.lock().unwrap();
        state.open_count += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(Error::Device("injected open failure".into()));
        }
        state.is_open = true;
        Ok(self.geometry)
    }

    fn close(&mut self) {
        self.state.lock().unwrap().is_open = false;
    }

    fn read_block(&mut self, dst: &mut [i16]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(Error::Device("injected read failure".into()));
        }
        match state.reads_fed.pop_front() {
            Some(block) => {
                let n = dst.len().min(block.len());
                dst[..n].copy_from_slice(&block[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write_block(&mut self, src: &[i16]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(Error::Device("injected write failure".into()));
        }
        let n = state.accept_per_call.map_or(src.len(), |cap| cap.min(src.len()));
        state.writes.push(src[..n].to_vec());
        state.queued_output += n;
        Ok(n)
    }

    fn queued_output_samples(&self) -> usize {
        self.state.lock().unwrap().queued_output
    }

    fn is_full_duplex(&self) -> bool {
        self.state.lock().unwrap().full_duplex
    }
}

/// Capture sink that records everything it is given
struct RecordingSink {
    samples: Arc<Mutex<Vec<f32>>>,
    state: StreamState,
}

/// Build a recording capture sink plus the handle to inspect it
pub(crate) fn recording_sink() -> (Arc<Mutex<Vec<f32>>>, CaptureSink) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink {
        samples: Arc::clone(&samples),
        state: StreamState::Idle,
    };
    (samples, Box::new(sink))
}

impl AudioSink for RecordingSink {
    fn write(&mut self, samples: &[f32]) -> usize {
        self.state = StreamState::Active;
        self.samples.lock().unwrap().extend_from_slice(samples);
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
