// ABOUTME: Sink that discards audio at the rate a device would consume it
// ABOUTME: Lets the engine run headless with realistic loop pacing

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::output::{Sink, SinkHandle};
use crate::audio::SampleFormat;
use crate::error::Error;

/// Headless sink: every write sleeps for the block's playback time
pub struct NullSink {
    next_handle: AtomicI32,
    outputs: Mutex<HashMap<SinkHandle, (u32, SampleFormat)>>,
}

impl NullSink {
    /// Create a new null sink
    pub fn new() -> Self {
        Self {
            next_handle: AtomicI32::new(1),
            outputs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for NullSink {
    fn init(&self) -> Result<(), Error> {
        log::info!("[orbis-audio] null sink initialized");
        Ok(())
    }

    fn open(
        &self,
        channel: usize,
        _frames: u32,
        frequency: u32,
        format: SampleFormat,
    ) -> Result<SinkHandle, Error> {
        if frequency == 0 {
            return Err(Error::SinkOpen {
                channel,
                reason: "frequency must be non-zero".to_string(),
            });
        }
        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.outputs.lock().insert(handle, (frequency, format));
        Ok(handle)
    }

    fn write(&self, handle: SinkHandle, block: &[i16]) -> Result<(), Error> {
        let (frequency, format) = self
            .outputs
            .lock()
            .get(&handle)
            .copied()
            .ok_or_else(|| Error::Output(format!("unknown sink handle {:?}", handle)))?;

        let frames = (block.len() / format.channels()) as u64;
        std::thread::sleep(Duration::from_micros(frames * 1_000_000 / frequency as u64));
        Ok(())
    }

    fn close(&self, handle: SinkHandle) {
        self.outputs.lock().remove(&handle);
    }
}
