// ABOUTME: In-process sink that captures every written block
// ABOUTME: Used to drive the engine without a device, with failure injection for each call

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::audio::output::{send_block, stall_timeout, Sink, SinkHandle};
use crate::audio::SampleFormat;
use crate::error::Error;

/// Parameters an output was opened with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenedOutput {
    /// Channel that opened the output
    pub channel: usize,
    /// Frames per block
    pub frames: u32,
    /// Frequency in Hz
    pub frequency: u32,
    /// Sample layout
    pub format: SampleFormat,
}

struct Output {
    params: OpenedOutput,
    tx: Sender<Vec<i16>>,
    rx: Receiver<Vec<i16>>,
}

/// Sink that records blocks instead of playing them
///
/// Each open output gets its own queue; [`MemorySink::blocks`] hands out a
/// receiver for it. Queues are unbounded unless
/// [`with_queue_limit`](MemorySink::with_queue_limit) caps them, in which case
/// a write behaves like a device write and gives up once the queue stays full.
pub struct MemorySink {
    next_handle: AtomicI32,
    outputs: Mutex<HashMap<SinkHandle, Output>>,
    history: Mutex<Vec<(SinkHandle, OpenedOutput)>>,

    fail_init: AtomicBool,
    fail_open: AtomicBool,
    invalid_handles: AtomicBool,
    fail_write: AtomicBool,
    write_delay_micros: AtomicU64,
    queue_limit: Option<usize>,

    init_calls: AtomicUsize,
    open_calls: AtomicUsize,
    write_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemorySink {
    /// Create a sink that accepts everything
    pub fn new() -> Self {
        Self {
            next_handle: AtomicI32::new(1),
            outputs: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            invalid_handles: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            write_delay_micros: AtomicU64::new(0),
            queue_limit: None,
            init_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Make every write sleep for `delay`, like a device draining its queue
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.write_delay_micros
            .store(delay.as_micros() as u64, Ordering::Relaxed);
        self
    }

    /// Cap every output queue at `limit` blocks, like a device that stops pulling
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    /// Fail subsequent `init` calls
    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::Relaxed);
    }

    /// Fail subsequent `open` calls with an error
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent `open` calls return handle 0
    pub fn set_invalid_handles(&self, invalid: bool) {
        self.invalid_handles.store(invalid, Ordering::Relaxed);
    }

    /// Fail subsequent `write` calls
    pub fn set_fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::Relaxed);
    }

    /// Receiver yielding every block written to `handle`, in order
    pub fn blocks(&self, handle: SinkHandle) -> Option<Receiver<Vec<i16>>> {
        self.outputs.lock().get(&handle).map(|o| o.rx.clone())
    }

    /// Parameters of a currently open output
    pub fn opened(&self, handle: SinkHandle) -> Option<OpenedOutput> {
        self.outputs.lock().get(&handle).map(|o| o.params.clone())
    }

    /// Whether `handle` is open
    pub fn is_open(&self, handle: SinkHandle) -> bool {
        self.outputs.lock().contains_key(&handle)
    }

    /// Number of open outputs
    pub fn open_outputs(&self) -> usize {
        self.outputs.lock().len()
    }

    /// Every successful open, oldest first
    pub fn open_history(&self) -> Vec<(SinkHandle, OpenedOutput)> {
        self.history.lock().clone()
    }

    /// Number of `init` calls
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::Relaxed)
    }

    /// Number of `open` calls, failed ones included
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::Relaxed)
    }

    /// Number of `write` calls, failed ones included
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for MemorySink {
    fn init(&self) -> Result<(), Error> {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_init.load(Ordering::Relaxed) {
            return Err(Error::SinkInit("memory sink refused init".to_string()));
        }
        Ok(())
    }

    fn open(
        &self,
        channel: usize,
        frames: u32,
        frequency: u32,
        format: SampleFormat,
    ) -> Result<SinkHandle, Error> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_open.load(Ordering::Relaxed) {
            return Err(Error::SinkOpen {
                channel,
                reason: "memory sink refused open".to_string(),
            });
        }
        if self.invalid_handles.load(Ordering::Relaxed) {
            return Ok(SinkHandle(0));
        }

        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let params = OpenedOutput {
            channel,
            frames,
            frequency,
            format,
        };
        let (tx, rx) = match self.queue_limit {
            Some(limit) => bounded(limit),
            None => unbounded(),
        };
        self.history.lock().push((handle, params.clone()));
        self.outputs.lock().insert(handle, Output { params, tx, rx });
        Ok(handle)
    }

    fn write(&self, handle: SinkHandle, block: &[i16]) -> Result<(), Error> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_write.load(Ordering::Relaxed) {
            return Err(Error::Output(format!("memory sink refused write on {:?}", handle)));
        }

        let (tx, timeout) = self
            .outputs
            .lock()
            .get(&handle)
            .map(|o| (o.tx.clone(), stall_timeout(o.params.frames, o.params.frequency)))
            .ok_or_else(|| Error::Output(format!("unknown sink handle {:?}", handle)))?;
        send_block(&tx, block, timeout)?;

        let delay = self.write_delay_micros.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay));
        }
        Ok(())
    }

    fn close(&self, handle: SinkHandle) {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.outputs.lock().remove(&handle);
    }
}
