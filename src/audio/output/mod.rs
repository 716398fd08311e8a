// ABOUTME: Output sink trait and implementations
// ABOUTME: Abstracts the platform device layer behind init/open/write/close

/// cpal-based sink playing on the default output device
#[cfg(feature = "cpal-output")]
pub mod cpal_output;
/// In-process sink that captures every block
pub mod memory;
/// Sink that discards blocks at device pace
pub mod null;

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalSink;
pub use memory::MemorySink;
pub use null::NullSink;

use std::time::Duration;

use crossbeam::channel::{SendTimeoutError, Sender};

use crate::audio::SampleFormat;
use crate::error::Error;

/// Block durations a write may wait on a device that stopped pulling
const STALL_BLOCKS: u32 = 4;

/// Floor of the stall timeout, for very short blocks
const MIN_STALL_TIMEOUT: Duration = Duration::from_millis(50);

/// Opaque handle returned by [`Sink::open`]
///
/// Only positive handles are valid; the engine rejects anything else as an
/// open failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkHandle(pub i32);

impl SinkHandle {
    /// Whether the sink reported a usable handle
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

/// Device layer consumed by the engine
///
/// Implementations are shared by every channel's playback thread, so all
/// methods take `&self`.
pub trait Sink: Send + Sync {
    /// Bring up the driver. Called once per engine `init`.
    fn init(&self) -> Result<(), Error>;

    /// Open an output for `channel` playing blocks of `frames` frames
    fn open(
        &self,
        channel: usize,
        frames: u32,
        frequency: u32,
        format: SampleFormat,
    ) -> Result<SinkHandle, Error>;

    /// Play one block, blocking until the device can accept it.
    ///
    /// This call is what paces a channel's playback loop.
    fn write(&self, handle: SinkHandle, block: &[i16]) -> Result<(), Error>;

    /// Release an output. Unknown handles are ignored.
    fn close(&self, handle: SinkHandle);
}

/// How long a write may block before the device counts as stalled
pub(crate) fn stall_timeout(frames: u32, frequency: u32) -> Duration {
    let block = Duration::from_micros(frames as u64 * 1_000_000 / frequency.max(1) as u64);
    (block * STALL_BLOCKS).max(MIN_STALL_TIMEOUT)
}

/// Queue one block for a device consumer, failing instead of blocking forever
pub(crate) fn send_block(
    blocks: &Sender<Vec<i16>>,
    block: &[i16],
    timeout: Duration,
) -> Result<(), Error> {
    blocks
        .send_timeout(block.to_vec(), timeout)
        .map_err(|e| match e {
            SendTimeoutError::Timeout(_) => {
                Error::Output(format!("device took no block within {:?}", timeout))
            }
            SendTimeoutError::Disconnected(_) => Error::Output("device stream is gone".to_string()),
        })
}
