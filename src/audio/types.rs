// ABOUTME: Core audio type definitions
// ABOUTME: SampleFormat (mono/stereo s16), channel and engine status, volume gain

use serde::{Deserialize, Serialize};

use crate::VOLUME_MAX;

/// PCM layout of a channel: 16-bit signed little-endian samples
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// One sample per frame
    Mono16,
    /// Two interleaved samples per frame (L, R)
    Stereo16,
}

impl SampleFormat {
    /// Samples per frame
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            SampleFormat::Mono16 => 1,
            SampleFormat::Stereo16 => 2,
        }
    }

    /// Bytes per frame
    #[inline]
    pub fn frame_size(self) -> usize {
        std::mem::size_of::<i16>() * self.channels()
    }

    /// Number of `i16` samples needed to hold `frames` frames
    #[inline]
    pub fn samples_for(self, frames: u32) -> usize {
        frames as usize * self.channels()
    }
}

/// Lifecycle state of a single channel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// No buffers, no sink handle, no loop
    Uninitialized = 0,
    /// Buffers allocated, sink open, ready to play
    Initialized = 1,
    /// Initialization failed and is being rolled back
    Error = 2,
}

impl ChannelState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelState::Initialized,
            2 => ChannelState::Error,
            _ => ChannelState::Uninitialized,
        }
    }
}

/// Initialization status of an engine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    /// `init` has not run (or failed)
    Uninitialized,
    /// Initialized by this process
    Initialized,
    /// Supplied by the embedding application
    External,
}

impl EngineStatus {
    /// True for both owned and external engines
    pub fn is_ready(self) -> bool {
        !matches!(self, EngineStatus::Uninitialized)
    }
}

/// Scale `samples` in place by the channel volumes.
///
/// Stereo frames use `left`/`right` per side; mono uses `left`. Unity volume
/// leaves samples untouched.
pub fn apply_volume(samples: &mut [i16], format: SampleFormat, left: u32, right: u32) {
    let left = left.min(VOLUME_MAX) as i32;
    let right = right.min(VOLUME_MAX) as i32;
    let unity = VOLUME_MAX as i32;

    match format {
        SampleFormat::Mono16 => {
            if left == unity {
                return;
            }
            for s in samples.iter_mut() {
                *s = scale(*s, left);
            }
        }
        SampleFormat::Stereo16 => {
            if left == unity && right == unity {
                return;
            }
            for frame in samples.chunks_exact_mut(2) {
                frame[0] = scale(frame[0], left);
                frame[1] = scale(frame[1], right);
            }
        }
    }
}

#[inline]
fn scale(sample: i16, volume: i32) -> i16 {
    ((sample as i32 * volume) / VOLUME_MAX as i32) as i16
}
