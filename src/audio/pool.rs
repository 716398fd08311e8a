// ABOUTME: Double buffer pair owned by one output channel
// ABOUTME: Allocates both buffers up front; the playback loop fills one while the sink plays the other

use crate::audio::SampleFormat;
use crate::error::Error;
use crate::{MAX_LEN, MIN_LEN, NUM_BUFFERS};

/// Normalize a requested block length (in frames) to what a channel will allocate.
///
/// Requests below `MIN_LEN` become `MIN_LEN`; anything else is rounded up to a
/// multiple of `MIN_LEN` and capped at `MAX_LEN`.
pub fn normalize_sample_count(requested: u32) -> u32 {
    if requested < MIN_LEN {
        return MIN_LEN;
    }
    let aligned = requested
        .checked_add(MIN_LEN - 1)
        .map(|n| n & !(MIN_LEN - 1))
        .unwrap_or(MAX_LEN);
    aligned.min(MAX_LEN)
}

/// The two sample buffers of a channel
///
/// `current` indexes the buffer the loop fills and submits next; the other
/// one belongs to the sink until the next swap.
#[derive(Debug)]
pub struct ChannelBufferPool {
    buffers: [Vec<i16>; NUM_BUFFERS],
    frames: [u32; NUM_BUFFERS],
    format: SampleFormat,
    current: usize,
}

impl ChannelBufferPool {
    /// Allocate both buffers for `frames` frames of `format`
    ///
    /// # Arguments
    /// * `channel` - Owning channel id, for error reporting
    /// * `frames` - Frames per buffer (already normalized)
    /// * `format` - Sample layout
    pub fn allocate(channel: usize, frames: u32, format: SampleFormat) -> Result<Self, Error> {
        let len = format.samples_for(frames);
        let bytes = frames as usize * format.frame_size();

        let mut buffers: [Vec<i16>; NUM_BUFFERS] = Default::default();
        for buf in buffers.iter_mut() {
            // On failure `buffers` drops here, releasing the ones already allocated
            buf.try_reserve_exact(len)
                .map_err(|_| Error::BufferAlloc { channel, bytes })?;
            buf.resize(len, 0);
        }

        for i in 0..NUM_BUFFERS {
            log::debug!(
                "[orbis-audio] buffer {} for audio channel {} created ({}b)",
                i,
                channel,
                bytes
            );
        }

        Ok(Self {
            buffers,
            frames: [frames; NUM_BUFFERS],
            format,
            current: 0,
        })
    }

    /// Zero every buffer
    pub fn silence_all(&mut self) {
        for buf in self.buffers.iter_mut() {
            buf.fill(0);
        }
    }

    /// Index of the buffer that will be filled and submitted next
    pub fn current(&self) -> usize {
        self.current
    }

    /// Frames held by buffer `index`, `None` past the last buffer
    pub fn frames(&self, index: usize) -> Option<u32> {
        self.frames.get(index).copied()
    }

    /// Sample layout of both buffers
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Size of one buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.frames[self.current] as usize * self.format.frame_size()
    }

    /// The active buffer and its frame count, for filling
    pub fn active_mut(&mut self) -> (&mut [i16], u32) {
        let frames = self.frames[self.current];
        (self.buffers[self.current].as_mut_slice(), frames)
    }

    /// The active buffer, for submission
    pub fn active(&self) -> &[i16] {
        &self.buffers[self.current]
    }

    /// Flip to the other buffer and return the new index
    pub fn swap(&mut self) -> usize {
        self.current ^= 1;
        self.current
    }
}
