// ABOUTME: Per-channel playback loop running on its own thread
// ABOUTME: Fills the active buffer (callback or silence), submits it to the sink, then swaps

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::audio::{apply_volume, ChannelBufferPool, ChannelState, SinkHandle};

use super::audio_engine::EngineShared;
use super::channel::ChannelSlot;

/// Everything one loop owns. Built per spawn, so the channel id is a copy.
pub(crate) struct PlaybackLoop {
    channel: usize,
    handle: SinkHandle,
    pool: ChannelBufferPool,
    shared: Arc<EngineShared>,
}

impl PlaybackLoop {
    pub fn new(
        channel: usize,
        handle: SinkHandle,
        pool: ChannelBufferPool,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            channel,
            handle,
            pool,
            shared,
        }
    }

    /// Start the loop. The join handle yields the buffers back once the loop exits.
    ///
    /// If spawning fails the loop (and its buffers) is dropped.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<ChannelBufferPool>> {
        let mut builder = thread::Builder::new().name(format!("orbis-audio-ch{}", self.channel));
        if let Some(size) = self.shared.config.thread_stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(move || self.run())
    }

    fn run(mut self) -> ChannelBufferPool {
        let shared = Arc::clone(&self.shared);
        let slot = &shared.slots[self.channel];
        let idle_tick = shared.config.idle_tick();
        let throttle = shared.config.loop_throttle();

        self.pool.silence_all();
        log::info!(
            "[orbis-audio] channel {} playback loop ready (paused={})",
            self.channel,
            slot.is_paused()
        );

        while !shared.stop_requested() {
            if slot.state() != ChannelState::Initialized {
                thread::sleep(idle_tick);
                continue;
            }

            self.fill_active(slot);

            match shared.sink.write(self.handle, self.pool.active()) {
                Ok(()) => slot.record_submit(true),
                Err(e) => {
                    slot.record_submit(false);
                    log::error!(
                        "[orbis-audio] channel {} play block error: {}",
                        self.channel,
                        e
                    );
                }
            }

            let next = self.pool.swap();
            slot.set_current_buffer(next);

            if let Some(throttle) = throttle {
                thread::sleep(throttle);
            }
        }

        log::info!(
            "[orbis-audio] channel {} playback loop exit (stop requested)",
            self.channel
        );
        self.pool
    }

    /// Fill the active buffer from the callback, or with silence when paused
    /// or no callback is installed.
    fn fill_active(&mut self, slot: &ChannelSlot) {
        let format = self.pool.format();
        let (buf, frames) = self.pool.active_mut();

        let filled = !slot.is_paused() && Self::run_callback(self.channel, slot, buf, frames);

        if filled {
            let (left, right) = slot.volume();
            apply_volume(buf, format, left, right);
        } else {
            buf.fill(0);
        }
    }

    /// Run the installed callback with the slot unlocked, so it may replace or
    /// clear itself. Returns whether `buf` holds callback output.
    fn run_callback(channel: usize, slot: &ChannelSlot, buf: &mut [i16], frames: u32) -> bool {
        loop {
            let (taken, generation) = slot.take_callback();
            let Some(mut fill) = taken else {
                return false;
            };

            let (healthy, own_changes) = slot.run_filling(|| {
                catch_unwind(AssertUnwindSafe(|| fill(&mut *buf, frames))).is_ok()
            });
            if !healthy {
                log::error!(
                    "[orbis-audio] channel {} fill callback panicked, removing it",
                    channel
                );
            }

            let changes = slot.restore_callback(fill, generation, healthy);
            // Replaced from another thread mid-fill: the block must come from the new callback
            if changes > own_changes {
                continue;
            }
            return healthy;
        }
    }
}
