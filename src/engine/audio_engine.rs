// ABOUTME: AudioEngine lifecycle API
// ABOUTME: Sink init, channel init/rollback, pause/resume/callback control, stop and finish

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::audio::{
    normalize_sample_count, ChannelBufferPool, ChannelState, EngineStatus, SampleFormat, Sink,
    SinkHandle,
};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::{Result, CHANNEL_COUNT};

use super::channel::{BufferStorage, ChannelInfo, ChannelSlot, FillCallback};
use super::playback::PlaybackLoop;

/// State shared by the engine and every playback loop
pub(crate) struct EngineShared {
    pub stop: AtomicBool,
    pub sink: Arc<dyn Sink>,
    pub config: EngineConfig,
    pub slots: Box<[ChannelSlot]>,
}

impl EngineShared {
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Outcome of a successful channel init
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelInit {
    /// Buffers allocated, sink opened, loop started (if requested)
    Initialized {
        /// Frames per buffer after normalization
        frames: u32,
        /// Sink handle for the channel
        handle: SinkHandle,
    },
    /// The channel was already initialized; nothing changed
    AlreadyInitialized,
}

/// Multi-channel double-buffered output engine
///
/// Owns `CHANNEL_COUNT` channel slots. Each initialized channel has two
/// buffers, a sink handle, and (normally) a playback thread that keeps the
/// sink fed from the channel's fill callback or with silence.
///
/// `stop` only asks the loops to exit; `finish` joins them before releasing
/// buffers and sink handles. Dropping the engine runs `finish`.
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    status: Mutex<EngineStatus>,
}

impl AudioEngine {
    /// Create an engine over `sink`. Nothing touches the sink until [`init`](Self::init).
    pub fn new(sink: Arc<dyn Sink>, config: EngineConfig) -> Self {
        let slots = (0..CHANNEL_COUNT)
            .map(|id| ChannelSlot::new(id, &config))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shared: Arc::new(EngineShared {
                stop: AtomicBool::new(false),
                sink,
                config,
                slots,
            }),
            status: Mutex::new(EngineStatus::Uninitialized),
        }
    }

    /// Initialize the sink. Calling again after success returns the current
    /// status without touching the sink.
    pub fn init(&self) -> Result<EngineStatus> {
        let mut status = self.status.lock();
        if status.is_ready() {
            log::info!("[orbis-audio] is already initialized!");
            return Ok(*status);
        }

        if let Err(e) = self.shared.sink.init() {
            log::error!("[orbis-audio] sink init error: {}", e);
            return Err(match e {
                Error::SinkInit(_) => e,
                other => Error::SinkInit(other.to_string()),
            });
        }

        *status = EngineStatus::Initialized;
        log::info!("[orbis-audio] initialized!");
        Ok(*status)
    }

    /// Current initialization status
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Initialize a channel and start its playback loop
    ///
    /// # Arguments
    /// * `channel` - Channel id in `0..CHANNEL_COUNT`
    /// * `samples` - Requested frames per buffer (normalized to `MIN_LEN..=MAX_LEN`)
    /// * `frequency` - Output frequency in Hz
    /// * `format` - Sample layout
    pub fn init_channel(
        &self,
        channel: usize,
        samples: u32,
        frequency: u32,
        format: SampleFormat,
    ) -> Result<ChannelInit> {
        self.open_channel(channel, samples, frequency, format, true)
    }

    /// Initialize a channel without a playback loop; the caller feeds it via
    /// [`play_block`](Self::play_block).
    pub fn init_channel_no_loop(
        &self,
        channel: usize,
        samples: u32,
        frequency: u32,
        format: SampleFormat,
    ) -> Result<ChannelInit> {
        self.open_channel(channel, samples, frequency, format, false)
    }

    fn open_channel(
        &self,
        channel: usize,
        samples: u32,
        frequency: u32,
        format: SampleFormat,
        spawn_loop: bool,
    ) -> Result<ChannelInit> {
        let slot = self.slot(channel)?;
        if !self.status().is_ready() {
            return Err(Error::NotInitialized);
        }
        if self.shared.stop_requested() {
            return Err(Error::EngineStopped);
        }

        // Held for the whole init so two callers can't both pass the checks below
        let mut resources = slot.resources.lock();
        // finish raises the flag before walking the slots
        if self.shared.stop_requested() {
            return Err(Error::EngineStopped);
        }
        if slot.state() == ChannelState::Initialized {
            log::warn!("[orbis-audio] audio channel {} already initialized", channel);
            return Ok(ChannelInit::AlreadyInitialized);
        }

        let frames = normalize_sample_count(samples);
        let pool = match ChannelBufferPool::allocate(channel, frames, format) {
            Ok(pool) => pool,
            Err(e) => {
                log::error!(
                    "[orbis-audio] error creating buffers for audio channel {}",
                    channel
                );
                slot.set_state(ChannelState::Uninitialized);
                return Err(e);
            }
        };

        log::debug!("[orbis-audio] sink open {} samples", frames);
        let handle = match self.shared.sink.open(channel, frames, frequency, format) {
            Ok(handle) if handle.is_valid() => handle,
            Ok(handle) => {
                Self::roll_back(slot, pool);
                log::error!(
                    "[orbis-audio] error opening audio channel {}: invalid handle {}",
                    channel,
                    handle.0
                );
                return Err(Error::SinkOpen {
                    channel,
                    reason: format!("sink returned invalid handle {}", handle.0),
                });
            }
            Err(e) => {
                Self::roll_back(slot, pool);
                log::error!("[orbis-audio] error opening audio channel {}: {}", channel, e);
                return Err(match e {
                    Error::SinkOpen { .. } => e,
                    other => Error::SinkOpen {
                        channel,
                        reason: other.to_string(),
                    },
                });
            }
        };

        resources.storage = if spawn_loop {
            let playback = PlaybackLoop::new(channel, handle, pool, Arc::clone(&self.shared));
            match playback.spawn() {
                Ok(join) => BufferStorage::Looping(join),
                Err(e) => {
                    // The loop never ran; its buffers were dropped with it
                    slot.set_state(ChannelState::Error);
                    log::error!(
                        "[orbis-audio] audio channel {} thread could not be created: {}",
                        channel,
                        e
                    );
                    log::debug!("[orbis-audio] closing audio channel {}", channel);
                    self.shared.sink.close(handle);
                    slot.set_state(ChannelState::Uninitialized);
                    return Err(Error::ThreadSpawn {
                        channel,
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            BufferStorage::Parked(pool)
        };
        resources.format = Some(format);
        resources.frames = frames;
        resources.frequency = frequency;

        slot.set_current_buffer(0);
        slot.set_handle(Some(handle));
        slot.set_state(ChannelState::Initialized);

        log::info!(
            "[orbis-audio] audio channel {} initialized ({} frames, {}Hz, {:?}, handle {}, loop={})",
            channel,
            frames,
            frequency,
            format,
            handle.0,
            spawn_loop
        );
        Ok(ChannelInit::Initialized { frames, handle })
    }

    fn roll_back(slot: &ChannelSlot, pool: ChannelBufferPool) {
        slot.set_state(ChannelState::Error);
        drop(pool);
        slot.set_state(ChannelState::Uninitialized);
    }

    /// Install the fill callback of a channel, replacing any previous one.
    ///
    /// Valid before the channel is initialized. Takes effect on the loop's
    /// next block.
    pub fn set_callback<F>(&self, channel: usize, callback: F) -> Result<()>
    where
        F: FnMut(&mut [i16], u32) + Send + 'static,
    {
        let slot = self.slot(channel)?;
        // try_lock: init and finish hold the lock, and this may run inside a callback
        let parked = slot
            .resources
            .try_lock()
            .is_some_and(|res| matches!(res.storage, BufferStorage::Parked(_)));
        if slot.state() == ChannelState::Initialized && parked {
            log::warn!(
                "[orbis-audio] audio channel {} has no playback loop; callback will not be called",
                channel
            );
        }
        let boxed: FillCallback = Box::new(callback);
        drop(slot.replace_callback(Some(boxed)));
        Ok(())
    }

    /// Remove the fill callback; the channel plays silence
    pub fn clear_callback(&self, channel: usize) -> Result<()> {
        let slot = self.slot(channel)?;
        drop(slot.replace_callback(None));
        Ok(())
    }

    /// Pause a channel: its loop submits silence
    pub fn pause(&self, channel: usize) -> Result<()> {
        self.slot(channel)?.set_paused(true);
        Ok(())
    }

    /// Resume a paused channel
    pub fn resume(&self, channel: usize) -> Result<()> {
        self.slot(channel)?.set_paused(false);
        Ok(())
    }

    /// Whether a channel is paused
    pub fn is_paused(&self, channel: usize) -> Result<bool> {
        Ok(self.slot(channel)?.is_paused())
    }

    /// Set the channel volumes (clamped to `VOLUME_MAX`)
    pub fn set_volume(&self, channel: usize, left: u32, right: u32) -> Result<()> {
        self.slot(channel)?.set_volume(left, right);
        Ok(())
    }

    /// Current `(left, right)` volumes of a channel
    pub fn volume(&self, channel: usize) -> Result<(u32, u32)> {
        Ok(self.slot(channel)?.volume())
    }

    /// Submit one block directly to a channel's sink handle
    ///
    /// Meant for channels opened with
    /// [`init_channel_no_loop`](Self::init_channel_no_loop). `block` must hold
    /// exactly one buffer (`frames * channels` samples). Blocks like the
    /// sink's write does.
    pub fn play_block(&self, channel: usize, block: &[i16]) -> Result<()> {
        let slot = self.slot(channel)?;
        if self.shared.stop_requested() {
            return Err(Error::EngineStopped);
        }
        let handle = match (slot.state(), slot.handle()) {
            (ChannelState::Initialized, Some(handle)) => handle,
            _ => return Err(Error::ChannelNotInitialized(channel)),
        };

        let expected = {
            let res = slot.resources.lock();
            match res.format {
                Some(format) => format.samples_for(res.frames),
                None => return Err(Error::ChannelNotInitialized(channel)),
            }
        };
        if block.len() != expected {
            return Err(Error::BlockSize {
                channel,
                expected,
                actual: block.len(),
            });
        }

        let result = self.shared.sink.write(handle, block);
        slot.record_submit(result.is_ok());
        result
    }

    /// Ask every playback loop to exit, then wait the configured grace period.
    ///
    /// This does not join the loops; [`finish`](Self::finish) does.
    pub fn stop(&self) {
        if !self.status().is_ready() {
            return;
        }
        self.shared.stop.store(true, Ordering::Release);
        thread::sleep(self.shared.config.stop_grace());
    }

    /// Whether a stop is pending
    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// Stop all loops, join them, close sink handles, and free buffers.
    ///
    /// Safe to call repeatedly; a no-op on an uninitialized engine. Once it
    /// returns, channels can be initialized again.
    pub fn finish(&self) {
        if !self.status().is_ready() {
            return;
        }

        let active = self
            .shared
            .slots
            .iter()
            .any(|slot| slot.state() == ChannelState::Initialized);
        if active {
            self.stop();
        } else {
            // Still raised so a racing init_channel is refused rather than missed
            self.shared.stop.store(true, Ordering::Release);
        }

        let mut released = false;
        for slot in self.shared.slots.iter() {
            // Not held across the join: a callback may still query the channel
            let storage = {
                let mut resources = slot.resources.lock();
                if slot.state() != ChannelState::Initialized {
                    continue;
                }
                std::mem::replace(&mut resources.storage, BufferStorage::Empty)
            };

            if let BufferStorage::Looping(join) = storage {
                if join.join().is_err() {
                    log::error!(
                        "[orbis-audio] channel {} playback loop panicked",
                        slot.id
                    );
                }
            }

            let mut resources = slot.resources.lock();
            if let Some(handle) = slot.handle() {
                self.shared.sink.close(handle);
                log::info!("[orbis-audio] closing audio handle {}", handle.0);
            }
            slot.set_handle(None);
            resources.format = None;
            resources.frames = 0;
            resources.frequency = 0;
            log::debug!("[orbis-audio] free buffers channel {}", slot.id);

            slot.set_state(ChannelState::Uninitialized);
            released = true;
        }

        self.shared.stop.store(false, Ordering::Release);
        if released {
            log::info!("[orbis-audio] finished");
        }
    }

    /// State of a channel; `Uninitialized` for unknown ids
    pub fn channel_status(&self, channel: usize) -> ChannelState {
        self.shared
            .slots
            .get(channel)
            .map_or(ChannelState::Uninitialized, ChannelSlot::state)
    }

    /// Sink handle of an initialized channel
    pub fn channel_sink_handle(&self, channel: usize) -> Option<SinkHandle> {
        self.shared.slots.get(channel).and_then(ChannelSlot::handle)
    }

    /// Snapshot of a channel, `None` for unknown ids
    pub fn channel_info(&self, channel: usize) -> Option<ChannelInfo> {
        self.shared.slots.get(channel).map(ChannelSlot::info)
    }

    fn slot(&self, channel: usize) -> Result<&ChannelSlot> {
        self.shared
            .slots
            .get(channel)
            .ok_or(Error::InvalidChannel(channel))
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.finish();
    }
}
