// ABOUTME: Per-channel slot shared between the controller and the channel's playback loop
// ABOUTME: Atomics for state/pause/volume, mutex-guarded callback and buffer ownership

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::audio::{ChannelBufferPool, ChannelState, SampleFormat, SinkHandle};
use crate::config::EngineConfig;
use crate::VOLUME_MAX;

/// Fill callback: receives the buffer to fill and its length in frames.
///
/// Buffers hold interleaved samples for the channel's format, so a stereo
/// channel gets `2 * frames` samples. Any user data is captured by the closure.
pub type FillCallback = Box<dyn FnMut(&mut [i16], u32) + Send + 'static>;

thread_local! {
    // Channel whose fill callback is running on this thread
    static FILLING: Cell<Option<usize>> = const { Cell::new(None) };
    // Callback replacements made by that callback itself
    static SELF_REPLACEMENTS: Cell<u64> = const { Cell::new(0) };
}

/// Where a channel's buffers currently live
pub(crate) enum BufferStorage {
    /// Uninitialized channel: nothing allocated
    Empty,
    /// No playback loop; the slot owns the buffers
    Parked(ChannelBufferPool),
    /// Buffers moved into the playback loop, handed back on join
    Looping(JoinHandle<ChannelBufferPool>),
}

/// Buffers and open parameters; only touched by init and finish
pub(crate) struct ChannelResources {
    pub storage: BufferStorage,
    pub format: Option<SampleFormat>,
    pub frames: u32,
    pub frequency: u32,
}

/// One entry of the engine's fixed channel array
pub(crate) struct ChannelSlot {
    pub id: usize,
    state: AtomicU8,
    handle: AtomicI32,
    paused: AtomicBool,
    left_volume: AtomicU32,
    right_volume: AtomicU32,
    current_buffer: AtomicUsize,
    has_callback: AtomicBool,
    callback_generation: AtomicU64,
    blocks_submitted: AtomicU64,
    write_errors: AtomicU64,
    pub callback: Mutex<Option<FillCallback>>,
    pub resources: Mutex<ChannelResources>,
}

impl ChannelSlot {
    pub fn new(id: usize, config: &EngineConfig) -> Self {
        Self {
            id,
            state: AtomicU8::new(ChannelState::Uninitialized as u8),
            handle: AtomicI32::new(0),
            paused: AtomicBool::new(config.start_paused),
            left_volume: AtomicU32::new(config.default_left_volume.min(VOLUME_MAX)),
            right_volume: AtomicU32::new(config.default_right_volume.min(VOLUME_MAX)),
            current_buffer: AtomicUsize::new(0),
            has_callback: AtomicBool::new(false),
            callback_generation: AtomicU64::new(0),
            blocks_submitted: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            callback: Mutex::new(None),
            resources: Mutex::new(ChannelResources {
                storage: BufferStorage::Empty,
                format: None,
                frames: 0,
                frequency: 0,
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn handle(&self) -> Option<SinkHandle> {
        let raw = self.handle.load(Ordering::Acquire);
        (raw > 0).then_some(SinkHandle(raw))
    }

    pub fn set_handle(&self, handle: Option<SinkHandle>) {
        self.handle
            .store(handle.map_or(0, |h| h.0), Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn volume(&self) -> (u32, u32) {
        (
            self.left_volume.load(Ordering::Relaxed),
            self.right_volume.load(Ordering::Relaxed),
        )
    }

    pub fn set_volume(&self, left: u32, right: u32) {
        self.left_volume.store(left.min(VOLUME_MAX), Ordering::Relaxed);
        self.right_volume.store(right.min(VOLUME_MAX), Ordering::Relaxed);
    }

    /// Swap in a new callback (or none). The old one is dropped after the lock is released.
    ///
    /// Safe to call from inside the channel's own callback: the loop runs
    /// callbacks with the lock released.
    pub fn replace_callback(&self, callback: Option<FillCallback>) -> Option<FillCallback> {
        let mut slot = self.callback.lock();
        self.has_callback.store(callback.is_some(), Ordering::Release);
        self.callback_generation.fetch_add(1, Ordering::AcqRel);
        if FILLING.with(Cell::get) == Some(self.id) {
            SELF_REPLACEMENTS.with(|n| n.set(n.get() + 1));
        }
        std::mem::replace(&mut *slot, callback)
    }

    /// Take the callback out for one fill, with the generation it was taken at
    pub fn take_callback(&self) -> (Option<FillCallback>, u64) {
        let mut slot = self.callback.lock();
        (
            slot.take(),
            self.callback_generation.load(Ordering::Acquire),
        )
    }

    /// Run `fill` as this channel's callback invocation.
    ///
    /// Returns its result and how many times the callback replaced or cleared
    /// its own channel's callback while running.
    pub fn run_filling<R>(&self, fill: impl FnOnce() -> R) -> (R, u64) {
        FILLING.with(|f| f.set(Some(self.id)));
        SELF_REPLACEMENTS.with(|n| n.set(0));
        let result = fill();
        FILLING.with(|f| f.set(None));
        (result, SELF_REPLACEMENTS.with(Cell::get))
    }

    /// Hand back a callback taken by [`take_callback`](Self::take_callback).
    ///
    /// It is reinstalled only if nothing replaced it meanwhile and it did not
    /// panic. Returns the number of replacements made while it was out.
    pub fn restore_callback(&self, callback: FillCallback, generation: u64, healthy: bool) -> u64 {
        let mut slot = self.callback.lock();
        let changes = self
            .callback_generation
            .load(Ordering::Acquire)
            .wrapping_sub(generation);
        if changes == 0 {
            if healthy {
                *slot = Some(callback);
                return 0;
            }
            self.has_callback.store(false, Ordering::Release);
        }
        drop(slot);
        drop(callback);
        changes
    }

    pub fn has_callback(&self) -> bool {
        self.has_callback.load(Ordering::Acquire)
    }

    pub fn current_buffer(&self) -> usize {
        self.current_buffer.load(Ordering::Relaxed)
    }

    pub fn set_current_buffer(&self, index: usize) {
        self.current_buffer.store(index, Ordering::Relaxed);
    }

    pub fn record_submit(&self, ok: bool) {
        if ok {
            self.blocks_submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn info(&self) -> ChannelInfo {
        let (format, frames, frequency, has_loop) = {
            let res = self.resources.lock();
            (
                res.format,
                res.frames,
                res.frequency,
                matches!(res.storage, BufferStorage::Looping(_)),
            )
        };
        let (left_volume, right_volume) = self.volume();

        ChannelInfo {
            id: self.id,
            state: self.state(),
            handle: self.handle(),
            format,
            frames,
            frequency,
            paused: self.is_paused(),
            left_volume,
            right_volume,
            current_buffer: self.current_buffer(),
            has_loop,
            has_callback: self.has_callback(),
            blocks_submitted: self.blocks_submitted.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel id
    pub id: usize,
    /// Lifecycle state
    pub state: ChannelState,
    /// Sink handle while initialized
    pub handle: Option<SinkHandle>,
    /// Sample layout while initialized
    pub format: Option<SampleFormat>,
    /// Frames per buffer after normalization (0 when uninitialized)
    pub frames: u32,
    /// Output frequency in Hz (0 when uninitialized)
    pub frequency: u32,
    /// Whether the channel is paused
    pub paused: bool,
    /// Left volume
    pub left_volume: u32,
    /// Right volume
    pub right_volume: u32,
    /// Buffer the loop fills next
    pub current_buffer: usize,
    /// Whether a playback loop owns the buffers
    pub has_loop: bool,
    /// Whether a fill callback is installed
    pub has_callback: bool,
    /// Blocks accepted by the sink
    pub blocks_submitted: u64,
    /// Blocks the sink rejected
    pub write_errors: u64,
}
