// ABOUTME: Channel lifecycle engine for orbis-audio
// ABOUTME: AudioEngine, per-channel slots, playback loops, and the process-wide engine slot

/// AudioEngine lifecycle API
pub mod audio_engine;
/// Per-channel state shared with the playback loop
pub mod channel;
/// Process-wide engine slot
pub mod global;
mod playback;

pub use audio_engine::{AudioEngine, ChannelInit};
pub use channel::{ChannelInfo, FillCallback};
