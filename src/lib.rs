// ABOUTME: Main library entry point for orbis-audio
// ABOUTME: Exports the engine lifecycle API, sinks, constants, and error types

//! # orbis-audio
//!
//! Multi-channel, double-buffered PCM output engine.
//!
//! A fixed set of channels each own two sample buffers and a dedicated playback
//! thread. While the [`Sink`](audio::Sink) plays one buffer, the loop fills the
//! other from a caller-supplied callback (or with silence) and then swaps them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use orbis_audio::{AudioEngine, EngineConfig, NullSink, SampleFormat};
//!
//! let engine = AudioEngine::new(Arc::new(NullSink::new()), EngineConfig::default());
//! engine.init()?;
//! engine.init_channel(0, 512, 48_000, SampleFormat::Stereo16)?;
//! engine.set_callback(0, |buf: &mut [i16], _frames: u32| buf.fill(0))?;
//! engine.resume(0)?;
//! // ...
//! engine.finish();
//! # Ok::<(), orbis_audio::error::Error>(())
//! ```

#![warn(missing_docs)]

/// Audio types, double buffers, and output sinks
pub mod audio;
/// Engine configuration
pub mod config;
/// Channel lifecycle engine and playback loops
pub mod engine;

pub use audio::{
    ChannelBufferPool, ChannelState, EngineStatus, MemorySink, NullSink, SampleFormat, Sink,
    SinkHandle,
};
pub use config::EngineConfig;
pub use engine::{AudioEngine, ChannelInfo, ChannelInit};

/// Number of independent output channels
pub const CHANNEL_COUNT: usize = 8;

/// Buffers per channel (double buffering)
pub const NUM_BUFFERS: usize = 2;

/// Smallest block a channel plays, in frames; also the alignment of block sizes
pub const MIN_LEN: u32 = 256;

/// Largest block a channel plays, in frames
pub const MAX_LEN: u32 = 2048;

/// Unity gain volume level
pub const VOLUME_MAX: u32 = 32768;

/// Output frequency used when a caller has no preference
pub const DEFAULT_FREQUENCY: u32 = 48_000;

/// Result type for orbis-audio operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for orbis-audio
pub mod error {
    use thiserror::Error;

    /// Error types for orbis-audio operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// The sink could not be initialized
        #[error("Sink initialization failed: {0}")]
        SinkInit(String),

        /// The sink refused to open an output for a channel
        #[error("Failed to open sink for channel {channel}: {reason}")]
        SinkOpen {
            /// Channel being initialized
            channel: usize,
            /// Sink-reported cause
            reason: String,
        },

        /// The double buffers for a channel could not be allocated
        #[error("Failed to allocate {bytes} bytes of buffers for channel {channel}")]
        BufferAlloc {
            /// Channel being initialized
            channel: usize,
            /// Bytes requested per buffer
            bytes: usize,
        },

        /// The playback thread for a channel could not be spawned
        #[error("Failed to spawn playback thread for channel {channel}: {reason}")]
        ThreadSpawn {
            /// Channel being initialized
            channel: usize,
            /// OS-reported cause
            reason: String,
        },

        /// Channel id outside `0..CHANNEL_COUNT`
        #[error("Invalid channel id {0}")]
        InvalidChannel(usize),

        /// Engine used before `init`
        #[error("Audio engine is not initialized")]
        NotInitialized,

        /// Channel used before its own init
        #[error("Audio channel {0} is not initialized")]
        ChannelNotInitialized(usize),

        /// A stop is pending; `finish` must run before channels can start again
        #[error("Audio engine is stopping")]
        EngineStopped,

        /// A block handed to `play_block` is not exactly one buffer long
        #[error("Block for channel {channel} has {actual} samples, expected {expected}")]
        BlockSize {
            /// Target channel
            channel: usize,
            /// Samples in one buffer of the channel
            expected: usize,
            /// Samples supplied
            actual: usize,
        },

        /// Sink write error
        #[error("Audio output error: {0}")]
        Output(String),

        /// Invalid or unreadable configuration
        #[error("Configuration error: {0}")]
        Config(String),
    }
}
