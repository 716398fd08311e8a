// ABOUTME: Audio types and output plumbing for orbis-audio
// ABOUTME: Contains SampleFormat, channel/engine status, the double buffer pool, and sinks

/// Output sink trait and implementations
pub mod output;
/// Double buffer pair for one channel
pub mod pool;
/// Core audio type definitions (SampleFormat, ChannelState, EngineStatus)
pub mod types;

#[cfg(feature = "cpal-output")]
pub use output::CpalSink;
pub use output::{MemorySink, NullSink, Sink, SinkHandle};
pub use pool::{normalize_sample_count, ChannelBufferPool};
pub use types::{apply_volume, ChannelState, EngineStatus, SampleFormat};
