// ABOUTME: Engine configuration
// ABOUTME: Timing and channel defaults, loadable from JSON

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::VOLUME_MAX;

/// Default grace period of `stop` (ms)
pub const DEFAULT_STOP_GRACE_MS: u64 = 1000;

/// Default idle sleep of a loop whose channel is not initialized (ms)
pub const DEFAULT_IDLE_TICK_MS: u64 = 1;

/// Default throttle sleep after each submitted block (ms)
pub const DEFAULT_LOOP_THROTTLE_MS: u64 = 1;

/// Configuration for an [`AudioEngine`](crate::AudioEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long `stop` waits for loops to notice the stop flag
    pub stop_grace_ms: u64,

    /// Sleep of a playback loop while its channel is not initialized
    pub idle_tick_ms: u64,

    /// Sleep after each submitted block. 0 lets the sink alone pace the loop.
    pub loop_throttle_ms: u64,

    /// Left volume channels start with
    pub default_left_volume: u32,

    /// Right volume channels start with
    pub default_right_volume: u32,

    /// Whether channels start paused (silent until `resume`)
    pub start_paused: bool,

    /// Stack size of playback threads in bytes; `None` keeps the platform default
    pub thread_stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            idle_tick_ms: DEFAULT_IDLE_TICK_MS,
            loop_throttle_ms: DEFAULT_LOOP_THROTTLE_MS,
            default_left_volume: VOLUME_MAX,
            default_right_volume: VOLUME_MAX,
            start_paused: true,
            thread_stack_size: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Reject values the engine cannot honor
    pub fn validate(&self) -> Result<(), Error> {
        if self.default_left_volume > VOLUME_MAX || self.default_right_volume > VOLUME_MAX {
            return Err(Error::Config(format!(
                "default volume must be at most {}",
                VOLUME_MAX
            )));
        }
        if self.idle_tick_ms == 0 {
            return Err(Error::Config("idle_tick_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Set the grace period of `stop`
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the per-block throttle sleep
    pub fn with_loop_throttle(mut self, throttle: Duration) -> Self {
        self.loop_throttle_ms = throttle.as_millis() as u64;
        self
    }

    /// Set the starting volumes of every channel
    pub fn with_default_volume(mut self, left: u32, right: u32) -> Self {
        self.default_left_volume = left;
        self.default_right_volume = right;
        self
    }

    /// Choose whether channels start paused
    pub fn with_start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    /// Set the stack size of playback threads
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    pub(crate) fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub(crate) fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    pub(crate) fn loop_throttle(&self) -> Option<Duration> {
        (self.loop_throttle_ms > 0).then(|| Duration::from_millis(self.loop_throttle_ms))
    }
}
