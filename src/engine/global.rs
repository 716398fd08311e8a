// ABOUTME: Process-wide engine slot
// ABOUTME: Owned init, externally supplied engines, and shutdown of the single active engine

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::{EngineStatus, Sink};
use crate::config::EngineConfig;
use crate::Result;

use super::AudioEngine;

struct Installed {
    engine: Arc<AudioEngine>,
    external: bool,
}

static ENGINE: Mutex<Option<Installed>> = parking_lot::const_mutex(None);

/// Create and initialize the process-wide engine.
///
/// Idempotent: when an engine is already installed and ready, its status is
/// returned and `sink` is never touched.
pub fn init(sink: Arc<dyn Sink>, config: EngineConfig) -> Result<EngineStatus> {
    let mut installed = ENGINE.lock();
    if let Some(current) = installed.as_ref() {
        let status = status_of(current);
        if status.is_ready() {
            log::info!("[orbis-audio] is already initialized!");
            return Ok(status);
        }
    }

    let engine = AudioEngine::new(sink, config);
    let status = engine.init()?;
    *installed = Some(Installed {
        engine: Arc::new(engine),
        external: false,
    });
    Ok(status)
}

/// Install an engine owned by the embedding application.
///
/// Returns `Uninitialized` (and changes nothing) for `None`. The slot never
/// finishes an external engine; its owner does.
pub fn set_external(engine: Option<Arc<AudioEngine>>) -> EngineStatus {
    let Some(engine) = engine else {
        return EngineStatus::Uninitialized;
    };

    let current = Installed {
        engine: Arc::clone(&engine),
        external: true,
    };
    let status = status_of(&current);
    let previous = ENGINE.lock().replace(current);
    // Re-installing the same engine must not finish it
    match previous {
        Some(previous) if Arc::ptr_eq(&previous.engine, &engine) => {}
        other => release(other),
    }
    status
}

/// [`set_external`] plus a readiness log, for embedders that set up the engine themselves
pub fn init_with(engine: Option<Arc<AudioEngine>>) -> EngineStatus {
    let status = set_external(engine);
    if status.is_ready() {
        log::info!("[orbis-audio] already initialized using external engine ({:?})", status);
    }
    status
}

/// The installed engine, if any
pub fn engine() -> Option<Arc<AudioEngine>> {
    ENGINE.lock().as_ref().map(|i| Arc::clone(&i.engine))
}

/// Status of the installed engine; `Uninitialized` when the slot is empty
pub fn status() -> EngineStatus {
    ENGINE
        .lock()
        .as_ref()
        .map_or(EngineStatus::Uninitialized, status_of)
}

/// Empty the slot. An engine created by [`init`] is finished first.
pub fn shutdown() {
    let previous = ENGINE.lock().take();
    release(previous);
}

fn status_of(installed: &Installed) -> EngineStatus {
    match installed.engine.status() {
        EngineStatus::Uninitialized => EngineStatus::Uninitialized,
        _ if installed.external => EngineStatus::External,
        status => status,
    }
}

// Runs outside the slot lock: finishing joins playback threads
fn release(previous: Option<Installed>) {
    if let Some(previous) = previous {
        if !previous.external {
            previous.engine.finish();
        }
    }
}
