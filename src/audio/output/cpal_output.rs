// ABOUTME: cpal-based sink playing channel blocks on the default output device
// ABOUTME: One device thread per handle owns the stream; writes block on a bounded queue

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::audio::output::{send_block, stall_timeout, Sink, SinkHandle};
use crate::audio::SampleFormat;
use crate::error::Error;

/// Blocks queued ahead of the device. With one slot, `write` returns once the
/// previous block has started playing.
const QUEUED_BLOCKS: usize = 1;

struct DeviceOutput {
    blocks: Sender<Vec<i16>>,
    // A device that stops pulling fails writes after this instead of hanging them
    write_timeout: Duration,
    // Dropping this wakes the device thread, which then drops the stream
    shutdown: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Sink backed by the default cpal output device
///
/// `cpal::Stream` is not `Send`, so each opened handle gets a device thread
/// that builds the stream, plays it, and keeps it alive until `close`.
pub struct CpalSink {
    next_handle: AtomicI32,
    outputs: Mutex<HashMap<SinkHandle, DeviceOutput>>,
}

impl CpalSink {
    /// Create a new cpal sink
    pub fn new() -> Self {
        Self {
            next_handle: AtomicI32::new(1),
            outputs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CpalSink {
    fn init(&self) -> Result<(), Error> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::SinkInit("no default output device".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("[orbis-audio] using audio device: {}", name);
        Ok(())
    }

    fn open(
        &self,
        channel: usize,
        frames: u32,
        frequency: u32,
        format: SampleFormat,
    ) -> Result<SinkHandle, Error> {
        let (block_tx, block_rx) = bounded::<Vec<i16>>(QUEUED_BLOCKS);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let channels = format.channels() as u16;

        let thread = thread::Builder::new()
            .name(format!("orbis-audio-cpal{}", channel))
            .spawn(move || {
                let stream = match build_stream(channels, frequency, block_rx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns once the sender is dropped by `close`
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::SinkOpen {
                channel,
                reason: e.to_string(),
            })?;

        let reason = match ready_rx.recv() {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(_) => Some("device thread exited".to_string()),
        };
        if let Some(reason) = reason {
            let _ = thread.join();
            return Err(Error::SinkOpen { channel, reason });
        }

        let handle = SinkHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        log::info!(
            "[orbis-audio] cpal output {:?} opened for channel {} ({} frames, {}Hz, {:?})",
            handle,
            channel,
            frames,
            frequency,
            format
        );
        self.outputs.lock().insert(
            handle,
            DeviceOutput {
                blocks: block_tx,
                write_timeout: stall_timeout(frames, frequency),
                shutdown: shutdown_tx,
                thread: Some(thread),
            },
        );
        Ok(handle)
    }

    fn write(&self, handle: SinkHandle, block: &[i16]) -> Result<(), Error> {
        let (tx, timeout) = self
            .outputs
            .lock()
            .get(&handle)
            .map(|o| (o.blocks.clone(), o.write_timeout))
            .ok_or_else(|| Error::Output(format!("unknown sink handle {:?}", handle)))?;

        // Blocks while the device still holds a queued block
        send_block(&tx, block, timeout)
    }

    fn close(&self, handle: SinkHandle) {
        let Some(mut output) = self.outputs.lock().remove(&handle) else {
            return;
        };
        drop(output.blocks);
        drop(output.shutdown);
        if let Some(thread) = output.thread.take() {
            if thread.join().is_err() {
                log::error!("[orbis-audio] cpal device thread for {:?} panicked", handle);
            }
        }
    }
}

fn build_stream(
    channels: u16,
    frequency: u32,
    blocks: Receiver<Vec<i16>>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no default output device".to_string())?;

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(frequency),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut pending: Vec<i16> = Vec::new();
    let mut pos = 0usize;

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    while pos >= pending.len() {
                        match blocks.try_recv() {
                            Ok(next) => {
                                pending = next;
                                pos = 0;
                            }
                            Err(_) => break,
                        }
                    }
                    // Underrun plays silence
                    *out = match pending.get(pos) {
                        Some(&s) => {
                            pos += 1;
                            s as f32 / 32768.0
                        }
                        None => 0.0,
                    };
                }
            },
            |err| log::error!("[orbis-audio] cpal stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}
