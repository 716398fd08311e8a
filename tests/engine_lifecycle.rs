use orbis_audio::error::Error;
use orbis_audio::{
    AudioEngine, ChannelInit, ChannelState, EngineConfig, EngineStatus, MemorySink, SampleFormat,
    CHANNEL_COUNT,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_engine() -> (Arc<MemorySink>, AudioEngine) {
    init_logging();
    let sink = Arc::new(MemorySink::new());
    let config = EngineConfig::default().with_stop_grace(Duration::from_millis(10));
    let engine = AudioEngine::new(sink.clone(), config);
    (sink, engine)
}

#[test]
fn test_engine_init() {
    let (sink, engine) = test_engine();
    assert_eq!(engine.status(), EngineStatus::Uninitialized);

    assert_eq!(engine.init().unwrap(), EngineStatus::Initialized);
    assert_eq!(engine.status(), EngineStatus::Initialized);
    assert_eq!(sink.init_calls(), 1);

    for id in 0..CHANNEL_COUNT {
        assert_eq!(engine.channel_status(id), ChannelState::Uninitialized);
        assert!(engine.channel_sink_handle(id).is_none());
    }
}

#[test]
fn test_engine_init_is_idempotent() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();
    assert_eq!(engine.init().unwrap(), EngineStatus::Initialized);
    assert_eq!(sink.init_calls(), 1);
}

#[test]
fn test_engine_init_sink_failure() {
    let (sink, engine) = test_engine();
    sink.set_fail_init(true);

    assert!(matches!(engine.init(), Err(Error::SinkInit(_))));
    assert_eq!(engine.status(), EngineStatus::Uninitialized);
    assert!(matches!(
        engine.init_channel(0, 512, 48000, SampleFormat::Stereo16),
        Err(Error::NotInitialized)
    ));
    assert_eq!(sink.open_calls(), 0);

    // A later init can succeed
    sink.set_fail_init(false);
    assert_eq!(engine.init().unwrap(), EngineStatus::Initialized);
}

#[test]
fn test_queries_before_init() {
    let (_sink, engine) = test_engine();
    assert_eq!(engine.channel_status(0), ChannelState::Uninitialized);
    assert!(engine.channel_sink_handle(0).is_none());

    // Teardown on an uninitialized engine does nothing
    engine.stop();
    assert!(!engine.is_stop_requested());
    engine.finish();
}

#[test]
fn test_init_channel() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();

    let result = engine
        .init_channel(0, 512, 48000, SampleFormat::Stereo16)
        .unwrap();
    let handle = match result {
        ChannelInit::Initialized { frames, handle } => {
            assert_eq!(frames, 512);
            handle
        }
        ChannelInit::AlreadyInitialized => panic!("Expected a fresh init"),
    };

    assert_eq!(engine.channel_status(0), ChannelState::Initialized);
    assert_eq!(engine.channel_sink_handle(0), Some(handle));
    assert!(handle.0 > 0);

    let opened = sink.opened(handle).unwrap();
    assert_eq!(opened.channel, 0);
    assert_eq!(opened.frames, 512);
    assert_eq!(opened.frequency, 48000);
    assert_eq!(opened.format, SampleFormat::Stereo16);

    let info = engine.channel_info(0).unwrap();
    assert_eq!(info.frames, 512);
    assert_eq!(info.format, Some(SampleFormat::Stereo16));
    assert!(info.has_loop);
    assert!(info.paused);

    engine.finish();
}

#[test]
fn test_init_channel_normalizes_samples() {
    let (_sink, engine) = test_engine();
    engine.init().unwrap();

    engine.init_channel(0, 10, 48000, SampleFormat::Mono16).unwrap();
    engine.init_channel(1, 700, 48000, SampleFormat::Mono16).unwrap();
    engine.init_channel(2, 100_000, 48000, SampleFormat::Mono16).unwrap();

    assert_eq!(engine.channel_info(0).unwrap().frames, 256);
    assert_eq!(engine.channel_info(1).unwrap().frames, 768);
    assert_eq!(engine.channel_info(2).unwrap().frames, 2048);

    engine.finish();
}

#[test]
fn test_init_channel_twice() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();

    engine.init_channel(0, 512, 48000, SampleFormat::Stereo16).unwrap();
    let handle = engine.channel_sink_handle(0);

    let second = engine
        .init_channel(0, 1024, 44100, SampleFormat::Mono16)
        .unwrap();
    assert_eq!(second, ChannelInit::AlreadyInitialized);
    assert_eq!(engine.channel_sink_handle(0), handle);
    assert_eq!(sink.open_calls(), 1);

    // Original parameters are untouched
    let info = engine.channel_info(0).unwrap();
    assert_eq!(info.frames, 512);
    assert_eq!(info.format, Some(SampleFormat::Stereo16));

    engine.finish();
}

#[test]
fn test_init_channel_out_of_range() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();

    for id in [CHANNEL_COUNT, 99, usize::MAX] {
        assert!(matches!(
            engine.init_channel(id, 512, 48000, SampleFormat::Stereo16),
            Err(Error::InvalidChannel(bad)) if bad == id
        ));
        assert!(matches!(
            engine.init_channel_no_loop(id, 512, 48000, SampleFormat::Stereo16),
            Err(Error::InvalidChannel(_))
        ));
        assert_eq!(engine.channel_status(id), ChannelState::Uninitialized);
        assert!(engine.channel_sink_handle(id).is_none());
        assert!(engine.channel_info(id).is_none());
    }

    assert_eq!(sink.open_calls(), 0);
}

#[test]
fn test_init_channel_sink_open_failure() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();
    sink.set_fail_open(true);

    assert!(matches!(
        engine.init_channel(3, 512, 48000, SampleFormat::Stereo16),
        Err(Error::SinkOpen { channel: 3, .. })
    ));

    let info = engine.channel_info(3).unwrap();
    assert_eq!(info.state, ChannelState::Uninitialized);
    assert!(info.handle.is_none());
    assert!(info.format.is_none());
    assert!(!info.has_loop);

    // Rolled back cleanly, so a retry works
    sink.set_fail_open(false);
    engine.init_channel(3, 512, 48000, SampleFormat::Stereo16).unwrap();
    assert_eq!(engine.channel_status(3), ChannelState::Initialized);

    engine.finish();
}

#[test]
fn test_init_channel_invalid_handle() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();
    sink.set_invalid_handles(true);

    assert!(matches!(
        engine.init_channel(0, 512, 48000, SampleFormat::Stereo16),
        Err(Error::SinkOpen { channel: 0, .. })
    ));
    assert_eq!(engine.channel_status(0), ChannelState::Uninitialized);
    assert!(engine.channel_sink_handle(0).is_none());
}

#[test]
fn test_finish_releases_everything() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();

    engine.init_channel(0, 512, 48000, SampleFormat::Stereo16).unwrap();
    engine.init_channel(1, 256, 48000, SampleFormat::Mono16).unwrap();
    engine
        .init_channel_no_loop(2, 256, 48000, SampleFormat::Mono16)
        .unwrap();
    engine.resume(0).unwrap();
    assert_eq!(sink.open_outputs(), 3);

    engine.finish();

    for id in 0..3 {
        let info = engine.channel_info(id).unwrap();
        assert_eq!(info.state, ChannelState::Uninitialized);
        assert!(info.handle.is_none());
        assert!(info.format.is_none());
        assert!(!info.has_loop);
    }
    assert_eq!(sink.open_outputs(), 0);
    assert_eq!(sink.close_calls(), 3);
    assert!(!engine.is_stop_requested());

    // Second finish is a no-op
    engine.finish();
    assert_eq!(sink.close_calls(), 3);
}

#[test]
fn test_no_writes_after_finish() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();
    engine.init_channel(0, 256, 48000, SampleFormat::Stereo16).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    engine.finish();
    let writes = sink.write_calls();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(sink.write_calls(), writes);
}

#[test]
fn test_stop_then_finish() {
    let (_sink, engine) = test_engine();
    engine.init().unwrap();
    engine.init_channel(0, 512, 48000, SampleFormat::Stereo16).unwrap();

    engine.stop();
    engine.stop();
    assert!(engine.is_stop_requested());

    // A pending stop blocks new channels until finish
    assert!(matches!(
        engine.init_channel(1, 512, 48000, SampleFormat::Stereo16),
        Err(Error::EngineStopped)
    ));

    engine.finish();
    assert!(!engine.is_stop_requested());
    assert_eq!(engine.channel_status(0), ChannelState::Uninitialized);
}

#[test]
fn test_reinit_after_finish() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();

    engine.init_channel(0, 512, 48000, SampleFormat::Stereo16).unwrap();
    let first = engine.channel_sink_handle(0).unwrap();
    engine.finish();

    engine.init_channel(0, 256, 44100, SampleFormat::Mono16).unwrap();
    let second = engine.channel_sink_handle(0).unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.channel_info(0).unwrap().frames, 256);
    assert!(sink.is_open(second));

    engine.finish();
}

#[test]
fn test_drop_finishes_engine() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();
    engine.init_channel(0, 512, 48000, SampleFormat::Stereo16).unwrap();
    engine.init_channel(1, 512, 48000, SampleFormat::Stereo16).unwrap();
    assert_eq!(sink.open_outputs(), 2);

    drop(engine);
    assert_eq!(sink.open_outputs(), 0);
}

#[test]
fn test_init_channel_thread_spawn_failure() {
    init_logging();
    let sink = Arc::new(MemorySink::new());
    // No system can map a stack this large
    let config = EngineConfig::default()
        .with_stop_grace(Duration::from_millis(10))
        .with_thread_stack_size(usize::MAX / 2);
    let engine = AudioEngine::new(sink.clone(), config);
    engine.init().unwrap();

    assert!(matches!(
        engine.init_channel(2, 512, 48000, SampleFormat::Stereo16),
        Err(Error::ThreadSpawn { channel: 2, .. })
    ));

    // The sink output was opened and then closed again
    assert_eq!(sink.open_calls(), 1);
    assert_eq!(sink.close_calls(), 1);
    assert_eq!(sink.open_outputs(), 0);

    let info = engine.channel_info(2).unwrap();
    assert_eq!(info.state, ChannelState::Uninitialized);
    assert!(info.handle.is_none());
    assert!(info.format.is_none());
    assert!(!info.has_loop);

    // A channel without a loop needs no thread
    engine
        .init_channel_no_loop(2, 512, 48000, SampleFormat::Stereo16)
        .unwrap();
    assert_eq!(engine.channel_status(2), ChannelState::Initialized);
    engine.finish();
}

#[test]
fn test_custom_thread_stack_size() {
    init_logging();
    let sink = Arc::new(MemorySink::new());
    let config = EngineConfig::default()
        .with_stop_grace(Duration::from_millis(10))
        .with_thread_stack_size(256 * 1024);
    let engine = AudioEngine::new(sink.clone(), config);
    engine.init().unwrap();

    engine.init_channel(0, 256, 48000, SampleFormat::Mono16).unwrap();
    let rx = sink.blocks(engine.channel_sink_handle(0).unwrap()).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    engine.finish();
}

#[test]
fn test_finish_with_stalled_sink() {
    init_logging();
    // One queued block and nobody reading: every later write stalls
    let sink = Arc::new(MemorySink::new().with_queue_limit(1));
    let config = EngineConfig::default().with_stop_grace(Duration::from_millis(10));
    let engine = AudioEngine::new(sink.clone(), config);
    engine.init().unwrap();
    engine.init_channel(0, 256, 48000, SampleFormat::Stereo16).unwrap();

    std::thread::sleep(Duration::from_millis(150));
    assert!(engine.channel_info(0).unwrap().write_errors > 0);

    let start = Instant::now();
    engine.finish();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(engine.channel_status(0), ChannelState::Uninitialized);
    assert_eq!(sink.open_outputs(), 0);
}

#[test]
fn test_init_racing_finish_never_strands_a_channel() {
    let (sink, engine) = test_engine();
    engine.init().unwrap();

    for _ in 0..20 {
        engine.init_channel(0, 256, 48000, SampleFormat::Mono16).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let _ = engine.init_channel(1, 256, 48000, SampleFormat::Mono16);
            });
            engine.finish();
        });

        // Either refused or torn down, or initialized after finish with a live loop
        if engine.channel_status(1) == ChannelState::Initialized {
            let handle = engine.channel_sink_handle(1).unwrap();
            let rx = sink.blocks(handle).unwrap();
            while rx.try_recv().is_ok() {}
            assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        }

        engine.finish();
        assert_eq!(engine.channel_status(1), ChannelState::Uninitialized);
        assert_eq!(sink.open_outputs(), 0);
    }
}
