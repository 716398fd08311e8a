use orbis_audio::error::Error;
use orbis_audio::{AudioEngine, EngineConfig, MemorySink, SampleFormat, CHANNEL_COUNT, VOLUME_MAX};
use std::sync::Arc;
use std::time::Duration;

fn test_engine() -> (Arc<MemorySink>, AudioEngine) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sink = Arc::new(MemorySink::new());
    let config = EngineConfig::default().with_stop_grace(Duration::from_millis(10));
    let engine = AudioEngine::new(sink.clone(), config);
    engine.init().unwrap();
    (sink, engine)
}

#[test]
fn test_controls_reject_out_of_range_ids() {
    let (sink, engine) = test_engine();

    for id in [CHANNEL_COUNT, CHANNEL_COUNT + 1, usize::MAX] {
        assert!(matches!(engine.pause(id), Err(Error::InvalidChannel(_))));
        assert!(matches!(engine.resume(id), Err(Error::InvalidChannel(_))));
        assert!(matches!(engine.is_paused(id), Err(Error::InvalidChannel(_))));
        assert!(matches!(
            engine.set_callback(id, |_: &mut [i16], _: u32| {}),
            Err(Error::InvalidChannel(_))
        ));
        assert!(matches!(
            engine.clear_callback(id),
            Err(Error::InvalidChannel(_))
        ));
        assert!(matches!(
            engine.set_volume(id, 0, 0),
            Err(Error::InvalidChannel(_))
        ));
        assert!(matches!(engine.volume(id), Err(Error::InvalidChannel(_))));
        assert!(matches!(
            engine.play_block(id, &[0; 4]),
            Err(Error::InvalidChannel(_))
        ));
    }

    assert_eq!(sink.write_calls(), 0);
}

#[test]
fn test_pause_resume() {
    let (_sink, engine) = test_engine();

    // Channels start paused by default
    assert!(engine.is_paused(0).unwrap());
    engine.resume(0).unwrap();
    assert!(!engine.is_paused(0).unwrap());
    engine.pause(0).unwrap();
    assert!(engine.is_paused(0).unwrap());

    // Other channels are unaffected
    assert!(engine.is_paused(1).unwrap());
}

#[test]
fn test_start_unpaused_config() {
    let sink = Arc::new(MemorySink::new());
    let engine = AudioEngine::new(sink, EngineConfig::default().with_start_paused(false));
    for id in 0..CHANNEL_COUNT {
        assert!(!engine.is_paused(id).unwrap());
    }
}

#[test]
fn test_volume_defaults_and_clamping() {
    let sink = Arc::new(MemorySink::new());
    let config = EngineConfig::default().with_default_volume(1000, 2000);
    let engine = AudioEngine::new(sink, config);

    assert_eq!(engine.volume(0).unwrap(), (1000, 2000));

    engine.set_volume(0, 12, VOLUME_MAX + 500).unwrap();
    assert_eq!(engine.volume(0).unwrap(), (12, VOLUME_MAX));
    assert_eq!(engine.volume(1).unwrap(), (1000, 2000));
}

#[test]
fn test_callback_flags() {
    let (_sink, engine) = test_engine();

    assert!(!engine.channel_info(2).unwrap().has_callback);
    engine
        .set_callback(2, |buf: &mut [i16], _frames: u32| buf.fill(1))
        .unwrap();
    assert!(engine.channel_info(2).unwrap().has_callback);
    engine.clear_callback(2).unwrap();
    assert!(!engine.channel_info(2).unwrap().has_callback);

    // Clearing twice is harmless
    engine.clear_callback(2).unwrap();
}

#[test]
fn test_callback_is_dropped_when_replaced() {
    let (_sink, engine) = test_engine();
    let token = Arc::new(());

    let held = token.clone();
    engine
        .set_callback(0, move |_: &mut [i16], _: u32| {
            let _ = &held;
        })
        .unwrap();
    assert_eq!(Arc::strong_count(&token), 2);

    engine.clear_callback(0).unwrap();
    assert_eq!(Arc::strong_count(&token), 1);
}

#[test]
fn test_play_block_on_no_loop_channel() {
    let (sink, engine) = test_engine();
    engine
        .init_channel_no_loop(1, 256, 48000, SampleFormat::Mono16)
        .unwrap();

    let info = engine.channel_info(1).unwrap();
    assert!(!info.has_loop);

    let handle = engine.channel_sink_handle(1).unwrap();
    let rx = sink.blocks(handle).unwrap();

    let block: Vec<i16> = (0..256).collect();
    engine.play_block(1, &block).unwrap();
    assert_eq!(rx.try_recv().unwrap(), block);

    // Nothing else writes to a channel without a loop
    std::thread::sleep(Duration::from_millis(20));
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.channel_info(1).unwrap().blocks_submitted, 1);

    engine.finish();
    assert_eq!(sink.open_outputs(), 0);
}

#[test]
fn test_play_block_errors() {
    let (sink, engine) = test_engine();

    assert!(matches!(
        engine.play_block(0, &[0; 256]),
        Err(Error::ChannelNotInitialized(0))
    ));

    engine
        .init_channel_no_loop(0, 256, 48000, SampleFormat::Mono16)
        .unwrap();
    sink.set_fail_write(true);
    assert!(matches!(
        engine.play_block(0, &[0; 256]),
        Err(Error::Output(_))
    ));
    assert_eq!(engine.channel_info(0).unwrap().write_errors, 1);
    sink.set_fail_write(false);

    engine.stop();
    assert!(matches!(
        engine.play_block(0, &[0; 256]),
        Err(Error::EngineStopped)
    ));

    engine.finish();
    assert!(matches!(
        engine.play_block(0, &[0; 256]),
        Err(Error::ChannelNotInitialized(0))
    ));
}

#[test]
fn test_play_block_requires_one_full_buffer() {
    let (sink, engine) = test_engine();
    engine
        .init_channel_no_loop(0, 512, 48000, SampleFormat::Stereo16)
        .unwrap();
    let rx = sink.blocks(engine.channel_sink_handle(0).unwrap()).unwrap();

    for len in [0, 3, 512, 1023, 1025, 4096] {
        let block = vec![1i16; len];
        assert!(matches!(
            engine.play_block(0, &block),
            Err(Error::BlockSize { channel: 0, expected: 1024, actual }) if actual == len
        ));
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(sink.write_calls(), 0);

    engine.play_block(0, &[1i16; 1024]).unwrap();
    assert_eq!(rx.try_recv().unwrap().len(), 1024);

    engine.finish();
}
