//! Cross-module scenario tests
//!
//! Exercises the full stack (frame driver, session, codec, pool, metrics)
//! over a scriptable engine: multi-frame runs, rollback restore fidelity,
//! failure recovery, and session restart.

use crate::codec::StateCodec;
use crate::engine::{EngineEvent, EngineNetworkStats};
use crate::frame::FrameDriver;
use crate::pool::StateBufferPool;
use crate::session::{NetplaySession, SessionConfig};
use crate::test_utils::{MockEngine, MockSystem, session_lock};

fn two_player_session() -> NetplaySession<MockEngine> {
    let mut session = NetplaySession::with_codec(
        MockEngine::new(),
        StateCodec::new(StateBufferPool::new(64 * 1024, 4)),
    );
    session
        .initialize(&SessionConfig {
            local_player: 1,
            peers: vec!["127.0.0.1:7000".parse().unwrap()],
            local_port: 7100,
            frame_delay: 1,
        })
        .unwrap();
    session
}

#[test]
fn test_ten_frame_run_with_one_rollback() {
    let _guard = session_lock();
    let mut session = two_player_session();
    let mut system = MockSystem::with_state(vec![0u8; 1024]);
    let mut driver = FrameDriver::new();

    for frame in 0..10u32 {
        if frame == 5 {
            session.engine_mut().queue_rollback(3);
        }
        // Keep the serialized state distinct per frame
        system.set_state(frame.to_le_bytes().to_vec());
        assert!(driver.on_frame(&mut session, &mut system));
    }

    assert_eq!(session.current_frame(), 10);
    // Only re-simulated frames step through the session; displayed frames
    // run in the emulator afterwards
    assert_eq!(system.steps, 3);

    let metrics = session.metrics();
    assert_eq!(metrics.total_rollbacks, 1);
    assert_eq!(metrics.rollback_frames, 3);
    assert_eq!(metrics.max_rollback_frames, 3);
    assert_eq!(metrics.avg_rollback_frames, 3.0);
    assert!(session.rollback_just_occurred());
    session.shutdown();
}

#[test]
fn test_rollback_restores_earlier_state_bytes() {
    let _guard = session_lock();
    let mut session = two_player_session();
    let mut system = MockSystem::with_state(vec![0u8; 8]);
    let mut driver = FrameDriver::new();

    for frame in 0..4u32 {
        system.set_state(vec![frame as u8; 8]);
        assert!(driver.on_frame(&mut session, &mut system));
    }

    // Roll back two frames: the engine restores the state saved at frame 2
    session.engine_mut().queue_rollback(2);
    system.set_state(vec![99u8; 8]);
    assert!(driver.on_frame(&mut session, &mut system));

    assert_eq!(system.state(), &[2u8; 8]);
    assert!(session.rollback_just_occurred());
    session.shutdown();
}

#[test]
fn test_save_failure_drops_frame_then_recovers() {
    let _guard = session_lock();
    let mut session = two_player_session();
    let mut system = MockSystem::with_state(vec![5u8; 512]);
    let mut driver = FrameDriver::new();

    system.fail_next_save();
    assert!(!driver.on_frame(&mut session, &mut system));
    assert!(session.last_error().is_some());
    assert_eq!(session.current_frame(), 0);

    // The failed save released its buffers; the next frame is clean
    assert!(driver.on_frame(&mut session, &mut system));
    assert_eq!(session.current_frame(), 1);
    session.shutdown();
}

#[test]
fn test_network_stats_feed_metrics() {
    let _guard = session_lock();
    let mut session = two_player_session();
    let mut system = MockSystem::with_state(vec![1u8; 64]);
    let mut driver = FrameDriver::new();

    session.engine_mut().stats = Some(EngineNetworkStats {
        ping_ms: 48,
        local_frames_behind: 0,
        remote_frames_behind: 2,
    });
    session.engine_mut().queue_event(EngineEvent::TimeSync { frames_ahead: 1 });
    assert!(driver.on_frame(&mut session, &mut system));

    let metrics = session.metrics();
    assert_eq!(metrics.ping_ms, 48);
    assert_eq!(metrics.predicted_frames, 2);
    assert_eq!(metrics.remote_frame_advantage, 1);
    session.shutdown();
}

#[test]
fn test_session_restarts_cleanly() {
    let _guard = session_lock();
    let mut session = two_player_session();
    let mut system = MockSystem::with_state(vec![2u8; 128]);
    let mut driver = FrameDriver::new();

    assert!(driver.on_frame(&mut session, &mut system));
    session.engine_mut().queue_rollback(1);
    assert!(driver.on_frame(&mut session, &mut system));
    assert!(session.metrics().total_rollbacks > 0);
    session.shutdown();

    // A fresh session starts with zeroed counters and frame numbering
    session
        .initialize(&SessionConfig {
            local_player: 2,
            peers: vec!["127.0.0.1:7001".parse().unwrap()],
            local_port: 7101,
            frame_delay: 0,
        })
        .unwrap();
    assert_eq!(session.current_frame(), 0);
    assert_eq!(session.metrics().total_rollbacks, 0);
    assert!(!session.rollback_just_occurred());
    assert!(driver.on_frame(&mut session, &mut system));
    session.shutdown();
}
