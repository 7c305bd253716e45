//! End-to-end behavioral tests driving [`SessionEngine`] through a
//! [`ScriptedSignalChannel`] and a [`MockTransportFactory`], exercising
//! the join/negotiate/publish/subscribe/reconnect/liveness scenarios
//! the engine is responsible for converging.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use rtc_session_engine::model::{
    DisconnectReason, EncryptionType, JoinResponse, LeaveRequestAction, ParticipantInfo,
    ParticipantState, SessionState, TrackInfo, TrackSource, TrackType,
};
use rtc_session_engine::options::Options;
use rtc_session_engine::signal::mock::ScriptedSignalChannel;
use rtc_session_engine::signal::{ClientMessage, ServerMessage};
use rtc_session_engine::transport::factory::MockTransportFactory;
use rtc_session_engine::{SessionEngine, SessionError, SessionEvent};

fn join_response(sid: &str, subscriber_primary: bool, ping_interval_secs: u32, ping_timeout_secs: u32) -> JoinResponse {
    JoinResponse {
        local_participant: ParticipantInfo {
            sid: sid.to_owned(),
            identity: format!("identity-{sid}"),
            state: ParticipantState::Joined,
            is_publisher: true,
            ..Default::default()
        },
        subscriber_primary,
        ping_interval_secs,
        ping_timeout_secs,
        ..Default::default()
    }
}

fn build_engine(signal: Arc<ScriptedSignalChannel>) -> Arc<SessionEngine> {
    build_engine_with(Options::default(), signal)
}

fn build_engine_with(options: Options, signal: Arc<ScriptedSignalChannel>) -> Arc<SessionEngine> {
    SessionEngine::new(options, signal, Arc::new(MockTransportFactory))
}

/// Polls `predicate` until it's true or `budget_ms` elapses, sleeping in
/// small steps so it plays nicely with both real and paused clocks.
async fn wait_for(budget_ms: u64, mut predicate: impl FnMut() -> bool) -> bool {
    let mut remaining = budget_ms;
    loop {
        if predicate() {
            return true;
        }
        if remaining == 0 {
            return false;
        }
        let step = remaining.min(10);
        tokio::time::sleep(Duration::from_millis(step)).await;
        remaining -= step;
    }
}

/// Drives an engine from `connect()` through a completed publisher
/// offer/answer round, landing on `RtcConnected`. Shared by scenarios
/// that don't care about the handshake itself.
async fn bring_up(engine: &Arc<SessionEngine>, signal: &Arc<ScriptedSignalChannel>, state: &mut watch::Receiver<SessionState>, subscriber_primary: bool) {
    engine.connect().await.expect("connect");
    signal.push_inbound(ServerMessage::Join(join_response("PA_1", subscriber_primary, 0, 0)));
    state.changed().await.expect("state reaches RtcConnecting");
    assert_eq!(*state.borrow(), SessionState::RtcConnecting);

    assert!(
        wait_for(2_000, || signal.sent_messages().iter().any(|m| matches!(m, ClientMessage::Offer { .. }))).await,
        "publisher offer was never sent"
    );

    signal.push_inbound(ServerMessage::Answer { sdp: "v=0 mock-answer".into() });
    state.changed().await.expect("state reaches RtcConnected");
    assert_eq!(*state.borrow(), SessionState::RtcConnected);
}

#[tokio::test]
async fn successful_join_with_immediate_publish() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();
    let mut events = engine.events().await.expect("events taken once");

    engine.connect().await.expect("connect");
    assert_eq!(*state.borrow(), SessionState::TransportConnected);
    assert!(matches!(signal.sent_messages().first(), Some(ClientMessage::Join { .. })));

    signal.push_inbound(ServerMessage::Join(join_response("PA_1", false, 10, 20)));
    state.changed().await.expect("state reaches RtcConnecting");
    assert_eq!(*state.borrow(), SessionState::RtcConnecting);
    assert!(matches!(events.recv().await, Some(SessionEvent::LocalParticipantJoined)));

    assert!(
        wait_for(2_000, || signal.sent_messages().iter().any(|m| matches!(m, ClientMessage::Offer { .. }))).await,
        "publisher offer was never sent"
    );

    signal.push_inbound(ServerMessage::Answer { sdp: "v=0 mock-answer".into() });
    state.changed().await.expect("state reaches RtcConnected");
    assert_eq!(*state.borrow(), SessionState::RtcConnected);

    let cid = engine.add_microphone_track(EncryptionType::None).await.expect("publish microphone track");
    assert!(signal
        .sent_messages()
        .iter()
        .any(|m| matches!(m, ClientMessage::AddTrack { cid: sent, .. } if sent == &cid.0)));

    signal.push_inbound(ServerMessage::TrackPublished {
        cid: cid.0.clone(),
        track: TrackInfo {
            sid: "TR_1".into(),
            kind: TrackType::Audio,
            source: TrackSource::Microphone,
            muted: false,
            ..Default::default()
        },
    });

    let mut bound = false;
    for _ in 0..200 {
        if let Some(track) = engine.local_track(&cid).await {
            if track.sid.as_deref() == Some("TR_1") {
                bound = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bound, "local track sid was never set from TrackPublished");

    // the server echoed the same mute state the client published with, so
    // no reconciling MuteTrack should have gone out.
    assert!(!signal.sent_messages().iter().any(|m| matches!(m, ClientMessage::MuteTrack { .. })));
}

#[tokio::test]
async fn mute_divergence_reconciles_after_track_published() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();

    bring_up(&engine, &signal, &mut state, false).await;

    let cid = engine.add_microphone_track(EncryptionType::None).await.expect("publish microphone track");
    engine.set_track_muted(&cid, true).await.expect("mute locally before publish ack");
    assert!(!signal.sent_messages().iter().any(|m| matches!(m, ClientMessage::MuteTrack { .. })));

    signal.push_inbound(ServerMessage::TrackPublished {
        cid: cid.0.clone(),
        track: TrackInfo {
            sid: "TR_1".into(),
            kind: TrackType::Audio,
            source: TrackSource::Microphone,
            muted: false,
            ..Default::default()
        },
    });

    assert!(
        wait_for(1_000, || signal
            .sent_messages()
            .iter()
            .any(|m| matches!(m, ClientMessage::MuteTrack { sid, muted } if sid == "TR_1" && *muted)))
        .await,
        "divergent local mute was never re-sent"
    );

    let track = engine.local_track(&cid).await.expect("track still known");
    assert_eq!(track.sid.as_deref(), Some("TR_1"));
    assert!(track.muted);
}

#[tokio::test]
async fn encrypted_microphone_track_installs_a_sender_cryptor_before_add_track() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();

    bring_up(&engine, &signal, &mut state, false).await;
    engine.key_provider().set_shared_key(vec![1, 2, 3, 4]);

    let cid = engine.add_microphone_track(EncryptionType::Gcm).await.expect("publish encrypted microphone track");
    assert!(signal
        .sent_messages()
        .iter()
        .any(|m| matches!(m, ClientMessage::AddTrack { cid: sent, info, .. } if sent == &cid.0 && info.encryption == EncryptionType::Gcm)));
}

#[tokio::test]
async fn encrypted_microphone_track_without_a_key_still_publishes_but_reports_crypto_error() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();
    let mut events = engine.events().await.expect("events taken once");

    bring_up(&engine, &signal, &mut state, false).await;
    assert!(matches!(events.recv().await, Some(SessionEvent::LocalParticipantJoined)));

    let cid = engine.add_microphone_track(EncryptionType::Gcm).await.expect("publish still succeeds");
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::TrackCryptoError { track_sid, .. }) if track_sid == cid.0
    ));
    assert!(signal
        .sent_messages()
        .iter()
        .any(|m| matches!(m, ClientMessage::AddTrack { cid: sent, .. } if sent == &cid.0)));
}

#[tokio::test]
async fn encrypted_remote_track_without_a_key_is_retracted_instead_of_exposed() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();
    let mut events = engine.events().await.expect("events taken once");

    engine.connect().await.expect("connect");
    signal.push_inbound(ServerMessage::Join(join_response("PA_1", false, 0, 0)));
    state.changed().await.expect("state reaches RtcConnecting");
    assert!(matches!(events.recv().await, Some(SessionEvent::LocalParticipantJoined)));

    signal.push_inbound(ServerMessage::ParticipantUpdate {
        participants: vec![ParticipantInfo {
            sid: "PA_2".into(),
            identity: "bob".into(),
            state: ParticipantState::Joined,
            tracks: vec![TrackInfo {
                sid: "TR_9".into(),
                kind: TrackType::Video,
                source: TrackSource::Camera,
                ..Default::default()
            }],
            is_publisher: true,
            ..Default::default()
        }],
    });
    assert!(matches!(events.recv().await, Some(SessionEvent::ParticipantAdded(sid)) if sid == "PA_2"));

    engine.on_remote_track_added("TR_9".into(), TrackType::Video, EncryptionType::Gcm).await;
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::TrackCryptoError { track_sid, .. }) if track_sid == "TR_9"
    ));
    assert!(!engine.remote_participant_sids().await.is_empty());
}

#[tokio::test]
async fn orphan_receiver_binds_once_participant_announced() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();
    let mut events = engine.events().await.expect("events taken once");

    engine.connect().await.expect("connect");
    signal.push_inbound(ServerMessage::Join(join_response("PA_1", false, 0, 0)));
    state.changed().await.expect("state reaches RtcConnecting");
    assert!(matches!(events.recv().await, Some(SessionEvent::LocalParticipantJoined)));

    engine.on_remote_track_added("TR_9".into(), TrackType::Video, EncryptionType::None).await;
    assert!(engine.remote_participant_sids().await.is_empty());

    signal.push_inbound(ServerMessage::ParticipantUpdate {
        participants: vec![ParticipantInfo {
            sid: "PA_2".into(),
            identity: "bob".into(),
            state: ParticipantState::Joined,
            tracks: vec![TrackInfo {
                sid: "TR_9".into(),
                kind: TrackType::Video,
                source: TrackSource::Camera,
                ..Default::default()
            }],
            is_publisher: true,
            ..Default::default()
        }],
    });

    let mut bound = false;
    for _ in 0..200 {
        if engine.remote_participant_sids().await.iter().any(|sid| sid == "PA_2") {
            bound = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bound, "orphan track was never bound to its announced participant");

    assert!(matches!(events.recv().await, Some(SessionEvent::ParticipantAdded(sid)) if sid == "PA_2"));
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::TrackAdded { participant_sid, track_sid })
            if participant_sid == "PA_2" && track_sid == "TR_9"
    ));
}

#[tokio::test(start_paused = true)]
async fn resume_leave_retries_are_capped() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine_with(Options { max_reconnect_attempts: 2, ..Options::default() }, Arc::clone(&signal));
    let mut state = engine.state();

    bring_up(&engine, &signal, &mut state, false).await;
    assert_eq!(signal.open_attempts(), 1);

    for expected_attempts in [2usize, 3usize] {
        signal.push_inbound(ServerMessage::Leave {
            reason: DisconnectReason::ClientInitiated,
            action: LeaveRequestAction::Resume,
        });
        assert!(
            wait_for(5_000, || signal.open_attempts() == expected_attempts).await,
            "expected {expected_attempts} cumulative open attempts"
        );
    }

    // The cap (max_reconnect_attempts = 2) has been reached. A third
    // Resume leave must tear the session down without reopening the
    // channel again.
    signal.push_inbound(ServerMessage::Leave {
        reason: DisconnectReason::ClientInitiated,
        action: LeaveRequestAction::Resume,
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(signal.open_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn ping_timeout_tears_down_session() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine_with(Options { max_missed_pings: 1, ..Options::default() }, Arc::clone(&signal));
    let mut state = engine.state();
    let mut events = engine.events().await.expect("events taken once");

    engine.connect().await.expect("connect");
    signal.push_inbound(ServerMessage::Join(join_response("PA_1", false, 1, 1)));
    state.changed().await.expect("state reaches RtcConnecting");
    assert_eq!(*state.borrow(), SessionState::RtcConnecting);
    assert!(matches!(events.recv().await, Some(SessionEvent::LocalParticipantJoined)));

    // no Pong is ever pushed back; after max_missed_pings consecutive
    // unanswered intervals the liveness loop gives up.
    state.changed().await.expect("state reaches a terminal value");
    assert_eq!(*state.borrow(), SessionState::RtcClosed);

    assert!(matches!(events.recv().await, Some(SessionEvent::LocalParticipantLeft)));
    assert!(matches!(events.recv().await, Some(SessionEvent::Error(SessionError::ServerPingTimedOut))));
}

#[tokio::test]
async fn user_packet_send_opens_after_join_and_fails_before() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();

    // before any join, the local reliable/lossy data channels don't
    // exist yet, so a send must fail closed rather than silently queue.
    assert!(engine.send_user_packet(vec![1, 2, 3], true, None, vec![], vec![]).await.is_err());

    bring_up(&engine, &signal, &mut state, false).await;

    engine
        .send_user_packet(vec![1, 2, 3], true, Some("topic".into()), vec!["PA_2".into()], vec![])
        .await
        .expect("reliable channel open after join");
    engine
        .send_user_packet(vec![4, 5, 6], false, None, vec![], vec!["bob".into()])
        .await
        .expect("lossy channel open after join");
    engine
        .send_chat_message("hi".into(), false, false, vec!["bob".into()])
        .await
        .expect("chat goes out on the reliable channel");

    let sent = signal.sent_messages();
    assert!(matches!(
        sent.iter().find(|m| matches!(m, ClientMessage::SendData { kind: rtc_session_engine::signal::DataPacketKind::Reliable, .. })),
        Some(ClientMessage::SendData { topic: Some(topic), destination_sids, .. }) if topic == "topic" && destination_sids == &["PA_2".to_string()]
    ));
    assert!(sent.iter().any(|m| matches!(m, ClientMessage::SendData { kind: rtc_session_engine::signal::DataPacketKind::Lossy, .. })));
    assert!(sent.iter().any(|m| matches!(m, ClientMessage::SendChatMessage { message, .. } if message == "hi")));
}

#[tokio::test]
async fn malformed_frame_is_recovered_locally() {
    let signal = Arc::new(ScriptedSignalChannel::new());
    let engine = build_engine(Arc::clone(&signal));
    let mut state = engine.state();
    let mut events = engine.events().await.expect("events taken once");

    engine.connect().await.expect("connect");
    signal.push_parse_error("truncated frame");
    assert!(matches!(events.recv().await, Some(SessionEvent::ResponseParseError(msg)) if msg.contains("truncated frame")));

    // the channel stays open: a subsequent well-formed message still
    // dispatches normally.
    signal.push_inbound(ServerMessage::Join(join_response("PA_1", false, 0, 0)));
    state.changed().await.expect("state reaches RtcConnecting");
    assert_eq!(*state.borrow(), SessionState::RtcConnecting);
}
