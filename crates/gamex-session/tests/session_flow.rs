//! End-to-end session tests over the in-memory pairing binding.

use std::sync::Arc;
use std::time::Duration;

use gamex_events::{EventKind, SessionEvent};
use gamex_protocol::{
    Codec, EmotionAverages, EmotionCategory, Envelope, ErrorCode, GameMode,
    GameSnapshot, GameSummary, JsonCodec, Message, PeerId, Player, PlayerInfo,
    RoomCode,
    SafetyBand, Verdict,
};
use gamex_session::{
    ErrorClass, Referee, SessionConfig, SessionError, SessionHandle,
    SessionState,
};
use gamex_transport::{
    Connection, Consent, Listener, PairingConnection, PairingMedium,
    PairingTransport, Transport,
};
use tokio::sync::mpsc::UnboundedReceiver;

// =========================================================================
// Mock referee: the game ends once everyone has played every round.
// =========================================================================

struct CountingReferee;

impl Referee for CountingReferee {
    fn is_finished(&self, snapshot: &GameSnapshot) -> bool {
        snapshot.choices.len() >= snapshot.players.len() * snapshot.total_rounds as usize
    }

    fn summarize(&self, snapshot: &GameSnapshot) -> GameSummary {
        GameSummary {
            verdict: Verdict::Replay,
            reason: "counted".into(),
            safe_score: 100.0,
            safety: SafetyBand::Safe,
            safety_label: "Calm connection".into(),
            global: EmotionAverages::default(),
            completed_rounds: snapshot.total_rounds,
            total_rounds: snapshot.total_rounds,
            total_choices: snapshot.choices.len(),
        }
    }
}

// =========================================================================
// Helpers
// =========================================================================

type Session = SessionHandle<PairingTransport>;

fn spawn(transport: PairingTransport, config: SessionConfig) -> Session {
    SessionHandle::spawn(transport, config, Arc::new(CountingReferee))
}

async fn peer(medium: &PairingMedium, id: &str) -> Session {
    let session = spawn(
        PairingTransport::new(medium.clone()).with_identity(id),
        SessionConfig::default(),
    );
    session.initialize(id.to_uppercase()).await.expect("should initialize");
    session
}

async fn host(medium: &PairingMedium, id: &str) -> (Session, RoomCode) {
    let session = peer(medium, id).await;
    let code = session.create_room().await.expect("should host");
    (session, code)
}

/// A moderator plus one joined session per guest id.
async fn party(medium: &PairingMedium, guests: &[&str]) -> (Session, RoomCode, Vec<Session>) {
    let (moderator, code) = host(medium, "m-1").await;
    let mut joined = Vec::new();
    for id in guests {
        let guest = peer(medium, id).await;
        guest.join_room(&code).await.expect("should join");
        joined.push(guest);
    }
    (moderator, code, joined)
}

fn ids(roster: &[Player]) -> Vec<String> {
    roster.iter().map(|p| p.id.to_string()).collect()
}

async fn next_event(events: &mut UnboundedReceiver<SessionEvent>, kind: EventKind) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if event.kind() == kind {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} event in time"))
}

/// Polls `session`'s roster until `check` accepts it.
async fn wait_for_roster<F>(session: &Session, check: F)
where
    F: Fn(&[Player]) -> bool,
{
    let mut roster = Vec::new();
    for _ in 0..200 {
        roster = session.roster().await.unwrap_or_default();
        if check(&roster) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("roster never settled: {:?}", ids(&roster));
}

async fn roster_ids(session: &Session) -> Vec<String> {
    ids(&session.roster().await.unwrap_or_default())
}

async fn send_raw(conn: &PairingConnection, message: Message) {
    let bytes = JsonCodec.encode_envelope(&Envelope::new(message)).unwrap();
    conn.send(&bytes).await.unwrap();
}

async fn recv_raw(conn: &PairingConnection) -> Message {
    let bytes = tokio::time::timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("frame in time")
        .unwrap()
        .expect("channel open");
    JsonCodec.decode_envelope(&bytes).unwrap().into_message()
}

// =========================================================================
// Join handshake
// =========================================================================

#[tokio::test]
async fn test_join_room_then_out_of_turn_choice_is_rejected() {
    let medium = PairingMedium::new();
    let (moderator, code) = host(&medium, "m-123").await;
    assert_eq!(code.as_str(), "m-123");

    let guest = peer(&medium, "g-1").await;
    let (_, mut guest_events) = guest.events().subscribe_stream();
    guest.join_room(&code).await.unwrap();

    let guest_view = guest.view().await.unwrap();
    let moderator_view = moderator.view().await.unwrap();
    assert_eq!(guest_view.state, SessionState::Active);
    assert!(!guest_view.is_moderator);
    assert!(moderator_view.is_moderator);
    assert_eq!(ids(&moderator_view.roster), vec!["m-123", "g-1"]);
    assert_eq!(ids(&guest_view.roster), vec!["m-123", "g-1"]);
    assert!(moderator_view.roster[0].is_moderator && moderator_view.roster[0].is_local);
    assert!(guest_view.roster[0].is_moderator && !guest_view.roster[0].is_local);
    assert!(guest_view.roster[1].is_local && !guest_view.roster[1].is_moderator);
    assert_eq!(guest_view.room_code, Some(code));
    assert_eq!(moderator_view.current_turn, Some((0, PeerId::from("m-123"))));

    // Index points at the moderator; the guest plays anyway.
    guest.send_choice(EmotionCategory::Love, 0).await.unwrap();
    match next_event(&mut guest_events, EventKind::Error).await {
        SessionEvent::Error(notice) => assert_eq!(notice.code, ErrorCode::NotYourTurn),
        other => panic!("unexpected {other:?}"),
    }

    let after = moderator.view().await.unwrap();
    assert_eq!(after.roster, moderator_view.roster);
    assert_eq!(after.current_turn, moderator_view.current_turn);
}

#[tokio::test]
async fn test_join_room_every_roster_matches_moderator() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2", "g-3"]).await;

    let expected = vec!["m-1", "g-1", "g-2", "g-3"];
    assert_eq!(roster_ids(&moderator).await, expected);
    assert_eq!(moderator.connection_count().await.unwrap(), 3);

    for guest in &guests {
        wait_for_roster(guest, |roster| ids(roster) == expected).await;
        let roster = guest.roster().await.unwrap();
        assert_eq!(roster.iter().filter(|p| p.is_moderator).count(), 1);
        assert_eq!(roster.iter().filter(|p| p.is_local).count(), 1);
        assert_eq!(guest.connection_count().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_join_room_publishes_player_connected_on_moderator() {
    let medium = PairingMedium::new();
    let (moderator, code) = host(&medium, "m-1").await;
    let (_, mut events) = moderator.events().subscribe_stream();

    let guest = peer(&medium, "g-1").await;
    guest.join_room(&code).await.unwrap();

    match next_event(&mut events, EventKind::PlayerConnected).await {
        SessionEvent::PlayerConnected(player) => {
            assert_eq!(player.id, PeerId::from("g-1"));
            assert_eq!(player.display_name, "G-1");
            assert!(!player.is_local);
        }
        other => panic!("unexpected {other:?}"),
    }
    match next_event(&mut events, EventKind::RosterUpdated).await {
        SessionEvent::RosterUpdated(players) => assert_eq!(players.len(), 2),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_join_room_unknown_code_is_room_not_found_and_retryable() {
    let medium = PairingMedium::new();
    let guest = peer(&medium, "g-1").await;
    let (_, mut events) = guest.events().subscribe_stream();

    let missing = RoomCode::parse("m-nobody").unwrap();
    let err = guest.join_room(&missing).await.unwrap_err();
    assert!(matches!(err, SessionError::RoomNotFound(ref code) if code == &missing));
    assert_eq!(err.class(), ErrorClass::Attempt);
    assert_eq!(guest.state().await, SessionState::Idle);
    match next_event(&mut events, EventKind::Error).await {
        SessionEvent::Error(notice) => assert_eq!(notice.code, ErrorCode::RoomNotFound),
        other => panic!("unexpected {other:?}"),
    }

    // Same session, real room this time.
    let (_moderator, code) = host(&medium, "m-1").await;
    guest.join_room(&code).await.unwrap();
    assert_eq!(guest.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_join_room_declined_pairing_is_permission_denied() {
    let medium = PairingMedium::new();
    let (_moderator, code) = host(&medium, "m-1").await;

    let guest = spawn(
        PairingTransport::new(medium.clone())
            .with_identity("g-shy")
            .with_consent(Consent::Declined),
        SessionConfig::default(),
    );
    guest.initialize("Shy").await.unwrap();

    let err = guest.join_room(&code).await.unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied(_)));
    assert_eq!(guest.state().await, SessionState::Idle);
}

#[tokio::test]
async fn test_join_room_silent_moderator_times_out() {
    let medium = PairingMedium::new();

    // Accepts channels and never answers.
    let silent = PairingTransport::new(medium.clone()).with_identity("m-silent");
    silent.bind().await.unwrap();
    let mut listener = silent.listen().await.unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok(conn) = listener.accept().await {
            held.push(conn);
        }
    });

    let config = SessionConfig {
        handshake_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    };
    let guest = spawn(
        PairingTransport::new(medium.clone()).with_identity("g-1"),
        config,
    );
    guest.initialize("Gus").await.unwrap();
    let (_, mut events) = guest.events().subscribe_stream();

    let code = RoomCode::parse("m-silent").unwrap();
    let err = guest.join_room(&code).await.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeTimeout(_)), "got {err:?}");
    assert_eq!(guest.state().await, SessionState::Idle);
    assert_eq!(roster_ids(&guest).await, vec!["g-1"]);
    match next_event(&mut events, EventKind::Error).await {
        SessionEvent::Error(notice) => assert_eq!(notice.code, ErrorCode::HandshakeTimeout),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_join_room_abandoned_midway_releases_channel() {
    let medium = PairingMedium::new();

    // Never answers; reports when the guest's channel goes away.
    let silent = PairingTransport::new(medium.clone()).with_identity("m-silent");
    silent.bind().await.unwrap();
    let mut listener = silent.listen().await.unwrap();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        while let Ok(Some(_)) = conn.recv().await {}
        let _ = closed_tx.send(());
    });

    let guest = peer(&medium, "g-1").await;
    let code = RoomCode::parse("m-silent").unwrap();
    let outcome = tokio::time::timeout(Duration::from_millis(100), guest.join_room(&code)).await;
    assert!(outcome.is_err(), "join should still be pending");

    tokio::time::timeout(Duration::from_secs(2), closed_rx)
        .await
        .expect("channel should close once the join is dropped")
        .unwrap();
    assert_eq!(guest.state().await, SessionState::Idle);
    assert_eq!(guest.connection_count().await.unwrap(), 0);
    assert_eq!(roster_ids(&guest).await, vec!["g-1"]);
}

#[tokio::test]
async fn test_join_room_roster_without_guest_is_refused() {
    let medium = PairingMedium::new();

    // Welcomes the guest, then sends a roster that leaves them out.
    let rogue = PairingTransport::new(medium.clone()).with_identity("m-1");
    rogue.bind().await.unwrap();
    let mut listener = rogue.listen().await.unwrap();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        assert!(matches!(recv_raw(&conn).await, Message::Join { .. }));
        send_raw(
            &conn,
            Message::Welcome {
                moderator_id: PeerId::from("m-1"),
                moderator_name: "Mona".into(),
            },
        )
        .await;
        let players = vec![PlayerInfo {
            id: PeerId::from("m-1"),
            display_name: "Mona".into(),
            is_moderator: true,
        }];
        send_raw(&conn, Message::RosterUpdate { players }).await;
        while let Ok(Some(_)) = conn.recv().await {}
        let _ = closed_tx.send(());
    });

    let guest = peer(&medium, "g-1").await;
    let (_, mut events) = guest.events().subscribe_stream();
    let code = RoomCode::parse("m-1").unwrap();

    let err = guest.join_room(&code).await.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeAborted(_)), "got {err:?}");
    assert_eq!(guest.state().await, SessionState::Idle);
    let roster = guest.roster().await.unwrap();
    assert_eq!(ids(&roster), vec!["g-1"]);
    assert!(roster[0].is_local);
    match next_event(&mut events, EventKind::Error).await {
        SessionEvent::Error(notice) => assert_eq!(notice.code, ErrorCode::ProtocolViolation),
        other => panic!("unexpected {other:?}"),
    }
    tokio::time::timeout(Duration::from_secs(2), closed_rx)
        .await
        .expect("guest should close the channel")
        .unwrap();
}

#[tokio::test]
async fn test_channel_without_join_is_dropped_after_timeout() {
    let medium = PairingMedium::new();
    let moderator = spawn(
        PairingTransport::new(medium.clone()).with_identity("m-1"),
        SessionConfig {
            handshake_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        },
    );
    moderator.initialize("Mona").await.unwrap();
    let code = moderator.create_room().await.unwrap();

    // Opens a channel and never says Join.
    let lurker = PairingTransport::new(medium.clone()).with_identity("g-lurk");
    lurker.bind().await.unwrap();
    let conn = lurker.open(&code.extract_address()).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), conn.recv())
        .await
        .expect("moderator should drop the channel")
        .unwrap();
    assert!(closed.is_none());
    assert_eq!(roster_ids(&moderator).await, vec!["m-1"]);

    // A guest that does say Join is unaffected.
    let guest = peer(&medium, "g-1").await;
    guest.join_room(&code).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(moderator.connection_count().await.unwrap(), 1);
    assert_eq!(guest.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_join_room_full_room_is_rejected() {
    let medium = PairingMedium::new();
    let moderator = spawn(
        PairingTransport::new(medium.clone()).with_identity("m-1"),
        SessionConfig {
            max_players: 2,
            ..SessionConfig::default()
        },
    );
    moderator.initialize("Mona").await.unwrap();
    let code = moderator.create_room().await.unwrap();

    let first = peer(&medium, "g-1").await;
    first.join_room(&code).await.unwrap();

    let second = peer(&medium, "g-2").await;
    let err = second.join_room(&code).await.unwrap_err();
    match err {
        SessionError::Rejected { code, .. } => assert_eq!(code, ErrorCode::RoomFull),
        other => panic!("expected RoomFull, got {other:?}"),
    }
    assert_eq!(second.state().await, SessionState::Idle);
    assert_eq!(roster_ids(&moderator).await, vec!["m-1", "g-1"]);
}

#[tokio::test]
async fn test_join_room_before_initialize_is_invalid_state() {
    let medium = PairingMedium::new();
    let guest = spawn(PairingTransport::new(medium), SessionConfig::default());
    let code = RoomCode::parse("m-1").unwrap();

    let err = guest.join_room(&code).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Uninitialized,
            ..
        }
    ));
}

#[tokio::test]
async fn test_initialize_unsupported_transport_closes_session() {
    let session = spawn(
        PairingTransport::new(PairingMedium::unavailable()),
        SessionConfig::default(),
    );
    let (_, mut events) = session.events().subscribe_stream();

    let err = session.initialize("Mona").await.unwrap_err();
    assert!(matches!(err, SessionError::TransportInitFailed(_)));
    assert_eq!(err.class(), ErrorClass::Session);
    assert_eq!(session.state().await, SessionState::Closed);

    match events.recv().await {
        Some(SessionEvent::Error(notice)) => {
            assert_eq!(notice.code, ErrorCode::TransportInitFailed);
        }
        other => panic!("unexpected {other:?}"),
    }
    // Closing cleared the subscription.
    assert!(events.recv().await.is_none());
}

// =========================================================================
// Turns and game flow
// =========================================================================

#[tokio::test]
async fn test_send_choice_follows_roster_order() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2"]).await;
    let (_, mut events) = moderator.events().subscribe_stream();

    let players: Vec<&Session> = std::iter::once(&moderator).chain(guests.iter()).collect();
    let mut accepted = Vec::new();
    for (turn, session) in players.iter().enumerate() {
        session.send_choice(EmotionCategory::Friendship, 0).await.unwrap();
        match next_event(&mut events, EventKind::ChoiceReceived).await {
            SessionEvent::ChoiceReceived(record) => accepted.push(record.player_id.to_string()),
            other => panic!("unexpected {other:?} on turn {turn}"),
        }
    }

    assert_eq!(accepted, vec!["m-1", "g-1", "g-2"]);
    assert_eq!(moderator.current_turn().await.unwrap(), Some((0, PeerId::from("m-1"))));
}

#[tokio::test]
async fn test_send_choice_moderator_out_of_turn_fails() {
    let medium = PairingMedium::new();
    let (moderator, _, _guests) = party(&medium, &["g-1"]).await;

    moderator.send_choice(EmotionCategory::Love, 0).await.unwrap();
    let err = moderator.send_choice(EmotionCategory::Love, 0).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Message);
    match err {
        SessionError::NotYourTurn { expected } => assert_eq!(expected, PeerId::from("g-1")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_send_choice_relays_choice_and_turn_to_guests() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2"]).await;
    let (_, mut watcher) = guests[1].events().subscribe_stream();

    moderator.send_choice(EmotionCategory::Passion, 0).await.unwrap();

    match next_event(&mut watcher, EventKind::ChoiceReceived).await {
        SessionEvent::ChoiceReceived(record) => {
            assert_eq!(record.player_id, PeerId::from("m-1"));
            assert_eq!(record.category, EmotionCategory::Passion);
        }
        other => panic!("unexpected {other:?}"),
    }
    match next_event(&mut watcher, EventKind::NextTurn).await {
        SessionEvent::NextTurn {
            current_player_index,
            current_player_id,
        } => {
            assert_eq!(current_player_index, 1);
            assert_eq!(current_player_id, PeerId::from("g-1"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(guests[1].current_turn().await.unwrap(), Some((1, PeerId::from("g-1"))));
}

#[tokio::test]
async fn test_start_game_runs_to_game_over() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1"]).await;
    let guest = &guests[0];
    let (_, mut guest_events) = guest.events().subscribe_stream();
    let (_, mut moderator_events) = moderator.events().subscribe_stream();

    moderator.broadcast_mode_selection(GameMode::Easy, 1).await.unwrap();
    match next_event(&mut guest_events, EventKind::ModeChanged).await {
        SessionEvent::ModeChanged { mode, total_rounds } => {
            assert_eq!(mode, GameMode::Easy);
            assert_eq!(total_rounds, 1);
        }
        other => panic!("unexpected {other:?}"),
    }

    let snapshot = moderator.start_game().await.unwrap().expect("moderator starts");
    assert_eq!(snapshot.players.len(), 2);
    assert_eq!(snapshot.current_player_index, 0);
    match next_event(&mut guest_events, EventKind::GameStarted).await {
        SessionEvent::GameStarted(received) => assert_eq!(received, snapshot),
        other => panic!("unexpected {other:?}"),
    }

    moderator.send_choice(EmotionCategory::Friendship, 0).await.unwrap();
    next_event(&mut guest_events, EventKind::NextTurn).await;
    guest.send_choice(EmotionCategory::Passion, 0).await.unwrap();

    match next_event(&mut guest_events, EventKind::GameOver).await {
        SessionEvent::GameOver(summary) => assert_eq!(summary.total_choices, 2),
        other => panic!("unexpected {other:?}"),
    }
    next_event(&mut moderator_events, EventKind::GameOver).await;
    assert!(!moderator.view().await.unwrap().game_in_progress);
}

#[tokio::test]
async fn test_start_game_without_mode_or_players_is_rejected() {
    let medium = PairingMedium::new();
    let (moderator, _) = host(&medium, "m-1").await;

    let err = moderator.start_game().await.unwrap_err();
    assert!(matches!(err, SessionError::GameRejected(_)));

    moderator.broadcast_mode_selection(GameMode::Hard, 3).await.unwrap();
    match moderator.start_game().await.unwrap_err() {
        SessionError::GameRejected(reason) => assert!(reason.contains("2 players"), "got {reason}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_moderator_only_calls_are_no_ops_on_guest() {
    let medium = PairingMedium::new();
    let (_moderator, _, guests) = party(&medium, &["g-1"]).await;
    let guest = &guests[0];

    guest.broadcast_mode_selection(GameMode::Hardest, 5).await.unwrap();
    assert_eq!(guest.start_game().await.unwrap(), None);
    assert_eq!(guest.view().await.unwrap().mode, None);
}

// =========================================================================
// Names
// =========================================================================

#[tokio::test]
async fn test_update_display_name_reaches_everyone() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2"]).await;
    let (_, mut watcher) = guests[1].events().subscribe_stream();

    guests[0].update_display_name("Zed").await.unwrap();

    match next_event(&mut watcher, EventKind::NameUpdated).await {
        SessionEvent::NameUpdated {
            player_id,
            display_name,
        } => {
            assert_eq!(player_id, PeerId::from("g-1"));
            assert_eq!(display_name, "Zed");
        }
        other => panic!("unexpected {other:?}"),
    }

    let renamed = |roster: &[Player]| {
        roster
            .iter()
            .any(|p| p.id == PeerId::from("g-1") && p.display_name == "Zed")
    };
    wait_for_roster(&moderator, renamed).await;
    wait_for_roster(&guests[0], renamed).await;
    wait_for_roster(&guests[1], renamed).await;
}

// =========================================================================
// Peer loss
// =========================================================================

#[tokio::test]
async fn test_guest_disconnect_removes_only_that_player() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2"]).await;
    let (_, mut events) = moderator.events().subscribe_stream();

    guests[0].disconnect().await;

    match next_event(&mut events, EventKind::PlayerDisconnected).await {
        SessionEvent::PlayerDisconnected {
            player_id,
            was_moderator,
        } => {
            assert_eq!(player_id, PeerId::from("g-1"));
            assert!(!was_moderator);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(roster_ids(&moderator).await, vec!["m-1", "g-2"]);
    assert_eq!(moderator.connection_count().await.unwrap(), 1);
    assert_eq!(moderator.state().await, SessionState::Active);

    wait_for_roster(&guests[1], |roster| ids(roster) == ["m-1", "g-2"]).await;
    assert_eq!(guests[1].state().await, SessionState::Active);
    assert_eq!(guests[0].state().await, SessionState::Closed);
}

#[tokio::test]
async fn test_guest_lost_mid_turn_passes_turn_on() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2"]).await;
    let (_, mut watcher) = guests[1].events().subscribe_stream();

    moderator.send_choice(EmotionCategory::Love, 0).await.unwrap();
    assert_eq!(moderator.current_turn().await.unwrap(), Some((1, PeerId::from("g-1"))));
    next_event(&mut watcher, EventKind::NextTurn).await;

    medium.sever(&PeerId::from("g-1"));

    match next_event(&mut watcher, EventKind::NextTurn).await {
        SessionEvent::NextTurn {
            current_player_index,
            current_player_id,
        } => {
            assert_eq!(current_player_index, 1);
            assert_eq!(current_player_id, PeerId::from("g-2"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_moderator_disconnect_closes_every_guest_once() {
    let medium = PairingMedium::new();
    let (moderator, _, guests) = party(&medium, &["g-1", "g-2"]).await;
    let streams: Vec<_> = guests
        .iter()
        .map(|guest| guest.events().subscribe_stream().1)
        .collect();

    moderator.disconnect().await;
    moderator.disconnect().await;
    assert_eq!(moderator.state().await, SessionState::Closed);

    for (guest, mut events) in guests.iter().zip(streams) {
        let mut moderator_lost = 0;
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = events.recv().await {
                if let SessionEvent::PlayerDisconnected {
                    player_id,
                    was_moderator: true,
                } = event
                {
                    assert_eq!(player_id, PeerId::from("m-1"));
                    moderator_lost += 1;
                }
            }
        })
        .await;
        assert!(drained.is_ok(), "guest event stream never ended");
        assert_eq!(moderator_lost, 1);
        assert_eq!(guest.state().await, SessionState::Closed);
    }
}

// =========================================================================
// Misbehaving peers
// =========================================================================

#[tokio::test]
async fn test_guest_violations_are_refused_without_closing() {
    let medium = PairingMedium::new();
    let (moderator, _) = host(&medium, "m-1").await;
    let (_, mut events) = moderator.events().subscribe_stream();

    let raw = PairingTransport::new(medium.clone()).with_identity("g-raw");
    raw.bind().await.unwrap();
    let conn = raw.open(&PeerId::from("m-1")).await.unwrap();

    // Anything before Join is refused.
    send_raw(
        &conn,
        Message::NameUpdate {
            player_id: PeerId::from("g-raw"),
            display_name: "Early".into(),
        },
    )
    .await;
    assert!(matches!(
        recv_raw(&conn).await,
        Message::Error {
            code: ErrorCode::ProtocolViolation,
            ..
        }
    ));

    send_raw(
        &conn,
        Message::Join {
            player_id: PeerId::from("g-raw"),
            display_name: "Raw".into(),
        },
    )
    .await;
    assert!(matches!(recv_raw(&conn).await, Message::Welcome { .. }));
    assert!(matches!(recv_raw(&conn).await, Message::RosterUpdate { players } if players.len() == 2));

    // Guests may not drive turns.
    send_raw(
        &conn,
        Message::NextTurn {
            current_player_index: 1,
            current_player_id: PeerId::from("g-raw"),
        },
    )
    .await;
    assert!(matches!(
        recv_raw(&conn).await,
        Message::Error {
            code: ErrorCode::ProtocolViolation,
            ..
        }
    ));
    match next_event(&mut events, EventKind::Error).await {
        SessionEvent::Error(notice) => assert_eq!(notice.code, ErrorCode::ProtocolViolation),
        other => panic!("unexpected {other:?}"),
    }

    conn.send(b"{definitely not an envelope").await.unwrap();
    assert!(matches!(
        recv_raw(&conn).await,
        Message::Error {
            code: ErrorCode::MalformedPayload,
            ..
        }
    ));

    let view = moderator.view().await.unwrap();
    assert_eq!(view.state, SessionState::Active);
    assert_eq!(ids(&view.roster), vec!["m-1", "g-raw"]);
    assert_eq!(view.current_turn, Some((0, PeerId::from("m-1"))));
}

#[tokio::test]
async fn test_choice_for_another_player_is_refused() {
    let medium = PairingMedium::new();
    let (moderator, _, _guests) = party(&medium, &["g-1"]).await;

    let raw = PairingTransport::new(medium.clone()).with_identity("g-raw");
    raw.bind().await.unwrap();
    let conn = raw.open(&PeerId::from("m-1")).await.unwrap();
    send_raw(
        &conn,
        Message::Join {
            player_id: PeerId::from("g-raw"),
            display_name: "Raw".into(),
        },
    )
    .await;
    recv_raw(&conn).await;
    recv_raw(&conn).await;

    // Spoofs the moderator, whose turn it is.
    send_raw(
        &conn,
        Message::Choice {
            player_id: PeerId::from("m-1"),
            category: EmotionCategory::Love,
            round: 0,
            timestamp: 0,
        },
    )
    .await;
    assert!(matches!(
        recv_raw(&conn).await,
        Message::Error {
            code: ErrorCode::ProtocolViolation,
            ..
        }
    ));
    assert_eq!(moderator.current_turn().await.unwrap(), Some((0, PeerId::from("m-1"))));
}

// =========================================================================
// Discovery
// =========================================================================

#[tokio::test]
async fn test_discover_rooms_lists_advertising_moderators() {
    let medium = PairingMedium::new();
    let (_moderator, code) = host(&medium, "m-disc").await;
    let guest = peer(&medium, "g-1").await;

    let mut scan = guest.discover_rooms();
    assert_eq!(scan.next().await, Some(code.clone()));
    assert_eq!(scan.next().await, None);

    guest.join_room(&code).await.unwrap();
    assert_eq!(guest.state().await, SessionState::Active);
}
