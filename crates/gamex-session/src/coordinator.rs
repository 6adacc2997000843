//! Session coordinator: an actor task that owns every piece of session state.
//!
//! The coordinator is the single writer for the roster, the connection
//! registry and the game log. It reacts to two inputs:
//!
//! ```text
//!   SessionHandle ──Command──┐
//!                            ├──► Coordinator ──► EventDispatcher ──► UI
//!   pumps/acceptor ─LinkEvent┘        │
//!                                     └──► Connection::send (guests / moderator)
//! ```
//!
//! Frames from one connection arrive in order, and the coordinator handles
//! one input at a time, so per-peer ordering holds all the way through.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gamex_events::{ErrorNotice, EventDispatcher, SessionEvent};
use gamex_protocol::{
    ChoiceRecord, Codec, EmotionCategory, Envelope, ErrorCode, GameMode,
    GameSnapshot, JsonCodec, Message, PeerId, Player, RoomCode,
};
use gamex_transport::{Connection, ConnectionId, Transport};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::link::{LinkEvent, spawn_acceptor, spawn_pump};
use crate::registry::{ConnectionRegistry, ConnectionState};
use crate::roster::Roster;
use crate::{Referee, SessionConfig, SessionError, SessionState};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests from a [`SessionHandle`](crate::SessionHandle).
pub(crate) enum Command<T: Transport> {
    Initialize {
        display_name: String,
        reply: Reply<PeerId>,
    },
    CreateRoom {
        reply: Reply<RoomCode>,
    },
    /// First half of a join: reserve the attempt and learn where to dial.
    BeginJoin {
        code: RoomCode,
        reply: Reply<JoinTicket>,
    },
    /// Second half: hand over the opened channel. `reply` resolves when the
    /// handshake finishes.
    CompleteJoin {
        attempt: u64,
        conn: T::Connection,
        reply: Reply<()>,
    },
    /// The handle gave up on an attempt before completing it.
    AbortJoin {
        attempt: u64,
        notice: Option<ErrorNotice>,
    },
    SendChoice {
        category: EmotionCategory,
        round: u32,
        reply: Reply<()>,
    },
    SelectMode {
        mode: GameMode,
        total_rounds: u32,
        reply: Reply<()>,
    },
    StartGame {
        reply: Reply<Option<GameSnapshot>>,
    },
    UpdateName {
        display_name: String,
        reply: Reply<()>,
    },
    View {
        reply: oneshot::Sender<SessionView>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// What a join attempt needs to open its channel.
#[derive(Debug, Clone)]
pub(crate) struct JoinTicket {
    pub attempt: u64,
    pub moderator: PeerId,
    pub deadline: Instant,
}

/// A point-in-time copy of the session, for queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub local_id: Option<PeerId>,
    pub display_name: String,
    pub is_moderator: bool,
    pub room_code: Option<RoomCode>,
    pub roster: Vec<Player>,
    /// Turn index and whose turn it is.
    pub current_turn: Option<(usize, PeerId)>,
    /// Open connections: one per guest on the moderator, one on a guest.
    pub connections: usize,
    pub mode: Option<(GameMode, u32)>,
    pub game_in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unassigned,
    Moderator,
    Guest,
}

struct PendingJoin {
    attempt: u64,
    moderator: PeerId,
    code: RoomCode,
    deadline: Instant,
    reply: Option<Reply<()>>,
    /// `Welcome` arrived; waiting for the first `RosterUpdate`.
    welcomed: bool,
}

pub(crate) struct Coordinator<T: Transport> {
    transport: T,
    config: SessionConfig,
    referee: Arc<dyn Referee>,
    events: EventDispatcher,
    codec: JsonCodec,

    state: SessionState,
    role: Role,
    local: Option<PeerId>,
    display_name: String,
    roster: Roster,
    registry: ConnectionRegistry<T::Connection>,
    acceptor: Option<JoinHandle<()>>,
    link_tx: mpsc::UnboundedSender<LinkEvent<T::Connection>>,

    pending: Option<PendingJoin>,
    next_attempt: u64,
    room: Option<RoomCode>,
    mode: Option<(GameMode, u32)>,
    game: Option<GameSnapshot>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(
        transport: T,
        config: SessionConfig,
        referee: Arc<dyn Referee>,
        events: EventDispatcher,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent<T::Connection>>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            transport,
            config,
            referee,
            events,
            codec: JsonCodec,
            state: SessionState::Uninitialized,
            role: Role::Unassigned,
            local: None,
            display_name: String::new(),
            roster: Roster::default(),
            registry: ConnectionRegistry::new(),
            acceptor: None,
            link_tx,
            pending: None,
            next_attempt: 1,
            room: None,
            mode: None,
            game: None,
        };
        (coordinator, link_rx)
    }

    /// Runs until the session closes or every handle is dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command<T>>,
        mut links: mpsc::UnboundedReceiver<LinkEvent<T::Connection>>,
    ) {
        tracing::debug!("session coordinator started");

        while self.state != SessionState::Closed {
            let deadline = self
                .pending
                .as_ref()
                .map(|p| p.deadline)
                .into_iter()
                .chain(self.registry.next_deadline())
                .min();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!("all session handles dropped");
                        self.close_session().await;
                    }
                },
                Some(event) = links.recv() => self.handle_link(event).await,
                () = sleep_until(deadline) => self.on_deadline().await,
            }
        }

        tracing::debug!("session coordinator stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command<T>) {
        match command {
            Command::Initialize {
                display_name,
                reply,
            } => {
                let result = self.initialize(display_name).await;
                let _ = reply.send(result);
            }
            Command::CreateRoom { reply } => {
                let result = self.create_room().await;
                let _ = reply.send(result);
            }
            Command::BeginJoin { code, reply } => {
                let _ = reply.send(self.begin_join(code));
            }
            Command::CompleteJoin {
                attempt,
                conn,
                reply,
            } => self.complete_join(attempt, conn, reply).await,
            Command::AbortJoin { attempt, notice } => {
                self.abort_join(attempt, notice).await;
            }
            Command::SendChoice {
                category,
                round,
                reply,
            } => {
                let result = self.send_choice(category, round).await;
                let _ = reply.send(result);
            }
            Command::SelectMode {
                mode,
                total_rounds,
                reply,
            } => {
                let result = self.select_mode(mode, total_rounds).await;
                let _ = reply.send(result);
            }
            Command::StartGame { reply } => {
                let result = self.start_game().await;
                let _ = reply.send(result);
            }
            Command::UpdateName {
                display_name,
                reply,
            } => {
                let result = self.update_name(display_name).await;
                let _ = reply.send(result);
            }
            Command::View { reply } => {
                let _ = reply.send(self.view());
            }
            Command::Disconnect { reply } => {
                self.close_session().await;
                let _ = reply.send(());
            }
        }
    }

    async fn initialize(
        &mut self,
        display_name: String,
    ) -> Result<PeerId, SessionError> {
        self.require(SessionState::Uninitialized, "initialize")?;

        match self.transport.bind().await {
            Ok(id) => {
                self.roster.push(Player {
                    id: id.clone(),
                    display_name: display_name.clone(),
                    is_local: true,
                    is_moderator: false,
                });
                self.local = Some(id.clone());
                self.display_name = display_name;
                self.transition(SessionState::Idle);
                tracing::info!(%id, name = %self.display_name, "session initialized");
                Ok(id)
            }
            Err(e) => {
                let err = SessionError::TransportInitFailed(e);
                tracing::error!(error = %err, "transport initialization failed");
                self.events.publish(&SessionEvent::Error(err.notice()));
                self.close_session().await;
                Err(err)
            }
        }
    }

    async fn create_room(&mut self) -> Result<RoomCode, SessionError> {
        self.require(SessionState::Idle, "create a room")?;
        let local = self.local_id()?;

        let listener = self.transport.listen().await?;
        self.acceptor = Some(spawn_acceptor(listener, self.link_tx.clone()));

        let code = RoomCode::for_moderator(&local);
        self.role = Role::Moderator;
        self.roster.set_local_moderator();
        self.room = Some(code.clone());
        self.transition(SessionState::Hosting);
        self.transition(SessionState::Active);

        tracing::info!(room = %code, "hosting room");
        Ok(code)
    }

    fn begin_join(&mut self, code: RoomCode) -> Result<JoinTicket, SessionError> {
        self.require(SessionState::Idle, "join a room")?;

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let moderator = code.extract_address();
        let deadline = Instant::now() + self.config.handshake_timeout;

        self.pending = Some(PendingJoin {
            attempt,
            moderator: moderator.clone(),
            code: code.clone(),
            deadline,
            reply: None,
            welcomed: false,
        });
        self.role = Role::Guest;
        self.transition(SessionState::Joining);

        tracing::info!(room = %code, attempt, "joining room");
        Ok(JoinTicket {
            attempt,
            moderator,
            deadline,
        })
    }

    async fn complete_join(
        &mut self,
        attempt: u64,
        conn: T::Connection,
        reply: Reply<()>,
    ) {
        let current = self
            .pending
            .as_mut()
            .filter(|p| p.attempt == attempt && self.state == SessionState::Joining);
        let Some(pending) = current else {
            tracing::debug!(attempt, "channel opened for a finished join attempt");
            let _ = conn.close().await;
            let _ = reply.send(Err(SessionError::HandshakeAborted(
                "join attempt is no longer active".into(),
            )));
            return;
        };
        pending.reply = Some(reply);
        let moderator = pending.moderator.clone();

        let player_id = match self.local_id() {
            Ok(id) => id,
            Err(err) => {
                self.fail_join(err).await;
                let _ = conn.close().await;
                return;
            }
        };

        let conn = Arc::new(conn);
        let pump = spawn_pump(Arc::clone(&conn), self.link_tx.clone());
        if let Some(old) = self.registry.register(conn, pump, None) {
            old.shutdown().await;
        }

        let join = Message::Join {
            player_id,
            display_name: self.display_name.clone(),
        };
        if let Err(e) = self.send_to(&moderator, join).await {
            self.fail_join(SessionError::HandshakeAborted(format!(
                "could not send join: {e}"
            )))
            .await;
        }
    }

    async fn abort_join(&mut self, attempt: u64, notice: Option<ErrorNotice>) {
        let is_current = self.state == SessionState::Joining
            && self.pending.as_ref().is_some_and(|p| p.attempt == attempt);
        if !is_current {
            return;
        }
        if let Some(notice) = notice {
            tracing::info!(attempt, %notice, "join attempt abandoned");
            self.events.publish(&SessionEvent::Error(notice));
        }
        self.reset_join(SessionError::HandshakeAborted(
            "join attempt cancelled".into(),
        ))
        .await;
    }

    async fn send_choice(
        &mut self,
        category: EmotionCategory,
        round: u32,
    ) -> Result<(), SessionError> {
        self.require(SessionState::Active, "send a choice")?;
        let local = self.local_id()?;
        let record = ChoiceRecord {
            player_id: local.clone(),
            category,
            round,
            timestamp: now_millis(),
        };

        match self.role {
            Role::Moderator => {
                self.roster.validate_turn(&local)?;
                self.apply_choice(record).await;
                Ok(())
            }
            _ => {
                let moderator = self.moderator_id()?;
                let message = Message::Choice {
                    player_id: record.player_id,
                    category: record.category,
                    round: record.round,
                    timestamp: record.timestamp,
                };
                self.send_to(&moderator, message).await
            }
        }
    }

    async fn select_mode(
        &mut self,
        mode: GameMode,
        total_rounds: u32,
    ) -> Result<(), SessionError> {
        if self.role != Role::Moderator {
            tracing::debug!(%mode, "mode selection ignored on a guest");
            return Ok(());
        }
        self.require(SessionState::Active, "select a mode")?;

        self.mode = Some((mode, total_rounds));
        self.broadcast(Message::ModeSelected { mode, total_rounds }, None)
            .await;
        self.events
            .publish(&SessionEvent::ModeChanged { mode, total_rounds });
        tracing::info!(%mode, total_rounds, "mode selected");
        Ok(())
    }

    async fn start_game(&mut self) -> Result<Option<GameSnapshot>, SessionError> {
        if self.role != Role::Moderator {
            tracing::debug!("start_game ignored on a guest");
            return Ok(None);
        }
        self.require(SessionState::Active, "start a game")?;
        let (mode, total_rounds) = self
            .mode
            .ok_or_else(|| SessionError::GameRejected("no game mode selected".into()))?;

        let snapshot = GameSnapshot {
            mode,
            total_rounds,
            players: self.roster.infos(),
            current_player_index: 0,
            choices: Vec::new(),
        };
        self.referee
            .validate_start(&snapshot)
            .map_err(SessionError::GameRejected)?;

        self.roster.reset_turns();
        self.game = Some(snapshot.clone());
        self.broadcast(
            Message::GameStart {
                snapshot: snapshot.clone(),
            },
            None,
        )
        .await;
        self.events
            .publish(&SessionEvent::GameStarted(snapshot.clone()));

        tracing::info!(%mode, total_rounds, players = snapshot.players.len(), "game started");
        Ok(Some(snapshot))
    }

    async fn update_name(&mut self, display_name: String) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        self.display_name = display_name.clone();
        let Some(local) = self.local.clone() else {
            return Ok(());
        };
        self.roster.rename(&local, &display_name);

        if self.state != SessionState::Active {
            return Ok(());
        }
        match self.role {
            Role::Moderator => {
                self.sync_game_players();
                let update = Message::NameUpdate {
                    player_id: local.clone(),
                    display_name: display_name.clone(),
                };
                self.broadcast(update, None).await;
                self.broadcast_roster().await;
                self.events.publish(&SessionEvent::NameUpdated {
                    player_id: local,
                    display_name,
                });
                self.events
                    .publish(&SessionEvent::RosterUpdated(self.roster.snapshot()));
                Ok(())
            }
            _ => {
                let moderator = self.moderator_id()?;
                let update = Message::NameUpdate {
                    player_id: local,
                    display_name,
                };
                self.send_to(&moderator, update).await
            }
        }
    }

    fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            local_id: self.local.clone(),
            display_name: self.display_name.clone(),
            is_moderator: self.role == Role::Moderator,
            room_code: self.room.clone(),
            roster: self.roster.snapshot(),
            current_turn: self.roster.current(),
            connections: self.registry.open_peers().len(),
            mode: self.mode,
            game_in_progress: self.game.is_some(),
        }
    }

    // -----------------------------------------------------------------------
    // Link events
    // -----------------------------------------------------------------------

    async fn handle_link(&mut self, event: LinkEvent<T::Connection>) {
        match event {
            LinkEvent::Accepted(conn) => self.on_accepted(conn).await,
            LinkEvent::Frame { peer, conn, bytes } => {
                self.on_frame(peer, conn, bytes).await;
            }
            LinkEvent::Closed { peer, conn } => self.on_closed(peer, conn).await,
        }
    }

    async fn on_accepted(&mut self, conn: T::Connection) {
        if self.role != Role::Moderator || self.state != SessionState::Active {
            tracing::debug!(peer = %conn.peer(), "channel refused; not hosting");
            let _ = conn.close().await;
            return;
        }
        if self.registry.state(conn.peer()) == Some(ConnectionState::Open) {
            tracing::warn!(peer = %conn.peer(), "channel refused; peer already connected");
            let _ = conn.close().await;
            return;
        }
        let conn = Arc::new(conn);
        let pump = spawn_pump(Arc::clone(&conn), self.link_tx.clone());
        let deadline = Instant::now() + self.config.handshake_timeout;
        if let Some(old) = self.registry.register(conn, pump, Some(deadline)) {
            tracing::info!(peer = %old.conn.peer(), "peer reconnected; dropping old channel");
            old.shutdown().await;
        }
    }

    async fn on_frame(&mut self, peer: PeerId, conn: ConnectionId, bytes: Vec<u8>) {
        if !self.registry.is_current(&peer, conn) {
            tracing::debug!(%peer, %conn, "frame from a replaced channel dropped");
            return;
        }

        let message = match self.codec.decode_envelope(&bytes) {
            Ok(envelope) => envelope.into_message(),
            Err(e) => {
                let err = SessionError::Protocol(e);
                match self.role {
                    Role::Moderator => self.reject(&peer, err).await,
                    _ => self.report(err),
                }
                return;
            }
        };
        tracing::debug!(%peer, kind = %message.kind(), "frame received");

        match self.role {
            Role::Moderator => self.on_guest_message(peer, message).await,
            Role::Guest => self.on_moderator_message(message).await,
            Role::Unassigned => {
                tracing::debug!(%peer, "frame dropped; no role");
            }
        }
    }

    async fn on_closed(&mut self, peer: PeerId, conn: ConnectionId) {
        let Some(entry) = self.registry.remove(&peer, Some(conn)) else {
            return;
        };
        entry.shutdown().await;

        match self.role {
            Role::Moderator => self.on_guest_lost(peer).await,
            Role::Guest => self.on_moderator_lost(peer).await,
            Role::Unassigned => {}
        }
    }

    // -----------------------------------------------------------------------
    // Moderator side
    // -----------------------------------------------------------------------

    async fn on_guest_message(&mut self, peer: PeerId, message: Message) {
        let kind = message.kind();
        if kind.is_moderator_only() {
            let err = SessionError::ProtocolViolation(format!(
                "{kind} may only come from the moderator"
            ));
            self.reject(&peer, err).await;
            return;
        }
        let joined = self.registry.state(&peer) == Some(ConnectionState::Open);

        match message {
            Message::Join {
                player_id,
                display_name,
            } => self.on_join(peer, player_id, display_name).await,
            _ if !joined => {
                let err = SessionError::ProtocolViolation(format!("{kind} before Join"));
                self.reject(&peer, err).await;
            }
            Message::Choice {
                player_id,
                category,
                round,
                timestamp,
            } => {
                if player_id != peer {
                    let err = SessionError::ProtocolViolation(format!(
                        "choice sent on behalf of {player_id}"
                    ));
                    self.reject(&peer, err).await;
                    return;
                }
                if let Err(err) = self.roster.validate_turn(&peer) {
                    self.reject(&peer, err).await;
                    return;
                }
                let record = ChoiceRecord {
                    player_id,
                    category,
                    round,
                    timestamp,
                };
                self.apply_choice(record).await;
            }
            Message::NameUpdate {
                player_id,
                display_name,
            } => {
                if player_id != peer {
                    let err = SessionError::ProtocolViolation(format!(
                        "rename sent on behalf of {player_id}"
                    ));
                    self.reject(&peer, err).await;
                    return;
                }
                self.on_rename(peer, display_name).await;
            }
            other => {
                tracing::debug!(%peer, kind = %other.kind(), "message ignored");
            }
        }
    }

    async fn on_join(&mut self, peer: PeerId, player_id: PeerId, display_name: String) {
        let Some(local) = self.local.clone() else {
            return;
        };
        if player_id != peer {
            let err = SessionError::ProtocolViolation(format!(
                "join for {player_id} sent from {peer}"
            ));
            self.reject(&peer, err).await;
            return;
        }

        let is_new = !self.roster.contains(&peer);
        if is_new && self.roster.len() >= self.config.max_players {
            tracing::warn!(%peer, max = self.config.max_players, "room full; join refused");
            let refusal = Message::Error {
                code: ErrorCode::RoomFull,
                message: format!("room is full ({} players)", self.config.max_players),
            };
            if let Err(e) = self.send_to(&peer, refusal).await {
                tracing::debug!(%peer, error = %e, "room-full notice not delivered");
            }
            if let Some(entry) = self.registry.remove(&peer, None) {
                entry.shutdown().await;
            }
            return;
        }

        self.roster.upsert_guest(&peer, &display_name);
        self.registry.mark_open(&peer);
        self.sync_game_players();

        let welcome = Message::Welcome {
            moderator_id: local,
            moderator_name: self.display_name.clone(),
        };
        if let Err(e) = self.send_to(&peer, welcome).await {
            tracing::debug!(%peer, error = %e, "welcome not delivered");
        }
        self.broadcast_roster().await;

        if is_new {
            let player = self
                .roster
                .snapshot()
                .into_iter()
                .find(|p| p.id == peer);
            if let Some(player) = player {
                self.events.publish(&SessionEvent::PlayerConnected(player));
            }
        }
        self.events
            .publish(&SessionEvent::RosterUpdated(self.roster.snapshot()));

        tracing::info!(%peer, name = %display_name, players = self.roster.len(), "player joined");
    }

    async fn on_rename(&mut self, peer: PeerId, display_name: String) {
        if !self.roster.rename(&peer, &display_name) {
            return;
        }
        self.sync_game_players();

        let relay = Message::NameUpdate {
            player_id: peer.clone(),
            display_name: display_name.clone(),
        };
        self.broadcast(relay, Some(&peer)).await;
        self.broadcast_roster().await;

        self.events.publish(&SessionEvent::NameUpdated {
            player_id: peer,
            display_name,
        });
        self.events
            .publish(&SessionEvent::RosterUpdated(self.roster.snapshot()));
    }

    /// Records an accepted choice, relays it and moves the turn on.
    async fn apply_choice(&mut self, record: ChoiceRecord) {
        let next = self.roster.advance();

        let relay = Message::Choice {
            player_id: record.player_id.clone(),
            category: record.category,
            round: record.round,
            timestamp: record.timestamp,
        };
        self.broadcast(relay, None).await;
        self.events
            .publish(&SessionEvent::ChoiceReceived(record.clone()));

        tracing::debug!(player = %record.player_id, category = %record.category, "choice accepted");

        if let Some(game) = self.game.as_mut() {
            game.choices.push(record);
        }
        if let Some((index, player_id)) = next {
            self.announce_turn(index, player_id).await;
        }

        let finished = self
            .game
            .take_if(|game| self.referee.is_finished(game));
        if let Some(game) = finished {
            let summary = self.referee.summarize(&game);
            tracing::info!(verdict = ?summary.verdict, choices = game.choices.len(), "game over");
            self.broadcast(
                Message::GameOver {
                    summary: summary.clone(),
                },
                None,
            )
            .await;
            self.events.publish(&SessionEvent::GameOver(summary));
        }
    }

    async fn announce_turn(&mut self, index: usize, player_id: PeerId) {
        if let Some(game) = self.game.as_mut() {
            game.current_player_index = index;
        }
        let turn = Message::NextTurn {
            current_player_index: index,
            current_player_id: player_id.clone(),
        };
        self.broadcast(turn, None).await;
        self.events.publish(&SessionEvent::NextTurn {
            current_player_index: index,
            current_player_id: player_id,
        });
    }

    async fn on_guest_lost(&mut self, peer: PeerId) {
        let Some(removed) = self.roster.remove(&peer) else {
            tracing::debug!(%peer, "channel closed before join");
            return;
        };
        tracing::info!(%peer, players = self.roster.len(), "player left");

        self.sync_game_players();
        self.broadcast_roster().await;
        self.events.publish(&SessionEvent::PlayerDisconnected {
            player_id: removed.player.id,
            was_moderator: false,
        });
        self.events
            .publish(&SessionEvent::RosterUpdated(self.roster.snapshot()));

        if !removed.turn_changed {
            return;
        }
        if let Some((index, player_id)) = self.roster.current() {
            self.announce_turn(index, player_id).await;
        }
    }

    /// Sends `Error` back to a guest and reports it locally.
    async fn reject(&mut self, peer: &PeerId, err: SessionError) {
        tracing::warn!(%peer, error = %err, "message rejected");
        let notice = err.notice();
        self.events.publish(&SessionEvent::Error(notice.clone()));

        let reply = Message::Error {
            code: notice.code,
            message: notice.message,
        };
        if let Err(e) = self.send_to(peer, reply).await {
            tracing::debug!(%peer, error = %e, "rejection not delivered");
        }
    }

    async fn broadcast_roster(&mut self) {
        let players = self.roster.infos();
        self.broadcast(Message::RosterUpdate { players }, None).await;
    }

    fn sync_game_players(&mut self) {
        let players = self.roster.infos();
        let index = self.roster.current().map_or(0, |(index, _)| index);
        if let Some(game) = self.game.as_mut() {
            game.players = players;
            game.current_player_index = index;
        }
    }

    // -----------------------------------------------------------------------
    // Guest side
    // -----------------------------------------------------------------------

    async fn on_moderator_message(&mut self, message: Message) {
        match message {
            Message::Welcome {
                moderator_id,
                moderator_name,
            } => self.on_welcome(moderator_id, moderator_name),
            Message::Error { code, message } if self.state == SessionState::Joining => {
                self.fail_join(SessionError::Rejected { code, message }).await;
            }
            other if self.state != SessionState::Active => {
                let err = SessionError::ProtocolViolation(format!(
                    "{} before Welcome",
                    other.kind()
                ));
                self.report(err);
            }
            Message::RosterUpdate { players } => {
                let Some(local) = self.local.clone() else {
                    return;
                };
                if let Err(err) = self.roster.replace(players, &local) {
                    self.report(err);
                    if self.pending.is_some() {
                        self.reset_join(SessionError::HandshakeAborted(
                            "moderator sent an unusable roster".into(),
                        ))
                        .await;
                    }
                    return;
                }
                self.events
                    .publish(&SessionEvent::RosterUpdated(self.roster.snapshot()));

                if let Some(pending) = self.pending.take_if(|p| p.welcomed) {
                    tracing::info!(room = %pending.code, players = self.roster.len(), "joined room");
                    if let Some(reply) = pending.reply {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Message::ModeSelected { mode, total_rounds } => {
                self.mode = Some((mode, total_rounds));
                self.events
                    .publish(&SessionEvent::ModeChanged { mode, total_rounds });
            }
            Message::GameStart { snapshot } => {
                self.roster.set_current(snapshot.current_player_index);
                self.game = Some(snapshot.clone());
                self.events.publish(&SessionEvent::GameStarted(snapshot));
            }
            Message::Choice {
                player_id,
                category,
                round,
                timestamp,
            } => {
                let record = ChoiceRecord {
                    player_id,
                    category,
                    round,
                    timestamp,
                };
                if let Some(game) = self.game.as_mut() {
                    game.choices.push(record.clone());
                }
                self.events.publish(&SessionEvent::ChoiceReceived(record));
            }
            Message::NextTurn {
                current_player_index,
                current_player_id,
            } => {
                self.roster.set_current(current_player_index);
                if let Some(game) = self.game.as_mut() {
                    game.current_player_index = current_player_index;
                }
                self.events.publish(&SessionEvent::NextTurn {
                    current_player_index,
                    current_player_id,
                });
            }
            Message::GameOver { summary } => {
                self.game = None;
                self.events.publish(&SessionEvent::GameOver(summary));
            }
            Message::NameUpdate {
                player_id,
                display_name,
            } => {
                self.events.publish(&SessionEvent::NameUpdated {
                    player_id,
                    display_name,
                });
            }
            Message::Error { code, message } => {
                tracing::info!(%code, %message, "moderator refused a message");
                self.events.publish(&SessionEvent::error(code, message));
            }
            other => {
                let err = SessionError::ProtocolViolation(format!(
                    "{} sent to a guest",
                    other.kind()
                ));
                self.report(err);
            }
        }
    }

    fn on_welcome(&mut self, moderator_id: PeerId, moderator_name: String) {
        let Some(local) = self.local.clone() else {
            return;
        };
        let Some(pending) = self.pending.as_mut() else {
            tracing::debug!("welcome outside a join ignored");
            return;
        };
        if pending.welcomed {
            return;
        }
        pending.welcomed = true;
        let moderator = pending.moderator.clone();
        let code = pending.code.clone();

        self.registry.mark_open(&moderator);
        self.roster.reset_to_local();
        let mut provisional = vec![Player {
            id: moderator_id,
            display_name: moderator_name,
            is_local: false,
            is_moderator: true,
        }];
        provisional.extend(self.roster.snapshot());
        let infos = provisional.iter().map(Player::info).collect();
        if let Err(err) = self.roster.replace(infos, &local) {
            tracing::warn!(error = %err, "welcome carried an unusable roster");
        }

        self.room = Some(code);
        self.transition(SessionState::Active);
        tracing::info!(%moderator, "welcomed by moderator");
    }

    async fn on_moderator_lost(&mut self, peer: PeerId) {
        if self.state == SessionState::Joining {
            self.fail_join(SessionError::HandshakeAborted(
                "moderator closed the channel before welcome".into(),
            ))
            .await;
            return;
        }

        tracing::info!(moderator = %peer, "moderator left; closing session");
        self.events.publish(&SessionEvent::PlayerDisconnected {
            player_id: peer,
            was_moderator: true,
        });
        self.close_session().await;
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        if self.pending.as_ref().is_some_and(|p| p.deadline <= now) {
            self.handshake_expired().await;
        }
        for entry in self.registry.expire(now) {
            tracing::info!(peer = %entry.conn.peer(), "no Join in time; channel dropped");
            entry.shutdown().await;
        }
    }

    async fn handshake_expired(&mut self) {
        let welcomed = match self.pending.as_ref() {
            Some(pending) => pending.welcomed,
            None => return,
        };
        if welcomed {
            // Welcome arrived but no roster yet; the provisional one stands.
            if let Some(reply) = self.pending.take().and_then(|p| p.reply) {
                let _ = reply.send(Ok(()));
            }
            return;
        }
        self.fail_join(SessionError::HandshakeTimeout(self.config.handshake_timeout))
            .await;
    }

    /// Fails the pending join attempt, reporting `err`.
    async fn fail_join(&mut self, err: SessionError) {
        if self.pending.is_none() {
            return;
        }
        tracing::warn!(error = %err, "join attempt failed");
        self.events.publish(&SessionEvent::Error(err.notice()));
        self.reset_join(err).await;
    }

    /// Tears down the pending attempt and returns to `Idle`.
    async fn reset_join(&mut self, err: SessionError) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let Some(entry) = self.registry.remove(&pending.moderator, None) {
            entry.shutdown().await;
        }
        self.role = Role::Unassigned;
        self.room = None;
        self.mode = None;
        self.game = None;
        self.roster.reset_to_local();
        if pending.welcomed {
            // Welcome already made us Active; the attempt still failed.
            self.state = SessionState::Joining;
        }
        self.transition(SessionState::Idle);

        if let Some(reply) = pending.reply {
            let _ = reply.send(Err(err));
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn close_session(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        tracing::info!(state = %self.state, connections = self.registry.len(), "closing session");

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        for entry in self.registry.drain() {
            entry.shutdown().await;
        }
        if let Some(reply) = self.pending.take().and_then(|p| p.reply) {
            let _ = reply.send(Err(SessionError::Closed));
        }
        self.game = None;
        self.transition(SessionState::Closed);
        self.events.reset();
    }

    async fn send_to(&self, peer: &PeerId, message: Message) -> Result<(), SessionError> {
        let conn = self
            .registry
            .get(peer)
            .cloned()
            .ok_or(gamex_transport::TransportError::ChannelClosed)?;
        let bytes = self.codec.encode_envelope(&Envelope::new(message))?;
        conn.send(&bytes).await?;
        Ok(())
    }

    /// Sends to every open connection except `except`. Failures are logged;
    /// a dead channel shows up as a close event shortly after.
    async fn broadcast(&self, message: Message, except: Option<&PeerId>) {
        let kind = message.kind();
        let bytes = match self.codec.encode_envelope(&Envelope::new(message)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "broadcast not encoded");
                return;
            }
        };
        for conn in self.registry.open(except) {
            if let Err(e) = conn.send(&bytes).await {
                tracing::debug!(peer = %conn.peer(), %kind, error = %e, "send failed");
            }
        }
    }

    /// Publishes a per-message failure.
    fn report(&self, err: SessionError) {
        tracing::warn!(error = %err, "message dropped");
        self.events.publish(&SessionEvent::Error(err.notice()));
    }

    fn require(&self, expected: SessionState, op: &'static str) -> Result<(), SessionError> {
        match self.state {
            state if state == expected => Ok(()),
            SessionState::Closed => Err(SessionError::Closed),
            state => Err(SessionError::InvalidState { op, state }),
        }
    }

    fn transition(&mut self, target: SessionState) {
        if !self.state.can_transition_to(target) {
            tracing::warn!(from = %self.state, to = %target, "unexpected state transition");
        }
        tracing::debug!(from = %self.state, to = %target, "session state");
        self.state = target;
    }

    fn local_id(&self) -> Result<PeerId, SessionError> {
        self.local.clone().ok_or(SessionError::InvalidState {
            op: "use the session",
            state: self.state,
        })
    }

    fn moderator_id(&self) -> Result<PeerId, SessionError> {
        self.roster
            .snapshot()
            .into_iter()
            .find(|p| p.is_moderator)
            .map(|p| p.id)
            .ok_or(SessionError::Transport(
                gamex_transport::TransportError::ChannelClosed,
            ))
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
