//! `SessionHandle`: the outbound API of a session.

use std::sync::Arc;

use gamex_events::{ErrorNotice, EventDispatcher};
use gamex_protocol::{
    EmotionCategory, ErrorCode, GameMode, GameSnapshot, PeerId, Player,
    RoomCode,
};
use gamex_transport::{Discover, Discovery, Transport, TransportError};
use tokio::sync::{mpsc, oneshot};

use crate::coordinator::{Command, Coordinator, SessionView};
use crate::{Referee, SessionConfig, SessionError, SessionState};

/// Handle to a running session.
///
/// Cheap to clone; every clone talks to the same coordinator task. The
/// session closes when [`disconnect`](Self::disconnect) is called or the
/// last handle is dropped.
///
/// ## Example
///
/// ```rust,no_run
/// # async fn example(referee: std::sync::Arc<dyn gamex_session::Referee>) -> Result<(), gamex_session::SessionError> {
/// use gamex_session::{SessionConfig, SessionHandle};
/// use gamex_transport::{PairingMedium, PairingTransport};
///
/// let medium = PairingMedium::new();
/// let session = SessionHandle::spawn(
///     PairingTransport::new(medium),
///     SessionConfig::default(),
///     referee,
/// );
/// session.initialize("Mona").await?;
/// let code = session.create_room().await?;
/// println!("room code: {code}");
/// # Ok(())
/// # }
/// ```
pub struct SessionHandle<T: Transport> {
    transport: T,
    commands: mpsc::Sender<Command<T>>,
    events: EventDispatcher,
    config: SessionConfig,
}

impl<T: Transport> Clone for SessionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            commands: self.commands.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: Transport> SessionHandle<T> {
    /// Starts a session coordinator on `transport`.
    ///
    /// The session starts `Uninitialized`; call
    /// [`initialize`](Self::initialize) next. Must be called from inside a
    /// Tokio runtime.
    pub fn spawn(
        transport: T,
        config: SessionConfig,
        referee: Arc<dyn Referee>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(config.command_buffer.max(1));
        let events = EventDispatcher::new();
        let (coordinator, links_rx) = Coordinator::new(
            transport.clone(),
            config.clone(),
            referee,
            events.clone(),
        );
        tokio::spawn(coordinator.run(commands_rx, links_rx));

        Self {
            transport,
            commands,
            events,
            config,
        }
    }

    /// The session's event hub. Subscribe here before initializing to see
    /// every event.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Obtains a local address from the transport.
    ///
    /// # Errors
    /// [`SessionError::TransportInitFailed`] if the binding can't run here.
    /// The session is `Closed` afterwards.
    pub async fn initialize(
        &self,
        display_name: impl Into<String>,
    ) -> Result<PeerId, SessionError> {
        let display_name = display_name.into();
        self.request(|reply| Command::Initialize {
            display_name,
            reply,
        })
        .await?
    }

    /// Becomes the moderator and starts accepting guests.
    ///
    /// Returns the code guests use to join.
    pub async fn create_room(&self) -> Result<RoomCode, SessionError> {
        self.request(|reply| Command::CreateRoom { reply }).await?
    }

    /// Joins the room behind `code` as a guest.
    ///
    /// Resolves once the moderator has welcomed us and sent the roster. The
    /// handshake timeout covers opening the channel too.
    ///
    /// # Errors
    /// `RoomNotFound`, `PermissionDenied`, `HandshakeTimeout`,
    /// `HandshakeAborted` or `Rejected`. In every case the session is back
    /// to `Idle` and the join can be retried.
    pub async fn join_room(&self, code: &RoomCode) -> Result<(), SessionError> {
        let ticket = self
            .request(|reply| Command::BeginJoin {
                code: code.clone(),
                reply,
            })
            .await??;
        let guard = JoinGuard::new(self.commands.clone(), ticket.attempt);

        let opened = tokio::time::timeout_at(
            ticket.deadline,
            self.transport.open(&ticket.moderator),
        )
        .await;
        let conn = match opened {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(guard.fail(open_failure(code, e)).await),
            Err(_) => {
                let err = SessionError::HandshakeTimeout(self.config.handshake_timeout);
                return Err(guard.fail(err).await);
            }
        };

        let result = self
            .request(|reply| Command::CompleteJoin {
                attempt: ticket.attempt,
                conn,
                reply,
            })
            .await;
        guard.disarm();
        result?
    }

    /// Submits the local player's choice for `round`.
    ///
    /// On a guest this only sends; the moderator's verdict comes back as a
    /// `choiceReceived` or `error` event.
    ///
    /// # Errors
    /// On the moderator, [`SessionError::NotYourTurn`] when it isn't the
    /// moderator's turn.
    pub async fn send_choice(
        &self,
        category: EmotionCategory,
        round: u32,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::SendChoice {
            category,
            round,
            reply,
        })
        .await?
    }

    /// Announces the mode for the next game. Does nothing on a guest.
    pub async fn broadcast_mode_selection(
        &self,
        mode: GameMode,
        total_rounds: u32,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::SelectMode {
            mode,
            total_rounds,
            reply,
        })
        .await?
    }

    /// Starts a game with the selected mode and the current roster.
    ///
    /// Returns the initial snapshot, or `None` on a guest.
    ///
    /// # Errors
    /// [`SessionError::GameRejected`] if no mode was selected or the
    /// referee refuses the snapshot.
    pub async fn start_game(&self) -> Result<Option<GameSnapshot>, SessionError> {
        self.request(|reply| Command::StartGame { reply }).await?
    }

    /// Changes the local display name and tells everyone.
    pub async fn update_display_name(
        &self,
        display_name: impl Into<String>,
    ) -> Result<(), SessionError> {
        let display_name = display_name.into();
        self.request(|reply| Command::UpdateName {
            display_name,
            reply,
        })
        .await?
    }

    /// Returns a snapshot of the whole session.
    pub async fn view(&self) -> Result<SessionView, SessionError> {
        self.request(|reply| Command::View { reply }).await
    }

    /// Returns the lifecycle state. A stopped coordinator reads as `Closed`.
    pub async fn state(&self) -> SessionState {
        self.view()
            .await
            .map_or(SessionState::Closed, |view| view.state)
    }

    pub async fn roster(&self) -> Result<Vec<Player>, SessionError> {
        Ok(self.view().await?.roster)
    }

    pub async fn room_code(&self) -> Result<Option<RoomCode>, SessionError> {
        Ok(self.view().await?.room_code)
    }

    pub async fn local_id(&self) -> Result<Option<PeerId>, SessionError> {
        Ok(self.view().await?.local_id)
    }

    pub async fn current_turn(&self) -> Result<Option<(usize, PeerId)>, SessionError> {
        Ok(self.view().await?.current_turn)
    }

    pub async fn connection_count(&self) -> Result<usize, SessionError> {
        Ok(self.view().await?.connections)
    }

    /// Closes every connection and ends the session. Safe to call twice.
    pub async fn disconnect(&self) {
        if self
            .request(|reply| Command::Disconnect { reply })
            .await
            .is_err()
        {
            tracing::debug!("disconnect on an already closed session");
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command<T>,
    ) -> Result<R, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

impl<T: Discover> SessionHandle<T> {
    /// Lists rooms advertised nearby.
    ///
    /// Each call starts a fresh scan. Dropping the scan stops it.
    pub fn discover_rooms(&self) -> RoomScan<T::Discovery> {
        RoomScan {
            discovery: self.transport.discover(),
        }
    }
}

/// A finite scan for advertised rooms.
pub struct RoomScan<D> {
    discovery: D,
}

impl<D: Discovery> RoomScan<D> {
    /// Returns the next room found, or `None` when the scan is over.
    pub async fn next(&mut self) -> Option<RoomCode> {
        self.discovery
            .next()
            .await
            .map(|moderator| RoomCode::for_moderator(&moderator))
    }
}

fn open_failure(code: &RoomCode, err: TransportError) -> SessionError {
    match err {
        TransportError::Unreachable(_) => SessionError::RoomNotFound(code.clone()),
        TransportError::PermissionDenied(_) => {
            SessionError::PermissionDenied(code.clone())
        }
        other => SessionError::HandshakeAborted(format!(
            "could not open a channel: {other}"
        )),
    }
}

/// Abandons a join attempt if the join future is dropped midway.
struct JoinGuard<T: Transport> {
    commands: mpsc::Sender<Command<T>>,
    attempt: u64,
    armed: bool,
}

impl<T: Transport> JoinGuard<T> {
    fn new(commands: mpsc::Sender<Command<T>>, attempt: u64) -> Self {
        Self {
            commands,
            attempt,
            armed: true,
        }
    }

    /// Reports `err` to the coordinator and hands it back.
    async fn fail(mut self, err: SessionError) -> SessionError {
        self.armed = false;
        let abort = Command::AbortJoin {
            attempt: self.attempt,
            notice: Some(err.notice()),
        };
        if self.commands.send(abort).await.is_err() {
            tracing::debug!(attempt = self.attempt, "coordinator gone before abort");
        }
        err
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Transport> Drop for JoinGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let abort = Command::AbortJoin {
            attempt: self.attempt,
            notice: Some(ErrorNotice {
                code: ErrorCode::HandshakeAborted,
                message: "join attempt cancelled".into(),
            }),
        };
        let _ = self.commands.try_send(abort);
    }
}
