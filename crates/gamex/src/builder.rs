//! `PartyBuilder`: one-call setup for hosting or joining a party.

use std::sync::Arc;
use std::time::Duration;

use gamex_protocol::RoomCode;
use gamex_session::{Referee, SessionConfig, SessionHandle};
use gamex_transport::Transport;

use crate::{AuraReferee, GamexError};

/// Builder for a party session.
///
/// Defaults to the [`AuraReferee`] and [`SessionConfig::default`].
///
/// # Example
///
/// ```rust,no_run
/// # async fn example() -> Result<(), gamex::GamexError> {
/// use gamex::prelude::*;
///
/// let medium = PairingMedium::new();
/// let code = RoomCode::parse("m-123")?;
/// let session = PartyBuilder::new()
///     .display_name("Ana")
///     .join(PairingTransport::new(medium), &code)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct PartyBuilder {
    display_name: String,
    config: SessionConfig,
    referee: Arc<dyn Referee>,
}

impl PartyBuilder {
    pub fn new() -> Self {
        Self {
            display_name: "Player".to_string(),
            config: SessionConfig::default(),
            referee: Arc::new(AuraReferee),
        }
    }

    /// Sets the name shown to other players.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// How long a join may take, opening the channel included.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Caps the roster, moderator included.
    pub fn max_players(mut self, max: usize) -> Self {
        self.config.max_players = max;
        self
    }

    pub fn command_buffer(mut self, capacity: usize) -> Self {
        self.config.command_buffer = capacity;
        self
    }

    /// Replaces the game rules. Only the moderator's referee is consulted.
    pub fn referee(mut self, referee: impl Referee) -> Self {
        self.referee = Arc::new(referee);
        self
    }

    /// Spawns the session and initializes it, leaving it `Idle`.
    pub async fn start<T: Transport>(
        self,
        transport: T,
    ) -> Result<SessionHandle<T>, GamexError> {
        let session = SessionHandle::spawn(transport, self.config, self.referee);
        let local = session.initialize(self.display_name).await?;
        tracing::debug!(%local, "party session ready");
        Ok(session)
    }

    /// Starts a session and opens a room on it.
    pub async fn host<T: Transport>(
        self,
        transport: T,
    ) -> Result<(SessionHandle<T>, RoomCode), GamexError> {
        let session = self.start(transport).await?;
        let code = session.create_room().await?;
        Ok((session, code))
    }

    /// Starts a session and joins the room behind `code`.
    pub async fn join<T: Transport>(
        self,
        transport: T,
        code: &RoomCode,
    ) -> Result<SessionHandle<T>, GamexError> {
        let session = self.start(transport).await?;
        if let Err(e) = session.join_room(code).await {
            session.disconnect().await;
            return Err(e.into());
        }
        Ok(session)
    }
}

impl Default for PartyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
