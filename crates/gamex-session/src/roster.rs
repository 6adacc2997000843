//! The ordered player list and the turn pointer into it.

use gamex_protocol::{PeerId, Player, PlayerInfo};

use crate::SessionError;

/// A player that left, and whether their leaving moved the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Removed {
    pub player: Player,
    pub turn_changed: bool,
}

/// Ordered list of players plus the index of whose turn it is.
///
/// Order is join order, moderator first. At most one entry is the
/// moderator and at most one is local. The turn index always points at a
/// player while the roster is non-empty.
#[derive(Debug, Clone, Default)]
pub(crate) struct Roster {
    players: Vec<Player>,
    current: usize,
}

impl Roster {
    /// Appends a player. A second moderator is demoted to a guest.
    pub fn push(&mut self, mut player: Player) {
        if player.is_moderator && self.players.iter().any(|p| p.is_moderator) {
            tracing::warn!(id = %player.id, "second moderator demoted");
            player.is_moderator = false;
        }
        self.players.push(player);
    }

    /// Adds a guest, or renames them if they're already here.
    ///
    /// Returns `true` if the guest is new.
    pub fn upsert_guest(&mut self, id: &PeerId, display_name: &str) -> bool {
        if let Some(existing) = self.players.iter_mut().find(|p| &p.id == id) {
            existing.display_name = display_name.to_owned();
            return false;
        }
        self.players.push(Player {
            id: id.clone(),
            display_name: display_name.to_owned(),
            is_local: false,
            is_moderator: false,
        });
        true
    }

    /// Removes a player, keeping the turn on the same person when possible.
    ///
    /// If the removed player held the turn, it passes to whoever now sits
    /// at that index (wrapping to the front).
    pub fn remove(&mut self, id: &PeerId) -> Option<Removed> {
        let index = self.players.iter().position(|p| &p.id == id)?;
        let player = self.players.remove(index);

        let turn_changed = index == self.current;
        if index < self.current {
            self.current -= 1;
        } else if self.current >= self.players.len() {
            self.current = 0;
        }

        Some(Removed {
            player,
            turn_changed,
        })
    }

    /// Sets a player's display name. Returns `false` if they aren't here.
    pub fn rename(&mut self, id: &PeerId, display_name: &str) -> bool {
        match self.players.iter_mut().find(|p| &p.id == id) {
            Some(player) => {
                player.display_name = display_name.to_owned();
                true
            }
            None => false,
        }
    }

    /// Replaces the whole roster with one received from the moderator.
    ///
    /// # Errors
    /// [`SessionError::InvalidRoster`] if the list names more than one
    /// moderator, repeats an id, or leaves out the local player. The
    /// current roster is left untouched.
    pub fn replace(
        &mut self,
        infos: Vec<PlayerInfo>,
        local: &PeerId,
    ) -> Result<(), SessionError> {
        if !infos.iter().any(|p| &p.id == local) {
            return Err(SessionError::InvalidRoster(format!(
                "local player {local} missing"
            )));
        }
        if infos.iter().filter(|p| p.is_moderator).count() > 1 {
            return Err(SessionError::InvalidRoster(
                "more than one moderator".into(),
            ));
        }
        for (i, info) in infos.iter().enumerate() {
            if infos[..i].iter().any(|p| p.id == info.id) {
                return Err(SessionError::InvalidRoster(format!(
                    "player {} listed twice",
                    info.id
                )));
            }
        }

        self.players = infos
            .into_iter()
            .map(|info| Player::from_info(info, local))
            .collect();
        if self.current >= self.players.len() {
            self.current = 0;
        }
        Ok(())
    }

    /// Returns the wire form of the roster.
    pub fn infos(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }

    /// Returns an owned copy of the roster.
    pub fn snapshot(&self) -> Vec<Player> {
        self.players.clone()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.players.iter().any(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Returns the turn index and whose turn it is.
    pub fn current(&self) -> Option<(usize, PeerId)> {
        self.players
            .get(self.current)
            .map(|p| (self.current, p.id.clone()))
    }

    /// Moves the turn pointer, as told by the moderator. Out-of-range
    /// indices are ignored.
    pub fn set_current(&mut self, index: usize) -> bool {
        if index < self.players.len() {
            self.current = index;
            true
        } else {
            false
        }
    }

    /// Checks it is `id`'s turn.
    ///
    /// # Errors
    /// [`SessionError::NotYourTurn`] naming whose turn it actually is.
    pub fn validate_turn(&self, id: &PeerId) -> Result<(), SessionError> {
        match self.current() {
            Some((_, expected)) if &expected == id => Ok(()),
            Some((_, expected)) => Err(SessionError::NotYourTurn { expected }),
            None => Err(SessionError::NotYourTurn { expected: id.clone() }),
        }
    }

    /// Passes the turn to the next player, wrapping around.
    pub fn advance(&mut self) -> Option<(usize, PeerId)> {
        if self.players.is_empty() {
            return None;
        }
        self.current = (self.current + 1) % self.players.len();
        self.current()
    }

    /// Puts the turn back on the first player.
    pub fn reset_turns(&mut self) {
        self.current = 0;
    }

    /// Clears everything except the local player.
    pub fn reset_to_local(&mut self) {
        self.players.retain(|p| p.is_local);
        for player in &mut self.players {
            player.is_moderator = false;
        }
        self.current = 0;
    }

    /// Marks the local player as the room's moderator.
    pub fn set_local_moderator(&mut self) {
        for player in &mut self.players {
            player.is_moderator = player.is_local;
        }
    }
}
