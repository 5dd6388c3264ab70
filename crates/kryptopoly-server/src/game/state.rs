//! Server-authoritative session state.
//!
//! `kryptopoly-server` owns rosters, liveness and delivery, but the phase
//! machine lives in `kryptopoly-core::PhaseEngine`. This module wraps the
//! engine together with the session's [`PlayerDirectory`] and exposes:
//! - join / reconnect / liveness bookkeeping
//! - validated, all-or-nothing command application with a version counter
//! - per-viewer redacted `SessionSnapshot`s

use std::sync::Arc;

use kryptopoly_core::{Catalog, EngineError, PhaseEngine, RuleTable};
use kryptopoly_protocol::{
    Command, CommandOutput, ErrorKind, PlayerId, PlayerSnapshot, Role, SessionConfig, SessionId,
    SessionSnapshot, SessionStatus,
};

use crate::player_manager::{DirectoryError, PlayerDirectory};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Engine(err) => err.kind(),
            SessionError::Directory(err) => err.kind(),
        }
    }
}

/// Outcome of an accepted command.
#[derive(Clone, Debug)]
pub struct ApplyResult {
    pub output: CommandOutput,
    /// Watchers need a fresh snapshot.
    pub changed: bool,
}

pub struct SessionState {
    session_id: SessionId,
    engine: PhaseEngine,
    directory: PlayerDirectory,
    version: u64,
}

impl SessionState {
    /// Create a session with its GM. Returns the GM's reconnect token.
    pub fn create(
        session_id: SessionId,
        catalog: Arc<Catalog>,
        rules: RuleTable,
        config: SessionConfig,
        gm_name: &str,
    ) -> Result<(Self, String), SessionError> {
        let engine = PhaseEngine::new(catalog, rules, config)?;
        let (directory, token) = PlayerDirectory::new(gm_name, config.max_players)?;
        let state = Self {
            session_id,
            engine,
            directory,
            version: 0,
        };
        Ok((state, token))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.engine.status()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn engine(&self) -> &PhaseEngine {
        &self.engine
    }

    pub fn directory(&self) -> &PlayerDirectory {
        &self.directory
    }

    pub fn role(&self, player: PlayerId) -> Option<Role> {
        self.directory.get(player).map(|p| p.role)
    }

    /// Add a player while the session is still in the lobby.
    pub fn join(&mut self, name: &str) -> Result<(PlayerId, String), SessionError> {
        if self.engine.status() != SessionStatus::Lobby {
            return Err(EngineError::WrongStatus(self.engine.status()).into());
        }
        let (player, token) = self.directory.add_player(name)?;
        self.engine.add_player(player)?;
        self.version += 1;
        Ok((player, token))
    }

    pub fn authenticate(&self, token: &str) -> Result<PlayerId, SessionError> {
        Ok(self.directory.authenticate(token)?)
    }

    /// Resume an identity; the player counts as connected again.
    pub fn reconnect(&mut self, token: &str) -> Result<PlayerId, SessionError> {
        let was_connected = self
            .directory
            .authenticate(token)
            .ok()
            .and_then(|id| self.directory.get(id))
            .is_some_and(|p| p.connected);
        let player = self.directory.reconnect(token)?;
        if !was_connected {
            self.version += 1;
        }
        Ok(player)
    }

    /// Update a liveness flag. Returns whether it actually changed.
    pub fn set_connected(
        &mut self,
        player: PlayerId,
        connected: bool,
    ) -> Result<bool, SessionError> {
        let before = self
            .directory
            .get(player)
            .map(|p| p.connected)
            .ok_or(DirectoryError::UnknownPlayer(player))?;
        if before == connected {
            return Ok(false);
        }
        self.directory.set_connected(player, connected)?;
        self.version += 1;
        Ok(true)
    }

    /// Apply one command on behalf of `player`.
    pub fn apply(
        &mut self,
        player: PlayerId,
        command: &Command,
    ) -> Result<ApplyResult, SessionError> {
        if self.directory.get(player).is_none() {
            return Err(EngineError::UnknownPlayer(player).into());
        }
        if let Command::Snapshot = command {
            return Ok(ApplyResult {
                output: CommandOutput::Snapshot {
                    snapshot: Box::new(self.snapshot_for_player(player)),
                },
                changed: false,
            });
        }
        let applied = self.engine.apply(player, command)?;
        if applied.changed {
            self.version += 1;
        }
        Ok(ApplyResult {
            output: applied.output,
            changed: applied.changed,
        })
    }

    /// Full session state as `viewer` may see it.
    pub fn snapshot_for_player(&self, viewer: PlayerId) -> SessionSnapshot {
        let players = self
            .directory
            .players()
            .iter()
            .map(|p| {
                let holdings = self.engine.holdings(p.id);
                PlayerSnapshot {
                    id: p.id,
                    name: p.name.clone(),
                    role: p.role,
                    connected: p.connected,
                    cards: holdings
                        .map(|h| h.cards.iter().cloned().collect())
                        .unwrap_or_default(),
                    used_experts: holdings
                        .map(|h| h.used_experts.iter().cloned().collect())
                        .unwrap_or_default(),
                    crypto: holdings.map(|h| h.crypto.clone()).unwrap_or_default(),
                }
            })
            .collect();

        SessionSnapshot {
            session_id: self.session_id.clone(),
            version: self.version,
            status: self.engine.status(),
            config: self.engine.config(),
            viewer,
            players,
            game: self.engine.view_for(viewer),
        }
    }
}

#[cfg(test)]
mod tests {
    use kryptopoly_core::{load_catalog, CatalogSource};
    use kryptopoly_protocol::Step;

    use super::*;

    fn session() -> SessionState {
        let catalog = Arc::new(load_catalog(CatalogSource::Embedded).unwrap());
        let (state, _) = SessionState::create(
            SessionId::new("ABC123"),
            catalog,
            RuleTable::default(),
            SessionConfig::default(),
            "Dana",
        )
        .unwrap();
        state
    }

    #[test]
    fn join_only_before_start() {
        let mut state = session();
        let (eve, _) = state.join("Eve").unwrap();
        assert_eq!(eve, PlayerId(1));
        assert_eq!(state.engine().players(), &[eve]);

        state.apply(PlayerId::GM, &Command::StartGame).unwrap();
        let err = state.join("Finn").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(state.directory().len(), 2);
    }

    #[test]
    fn version_tracks_accepted_mutations() {
        let mut state = session();
        let (eve, _) = state.join("Eve").unwrap();
        let v = state.version();

        state.apply(PlayerId::GM, &Command::StartGame).unwrap();
        assert_eq!(state.version(), v + 1);

        let query = state.apply(eve, &Command::Snapshot).unwrap();
        assert!(!query.changed);
        assert!(state.apply(eve, &Command::AdvancePhase).is_err());
        assert_eq!(state.version(), v + 1);

        state
            .apply(eve, &Command::CommitMlBid { amount: Some(10) })
            .unwrap();
        let replay = state
            .apply(eve, &Command::CommitMlBid { amount: Some(10) })
            .unwrap();
        assert!(!replay.changed);
        assert_eq!(state.version(), v + 2);
    }

    #[test]
    fn reconnect_bumps_version_only_when_liveness_changes() {
        let mut state = session();
        let (eve, token) = state.join("Eve").unwrap();
        let v = state.version();

        assert_eq!(state.reconnect(&token).unwrap(), eve);
        assert_eq!(state.version(), v);

        assert!(state.set_connected(eve, false).unwrap());
        assert_eq!(state.version(), v + 1);
        assert_eq!(state.reconnect(&token).unwrap(), eve);
        assert!(state.directory().get(eve).unwrap().connected);
        assert_eq!(state.version(), v + 2);

        let err = state.reconnect("not-a-token").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(state.version(), v + 2);
    }

    #[test]
    fn snapshot_lists_roster_and_hides_others_bids() {
        let mut state = session();
        let (eve, _) = state.join("Eve").unwrap();
        let (finn, _) = state.join("Finn").unwrap();
        state.apply(PlayerId::GM, &Command::StartGame).unwrap();
        state
            .apply(eve, &Command::CommitMlBid { amount: Some(40) })
            .unwrap();
        state.set_connected(finn, false).unwrap();

        let snapshot = state.snapshot_for_player(finn);
        assert_eq!(snapshot.viewer, finn);
        assert_eq!(snapshot.players.len(), 3);
        assert_eq!(snapshot.players[0].role, Role::Gm);
        assert!(!snapshot.players[2].connected);
        assert_eq!(snapshot.game.step, Step::MlBid);
        assert!(snapshot.game.board[0].committed);
        assert_eq!(snapshot.game.board[0].payload, None);
    }

    #[test]
    fn unknown_player_is_not_found() {
        let mut state = session();
        let err = state
            .apply(PlayerId(5), &Command::CommitAcquireDone)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
