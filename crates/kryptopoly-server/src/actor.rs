//! One task per session. The task owns the [`SessionState`], drains a bounded
//! command queue in arrival order and pushes per-viewer snapshots to watchers
//! after every accepted mutation.

use std::collections::BTreeMap;
use std::time::Instant;

use kryptopoly_protocol::{Command, CommandOutput, PlayerId, Role, SessionId, SessionStatus};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::game::{SessionError, SessionState};
use crate::protocol::ServerMessage;

/// Delivery channel of one watching device.
pub type Watcher = mpsc::UnboundedSender<ServerMessage>;

/// Identity handed out by join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Joined {
    pub player_id: PlayerId,
    pub token: String,
    pub role: Role,
    pub status: SessionStatus,
}

/// Identity resumed by reconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub player_id: PlayerId,
    pub role: Role,
    pub status: SessionStatus,
}

/// Lifecycle summary used by the registry sweep.
#[derive(Clone, Copy, Debug)]
pub struct SessionInfo {
    pub status: SessionStatus,
    pub finished_at: Option<Instant>,
    pub watchers: usize,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

#[derive(Debug)]
pub enum SessionCommand {
    Join {
        name: String,
        reply: Reply<Joined>,
    },
    Reconnect {
        token: String,
        reply: Reply<Identity>,
    },
    Watch {
        token: String,
        watcher: Watcher,
        reply: Reply<PlayerId>,
    },
    Disconnect {
        token: String,
        reply: Reply<PlayerId>,
    },
    Apply {
        token: String,
        command: Command,
        reply: Reply<CommandOutput>,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
}

/// Cloneable address of a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(sender: mpsc::Sender<SessionCommand>) -> Self {
        Self { sender }
    }

    /// Queue a command; `None` once the session task has stopped.
    pub async fn send(&self, command: SessionCommand) -> Option<()> {
        self.sender.send(command).await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct SessionActor {
    state: SessionState,
    watchers: Vec<(PlayerId, Watcher)>,
    finished_at: Option<Instant>,
}

pub fn spawn_session(state: SessionState, queue_capacity: usize) -> SessionHandle {
    let (tx, mut rx) = mpsc::channel(queue_capacity);

    tokio::spawn(async move {
        let session_id = state.session_id().clone();
        let mut actor = SessionActor {
            state,
            watchers: Vec::new(),
            finished_at: None,
        };
        while let Some(cmd) = rx.recv().await {
            actor.handle(cmd);
        }
        info!("Session {} stopped", session_id);
    });

    SessionHandle::new(tx)
}

impl SessionActor {
    fn session_id(&self) -> &SessionId {
        self.state.session_id()
    }

    fn handle(&mut self, cmd: SessionCommand) {
        let before = self.state.version();
        match cmd {
            SessionCommand::Join { name, reply } => {
                let result = self.state.join(&name).map(|(player_id, token)| Joined {
                    player_id,
                    token,
                    role: Role::Player,
                    status: self.state.status(),
                });
                match &result {
                    Ok(joined) => info!(
                        "Player {} joined session {}",
                        joined.player_id,
                        self.session_id()
                    ),
                    Err(err) => warn!("Join to {} rejected: {}", self.session_id(), err),
                }
                let _ = reply.send(result);
            }
            SessionCommand::Reconnect { token, reply } => {
                let result = self.state.reconnect(&token).map(|player_id| Identity {
                    player_id,
                    role: self.state.role(player_id).unwrap_or(Role::Player),
                    status: self.state.status(),
                });
                if let Ok(identity) = &result {
                    debug!(
                        "Player {} reconnected to {}",
                        identity.player_id,
                        self.session_id()
                    );
                }
                let _ = reply.send(result);
            }
            SessionCommand::Watch {
                token,
                watcher,
                reply,
            } => {
                let result = self.watch(&token, watcher);
                let _ = reply.send(result);
            }
            SessionCommand::Disconnect { token, reply } => {
                let result = self.state.authenticate(&token).and_then(|player| {
                    self.watchers.retain(|(p, _)| *p != player);
                    self.state.set_connected(player, false)?;
                    Ok(player)
                });
                if let Ok(player) = &result {
                    debug!("Player {} disconnected from {}", player, self.session_id());
                }
                let _ = reply.send(result);
            }
            SessionCommand::Apply {
                token,
                command,
                reply,
            } => {
                let result = self.apply(&token, &command);
                let _ = reply.send(result);
            }
            SessionCommand::Info { reply } => {
                let _ = reply.send(SessionInfo {
                    status: self.state.status(),
                    finished_at: self.finished_at,
                    watchers: self.watchers.len(),
                });
            }
        }

        if self.state.status() == SessionStatus::GameOver && self.finished_at.is_none() {
            self.finished_at = Some(Instant::now());
        }
        if self.state.version() != before {
            self.broadcast();
        }
    }

    fn apply(&mut self, token: &str, command: &Command) -> Result<CommandOutput, SessionError> {
        let player = self.state.authenticate(token)?;
        match self.state.apply(player, command) {
            Ok(applied) => {
                debug!(
                    "{} applied {} in {} (changed: {})",
                    player,
                    command.name(),
                    self.session_id(),
                    applied.changed
                );
                Ok(applied.output)
            }
            Err(err) => {
                warn!(
                    "{} rejected {} in {}: {}",
                    player,
                    command.name(),
                    self.session_id(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Register a watcher. The player counts as connected and the first
    /// snapshot goes out right away.
    fn watch(&mut self, token: &str, watcher: Watcher) -> Result<PlayerId, SessionError> {
        let player = self.state.authenticate(token)?;
        self.state.set_connected(player, true)?;
        let first = self.snapshot_message(player);
        if let Some(message) = first {
            if watcher.send(message).is_err() {
                return Ok(player);
            }
        }
        self.watchers.push((player, watcher));
        debug!("Player {} watching {}", player, self.session_id());
        Ok(player)
    }

    fn snapshot_message(&self, viewer: PlayerId) -> Option<ServerMessage> {
        match ServerMessage::snapshot(self.state.snapshot_for_player(viewer)) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!("Failed to encode snapshot for {}: {}", viewer, err);
                None
            }
        }
    }

    /// Push a fresh snapshot to every watcher. Closed channels are dropped;
    /// losing a player's last watcher marks them disconnected, which is
    /// itself broadcast.
    fn broadcast(&mut self) {
        loop {
            let mut cache: BTreeMap<PlayerId, Option<ServerMessage>> = BTreeMap::new();
            let mut lost = Vec::new();
            let state = &self.state;
            self.watchers.retain(|(player, watcher)| {
                let message = cache.entry(*player).or_insert_with(|| {
                    ServerMessage::snapshot(state.snapshot_for_player(*player)).ok()
                });
                let Some(message) = message else {
                    return true;
                };
                if watcher.send(message.clone()).is_err() {
                    lost.push(*player);
                    return false;
                }
                true
            });

            let mut changed = false;
            for player in lost {
                if self.watchers.iter().any(|(p, _)| *p == player) {
                    continue;
                }
                warn!(
                    "Dropped last watcher of {} in {}",
                    player,
                    self.state.session_id()
                );
                changed |= self.state.set_connected(player, false).unwrap_or(false);
            }
            if !changed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kryptopoly_core::{load_catalog, CatalogSource, RuleTable};
    use kryptopoly_protocol::SessionConfig;

    use super::*;

    async fn request<T>(
        handle: &SessionHandle,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        handle.send(make(tx)).await.unwrap();
        rx.await.unwrap()
    }

    fn spawn() -> (SessionHandle, String) {
        let catalog = Arc::new(load_catalog(CatalogSource::Embedded).unwrap());
        let (state, gm_token) = SessionState::create(
            SessionId::new("ROOM42"),
            catalog,
            RuleTable::default(),
            SessionConfig::default(),
            "Dana",
        )
        .unwrap();
        (spawn_session(state, 8), gm_token)
    }

    #[tokio::test]
    async fn watchers_get_snapshots_after_mutations() {
        let (handle, gm_token) = spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gm = request(&handle, |reply| SessionCommand::Watch {
            token: gm_token.clone(),
            watcher: tx,
            reply,
        })
        .await
        .unwrap();
        assert_eq!(gm, PlayerId::GM);
        assert!(matches!(rx.recv().await, Some(ServerMessage::Snapshot { .. })));

        let joined = request(&handle, |reply| SessionCommand::Join {
            name: "Eve".into(),
            reply,
        })
        .await
        .unwrap();
        assert_eq!(joined.player_id, PlayerId(1));

        match rx.recv().await {
            Some(ServerMessage::Snapshot { snapshot, .. }) => {
                assert_eq!(snapshot.players.len(), 2);
                assert_eq!(snapshot.viewer, PlayerId::GM);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_watcher_marks_player_disconnected() {
        let (handle, gm_token) = spawn();
        let joined = request(&handle, |reply| SessionCommand::Join {
            name: "Eve".into(),
            reply,
        })
        .await
        .unwrap();

        let (eve_tx, eve_rx) = mpsc::unbounded_channel();
        request(&handle, |reply| SessionCommand::Watch {
            token: joined.token.clone(),
            watcher: eve_tx,
            reply,
        })
        .await
        .unwrap();
        drop(eve_rx);

        request(&handle, |reply| SessionCommand::Apply {
            token: gm_token.clone(),
            command: Command::StartGame,
            reply,
        })
        .await
        .unwrap();

        let output = request(&handle, |reply| SessionCommand::Apply {
            token: gm_token.clone(),
            command: Command::Snapshot,
            reply,
        })
        .await
        .unwrap();
        let CommandOutput::Snapshot { snapshot } = output else {
            panic!("expected snapshot");
        };
        assert!(!snapshot.players[1].connected);

        let info = request(&handle, |reply| SessionCommand::Info { reply }).await;
        assert_eq!(info.watchers, 0);
        assert_eq!(info.status, SessionStatus::InProgress);
    }
}
