//! Maps session ids to running session tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kryptopoly_core::{load_catalog, Catalog, CatalogError, CatalogSource};
use kryptopoly_protocol::{
    Command, CommandOutput, ErrorKind, PlayerId, SessionConfig, SessionId, SessionStatus,
};
use rand::Rng;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};

use crate::actor::{
    spawn_session, Identity, Joined, SessionCommand, SessionHandle, SessionInfo, Watcher,
};
use crate::config::ServerConfig;
use crate::game::{SessionError, SessionState};
use crate::protocol::{ClientMessage, ClientRequest, ReplyData, ServerMessage};

const SESSION_ID_LEN: usize = 6;
const SESSION_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {0} is no longer running")]
    Closed(SessionId),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::UnknownSession(_) | RegistryError::Closed(_) => ErrorKind::NotFound,
            RegistryError::Invalid(_) => ErrorKind::Validation,
            RegistryError::Session(err) => err.kind(),
        }
    }
}

/// Result of creating a session: the GM's identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Created {
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub token: String,
}

pub struct SessionRegistry {
    config: ServerConfig,
    catalog: Arc<Catalog>,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(config: ServerConfig, catalog: Arc<Catalog>) -> Self {
        Self {
            config,
            catalog,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Load the catalog named by the config (embedded when unset).
    pub fn from_config(config: ServerConfig) -> Result<Self, CatalogError> {
        let source = match &config.catalog_dir {
            Some(dir) => CatalogSource::Path(dir.clone()),
            None => CatalogSource::Embedded,
        };
        let catalog = load_catalog(source)?;
        Ok(Self::new(config, Arc::new(catalog)))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn create_session(
        &self,
        gm_name: &str,
        years_total: u8,
        max_players: u8,
    ) -> Result<Created, RegistryError> {
        if max_players > self.config.max_players_limit {
            return Err(RegistryError::Invalid(format!(
                "this server allows at most {} players",
                self.config.max_players_limit
            )));
        }
        let config = SessionConfig {
            years_total,
            max_players,
        };

        let mut sessions = self.sessions.write().await;
        let mut session_id = generate_session_id();
        while sessions.contains_key(&session_id) {
            session_id = generate_session_id();
        }
        let (state, token) = SessionState::create(
            session_id.clone(),
            self.catalog.clone(),
            self.config.rules.clone(),
            config,
            gm_name,
        )?;
        let handle = spawn_session(state, self.config.command_queue);
        sessions.insert(session_id.clone(), handle);
        info!(
            "Session {} created ({} years, up to {} players)",
            session_id, years_total, max_players
        );
        Ok(Created {
            session_id,
            player_id: PlayerId::GM,
            token,
        })
    }

    async fn handle(&self, session: &SessionId) -> Result<SessionHandle, RegistryError> {
        self.sessions
            .read()
            .await
            .get(session)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSession(session.clone()))
    }

    /// Send a command to a session and wait for its reply.
    async fn request<T>(
        &self,
        session: &SessionId,
        make: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> SessionCommand,
    ) -> Result<T, RegistryError> {
        let handle = self.handle(session).await?;
        let (tx, rx) = oneshot::channel();
        handle
            .send(make(tx))
            .await
            .ok_or_else(|| RegistryError::Closed(session.clone()))?;
        let result = rx
            .await
            .map_err(|_| RegistryError::Closed(session.clone()))?;
        Ok(result?)
    }

    pub async fn join(&self, session: &SessionId, name: &str) -> Result<Joined, RegistryError> {
        let name = name.to_string();
        self.request(session, |reply| SessionCommand::Join { name, reply })
            .await
    }

    pub async fn reconnect(
        &self,
        session: &SessionId,
        token: &str,
    ) -> Result<Identity, RegistryError> {
        let token = token.to_string();
        self.request(session, |reply| SessionCommand::Reconnect { token, reply })
            .await
    }

    pub async fn watch(
        &self,
        session: &SessionId,
        token: &str,
        watcher: Watcher,
    ) -> Result<PlayerId, RegistryError> {
        let token = token.to_string();
        self.request(session, |reply| SessionCommand::Watch {
            token,
            watcher,
            reply,
        })
        .await
    }

    pub async fn disconnect(
        &self,
        session: &SessionId,
        token: &str,
    ) -> Result<PlayerId, RegistryError> {
        let token = token.to_string();
        self.request(session, |reply| SessionCommand::Disconnect { token, reply })
            .await
    }

    pub async fn send(
        &self,
        session: &SessionId,
        token: &str,
        command: Command,
    ) -> Result<CommandOutput, RegistryError> {
        let token = token.to_string();
        self.request(session, |reply| SessionCommand::Apply {
            token,
            command,
            reply,
        })
        .await
    }

    async fn info(&self, handle: &SessionHandle) -> Option<SessionInfo> {
        let (tx, rx) = oneshot::channel();
        handle.send(SessionCommand::Info { reply: tx }).await?;
        rx.await.ok()
    }

    /// Drop sessions whose task stopped, and finished sessions older than the
    /// configured retention. Returns how many were removed.
    pub async fn evict_terminated(&self) -> usize {
        let handles: Vec<(SessionId, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let now = Instant::now();
        let mut expired = Vec::new();
        for (id, handle) in handles {
            match self.info(&handle).await {
                None => expired.push(id),
                Some(SessionInfo {
                    status: SessionStatus::GameOver,
                    finished_at: Some(at),
                    ..
                }) if now.duration_since(at) >= self.config.game_over_retention => {
                    expired.push(id)
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        for id in &expired {
            sessions.remove(id);
            info!("Session {} evicted", id);
        }
        expired.len()
    }

    /// Route one client request. Watch subscriptions deliver to `watcher`.
    pub async fn dispatch(&self, request: ClientRequest, watcher: &Watcher) -> ServerMessage {
        let id = request.id;
        let result = match request.message {
            ClientMessage::CreateSession {
                gm_name,
                years_total,
                max_players,
            } => self
                .create_session(&gm_name, years_total, max_players)
                .await
                .map(|created| ReplyData::SessionCreated {
                    session_id: created.session_id,
                    player_id: created.player_id,
                    token: created.token,
                }),
            ClientMessage::Join { session_id, name } => {
                self.join(&session_id, &name)
                    .await
                    .map(|joined| ReplyData::Joined {
                        player_id: joined.player_id,
                        token: joined.token,
                        role: joined.role,
                        status: joined.status,
                    })
            }
            ClientMessage::Reconnect { session_id, token } => self
                .reconnect(&session_id, &token)
                .await
                .map(|identity| ReplyData::Reconnected {
                    player_id: identity.player_id,
                    role: identity.role,
                    status: identity.status,
                }),
            ClientMessage::Watch { session_id, token } => self
                .watch(&session_id, &token, watcher.clone())
                .await
                .map(|player_id| ReplyData::Watching { player_id }),
            ClientMessage::Disconnect { session_id, token } => self
                .disconnect(&session_id, &token)
                .await
                .map(|player_id| ReplyData::Disconnected { player_id }),
            ClientMessage::Command {
                session_id,
                token,
                command,
            } => self
                .send(&session_id, &token, command)
                .await
                .map(|output| ReplyData::Output { output }),
        };

        match result {
            Ok(data) => ServerMessage::ok(id, data),
            Err(err) => {
                if err.kind() == ErrorKind::Fatal {
                    warn!("Request failed: {}", err);
                }
                ServerMessage::error(id, err.kind(), err.to_string())
            }
        }
    }
}

/// 6 uppercase alphanumerics.
fn generate_session_id() -> SessionId {
    let mut rng = rand::thread_rng();
    let code: String = (0..SESSION_ID_LEN)
        .map(|_| SESSION_ID_CHARSET[rng.gen_range(0..SESSION_ID_CHARSET.len())] as char)
        .collect();
    SessionId::new(code)
}
