//! Session-level messages between devices and the server.
//!
//! Extends kryptopoly-protocol with session bootstrap and delivery messages.

use serde::{Deserialize, Serialize};

use kryptopoly_protocol::{
    Command, CommandOutput, ErrorBody, ErrorKind, PlayerId, Role, SessionId, SessionSnapshot,
    SessionStatus,
};

/// Client request with an optional correlation id echoed in the reply
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub id: Option<u64>,
    pub message: ClientMessage,
}

/// Client-to-server messages
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Open a new session; the sender becomes its Game Master
    CreateSession {
        gm_name: String,
        years_total: u8,
        max_players: u8,
    },
    /// Join a session still in the lobby
    Join { session_id: SessionId, name: String },
    /// Resume an identity with its reconnect token
    Reconnect { session_id: SessionId, token: String },
    /// Subscribe to snapshots; the first one is pushed immediately
    Watch { session_id: SessionId, token: String },
    /// Mark the sender as gone
    Disconnect { session_id: SessionId, token: String },
    /// A session command, authenticated by reconnect token
    Command {
        session_id: SessionId,
        token: String,
        command: Command,
    },
}

/// Payload of a successful reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReplyData {
    SessionCreated {
        session_id: SessionId,
        player_id: PlayerId,
        token: String,
    },
    Joined {
        player_id: PlayerId,
        token: String,
        role: Role,
        status: SessionStatus,
    },
    Reconnected {
        player_id: PlayerId,
        role: Role,
        status: SessionStatus,
    },
    Watching {
        player_id: PlayerId,
    },
    Disconnected {
        player_id: PlayerId,
    },
    Output {
        output: CommandOutput,
    },
}

/// Server-to-client messages
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// `{ok: true, data}` or `{ok: false, error}`
    Reply {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ReplyData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Pushed to watchers after every accepted mutation
    Snapshot {
        snapshot: Box<SessionSnapshot>,
        /// FNV-1a of the MessagePack encoding; equal hashes mean equal snapshots
        hash: u64,
    },
}

impl ServerMessage {
    pub fn ok(id: Option<u64>, data: ReplyData) -> Self {
        ServerMessage::Reply {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<u64>, kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Reply {
            id,
            ok: false,
            data: None,
            error: Some(ErrorBody::new(kind, message)),
        }
    }

    /// Wrap a snapshot for delivery, hashing it on the way.
    pub fn snapshot(snapshot: SessionSnapshot) -> Result<Self, kryptopoly_protocol::WireError> {
        let hash = kryptopoly_protocol::snapshot_hash(&snapshot)?;
        Ok(ServerMessage::Snapshot {
            snapshot: Box::new(snapshot),
            hash,
        })
    }
}

/// Serialize a client request for network transmission
pub fn serialize_client_request(req: &ClientRequest) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::encode::to_vec_named(req)
}

/// Deserialize a client request from network data
pub fn deserialize_client_request(data: &[u8]) -> Result<ClientRequest, rmp_serde::decode::Error> {
    rmp_serde::decode::from_slice(data)
}

/// Serialize a server message for network transmission
pub fn serialize_server_message(msg: &ServerMessage) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::encode::to_vec_named(msg)
}

/// Deserialize a server message from network data
pub fn deserialize_server_message(data: &[u8]) -> Result<ServerMessage, rmp_serde::decode::Error> {
    rmp_serde::decode::from_slice(data)
}

/// Parse one JSON line from the development gateway
pub fn client_request_from_json(line: &str) -> Result<ClientRequest, serde_json::Error> {
    serde_json::from_str(line)
}

/// Render a server message as one JSON line
pub fn server_message_to_json(msg: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}
