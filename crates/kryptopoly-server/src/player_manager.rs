//! Session roster: names, roles, reconnect tokens and liveness.
//!
//! The Game Master is always the first entry and always `PlayerId::GM`.

use std::collections::HashMap;

use kryptopoly_protocol::{ErrorKind, PlayerId, Role};
use rand::Rng;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 24;

/// One roster entry
#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub role: Role,
    pub reconnect_token: String,
    pub connected: bool,
}

/// Roster of one session
#[derive(Debug)]
pub struct PlayerDirectory {
    /// Join order; index 0 is the GM.
    players: Vec<Player>,
    tokens: HashMap<String, PlayerId>,
    max_players: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("name is longer than {MAX_NAME_LEN} characters")]
    NameTooLong,
    #[error("name {0:?} is already taken")]
    NameTaken(String),
    #[error("session is full ({0} players)")]
    Full(u8),
    #[error("unknown reconnect token")]
    UnknownToken,
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
}

impl DirectoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::EmptyName | DirectoryError::NameTooLong | DirectoryError::Full(_) => {
                ErrorKind::Validation
            }
            DirectoryError::NameTaken(_) => ErrorKind::Conflict,
            DirectoryError::UnknownToken | DirectoryError::UnknownPlayer(_) => ErrorKind::NotFound,
        }
    }
}

impl PlayerDirectory {
    /// Create a roster holding only the GM. Returns the GM's reconnect token.
    pub fn new(gm_name: &str, max_players: u8) -> Result<(Self, String), DirectoryError> {
        let mut directory = Self {
            players: Vec::new(),
            tokens: HashMap::new(),
            max_players,
        };
        let (_, token) = directory.insert(gm_name, Role::Gm)?;
        Ok((directory, token))
    }

    /// Add a regular player. Names are trimmed and unique ignoring case.
    pub fn add_player(&mut self, name: &str) -> Result<(PlayerId, String), DirectoryError> {
        if self.players.len() >= usize::from(self.max_players) {
            return Err(DirectoryError::Full(self.max_players));
        }
        self.insert(name, Role::Player)
    }

    fn insert(&mut self, name: &str, role: Role) -> Result<(PlayerId, String), DirectoryError> {
        let name = normalize_name(name)?;
        if self.name_taken(&name) {
            return Err(DirectoryError::NameTaken(name));
        }
        let id = PlayerId(self.players.len() as u8);
        let mut token = generate_token();
        while self.tokens.contains_key(&token) {
            token = generate_token();
        }
        self.tokens.insert(token.clone(), id);
        self.players.push(Player {
            id,
            name,
            role,
            reconnect_token: token.clone(),
            connected: true,
        });
        Ok((id, token))
    }

    fn name_taken(&self, name: &str) -> bool {
        let folded = name.to_lowercase();
        self.players.iter().any(|p| p.name.to_lowercase() == folded)
    }

    /// Resolve a reconnect token and mark the player connected again.
    pub fn reconnect(&mut self, token: &str) -> Result<PlayerId, DirectoryError> {
        let id = self.authenticate(token)?;
        self.set_connected(id, true)?;
        Ok(id)
    }

    /// Resolve a token without touching liveness.
    pub fn authenticate(&self, token: &str) -> Result<PlayerId, DirectoryError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(DirectoryError::UnknownToken)
    }

    pub fn set_connected(&mut self, id: PlayerId, connected: bool) -> Result<(), DirectoryError> {
        let player = self
            .players
            .get_mut(usize::from(id.0))
            .ok_or(DirectoryError::UnknownPlayer(id))?;
        player.connected = connected;
        Ok(())
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(usize::from(id.0))
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn max_players(&self) -> u8 {
        self.max_players
    }
}

fn normalize_name(name: &str) -> Result<String, DirectoryError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DirectoryError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DirectoryError::NameTooLong);
    }
    Ok(name.to_string())
}

/// 32 lowercase alphanumerics.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gm_comes_first() {
        let (mut directory, gm_token) = PlayerDirectory::new("Dana", 4).unwrap();
        let (p1, _) = directory.add_player("  Eve ").unwrap();
        assert_eq!(p1, PlayerId(1));
        assert_eq!(directory.get(PlayerId::GM).unwrap().role, Role::Gm);
        assert_eq!(directory.get(p1).unwrap().name, "Eve");
        assert_eq!(directory.reconnect(&gm_token).unwrap(), PlayerId::GM);
    }

    #[test]
    fn names_are_unique_ignoring_case() {
        let (mut directory, _) = PlayerDirectory::new("Dana", 4).unwrap();
        directory.add_player("Eve").unwrap();
        let err = directory.add_player("EVE").unwrap_err();
        assert_eq!(err, DirectoryError::NameTaken("EVE".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            directory.add_player("   ").unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn full_roster_rejects_joins() {
        let (mut directory, _) = PlayerDirectory::new("Dana", 2).unwrap();
        directory.add_player("Eve").unwrap();
        let err = directory.add_player("Finn").unwrap_err();
        assert_eq!(err, DirectoryError::Full(2));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn tokens_reconnect_and_flag_liveness() {
        let (mut directory, _) = PlayerDirectory::new("Dana", 4).unwrap();
        let (eve, token) = directory.add_player("Eve").unwrap();
        assert_eq!(token.len(), 32);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));

        directory.set_connected(eve, false).unwrap();
        assert!(!directory.get(eve).unwrap().connected);
        assert_eq!(directory.reconnect(&token).unwrap(), eve);
        assert!(directory.get(eve).unwrap().connected);

        let err = directory.reconnect("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
