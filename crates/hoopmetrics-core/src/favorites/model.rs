// Favorites data model: the snapshot and the entities it holds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Display name given to entities synthesized for a pending add.
pub const PLACEHOLDER_NAME: &str = "Loading...";

/// Limit value meaning "no cap".
pub const UNLIMITED: i64 = -1;

// ---------------------------------------------------------------------------
// Entity kinds and keys
// ---------------------------------------------------------------------------

/// Which collection of the snapshot an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "players")]
    Player,
    #[serde(rename = "teams")]
    Team,
}

impl EntityKind {
    /// Collection name as used in URLs and the `limits` map.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Player => "players",
            EntityKind::Team => "teams",
        }
    }

    /// Singular noun for user-facing messages.
    pub fn noun(&self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Team => "team",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Identity of one favoritable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn player(id: i64) -> Self {
        Self {
            kind: EntityKind::Player,
            id,
        }
    }

    pub fn team(id: i64) -> Self {
        Self {
            kind: EntityKind::Team,
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.collection(), self.id)
    }
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// Season averages shown alongside a favorite player. Every stat is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageStats {
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub rebounds: Option<f64>,
    #[serde(default)]
    pub assists: Option<f64>,
    #[serde(default)]
    pub steals: Option<f64>,
    #[serde(default)]
    pub blocks: Option<f64>,
}

/// Team reference embedded in a player (name only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRef {
    #[serde(alias = "full_name")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: i64,
    #[serde(alias = "full_name")]
    pub name: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub team: Option<TeamRef>,
    #[serde(default, alias = "picture")]
    pub picture_url: Option<String>,
    #[serde(default, alias = "averages")]
    pub stats: Option<AverageStats>,
    /// Set on entities synthesized locally for a pending add. Never sent or
    /// received over the wire.
    #[serde(skip)]
    pub placeholder: bool,
}

impl PlayerSummary {
    /// A stand-in shown while an add is awaiting the server.
    pub fn placeholder(id: i64) -> Self {
        Self {
            id,
            name: PLACEHOLDER_NAME.to_string(),
            position: None,
            team: None,
            picture_url: None,
            stats: None,
            placeholder: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: i64,
    #[serde(alias = "name")]
    pub full_name: String,
    #[serde(default)]
    pub abbreviation: String,
    #[serde(default)]
    pub conference: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(skip)]
    pub placeholder: bool,
}

impl TeamSummary {
    pub fn placeholder(id: i64) -> Self {
        Self {
            id,
            full_name: PLACEHOLDER_NAME.to_string(),
            abbreviation: String::new(),
            conference: None,
            division: None,
            placeholder: true,
        }
    }
}

/// Either kind of entity, used where the engine handles both generically.
#[derive(Debug, Clone, PartialEq)]
pub enum FavoriteEntity {
    Player(PlayerSummary),
    Team(TeamSummary),
}

impl FavoriteEntity {
    pub fn key(&self) -> EntityKey {
        match self {
            FavoriteEntity::Player(p) => EntityKey::player(p.id),
            FavoriteEntity::Team(t) => EntityKey::team(t.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Per-collection caps reported by the server. `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteLimits {
    #[serde(default = "unlimited")]
    pub players: i64,
    #[serde(default = "unlimited")]
    pub teams: i64,
}

fn unlimited() -> i64 {
    UNLIMITED
}

impl Default for FavoriteLimits {
    fn default() -> Self {
        Self {
            players: UNLIMITED,
            teams: UNLIMITED,
        }
    }
}

impl FavoriteLimits {
    pub fn get(&self, kind: EntityKind) -> i64 {
        match kind {
            EntityKind::Player => self.players,
            EntityKind::Team => self.teams,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The local view of a user's favorites.
///
/// Sequences keep server order and are unique by id. The limits are not
/// enforced here; the server is the authority on caps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FavoritesSnapshot {
    #[serde(default)]
    pub players: Vec<PlayerSummary>,
    #[serde(default)]
    pub teams: Vec<TeamSummary>,
    #[serde(default)]
    pub limits: FavoriteLimits,
}

impl FavoritesSnapshot {
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Player => self.players.len(),
            EntityKind::Team => self.teams.len(),
        }
    }

    pub fn position(&self, key: EntityKey) -> Option<usize> {
        match key.kind {
            EntityKind::Player => self.players.iter().position(|p| p.id == key.id),
            EntityKind::Team => self.teams.iter().position(|t| t.id == key.id),
        }
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.position(key).is_some()
    }

    /// Append a placeholder for `key` unless an entity with that id is
    /// already present. Returns whether anything was appended.
    pub fn push_placeholder(&mut self, key: EntityKey) -> bool {
        if self.contains(key) {
            return false;
        }
        match key.kind {
            EntityKind::Player => self.players.push(PlayerSummary::placeholder(key.id)),
            EntityKind::Team => self.teams.push(TeamSummary::placeholder(key.id)),
        }
        true
    }

    /// Remove the entity with `key`'s id, returning it with its former index.
    pub fn take(&mut self, key: EntityKey) -> Option<(usize, FavoriteEntity)> {
        let index = self.position(key)?;
        let entity = match key.kind {
            EntityKind::Player => FavoriteEntity::Player(self.players.remove(index)),
            EntityKind::Team => FavoriteEntity::Team(self.teams.remove(index)),
        };
        Some((index, entity))
    }

    /// Put a previously taken entity back at `index` (clamped to the current
    /// length). No-op if an entity with the same id has reappeared meanwhile.
    pub fn restore(&mut self, index: usize, entity: FavoriteEntity) {
        if self.contains(entity.key()) {
            return;
        }
        match entity {
            FavoriteEntity::Player(p) => {
                let at = index.min(self.players.len());
                self.players.insert(at, p);
            }
            FavoriteEntity::Team(t) => {
                let at = index.min(self.teams.len());
                self.teams.insert(at, t);
            }
        }
    }

    /// Strip the placeholder for `key`, leaving a real entity untouched.
    pub fn strip_placeholder(&mut self, key: EntityKey) -> bool {
        let before = self.count(key.kind);
        match key.kind {
            EntityKind::Player => self.players.retain(|p| !(p.id == key.id && p.placeholder)),
            EntityKind::Team => self.teams.retain(|t| !(t.id == key.id && t.placeholder)),
        }
        self.count(key.kind) != before
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
