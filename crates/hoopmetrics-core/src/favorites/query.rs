// Derived read operations over a snapshot. Pure and synchronous.

use super::model::{EntityKey, EntityKind, FavoritesSnapshot, UNLIMITED};

impl FavoritesSnapshot {
    pub fn is_player_favorite(&self, id: i64) -> bool {
        self.contains(EntityKey::player(id))
    }

    pub fn is_team_favorite(&self, id: i64) -> bool {
        self.contains(EntityKey::team(id))
    }

    /// Usage against the cap for `kind`, e.g. `"2/5"` or `"2/Unlimited"`.
    pub fn limits_text(&self, kind: EntityKind) -> String {
        format_usage(self.count(kind), self.limits.get(kind))
    }

    /// Whether the server-reported cap has room for one more. Advisory: the
    /// engine never blocks an add on this.
    pub fn has_room(&self, kind: EntityKind) -> bool {
        let limit = self.limits.get(kind);
        limit == UNLIMITED || (self.count(kind) as i64) < limit
    }
}

/// Format `current/limit`, rendering the unlimited sentinel as `Unlimited`.
pub fn format_usage(current: usize, limit: i64) -> String {
    if limit == UNLIMITED {
        format!("{current}/Unlimited")
    } else {
        format!("{current}/{limit}")
    }
}
