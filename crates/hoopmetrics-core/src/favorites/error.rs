// Error taxonomy for favorites operations.

use thiserror::Error;

use super::model::EntityKind;

/// Fallback shown when the server rejects a change without a usable message.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FavoritesError {
    /// No session token; nothing was sent.
    #[error("authentication required")]
    NoSession,

    /// The backend could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the request (4xx other than 401/403), e.g. the
    /// favorites limit was reached. `message` is the server's `detail`.
    #[error("request rejected with status {status}: {}", .message.as_deref().unwrap_or("no detail"))]
    Validation { status: u16, message: Option<String> },

    /// 401 or 403.
    #[error("unauthorized")]
    Unauthorized,

    /// 5xx.
    #[error("server error: status {status}")]
    Server { status: u16 },

    /// The HTTP client or a request could not be built (bad configuration,
    /// not a transport failure).
    #[error("invalid HTTP client configuration: {0}")]
    InvalidClient(String),

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl FavoritesError {
    /// Message suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            FavoritesError::NoSession => "Please log in to manage your favorites.".to_string(),
            FavoritesError::Unauthorized => "Your session has expired. Please log in again.".to_string(),
            FavoritesError::Validation {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }

    /// Message for a failed add/remove, using the server's message verbatim
    /// when it supplied one.
    pub fn mutation_message(&self, kind: EntityKind, adding: bool) -> String {
        match self {
            FavoritesError::NoSession | FavoritesError::Unauthorized => self.user_message(),
            FavoritesError::Validation {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            _ => {
                let verb = if adding { "add" } else { "remove" };
                let direction = if adding { "to" } else { "from" };
                format!("Failed to {verb} {} {direction} favorites.", kind.noun())
            }
        }
    }
}

impl From<reqwest::Error> for FavoritesError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FavoritesError::InvalidClient(e.to_string())
        } else if e.is_decode() {
            FavoritesError::Decode(e.to_string())
        } else {
            FavoritesError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_uses_server_message() {
        let err = FavoritesError::Validation {
            status: 400,
            message: Some("Favorite player limit reached for your plan".into()),
        };
        assert_eq!(
            err.mutation_message(EntityKind::Player, true),
            "Favorite player limit reached for your plan"
        );
        assert_eq!(err.user_message(), "Favorite player limit reached for your plan");
    }

    #[test]
    fn validation_without_message_falls_back() {
        let err = FavoritesError::Validation {
            status: 422,
            message: None,
        };
        assert_eq!(
            err.mutation_message(EntityKind::Team, false),
            "Failed to remove team from favorites."
        );
        assert_eq!(err.user_message(), GENERIC_FAILURE);

        let blank = FavoritesError::Validation {
            status: 400,
            message: Some("   ".into()),
        };
        assert_eq!(
            blank.mutation_message(EntityKind::Player, true),
            "Failed to add player to favorites."
        );
    }

    #[test]
    fn network_errors_are_generic() {
        let err = FavoritesError::Network("connection refused".into());
        assert_eq!(
            err.mutation_message(EntityKind::Player, true),
            "Failed to add player to favorites."
        );
    }

    #[test]
    fn auth_errors_ask_for_login() {
        assert!(FavoritesError::NoSession.user_message().contains("log in"));
        assert!(FavoritesError::Unauthorized
            .mutation_message(EntityKind::Team, true)
            .contains("log in again"));
    }
}
