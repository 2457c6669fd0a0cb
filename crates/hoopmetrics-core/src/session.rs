// Session token storage and advisory role decoding.
//
// The bearer token lives in a cookie jar (the `token` cookie). Its payload
// segment carries a `role` claim that is decoded WITHOUT signature
// verification: the role only drives client-side presentation, and the
// backend re-checks authorization on every call.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the cookie holding the bearer token.
pub const TOKEN_COOKIE: &str = "token";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access cookie jar {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize cookie jar: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ---------------------------------------------------------------------------
// Role tags
// ---------------------------------------------------------------------------

/// Subscription tier carried in the token's `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoleTag {
    #[default]
    Free,
    Premium,
    Ultimate,
    Admin,
}

impl RoleTag {
    /// Parse a claim value. Unknown values are `None`.
    pub fn from_claim(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Some(RoleTag::Free),
            "premium" => Some(RoleTag::Premium),
            "ultimate" => Some(RoleTag::Ultimate),
            "admin" => Some(RoleTag::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleTag::Free => "free",
            RoleTag::Premium => "premium",
            RoleTag::Ultimate => "ultimate",
            RoleTag::Admin => "admin",
        }
    }

    /// True for any paid plan. Advisory only.
    pub fn is_paid(&self) -> bool {
        !matches!(self, RoleTag::Free)
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode the `role` claim from a JWT-shaped token.
///
/// Never fails: a malformed token, an undecodable payload, a missing claim, or
/// an unrecognised role all yield [`RoleTag::Free`].
pub fn decode_role(token: &str) -> RoleTag {
    let Some(claims) = decode_claims(token) else {
        return RoleTag::Free;
    };
    claims
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(RoleTag::from_claim)
        .unwrap_or_default()
}

/// Decode the payload segment of a token into its JSON claims object.
pub fn decode_claims(token: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload)) = (parts.next(), parts.next()) else {
        debug!("token has no payload segment");
        return None;
    };
    if payload.is_empty() {
        return None;
    }

    // Tolerate padded payloads; the engine is configured for no padding.
    let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("token payload is not base64url: {e}");
            return None;
        }
    };

    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            debug!("token payload is not JSON: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Token stores
// ---------------------------------------------------------------------------

/// Client-side persistence for the bearer token.
pub trait TokenStore: Send + Sync {
    /// The current token, if any. Empty strings count as absent.
    fn token(&self) -> Option<String>;

    fn set_token(&self, token: &str) -> Result<(), SessionError>;

    fn clear(&self) -> Result<(), SessionError>;
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.is_empty())
    }

    fn set_token(&self, token: &str) -> Result<(), SessionError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Cookie jar persisted as a flat TOML table of `name = "value"` pairs.
///
/// The file is re-read on every access so that a login or logout performed by
/// another process is picked up without a restart.
#[derive(Debug, Clone)]
pub struct CookieFileStore {
    path: PathBuf,
}

impl CookieFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_jar(&self) -> BTreeMap<String, String> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("failed to read cookie jar {}: {e}", self.path.display());
                return BTreeMap::new();
            }
        };
        match toml::from_str(&text) {
            Ok(jar) => jar,
            Err(e) => {
                warn!("ignoring malformed cookie jar {}: {e}", self.path.display());
                BTreeMap::new()
            }
        }
    }

    fn write_jar(&self, jar: &BTreeMap<String, String>) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SessionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let text = toml::to_string(jar)?;
        std::fs::write(&self.path, text).map_err(|source| SessionError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl TokenStore for CookieFileStore {
    fn token(&self) -> Option<String> {
        self.read_jar()
            .remove(TOKEN_COOKIE)
            .filter(|t| !t.is_empty())
    }

    fn set_token(&self, token: &str) -> Result<(), SessionError> {
        let mut jar = self.read_jar();
        jar.insert(TOKEN_COOKIE.to_string(), token.to_string());
        self.write_jar(&jar)
    }

    fn clear(&self) -> Result<(), SessionError> {
        let mut jar = self.read_jar();
        if jar.remove(TOKEN_COOKIE).is_none() {
            return Ok(());
        }
        self.write_jar(&jar)
    }
}

// ---------------------------------------------------------------------------
// SessionReader
// ---------------------------------------------------------------------------

/// Read-only accessor over a token store.
#[derive(Clone)]
pub struct SessionReader {
    store: Arc<dyn TokenStore>,
}

impl SessionReader {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub fn token(&self) -> Option<String> {
        self.store.token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// The advisory plan tier. `Free` when signed out.
    pub fn role(&self) -> RoleTag {
        self.token()
            .map(|t| decode_role(&t))
            .unwrap_or_default()
    }
}

impl fmt::Debug for SessionReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReader")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
