// HTTP client for the backend favorites resource.
//
// One request per call, no retries. Status codes are mapped onto
// `FavoritesError` so the engine can decide between rollback messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::error::FavoritesError;
use super::model::{EntityKind, FavoritesSnapshot};

const USER_AGENT: &str = concat!("hoopmetrics/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// FavoritesApi
// ---------------------------------------------------------------------------

/// Remote favorites operations. Implemented over HTTP by
/// [`HttpFavoritesClient`]; tests substitute scripted doubles.
#[async_trait]
pub trait FavoritesApi: Send + Sync {
    /// `GET /favorites/`.
    async fn fetch_snapshot(&self, token: &str) -> Result<FavoritesSnapshot, FavoritesError>;

    /// `POST /favorites/{collection}/{id}`.
    async fn add(&self, token: &str, kind: EntityKind, id: i64) -> Result<(), FavoritesError>;

    /// `DELETE /favorites/{collection}/{id}`.
    async fn remove(&self, token: &str, kind: EntityKind, id: i64) -> Result<(), FavoritesError>;

    async fn add_player(&self, token: &str, player_id: i64) -> Result<(), FavoritesError> {
        self.add(token, EntityKind::Player, player_id).await
    }

    async fn remove_player(&self, token: &str, player_id: i64) -> Result<(), FavoritesError> {
        self.remove(token, EntityKind::Player, player_id).await
    }

    async fn add_team(&self, token: &str, team_id: i64) -> Result<(), FavoritesError> {
        self.add(token, EntityKind::Team, team_id).await
    }

    async fn remove_team(&self, token: &str, team_id: i64) -> Result<(), FavoritesError> {
        self.remove(token, EntityKind::Team, team_id).await
    }
}

// ---------------------------------------------------------------------------
// HttpFavoritesClient
// ---------------------------------------------------------------------------

pub struct HttpFavoritesClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFavoritesClient {
    /// Create a client rooted at `base_url` (e.g. `https://api.hoopmetrics.app`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Build a client with an optional request timeout. Without one the
    /// underlying client default applies.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, FavoritesError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_http(build_http(builder)?, base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn snapshot_url(&self) -> String {
        format!("{}/favorites/", self.base_url)
    }

    fn entity_url(&self, kind: EntityKind, id: i64) -> String {
        format!("{}/favorites/{}/{}", self.base_url, kind.collection(), id)
    }
}

#[async_trait]
impl FavoritesApi for HttpFavoritesClient {
    async fn fetch_snapshot(&self, token: &str) -> Result<FavoritesSnapshot, FavoritesError> {
        let url = self.snapshot_url();
        debug!(%url, "fetching favorites");
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        let response = check_status(response).await?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FavoritesError::Decode(e.to_string()))
    }

    async fn add(&self, token: &str, kind: EntityKind, id: i64) -> Result<(), FavoritesError> {
        let url = self.entity_url(kind, id);
        debug!(%url, "adding favorite");
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn remove(&self, token: &str, kind: EntityKind, id: i64) -> Result<(), FavoritesError> {
        let url = self.entity_url(kind, id);
        debug!(%url, "removing favorite");
        let response = self
            .http
            .delete(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

fn build_http(builder: reqwest::ClientBuilder) -> Result<reqwest::Client, FavoritesError> {
    builder
        .build()
        .map_err(|e| FavoritesError::InvalidClient(e.to_string()))
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Pass successful responses through; map everything else to an error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FavoritesError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FavoritesError::Unauthorized);
    }
    if status.is_server_error() {
        return Err(FavoritesError::Server {
            status: status.as_u16(),
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(FavoritesError::Validation {
        status: status.as_u16(),
        message: parse_detail(&body),
    })
}

/// Extract the `detail` message from an error body.
///
/// Accepts `{ "detail": "..." }` and the list form
/// `{ "detail": [{ "msg": "..." }, ...] }`, joining list messages with "; ".
pub(crate) fn parse_detail(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    match v.get("detail")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if msgs.is_empty() {
                None
            } else {
                Some(msgs.join("; "))
            }
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
