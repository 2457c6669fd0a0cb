// Integration tests for the favorites store.
//
// These drive the public API end-to-end: a cookie-jar session, the HTTP
// client, and the optimistic store, against a small in-process backend that
// keeps real favorites state and enforces a player cap.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use hoopmetrics_core::clock::ManualClock;
use hoopmetrics_core::favorites::{
    EntityKind, FavoritesCache, FavoritesStore, HttpFavoritesClient, Notice, NoticeLevel,
    DEFAULT_TTL_MS,
};
use hoopmetrics_core::session::{CookieFileStore, MemoryTokenStore, SessionReader, TokenStore};

// ===========================================================================
// Fake backend
// ===========================================================================

const TOKEN: &str = "integration-token";

#[derive(Default)]
struct Backend {
    players: Vec<i64>,
    teams: Vec<i64>,
    player_limit: i64,
    /// Respond 401 to everything (expired session).
    reject_auth: bool,
    /// `"METHOD PATH"` of every request, in arrival order.
    log: Vec<String>,
}

impl Backend {
    fn with_limit(player_limit: i64) -> Self {
        Self {
            player_limit,
            ..Self::default()
        }
    }

    fn snapshot_json(&self) -> String {
        let players: Vec<_> = self
            .players
            .iter()
            .map(|id| json!({ "id": id, "name": format!("Player {id}"), "position": "G" }))
            .collect();
        let teams: Vec<_> = self
            .teams
            .iter()
            .map(|id| json!({ "id": id, "full_name": format!("Team {id}"), "abbreviation": "TM" }))
            .collect();
        json!({
            "players": players,
            "teams": teams,
            "limits": { "players": self.player_limit, "teams": -1 },
        })
        .to_string()
    }

    /// Route one request, returning `(status line, body)`.
    fn handle(&mut self, method: &str, path: &str, authorization: Option<&str>) -> (&'static str, String) {
        self.log.push(format!("{method} {path}"));

        if self.reject_auth || authorization != Some(format!("Bearer {TOKEN}").as_str()) {
            return ("401 Unauthorized", r#"{"detail":"Not authenticated"}"#.to_string());
        }

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (method, segments.as_slice()) {
            ("GET", ["favorites"]) => ("200 OK", self.snapshot_json()),
            ("POST", ["favorites", collection, id]) => {
                let Ok(id) = id.parse::<i64>() else {
                    return ("422 Unprocessable Entity", r#"{"detail":[{"msg":"bad id"}]}"#.into());
                };
                if *collection == "players" {
                    if self.player_limit >= 0 && self.players.len() as i64 >= self.player_limit {
                        return (
                            "400 Bad Request",
                            r#"{"detail":"Favorite player limit reached for your plan"}"#.into(),
                        );
                    }
                    if !self.players.contains(&id) {
                        self.players.push(id);
                    }
                } else if !self.teams.contains(&id) {
                    self.teams.push(id);
                }
                ("201 Created", "{}".into())
            }
            ("DELETE", ["favorites", collection, id]) => {
                let id = id.parse::<i64>().unwrap_or_default();
                let list = if *collection == "players" {
                    &mut self.players
                } else {
                    &mut self.teams
                };
                list.retain(|&x| x != id);
                ("200 OK", "{}".into())
            }
            _ => ("404 Not Found", r#"{"detail":"Not Found"}"#.into()),
        }
    }
}

/// Serve `backend` on an ephemeral port until the test ends.
async fn spawn_backend(backend: Arc<Mutex<Backend>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let request = String::from_utf8_lossy(&buf).to_string();
                let mut lines = request.lines();
                let mut request_line = lines.next().unwrap_or_default().split_whitespace();
                let method = request_line.next().unwrap_or_default().to_string();
                let path = request_line.next().unwrap_or_default().to_string();
                let authorization = lines.find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("authorization")
                        .then(|| value.trim().to_string())
                });

                let (status, body) =
                    backend
                        .lock()
                        .unwrap()
                        .handle(&method, &path, authorization.as_deref());

                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            });
        }
    });

    format!("http://{addr}")
}

// ===========================================================================
// Test helpers
// ===========================================================================

fn build_store(base_url: &str, tokens: Arc<dyn TokenStore>) -> (FavoritesStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let cache = FavoritesCache::new(DEFAULT_TTL_MS, clock.clone());
    let client = HttpFavoritesClient::new(base_url);
    let store = FavoritesStore::new(Arc::new(client), SessionReader::new(tokens), cache);
    (store, clock)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

fn requests(backend: &Arc<Mutex<Backend>>) -> Vec<String> {
    backend.lock().unwrap().log.clone()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn add_and_remove_player_through_cookie_session() {
    let backend = Arc::new(Mutex::new(Backend::with_limit(2)));
    let base = spawn_backend(backend.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let jar = Arc::new(CookieFileStore::new(dir.path().join("cookies.toml")));
    jar.set_token(TOKEN).unwrap();
    let (store, _) = build_store(&base, jar);
    let mut notices = store.notices();

    let loaded = store.load().await.unwrap();
    assert!(loaded.players.is_empty());
    assert_eq!(store.limits_text(EntityKind::Player), "0/2");
    assert_eq!(store.limits_text(EntityKind::Team), "0/Unlimited");

    assert!(store.add_player(7).await);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.players.len(), 1);
    assert!(!snapshot.players[0].placeholder);
    assert_eq!(snapshot.players[0].name, "Player 7");
    assert!(store.is_player_favorite(7));
    assert_eq!(store.limits_text(EntityKind::Player), "1/2");
    assert_eq!(store.pending_count(), 0);

    assert!(store.remove_player(7).await);
    assert!(!store.is_player_favorite(7));
    assert_eq!(store.limits_text(EntityKind::Player), "0/2");

    let messages: Vec<String> = drain(&mut notices).into_iter().map(|n| n.message).collect();
    assert_eq!(
        messages,
        vec!["Player added to favorites.", "Player removed from favorites."]
    );
    assert_eq!(
        requests(&backend),
        vec![
            "GET /favorites/",
            "POST /favorites/players/7",
            "GET /favorites/",
            "DELETE /favorites/players/7",
            "GET /favorites/",
        ]
    );
}

#[tokio::test]
async fn limit_rejection_rolls_back_with_server_message() {
    let backend = Arc::new(Mutex::new(Backend::with_limit(1)));
    backend.lock().unwrap().players.push(1);
    let base = spawn_backend(backend.clone()).await;

    let (store, _) = build_store(&base, Arc::new(MemoryTokenStore::with_token(TOKEN)));
    store.load().await.unwrap();
    let mut notices = store.notices();
    let mut snapshots = store.subscribe();
    snapshots.borrow_and_update();

    assert!(!store.add_player(2).await);

    assert!(store.is_player_favorite(1));
    assert!(!store.is_player_favorite(2));
    assert_eq!(store.limits_text(EntityKind::Player), "1/1");
    assert!(snapshots.has_changed().unwrap(), "speculation and rollback were published");

    let notices = drain(&mut notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, "Favorite player limit reached for your plan");

    // Rejected adds are not followed by a refetch.
    assert_eq!(
        requests(&backend),
        vec!["GET /favorites/", "POST /favorites/players/2"]
    );
}

#[tokio::test]
async fn expired_session_rolls_back_remove() {
    let backend = Arc::new(Mutex::new(Backend::with_limit(-1)));
    backend.lock().unwrap().teams.extend([3, 4]);
    let base = spawn_backend(backend.clone()).await;

    let (store, _) = build_store(&base, Arc::new(MemoryTokenStore::with_token(TOKEN)));
    store.load().await.unwrap();
    backend.lock().unwrap().reject_auth = true;
    let mut notices = store.notices();

    assert!(!store.remove_team(3).await);

    let snapshot = store.snapshot();
    let ids: Vec<i64> = snapshot.teams.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![3, 4], "removed team restored at its position");

    let notices = drain(&mut notices);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.contains("log in again"));
}

#[tokio::test]
async fn no_session_sends_nothing() {
    let backend = Arc::new(Mutex::new(Backend::with_limit(-1)));
    let base = spawn_backend(backend.clone()).await;

    let (store, _) = build_store(&base, Arc::new(MemoryTokenStore::new()));
    let mut notices = store.notices();

    assert!(!store.add_team(10).await);
    assert!(store.load().await.is_err());

    assert!(!store.is_team_favorite(10));
    assert!(requests(&backend).is_empty());
    assert!(drain(&mut notices)
        .iter()
        .all(|n| n.level == NoticeLevel::Error));
}

#[tokio::test]
async fn load_is_served_from_cache_until_ttl_expires() {
    let backend = Arc::new(Mutex::new(Backend::with_limit(5)));
    backend.lock().unwrap().players.push(9);
    let base = spawn_backend(backend.clone()).await;

    let (store, clock) = build_store(&base, Arc::new(MemoryTokenStore::with_token(TOKEN)));

    store.load().await.unwrap();
    clock.advance(DEFAULT_TTL_MS);
    store.load().await.unwrap();
    assert_eq!(requests(&backend).len(), 1, "still fresh at exactly the TTL");

    clock.advance(1);
    store.load().await.unwrap();
    assert_eq!(requests(&backend).len(), 2);
    assert!(store.is_player_favorite(9));
}

#[tokio::test]
async fn reset_clears_store_and_cache() {
    let backend = Arc::new(Mutex::new(Backend::with_limit(-1)));
    backend.lock().unwrap().players.push(5);
    let base = spawn_backend(backend.clone()).await;

    let (store, _) = build_store(&base, Arc::new(MemoryTokenStore::with_token(TOKEN)));
    store.load().await.unwrap();
    assert!(store.is_player_favorite(5));

    store.reset();
    assert!(!store.is_player_favorite(5));
    assert!(store.cache().read().is_none());

    // The next load goes back to the server.
    store.load().await.unwrap();
    assert!(store.is_player_favorite(5));
    assert_eq!(requests(&backend).len(), 2);
}
