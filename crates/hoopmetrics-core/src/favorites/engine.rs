// Favorites store: shared snapshot, cache, and the optimistic update engine.
//
// A mutation moves through Speculating -> Confirming -> Settled | RolledBack:
//
// 1. The local snapshot is changed immediately and published to subscribers.
// 2. The remote add/remove is issued.
// 3. On success the cache is invalidated and a full snapshot is fetched and
//    published. On failure exactly the speculative change is undone.
//
// Mutations on the same entity are serialized through a per-entity queue.
// Mutations on different entities run concurrently; each reconciling fetch
// carries a generation so a late response never overwrites a newer one, and
// the speculative changes of still-pending mutations are re-applied on top of
// every server snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionReader;

use super::cache::FavoritesCache;
use super::client::FavoritesApi;
use super::error::FavoritesError;
use super::model::{EntityKey, EntityKind, FavoriteEntity, FavoritesSnapshot};

/// Capacity of the notification channel. Slow receivers lose the oldest.
const NOTICE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Add,
    Remove,
}

/// One requested change to the favorites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    pub action: MutationAction,
    pub key: EntityKey,
}

impl Mutation {
    pub fn add(key: EntityKey) -> Self {
        Self {
            action: MutationAction::Add,
            key,
        }
    }

    pub fn remove(key: EntityKey) -> Self {
        Self {
            action: MutationAction::Remove,
            key,
        }
    }

    fn is_add(&self) -> bool {
        self.action == MutationAction::Add
    }
}

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server accepted the change.
    Settled,
    /// The server call failed; the speculative change was undone.
    RolledBack(FavoritesError),
    /// No session token; nothing was changed or sent.
    NoSession,
    /// The initiator cancelled. See [`FavoritesStore::mutate`].
    Cancelled,
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MutationOutcome::Settled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A user-facing notification (toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// What a speculative change did, so it can be undone exactly.
#[derive(Debug, Clone)]
enum Fragment {
    /// A placeholder was appended.
    Appended,
    /// The entity was already present; nothing changed.
    AlreadyPresent,
    /// The entity was removed from `index`.
    Removed { index: usize, entity: FavoriteEntity },
    /// The entity was not present; nothing changed.
    WasAbsent,
}

#[derive(Debug, Clone)]
struct PendingMutation {
    mutation: Mutation,
    fragment: Fragment,
}

#[derive(Debug, Default)]
struct StoreState {
    snapshot: FavoritesSnapshot,
    /// In-flight mutations in the order they started. At most one per key,
    /// since the entity queue serializes same-key mutations.
    pending: Vec<PendingMutation>,
    /// Last fetch generation handed out.
    issued_generation: u64,
    /// Generation of the last server snapshot applied.
    applied_generation: u64,
    /// Bumped by `reset()`; work started under an older epoch is dropped.
    epoch: u64,
}

impl StoreState {
    fn apply_speculation(&mut self, mutation: Mutation) -> Fragment {
        match mutation.action {
            MutationAction::Add => {
                if self.snapshot.push_placeholder(mutation.key) {
                    Fragment::Appended
                } else {
                    Fragment::AlreadyPresent
                }
            }
            MutationAction::Remove => match self.snapshot.take(mutation.key) {
                Some((index, entity)) => Fragment::Removed { index, entity },
                None => Fragment::WasAbsent,
            },
        }
    }

    fn undo(&mut self, pending: PendingMutation) {
        match pending.fragment {
            Fragment::Appended => {
                self.snapshot.strip_placeholder(pending.mutation.key);
            }
            Fragment::Removed { index, entity } => self.snapshot.restore(index, entity),
            Fragment::AlreadyPresent | Fragment::WasAbsent => {}
        }
    }

    fn take_pending(&mut self, key: EntityKey) -> Option<PendingMutation> {
        let index = self.pending.iter().position(|p| p.mutation.key == key)?;
        Some(self.pending.remove(index))
    }

    /// Replace the snapshot with a server snapshot, then re-apply the
    /// speculative changes of mutations still awaiting the server, oldest
    /// first. Each fragment is re-recorded against the new base so a later
    /// rollback undoes what is actually in the snapshot.
    fn replace_with_server(&mut self, server: FavoritesSnapshot) {
        self.snapshot = server;
        let mut pending = std::mem::take(&mut self.pending);
        for entry in &mut pending {
            entry.fragment = self.apply_speculation(entry.mutation);
        }
        self.pending = pending;
    }
}

/// Per-entity FIFO of in-flight mutations.
#[derive(Default)]
struct EntityQueue {
    slots: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityQueue {
    async fn acquire(&self, key: EntityKey) -> QueuePermit<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        QueuePermit {
            queue: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct QueuePermit<'a> {
    queue: &'a EntityQueue,
    key: EntityKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for QueuePermit<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.queue.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map still holds the slot: nobody is queued behind us.
        if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// FavoritesStore
// ---------------------------------------------------------------------------

/// The single owner of a user's favorites snapshot and cache.
///
/// Share it behind an `Arc`. Consumers read through [`subscribe`] or the query
/// methods and change favorites only through the mutation methods.
///
/// [`subscribe`]: FavoritesStore::subscribe
pub struct FavoritesStore {
    api: Arc<dyn FavoritesApi>,
    session: SessionReader,
    cache: FavoritesCache,
    state: Mutex<StoreState>,
    queue: EntityQueue,
    /// Held across the cache check and fetch in `load` so concurrent
    /// loaders share one round trip.
    load_gate: tokio::sync::Mutex<()>,
    snapshot_tx: watch::Sender<Arc<FavoritesSnapshot>>,
    notice_tx: broadcast::Sender<Notice>,
}

impl FavoritesStore {
    pub fn new(api: Arc<dyn FavoritesApi>, session: SessionReader, cache: FavoritesCache) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(FavoritesSnapshot::default()));
        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            api,
            session,
            cache,
            state: Mutex::new(StoreState::default()),
            queue: EntityQueue::default(),
            load_gate: tokio::sync::Mutex::new(()),
            snapshot_tx,
            notice_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the current snapshot. Called with the state lock held so
    /// subscribers see changes in the order they were made.
    fn publish(&self, state: &StoreState) {
        self.snapshot_tx.send_replace(Arc::new(state.snapshot.clone()));
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine: nobody is showing toasts.
        let _ = self.notice_tx.send(notice);
    }

    // -- Read side --

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<FavoritesSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Receive success/error notifications.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notice_tx.subscribe()
    }

    /// The resident snapshot, which may be stale or mid-update.
    pub fn snapshot(&self) -> Arc<FavoritesSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn session(&self) -> &SessionReader {
        &self.session
    }

    pub fn cache(&self) -> &FavoritesCache {
        &self.cache
    }

    pub fn is_player_favorite(&self, id: i64) -> bool {
        self.snapshot().is_player_favorite(id)
    }

    pub fn is_team_favorite(&self, id: i64) -> bool {
        self.snapshot().is_team_favorite(id)
    }

    pub fn limits_text(&self, kind: EntityKind) -> String {
        self.snapshot().limits_text(kind)
    }

    /// Number of mutations currently speculating or confirming.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    // -- Loading --

    /// Return the resident snapshot if the cache is fresh, otherwise fetch.
    /// Loads that overlap a fetch already in progress wait for it and are
    /// then served from the cache it wrote.
    pub async fn load(&self) -> Result<Arc<FavoritesSnapshot>, FavoritesError> {
        if self.cache.is_fresh() {
            debug!("favorites served from cache");
            return Ok(self.snapshot());
        }
        let _gate = self.load_gate.lock().await;
        if self.cache.is_fresh() {
            debug!("favorites served from cache after concurrent load");
            return Ok(self.snapshot());
        }
        self.refresh().await
    }

    /// Fetch from the server regardless of cache state.
    pub async fn refresh(&self) -> Result<Arc<FavoritesSnapshot>, FavoritesError> {
        let Some(token) = self.session.token() else {
            self.notify(Notice::error(FavoritesError::NoSession.user_message()));
            return Err(FavoritesError::NoSession);
        };
        let epoch = self.lock().epoch;
        match self.fetch_and_apply(&token, None, epoch).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!("failed to load favorites: {e}");
                self.notify(Notice::error(e.user_message()));
                Err(e)
            }
        }
    }

    fn begin_fetch(&self) -> u64 {
        let mut state = self.lock();
        state.issued_generation += 1;
        state.issued_generation
    }

    /// Fetch a server snapshot and install it. `completing` names a mutation
    /// whose pending entry is retired in the same critical section, so its
    /// speculation is replaced by the server's view atomically. Nothing is
    /// installed if the store was reset since `epoch`.
    async fn fetch_and_apply(
        &self,
        token: &str,
        completing: Option<EntityKey>,
        epoch: u64,
    ) -> Result<Arc<FavoritesSnapshot>, FavoritesError> {
        let generation = self.begin_fetch();
        let result = self.api.fetch_snapshot(token).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(generation, "dropping fetch issued before reset");
            return result.map(|_| Arc::new(state.snapshot.clone()));
        }
        if let Some(key) = completing {
            state.take_pending(key);
        }
        match result {
            Ok(server) => {
                self.apply_server_snapshot(&mut state, generation, server);
                Ok(self.snapshot())
            }
            Err(e) => Err(e),
        }
    }

    fn apply_server_snapshot(&self, state: &mut StoreState, generation: u64, server: FavoritesSnapshot) {
        if generation < state.applied_generation {
            debug!(
                generation,
                applied = state.applied_generation,
                "discarding stale favorites snapshot"
            );
            return;
        }
        state.applied_generation = generation;
        self.cache.write(server.clone());
        state.replace_with_server(server);
        self.publish(state);
        info!(
            players = state.snapshot.players.len(),
            teams = state.snapshot.teams.len(),
            "favorites snapshot applied"
        );
    }

    /// Forget everything (logout). Mutations and fetches still in flight
    /// finish without touching the store.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.snapshot = FavoritesSnapshot::default();
        state.pending.clear();
        state.applied_generation = state.issued_generation;
        self.cache.clear();
        self.publish(&state);
        info!("favorites store reset");
    }

    // -- Mutations --

    pub async fn add_player(&self, id: i64) -> bool {
        self.mutate(Mutation::add(EntityKey::player(id)), &CancellationToken::new())
            .await
            .is_success()
    }

    pub async fn remove_player(&self, id: i64) -> bool {
        self.mutate(Mutation::remove(EntityKey::player(id)), &CancellationToken::new())
            .await
            .is_success()
    }

    pub async fn add_team(&self, id: i64) -> bool {
        self.mutate(Mutation::add(EntityKey::team(id)), &CancellationToken::new())
            .await
            .is_success()
    }

    pub async fn remove_team(&self, id: i64) -> bool {
        self.mutate(Mutation::remove(EntityKey::team(id)), &CancellationToken::new())
            .await
            .is_success()
    }

    /// Run one optimistic mutation to completion.
    ///
    /// Without a session token this returns [`MutationOutcome::NoSession`]
    /// before its first suspension point, with no local change and no remote
    /// call.
    ///
    /// `cancel` belongs to the initiator. Cancelled before the mutation
    /// starts (including while queued behind another mutation on the same
    /// entity): nothing happens. Cancelled while the remote call is in
    /// flight: the store is still settled, since other subscribers observe
    /// it, but no notification is emitted for the initiator.
    pub async fn mutate(&self, mutation: Mutation, cancel: &CancellationToken) -> MutationOutcome {
        let Some(token) = self.session.token() else {
            info!(key = %mutation.key, "mutation refused: no session");
            self.notify(Notice::error(FavoritesError::NoSession.user_message()));
            return MutationOutcome::NoSession;
        };

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(key = %mutation.key, "mutation cancelled while queued");
                return MutationOutcome::Cancelled;
            }
            permit = self.queue.acquire(mutation.key) => permit,
        };

        // Speculating
        let epoch = {
            let mut state = self.lock();
            let fragment = state.apply_speculation(mutation);
            state.pending.push(PendingMutation { mutation, fragment });
            self.publish(&state);
            state.epoch
        };
        debug!(key = %mutation.key, action = ?mutation.action, "speculative change published");

        // Confirming
        let result = match mutation.action {
            MutationAction::Add => self.api.add(&token, mutation.key.kind, mutation.key.id).await,
            MutationAction::Remove => {
                self.api
                    .remove(&token, mutation.key.kind, mutation.key.id)
                    .await
            }
        };

        let outcome = match result {
            Ok(()) => {
                self.settle(&token, mutation, epoch).await;
                MutationOutcome::Settled
            }
            Err(e) => {
                self.roll_back(mutation, epoch);
                MutationOutcome::RolledBack(e)
            }
        };

        if cancel.is_cancelled() {
            debug!(key = %mutation.key, "initiator gone; outcome not reported");
            return MutationOutcome::Cancelled;
        }

        match &outcome {
            MutationOutcome::Settled => {
                let verb = if mutation.is_add() { "added to" } else { "removed from" };
                self.notify(Notice::success(format!(
                    "{} {verb} favorites.",
                    capitalize(mutation.key.kind.noun())
                )));
            }
            MutationOutcome::RolledBack(e) => {
                self.notify(Notice::error(
                    e.mutation_message(mutation.key.kind, mutation.is_add()),
                ));
            }
            MutationOutcome::NoSession | MutationOutcome::Cancelled => {}
        }
        outcome
    }

    /// Confirming -> Settled: refetch and replace the speculation with the
    /// server's view.
    async fn settle(&self, token: &str, mutation: Mutation, epoch: u64) {
        self.cache.invalidate();
        match self.fetch_and_apply(token, Some(mutation.key), epoch).await {
            Ok(_) => info!(key = %mutation.key, "mutation settled"),
            Err(e) => {
                // The change went through; keep the speculative view until
                // the next load picks up the server state.
                warn!(key = %mutation.key, "mutation succeeded but refetch failed: {e}");
            }
        }
    }

    /// Confirming -> RolledBack.
    fn roll_back(&self, mutation: Mutation, epoch: u64) {
        let mut state = self.lock();
        if state.epoch != epoch {
            return;
        }
        if let Some(pending) = state.take_pending(mutation.key) {
            state.undo(pending);
        }
        self.publish(&state);
        warn!(key = %mutation.key, action = ?mutation.action, "mutation rolled back");
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
