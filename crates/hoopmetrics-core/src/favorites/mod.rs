// Favorites synchronization: data model, remote client, snapshot cache,
// optimistic update engine, and derived queries.

pub mod cache;
pub mod client;
pub mod engine;
pub mod error;
pub mod model;
pub mod query;

pub use cache::{CacheEntry, FavoritesCache, DEFAULT_TTL_MS};
pub use client::{FavoritesApi, HttpFavoritesClient};
pub use engine::{FavoritesStore, Mutation, MutationAction, MutationOutcome, Notice, NoticeLevel};
pub use error::FavoritesError;
pub use model::{
    AverageStats, EntityKey, EntityKind, FavoriteEntity, FavoriteLimits, FavoritesSnapshot,
    PlayerSummary, TeamRef, TeamSummary,
};
