// Library root: re-exports all modules so the CLI front end and integration
// tests can reach the favorites store, the session reader, and config loading.

pub mod clock;
pub mod config;
pub mod favorites;
pub mod session;
