//! nodeweave HTTP service.
//!
//! This crate exposes workflow definitions and the execution engine over
//! a JSON API, persisting everything in Postgres.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
