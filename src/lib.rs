//! vistrack: a visitor tracking engine.
//!
//! Collects behavioral signals from an embedding page, merges them with
//! durable visitor/session identity, and periodically upserts a
//! denormalized profile row into a Supabase-style table keyed by
//! `user_id`. A small read model serves the companion dashboard.
//!
//! Everything environment-shaped is an injected capability: storage
//! ([`storage::StateStorage`]), the upstream table ([`sync::ProfileSink`]),
//! input events ([`sensing::InputEvent`]), and the external goal callback
//! ([`goals::GoalRelay`]). The engine itself never reads the wall clock,
//! which keeps session boundaries and gating deterministic under test.

pub mod config;
pub mod goals;
pub mod models;
pub mod readmodel;
pub mod sensing;
pub mod storage;
pub mod sync;
pub mod tracker;
mod utils;

pub use config::TrackerConfig;
pub use goals::{GoalCall, GoalNotice, GoalRelay};
pub use models::{BehaviorSnapshot, PageContext, ProfileRow, VisitorState};
pub use sensing::InputEvent;
pub use storage::{JsonFileStorage, MemoryStorage, StateStorage};
pub use sync::{MemorySink, ProfileSink, SupabaseSink};
pub use tracker::{TrackerController, TrackerEngine};
