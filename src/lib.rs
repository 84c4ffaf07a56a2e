#![forbid(unsafe_code)]

//! Moderation and karma consistency engine for forum-style debate
//! threads: a vote ledger with derived per-user karma, a ban lifecycle
//! with immutable history, an appeal workflow that can reverse
//! moderation actions, an atomic thread-numbering authority, and a
//! reconciliation scheduler that repairs drift against the live chat
//! platform. The platform itself sits behind the [`platform`] traits;
//! an embedding process supplies the connector and feeds
//! [`events::PlatformEvent`]s into [`engine::ModerationEngine`].

pub mod appeals;
pub mod bans;
pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod karma;
pub mod numbering;
pub mod platform;
pub mod reconcile;
pub mod scheduler;
pub mod util;
