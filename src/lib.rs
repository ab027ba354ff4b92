//! Playtime tracker - player session playtime from rotated Minecraft server logs.

pub mod config;
pub mod display;
pub mod ingest;
pub mod playtime;
pub mod watcher;
