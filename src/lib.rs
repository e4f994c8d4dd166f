pub mod auth;
pub mod config;
pub mod daemon;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod mail;
pub mod store;
pub mod summarizer;
pub mod watch;
