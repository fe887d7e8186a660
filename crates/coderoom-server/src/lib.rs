pub mod api;
pub mod config;
pub mod connection;
pub mod server;

pub use config::ServerConfig;
pub use server::{AppState, router, run, serve, spawn_session_sweeper};
