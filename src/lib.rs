// Public API for the demo binary and integration tests

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod prefs;
pub mod protocol;
pub mod realtime;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod types;
pub mod view;
