//! Huddle - real-time internal messaging core
//!
//! This library provides the messaging core of the Huddle workspace app:
//! conversations between users, live delivery of new messages over an event
//! channel, per-user unread tracking and desktop-notification dedup.
//! Everything outside the messaging core (authentication, file upload, the
//! rest of the product surface) lives in the host application.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod event;
pub mod membership;
pub mod notify;
pub mod session;
pub mod store;
pub mod unread;

#[cfg(test)]
mod tests;

/// Result type alias for Huddle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Huddle operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Event channel error (subscribe/unsubscribe/delivery)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Conversation store / directory error
    #[error("Store error: {0}")]
    Store(String),

    /// Platform notification error
    #[error("Notification error: {0}")]
    Notify(String),

    /// Session lifecycle error
    #[error("Session error: {0}")]
    Session(String),

    /// Settings load/save error
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Initialize the Huddle library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}
