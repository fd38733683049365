//! Error types for the moderation engine
//!
//! This module defines the various errors that can occur during moderation
//! operations.

use thiserror::Error;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Input rejected before any state was touched
    #[error("invalid request: {0}")]
    Validation(String),

    /// No case with the given id exists for the user
    #[error("user {user_id} has no case with id {case_id}")]
    CaseNotFound { user_id: u64, case_id: u64 },

    /// Lift was attempted on a case that is not a warn
    #[error("case {0} is not a warn case")]
    NotAWarnCase(u64),

    /// Lift was attempted on a case that was already lifted
    #[error("case {0} was already lifted")]
    AlreadyLifted(u64),

    /// A point mutation would drive a user's total below zero
    #[error("warn points cannot go negative")]
    NegativePoints,

    /// Mute was attempted on a user who is already muted
    #[error("user {0} is already muted")]
    AlreadyMuted(u64),

    /// Unban was attempted on a user who is not banned
    #[error("user {0} is not banned")]
    NotBanned(u64),

    /// The backing store could not be read or written
    #[error("storage unavailable: {0}")]
    Persistence(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    Discord(#[from] Box<poise::serenity_prelude::Error>),
}

impl ModerationError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<poise::serenity_prelude::Error> for ModerationError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::Discord(Box::new(error))
    }
}

impl From<std::io::Error> for ModerationError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

impl From<serde_yaml::Error> for ModerationError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
