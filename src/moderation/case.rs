//! Moderation case records
//!
//! This module defines the case record structure stored in the ledger and the
//! lift transition for warn cases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ModerationError, ModerationResult};

/// The kind of action a case documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseKind {
    /// Points were added to a user's total
    Warn,
    /// A warn case was annulled and its points returned
    LiftWarn,
    /// Points were removed without reference to a specific warn
    RemovePoints,
    /// User was removed from the guild
    Kick,
    /// User was banned from the guild
    Ban,
    /// A ban was removed
    Unban,
    /// User was muted, possibly until a deadline
    Mute,
    /// A mute was removed ahead of its deadline
    Unmute,
}

impl std::fmt::Display for CaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warn => write!(f, "WARN"),
            Self::LiftWarn => write!(f, "LIFTWARN"),
            Self::RemovePoints => write!(f, "REMOVEPOINTS"),
            Self::Kick => write!(f, "KICK"),
            Self::Ban => write!(f, "BAN"),
            Self::Unban => write!(f, "UNBAN"),
            Self::Mute => write!(f, "MUTE"),
            Self::Unmute => write!(f, "UNMUTE"),
        }
    }
}

/// Punishment text recorded on cases with no expiry
pub const PERMANENT: &str = "PERMANENT";

/// A single entry in a user's moderation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    /// Sequential id, unique within the guild
    pub id: u64,
    /// Guild the case was issued in
    pub guild_id: u64,
    /// What kind of action this case documents
    pub kind: CaseKind,
    /// User the case is filed against
    pub user_id: u64,
    /// Moderator who took the action
    pub moderator_id: u64,
    /// Moderator tag at the time of the action
    pub moderator_tag: String,
    /// Sanitized reason supplied by the moderator
    pub reason: String,
    /// Human-readable punishment summary (point value, duration, "PERMANENT")
    pub punishment: String,
    /// When the case was created
    pub created_at: DateTime<Utc>,
    /// When a timed punishment ends, if it has a deadline
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether a warn case has been annulled
    pub lifted: bool,
    /// Moderator who lifted the case (if it has been)
    pub lifted_by: Option<u64>,
    /// Tag of the lifting moderator (if it has been)
    pub lifted_by_tag: Option<String>,
    /// Reason given for the lift (if it has been)
    pub lifted_reason: Option<String>,
    /// When the case was lifted (if it has been)
    pub lifted_at: Option<DateTime<Utc>>,
}

impl Default for Case {
    fn default() -> Self {
        Self {
            id: 0,
            guild_id: 0,
            kind: CaseKind::Warn,
            user_id: 0,
            moderator_id: 0,
            moderator_tag: String::new(),
            reason: String::new(),
            punishment: String::new(),
            created_at: Utc::now(),
            expires_at: None,
            lifted: false,
            lifted_by: None,
            lifted_by_tag: None,
            lifted_reason: None,
            lifted_at: None,
        }
    }
}

impl Case {
    /// Create a new case record
    pub fn new(
        id: u64,
        guild_id: u64,
        kind: CaseKind,
        user_id: u64,
        moderator_id: u64,
        moderator_tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id,
            guild_id,
            kind,
            user_id,
            moderator_id,
            moderator_tag: moderator_tag.into(),
            reason: reason.into(),
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Set the punishment summary
    #[must_use]
    pub fn with_punishment(mut self, punishment: impl Into<String>) -> Self {
        self.punishment = punishment.into();
        self
    }

    /// Set the punishment deadline
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The point value this warn case carries
    ///
    /// # Errors
    /// Returns an error if the punishment field does not hold a point value
    pub fn warn_points(&self) -> ModerationResult<u64> {
        self.punishment.parse::<u64>().map_err(|_| {
            ModerationError::validation(format!(
                "case {} does not carry a point value",
                self.id
            ))
        })
    }

    /// Annul this warn case, marking it lifted
    ///
    /// # Errors
    /// Returns an error if the case is not a warn or was already lifted
    pub fn lift(
        &mut self,
        moderator_id: u64,
        moderator_tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> ModerationResult<()> {
        if self.kind != CaseKind::Warn {
            return Err(ModerationError::NotAWarnCase(self.id));
        }
        if self.lifted {
            return Err(ModerationError::AlreadyLifted(self.id));
        }

        self.lifted = true;
        self.lifted_by = Some(moderator_id);
        self.lifted_by_tag = Some(moderator_tag.into());
        self.lifted_reason = Some(reason.into());
        self.lifted_at = Some(Utc::now());

        info!(
            case_id = %self.id,
            user_id = %self.user_id,
            guild_id = %self.guild_id,
            lifted_by = %moderator_id,
            "Warn case lifted"
        );

        Ok(())
    }

    /// Check if this is a warn case still counting against the user
    #[must_use]
    pub fn is_active_warn(&self) -> bool {
        self.kind == CaseKind::Warn && !self.lifted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_kind_display() {
        assert_eq!(CaseKind::Warn.to_string(), "WARN");
        assert_eq!(CaseKind::LiftWarn.to_string(), "LIFTWARN");
        assert_eq!(CaseKind::RemovePoints.to_string(), "REMOVEPOINTS");
        assert_eq!(CaseKind::Kick.to_string(), "KICK");
        assert_eq!(CaseKind::Ban.to_string(), "BAN");
        assert_eq!(CaseKind::Unban.to_string(), "UNBAN");
        assert_eq!(CaseKind::Mute.to_string(), "MUTE");
        assert_eq!(CaseKind::Unmute.to_string(), "UNMUTE");
    }

    #[test]
    fn test_lift_transition() {
        let mut case = Case::new(1, 67890, CaseKind::Warn, 12345, 777, "mod#0001", "spamming")
            .with_punishment("50");

        // Initial state is unlifted
        assert!(!case.lifted);
        assert!(case.is_active_warn());
        assert_eq!(case.warn_points().unwrap(), 50);

        case.lift(888, "lead#0002", "appealed").unwrap();
        assert!(case.lifted);
        assert!(!case.is_active_warn());
        assert_eq!(case.lifted_by, Some(888));
        assert_eq!(case.lifted_by_tag.as_deref(), Some("lead#0002"));
        assert_eq!(case.lifted_reason.as_deref(), Some("appealed"));
        assert!(case.lifted_at.is_some());

        // Cannot lift twice
        let err = case.lift(888, "lead#0002", "again").unwrap_err();
        assert!(matches!(err, ModerationError::AlreadyLifted(1)));
    }

    #[test]
    fn test_lift_rejects_non_warn_cases() {
        let mut case = Case::new(2, 67890, CaseKind::Kick, 12345, 777, "mod#0001", "rude");

        let err = case.lift(888, "lead#0002", "oops").unwrap_err();
        assert!(matches!(err, ModerationError::NotAWarnCase(2)));
        assert!(!case.lifted);
    }

    #[test]
    fn test_warn_points_requires_numeric_punishment() {
        let case = Case::new(3, 67890, CaseKind::Mute, 12345, 777, "mod#0001", "loud")
            .with_punishment(PERMANENT);

        assert!(case.warn_points().is_err());
    }

    #[test]
    fn test_case_serialization() {
        let case = Case::new(4, 67890, CaseKind::Warn, 12345, 777, "mod#0001", "spam")
            .with_punishment("100");

        let yaml = serde_yaml::to_string(&case).unwrap();
        let parsed: Case = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.id, 4);
        assert_eq!(parsed.kind, CaseKind::Warn);
        assert_eq!(parsed.punishment, "100");
        assert!(!parsed.lifted);
    }
}
