//! Escalation policy for warn point totals
//!
//! This module decides which automatic action, if any, a user's point total
//! calls for after a warn. It holds no state and performs no IO.

/// Point total at or above which a user is kicked once
pub const KICK_THRESHOLD: u64 = 400;

/// Point total at or above which a user is banned
pub const BAN_THRESHOLD: u64 = 600;

/// Automatic action chosen by the escalation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Escalation {
    /// No automatic action
    None,
    /// Remove the user from the guild once
    Kick,
    /// Ban the user from the guild
    Ban,
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Kick => write!(f, "kick"),
            Self::Ban => write!(f, "ban"),
        }
    }
}

/// Decide the automatic action for a user's point total after a warn.
///
/// At 600 or more points the user is banned, always, checked first. At 400
/// or more the user is kicked, but only once per user (`was_warn_kicked`)
/// and only while the user is still a guild member. Below 400 nothing
/// happens.
///
/// The kick is one-shot: once a user has been warn-kicked, further warns in
/// the 400..600 band do nothing until the total crosses the ban threshold.
#[must_use]
pub fn decide(points: u64, was_warn_kicked: bool, is_member: bool) -> Escalation {
    if points >= BAN_THRESHOLD {
        return Escalation::Ban;
    }
    if points >= KICK_THRESHOLD && !was_warn_kicked && is_member {
        return Escalation::Kick;
    }
    Escalation::None
}
