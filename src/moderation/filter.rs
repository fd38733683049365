//! Content filter rules and message snapshots
//!
//! Pure matching logic for the four filter rules: banned words, invite
//! links, spoilers, and newline floods. The service owns the pipeline
//! ordering and side effects; everything here just answers "does this
//! content trigger this rule".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::normalize::NormalizedContent;

/// Messages with more line breaks than this get deleted
pub const NEWLINE_LIMIT: usize = 100;

static INVITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?discord(?:(?:app)?\.com/invite|\.gg)/+([a-zA-Z0-9]+)/?").unwrap()
});

static SPOILER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\|\|(.*?)\|\|").unwrap());

/// One configured banned word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterWord {
    /// The word itself, stored lowercase
    pub word: String,
    /// Authors at or above this permission level are not filtered
    pub bypass_level: u8,
    /// Whether a match goes to the review channel
    pub notify: bool,
    /// Only match the word verbatim, never in the punctuation-stripped
    /// form. For short words where stripping causes false positives.
    #[serde(default)]
    pub literal_only: bool,
}

/// Which rule a message tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    BannedWord,
    Invite,
    Spoiler,
    ExcessiveNewlines,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::BannedWord => "banned word",
            ViolationKind::Invite => "invite link",
            ViolationKind::Spoiler => "spoiler",
            ViolationKind::ExcessiveNewlines => "excessive newlines",
        };
        write!(f, "{name}")
    }
}

/// Everything the filter pipeline did to one message.
///
/// A message can trip more than one rule before a rule stops the scan,
/// so this is a record of effects rather than a single verdict.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterOutcome {
    /// First rule that deleted the message, if any
    pub deleted_for: Option<ViolationKind>,
    /// Whether the message went to the review channel
    pub reported: bool,
    /// Case id of the automatic mute, if throttling tripped one
    pub auto_mute_case: Option<u64>,
}

impl FilterOutcome {
    /// Outcome for a message no rule touched
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    /// True when no rule touched the message
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.deleted_for.is_none()
    }
}

/// Snapshot of an inbound message, detached from any gateway type
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_tag: String,
    pub author_is_bot: bool,
    /// Role ids the author holds, for permission-level lookup
    pub author_roles: Vec<u64>,
    pub content: String,
    pub has_spoiler_attachment: bool,
}

/// Violation details handed to the review channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterReport {
    pub guild_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub author_tag: String,
    pub content: String,
    pub rule: ViolationKind,
    pub invite_code: Option<String>,
}

/// Whether a banned word shows up in the normalized content.
///
/// Matches as a substring of the folded text, or of the fully stripped
/// skeleton unless the word is marked literal-only.
#[must_use]
pub fn word_matches(word: &FilterWord, content: &NormalizedContent) -> bool {
    let needle = word.word.to_lowercase();
    if content.folded.contains(&needle) {
        return true;
    }
    !word.literal_only && content.skeleton.contains(&needle)
}

/// Extract invite codes from raw message content, in order of appearance
#[must_use]
pub fn invite_codes(content: &str) -> Vec<String> {
    INVITE_RE
        .captures_iter(content)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Whether raw content carries spoiler markup
#[must_use]
pub fn has_spoiler_markup(content: &str) -> bool {
    SPOILER_RE.is_match(content)
}

/// Whether raw content has more line breaks than allowed
#[must_use]
pub fn exceeds_newline_limit(content: &str) -> bool {
    content.matches('\n').count() > NEWLINE_LIMIT
}
