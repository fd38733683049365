//! Moderation engine for Warden
//!
//! Everything moderation-related lives here: the append-only case
//! ledger, warn point accounting, threshold escalation, timed mutes,
//! rate limiting, and the content filter. The rest of the bot talks to
//! [`ModerationService`] and never reaches past it.

mod case;
mod error;
mod filter;
mod gateway;
mod limiter;
mod normalize;
mod policy;
mod scheduler;
mod service;
mod store;

pub use case::{Case, CaseKind, PERMANENT};
pub use error::{ModerationError, ModerationResult};
pub use filter::{FilterOutcome, FilterReport, FilterWord, InboundMessage, ViolationKind};
pub use gateway::{MOD_LEVEL, ModGateway, SerenityGateway};
pub use limiter::RateLimiter;
pub use normalize::NormalizedContent;
pub use policy::{BAN_THRESHOLD, Escalation, KICK_THRESHOLD, decide};
pub use scheduler::UnmuteScheduler;
pub use service::{Actor, BotIdentity, ModerationService, Target};
pub use store::{ModerationStore, UserModerationState};
