//! Moderation service
//!
//! Ties the case ledger, point accumulator, escalation policy, unmute
//! scheduler, rate limiters, and content filter together behind one
//! cloneable handle. Commands and event handlers call into this and
//! nothing else.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::data::{ConfigStore, GuildConfig};
use crate::util::format_duration;

use super::filter::{self, FilterOutcome, FilterReport, InboundMessage, ViolationKind};
use super::gateway::{MOD_LEVEL, ModGateway};
use super::limiter::RateLimiter;
use super::normalize::NormalizedContent;
use super::policy::{self, Escalation};
use super::scheduler::UnmuteScheduler;
use super::store::ModerationStore;
use super::{Case, CaseKind, ModerationError, ModerationResult, PERMANENT};

/// Lookup command guard: per channel, three commands per window
const COMMAND_GUARD_CAPACITY: u32 = 3;
const COMMAND_GUARD_WINDOW_SECS: i64 = 15;

/// Filter violation throttle: per user, two violations per window
const FILTER_THROTTLE_CAPACITY: u32 = 2;
const FILTER_THROTTLE_WINDOW_SECS: i64 = 10;

/// How long an automatic filter-spam mute lasts
const AUTO_MUTE_SECONDS: i64 = 15 * 60;
/// Reason recorded on automatic filter-spam mutes
const AUTO_MUTE_REASON: &str = "Filter spam";

/// Reasons recorded on threshold escalation cases
const BAN_ESCALATION_REASON: &str = "600 or more warn points reached.";
const KICK_ESCALATION_REASON: &str = "400 or more warn points reached.";

/// The moderator performing an action
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: u64,
    /// Display tag snapshotted onto the case record
    pub tag: String,
}

/// The user an action applies to.
///
/// Warn and ban work on users who are not in the guild; the distinction
/// matters because the kick escalation only applies to present members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A user currently in the guild
    Member(u64),
    /// A user known only by id
    User(u64),
}

impl Target {
    /// The wrapped user id
    #[must_use]
    pub fn user_id(self) -> u64 {
        match self {
            Target::Member(user_id) | Target::User(user_id) => user_id,
        }
    }

    /// Whether the user is in the guild
    #[must_use]
    pub fn is_member(self) -> bool {
        matches!(self, Target::Member(_))
    }
}

/// Identity automatic actions run under
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub user_id: u64,
    pub tag: String,
}

/// Service for moderation operations
#[derive(Clone)]
pub struct ModerationService {
    /// Case ledger and per-user moderation state
    pub store: ModerationStore,
    /// Pending unmute timers
    pub scheduler: UnmuteScheduler,
    /// Discord side effects
    gateway: Arc<dyn ModGateway>,
    /// Per-guild configuration
    configs: ConfigStore,
    /// Guard for throttled lookup commands, keyed by channel
    command_guard: RateLimiter,
    /// Throttle for filter violations, keyed by user
    filter_throttle: RateLimiter,
    /// Identity automatic actions run under
    identity: Arc<BotIdentity>,
}

impl ModerationService {
    /// Create a new moderation service
    pub fn new(
        store: ModerationStore,
        scheduler: UnmuteScheduler,
        gateway: Arc<dyn ModGateway>,
        configs: ConfigStore,
        identity: BotIdentity,
    ) -> Self {
        Self {
            store,
            scheduler,
            gateway,
            configs,
            command_guard: RateLimiter::new(COMMAND_GUARD_CAPACITY, COMMAND_GUARD_WINDOW_SECS),
            filter_throttle: RateLimiter::new(
                FILTER_THROTTLE_CAPACITY,
                FILTER_THROTTLE_WINDOW_SECS,
            ),
            identity: Arc::new(identity),
        }
    }

    /// Warn a user for a number of points.
    ///
    /// Records the warn case, adds the points, then escalates: 600 or
    /// more total points bans the user, 400 or more kicks a member once
    /// per user. An escalation that fails against Discord is logged and
    /// the escalation case stands.
    pub async fn warn(
        &self,
        guild_id: u64,
        actor: &Actor,
        target: Target,
        points: u64,
        reason: &str,
    ) -> ModerationResult<Case> {
        if points < 1 {
            return Err(ModerationError::validation("points can't be lower than 1"));
        }
        let delta = i64::try_from(points)
            .map_err(|_| ModerationError::validation("point amount is too large"))?;

        let user_id = target.user_id();
        let case = self
            .record_case(
                guild_id,
                actor,
                user_id,
                CaseKind::Warn,
                reason,
                Some(points.to_string()),
            )
            .await?;
        let total = self.store.adjust_points(user_id, delta).await?;
        let state = self.store.user_state(user_id);

        info!(
            user_id = %user_id,
            case_id = case.id,
            points = total,
            "User warned"
        );

        let mut escalation_case = None;
        match policy::decide(total, state.was_warn_kicked, target.is_member()) {
            Escalation::Ban => {
                self.notify_quietly(user_id, "You were banned for reaching 600 or more warn points.")
                    .await;
                let auto = self
                    .record_case(
                        guild_id,
                        actor,
                        user_id,
                        CaseKind::Ban,
                        BAN_ESCALATION_REASON,
                        Some(PERMANENT.to_string()),
                    )
                    .await?;
                if let Err(e) = self.gateway.ban(guild_id, user_id, BAN_ESCALATION_REASON).await {
                    error!(user_id = %user_id, error = %e, "Escalation ban failed");
                }
                escalation_case = Some(auto);
            }
            Escalation::Kick => {
                // Latch before the kick so the threshold fires once even
                // if the kick itself fails.
                self.store.set_warn_kicked(user_id).await?;
                self.notify_quietly(
                    user_id,
                    "You were kicked for reaching 400 or more warn points. You will be banned at 600 points.",
                )
                .await;
                let auto = self
                    .record_case(
                        guild_id,
                        actor,
                        user_id,
                        CaseKind::Kick,
                        KICK_ESCALATION_REASON,
                        None,
                    )
                    .await?;
                if let Err(e) = self.gateway.kick(guild_id, user_id, KICK_ESCALATION_REASON).await {
                    error!(user_id = %user_id, error = %e, "Escalation kick failed");
                }
                escalation_case = Some(auto);
            }
            Escalation::None => {
                if target.is_member() {
                    self.notify_quietly(
                        user_id,
                        "You were warned. You will be kicked at 400 warn points and banned at 600.",
                    )
                    .await;
                }
            }
        }

        self.post_case_log(guild_id, &case).await;
        if let Some(auto) = escalation_case {
            self.post_case_log(guild_id, &auto).await;
        }
        Ok(case)
    }

    /// Lift a warn case and return its points to the user
    pub async fn lift_warn(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        case_id: u64,
        reason: &str,
    ) -> ModerationResult<Case> {
        let lifted = self
            .store
            .lift_warn(user_id, case_id, actor.user_id, &actor.tag, reason)
            .await?;
        let points = lifted.warn_points()?;
        let delta = i64::try_from(points)
            .map_err(|_| ModerationError::validation("point amount is too large"))?;
        self.store.adjust_points(user_id, -delta).await?;

        self.notify_quietly(user_id, "Your warn was lifted.").await;
        self.post_case_log(guild_id, &lifted).await;
        Ok(lifted)
    }

    /// Remove warn points from a user without touching any case
    pub async fn remove_points(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        points: u64,
        reason: &str,
    ) -> ModerationResult<Case> {
        if points < 1 {
            return Err(ModerationError::validation("points can't be lower than 1"));
        }
        let delta = i64::try_from(points)
            .map_err(|_| ModerationError::validation("point amount is too large"))?;

        // The deduction happens first; a user without enough points is
        // rejected before any case is written.
        self.store.adjust_points(user_id, -delta).await?;
        let case = self
            .record_case(
                guild_id,
                actor,
                user_id,
                CaseKind::RemovePoints,
                reason,
                Some(points.to_string()),
            )
            .await?;

        self.notify_quietly(user_id, "Your warn points were removed.").await;
        self.post_case_log(guild_id, &case).await;
        Ok(case)
    }

    /// Kick a member from the guild
    pub async fn kick(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        reason: &str,
    ) -> ModerationResult<Case> {
        let case = self
            .record_case(guild_id, actor, user_id, CaseKind::Kick, reason, None)
            .await?;
        self.notify_quietly(user_id, "You have been kicked.").await;
        self.gateway.kick(guild_id, user_id, reason).await?;
        self.post_case_log(guild_id, &case).await;
        Ok(case)
    }

    /// Ban a user, whether or not they are in the guild
    pub async fn ban(
        &self,
        guild_id: u64,
        actor: &Actor,
        target: Target,
        reason: &str,
    ) -> ModerationResult<Case> {
        let user_id = target.user_id();
        let case = self
            .record_case(
                guild_id,
                actor,
                user_id,
                CaseKind::Ban,
                reason,
                Some(PERMANENT.to_string()),
            )
            .await?;
        self.notify_quietly(user_id, "You have been banned.").await;
        self.gateway.ban(guild_id, user_id, reason).await?;
        self.post_case_log(guild_id, &case).await;
        Ok(case)
    }

    /// Lift a user's ban.
    ///
    /// The platform call goes first: a user who is not actually banned
    /// surfaces as `NotBanned` and no case is recorded.
    pub async fn unban(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        reason: &str,
    ) -> ModerationResult<Case> {
        self.gateway.unban(guild_id, user_id).await?;
        let case = self
            .record_case(guild_id, actor, user_id, CaseKind::Unban, reason, None)
            .await?;
        self.post_case_log(guild_id, &case).await;
        Ok(case)
    }

    /// Mute a member, timed or permanent.
    ///
    /// A timed mute stores the expiry on the case, renders the duration
    /// into the punishment text, and schedules the unmute timer. A new
    /// timed mute for an already-muted user is rejected, never stacked.
    pub async fn mute(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        duration: Option<Duration>,
        reason: &str,
    ) -> ModerationResult<Case> {
        let config = self.configs.guild(guild_id);
        let Some(mute_role) = config.mute_role_id else {
            return Err(ModerationError::validation(
                "no mute role is configured for this guild",
            ));
        };
        if self.store.is_muted(user_id) {
            return Err(ModerationError::AlreadyMuted(user_id));
        }

        let case_id = self.store.next_case_id(guild_id).await?;
        let mut case = Case::new(
            case_id,
            guild_id,
            CaseKind::Mute,
            user_id,
            actor.user_id,
            &actor.tag,
            reason,
        );
        if let Some(duration) = duration {
            let fire_at = Utc::now() + duration;
            case = case
                .with_expiry(fire_at)
                .with_punishment(format_duration(duration));
            self.spawn_unmute_timer(guild_id, user_id, fire_at);
        } else {
            case = case.with_punishment(PERMANENT);
        }

        self.store.add_case(case.clone()).await?;
        self.store.set_muted(user_id, true).await?;
        self.gateway.add_mute_role(guild_id, user_id, mute_role).await?;

        self.post_case_log(guild_id, &case).await;
        self.notify_quietly(user_id, "You have been muted.").await;
        Ok(case)
    }

    /// Unmute a member and cancel any pending unmute timer
    pub async fn unmute(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        reason: &str,
    ) -> ModerationResult<Case> {
        let config = self.configs.guild(guild_id);
        let Some(mute_role) = config.mute_role_id else {
            return Err(ModerationError::validation(
                "no mute role is configured for this guild",
            ));
        };

        self.gateway.remove_mute_role(guild_id, user_id, mute_role).await?;
        self.store.set_muted(user_id, false).await?;
        self.scheduler.cancel(user_id);

        let case = self
            .record_case(guild_id, actor, user_id, CaseKind::Unmute, reason, None)
            .await?;
        self.notify_quietly(user_id, "You have been unmuted.").await;
        self.post_case_log(guild_id, &case).await;
        Ok(case)
    }

    /// Mute a user for filter spam, as the bot.
    ///
    /// Silently skipped when the user is already muted.
    pub async fn auto_mute_for_spam(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<Option<Case>> {
        let actor = Actor {
            user_id: self.identity.user_id,
            tag: self.identity.tag.clone(),
        };
        match self
            .mute(
                guild_id,
                &actor,
                user_id,
                Some(Duration::seconds(AUTO_MUTE_SECONDS)),
                AUTO_MUTE_REASON,
            )
            .await
        {
            Ok(case) => {
                info!(user_id = %user_id, case_id = case.id, "Auto-muted for filter spam");
                Ok(Some(case))
            }
            Err(ModerationError::AlreadyMuted(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Finish a timed mute whose timer fired.
    ///
    /// Removes the role and clears the muted flag; no case is recorded
    /// for a natural expiry.
    pub async fn complete_scheduled_unmute(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<()> {
        let config = self.configs.guild(guild_id);
        if let Some(mute_role) = config.mute_role_id {
            if let Err(e) = self.gateway.remove_mute_role(guild_id, user_id, mute_role).await {
                warn!(user_id = %user_id, error = %e, "Failed to remove mute role on expiry");
            }
        }
        self.store.set_muted(user_id, false).await?;
        info!(user_id = %user_id, guild_id = %guild_id, "Mute expired");
        Ok(())
    }

    /// Restore unmute timers for a guild from persisted state.
    ///
    /// Returns how many timers were scheduled. Deadlines that passed
    /// while the process was down fire immediately.
    pub fn on_startup(&self, guild_id: u64) -> usize {
        let pending = self.store.scheduled_unmutes(guild_id);
        let count = pending.len();
        for (user_id, fire_at) in pending {
            self.spawn_unmute_timer(guild_id, user_id, fire_at);
        }
        if count > 0 {
            info!(guild_id = %guild_id, count, "Restored scheduled unmutes");
        }
        count
    }

    /// Run the content filter over one inbound message.
    ///
    /// Rules run in a fixed order: banned words, invite links, spoilers,
    /// newline floods. A banned word that is not marked notify deletes
    /// the message but lets the remaining rules run; everything else
    /// stops the scan. Word and invite violations charge the per-user
    /// throttle; exhausting it mutes the user for filter spam.
    pub async fn on_message(&self, message: &InboundMessage) -> ModerationResult<FilterOutcome> {
        if message.author_is_bot {
            return Ok(FilterOutcome::clean());
        }
        let config = self.configs.guild(message.guild_id);
        if config.filter_excluded_channels.contains(&message.channel_id) {
            return Ok(FilterOutcome::clean());
        }

        let level = config.level_for(&message.author_roles);
        let mut outcome = FilterOutcome::clean();

        let normalized = NormalizedContent::new(&message.content);
        if !normalized.folded.is_empty() {
            let mut charged = false;
            for word in &config.filter_words {
                if level >= word.bypass_level || !filter::word_matches(word, &normalized) {
                    continue;
                }
                self.delete_quietly(message, &mut outcome, ViolationKind::BannedWord)
                    .await;
                if !charged {
                    charged = true;
                    self.charge_filter_throttle(message, &mut outcome).await;
                }
                if word.notify {
                    self.report_quietly(&config, message, ViolationKind::BannedWord, None)
                        .await;
                    outcome.reported = true;
                    return Ok(outcome);
                }
            }
        }

        if level < MOD_LEVEL && !message.content.is_empty() {
            for code in filter::invite_codes(&message.content) {
                let destination = self.gateway.resolve_invite(&code).await?;
                let allowed =
                    destination.is_some_and(|guild| config.invite_allowlist.contains(&guild));
                if !allowed {
                    self.delete_quietly(message, &mut outcome, ViolationKind::Invite)
                        .await;
                    self.charge_filter_throttle(message, &mut outcome).await;
                    self.report_quietly(&config, message, ViolationKind::Invite, Some(code))
                        .await;
                    outcome.reported = true;
                    return Ok(outcome);
                }
            }
        }

        if level < MOD_LEVEL
            && (filter::has_spoiler_markup(&message.content) || message.has_spoiler_attachment)
        {
            self.delete_quietly(message, &mut outcome, ViolationKind::Spoiler)
                .await;
            return Ok(outcome);
        }

        if level < MOD_LEVEL && filter::exceeds_newline_limit(&message.content) {
            let exempt = config
                .newline_exempt_role_id
                .is_some_and(|role| message.author_roles.contains(&role));
            if !exempt {
                self.delete_quietly(message, &mut outcome, ViolationKind::ExcessiveNewlines)
                    .await;
                self.charge_filter_throttle(message, &mut outcome).await;
                return Ok(outcome);
            }
        }

        Ok(outcome)
    }

    /// Guard for throttled lookup commands.
    ///
    /// Moderators and the bot-spam channel are exempt; everyone else
    /// shares a per-channel budget.
    pub fn check_command_guard(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_level: u8,
    ) -> ModerationResult<()> {
        if author_level >= MOD_LEVEL {
            return Ok(());
        }
        let config = self.configs.guild(guild_id);
        if config.botspam_channel_id == Some(channel_id) {
            return Ok(());
        }
        if self.command_guard.try_acquire(channel_id) {
            Ok(())
        } else {
            Err(ModerationError::validation("This command is on cooldown."))
        }
    }

    /// Create and persist one case with the next id for the guild
    async fn record_case(
        &self,
        guild_id: u64,
        actor: &Actor,
        user_id: u64,
        kind: CaseKind,
        reason: &str,
        punishment: Option<String>,
    ) -> ModerationResult<Case> {
        let case_id = self.store.next_case_id(guild_id).await?;
        let mut case = Case::new(
            case_id,
            guild_id,
            kind,
            user_id,
            actor.user_id,
            &actor.tag,
            reason,
        );
        if let Some(punishment) = punishment {
            case = case.with_punishment(punishment);
        }
        self.store.add_case(case.clone()).await?;
        Ok(case)
    }

    fn spawn_unmute_timer(&self, guild_id: u64, user_id: u64, fire_at: DateTime<Utc>) {
        let service = self.clone();
        self.scheduler.schedule(user_id, fire_at, move || async move {
            if let Err(e) = service.complete_scheduled_unmute(guild_id, user_id).await {
                error!(user_id = %user_id, error = %e, "Scheduled unmute failed");
            }
        });
    }

    /// Best-effort DM, logged and swallowed on failure
    async fn notify_quietly(&self, user_id: u64, text: &str) {
        if let Err(e) = self.gateway.notify_user(user_id, text).await {
            warn!(user_id = %user_id, error = %e, "Failed to notify user");
        }
    }

    /// Best-effort post to the guild's public moderation log
    async fn post_case_log(&self, guild_id: u64, case: &Case) {
        let config = self.configs.guild(guild_id);
        let Some(channel_id) = config.public_log_channel_id else {
            return;
        };
        let line = render_case_line(case);
        if let Err(e) = self.gateway.post_public_log(channel_id, &line).await {
            warn!(channel_id = %channel_id, error = %e, "Failed to post mod log");
        }
    }

    /// Delete the message unless an earlier rule already did
    async fn delete_quietly(
        &self,
        message: &InboundMessage,
        outcome: &mut FilterOutcome,
        rule: ViolationKind,
    ) {
        if outcome.deleted_for.is_some() {
            return;
        }
        if let Err(e) = self
            .gateway
            .delete_message(message.channel_id, message.message_id)
            .await
        {
            warn!(
                message_id = %message.message_id,
                error = %e,
                "Failed to delete filtered message"
            );
        }
        outcome.deleted_for = Some(rule);
    }

    /// Charge the author's violation throttle, auto-muting on exhaustion
    async fn charge_filter_throttle(&self, message: &InboundMessage, outcome: &mut FilterOutcome) {
        if self.filter_throttle.try_acquire(message.author_id) {
            return;
        }
        match self
            .auto_mute_for_spam(message.guild_id, message.author_id)
            .await
        {
            Ok(Some(case)) => {
                self.filter_throttle.reset(message.author_id);
                outcome.auto_mute_case = Some(case.id);
            }
            Ok(None) => {}
            Err(e) => {
                error!(user_id = %message.author_id, error = %e, "Automatic mute failed");
            }
        }
    }

    /// Best-effort report to the guild's review channel
    async fn report_quietly(
        &self,
        config: &GuildConfig,
        message: &InboundMessage,
        rule: ViolationKind,
        invite_code: Option<String>,
    ) {
        let Some(channel_id) = config.report_channel_id else {
            return;
        };
        let report = FilterReport {
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            author_id: message.author_id,
            author_tag: message.author_tag.clone(),
            content: message.content.clone(),
            rule,
            invite_code,
        };
        if let Err(e) = self.gateway.report_violation(channel_id, &report).await {
            warn!(channel_id = %channel_id, error = %e, "Failed to post filter report");
        }
    }
}

/// One-line rendering of a case for the public log
fn render_case_line(case: &Case) -> String {
    let mut line = format!("**Case #{}** | {} | <@{}>", case.id, case.kind, case.user_id);
    if !case.punishment.is_empty() {
        line.push_str(&format!(" | {}", case.punishment));
    }
    line.push_str(&format!(" | {} | by {}", case.reason, case.moderator_tag));
    line
}
