use poise::{CreateReply, command, serenity_prelude as serenity};

use crate::data::GuildConfig;
use crate::moderation::{Actor, Case, MOD_LEVEL, ModerationError, ModerationResult, Target};
use crate::util::{parse_duration_seconds, sanitize_reason};
use crate::{Context, Error};

const EMBED_COLOR: u32 = 0x00ED_4245;
const DEFAULT_REASON: &str = "No reason.";

/// Everything the moderation commands need about their invocation
struct ModInvocation {
    guild_id: u64,
    actor: Actor,
    level: u8,
    config: GuildConfig,
}

/// Resolve the invoking moderator, or reply and bail when they are not one
async fn mod_invocation(ctx: Context<'_>) -> Result<Option<ModInvocation>, Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say("This command only works in a guild.").await?;
        return Ok(None);
    };
    let config = ctx.data().configs.guild(guild_id.get());
    let level = config.level_for(&author_roles(ctx).await);
    if level < MOD_LEVEL {
        ctx.say("You don't have permission to use this command.").await?;
        return Ok(None);
    }
    let actor = Actor {
        user_id: ctx.author().id.get(),
        tag: ctx.author().tag(),
    };
    Ok(Some(ModInvocation {
        guild_id: guild_id.get(),
        actor,
        level,
        config,
    }))
}

async fn author_roles(ctx: Context<'_>) -> Vec<u64> {
    ctx.author_member()
        .await
        .map(|member| member.roles.iter().map(|role| role.get()).collect())
        .unwrap_or_default()
}

/// Reject targets a moderator must never act on
async fn guard_target(
    ctx: Context<'_>,
    invocation: &ModInvocation,
    user: &serenity::User,
    member: Option<&serenity::Member>,
) -> Result<bool, Error> {
    if user.id == ctx.author().id {
        ctx.say("You can't call that on yourself.").await?;
        return Ok(false);
    }
    if user.bot {
        ctx.say("You can't call that on bots.").await?;
        return Ok(false);
    }
    if let Some(member) = member {
        let roles: Vec<u64> = member.roles.iter().map(|role| role.get()).collect();
        if invocation.config.level_for(&roles) >= invocation.level {
            ctx.say("You can't call that on someone at or above your level.")
                .await?;
            return Ok(false);
        }
    }
    Ok(true)
}

async fn fetch_member(
    ctx: Context<'_>,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
) -> Option<serenity::Member> {
    guild_id.member(ctx.http(), user_id).await.ok()
}

fn case_embed(case: &Case) -> serenity::CreateEmbed {
    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Case #{} | {}", case.id, case.kind))
        .description(format!("<@{}>", case.user_id))
        .field("Reason", case.reason.clone(), false)
        .color(EMBED_COLOR);
    if !case.punishment.is_empty() {
        embed = embed.field("Punishment", case.punishment.clone(), true);
    }
    if case.lifted {
        let by = case.lifted_by_tag.clone().unwrap_or_default();
        embed = embed.field("Lifted", format!("by {by}"), true);
    }
    embed.field("Moderator", case.moderator_tag.clone(), true)
}

/// Text shown to the invoker for errors they caused; `None` means the
/// error is unexpected and belongs in the logs instead
fn user_error_text(error: &ModerationError) -> Option<String> {
    let text = match error {
        ModerationError::Validation(text) => text.clone(),
        ModerationError::CaseNotFound { case_id, .. } => {
            format!("Case #{case_id} was not found for that user.")
        }
        ModerationError::NotAWarnCase(case_id) => format!("Case #{case_id} is not a warn case."),
        ModerationError::AlreadyLifted(case_id) => format!("Case #{case_id} was already lifted."),
        ModerationError::NegativePoints => {
            "That would drop the user below zero warn points.".to_string()
        }
        ModerationError::AlreadyMuted(_) => "That user is already muted.".to_string(),
        ModerationError::NotBanned(_) => "That user is not banned.".to_string(),
        _ => return None,
    };
    Some(text)
}

/// Reply with the resulting case, or with a friendly error
async fn reply_with_result(ctx: Context<'_>, result: ModerationResult<Case>) -> Result<(), Error> {
    match result {
        Ok(case) => {
            ctx.send(CreateReply::default().embed(case_embed(&case)))
                .await?;
            Ok(())
        }
        Err(error) => match user_error_text(&error) {
            Some(text) => {
                ctx.say(text).await?;
                Ok(())
            }
            None => Err(Box::new(error)),
        },
    }
}

/// Split a maybe-duration token into a real duration and the reason.
///
/// A token that does not parse as a duration is the first word of the
/// reason, matching how people actually type these commands.
fn resolve_duration_and_reason(
    duration: Option<String>,
    reason: Option<String>,
) -> (Option<chrono::Duration>, String) {
    match duration {
        None => (None, reason.unwrap_or_else(|| DEFAULT_REASON.to_string())),
        Some(token) => match parse_duration_seconds(&token) {
            Some(seconds) => (
                i64::try_from(seconds).ok().map(chrono::Duration::seconds),
                reason.unwrap_or_else(|| DEFAULT_REASON.to_string()),
            ),
            None => {
                let reason = match reason {
                    Some(rest) => format!("{token} {rest}"),
                    None => token,
                };
                (None, reason)
            }
        },
    }
}

/// Warn a user and add warn points
#[command(prefix_command, slash_command, guild_only)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "The user to warn"] user: serenity::User,
    #[description = "Points to add"] points: u64,
    #[description = "Reason for the warn"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };
    let guild_id = serenity::GuildId::new(invocation.guild_id);
    let member = fetch_member(ctx, guild_id, user.id).await;
    if !guard_target(ctx, &invocation, &user, member.as_ref()).await? {
        return Ok(());
    }

    let target = if member.is_some() {
        Target::Member(user.id.get())
    } else {
        Target::User(user.id.get())
    };
    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .warn(invocation.guild_id, &invocation.actor, target, points, &reason)
        .await;
    reply_with_result(ctx, result).await
}

/// Lift a warn case and return its points
#[command(prefix_command, slash_command, guild_only)]
pub async fn liftwarn(
    ctx: Context<'_>,
    #[description = "The user the warn belongs to"] user: serenity::User,
    #[description = "Case number of the warn"] case_id: u64,
    #[description = "Reason for lifting"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };

    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .lift_warn(
            invocation.guild_id,
            &invocation.actor,
            user.id.get(),
            case_id,
            &reason,
        )
        .await;
    reply_with_result(ctx, result).await
}

/// Remove warn points from a user
#[command(prefix_command, slash_command, guild_only)]
pub async fn removepoints(
    ctx: Context<'_>,
    #[description = "The user to deduct from"] user: serenity::User,
    #[description = "Points to remove"] points: u64,
    #[description = "Reason for the removal"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };

    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .remove_points(
            invocation.guild_id,
            &invocation.actor,
            user.id.get(),
            points,
            &reason,
        )
        .await;
    reply_with_result(ctx, result).await
}

/// Kick a member from the guild
#[command(prefix_command, slash_command, guild_only)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "The member to kick"] user: serenity::User,
    #[description = "Reason for the kick"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };
    let guild_id = serenity::GuildId::new(invocation.guild_id);
    let Some(member) = fetch_member(ctx, guild_id, user.id).await else {
        ctx.say("That user isn't in the guild.").await?;
        return Ok(());
    };
    if !guard_target(ctx, &invocation, &user, Some(&member)).await? {
        return Ok(());
    }

    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .kick(invocation.guild_id, &invocation.actor, user.id.get(), &reason)
        .await;
    reply_with_result(ctx, result).await
}

/// Ban a user, whether or not they are in the guild
#[command(prefix_command, slash_command, guild_only)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "The user to ban"] user: serenity::User,
    #[description = "Reason for the ban"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };
    let guild_id = serenity::GuildId::new(invocation.guild_id);
    let member = fetch_member(ctx, guild_id, user.id).await;
    if !guard_target(ctx, &invocation, &user, member.as_ref()).await? {
        return Ok(());
    }

    let target = if member.is_some() {
        Target::Member(user.id.get())
    } else {
        Target::User(user.id.get())
    };
    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .ban(invocation.guild_id, &invocation.actor, target, &reason)
        .await;
    reply_with_result(ctx, result).await
}

/// Lift a user's ban
#[command(prefix_command, slash_command, guild_only)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "The user to unban"] user: serenity::User,
    #[description = "Reason for the unban"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };

    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .unban(invocation.guild_id, &invocation.actor, user.id.get(), &reason)
        .await;
    reply_with_result(ctx, result).await
}

/// Mute a member, for a duration or until unmuted
#[command(prefix_command, slash_command, guild_only)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "The member to mute"] user: serenity::User,
    #[description = "Duration (e.g. 30m, 2h, 1d)"] duration: Option<String>,
    #[description = "Reason for the mute"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };
    let guild_id = serenity::GuildId::new(invocation.guild_id);
    let Some(member) = fetch_member(ctx, guild_id, user.id).await else {
        ctx.say("That user isn't in the guild.").await?;
        return Ok(());
    };
    if !guard_target(ctx, &invocation, &user, Some(&member)).await? {
        return Ok(());
    }

    let (duration, reason) = resolve_duration_and_reason(duration, reason);
    let reason = sanitize_reason(&reason);
    let result = ctx
        .data()
        .moderation
        .mute(
            invocation.guild_id,
            &invocation.actor,
            user.id.get(),
            duration,
            &reason,
        )
        .await;
    reply_with_result(ctx, result).await
}

/// Unmute a member
#[command(prefix_command, slash_command, guild_only)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "The member to unmute"] user: serenity::User,
    #[description = "Reason for the unmute"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let Some(invocation) = mod_invocation(ctx).await? else {
        return Ok(());
    };
    let guild_id = serenity::GuildId::new(invocation.guild_id);
    if fetch_member(ctx, guild_id, user.id).await.is_none() {
        ctx.say("That user isn't in the guild.").await?;
        return Ok(());
    }

    let reason = sanitize_reason(reason.as_deref().unwrap_or(DEFAULT_REASON));
    let result = ctx
        .data()
        .moderation
        .unmute(invocation.guild_id, &invocation.actor, user.id.get(), &reason)
        .await;
    reply_with_result(ctx, result).await
}

/// Look up one case for a user
#[command(prefix_command, slash_command, guild_only, rename = "case")]
pub async fn case_lookup(
    ctx: Context<'_>,
    #[description = "The user the case belongs to"] user: serenity::User,
    #[description = "Case number"] case_id: u64,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say("This command only works in a guild.").await?;
        return Ok(());
    };
    let config = ctx.data().configs.guild(guild_id.get());
    let level = config.level_for(&author_roles(ctx).await);
    if let Err(error) = ctx.data().moderation.check_command_guard(
        guild_id.get(),
        ctx.channel_id().get(),
        level,
    ) {
        if let Some(text) = user_error_text(&error) {
            ctx.say(text).await?;
        }
        return Ok(());
    }

    let result = ctx.data().moderation.store.case(user.id.get(), case_id);
    reply_with_result(ctx, result).await
}

/// Show a user's current warn points
#[command(prefix_command, slash_command, guild_only)]
pub async fn warnpoints(
    ctx: Context<'_>,
    #[description = "The user to look up (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say("This command only works in a guild.").await?;
        return Ok(());
    };
    let config = ctx.data().configs.guild(guild_id.get());
    let level = config.level_for(&author_roles(ctx).await);
    if let Err(error) = ctx.data().moderation.check_command_guard(
        guild_id.get(),
        ctx.channel_id().get(),
        level,
    ) {
        if let Some(text) = user_error_text(&error) {
            ctx.say(text).await?;
        }
        return Ok(());
    }

    let target = user.as_ref().unwrap_or_else(|| ctx.author());
    let points = ctx.data().moderation.store.points(target.id.get());
    let embed = serenity::CreateEmbed::new()
        .title("Warn points")
        .description(format!("<@{}> has {points} warn point(s).", target.id))
        .color(EMBED_COLOR);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::CaseKind;

    #[test]
    fn commands_are_guild_only() {
        for cmd in [warn(), liftwarn(), mute(), unmute(), case_lookup()] {
            assert!(cmd.guild_only, "{} must be guild only", cmd.name);
        }
    }

    #[test]
    fn case_command_keeps_its_short_name() {
        assert_eq!(case_lookup().name, "case");
    }

    #[test]
    fn commands_register_as_slash_commands() {
        for cmd in [warn(), ban(), unban(), warnpoints()] {
            assert!(cmd.create_as_slash_command().is_some(), "{}", cmd.name);
        }
    }

    #[test]
    fn duration_token_parses_when_valid() {
        let (duration, reason) =
            resolve_duration_and_reason(Some("30m".to_string()), Some("too loud".to_string()));
        assert_eq!(duration, Some(chrono::Duration::minutes(30)));
        assert_eq!(reason, "too loud");
    }

    #[test]
    fn duration_token_folds_into_reason_when_invalid() {
        let (duration, reason) =
            resolve_duration_and_reason(Some("being".to_string()), Some("too loud".to_string()));
        assert_eq!(duration, None);
        assert_eq!(reason, "being too loud");

        let (duration, reason) = resolve_duration_and_reason(Some("rude".to_string()), None);
        assert_eq!(duration, None);
        assert_eq!(reason, "rude");
    }

    #[test]
    fn missing_duration_keeps_default_reason() {
        let (duration, reason) = resolve_duration_and_reason(None, None);
        assert_eq!(duration, None);
        assert_eq!(reason, DEFAULT_REASON);
    }

    #[test]
    fn expected_errors_render_for_users() {
        let text = user_error_text(&ModerationError::AlreadyLifted(3)).unwrap();
        assert!(text.contains("already lifted"));
        assert!(user_error_text(&ModerationError::Persistence("disk".into())).is_none());
    }

    #[test]
    fn case_embed_mentions_punishment() {
        let case = Case::new(4, 1, CaseKind::Mute, 2, 3, "mod#1", "loud")
            .with_punishment("30 minutes");
        // CreateEmbed is opaque; serialize to inspect what was set
        let json = serde_json::to_value(case_embed(&case)).unwrap();
        let rendered = json.to_string();
        assert!(rendered.contains("Case #4"));
        assert!(rendered.contains("30 minutes"));
    }
}
