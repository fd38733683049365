//! Discord side effects behind one seam
//!
//! Every Discord call the engine makes goes through the `ModGateway` trait,
//! so the engine itself never touches HTTP and tests can swap in a mock.
//! `SerenityGateway` is the production implementation.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::builder::{CreateEmbed, CreateMessage};
use serenity::{ChannelId, GuildId, Http, MessageId, RoleId, UserId};
use std::sync::Arc;
use tracing::info;

use super::filter::FilterReport;
use super::{ModerationError, ModerationResult};

/// Permission level at which a user counts as a moderator
pub const MOD_LEVEL: u8 = 5;

/// Color of filter report embeds
const REPORT_EMBED_COLOR: u32 = 0x00ED_4245;

/// Discord actions the moderation engine needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModGateway: Send + Sync {
    /// Remove a member from the guild
    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> ModerationResult<()>;

    /// Ban a user, member or not
    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> ModerationResult<()>;

    /// Lift a ban
    async fn unban(&self, guild_id: u64, user_id: u64) -> ModerationResult<()>;

    /// Give a member the mute role
    async fn add_mute_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> ModerationResult<()>;

    /// Take the mute role from a member
    async fn remove_mute_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> ModerationResult<()>;

    /// Delete a message
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ModerationResult<()>;

    /// Resolve an invite code to the guild it points at.
    ///
    /// Returns None for codes Discord no longer knows.
    async fn resolve_invite(&self, code: &str) -> ModerationResult<Option<u64>>;

    /// Send a direct message to a user
    async fn notify_user(&self, user_id: u64, text: &str) -> ModerationResult<()>;

    /// Post a line to a guild's public moderation log channel
    async fn post_public_log(&self, channel_id: u64, text: &str) -> ModerationResult<()>;

    /// Post a filter violation to the review channel
    async fn report_violation(
        &self,
        channel_id: u64,
        report: &FilterReport,
    ) -> ModerationResult<()>;
}

/// `ModGateway` backed by the Serenity HTTP client
pub struct SerenityGateway {
    http: Arc<Http>,
}

impl SerenityGateway {
    /// Wrap an HTTP client
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Fetch a member, mapping failure to a validation error
async fn get_member(
    http: &Http,
    guild_id: GuildId,
    user_id: UserId,
) -> ModerationResult<serenity::Member> {
    let guild = guild_id.to_partial_guild(http).await.map_err(|e| {
        ModerationError::validation(format!("failed to get guild {guild_id}: {e}"))
    })?;

    guild.member(http, user_id).await.map_err(|e| {
        ModerationError::validation(format!(
            "failed to get member {user_id} in guild {guild_id}: {e}"
        ))
    })
}

fn is_not_found(source: &serenity::Error) -> bool {
    matches!(
        source,
        serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

#[async_trait]
impl ModGateway for SerenityGateway {
    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> ModerationResult<()> {
        let member =
            get_member(&self.http, GuildId::new(guild_id), UserId::new(user_id)).await?;

        member.kick_with_reason(&self.http, reason).await?;

        info!(user_id = %user_id, guild_id = %guild_id, "Kicked user");
        Ok(())
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> ModerationResult<()> {
        GuildId::new(guild_id)
            .ban_with_reason(&self.http, UserId::new(user_id), 0, reason)
            .await?;

        info!(user_id = %user_id, guild_id = %guild_id, "Banned user");
        Ok(())
    }

    async fn unban(&self, guild_id: u64, user_id: u64) -> ModerationResult<()> {
        match GuildId::new(guild_id)
            .unban(&self.http, UserId::new(user_id))
            .await
        {
            Ok(()) => {
                info!(user_id = %user_id, guild_id = %guild_id, "Unbanned user");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(ModerationError::NotBanned(user_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_mute_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> ModerationResult<()> {
        let member =
            get_member(&self.http, GuildId::new(guild_id), UserId::new(user_id)).await?;

        member.add_role(&self.http, RoleId::new(role_id)).await?;

        info!(user_id = %user_id, guild_id = %guild_id, "Added mute role");
        Ok(())
    }

    async fn remove_mute_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> ModerationResult<()> {
        let member =
            get_member(&self.http, GuildId::new(guild_id), UserId::new(user_id)).await?;

        member.remove_role(&self.http, RoleId::new(role_id)).await?;

        info!(user_id = %user_id, guild_id = %guild_id, "Removed mute role");
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> ModerationResult<()> {
        ChannelId::new(channel_id)
            .delete_message(&self.http, MessageId::new(message_id))
            .await?;
        Ok(())
    }

    async fn resolve_invite(&self, code: &str) -> ModerationResult<Option<u64>> {
        match serenity::Invite::get(&self.http, code, false, false, None).await {
            Ok(invite) => Ok(invite.guild.map(|guild| guild.id.get())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn notify_user(&self, user_id: u64, text: &str) -> ModerationResult<()> {
        let channel = UserId::new(user_id).create_dm_channel(&self.http).await?;
        channel
            .id
            .send_message(&self.http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }

    async fn post_public_log(&self, channel_id: u64, text: &str) -> ModerationResult<()> {
        ChannelId::new(channel_id)
            .send_message(&self.http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }

    async fn report_violation(
        &self,
        channel_id: u64,
        report: &FilterReport,
    ) -> ModerationResult<()> {
        let mut fields = vec![
            format!("**User:** <@{}> ({})", report.author_id, report.author_tag),
            format!("**Channel:** <#{}>", report.channel_id),
            format!("**Rule:** {}", report.rule),
        ];
        if let Some(code) = &report.invite_code {
            fields.push(format!("**Invite:** {code}"));
        }
        fields.push(String::new());
        fields.push(format!("**Content:** {}", report.content));

        let embed = CreateEmbed::new()
            .color(REPORT_EMBED_COLOR)
            .title("Filter violation")
            .description(fields.join("\n"));

        ChannelId::new(channel_id)
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}
