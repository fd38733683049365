use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, Message, MessageUpdateEvent, Ready,
};
use tracing::{error, info, warn};

use crate::EVENT_TARGET;
use crate::data::Data;
use crate::moderation::InboundMessage;

pub struct Handler;

/// The bot data lives in the serenity TypeMap so gateway events can reach
/// it; `None` means setup has not finished yet.
async fn bot_data(ctx: &Context) -> Option<Data> {
    ctx.data.read().await.get::<Data>().cloned()
}

fn is_spoiler_attachment(filename: &str) -> bool {
    filename.starts_with("SPOILER_")
}

fn inbound_from_message(message: &Message, guild_id: GuildId) -> InboundMessage {
    let author_roles = message
        .member
        .as_deref()
        .map(|member| member.roles.iter().map(|role| role.get()).collect())
        .unwrap_or_default();
    let has_spoiler_attachment = message
        .attachments
        .iter()
        .any(|attachment| is_spoiler_attachment(&attachment.filename));

    InboundMessage {
        guild_id: guild_id.get(),
        channel_id: message.channel_id.get(),
        message_id: message.id.get(),
        author_id: message.author.id.get(),
        author_tag: message.author.tag(),
        author_is_bot: message.author.bot,
        author_roles,
        content: message.content.clone(),
        has_spoiler_attachment,
    }
}

async fn run_filter(ctx: &Context, message: &Message) {
    let Some(guild_id) = message.guild_id else {
        return;
    };
    let Some(data) = bot_data(ctx).await else {
        return;
    };

    let inbound = inbound_from_message(message, guild_id);
    match data.moderation.on_message(&inbound).await {
        Ok(outcome) => {
            if let Some(rule) = outcome.deleted_for {
                info!(
                    target: EVENT_TARGET,
                    message_id = %inbound.message_id,
                    user_id = %inbound.author_id,
                    rule = %rule,
                    reported = outcome.reported,
                    "Filtered message"
                );
            }
        }
        Err(err) => {
            error!(
                target: EVENT_TARGET,
                message_id = %inbound.message_id,
                error = %err,
                "Filter pipeline failed"
            );
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated. Timed mutes persisted by a
    /// previous run get their unmute timers re-armed here.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count = guilds.len();
        info!("Cache ready! The bot is in {guild_count} guild(s)");

        let Some(data) = bot_data(&ctx).await else {
            warn!("Bot data missing at cache_ready; skipping mute restoration");
            return;
        };
        let mut restored = 0;
        for guild_id in guilds {
            restored += data.moderation.on_startup(guild_id.get());
        }
        if restored > 0 {
            info!(restored, "Re-armed unmute timers from persisted mutes");
        }
    }

    async fn message(&self, ctx: Context, new_message: Message) {
        run_filter(&ctx, &new_message).await;
    }

    /// Edits go back through the same filter so a clean message can't be
    /// edited into a violating one.
    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        _event: MessageUpdateEvent,
    ) {
        if let Some(message) = new {
            run_filter(&ctx, &message).await;
        }
    }
}
