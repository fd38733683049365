mod commands;
mod data;
mod handlers;
mod logging;
mod moderation;
mod util;

use std::env;
use std::sync::Arc;

use poise::serenity_prelude as serenity;
use tracing::info;

use data::ConfigStore;
use moderation::{
    BotIdentity, ModerationService, ModerationStore, SerenityGateway, UnmuteScheduler,
};

// Customize these constants for your bot
pub const BOT_NAME: &str = "warden";
pub const COMMAND_TARGET: &str = "warden::command";
pub const ERROR_TARGET: &str = "warden::error";
pub const EVENT_TARGET: &str = "warden::handlers";
pub use data::Data;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Where guild configs, cases, and counters are persisted
const DATA_DIR: &str = "data";

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN must be set");

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::warn(),
                commands::liftwarn(),
                commands::removepoints(),
                commands::kick(),
                commands::ban(),
                commands::unban(),
                commands::mute(),
                commands::unmute(),
                commands::case_lookup(),
                commands::warnpoints(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    crate::logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let configs = ConfigStore::load(DATA_DIR).await;
                let store = ModerationStore::load(DATA_DIR).await;
                let gateway = Arc::new(SerenityGateway::new(Arc::clone(&ctx.http)));
                let identity = BotIdentity {
                    user_id: ready.user.id.get(),
                    tag: ready.user.tag(),
                };
                let service = ModerationService::new(
                    store,
                    UnmuteScheduler::new(),
                    gateway,
                    configs.clone(),
                    identity,
                );
                let data = Data::new(configs, service);

                // Gateway event handlers read the bot data out of the TypeMap
                ctx.data.write().await.insert::<Data>(data.clone());
                Ok(data)
            })
        })
        .build();

    // The filter needs message content; everything else is non-privileged
    let intents =
        serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await
        .expect("Failed to create client");

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        shard_manager.shutdown_all().await;
    });

    info!("Starting {BOT_NAME}...");
    if let Err(err) = client.start().await {
        eprintln!("Error starting the bot: {err}");
    }

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async_main());

    if let Err(err) = result {
        eprintln!("Error: {err}");
    }
}
