mod api;
mod callback;
mod config;
mod format;
mod handlers;
mod input;
mod keyboards;
mod state;

use std::sync::Arc;

use teloxide::{dispatching::dialogue::InMemStorage, prelude::*, utils::command::BotCommands};

use crate::api::ApiClient;
use crate::config::Config;
use crate::handlers::Command;
use crate::state::State;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let bot = Bot::new(&config.bot_token);
    let api = Arc::new(ApiClient::new(
        config.api_base_url.clone(),
        config.service_api_key.clone(),
    ));

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        tracing::warn!(error = %e, "failed to publish bot commands");
    }

    tracing::info!(api = %config.api_base_url, "car wash bot starting");

    Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![
            api,
            Arc::new(config),
            InMemStorage::<State>::new()
        ])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
