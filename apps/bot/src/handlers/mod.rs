mod admin;
mod booking;
mod my_bookings;
mod registration;

use std::error::Error;
use std::sync::Arc;

use teloxide::{
    dispatching::{
        dialogue::{InMemStorage, InMemStorageError},
        UpdateHandler,
    },
    prelude::*,
    types::{KeyboardRemove, ParseMode, ReplyMarkup, User},
    utils::command::BotCommands,
    RequestError,
};

use crate::api::{ApiClient, ApiClientError, UserProfile};
use crate::callback::Callback;
use crate::config::Config;
use crate::format::{escape_html, profile_text};
use crate::keyboards;
use crate::state::{BotDialogue, State};

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Telegram(#[from] RequestError),
    #[error("dialogue storage: {0}")]
    Storage(#[from] InMemStorageError),
}

type FlowResult = Result<(), BotError>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Команды:")]
pub enum Command {
    #[command(description = "Главное меню")]
    Start,
    #[command(description = "Записаться на мойку")]
    Book,
    #[command(description = "Мои записи")]
    MyBookings,
    #[command(description = "Профиль")]
    Profile,
    #[command(description = "Панель администратора")]
    Admin,
    #[command(description = "Помощь")]
    Help,
    #[command(description = "Прервать текущее действие")]
    Cancel,
}

/// Per-update context shared by every flow.
pub struct Ctx {
    pub bot: Bot,
    pub api: Arc<ApiClient>,
    pub config: Arc<Config>,
    pub dialogue: BotDialogue,
    pub chat_id: ChatId,
    pub user: User,
}

impl Ctx {
    pub fn tg_id(&self) -> i64 {
        self.user.id.0 as i64
    }

    pub async fn say(&self, text: impl Into<String>) -> Result<Message, RequestError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
    }

    pub async fn say_with(
        &self,
        text: impl Into<String>,
        markup: impl Into<ReplyMarkup>,
    ) -> Result<Message, RequestError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(markup)
            .await
    }

    /// The caller's profile, or `None` when they have not registered yet.
    pub async fn profile(&self) -> Result<Option<UserProfile>, ApiClientError> {
        match self.api.me(self.tg_id()).await {
            Ok(p) => Ok(Some(p)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub fn schema() -> UpdateHandler<Box<dyn Error + Send + Sync>> {
    let messages = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<State>, State>()
        .branch(dptree::entry().filter_command::<Command>().endpoint(on_command))
        .branch(dptree::endpoint(on_message));

    let callbacks = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<State>, State>()
        .endpoint(on_callback);

    dptree::entry().branch(messages).branch(callbacks)
}

/// Server-side validation errors go back to the user verbatim; anything else
/// is logged and answered with an apology.
async fn finish(ctx: &Ctx, result: FlowResult) -> HandlerResult {
    match result {
        Ok(()) => Ok(()),
        Err(BotError::Api(e)) if e.is_user_facing() => {
            ctx.say(format!("⚠️ {}", escape_html(&e.to_string()))).await?;
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, chat_id = ctx.chat_id.0, "bot handler failed");
            ctx.bot
                .send_message(ctx.chat_id, "😔 Что-то пошло не так. Попробуйте позже.")
                .await
                .ok();
            Ok(())
        }
    }
}

async fn on_command(
    bot: Bot,
    api: Arc<ApiClient>,
    config: Arc<Config>,
    dialogue: BotDialogue,
    msg: Message,
    cmd: Command,
) -> HandlerResult {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let ctx = Ctx {
        bot,
        api,
        config,
        dialogue,
        chat_id: msg.chat.id,
        user,
    };
    let result = handle_command(&ctx, cmd).await;
    finish(&ctx, result).await
}

async fn handle_command(ctx: &Ctx, cmd: Command) -> FlowResult {
    match cmd {
        Command::Start => {
            ctx.dialogue.exit().await?;
            match ctx.profile().await? {
                Some(p) => show_main_menu(ctx, &p.first_name).await,
                None => registration::start(ctx).await,
            }
        }
        Command::Book => booking::start(ctx).await,
        Command::MyBookings => my_bookings::list(ctx).await,
        Command::Profile => show_profile(ctx).await,
        Command::Admin => admin::menu(ctx).await,
        Command::Help => {
            let mut text = Command::descriptions().to_string();
            if ctx.config.is_system_admin(ctx.tg_id()) {
                text.push_str("\n\nАдминистратору: /admin открывает статистику и управление мойками.");
            }
            ctx.bot.send_message(ctx.chat_id, text).await?;
            Ok(())
        }
        Command::Cancel => {
            ctx.dialogue.exit().await?;
            ctx.say_with("Действие отменено.", KeyboardRemove::new())
                .await?;
            Ok(())
        }
    }
}

async fn on_message(
    bot: Bot,
    api: Arc<ApiClient>,
    config: Arc<Config>,
    dialogue: BotDialogue,
    msg: Message,
) -> HandlerResult {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let ctx = Ctx {
        bot,
        api,
        config,
        dialogue,
        chat_id: msg.chat.id,
        user,
    };
    let result = handle_message(&ctx, &msg).await;
    finish(&ctx, result).await
}

async fn handle_message(ctx: &Ctx, msg: &Message) -> FlowResult {
    let state = ctx.dialogue.get_or_default().await?;

    match (state, msg.text()) {
        (State::RegisterContact { name }, _) => registration::on_contact(ctx, msg, name).await,
        (_, None) => {
            ctx.say("Пожалуйста, отправьте текстом.").await?;
            Ok(())
        }
        (State::RegisterName, Some(text)) => registration::on_name(ctx, text).await,
        (State::BookingPlate(draft), Some(text)) => booking::on_plate(ctx, draft, text).await,
        (State::BookingModel(draft), Some(text)) => booking::on_model(ctx, draft, text).await,
        (State::AdminVerifyQr { car_wash_id }, Some(text)) => {
            admin::on_qr_input(ctx, car_wash_id, text).await
        }
        (State::AdminNewCarWash(draft), Some(text)) => {
            admin::on_carwash_input(ctx, draft, text).await
        }
        (State::AdminAddBay { car_wash_id }, Some(text)) => {
            admin::on_bay_number(ctx, car_wash_id, text).await
        }
        (State::Booking(_) | State::BookingConfirm(_), Some(_)) => {
            ctx.say("Выберите вариант кнопкой выше или /cancel.").await?;
            Ok(())
        }
        (State::Idle, Some(_)) => {
            ctx.say("Не понял вас. Команды: /help").await?;
            Ok(())
        }
    }
}

async fn on_callback(
    bot: Bot,
    api: Arc<ApiClient>,
    config: Arc<Config>,
    dialogue: BotDialogue,
    q: CallbackQuery,
) -> HandlerResult {
    bot.answer_callback_query(&q.id).await?;

    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or(ChatId(q.from.id.0 as i64));
    let ctx = Ctx {
        bot,
        api,
        config,
        dialogue,
        chat_id,
        user: q.from.clone(),
    };

    let Some(cb) = q.data.as_deref().and_then(Callback::parse) else {
        ctx.say("Кнопка устарела.").await?;
        return Ok(());
    };
    let result = handle_callback(&ctx, cb).await;
    finish(&ctx, result).await
}

async fn handle_callback(ctx: &Ctx, cb: Callback) -> FlowResult {
    match cb {
        Callback::Book => booking::start(ctx).await,
        Callback::MyBookings => my_bookings::list(ctx).await,
        Callback::Profile => show_profile(ctx).await,
        Callback::CarWash(_)
        | Callback::Date(_)
        | Callback::Slot(_)
        | Callback::WashType(_)
        | Callback::ConfirmBooking
        | Callback::AbortBooking => booking::on_callback(ctx, cb).await,
        Callback::Booking(id) => my_bookings::show(ctx, id).await,
        Callback::CancelAsk(id) => my_bookings::ask_cancel(ctx, id).await,
        Callback::CancelYes(id) => my_bookings::cancel(ctx, id).await,
        Callback::ShowQr(id) => my_bookings::show_qr(ctx, id).await,
        _ => admin::on_callback(ctx, cb).await,
    }
}

pub async fn show_main_menu(ctx: &Ctx, name: &str) -> FlowResult {
    ctx.say_with(
        format!(
            "🚗 Привет, {}!\n\nЗапишитесь на мойку за пару нажатий.",
            escape_html(name)
        ),
        keyboards::main_menu(ctx.config.webapp_url.as_deref()),
    )
    .await?;
    Ok(())
}

async fn show_profile(ctx: &Ctx) -> FlowResult {
    match ctx.profile().await? {
        Some(p) => {
            ctx.say(profile_text(&p)).await?;
            Ok(())
        }
        None => registration::start(ctx).await,
    }
}
