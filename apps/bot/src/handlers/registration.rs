use teloxide::types::{KeyboardRemove, Message};

use super::{show_main_menu, Ctx, FlowResult};
use crate::api::Registration;
use crate::input::{normalize_contact_phone, validate_name};
use crate::keyboards;
use crate::state::State;

pub async fn start(ctx: &Ctx) -> FlowResult {
    ctx.dialogue.update(State::RegisterName).await?;
    ctx.say("👋 Добро пожаловать!\n\nДавайте познакомимся. Как вас зовут?")
        .await?;
    Ok(())
}

pub async fn on_name(ctx: &Ctx, text: &str) -> FlowResult {
    let name = match validate_name(text) {
        Ok(name) => name,
        Err(why) => {
            ctx.say(why).await?;
            return Ok(());
        }
    };

    ctx.dialogue
        .update(State::RegisterContact { name })
        .await?;
    ctx.say_with(
        "Отправьте свой номер телефона кнопкой ниже.",
        keyboards::share_contact(),
    )
    .await?;
    Ok(())
}

/// Only the user's own contact counts: it is what makes the phone verified.
pub async fn on_contact(ctx: &Ctx, msg: &Message, name: String) -> FlowResult {
    let Some(contact) = msg.contact() else {
        ctx.say_with(
            "Нажмите кнопку «📞 Отправить номер».",
            keyboards::share_contact(),
        )
        .await?;
        return Ok(());
    };
    if contact.user_id != Some(ctx.user.id) {
        ctx.say("Это чужой контакт. Отправьте свой номер кнопкой ниже.")
            .await?;
        return Ok(());
    }

    ctx.api
        .register(&Registration {
            telegram_id: ctx.tg_id(),
            first_name: name.clone(),
            last_name: ctx.user.last_name.clone(),
            username: ctx.user.username.clone(),
            phone_number: normalize_contact_phone(&contact.phone_number),
        })
        .await?;
    tracing::info!(telegram_id = ctx.tg_id(), "user registered via bot");

    ctx.dialogue.exit().await?;
    ctx.say_with("✅ Регистрация завершена!", KeyboardRemove::new())
        .await?;
    show_main_menu(ctx, &name).await
}
