use uuid::Uuid;

use super::{registration, Ctx, FlowResult};
use crate::api::Booking;
use crate::format::{booking_details, booking_line, cancel_prompt, refund_label, status_label};
use crate::keyboards;

const LIST_SIZE: u32 = 10;

pub async fn list(ctx: &Ctx) -> FlowResult {
    let Some(phone) = ctx.profile().await?.and_then(|p| p.phone_number) else {
        return registration::start(ctx).await;
    };

    let page = ctx.api.my_bookings(&phone, LIST_SIZE).await?;
    if page.items.is_empty() {
        ctx.say_with(
            "У вас пока нет записей.",
            keyboards::main_menu(ctx.config.webapp_url.as_deref()),
        )
        .await?;
        return Ok(());
    }

    let mut text = format!("📋 <b>Ваши записи</b> ({}):\n\n", page.total);
    for b in &page.items {
        text.push_str(&format!("{} — {}\n", booking_line(b), status_label(&b.status)));
    }
    ctx.say_with(text, keyboards::bookings(&page.items)).await?;
    Ok(())
}

/// The booking, if it was made with the caller's phone.
async fn owned(ctx: &Ctx, id: Uuid) -> Result<Option<Booking>, super::BotError> {
    let phone = ctx.profile().await?.and_then(|p| p.phone_number);
    let booking = ctx.api.booking(id).await?;
    if phone.as_deref() == Some(booking.guest_phone.as_str()) {
        Ok(Some(booking))
    } else {
        tracing::warn!(telegram_id = ctx.tg_id(), booking_id = %id, "booking of another user requested");
        ctx.say("Запись не найдена.").await?;
        Ok(None)
    }
}

pub async fn show(ctx: &Ctx, id: Uuid) -> FlowResult {
    if let Some(b) = owned(ctx, id).await? {
        ctx.say_with(booking_details(&b), keyboards::booking_actions(&b))
            .await?;
    }
    Ok(())
}

pub async fn ask_cancel(ctx: &Ctx, id: Uuid) -> FlowResult {
    let Some(b) = owned(ctx, id).await? else {
        return Ok(());
    };
    if !b.is_cancellable() {
        ctx.say("Эту запись уже нельзя отменить.").await?;
        return Ok(());
    }

    ctx.say_with(cancel_prompt(&b), keyboards::confirm_cancel(id))
        .await?;
    Ok(())
}

pub async fn cancel(ctx: &Ctx, id: Uuid) -> FlowResult {
    if owned(ctx, id).await?.is_none() {
        return Ok(());
    }

    let res = ctx.api.cancel_booking(id).await?;
    tracing::info!(booking_id = %id, telegram_id = ctx.tg_id(), "booking cancelled via bot");

    ctx.say(format!(
        "Запись {}. {}",
        status_label(&res.status),
        refund_label(&res.refund_status)
    ))
    .await?;
    Ok(())
}

pub async fn show_qr(ctx: &Ctx, id: Uuid) -> FlowResult {
    let Some(b) = owned(ctx, id).await? else {
        return Ok(());
    };
    match b.qr_code {
        Some(code) => {
            ctx.say(format!(
                "🔳 Покажите администратору мойки:\n\nЗапись: <code>{}</code>\nКод: <code>{}</code>",
                b.id, code
            ))
            .await?;
        }
        None => {
            ctx.say("Код появится после оплаты.").await?;
        }
    }
    Ok(())
}
