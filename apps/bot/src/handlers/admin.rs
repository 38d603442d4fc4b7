//! Car wash staff and system admin flows. The server enforces every
//! permission; the checks here only keep menus honest.

use uuid::Uuid;

use super::{Ctx, FlowResult};
use crate::api::{NewCarWash, WorkingHours};
use crate::callback::Callback;
use crate::format::{admin_booking_line, escape_html, format_date_ru, moscow_today, status_label};
use crate::input::{parse_bay_number, parse_qr_input, parse_working_hours, validate_carwash_phone};
use crate::keyboards;
use crate::state::{CarWashDraft, State};

async fn is_system_admin(ctx: &Ctx) -> Result<bool, super::BotError> {
    if ctx.config.is_system_admin(ctx.tg_id()) {
        return Ok(true);
    }
    Ok(ctx.profile().await?.is_some_and(|p| p.is_system_admin))
}

pub async fn menu(ctx: &Ctx) -> FlowResult {
    let profile = ctx.profile().await?;
    let is_sys = ctx.config.is_system_admin(ctx.tg_id())
        || profile.as_ref().is_some_and(|p| p.is_system_admin);
    let managed = profile.map(|p| p.admin_of).unwrap_or_default();

    if !is_sys && managed.is_empty() {
        ctx.say("⛔ Нет доступа к панели администратора.").await?;
        return Ok(());
    }

    ctx.say_with(
        "🔧 <b>Панель администратора</b>",
        keyboards::admin_menu(is_sys, &managed),
    )
    .await?;
    Ok(())
}

pub async fn on_callback(ctx: &Ctx, cb: Callback) -> FlowResult {
    match cb {
        Callback::AdminCarWash(id) => {
            let carwash = ctx.api.carwash(id).await?;
            ctx.say_with(
                format!(
                    "🏢 <b>{}</b>\n📍 {}",
                    escape_html(&carwash.name),
                    escape_html(&carwash.address)
                ),
                keyboards::carwash_admin(id),
            )
            .await?;
            Ok(())
        }
        Callback::AdminToday(id) => today(ctx, id).await,
        Callback::AdminVerify(id) => {
            ctx.dialogue
                .update(State::AdminVerifyQr { car_wash_id: id })
                .await?;
            ctx.say("Введите номер записи и код через пробел.\nОтмена: /cancel")
                .await?;
            Ok(())
        }
        Callback::AdminStart(id) => {
            let change = ctx.api.start_wash(ctx.tg_id(), id).await?;
            tracing::info!(booking_id = %id, telegram_id = ctx.tg_id(), "wash started via bot");
            ctx.say(format!("▶️ Статус: {}", status_label(&change.status)))
                .await?;
            Ok(())
        }
        Callback::AdminComplete(id) => {
            let change = ctx.api.complete_wash(ctx.tg_id(), id).await?;
            tracing::info!(booking_id = %id, telegram_id = ctx.tg_id(), "wash completed via bot");
            ctx.say(format!("🏁 Статус: {}", status_label(&change.status)))
                .await?;
            Ok(())
        }
        Callback::SysStats
        | Callback::SysNewCarWash
        | Callback::SysCarWashes
        | Callback::SysDeleteAsk(_)
        | Callback::SysDeleteYes(_)
        | Callback::SysAddBay(_) => {
            if !is_system_admin(ctx).await? {
                ctx.say("⛔ Только для системного администратора.").await?;
                return Ok(());
            }
            system(ctx, cb).await
        }
        _ => Ok(()),
    }
}

async fn today(ctx: &Ctx, carwash_id: Uuid) -> FlowResult {
    let date = moscow_today();
    let page = ctx
        .api
        .carwash_bookings(ctx.tg_id(), carwash_id, date)
        .await?;
    if page.items.is_empty() {
        ctx.say(format!("На {} записей нет.", format_date_ru(date)))
            .await?;
        return Ok(());
    }

    let mut text = format!("📋 <b>{}</b>, записей: {}\n\n", format_date_ru(date), page.total);
    for b in &page.items {
        text.push_str(&admin_booking_line(b));
        text.push_str("\n\n");
    }
    ctx.say_with(text, keyboards::wash_controls(&page.items))
        .await?;
    Ok(())
}

async fn system(ctx: &Ctx, cb: Callback) -> FlowResult {
    match cb {
        Callback::SysStats => {
            let stats = ctx.api.statistics(ctx.tg_id()).await?;
            ctx.say(format!(
                "📊 <b>Статистика</b>\n\n🏢 Моек: {}\n📋 Записей: {}\n✅ Подтверждено: {}",
                stats.carwashes_count, stats.total_bookings, stats.confirmed_bookings
            ))
            .await?;
        }
        Callback::SysNewCarWash => {
            ctx.dialogue
                .update(State::AdminNewCarWash(CarWashDraft::default()))
                .await?;
            ctx.say("Название новой мойки?\nОтмена: /cancel").await?;
        }
        Callback::SysCarWashes => {
            let list = ctx.api.carwashes().await?;
            if list.is_empty() {
                ctx.say("Моек пока нет.").await?;
            } else {
                ctx.say_with("🗂 Мойки:", keyboards::system_carwashes(&list))
                    .await?;
            }
        }
        Callback::SysDeleteAsk(id) => {
            let carwash = ctx.api.carwash(id).await?;
            ctx.say_with(
                format!(
                    "Удалить «{}» вместе с боксами и слотами?",
                    escape_html(&carwash.name)
                ),
                keyboards::confirm_delete(id),
            )
            .await?;
        }
        Callback::SysDeleteYes(id) => {
            ctx.api.delete_carwash(ctx.tg_id(), id).await?;
            tracing::info!(carwash_id = %id, telegram_id = ctx.tg_id(), "car wash deleted via bot");
            ctx.say("🗑 Мойка удалена.").await?;
        }
        Callback::SysAddBay(id) => {
            ctx.dialogue
                .update(State::AdminAddBay { car_wash_id: id })
                .await?;
            ctx.say("Номер нового бокса?").await?;
        }
        _ => {}
    }
    Ok(())
}

pub async fn on_qr_input(ctx: &Ctx, car_wash_id: Uuid, text: &str) -> FlowResult {
    let Some((booking_id, code)) = parse_qr_input(text) else {
        ctx.say("Формат: <code>номер_записи код</code>").await?;
        return Ok(());
    };

    let check = ctx.api.verify_qr(ctx.tg_id(), booking_id, &code).await?;
    if !check.valid {
        tracing::warn!(%booking_id, %car_wash_id, "QR code mismatch");
        ctx.say("❌ Код не подходит. Попробуйте ещё раз или /cancel.")
            .await?;
        return Ok(());
    }

    ctx.dialogue.exit().await?;
    let b = &check.booking;
    let text = format!(
        "✅ Код верный\n\n👤 {}\n🔢 {}\n📅 {} · {}\nСтатус: {}",
        escape_html(&b.guest_name),
        escape_html(&b.car_plate),
        format_date_ru(b.slot_date),
        b.start_time,
        status_label(&b.status),
    );
    if b.status == "confirmed" {
        ctx.say_with(text, keyboards::start_wash(b.id)).await?;
    } else {
        ctx.say(text).await?;
    }
    Ok(())
}

/// Collects name, address, phone and hours one message at a time.
pub async fn on_carwash_input(ctx: &Ctx, mut draft: CarWashDraft, text: &str) -> FlowResult {
    let text = text.trim();

    if draft.name.is_none() {
        if text.is_empty() || text.chars().count() > 200 {
            ctx.say("Название от 1 до 200 символов.").await?;
            return Ok(());
        }
        draft.name = Some(text.to_string());
        ctx.dialogue.update(State::AdminNewCarWash(draft)).await?;
        ctx.say("Адрес?").await?;
        return Ok(());
    }

    if draft.address.is_none() {
        if text.is_empty() || text.chars().count() > 500 {
            ctx.say("Адрес от 1 до 500 символов.").await?;
            return Ok(());
        }
        draft.address = Some(text.to_string());
        ctx.dialogue.update(State::AdminNewCarWash(draft)).await?;
        ctx.say("Телефон мойки (+7XXXXXXXXXX)?").await?;
        return Ok(());
    }

    if draft.phone.is_none() {
        match validate_carwash_phone(text) {
            Ok(phone) => {
                draft.phone = Some(phone);
                ctx.dialogue.update(State::AdminNewCarWash(draft)).await?;
                ctx.say("Часы работы, например <code>08:00-20:00</code>?")
                    .await?;
            }
            Err(why) => {
                ctx.say(why).await?;
            }
        }
        return Ok(());
    }

    let Some((start, end)) = parse_working_hours(text) else {
        ctx.say("Формат: <code>08:00-20:00</code>").await?;
        return Ok(());
    };

    let carwash = ctx
        .api
        .create_carwash(
            ctx.tg_id(),
            &NewCarWash {
                name: draft.name.unwrap_or_default(),
                address: draft.address.unwrap_or_default(),
                phone_number: draft.phone.unwrap_or_default(),
                working_hours: WorkingHours { start, end },
            },
        )
        .await?;
    ctx.dialogue.exit().await?;
    tracing::info!(carwash_id = %carwash.id, telegram_id = ctx.tg_id(), "car wash created via bot");

    ctx.say_with(
        format!(
            "✅ Мойка «{}» создана. Добавьте боксы, чтобы открыть запись.",
            escape_html(&carwash.name)
        ),
        keyboards::system_carwashes(std::slice::from_ref(&carwash)),
    )
    .await?;
    Ok(())
}

pub async fn on_bay_number(ctx: &Ctx, car_wash_id: Uuid, text: &str) -> FlowResult {
    let Some(number) = parse_bay_number(text) else {
        ctx.say("Введите номер бокса числом от 1.").await?;
        return Ok(());
    };

    let created = ctx.api.add_bay(ctx.tg_id(), car_wash_id, number).await?;
    ctx.dialogue.exit().await?;
    tracing::info!(%car_wash_id, bay_number = number, "bay added via bot");

    ctx.say(format!(
        "✅ Бокс {} добавлен, слотов создано: {}",
        created.bay.bay_number, created.slots_created
    ))
    .await?;
    Ok(())
}
