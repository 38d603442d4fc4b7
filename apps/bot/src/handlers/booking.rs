use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use super::{registration, Ctx, FlowResult};
use crate::api::NewBooking;
use crate::callback::Callback;
use crate::format::{
    draft_summary, escape_html, format_date_ru, format_rub, moscow_today, to_moscow,
};
use crate::input::{normalize_plate, validate_car_model};
use crate::keyboards;
use crate::state::{BookingDraft, State};

/// Days offered in the date picker, today included.
const DAYS_AHEAD: i64 = 7;

pub async fn start(ctx: &Ctx) -> FlowResult {
    let Some(profile) = ctx.profile().await? else {
        return registration::start(ctx).await;
    };
    let Some(phone) = profile.phone_number.filter(|p| !p.is_empty()) else {
        return registration::start(ctx).await;
    };

    let carwashes: Vec<_> = ctx
        .api
        .carwashes()
        .await?
        .into_iter()
        .filter(|c| c.is_active)
        .collect();
    if carwashes.is_empty() {
        ctx.say("Пока нет доступных моек 😔").await?;
        return Ok(());
    }

    ctx.dialogue
        .update(State::Booking(BookingDraft {
            guest_name: profile.first_name,
            guest_phone: phone,
            ..Default::default()
        }))
        .await?;
    ctx.say_with("🚗 Выберите мойку:", keyboards::carwashes(&carwashes))
        .await?;
    Ok(())
}

async fn expired(ctx: &Ctx) -> FlowResult {
    ctx.say("Сессия записи устарела. Начните заново: /book").await?;
    Ok(())
}

pub async fn on_callback(ctx: &Ctx, cb: Callback) -> FlowResult {
    let state = ctx.dialogue.get_or_default().await?;

    match (cb, state) {
        (Callback::AbortBooking, _) => {
            ctx.dialogue.exit().await?;
            ctx.say("Запись отменена.").await?;
            Ok(())
        }
        (Callback::ConfirmBooking, State::BookingConfirm(draft)) => confirm(ctx, draft).await,
        (Callback::CarWash(id), State::Booking(draft)) => pick_carwash(ctx, draft, id).await,
        (Callback::Date(date), State::Booking(draft)) => pick_date(ctx, draft, date).await,
        (Callback::Slot(id), State::Booking(draft)) => pick_slot(ctx, draft, id).await,
        (Callback::WashType(id), State::Booking(draft)) => pick_wash_type(ctx, draft, id).await,
        _ => expired(ctx).await,
    }
}

async fn pick_carwash(ctx: &Ctx, mut draft: BookingDraft, id: Uuid) -> FlowResult {
    let carwash = ctx.api.carwash(id).await?;

    let today = moscow_today();
    let mut days = Vec::new();
    for offset in 0..DAYS_AHEAD {
        let date = today + Duration::days(offset);
        let count = ctx.api.slots_count(id, date).await?;
        if count.available_slots > 0 {
            days.push((count.date, count.available_slots));
        }
    }
    if days.is_empty() {
        ctx.say(format!(
            "На ближайшую неделю в «{}» мест нет. Выберите другую мойку: /book",
            escape_html(&carwash.name)
        ))
        .await?;
        return Ok(());
    }

    draft.car_wash = Some((carwash.id, carwash.name.clone()));
    draft.date = None;
    draft.slot = None;
    ctx.dialogue.update(State::Booking(draft)).await?;
    ctx.say_with(
        format!(
            "📍 {}\n🕐 {}–{}\n\nВыберите дату:",
            escape_html(&carwash.address),
            carwash.working_hours_start,
            carwash.working_hours_end
        ),
        keyboards::dates(&days),
    )
    .await?;
    Ok(())
}

async fn pick_date(ctx: &Ctx, mut draft: BookingDraft, date: NaiveDate) -> FlowResult {
    let Some(carwash_id) = draft.car_wash.as_ref().map(|(id, _)| *id) else {
        return expired(ctx).await;
    };

    let slots = ctx.api.slots(carwash_id, date).await?;
    if slots.is_empty() {
        ctx.say("На эту дату мест уже нет, выберите другую.").await?;
        return Ok(());
    }

    draft.date = Some(date);
    draft.slot = None;
    ctx.dialogue.update(State::Booking(draft)).await?;
    ctx.say_with(
        format!("📅 {}\n\nВыберите время (время · бокс):", format_date_ru(date)),
        keyboards::slots(&slots),
    )
    .await?;
    Ok(())
}

async fn pick_slot(ctx: &Ctx, mut draft: BookingDraft, slot_id: Uuid) -> FlowResult {
    let (Some(carwash_id), Some(date)) = (draft.car_wash.as_ref().map(|(id, _)| *id), draft.date) else {
        return expired(ctx).await;
    };

    let slots = ctx.api.slots(carwash_id, date).await?;
    let Some(slot) = slots.into_iter().find(|s| s.id == slot_id) else {
        ctx.say("Это время уже заняли, выберите другое.").await?;
        return Ok(());
    };

    let wash_types = ctx.api.wash_types().await?;
    if wash_types.is_empty() {
        ctx.say("Услуги ещё не настроены 😔").await?;
        return Ok(());
    }

    draft.slot = Some((
        slot.id,
        format!("{}–{}, бокс {}", slot.start_time, slot.end_time, slot.bay_number),
    ));
    ctx.dialogue.update(State::Booking(draft)).await?;
    ctx.say_with("🧽 Выберите тип мойки:", keyboards::wash_types(&wash_types))
        .await?;
    Ok(())
}

async fn pick_wash_type(ctx: &Ctx, mut draft: BookingDraft, wash_type_id: Uuid) -> FlowResult {
    let Some(slot_id) = draft.slot.as_ref().map(|(id, _)| *id) else {
        return expired(ctx).await;
    };

    let quote = ctx.api.calculate_price(slot_id, wash_type_id).await?;
    let name = ctx
        .api
        .wash_types()
        .await?
        .into_iter()
        .find(|w| w.id == wash_type_id)
        .map(|w| w.name)
        .unwrap_or_default();

    draft.wash_type = Some((wash_type_id, name));
    draft.final_price = quote.final_price;
    draft.prepayment = quote.prepayment_amount;
    ctx.dialogue.update(State::BookingPlate(draft)).await?;
    ctx.say(format!(
        "💰 Стоимость: {} ({} мин)\n💳 Предоплата: {}\n\nВведите госномер автомобиля:",
        format_rub(quote.final_price),
        quote.duration_minutes,
        format_rub(quote.prepayment_amount)
    ))
    .await?;
    Ok(())
}

pub async fn on_plate(ctx: &Ctx, mut draft: BookingDraft, text: &str) -> FlowResult {
    match normalize_plate(text) {
        Ok(plate) => {
            draft.car_plate = plate;
            ctx.dialogue.update(State::BookingModel(draft)).await?;
            ctx.say("Марка и модель автомобиля?").await?;
        }
        Err(why) => {
            ctx.say(why).await?;
        }
    }
    Ok(())
}

pub async fn on_model(ctx: &Ctx, mut draft: BookingDraft, text: &str) -> FlowResult {
    match validate_car_model(text) {
        Ok(model) => {
            draft.car_model = model;
            let summary = draft_summary(&draft);
            ctx.dialogue.update(State::BookingConfirm(draft)).await?;
            ctx.say_with(summary, keyboards::confirm_booking()).await?;
        }
        Err(why) => {
            ctx.say(why).await?;
        }
    }
    Ok(())
}

async fn confirm(ctx: &Ctx, draft: BookingDraft) -> FlowResult {
    let id = |pick: &Option<(Uuid, String)>| pick.as_ref().map(|(id, _)| *id);
    let (Some(car_wash_id), Some(time_slot_id), Some(wash_type_id)) =
        (id(&draft.car_wash), id(&draft.slot), id(&draft.wash_type))
    else {
        return expired(ctx).await;
    };

    // Leave the dialogue first so a failed create cannot be confirmed twice.
    ctx.dialogue.exit().await?;

    let created = ctx
        .api
        .create_booking(
            ctx.tg_id(),
            &NewBooking {
                car_wash_id,
                time_slot_id,
                wash_type_id,
                guest_phone: draft.guest_phone,
                guest_name: draft.guest_name,
                car_plate: draft.car_plate,
                car_model: draft.car_model,
            },
        )
        .await?;
    tracing::info!(booking_id = %created.booking.id, telegram_id = ctx.tg_id(), "booking created via bot");

    let payment = ctx.api.create_payment(created.booking.id).await?;
    let expires = to_moscow(created.payment.expires_at).format("%H:%M");

    let text = format!(
        "✅ Запись создана!\n\n📅 {} · {}\n💰 Итого: {}\n💳 К оплате сейчас: {}\n\nОплатите до {} (МСК), иначе бронь снимется.",
        format_date_ru(created.booking.slot_date),
        created.booking.start_time,
        format_rub(created.payment.amount),
        format_rub(payment.amount),
        expires,
    );

    match payment.confirmation_url.as_deref().and_then(keyboards::payment) {
        Some(markup) => ctx.say_with(text, markup).await?,
        None => ctx.say(text).await?,
    };
    Ok(())
}
