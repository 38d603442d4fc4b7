use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use crate::api::{Booking, UserProfile};
use crate::state::BookingDraft;

const MSK_OFFSET_SECS: i32 = 3 * 3600;

const MONTHS: [&str; 12] = [
    "января", "февраля", "марта", "апреля", "мая", "июня",
    "июля", "августа", "сентября", "октября", "ноября", "декабря",
];
const WEEKDAYS: [&str; 7] = ["пн", "вт", "ср", "чт", "пт", "сб", "вс"];

fn moscow_offset() -> FixedOffset {
    FixedOffset::east_opt(MSK_OFFSET_SECS).expect("offset within a day")
}

pub fn to_moscow(at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&moscow_offset()).naive_local()
}

pub fn moscow_today() -> NaiveDate {
    to_moscow(Utc::now()).date()
}

/// "10 января"
pub fn format_date_ru(date: NaiveDate) -> String {
    format!("{} {}", date.day(), MONTHS[date.month0() as usize])
}

/// "пт, 10 января"
pub fn format_day_button(date: NaiveDate) -> String {
    format!(
        "{}, {}",
        WEEKDAYS[date.weekday().num_days_from_monday() as usize],
        format_date_ru(date)
    )
}

/// Kopecks as rubles, dropping zero kopecks: "1500 ₽", "1500.50 ₽".
pub fn format_rub(kopecks: i64) -> String {
    if kopecks % 100 == 0 {
        format!("{} ₽", kopecks / 100)
    } else {
        format!("{}.{:02} ₽", kopecks / 100, (kopecks % 100).abs())
    }
}

pub fn status_label(status: &str) -> &'static str {
    match status {
        "pending_payment" => "⏳ ждёт оплаты",
        "confirmed" => "✅ подтверждена",
        "in_progress" => "🚿 моется",
        "completed" => "🏁 завершена",
        "cancelled" => "❌ отменена",
        _ => "❔",
    }
}

pub fn refund_label(status: &str) -> &'static str {
    match status {
        "not_required" => "возврат не требуется",
        "processing" => "возврат в обработке",
        "succeeded" => "предоплата возвращена",
        "failed" => "возврат не удался, администратор свяжется с вами",
        _ => "",
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// One line per booking in a list.
pub fn booking_line(b: &Booking) -> String {
    format!(
        "{} · {} · {}",
        format_date_ru(b.slot_date),
        b.start_time,
        escape_html(&b.car_wash_name)
    )
}

/// The server refuses cancellation later than 2 hours before the start.
pub fn cancel_prompt(b: &Booking) -> String {
    format!(
        "Отменить запись {}?\n\nОтменить запись можно не позднее чем за 2 часа до начала, предоплата вернётся полностью.",
        booking_line(b)
    )
}

pub fn booking_details(b: &Booking) -> String {
    format!(
        "🚗 <b>{}</b>\n📍 {}\n📅 {} · {}–{} · бокс {}\n🧽 {}\n🔢 {} ({})\n💰 {}\nСтатус: {}",
        escape_html(&b.car_wash_name),
        escape_html(&b.car_wash_address),
        format_date_ru(b.slot_date),
        b.start_time,
        b.end_time,
        b.bay_number,
        escape_html(&b.wash_type_name),
        escape_html(&b.car_plate),
        escape_html(&b.car_model),
        format_rub(b.final_price),
        status_label(&b.status),
    )
}

/// Staff view: who is coming and what to do.
pub fn admin_booking_line(b: &Booking) -> String {
    format!(
        "<b>{}–{}</b> · бокс {}\n   👤 {} · {}\n   🔢 {} · {}\n   {}",
        b.start_time,
        b.end_time,
        b.bay_number,
        escape_html(&b.guest_name),
        escape_html(&b.guest_phone),
        escape_html(&b.car_plate),
        escape_html(&b.wash_type_name),
        status_label(&b.status),
    )
}

pub fn profile_text(p: &UserProfile) -> String {
    let name = match &p.last_name {
        Some(last) if !last.is_empty() => format!("{} {}", p.first_name, last),
        _ => p.first_name.clone(),
    };
    let mut text = format!(
        "👤 <b>{}</b>\n📞 {} {}\n\n📊 Записей: {}\n🏁 Завершено: {}",
        escape_html(&name),
        p.phone_number.as_deref().unwrap_or("не указан"),
        if p.is_verified { "✅" } else { "(не подтверждён)" },
        p.stats.total_bookings,
        p.stats.completed_bookings,
    );
    if p.is_system_admin {
        text.push_str("\n\n🔧 Системный администратор");
    }
    if !p.admin_of.is_empty() {
        let names: Vec<String> = p.admin_of.iter().map(|c| escape_html(&c.name)).collect();
        text.push_str(&format!("\n\n🔧 Администратор: {}", names.join(", ")));
    }
    text
}

pub fn draft_summary(d: &BookingDraft) -> String {
    let label = |v: &Option<(uuid::Uuid, String)>| {
        v.as_ref().map(|(_, l)| escape_html(l)).unwrap_or_default()
    };
    format!(
        "Проверьте запись:\n\n🚗 <b>{}</b>\n📅 {} · {}\n🧽 {}\n🔢 {} ({})\n\n💰 Стоимость: {}\n💳 Предоплата: {}",
        label(&d.car_wash),
        d.date.map(format_date_ru).unwrap_or_default(),
        label(&d.slot),
        label(&d.wash_type),
        escape_html(&d.car_plate),
        escape_html(&d.car_model),
        format_rub(d.final_price),
        format_rub(d.prepayment),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_date_ru() {
        let d = NaiveDate::from_ymd_opt(2030, 1, 10).unwrap();
        assert_eq!(format_date_ru(d), "10 января");
        assert_eq!(format_day_button(d), "чт, 10 января");
    }

    #[test]
    fn test_format_rub() {
        assert_eq!(format_rub(150_000), "1500 ₽");
        assert_eq!(format_rub(150_050), "1500.50 ₽");
        assert_eq!(format_rub(5), "0.05 ₽");
    }

    #[test]
    fn test_to_moscow_shifts_three_hours() {
        let utc = DateTime::parse_from_rfc3339("2030-01-09T22:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let msk = to_moscow(utc);
        assert_eq!(msk.date(), NaiveDate::from_ymd_opt(2030, 1, 10).unwrap());
        assert_eq!(msk.format("%H:%M").to_string(), "01:30");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>A&B</b>"), "&lt;b&gt;A&amp;B&lt;/b&gt;");
    }

    #[test]
    fn test_cancel_prompt_states_cutoff() {
        let b: Booking = serde_json::from_value(serde_json::json!({
            "id": uuid::Uuid::nil(),
            "guest_phone": "+79991234567",
            "guest_name": "Ivan",
            "car_plate": "А123ВС77",
            "car_model": "Lada",
            "slot_date": "2030-01-10",
            "start_time": "08:00",
            "end_time": "08:30",
            "final_price": 150_000,
            "status": "confirmed",
            "car_wash_name": "Aqua & Co",
            "car_wash_address": "Lenina 1",
            "wash_type_name": "Basic",
            "bay_number": 1,
            "qr_code": null
        }))
        .unwrap();
        let text = cancel_prompt(&b);
        assert!(text.contains("10 января · 08:00 · Aqua &amp; Co"));
        assert!(text.contains("за 2 часа до начала"));
        assert!(!text.contains("наполовину"));
    }

    #[test]
    fn test_draft_summary_mentions_choices() {
        let draft = BookingDraft {
            car_wash: Some((uuid::Uuid::nil(), "Aqua".into())),
            date: NaiveDate::from_ymd_opt(2030, 1, 10),
            slot: Some((uuid::Uuid::nil(), "08:00, бокс 1".into())),
            wash_type: Some((uuid::Uuid::nil(), "Basic".into())),
            final_price: 150_000,
            prepayment: 75_000,
            car_plate: "А123ВС77".into(),
            car_model: "Lada".into(),
            ..Default::default()
        };
        let text = draft_summary(&draft);
        assert!(text.contains("Aqua"));
        assert!(text.contains("10 января"));
        assert!(text.contains("750 ₽"));
    }
}
