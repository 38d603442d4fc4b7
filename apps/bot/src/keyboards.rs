use chrono::NaiveDate;
use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    WebAppInfo,
};
use uuid::Uuid;

use crate::api::{Booking, CarWash, CarWashSummary, Slot, WashType};
use crate::callback::Callback;
use crate::format::{format_day_button, format_rub};

fn button(text: impl Into<String>, cb: Callback) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, cb.encode())
}

pub fn main_menu(webapp_url: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![button("🚗 Записаться", Callback::Book)],
        vec![
            button("📋 Мои записи", Callback::MyBookings),
            button("👤 Профиль", Callback::Profile),
        ],
    ];
    if let Some(url) = webapp_url.and_then(|u| u.parse().ok()) {
        rows.push(vec![InlineKeyboardButton::web_app(
            "📱 Открыть приложение",
            WebAppInfo { url },
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn share_contact() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new("📞 Отправить номер").request(ButtonRequest::Contact),
    ]])
    .resize_keyboard()
    .one_time_keyboard()
}

pub fn carwashes(list: &[CarWash]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        list.iter()
            .map(|c| vec![button(c.name.clone(), Callback::CarWash(c.id))])
            .collect::<Vec<_>>(),
    )
}

pub fn dates(days: &[(NaiveDate, i64)]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        days.iter()
            .map(|(d, free)| {
                vec![button(
                    format!("{} · свободно {}", format_day_button(*d), free),
                    Callback::Date(*d),
                )]
            })
            .collect::<Vec<_>>(),
    )
}

/// Three slots per row.
pub fn slots(list: &[Slot]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        list.chunks(3)
            .map(|row| {
                row.iter()
                    .map(|s| button(format!("{} · {}", s.start_time, s.bay_number), Callback::Slot(s.id)))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>(),
    )
}

pub fn wash_types(list: &[WashType]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        list.iter()
            .map(|w| {
                vec![button(
                    format!("{} · {} мин · {}", w.name, w.duration_minutes, format_rub(w.base_price)),
                    Callback::WashType(w.id),
                )]
            })
            .collect::<Vec<_>>(),
    )
}

pub fn confirm_booking() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("✅ Подтвердить", Callback::ConfirmBooking),
        button("✖️ Отмена", Callback::AbortBooking),
    ]])
}

pub fn payment(url: &str) -> Option<InlineKeyboardMarkup> {
    let url = url.parse().ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("💳 Оплатить", url),
    ]]))
}

pub fn bookings(list: &[Booking]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        list.iter()
            .map(|b| {
                vec![button(
                    format!("{} {} · {}", b.slot_date.format("%d.%m"), b.start_time, b.car_wash_name),
                    Callback::Booking(b.id),
                )]
            })
            .collect::<Vec<_>>(),
    )
}

pub fn booking_actions(b: &Booking) -> InlineKeyboardMarkup {
    let mut row = Vec::new();
    if b.status == "confirmed" {
        row.push(button("🔳 Показать код", Callback::ShowQr(b.id)));
    }
    if b.is_cancellable() {
        row.push(button("❌ Отменить", Callback::CancelAsk(b.id)));
    }
    InlineKeyboardMarkup::new(vec![row, vec![button("⬅️ К списку", Callback::MyBookings)]])
}

pub fn confirm_cancel(id: Uuid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("Да, отменить", Callback::CancelYes(id)),
        button("Нет", Callback::Booking(id)),
    ]])
}

// ── Admin ──

pub fn admin_menu(is_system_admin: bool, managed: &[CarWashSummary]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = managed
        .iter()
        .map(|c| vec![button(format!("🏢 {}", c.name), Callback::AdminCarWash(c.id))])
        .collect();
    if is_system_admin {
        rows.push(vec![
            button("📊 Статистика", Callback::SysStats),
            button("➕ Мойка", Callback::SysNewCarWash),
        ]);
        rows.push(vec![button("🗂 Все мойки", Callback::SysCarWashes)]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn carwash_admin(id: Uuid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("📋 Записи на сегодня", Callback::AdminToday(id))],
        vec![button("🔳 Проверить код", Callback::AdminVerify(id))],
    ])
}

/// Start/complete buttons for bookings that can move forward.
pub fn wash_controls(list: &[Booking]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        list.iter()
            .filter_map(|b| {
                let label = format!("{} {}", b.start_time, b.car_plate);
                match b.status.as_str() {
                    "confirmed" => Some(vec![button(format!("▶️ {label}"), Callback::AdminStart(b.id))]),
                    "in_progress" => Some(vec![button(format!("🏁 {label}"), Callback::AdminComplete(b.id))]),
                    _ => None,
                }
            })
            .collect::<Vec<_>>(),
    )
}

pub fn start_wash(id: Uuid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("▶️ Начать мойку", Callback::AdminStart(id))]])
}

pub fn system_carwashes(list: &[CarWash]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        list.iter()
            .map(|c| {
                vec![
                    button(format!("➕ Бокс · {}", c.name), Callback::SysAddBay(c.id)),
                    button("🗑", Callback::SysDeleteAsk(c.id)),
                ]
            })
            .collect::<Vec<_>>(),
    )
}

pub fn confirm_delete(id: Uuid) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("Да, удалить", Callback::SysDeleteYes(id)),
        button("Нет", Callback::SysCarWashes),
    ]])
}
