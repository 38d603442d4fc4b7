//! Inline button payloads. Telegram caps callback data at 64 bytes, so each
//! payload is a short tag plus at most one id.

use chrono::NaiveDate;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Book,
    MyBookings,
    Profile,
    CarWash(Uuid),
    Date(NaiveDate),
    Slot(Uuid),
    WashType(Uuid),
    ConfirmBooking,
    AbortBooking,
    Booking(Uuid),
    CancelAsk(Uuid),
    CancelYes(Uuid),
    ShowQr(Uuid),
    AdminCarWash(Uuid),
    AdminToday(Uuid),
    AdminVerify(Uuid),
    AdminStart(Uuid),
    AdminComplete(Uuid),
    SysStats,
    SysNewCarWash,
    SysCarWashes,
    SysDeleteAsk(Uuid),
    SysDeleteYes(Uuid),
    SysAddBay(Uuid),
}

impl Callback {
    pub fn encode(&self) -> String {
        match self {
            Self::Book => "book".into(),
            Self::MyBookings => "my".into(),
            Self::Profile => "profile".into(),
            Self::CarWash(id) => format!("cw:{id}"),
            Self::Date(d) => format!("date:{d}"),
            Self::Slot(id) => format!("slot:{id}"),
            Self::WashType(id) => format!("wt:{id}"),
            Self::ConfirmBooking => "book_ok".into(),
            Self::AbortBooking => "book_abort".into(),
            Self::Booking(id) => format!("bk:{id}"),
            Self::CancelAsk(id) => format!("cancel:{id}"),
            Self::CancelYes(id) => format!("cancel_yes:{id}"),
            Self::ShowQr(id) => format!("qr:{id}"),
            Self::AdminCarWash(id) => format!("adm_cw:{id}"),
            Self::AdminToday(id) => format!("adm_today:{id}"),
            Self::AdminVerify(id) => format!("adm_qr:{id}"),
            Self::AdminStart(id) => format!("adm_start:{id}"),
            Self::AdminComplete(id) => format!("adm_done:{id}"),
            Self::SysStats => "sys_stats".into(),
            Self::SysNewCarWash => "sys_new".into(),
            Self::SysCarWashes => "sys_list".into(),
            Self::SysDeleteAsk(id) => format!("sys_del:{id}"),
            Self::SysDeleteYes(id) => format!("sys_del_yes:{id}"),
            Self::SysAddBay(id) => format!("sys_bay:{id}"),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let (tag, arg) = data.split_once(':').unwrap_or((data, ""));
        let id = || Uuid::parse_str(arg).ok();

        let cb = match tag {
            "book" => Self::Book,
            "my" => Self::MyBookings,
            "profile" => Self::Profile,
            "cw" => Self::CarWash(id()?),
            "date" => Self::Date(arg.parse().ok()?),
            "slot" => Self::Slot(id()?),
            "wt" => Self::WashType(id()?),
            "book_ok" => Self::ConfirmBooking,
            "book_abort" => Self::AbortBooking,
            "bk" => Self::Booking(id()?),
            "cancel" => Self::CancelAsk(id()?),
            "cancel_yes" => Self::CancelYes(id()?),
            "qr" => Self::ShowQr(id()?),
            "adm_cw" => Self::AdminCarWash(id()?),
            "adm_today" => Self::AdminToday(id()?),
            "adm_qr" => Self::AdminVerify(id()?),
            "adm_start" => Self::AdminStart(id()?),
            "adm_done" => Self::AdminComplete(id()?),
            "sys_stats" => Self::SysStats,
            "sys_new" => Self::SysNewCarWash,
            "sys_list" => Self::SysCarWashes,
            "sys_del" => Self::SysDeleteAsk(id()?),
            "sys_del_yes" => Self::SysDeleteYes(id()?),
            "sys_bay" => Self::SysAddBay(id()?),
            _ => return None,
        };
        Some(cb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_payloads() {
        let id = Uuid::new_v4();
        assert_eq!(Callback::parse(&format!("cancel_yes:{id}")), Some(Callback::CancelYes(id)));
        assert_eq!(
            Callback::parse("date:2030-01-10"),
            NaiveDate::from_ymd_opt(2030, 1, 10).map(Callback::Date)
        );
        assert_eq!(Callback::parse("sys_stats"), Some(Callback::SysStats));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Callback::parse("cw:not-a-uuid"), None);
        assert_eq!(Callback::parse("date:31.12.2030"), None);
        assert_eq!(Callback::parse("unknown"), None);
        assert_eq!(Callback::parse(""), None);
    }

    #[test]
    fn test_longest_payload_fits_telegram_limit() {
        let id = Uuid::new_v4();
        for cb in [
            Callback::SysDeleteYes(id),
            Callback::AdminToday(id),
            Callback::CancelYes(id),
        ] {
            let data = cb.encode();
            assert!(data.len() <= 64, "{data}");
            assert_eq!(Callback::parse(&data), Some(cb));
        }
    }
}
