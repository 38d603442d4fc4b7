//! Validation of free-text answers in dialogues. Errors are user-facing.

use uuid::Uuid;

pub fn validate_name(raw: &str) -> Result<String, &'static str> {
    let name = raw.trim();
    match name.chars().count() {
        0 => Err("Имя не может быть пустым"),
        n if n > 100 => Err("Имя слишком длинное (до 100 символов)"),
        _ => Ok(name.to_string()),
    }
}

/// Telegram contacts often come without the leading `+`.
pub fn normalize_contact_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{digits}")
}

pub fn normalize_plate(raw: &str) -> Result<String, &'static str> {
    let plate: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    match plate.chars().count() {
        n if n < 6 => Err("Номер слишком короткий, минимум 6 символов"),
        n if n > 20 => Err("Номер слишком длинный"),
        _ => Ok(plate),
    }
}

pub fn validate_car_model(raw: &str) -> Result<String, &'static str> {
    let model = raw.trim();
    match model.chars().count() {
        0 => Err("Укажите марку и модель"),
        n if n > 50 => Err("Слишком длинно (до 50 символов)"),
        _ => Ok(model.to_string()),
    }
}

/// Car wash contact: exactly `+7` and 10 digits.
pub fn validate_carwash_phone(raw: &str) -> Result<String, &'static str> {
    let phone = raw.trim();
    let valid = phone
        .strip_prefix("+7")
        .is_some_and(|rest| rest.len() == 10 && rest.chars().all(|c| c.is_ascii_digit()));
    if valid {
        Ok(phone.to_string())
    } else {
        Err("Телефон в формате +7XXXXXXXXXX")
    }
}

/// "08:00-20:00" into its two halves. The server checks that start < end.
pub fn parse_working_hours(raw: &str) -> Option<(String, String)> {
    let (start, end) = raw.trim().split_once('-')?;
    let check = |t: &str| {
        let t = t.trim();
        chrono::NaiveTime::parse_from_str(t, "%H:%M")
            .ok()
            .map(|_| t.to_string())
    };
    Some((check(start)?, check(end)?))
}

/// "<booking id> <code>" as typed by car wash staff.
pub fn parse_qr_input(raw: &str) -> Option<(Uuid, String)> {
    let mut parts = raw.split_whitespace();
    let id = Uuid::parse_str(parts.next()?).ok()?;
    let code = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    Some((id, code))
}

pub fn parse_bay_number(raw: &str) -> Option<i64> {
    raw.trim().parse().ok().filter(|n| *n >= 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Ivan "), Ok("Ivan".to_string()));
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"я".repeat(101)).is_err());
    }

    #[test]
    fn test_normalize_contact_phone() {
        assert_eq!(normalize_contact_phone("79991234567"), "+79991234567");
        assert_eq!(normalize_contact_phone("+7 (999) 123-45-67"), "+79991234567");
    }

    #[test]
    fn test_normalize_plate() {
        assert_eq!(normalize_plate("а 123 вс 77"), Ok("А123ВС77".to_string()));
        assert!(normalize_plate("a12").is_err());
    }

    #[test]
    fn test_validate_car_model() {
        assert!(validate_car_model("").is_err());
        assert_eq!(validate_car_model(" Lada Vesta "), Ok("Lada Vesta".to_string()));
    }

    #[test]
    fn test_validate_carwash_phone() {
        assert!(validate_carwash_phone("+79990001122").is_ok());
        assert!(validate_carwash_phone("89990001122").is_err());
        assert!(validate_carwash_phone("+7999000112").is_err());
    }

    #[test]
    fn test_parse_working_hours() {
        assert_eq!(
            parse_working_hours("08:00 - 20:00"),
            Some(("08:00".to_string(), "20:00".to_string()))
        );
        assert_eq!(parse_working_hours("8-20"), None);
        assert_eq!(parse_working_hours("08:00"), None);
    }

    #[test]
    fn test_parse_qr_input() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse_qr_input(&format!(" {id}   AbC_12 ")),
            Some((id, "AbC_12".to_string()))
        );
        assert_eq!(parse_qr_input(&id.to_string()), None);
        assert_eq!(parse_qr_input("nope code"), None);
    }

    #[test]
    fn test_parse_bay_number() {
        assert_eq!(parse_bay_number(" 3 "), Some(3));
        assert_eq!(parse_bay_number("0"), None);
        assert_eq!(parse_bay_number("x"), None);
    }
}
