//! Price arithmetic. All amounts are kopecks.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub price: i64,
    pub discount: i64,
    pub final_price: i64,
}

/// Applies a percentage discount, rounded half-up to the kopeck.
pub fn calculate_price(base_price: i64, discount_percent: u8) -> PriceBreakdown {
    let percent = i64::from(discount_percent.min(100));
    let discount = (base_price * percent + 50) / 100;
    PriceBreakdown {
        price: base_price,
        discount,
        final_price: base_price - discount,
    }
}

/// Half of the final price, rounded half-up.
pub fn prepayment(final_price: i64) -> i64 {
    (final_price + 1) / 2
}

/// Refund owed for a paid prepayment given how soon the slot starts.
pub fn refundable_amount(prepayment: i64, minutes_until_start: i64) -> i64 {
    match minutes_until_start {
        m if m >= 120 => prepayment,
        m if m >= 60 => (prepayment + 1) / 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_discount() {
        let p = calculate_price(150_000, 0);
        assert_eq!(p.price, 150_000);
        assert_eq!(p.discount, 0);
        assert_eq!(p.final_price, 150_000);
    }

    #[test]
    fn test_discount_rounds_to_kopeck() {
        let p = calculate_price(999, 10);
        assert_eq!(p.discount, 100);
        assert_eq!(p.final_price, 899);
    }

    #[test]
    fn test_discount_clamped() {
        let p = calculate_price(1000, 250);
        assert_eq!(p.discount, 1000);
        assert_eq!(p.final_price, 0);
    }

    #[test]
    fn test_prepayment_is_half() {
        assert_eq!(prepayment(150_000), 75_000);
        assert_eq!(prepayment(101), 51);
        assert_eq!(prepayment(0), 0);
    }

    #[test]
    fn test_refund_tiers() {
        assert_eq!(refundable_amount(1000, 180), 1000);
        assert_eq!(refundable_amount(1000, 120), 1000);
        assert_eq!(refundable_amount(1000, 119), 500);
        assert_eq!(refundable_amount(1000, 60), 500);
        assert_eq!(refundable_amount(1000, 59), 0);
        assert_eq!(refundable_amount(1000, -30), 0);
    }
}
