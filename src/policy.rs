use rust_decimal::Decimal;

use crate::model::ReservationStatus;

/// Decides how much of `total` goes back to the guest when a reservation is
/// cancelled `days_before_check_in` days ahead (negative once the stay started).
pub trait RefundPolicy: Send + Sync {
    fn refund(&self, total: Decimal, days_before_check_in: i64) -> Decimal;
}

impl<F> RefundPolicy for F
where
    F: Fn(Decimal, i64) -> Decimal + Send + Sync,
{
    fn refund(&self, total: Decimal, days_before_check_in: i64) -> Decimal {
        self(total, days_before_check_in)
    }
}

/// Full refund at or beyond `full_refund_days`, `partial_percent` at or beyond
/// `partial_refund_days`, nothing closer to the stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieredRefund {
    pub full_refund_days: i64,
    pub partial_refund_days: i64,
    pub partial_percent: u32,
}

impl Default for TieredRefund {
    fn default() -> Self {
        Self {
            full_refund_days: 7,
            partial_refund_days: 2,
            partial_percent: 50,
        }
    }
}

impl RefundPolicy for TieredRefund {
    fn refund(&self, total: Decimal, days_before_check_in: i64) -> Decimal {
        if days_before_check_in >= self.full_refund_days {
            total
        } else if days_before_check_in >= self.partial_refund_days {
            (total * Decimal::from(self.partial_percent) / Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        }
    }
}

/// Status a reservation is born with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationPolicy {
    /// Created as a hold that must be confirmed before it expires.
    Pending,
    #[default]
    Confirmed,
}

impl CreationPolicy {
    pub fn initial_status(self) -> ReservationStatus {
        match self {
            CreationPolicy::Pending => ReservationStatus::Pending,
            CreationPolicy::Confirmed => ReservationStatus::Confirmed,
        }
    }
}

impl std::str::FromStr for CreationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(CreationPolicy::Pending),
            "confirmed" => Ok(CreationPolicy::Confirmed),
            other => Err(format!("unknown creation policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn tiered_refund_windows() {
        let policy = TieredRefund::default();
        assert_eq!(policy.refund(d("500.00"), 10), d("500.00"));
        assert_eq!(policy.refund(d("500.00"), 7), d("500.00"));
        assert_eq!(policy.refund(d("500.00"), 6), d("250.00"));
        assert_eq!(policy.refund(d("500.00"), 2), d("250.00"));
        assert_eq!(policy.refund(d("500.00"), 1), Decimal::ZERO);
        assert_eq!(policy.refund(d("500.00"), -3), Decimal::ZERO);
    }

    #[test]
    fn partial_refund_rounds_to_cents() {
        let policy = TieredRefund {
            full_refund_days: 14,
            partial_refund_days: 3,
            partial_percent: 33,
        };
        assert_eq!(policy.refund(d("100.00"), 5), d("33.00"));
        assert_eq!(policy.refund(d("99.99"), 5), d("33.00"));
    }

    #[test]
    fn closures_are_policies() {
        let nothing_back = |_: Decimal, _: i64| Decimal::ZERO;
        assert_eq!(nothing_back.refund(d("80.00"), 30), Decimal::ZERO);
    }

    #[test]
    fn creation_policy_parses() {
        assert_eq!("pending".parse::<CreationPolicy>(), Ok(CreationPolicy::Pending));
        assert_eq!("CONFIRMED".parse::<CreationPolicy>(), Ok(CreationPolicy::Confirmed));
        assert!("maybe".parse::<CreationPolicy>().is_err());
        assert_eq!(CreationPolicy::default().initial_status(), ReservationStatus::Confirmed);
    }
}
