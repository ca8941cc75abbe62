//! Reset and billing intervals.
//!
//! Two interval families exist: [`ResetInterval`] governs when entitlement
//! balances return to their starting allowance, and [`BillingInterval`]
//! governs how often a price charges. Both carry an explicit rank used by
//! the deduction ordering and by upgrade/downgrade timing.

use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// How often an entitlement's balance resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetInterval {
    /// Resets every minute.
    Minute,
    /// Resets every hour.
    Hour,
    /// Resets every day.
    Day,
    /// Resets every week.
    Week,
    /// Resets every month.
    Month,
    /// Resets every quarter.
    Quarter,
    /// Resets every year.
    Year,
    /// Resets every six months.
    SemiAnnual,
    /// Never resets.
    Lifetime,
}

impl ResetInterval {
    /// Granularity rank used as a deduction-ordering tie-break.
    ///
    /// Finer intervals deduct first: minute < hour < day < week < month <
    /// quarter < year < semi-annual < lifetime.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Minute => 0,
            Self::Hour => 1,
            Self::Day => 2,
            Self::Week => 3,
            Self::Month => 4,
            Self::Quarter => 5,
            Self::Year => 6,
            Self::SemiAnnual => 7,
            Self::Lifetime => 8,
        }
    }

    /// Advance a reset anchor by one interval. `Lifetime` never advances.
    #[must_use]
    pub fn advance(self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Minute => Some(from + Duration::minutes(1)),
            Self::Hour => Some(from + Duration::hours(1)),
            Self::Day => Some(from + Duration::days(1)),
            Self::Week => Some(from + Duration::weeks(1)),
            Self::Month => from.checked_add_months(Months::new(1)),
            Self::Quarter => from.checked_add_months(Months::new(3)),
            Self::SemiAnnual => from.checked_add_months(Months::new(6)),
            Self::Year => from.with_year(from.year() + 1),
            Self::Lifetime => None,
        }
    }
}

/// How often a price charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    /// Charged once, never recurs.
    OneOff,
    /// Charged monthly.
    Month,
    /// Charged quarterly.
    Quarter,
    /// Charged every six months.
    SemiAnnual,
    /// Charged yearly.
    Year,
}

impl BillingInterval {
    /// Whether the price recurs.
    #[must_use]
    pub const fn is_recurring(self) -> bool {
        !matches!(self, Self::OneOff)
    }

    /// Cycle-length rank for upgrade/downgrade timing: when two products
    /// bill on different intervals their totals are not directly
    /// comparable, so the shorter interval sorts as "smaller".
    ///
    /// `OneOff` has no cycle and ranks below everything recurring.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::OneOff => 0,
            Self::Month => 1,
            Self::Quarter => 2,
            Self::SemiAnnual => 3,
            Self::Year => 4,
        }
    }

    /// Advance a period anchor by one billing cycle.
    #[must_use]
    pub fn advance(self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::OneOff => None,
            Self::Month => from.checked_add_months(Months::new(1)),
            Self::Quarter => from.checked_add_months(Months::new(3)),
            Self::SemiAnnual => from.checked_add_months(Months::new(6)),
            Self::Year => from.with_year(from.year() + 1),
        }
    }
}
