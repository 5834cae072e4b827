use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PassError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Stamp,
    Membership,
}

impl CardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardKind::Stamp => "stamp",
            CardKind::Membership => "membership",
        }
    }

    /// Label for the counted unit shown next to the progress figures
    pub fn unit_label(&self) -> &'static str {
        match self {
            CardKind::Stamp => "Stamps",
            CardKind::Membership => "Sessions",
        }
    }
}

impl std::str::FromStr for CardKind {
    type Err = PassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stamp" | "loyalty" => Ok(CardKind::Stamp),
            "membership" => Ok(CardKind::Membership),
            other => Err(PassError::InvalidProgress(format!(
                "unknown card kind '{}'",
                other
            ))),
        }
    }
}

/// Platform-neutral view of an issued card's progress
///
/// Always derived fresh from the current counters before a build; a model is
/// never reused across mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressModel {
    pub card_kind: CardKind,
    pub current: u32,
    pub total: u32,
    pub percent: f64,
    pub completed: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub remaining: u32,
    /// Clock reading the model was derived against
    pub derived_at: DateTime<Utc>,
}

impl ProgressModel {
    pub fn derive(
        card_kind: CardKind,
        current: i64,
        total: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, PassError> {
        Self::derive_at(card_kind, current, total, expires_at, Utc::now())
    }

    /// Same as [`ProgressModel::derive`] with an explicit clock.
    pub fn derive_at(
        card_kind: CardKind,
        current: i64,
        total: i64,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, PassError> {
        if total <= 0 {
            return Err(PassError::InvalidProgress(format!(
                "total must be positive, got {}",
                total
            )));
        }
        if current < 0 {
            return Err(PassError::InvalidProgress(format!(
                "current must not be negative, got {}",
                current
            )));
        }

        let total = u32::try_from(total)
            .map_err(|_| PassError::InvalidProgress(format!("total {} out of range", total)))?;
        let current = u32::try_from(current).map_err(|_| {
            PassError::InvalidProgress(format!("current {} out of range", current))
        })?;

        let completed = current >= total;
        let percent = if completed {
            100.0
        } else {
            (f64::from(current) / f64::from(total) * 100.0).clamp(0.0, 100.0)
        };

        // Stamp cards do not expire
        let expires_at = match card_kind {
            CardKind::Membership => expires_at,
            CardKind::Stamp => None,
        };
        let expired = expires_at.map(|at| now > at).unwrap_or(false);

        Ok(Self {
            card_kind,
            current,
            total,
            percent,
            completed,
            expires_at,
            expired,
            remaining: total.saturating_sub(current),
            derived_at: now,
        })
    }

    /// Percent rounded half up from the counters; an unfinished card tops
    /// out at 99
    pub fn whole_percent(&self) -> u32 {
        if self.completed {
            return 100;
        }
        let total = u64::from(self.total);
        let rounded = (u64::from(self.current) * 100 + total / 2) / total;
        rounded.min(99) as u32
    }

    /// Whole days left before expiry, counting a partial day as one
    pub fn days_until_expiry(&self) -> Option<i64> {
        let expires_at = self.expires_at?;
        let seconds = (expires_at - self.derived_at).num_seconds();
        if seconds <= 0 {
            return Some(0);
        }
        Some((seconds + 86_399) / 86_400)
    }

    pub fn is_expiring_within(&self, days: i64) -> bool {
        if self.expired {
            return false;
        }
        matches!(self.days_until_expiry(), Some(left) if left <= days)
    }

    pub fn status_label(&self) -> String {
        if self.expired {
            "Expired".to_string()
        } else if self.completed {
            "Completed".to_string()
        } else {
            format!("{} remaining", self.remaining)
        }
    }

    pub fn fraction_label(&self) -> String {
        format!("{}/{}", self.current, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_derive_partial_stamp_card() {
        let progress = ProgressModel::derive(CardKind::Stamp, 7, 10, None).unwrap();

        assert_eq!(progress.percent, 70.0);
        assert!(!progress.completed);
        assert_eq!(progress.remaining, 3);
        assert_eq!(progress.status_label(), "3 remaining");
        assert_eq!(progress.fraction_label(), "7/10");
    }

    #[test]
    fn test_derive_completed_stamp_card() {
        let progress = ProgressModel::derive(CardKind::Stamp, 10, 10, None).unwrap();

        assert_eq!(progress.percent, 100.0);
        assert!(progress.completed);
        assert_eq!(progress.remaining, 0);
        assert_eq!(progress.status_label(), "Completed");
    }

    #[test]
    fn test_overshoot_is_clamped() {
        let progress = ProgressModel::derive(CardKind::Stamp, 14, 10, None).unwrap();

        assert_eq!(progress.percent, 100.0);
        assert_eq!(progress.remaining, 0);
        assert_eq!(progress.whole_percent(), 100);
    }

    #[test]
    fn test_invalid_counters_are_rejected() {
        assert!(matches!(
            ProgressModel::derive(CardKind::Stamp, 1, 0, None),
            Err(PassError::InvalidProgress(_))
        ));
        assert!(matches!(
            ProgressModel::derive(CardKind::Stamp, 1, -5, None),
            Err(PassError::InvalidProgress(_))
        ));
        assert!(matches!(
            ProgressModel::derive(CardKind::Membership, -1, 10, None),
            Err(PassError::InvalidProgress(_))
        ));
    }

    #[test]
    fn test_percent_bounds_and_completion_agree() {
        for total in 1..=40_i64 {
            for current in 0..=(total + 5) {
                let progress =
                    ProgressModel::derive_at(CardKind::Stamp, current, total, None, fixed_now())
                        .unwrap();
                assert!((0.0..=100.0).contains(&progress.percent));
                assert_eq!(
                    progress.percent == 100.0,
                    progress.completed,
                    "current={} total={}",
                    current,
                    total
                );
            }
        }
    }

    #[test]
    fn test_whole_percent_uses_exact_counters() {
        for total in 1..=200_u64 {
            for current in 0..total {
                let progress = ProgressModel::derive_at(
                    CardKind::Stamp,
                    current as i64,
                    total as i64,
                    None,
                    fixed_now(),
                )
                .unwrap();
                let expected = ((current * 100 + total / 2) / total).min(99) as u32;
                assert_eq!(
                    progress.whole_percent(),
                    expected,
                    "current={} total={}",
                    current,
                    total
                );
            }
        }

        let at = |current, total| {
            ProgressModel::derive_at(CardKind::Stamp, current, total, None, fixed_now())
                .unwrap()
                .whole_percent()
        };
        assert_eq!(at(57, 100), 57);
        assert_eq!(at(29, 50), 58);
        assert_eq!(at(2, 3), 67);
        assert_eq!(at(199, 200), 99);
        assert_eq!(at(200, 200), 100);
    }

    #[test]
    fn test_completed_is_monotonic_in_current() {
        let total = 12;
        let mut seen_completed = false;
        for current in 0..30 {
            let progress =
                ProgressModel::derive_at(CardKind::Stamp, current, total, None, fixed_now())
                    .unwrap();
            if seen_completed {
                assert!(progress.completed, "completion flipped back at {}", current);
            }
            seen_completed |= progress.completed;
        }
        assert!(seen_completed);
    }

    #[test]
    fn test_membership_expiry() {
        let now = fixed_now();
        let soon = ProgressModel::derive_at(
            CardKind::Membership,
            5,
            20,
            Some(now + Duration::days(10)),
            now,
        )
        .unwrap();

        assert!(!soon.expired);
        assert_eq!(soon.days_until_expiry(), Some(10));
        assert!(soon.is_expiring_within(14));
        assert!(!soon.is_expiring_within(7));

        let lapsed = ProgressModel::derive_at(
            CardKind::Membership,
            5,
            20,
            Some(now - Duration::hours(1)),
            now,
        )
        .unwrap();

        assert!(lapsed.expired);
        assert!(!lapsed.is_expiring_within(14));
        assert_eq!(lapsed.status_label(), "Expired");
    }

    #[test]
    fn test_partial_day_counts_as_a_day() {
        let now = fixed_now();
        let progress = ProgressModel::derive_at(
            CardKind::Membership,
            1,
            4,
            Some(now + Duration::hours(30)),
            now,
        )
        .unwrap();

        assert_eq!(progress.days_until_expiry(), Some(2));
    }

    #[test]
    fn test_stamp_cards_ignore_expiry() {
        let now = fixed_now();
        let progress = ProgressModel::derive_at(
            CardKind::Stamp,
            1,
            4,
            Some(now - Duration::days(3)),
            now,
        )
        .unwrap();

        assert!(progress.expires_at.is_none());
        assert!(!progress.expired);
    }

    #[test]
    fn test_card_kind_parsing() {
        assert_eq!("stamp".parse::<CardKind>().unwrap(), CardKind::Stamp);
        assert_eq!(
            "membership".parse::<CardKind>().unwrap(),
            CardKind::Membership
        );
        assert!("punch".parse::<CardKind>().is_err());
    }
}
