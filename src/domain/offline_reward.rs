use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct RewardTotals {
    pub exp: u64,
    pub spirit_stones: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OfflineRewardSummary {
    NothingToClaim,
    Claimed {
        hours: u64,
        minutes: u64,
        exp: u64,
        spirit_stones: u64,
    },
}

impl OfflineRewardSummary {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed { .. })
    }
}

impl fmt::Display for OfflineRewardSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToClaim => write!(f, "No offline rewards to claim"),
            Self::Claimed {
                hours,
                minutes,
                exp,
                spirit_stones,
            } => write!(
                f,
                "Offline for {hours}h {minutes}m\nExp gained: {exp}\nSpirit stones gained: {spirit_stones}"
            ),
        }
    }
}

/// Splits a server-reported offline duration into whole hours and minutes.
/// Leftover seconds are dropped.
pub fn summarize_offline_reward(offline_seconds: u64, totals: RewardTotals) -> OfflineRewardSummary {
    if offline_seconds == 0 {
        return OfflineRewardSummary::NothingToClaim;
    }
    OfflineRewardSummary::Claimed {
        hours: offline_seconds / 3600,
        minutes: (offline_seconds % 3600) / 60,
        exp: totals.exp,
        spirit_stones: totals.spirit_stones,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_seconds_has_nothing_to_claim() {
        let summary = summarize_offline_reward(
            0,
            RewardTotals {
                exp: 99,
                spirit_stones: 99,
            },
        );
        assert_eq!(summary, OfflineRewardSummary::NothingToClaim);
        assert_eq!(summary.to_string(), "No offline rewards to claim");
    }

    #[test]
    fn ninety_minutes_is_one_hour_thirty() {
        let summary = summarize_offline_reward(
            5400,
            RewardTotals {
                exp: 10,
                spirit_stones: 20,
            },
        );
        assert_eq!(
            summary,
            OfflineRewardSummary::Claimed {
                hours: 1,
                minutes: 30,
                exp: 10,
                spirit_stones: 20,
            }
        );
        assert!(summary.to_string().starts_with("Offline for 1h 30m"));
    }

    #[test]
    fn under_a_minute_still_counts_as_claimed() {
        let summary = summarize_offline_reward(59, RewardTotals::default());
        assert!(summary.is_claimed());
        assert!(summary.to_string().contains("0h 0m"));
    }

    proptest! {
        #[test]
        fn decomposition_never_exceeds_input(seconds in 1u64..10_000_000u64) {
            let OfflineRewardSummary::Claimed { hours, minutes, .. } =
                summarize_offline_reward(seconds, RewardTotals::default())
            else {
                panic!("positive durations are always claimed");
            };
            prop_assert!(minutes < 60);
            prop_assert!(hours * 3600 + minutes * 60 <= seconds);
            prop_assert!(seconds - (hours * 3600 + minutes * 60) < 60);
        }
    }
}
