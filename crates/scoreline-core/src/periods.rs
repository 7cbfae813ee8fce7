//! Static period table per sport and season.

use tracing::warn;

use crate::{Period, PeriodType};

/// The one sport with a known period layout.
pub const MODELED_SPORT: &str = "nfl";
pub const REGULAR_PERIODS: u32 = 18;
pub const PLAYOFF_PERIODS: u32 = 4;

/// Ordered periods for a season: regular `1..=18` then playoff `1..=4`.
///
/// Backfill consumes its limit in this order. Sports other than
/// [`MODELED_SPORT`] reuse the same table.
pub fn periods(sport: &str, season: &str) -> Vec<Period> {
    if !sport.eq_ignore_ascii_case(MODELED_SPORT) {
        warn!(sport, season, "no period table for sport; using {MODELED_SPORT} layout");
    }

    let regular = (1..=REGULAR_PERIODS).map(|n| Period::new(season, n.to_string(), PeriodType::Regular));
    let playoff = (1..=PLAYOFF_PERIODS).map(|n| Period::new(season, n.to_string(), PeriodType::Playoff));
    regular.chain(playoff).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_has_18_regular_then_4_playoff_periods() {
        let list = periods("nfl", "2024");
        assert_eq!(list.len(), 22);

        let (regular, playoff) = list.split_at(18);
        assert!(regular.iter().all(|p| p.period_type == PeriodType::Regular));
        assert!(playoff.iter().all(|p| p.period_type == PeriodType::Playoff));

        let regular_numbers: Vec<u32> = regular.iter().filter_map(|p| p.period_number()).collect();
        assert_eq!(regular_numbers, (1..=18).collect::<Vec<_>>());
        let playoff_numbers: Vec<u32> = playoff.iter().filter_map(|p| p.period_number()).collect();
        assert_eq!(playoff_numbers, vec![1, 2, 3, 4]);
        assert!(list.iter().all(|p| p.season == "2024"));
    }

    #[test]
    fn unknown_sport_falls_back_to_same_table() {
        assert_eq!(periods("curling", "2024"), periods("nfl", "2024"));
    }
}
