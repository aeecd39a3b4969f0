//! Yearly emission schedule.
//!
//! Every block mints the emission of its year; a year is
//! [`YEAR_BLOCKS`] blocks. The schedule decays for sixty years and emits
//! nothing afterwards.

use crate::params::YEAR_BLOCKS;
use crate::types::{Coin, CoinError};

/// Per-block emission of each year as `(whole, fraction)`
pub const EMISSION_SCHEDULE: [(u64, u64); 60] = [
    (1000, 0),
    (800, 0),
    (640, 0),
    (512, 0),
    (410, 0),
    (327, 0),
    (262, 0),
    (210, 0),
    (168, 0),
    (134, 0),
    (107, 0),
    (86, 0),
    (68, 0),
    (55, 0),
    (44, 0),
    (35, 0),
    (28, 0),
    (22, 0),
    (18, 0),
    (15, 0),
    (12, 0),
    (9, 0),
    (7, 0),
    (6, 0),
    (5, 0),
    (4, 0),
    (3, 0),
    (2, 50_000_000),
    (2, 0),
    (1, 50_000_000),
    (1, 20_000_000),
    (1, 0),
    (0, 80_000_000),
    (0, 70_000_000),
    (0, 60_000_000),
    (0, 50_000_000),
    (0, 40_000_000),
    (0, 30_000_000),
    (0, 20_000_000),
    (0, 17_000_000),
    (0, 14_000_000),
    (0, 12_000_000),
    (0, 10_000_000),
    (0, 8_000_000),
    (0, 7_000_000),
    (0, 6_000_000),
    (0, 6_000_000),
    (0, 5_000_000),
    (0, 5_000_000),
    (0, 5_000_000),
    (0, 4_000_000),
    (0, 4_000_000),
    (0, 4_000_000),
    (0, 4_000_000),
    (0, 4_000_000),
    (0, 3_000_000),
    (0, 3_000_000),
    (0, 3_000_000),
    (0, 3_000_000),
    (0, 3_000_000),
];

/// Coins minted by the block at `block_number`
///
/// # Errors
/// Returns error if a schedule entry is malformed
pub fn block_emission(block_number: u64) -> Result<Coin, CoinError> {
    let year = block_number / YEAR_BLOCKS;
    usize::try_from(year)
        .ok()
        .and_then(|index| EMISSION_SCHEDULE.get(index))
        .map_or(Ok(Coin::ZERO), |&(whole, fraction)| Coin::new(whole, fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_decreases() {
        for pair in EMISSION_SCHEDULE.windows(2) {
            let (a, b) = (
                Coin::new(pair[0].0, pair[0].1).unwrap(),
                Coin::new(pair[1].0, pair[1].1).unwrap(),
            );
            assert!(b <= a);
        }
    }

    #[test]
    fn test_year_boundaries() {
        assert_eq!(block_emission(0).unwrap(), Coin::from_whole(1000));
        assert_eq!(block_emission(YEAR_BLOCKS - 1).unwrap(), Coin::from_whole(1000));
        assert_eq!(block_emission(YEAR_BLOCKS).unwrap(), Coin::from_whole(800));
        assert_eq!(
            block_emission(27 * YEAR_BLOCKS).unwrap(),
            Coin::new(2, 50_000_000).unwrap()
        );
    }

    #[test]
    fn test_emission_ends_after_schedule() {
        assert_eq!(
            block_emission(59 * YEAR_BLOCKS).unwrap(),
            Coin::new(0, 3_000_000).unwrap()
        );
        assert_eq!(block_emission(60 * YEAR_BLOCKS).unwrap(), Coin::ZERO);
        assert_eq!(block_emission(u64::MAX).unwrap(), Coin::ZERO);
    }
}
