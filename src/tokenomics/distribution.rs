//! Proportional splitting of an amount by exact fractional weights.

use std::collections::BTreeMap;

use super::RewardError;
use crate::types::{Address, Coin};

/// Share `numerator / denominator` of an amount
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardWeight {
    /// Recipient
    pub to: Address,
    /// Share numerator
    pub numerator: u128,
    /// Grand total of all numerators in the same distribution
    pub denominator: u128,
}

/// Turn raw per-address numerators into fractions of their grand total,
/// dropping zero entries
#[must_use]
pub fn to_weights(numerators: &BTreeMap<Address, u128>) -> Vec<RewardWeight> {
    let denominator: u128 = numerators.values().sum();
    numerators
        .iter()
        .filter(|(_, numerator)| **numerator > 0)
        .map(|(to, numerator)| RewardWeight {
            to: *to,
            numerator: *numerator,
            denominator,
        })
        .collect()
}

/// Split `total` by `weights`.
///
/// Every recipient but the last gets its truncated share; the last absorbs
/// the rounding so the parts add up to `total` exactly. Without weights
/// the whole amount is returned as leftover.
///
/// # Errors
/// Returns error if a weight has a zero denominator or the shares exceed
/// `total`
pub fn distribute_rewards(
    weights: &[RewardWeight],
    total: Coin,
) -> Result<(Vec<(Address, Coin)>, Coin), RewardError> {
    let Some((last, rest)) = weights.split_last() else {
        return Ok((Vec::new(), total));
    };
    let mut parts = Vec::with_capacity(weights.len());
    let mut given = Coin::ZERO;
    for weight in rest {
        let share = total.mul_div(weight.numerator, weight.denominator)?;
        given = given.checked_add(share)?;
        parts.push((weight.to, share));
    }
    parts.push((last.to, total.checked_sub(given)?));
    Ok((parts, Coin::ZERO))
}

/// Split `total` by percentage between four buckets; rounding goes to the
/// first bucket
///
/// # Errors
/// Returns error on arithmetic failure
pub fn split_by_percentages(total: Coin, percentages: [u8; 4]) -> Result<[Coin; 4], RewardError> {
    let mut parts = [Coin::ZERO; 4];
    let mut given = Coin::ZERO;
    for (part, percent) in parts.iter_mut().zip(percentages).skip(1) {
        *part = total.percentage(percent)?;
        given = given.checked_add(*part)?;
    }
    parts[0] = total.checked_sub(given)?;
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn weights_from(numerators: &[u128]) -> Vec<RewardWeight> {
        let map: BTreeMap<Address, u128> = numerators
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let mut bytes = [0u8; 32];
                bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
                (Address::from_bytes(bytes), *n)
            })
            .collect();
        to_weights(&map)
    }

    #[test]
    fn test_empty_weights_leave_everything() {
        let (parts, leftover) = distribute_rewards(&[], Coin::from_whole(7)).unwrap();
        assert!(parts.is_empty());
        assert_eq!(leftover, Coin::from_whole(7));
    }

    #[test]
    fn test_last_recipient_absorbs_rounding() {
        let weights = weights_from(&[1, 1, 1]);
        let total = Coin::new(0, 10).unwrap();
        let (parts, leftover) = distribute_rewards(&weights, total).unwrap();
        let amounts: Vec<Coin> = parts.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            amounts,
            vec![Coin::new(0, 3).unwrap(), Coin::new(0, 3).unwrap(), Coin::new(0, 4).unwrap()]
        );
        assert!(leftover.is_zero());
    }

    #[test]
    fn test_zero_weights_dropped() {
        let weights = weights_from(&[0, 5]);
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].denominator, 5);
    }

    #[test]
    fn test_percentage_split() {
        let parts = split_by_percentages(Coin::new(0, 7).unwrap(), [10, 50, 15, 25]).unwrap();
        let sum = parts
            .iter()
            .try_fold(Coin::ZERO, |acc, part| acc.checked_add(*part))
            .unwrap();
        assert_eq!(sum, Coin::new(0, 7).unwrap());
        assert_eq!(parts[1], Coin::new(0, 3).unwrap());

        let parts = split_by_percentages(Coin::from_whole(1000), [10, 50, 15, 25]).unwrap();
        assert_eq!(
            parts,
            [
                Coin::from_whole(100),
                Coin::from_whole(500),
                Coin::from_whole(150),
                Coin::from_whole(250)
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_parts_sum_to_total(
            numerators in prop::collection::vec(1u128..1_000_000, 1..20),
            whole in 0u64..1_000_000_000,
            fraction in 0u64..100_000_000,
        ) {
            let total = Coin::new(whole, fraction).unwrap();
            let weights = weights_from(&numerators);
            let (parts, leftover) = distribute_rewards(&weights, total).unwrap();
            let sum = parts
                .iter()
                .try_fold(Coin::ZERO, |acc, (_, part)| acc.checked_add(*part))
                .unwrap();
            prop_assert_eq!(sum, total);
            prop_assert!(leftover.is_zero());
            prop_assert_eq!(parts.len(), numerators.len());
        }
    }
}
