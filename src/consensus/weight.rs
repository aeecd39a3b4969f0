//! Stake-weighted block weight and difficulty retargeting.
//!
//! Every block carries a `delta` drawn from a deterministic lottery seeded
//! by the producer's address, its balance and the parent hash. Larger
//! balances produce larger deltas on average, and the chain with the
//! larger sum of deltas (`c_sum`) wins. The consensus constant `c_const`
//! divides every delta and is doubled or halved whenever a full window of
//! `delta_step` blocks was too heavy or too light.

use std::cmp::Ordering;

use crate::crypto::{Hash, Hasher};
use crate::params::BLOCK_MINE_DELAY;
use crate::types::{Address, BlockHeader, Coin};

/// Parameters of the delta lottery and the retarget rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Lottery range, the drawn distance is in `[0, dist_max)`
    pub dist_max: u64,
    /// Retarget window length in blocks
    pub delta_step: usize,
    /// Average delta above which `c_const` doubles
    pub delta_up: u64,
    /// Average delta below which `c_const` halves
    pub delta_down: u64,
    /// Upper bound of a single delta
    pub delta_max: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            dist_max: 4_294_967_296,
            delta_step: 10,
            delta_up: 100_000_000,
            delta_down: 80_000_000,
            delta_max: 120_000_000,
        }
    }
}

/// Draw the delta of a block produced by `address`.
///
/// The result is at least 1 so that `c_sum` strictly increases.
#[must_use]
pub fn calc_delta(
    address: &Address,
    balance: Coin,
    prev_hash: &Hash,
    c_const: u64,
    params: &ConsensusParams,
) -> u64 {
    let mut hasher = Hasher::new();
    hasher
        .update(address.as_bytes())
        .update(&balance.whole().to_le_bytes())
        .update(&balance.fraction().to_le_bytes())
        .update(prev_hash.as_bytes());
    let dist = hasher.finalize().prefix_u64() % params.dist_max.max(1);

    let numerator = u128::from(balance.whole()) * u128::from(params.dist_max);
    let denominator = (u128::from(dist) + 1) * u128::from(c_const.max(1));
    let delta = (numerator / denominator).min(u128::from(params.delta_max));

    // bounded by delta_max above
    #[allow(clippy::cast_possible_truncation)]
    let delta = delta as u64;
    delta.max(1)
}

/// Derive the `c_const` expected for the block after `window`.
///
/// `window` lists `(delta, c_const)` of the most recent blocks, oldest
/// first; only the last `delta_step` entries are considered. Inside a
/// window the constant may change at most once, and only by doubling or
/// halving. A retarget is due when every entry of a full window carries the
/// same constant and the summed deltas leave the `[down, up]` band.
///
/// Returns the expected constant and a description of the first defect
/// found in the window, empty when there is none.
#[must_use]
pub fn check_delta_vector(window: &[(u64, u64)], params: &ConsensusParams) -> (u64, String) {
    let step = params.delta_step.max(1);
    let start = window.len().saturating_sub(step);
    let window = &window[start..];

    let Some(&(_, last_c_const)) = window.last() else {
        return (1, String::new());
    };

    let mut error = String::new();
    let mut changes = 0usize;
    for (offset, pair) in window.windows(2).enumerate() {
        let (previous, current) = (pair[0].1, pair[1].1);
        if current == previous {
            continue;
        }
        changes += 1;
        if current != previous.saturating_mul(2) && current != (previous / 2).max(1) {
            error = format!(
                "c_const {previous} -> {current} at window position {} is neither a doubling nor a halving",
                offset + 1
            );
            break;
        }
        if changes > 1 {
            error = format!("c_const changed more than once within {step} blocks");
            break;
        }
    }
    if error.is_empty() {
        if let Some(position) = window.iter().position(|(_, c)| *c == 0) {
            error = format!("zero c_const at window position {position}");
        }
    }

    let uniform = window.iter().all(|(_, c)| *c == last_c_const);
    if window.len() < step || !uniform {
        return (last_c_const, error);
    }

    let step_u128 = step as u128;
    let sum: u128 = window.iter().map(|(delta, _)| u128::from(*delta)).sum();
    let expected = if sum > step_u128 * u128::from(params.delta_up) {
        last_c_const.saturating_mul(2)
    } else if sum < step_u128 * u128::from(params.delta_down) {
        (last_c_const / 2).max(1)
    } else {
        last_c_const
    };
    (expected, error)
}

/// Structural continuity between two consecutive headers.
///
/// Returns `true` when `next` cannot follow `previous`.
#[must_use]
pub fn check_headers(next: &BlockHeader, previous: &BlockHeader) -> bool {
    if next.block_number != previous.block_number + 1 {
        return true;
    }
    if next.c_sum <= previous.c_sum || Some(next.c_sum) != previous.c_sum.checked_add(next.delta)
    {
        return true;
    }
    let c = previous.c_const;
    if next.c_const != c && next.c_const != c.saturating_mul(2) && next.c_const != (c / 2).max(1) {
        return true;
    }
    next.time_signed != previous.time_signed + BLOCK_MINE_DELAY
}

/// Outcome of comparing two candidate chains
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkChoice {
    /// Keep the installed chain
    Incumbent,
    /// Switch to the other chain
    Challenger,
    /// Equal weight, the tip tie-break decides
    Tie,
}

/// Compare cumulative weights
#[must_use]
pub fn compare_weight(incumbent_c_sum: u64, challenger_c_sum: u64) -> ForkChoice {
    match challenger_c_sum.cmp(&incumbent_c_sum) {
        Ordering::Greater => ForkChoice::Challenger,
        Ordering::Less => ForkChoice::Incumbent,
        Ordering::Equal => ForkChoice::Tie,
    }
}

/// Break a tie between two competing blocks at the same height.
///
/// Compares the producers' pool-layer balances; the installed block is
/// kept unless the challenger's producer is strictly richer.
#[must_use]
pub fn break_single_block_tie(incumbent_balance: Coin, challenger_balance: Coin) -> ForkChoice {
    if challenger_balance > incumbent_balance {
        ForkChoice::Challenger
    } else {
        ForkChoice::Incumbent
    }
}
