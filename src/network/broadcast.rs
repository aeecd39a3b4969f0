//! Gossip relay budget.
//!
//! A broadcast carries a hop budget. Each relay spends one hop; a message
//! that arrives with no hops left is still re-reflected once in a while so
//! that transactions reach the edges of sparse networks.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::Message;
use crate::params::{BROADCAST_ECHOES, REFLECTION_CHANCE};
use crate::types::SignedTransaction;

/// Relay decisions for gossiped transactions
#[derive(Debug)]
pub struct BroadcastRelay {
    rng: ChaCha8Rng,
    echoes: u8,
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            echoes: BROADCAST_ECHOES,
        }
    }
}

impl BroadcastRelay {
    /// Entropy-seeded relay originating broadcasts with `echoes` hops
    #[must_use]
    pub fn with_echoes(echoes: u8) -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            echoes,
        }
    }

    /// Deterministic relay for tests and reproducible runs
    #[must_use]
    pub fn seeded(seed: u64, echoes: u8) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            echoes,
        }
    }

    /// Budget given to transactions this node originates
    #[must_use]
    pub const fn echoes(&self) -> u8 {
        self.echoes
    }

    /// Wrap a locally submitted transaction
    #[must_use]
    pub const fn originate(&self, package: SignedTransaction) -> Message {
        Message::Broadcast {
            echoes: self.echoes,
            package,
        }
    }

    /// Budget to forward a fresh transaction with, `None` to stop here
    pub fn relay(&mut self, echoes: u8) -> Option<u8> {
        if echoes > 0 {
            Some(echoes - 1)
        } else if self.rng.gen_range(0..REFLECTION_CHANCE) == 0 {
            Some(0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hops_decrease() {
        let mut relay = BroadcastRelay::seeded(7, 2);
        assert_eq!(relay.relay(2), Some(1));
        assert_eq!(relay.relay(1), Some(0));
    }

    #[test]
    fn test_reflection_is_rare() {
        let mut relay = BroadcastRelay::seeded(7, 2);
        let reflected = (0..10_000).filter(|_| relay.relay(0).is_some()).count();
        assert!((700..1_300).contains(&reflected), "reflected {reflected} times");
    }
}
