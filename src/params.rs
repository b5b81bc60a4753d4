//! Consensus parameters
//!
//! All five parameters are injectable through construction of the claim
//! trie and the node manager so tests can shrink the activation and
//! expiration windows. No hidden globals.

use crate::claim::Height;

/// Default cap on the activation delay, in blocks.
pub const DEFAULT_MAX_ACTIVE_DELAY: Height = 4032;

/// Default divisor applied to the blocks-since-takeover count.
pub const DEFAULT_ACTIVE_DELAY_FACTOR: Height = 32;

/// Default claim lifetime before the expiration fork.
pub const DEFAULT_ORIGINAL_CLAIM_EXPIRATION: Height = 262_974;

/// Default claim lifetime after the expiration fork.
pub const DEFAULT_EXTENDED_CLAIM_EXPIRATION: Height = 2_102_400;

/// Default height at which the extended expiration takes effect.
pub const DEFAULT_EXTENDED_CLAIM_EXPIRATION_FORK_HEIGHT: Height = 400_155;

/// Consensus parameters for bidding delays and claim expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Cap on the activation delay, in blocks.
    pub max_active_delay: Height,
    /// Divisor applied to the blocks-since-takeover count.
    pub active_delay_factor: Height,
    /// Claim lifetime before the expiration fork.
    pub original_claim_expiration: Height,
    /// Claim lifetime after the expiration fork.
    pub extended_claim_expiration: Height,
    /// Height at which the extended expiration takes effect.
    pub extended_claim_expiration_fork_height: Height,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_active_delay: DEFAULT_MAX_ACTIVE_DELAY,
            active_delay_factor: DEFAULT_ACTIVE_DELAY_FACTOR,
            original_claim_expiration: DEFAULT_ORIGINAL_CLAIM_EXPIRATION,
            extended_claim_expiration: DEFAULT_EXTENDED_CLAIM_EXPIRATION,
            extended_claim_expiration_fork_height: DEFAULT_EXTENDED_CLAIM_EXPIRATION_FORK_HEIGHT,
        }
    }
}

impl Params {
    /// Number of blocks a newly accepted claim or support must wait before
    /// it can win the bid at a name whose controller took over at
    /// `tookover`.
    pub fn activation_delay(&self, current: Height, tookover: Height) -> Height {
        let delay = (current - tookover) / self.active_delay_factor;
        delay.min(self.max_active_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_delay_scales_with_distance() {
        let params = Params::default();
        assert_eq!(params.activation_delay(1, 1), 0);
        assert_eq!(params.activation_delay(33, 1), 1);
        assert_eq!(params.activation_delay(100, 1), 3);
    }

    #[test]
    fn test_activation_delay_is_capped() {
        let params = Params::default();
        assert_eq!(params.activation_delay(1_000_000, 0), 4032);
    }

    #[test]
    fn test_activation_delay_near_genesis() {
        // tookover = 0 anchors the delay to the height itself
        let params = Params::default();
        assert_eq!(params.activation_delay(64, 0), 2);
    }
}
