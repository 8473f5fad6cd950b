//! Seeded dice for reproducible resolution.
//!
//! Every random decision the engine makes (stat checks, hit/crit/counter
//! rolls, damage variance) draws from a [`Roller`] built from an explicit
//! seed. The seed itself lives in the player state and is advanced with
//! [`advance_seed`], so restoring a checkpoint replays identical rolls.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A percentile check and its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentRoll {
    /// Chance of success, 0-100.
    pub chance: u32,
    /// The d100 result (1-100).
    pub rolled: u32,
}

impl PercentRoll {
    /// A roll succeeds when it lands at or under the chance.
    pub fn succeeded(&self) -> bool {
        self.rolled <= self.chance
    }
}

/// Deterministic roller for a single resolution.
pub struct Roller {
    rng: StdRng,
}

impl Roller {
    /// Create a roller from a seed. Same seed, same sequence.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Roll a d100.
    pub fn d100(&mut self) -> u32 {
        self.rng.gen_range(1..=100)
    }

    /// Roll against a percentage chance. Chances are clamped to 0-100.
    pub fn percent(&mut self, chance: i32) -> PercentRoll {
        let chance = chance.clamp(0, 100) as u32;
        PercentRoll {
            chance,
            rolled: self.d100(),
        }
    }

    /// Inclusive integer range. Returns `low` when the range is empty.
    pub fn range(&mut self, low: i32, high: i32) -> i32 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..=high)
    }
}

/// Advance a roll seed (splitmix64 step).
pub fn advance_seed(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
