//! Seeded Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Seeds are derived from a peer id
//! with SHA-256, so a peer that rejoins under the same id gets the same
//! generated display name.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Adjectives for generated display names.
pub const NAME_ADJECTIVES: [&str; 18] = [
    "Swift", "Brave", "Clever", "Daring", "Bold", "Quick",
    "Bright", "Sharp", "Fierce", "Noble", "Wise", "Silent",
    "Cosmic", "Stellar", "Lunar", "Solar", "Nova", "Nebula",
];

/// Nouns for generated display names.
pub const NAME_NOUNS: [&str; 18] = [
    "Pilot", "Explorer", "Voyager", "Navigator", "Captain", "Commander",
    "Ranger", "Scout", "Ace", "Hunter", "Rider", "Chaser",
    "Star", "Comet", "Rocket", "Phoenix", "Eagle", "Hawk",
];

/// PRNG using the Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use comet_sync::core::rng::SeededRng;
///
/// let mut a = SeededRng::from_peer_id("peer-a");
/// let mut b = SeededRng::from_peer_id("peer-a");
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeededRng {
    state: [u64; 2],
}

impl Default for SeededRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SeededRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG seeded from a peer id.
    pub fn from_peer_id(peer_id: &str) -> Self {
        Self::new(derive_peer_seed(peer_id))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random `f32` in range [0, 1).
    #[inline]
    pub fn next_unit(&mut self) -> f32 {
        // Top 24 bits fit an f32 mantissa exactly
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Generate a display name like "Cosmic Voyager".
    pub fn display_name(&mut self) -> String {
        let adjective = self.choose(&NAME_ADJECTIVES).copied().unwrap_or("Lone");
        let noun = self.choose(&NAME_NOUNS).copied().unwrap_or("Drifter");
        format!("{} {}", adjective, noun)
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a 64-bit seed from a peer id.
pub fn derive_peer_seed(peer_id: &str) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"COMET_DRIFTERS_PEER_V1");
    hasher.update(peer_id.as_bytes());

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = SeededRng::new(42);
        let mut rng2 = SeededRng::new(42);
        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_peer_seeds_differ() {
        assert_ne!(derive_peer_seed("peer-a"), derive_peer_seed("peer-b"));
        assert_eq!(derive_peer_seed("peer-a"), derive_peer_seed("peer-a"));
    }

    #[test]
    fn test_next_int_and_unit_ranges() {
        let mut rng = SeededRng::new(7);
        for _ in 0..1000 {
            assert!(rng.next_int(18) < 18);
            let u = rng.next_unit();
            assert!((0.0..1.0).contains(&u));
        }
        assert_eq!(rng.next_int(0), 0);
    }

    #[test]
    fn test_display_name_uses_word_lists() {
        let mut rng = SeededRng::from_peer_id("some-peer");
        let name = rng.display_name();
        let (adjective, noun) = name.split_once(' ').unwrap();
        assert!(NAME_ADJECTIVES.contains(&adjective));
        assert!(NAME_NOUNS.contains(&noun));

        let again = SeededRng::from_peer_id("some-peer").display_name();
        assert_eq!(name, again);
    }

    #[test]
    fn test_choose_empty() {
        let mut rng = SeededRng::new(1);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
    }
}
