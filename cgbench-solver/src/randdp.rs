//! Linear congruential stream used to generate the benchmark matrix.
//!
//! The state is a 46-bit integer `x`; each step computes
//! `x = a * x mod 2^46` and yields `x * 2^-46`. The product is formed in
//! 128-bit integer arithmetic, which gives the same bits as the classic
//! split-double formulation.

/// Initial state of the stream.
pub const SEED: u64 = 314_159_265;

/// Multiplier, `5^13`.
pub const AMULT: u64 = 1_220_703_125;

const MODULUS_BITS: u32 = 46;
const MODULUS_MASK: u128 = (1u128 << MODULUS_BITS) - 1;
const SCALE: f64 = 1.0 / (1u64 << MODULUS_BITS) as f64;

/// Deterministic stream of doubles in (0, 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomStream {
    state: u64,
    multiplier: u64,
}

impl Default for RandomStream {
    fn default() -> Self {
        Self::new(SEED, AMULT)
    }
}

impl RandomStream {
    pub fn new(seed: u64, multiplier: u64) -> Self {
        Self {
            state: seed & MODULUS_MASK as u64,
            multiplier: multiplier & MODULUS_MASK as u64,
        }
    }

    /// Current 46-bit state.
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Advances the stream and returns the new value.
    pub fn next_value(&mut self) -> f64 {
        let product = self.state as u128 * self.multiplier as u128;
        self.state = (product & MODULUS_MASK) as u64;
        self.state as f64 * SCALE
    }

    /// Returns the next `n` values.
    pub fn fill(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.next_value()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_matches_modular_product() {
        let mut stream = RandomStream::default();
        let expected_state = (SEED as u128 * AMULT as u128 % (1u128 << 46)) as u64;
        let value = stream.next_value();
        assert_eq!(stream.state(), expected_state);
        assert_eq!(value, expected_state as f64 / 70_368_744_177_664.0);
    }

    #[test]
    fn test_values_lie_in_open_unit_interval() {
        let mut stream = RandomStream::default();
        for v in stream.fill(10_000) {
            assert!(v > 0.0 && v < 1.0, "value {} out of range", v);
        }
    }

    #[test]
    fn test_stream_is_reproducible() {
        let mut a = RandomStream::default();
        let mut b = RandomStream::new(SEED, AMULT);
        assert_eq!(a.fill(100), b.fill(100));
    }

    #[test]
    fn test_state_stays_within_46_bits() {
        let mut stream = RandomStream::new(u64::MAX, AMULT);
        for _ in 0..1000 {
            stream.next_value();
            assert!(stream.state() < (1u64 << 46));
        }
    }
}
