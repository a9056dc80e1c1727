use crate::{Error, Generator};
use pinhole_core::base58::{ShortCodeBase58, BASE58_RADIX};
use pinhole_core::ShortCode;
use rand::Rng;

pub const DEFAULT_CODE_LENGTH: usize = 8;
pub const MIN_CODE_LENGTH: usize = 3;
// 58^10 is the largest power of 58 that fits in a u64.
pub const MAX_CODE_LENGTH: usize = 10;

/// Random base58 short codes of a fixed length.
///
/// Each code is a uniformly drawn integer from `[58^(n-1), 58^n)`, which
/// encodes to exactly `n` base58 characters. At the default length of 8 the
/// space holds about 1.26e14 codes.
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    low: u64,
    high: u64,
}

impl RandomGenerator {
    /// Creates a generator producing codes of `length` characters.
    pub fn new(length: usize) -> Result<Self, Error> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            return Err(Error::InvalidLength {
                length,
                min: MIN_CODE_LENGTH,
                max: MAX_CODE_LENGTH,
            });
        }

        let low = BASE58_RADIX.pow(length as u32 - 1);
        let high = low * BASE58_RADIX;

        Ok(Self { low, high })
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        let low = BASE58_RADIX.pow(DEFAULT_CODE_LENGTH as u32 - 1);
        Self {
            low,
            high: low * BASE58_RADIX,
        }
    }
}

impl Generator for RandomGenerator {
    type Output = ShortCode;

    fn generate(&self) -> Self::Output {
        let value = rand::rng().random_range(self.low..self.high);
        ShortCode::generated(ShortCodeBase58::from_u64(value))
    }
}
