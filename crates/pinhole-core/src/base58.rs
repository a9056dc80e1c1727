use std::fmt::Display;

/// Number of symbols in the base58 (bitcoin) alphabet.
pub const BASE58_RADIX: u64 = 58;

/// A short code encoded as base58 string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ShortCodeBase58(String);

impl ShortCodeBase58 {
    /// Creates a new `ShortCodeBase58` by encoding the given bytes as base58.
    ///
    /// Leading zero bytes are encoded as `'1'`, so the output length depends on
    /// the byte layout as well as the value. Use [`ShortCodeBase58::from_u64`]
    /// when the length has to follow the numeric value only.
    pub fn new<T: AsRef<[u8]>>(bytes: T) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// Encodes an integer as base58 without leading padding.
    ///
    /// Any value in `[58^(n-1), 58^n)` encodes to exactly `n` characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use pinhole_core::base58::ShortCodeBase58;
    ///
    /// assert_eq!(ShortCodeBase58::from_u64(57).as_str(), "z");
    /// assert_eq!(ShortCodeBase58::from_u64(58).as_str(), "21");
    /// ```
    pub fn from_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let first = bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(bytes.len() - 1);
        Self::new(&bytes[first..])
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ShortCodeBase58 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCodeBase58").field(&self.0).finish()
    }
}

impl Display for ShortCodeBase58 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u64_has_no_padding() {
        assert_eq!(ShortCodeBase58::from_u64(0).as_str(), "1");
        assert_eq!(ShortCodeBase58::from_u64(1).as_str(), "2");
        assert_eq!(ShortCodeBase58::from_u64(BASE58_RADIX.pow(7)).as_str(), "21111111");
    }

    #[test]
    fn length_follows_magnitude() {
        let low = BASE58_RADIX.pow(7);
        let high = BASE58_RADIX.pow(8) - 1;

        assert_eq!(ShortCodeBase58::from_u64(low).as_str().len(), 8);
        assert_eq!(ShortCodeBase58::from_u64(high).as_str().len(), 8);
        assert_eq!(ShortCodeBase58::from_u64(high + 1).as_str().len(), 9);
    }

    #[test]
    fn bytes_round_trip_through_bs58() {
        let code = ShortCodeBase58::new([0x10, 0x20, 0x30]);
        let decoded = bs58::decode(code.as_str()).into_vec().unwrap();
        assert_eq!(decoded, vec![0x10, 0x20, 0x30]);
    }
}
