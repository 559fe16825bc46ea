//! Connection identifiers

use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Width of a connection identifier in bytes (80 bits)
pub const CONNECTION_ID_BYTES: usize = 10;

/// Opaque per-connection identifier used to address results.
///
/// Rendered as a fixed-width lowercase hex string of 20 digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId([u8; CONNECTION_ID_BYTES]);

impl ConnectionId {
    /// Generate a fresh identifier from the thread-local RNG
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generate a fresh identifier from the given RNG
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; CONNECTION_ID_BYTES];
        rng.fill(&mut bytes[..]);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; CONNECTION_ID_BYTES]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Error returned when a string is not a 20-digit hex identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection id: {0:?}")]
pub struct InvalidConnectionId(pub String);

impl FromStr for ConnectionId {
    type Err = InvalidConnectionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidConnectionId(s.to_string());
        if s.len() != CONNECTION_ID_BYTES * 2 || !s.is_ascii() {
            return Err(invalid());
        }

        let mut bytes = [0u8; CONNECTION_ID_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_display_is_fixed_width_lowercase_hex() {
        let id = ConnectionId::from_bytes([0, 1, 2, 0xab, 0xcd, 0xef, 0, 0, 0, 0x0f]);
        assert_eq!(id.to_string(), "000102abcdef0000000f");

        let zero = ConnectionId::from_bytes([0; CONNECTION_ID_BYTES]);
        assert_eq!(zero.to_string().len(), 20);
    }

    #[test]
    fn test_parse_display_agree() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = ConnectionId::generate_with(&mut rng);

        assert_eq!(id.to_string().parse::<ConnectionId>().unwrap(), id);
        assert!("abc".parse::<ConnectionId>().is_err());
        assert!("zz0102abcdef0000000f".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }
}
