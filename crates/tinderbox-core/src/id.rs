//! Build identifiers.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a build.
/// Monotonically increasing; the first build created in a store is `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct BuildId(i64);

impl BuildId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Get the underlying integer.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<BuildId> for i64 {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

impl std::str::FromStr for BuildId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id: BuildId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert!("forty-two".parse::<BuildId>().is_err());
    }

    #[test]
    fn test_ids_order_numerically() {
        assert!(BuildId::new(9) < BuildId::new(10));
    }

    #[test]
    fn test_serializes_as_bare_integer() {
        let json = serde_json::to_string(&BuildId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
