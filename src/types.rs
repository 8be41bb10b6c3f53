// =============================================================================
// Shared domain types — symbols and contract categories
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// An exchange symbol identifier, e.g. `BTCUSDT`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Symbol {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Margin category: USDT-quoted perpetuals vs. coin-margined perpetuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Linear,
    Inverse,
}

impl Category {
    /// Heuristic fallback used when instrument metadata doesn't carry an
    /// official category: symbols quoted in USDT are linear, everything
    /// else is treated as inverse.
    pub fn from_symbol_heuristic(symbol: &str) -> Self {
        if symbol.contains("USDT") {
            Category::Linear
        } else {
            Category::Inverse
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Linear => "linear",
            Category::Inverse => "inverse",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Category::Linear),
            "inverse" => Ok(Category::Inverse),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_detects_linear_from_usdt() {
        assert_eq!(Category::from_symbol_heuristic("BTCUSDT"), Category::Linear);
    }

    #[test]
    fn heuristic_falls_back_to_inverse() {
        assert_eq!(Category::from_symbol_heuristic("BTCUSD"), Category::Inverse);
    }

    #[test]
    fn symbol_displays_as_raw_string() {
        let s = Symbol::new("ETHUSDT");
        assert_eq!(s.to_string(), "ETHUSDT");
        assert_eq!(s.as_str(), "ETHUSDT");
    }
}
