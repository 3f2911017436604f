use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RasidError;

/// Currencies a balance can be held in. No conversion between them ever happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Iqd,
    Usd,
    Aed,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Iqd => "IQD",
            Currency::Usd => "USD",
            Currency::Aed => "AED",
        }
    }

    /// Loose comparison against a currency tag found in a partner payload.
    pub fn matches_code(&self, code: &str) -> bool {
        code.trim().eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = RasidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Currency::Iqd, Currency::Usd, Currency::Aed]
            .into_iter()
            .find(|c| c.matches_code(s))
            .ok_or_else(|| RasidError::Configuration(format!("unsupported currency `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("iqd".parse::<Currency>().unwrap(), Currency::Iqd);
        assert_eq!(" USD ".parse::<Currency>().unwrap(), Currency::Usd);
        assert!("EUR".parse::<Currency>().is_err());
    }

    #[test]
    fn serializes_as_iso_code() {
        assert_eq!(serde_json::to_string(&Currency::Aed).unwrap(), r#""AED""#);
    }
}
