use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Currency;
use crate::error::RasidError;

pub type BalanceId = i64;
pub type SourceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceType {
    Airline,
    Supplier,
}

impl BalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceType::Airline => "airline",
            BalanceType::Supplier => "supplier",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RasidError> {
        match s {
            "airline" => Ok(BalanceType::Airline),
            "supplier" => Ok(BalanceType::Supplier),
            other => Err(RasidError::Configuration(format!(
                "unknown balance type `{other}`"
            ))),
        }
    }
}

/// Who wrote a record: a human editor or the sync engine's system identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Editor {
    pub email: String,
    pub name: String,
}

/// Alert thresholds. Always `red < yellow < green` once constructed through [`Limits::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub red: f64,
    pub yellow: f64,
    pub green: f64,
}

impl Limits {
    pub fn new(red: f64, yellow: f64, green: f64) -> Result<Self, RasidError> {
        let limits = Self { red, yellow, green };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), RasidError> {
        if ![self.red, self.yellow, self.green]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(RasidError::Configuration(
                "limits must be finite numbers".to_string(),
            ));
        }
        if !(self.red < self.yellow && self.yellow < self.green) {
            return Err(RasidError::Configuration(format!(
                "limits must satisfy red < yellow < green (got red={}, yellow={}, green={})",
                self.red, self.yellow, self.green
            )));
        }
        Ok(())
    }
}

/// Risk tier derived from a balance amount and its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Red,
    Yellow,
    Green,
    Gray,
}

/// Whether a human or an active connection controls a balance's value.
///
/// On the wire and in storage this is the `isAutoSync` / `apiSource` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OwnershipFields", into = "OwnershipFields")]
pub enum Ownership {
    Manual,
    Auto { api_source: String },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnershipFields {
    is_auto_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_source: Option<String>,
}

impl Ownership {
    pub fn from_fields(is_auto_sync: bool, api_source: Option<String>) -> Result<Self, String> {
        match (is_auto_sync, api_source) {
            (true, Some(api_source)) => Ok(Ownership::Auto { api_source }),
            (false, None) => Ok(Ownership::Manual),
            (true, None) => Err("isAutoSync is set without apiSource".to_string()),
            (false, Some(src)) => Err(format!("apiSource `{src}` is set without isAutoSync")),
        }
    }

    pub fn is_auto_sync(&self) -> bool {
        matches!(self, Ownership::Auto { .. })
    }

    pub fn api_source(&self) -> Option<&str> {
        match self {
            Ownership::Auto { api_source } => Some(api_source),
            Ownership::Manual => None,
        }
    }

    pub fn is_owned_by(&self, connection_name: &str) -> bool {
        self.api_source() == Some(connection_name)
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Manual => f.write_str("manual"),
            Ownership::Auto { api_source } => write!(f, "auto-sync ({api_source})"),
        }
    }
}

impl TryFrom<OwnershipFields> for Ownership {
    type Error = String;

    fn try_from(value: OwnershipFields) -> Result<Self, Self::Error> {
        Ownership::from_fields(value.is_auto_sync, value.api_source)
    }
}

impl From<Ownership> for OwnershipFields {
    fn from(value: Ownership) -> Self {
        match value {
            Ownership::Manual => OwnershipFields {
                is_auto_sync: false,
                api_source: None,
            },
            Ownership::Auto { api_source } => OwnershipFields {
                is_auto_sync: true,
                api_source: Some(api_source),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub id: BalanceId,
    pub source_id: SourceId,
    pub source_name: String,
    pub amount: f64,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    pub limits: Option<Limits>,
    #[serde(flatten)]
    pub ownership: Ownership,
    pub notes: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub last_updated_by: Editor,
}

/// An airline or supplier that balances and connections refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSource {
    pub id: SourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: BalanceType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: BalanceType,
}

/// Manual creation of a balance; name and type come from the source record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBalance {
    pub source_id: SourceId,
    pub amount: f64,
    pub currency: Currency,
    #[serde(default)]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Manual edit. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancePatch {
    pub amount: Option<f64>,
    pub currency: Option<Currency>,
    pub notes: Option<String>,
}

impl BalancePatch {
    /// Whether applying the patch would change the value a connection owns.
    pub fn touches_value(&self, current: &Balance) -> bool {
        self.amount.is_some_and(|a| a != current.amount)
            || self.currency.is_some_and(|c| c != current.currency)
    }
}

/// Read-path projection with the computed tier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    #[serde(flatten)]
    pub balance: Balance,
    pub tier: Tier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_require_strict_order() {
        assert!(Limits::new(1000.0, 5000.0, 10000.0).is_ok());
        assert!(Limits::new(5000.0, 5000.0, 10000.0).is_err());
        assert!(Limits::new(1000.0, 12000.0, 10000.0).is_err());
        assert!(Limits::new(f64::NAN, 5000.0, 10000.0).is_err());
    }

    #[test]
    fn ownership_co_invariant() {
        assert!(Ownership::from_fields(true, None).is_err());
        assert!(Ownership::from_fields(false, Some("x".into())).is_err());
        assert_eq!(
            Ownership::from_fields(true, Some("iraqi-airways".into())).unwrap(),
            Ownership::Auto {
                api_source: "iraqi-airways".into()
            }
        );
    }

    #[test]
    fn balance_wire_shape_flattens_ownership() {
        let balance = Balance {
            id: 3,
            source_id: 9,
            source_name: "Cham Wings".to_string(),
            amount: -2500.0,
            currency: Currency::Usd,
            balance_type: BalanceType::Airline,
            limits: None,
            ownership: Ownership::Auto {
                api_source: "cham-api".to_string(),
            },
            notes: None,
            last_updated: Utc::now(),
            last_updated_by: Editor {
                email: "auto-sync@system".to_string(),
                name: "Auto Sync".to_string(),
            },
        };
        let json = serde_json::to_value(&balance).unwrap();
        assert_eq!(json["isAutoSync"], true);
        assert_eq!(json["apiSource"], "cham-api");
        assert_eq!(json["type"], "airline");

        let back: Balance = serde_json::from_value(json).unwrap();
        assert_eq!(back.ownership, balance.ownership);
    }

    #[test]
    fn manual_balance_omits_api_source() {
        let json = serde_json::to_value(Ownership::Manual).unwrap();
        assert_eq!(json, serde_json::json!({ "isAutoSync": false }));
    }
}
