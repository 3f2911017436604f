//! Reads one balance out of a partner payload.
//!
//! Partners answer in a handful of shapes. Each shape has its own matcher and
//! the matchers are tried in a fixed order; the first hit wins.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ExtractionError;
use crate::types::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    /// `wallets: [{currency, balance}, ...]`
    Wallets,
    /// `wallet: {currency, balance}`
    Wallet,
    /// top-level `balance` / `amount` / `credit`
    BareField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Amount {
    pub value: f64,
    pub currency: Currency,
    pub strategy: MatchStrategy,
}

pub trait BalanceMatcher: Send + Sync {
    fn strategy(&self) -> MatchStrategy;

    /// The balance for `expected`, if this shape is present and carries one.
    fn extract(&self, payload: &Map<String, Value>, expected: Currency) -> Option<f64>;
}

pub struct WalletsMatcher;
pub struct WalletMatcher;
pub struct BareFieldMatcher;

const BARE_FIELDS: [&str; 3] = ["balance", "amount", "credit"];

pub const MATCHERS: [&dyn BalanceMatcher; 3] = [&WalletsMatcher, &WalletMatcher, &BareFieldMatcher];

/// The payload itself, then its `data` object when there is one.
fn scopes(payload: &Map<String, Value>) -> impl Iterator<Item = &Map<String, Value>> {
    std::iter::once(payload).chain(payload.get("data").and_then(Value::as_object))
}

fn wallet_balance(wallet: &Value, expected: Currency) -> Option<f64> {
    let currency = wallet.get("currency")?.as_str()?;
    if !expected.matches_code(currency) {
        return None;
    }
    wallet.get("balance")?.as_f64()
}

impl BalanceMatcher for WalletsMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::Wallets
    }

    fn extract(&self, payload: &Map<String, Value>, expected: Currency) -> Option<f64> {
        scopes(payload)
            .filter_map(|scope| scope.get("wallets")?.as_array())
            .flatten()
            .find_map(|wallet| wallet_balance(wallet, expected))
    }
}

impl BalanceMatcher for WalletMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::Wallet
    }

    fn extract(&self, payload: &Map<String, Value>, expected: Currency) -> Option<f64> {
        scopes(payload)
            .filter_map(|scope| scope.get("wallet"))
            .find_map(|wallet| wallet_balance(wallet, expected))
    }
}

impl BalanceMatcher for BareFieldMatcher {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::BareField
    }

    // No currency tag in this shape: the caller's configured currency is assumed.
    fn extract(&self, payload: &Map<String, Value>, _expected: Currency) -> Option<f64> {
        BARE_FIELDS
            .iter()
            .find_map(|field| payload.get(*field)?.as_f64())
    }
}

/// Decode a partner response body. A 2xx answer that is not JSON is the
/// partner's payload being wrong, not the transport.
pub fn parse_payload(body: &[u8]) -> Result<Value, ExtractionError> {
    serde_json::from_slice(body)
        .map_err(|e| ExtractionError::MalformedResponse(format!("body is not JSON: {e}")))
}

/// Extract the balance for `expected` from a raw partner payload.
pub fn normalize(raw: &Value, expected: Currency) -> Result<Amount, ExtractionError> {
    let payload = raw.as_object().ok_or_else(|| {
        ExtractionError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_kind(raw)
        ))
    })?;
    MATCHERS
        .iter()
        .find_map(|matcher| {
            matcher.extract(payload, expected).map(|value| Amount {
                value,
                currency: expected,
                strategy: matcher.strategy(),
            })
        })
        .ok_or(ExtractionError::NoBalanceFound)
}

/// Currency tags of every wallet in the payload, for discovery output.
pub fn wallet_currencies(raw: &Value) -> Vec<String> {
    let Some(payload) = raw.as_object() else {
        return Vec::new();
    };
    scopes(payload)
        .flat_map(|scope| {
            let many = scope
                .get("wallets")
                .and_then(Value::as_array)
                .into_iter()
                .flatten();
            many.chain(scope.get("wallet"))
        })
        .filter_map(|w| w.get("currency")?.as_str().map(str::to_string))
        .collect()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn nested_wallet_under_data() {
        let raw = json!({"data": {"wallet": {"currency": "IQD", "balance": 24723299.95}}});
        let amount = normalize(&raw, Currency::Iqd).unwrap();
        assert_eq!(amount.value, 24723299.95);
        assert_eq!(amount.currency, Currency::Iqd);
        assert_eq!(amount.strategy, MatchStrategy::Wallet);
    }

    #[test]
    fn wallets_without_expected_currency_fall_through() {
        let raw = json!({"wallets": [{"currency": "IQD", "balance": 25109543.95}]});
        assert_eq!(
            normalize(&raw, Currency::Usd),
            Err(ExtractionError::NoBalanceFound)
        );
    }

    #[test]
    fn bare_balance_takes_configured_currency() {
        let raw = json!({"balance": 15000});
        for currency in [Currency::Iqd, Currency::Usd, Currency::Aed] {
            let amount = normalize(&raw, currency).unwrap();
            assert_eq!(amount.value, 15000.0);
            assert_eq!(amount.currency, currency);
            assert_eq!(amount.strategy, MatchStrategy::BareField);
        }
    }

    #[test]
    fn wallets_pick_matching_currency() {
        let raw = json!({"wallets": [
            {"currency": "IQD", "balance": 100.0},
            {"currency": "usd", "balance": -42.5},
        ]});
        assert_eq!(
            WalletsMatcher.extract(&obj(raw.clone()), Currency::Usd),
            Some(-42.5)
        );
        assert_eq!(WalletsMatcher.extract(&obj(raw), Currency::Aed), None);
    }

    #[test]
    fn wallets_skip_non_numeric_balance() {
        let raw = json!({"data": {"wallets": [
            {"currency": "USD", "balance": "n/a"},
            {"currency": "USD", "balance": 7},
        ]}});
        assert_eq!(WalletsMatcher.extract(&obj(raw), Currency::Usd), Some(7.0));
    }

    #[test]
    fn wallets_take_precedence_over_bare_fields() {
        let raw = json!({"balance": 1, "wallets": [{"currency": "AED", "balance": 2}]});
        let amount = normalize(&raw, Currency::Aed).unwrap();
        assert_eq!(amount.value, 2.0);
        assert_eq!(amount.strategy, MatchStrategy::Wallets);
    }

    #[test]
    fn wallet_currency_mismatch_is_not_an_error() {
        let raw = json!({"wallet": {"currency": "IQD", "balance": 5}, "credit": 9});
        assert_eq!(WalletMatcher.extract(&obj(raw.clone()), Currency::Usd), None);
        assert_eq!(normalize(&raw, Currency::Usd).unwrap().value, 9.0);
    }

    #[test]
    fn bare_field_priority() {
        let raw = json!({"credit": 3, "amount": 2, "balance": 1});
        assert_eq!(BareFieldMatcher.extract(&obj(raw), Currency::Iqd), Some(1.0));
        let raw = json!({"credit": 3, "amount": 2});
        assert_eq!(BareFieldMatcher.extract(&obj(raw), Currency::Iqd), Some(2.0));
        let raw = json!({"balance": {"value": 3}, "credit": 3});
        assert_eq!(BareFieldMatcher.extract(&obj(raw), Currency::Iqd), Some(3.0));
    }

    #[test]
    fn bare_fields_are_top_level_only() {
        let raw = json!({"data": {"balance": 10}});
        assert_eq!(
            normalize(&raw, Currency::Iqd),
            Err(ExtractionError::NoBalanceFound)
        );
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert!(matches!(
            normalize(&json!([1, 2]), Currency::Iqd),
            Err(ExtractionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn html_body_is_malformed() {
        let err = parse_payload(b"<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse(_)));
        assert!(err.to_string().contains("body is not JSON"), "{err}");
        assert_eq!(parse_payload(br#"{"balance": 3}"#).unwrap(), json!({"balance": 3}));
    }

    #[test]
    fn lists_wallet_currencies() {
        let raw = json!({"data": {"wallets": [{"currency": "IQD"}, {"currency": "USD"}], "wallet": {"currency": "AED"}}});
        assert_eq!(wallet_currencies(&raw), vec!["IQD", "USD", "AED"]);
    }
}
