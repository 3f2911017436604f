//! Builds the audit rows written alongside every balance mutation.

use chrono::{DateTime, Utc};

use crate::types::{Balance, Editor, HistoryAction, HistoryEntry, Limits};

pub fn created(balance: &Balance, editor: &Editor, at: DateTime<Utc>) -> HistoryEntry {
    HistoryEntry {
        balance_id: balance.id,
        source_name: balance.source_name.clone(),
        action: HistoryAction::Created,
        old_amount: None,
        new_amount: Some(balance.amount),
        old_currency: None,
        new_currency: Some(balance.currency),
        old_notes: None,
        new_notes: balance.notes.clone(),
        changes: format!(
            "created with {} {} ({})",
            balance.amount, balance.currency, balance.ownership
        ),
        timestamp: at,
        updated_by: editor.clone(),
    }
}

pub fn updated(before: &Balance, after: &Balance, editor: &Editor, at: DateTime<Utc>) -> HistoryEntry {
    HistoryEntry {
        balance_id: before.id,
        source_name: after.source_name.clone(),
        action: HistoryAction::Updated,
        old_amount: Some(before.amount),
        new_amount: Some(after.amount),
        old_currency: Some(before.currency),
        new_currency: Some(after.currency),
        old_notes: before.notes.clone(),
        new_notes: after.notes.clone(),
        changes: summarize(before, after),
        timestamp: at,
        updated_by: editor.clone(),
    }
}

pub fn deleted(balance: &Balance, editor: &Editor, at: DateTime<Utc>) -> HistoryEntry {
    HistoryEntry {
        balance_id: balance.id,
        source_name: balance.source_name.clone(),
        action: HistoryAction::Deleted,
        old_amount: Some(balance.amount),
        new_amount: None,
        old_currency: Some(balance.currency),
        new_currency: None,
        old_notes: balance.notes.clone(),
        new_notes: None,
        changes: format!("deleted at {} {}", balance.amount, balance.currency),
        timestamp: at,
        updated_by: editor.clone(),
    }
}

/// Human-readable list of field changes, `field: old -> new` separated by `; `.
pub fn summarize(before: &Balance, after: &Balance) -> String {
    let mut parts = Vec::new();
    if before.amount != after.amount {
        parts.push(format!("amount: {} -> {}", before.amount, after.amount));
    }
    if before.currency != after.currency {
        parts.push(format!("currency: {} -> {}", before.currency, after.currency));
    }
    if before.notes != after.notes {
        parts.push(format!(
            "notes: {} -> {}",
            before.notes.as_deref().unwrap_or("-"),
            after.notes.as_deref().unwrap_or("-")
        ));
    }
    if before.limits != after.limits {
        parts.push(format!(
            "limits: {} -> {}",
            fmt_limits(before.limits.as_ref()),
            fmt_limits(after.limits.as_ref())
        ));
    }
    if before.ownership != after.ownership {
        parts.push(format!("ownership: {} -> {}", before.ownership, after.ownership));
    }
    if parts.is_empty() {
        "no field changes".to_string()
    } else {
        parts.join("; ")
    }
}

fn fmt_limits(limits: Option<&Limits>) -> String {
    match limits {
        Some(l) => format!("{}/{}/{}", l.red, l.yellow, l.green),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BalanceType, Currency, Ownership};

    fn balance() -> Balance {
        Balance {
            id: 11,
            source_id: 2,
            source_name: "Iraqi Airways".to_string(),
            amount: 1500.0,
            currency: Currency::Iqd,
            balance_type: BalanceType::Airline,
            limits: None,
            ownership: Ownership::Manual,
            notes: None,
            last_updated: Utc::now(),
            last_updated_by: editor(),
        }
    }

    fn editor() -> Editor {
        Editor {
            email: "desk@agency.example".to_string(),
            name: "Desk".to_string(),
        }
    }

    #[test]
    fn update_row_carries_before_and_after() {
        let before = balance();
        let after = Balance {
            amount: -200.0,
            notes: Some("prepaid".to_string()),
            ..before.clone()
        };
        let entry = updated(&before, &after, &editor(), Utc::now());
        assert_eq!(entry.old_amount, Some(1500.0));
        assert_eq!(entry.new_amount, Some(-200.0));
        assert_eq!(entry.action, HistoryAction::Updated);
        assert_eq!(entry.changes, "amount: 1500 -> -200; notes: - -> prepaid");
    }

    #[test]
    fn ownership_transition_is_summarized() {
        let before = balance();
        let after = Balance {
            ownership: Ownership::Auto {
                api_source: "ia-api".to_string(),
            },
            ..before.clone()
        };
        assert_eq!(
            summarize(&before, &after),
            "ownership: manual -> auto-sync (ia-api)"
        );
    }

    #[test]
    fn deleted_row_has_no_new_values() {
        let entry = deleted(&balance(), &editor(), Utc::now());
        assert_eq!(entry.new_amount, None);
        assert_eq!(entry.old_amount, Some(1500.0));
        assert_eq!(entry.action, HistoryAction::Deleted);
    }
}
