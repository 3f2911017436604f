use crate::types::{Balance, BalanceView, Limits, Tier};

/// Risk tier of `amount` against `limits`. Pure; the ordering of the limits is
/// enforced when they are configured, not here.
pub fn classify(amount: f64, limits: Option<&Limits>) -> Tier {
    let Some(limits) = limits else {
        return Tier::Gray;
    };
    if amount > limits.green {
        Tier::Green
    } else if amount > limits.yellow {
        Tier::Yellow
    } else if amount <= limits.red {
        Tier::Red
    } else {
        Tier::Yellow
    }
}

impl From<Balance> for BalanceView {
    fn from(balance: Balance) -> Self {
        let tier = classify(balance.amount, balance.limits.as_ref());
        BalanceView { balance, tier }
    }
}
