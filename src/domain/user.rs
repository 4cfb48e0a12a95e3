//! User account and ledger attributes

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reseller hierarchy level. Stored as text in `users.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Reseller,
    Agent,
    Master,
    Admin,
}

impl UserLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserLevel::Reseller => "reseller",
            UserLevel::Agent => "agent",
            UserLevel::Master => "master",
            UserLevel::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reseller" => Some(UserLevel::Reseller),
            "agent" => Some(UserLevel::Agent),
            "master" => Some(UserLevel::Master),
            "admin" => Some(UserLevel::Admin),
            _ => None,
        }
    }

    /// Role claim used in access tokens.
    pub fn role(&self) -> &'static str {
        match self {
            UserLevel::Reseller => "RESELLER",
            UserLevel::Agent => "AGENT",
            UserLevel::Master => "MASTER",
            UserLevel::Admin => "ADMIN",
        }
    }
}

/// A platform user. Balance is authoritative in the mutations ledger; the
/// `balance` column is the materialized latest `balance_after`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,

    pub upline_id: Option<Uuid>,
    pub level: UserLevel,
    pub is_active: bool,

    pub balance: Decimal,
    pub credit_limit: Decimal,
    pub markup_percentage: Decimal,
    pub allow_debt: bool,
    pub max_daily_transaction: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Effective spending power: balance plus credit limit when debt is
    /// allowed.
    pub fn spending_power(&self) -> Decimal {
        if self.allow_debt {
            self.balance + self.credit_limit
        } else {
            self.balance
        }
    }

    pub fn has_sufficient_balance(&self, amount: Decimal) -> bool {
        self.spending_power() >= amount
    }

    /// Retail price for this user: base price marked up by
    /// `markup_percentage`, except admins who buy at cost.
    pub fn effective_price(&self, base_price: Decimal) -> Decimal {
        if self.level == UserLevel::Admin {
            return base_price;
        }
        let factor = Decimal::ONE + self.markup_percentage / Decimal::ONE_HUNDRED;
        (base_price * factor).round_dp(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn user(level: UserLevel) -> User {
        User {
            id: Uuid::new_v4(),
            username: "agen01".into(),
            email: "agen01@example.com".into(),
            full_name: None,
            phone: None,
            upline_id: None,
            level,
            is_active: true,
            balance: dec!(50000),
            credit_limit: dec!(10000),
            markup_percentage: dec!(2),
            allow_debt: false,
            max_daily_transaction: dec!(1000000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_effective_price_markup() {
        let u = user(UserLevel::Reseller);
        assert_eq!(u.effective_price(dec!(10000)), dec!(10200));
    }

    #[test]
    fn test_effective_price_admin_gets_cost() {
        let u = user(UserLevel::Admin);
        assert_eq!(u.effective_price(dec!(10000)), dec!(10000));
    }

    #[test]
    fn test_spending_power_without_debt() {
        let u = user(UserLevel::Agent);
        assert_eq!(u.spending_power(), dec!(50000));
        assert!(u.has_sufficient_balance(dec!(50000)));
        assert!(!u.has_sufficient_balance(dec!(50001)));
    }

    #[test]
    fn test_spending_power_with_debt() {
        let mut u = user(UserLevel::Agent);
        u.allow_debt = true;
        assert_eq!(u.spending_power(), dec!(60000));
    }

    #[test]
    fn test_level_roundtrip() {
        for level in [
            UserLevel::Reseller,
            UserLevel::Agent,
            UserLevel::Master,
            UserLevel::Admin,
        ] {
            assert_eq!(UserLevel::from_str(level.as_str()), Some(level));
        }
        assert_eq!(UserLevel::from_str("root"), None);
    }
}
