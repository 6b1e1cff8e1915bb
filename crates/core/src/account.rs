//! Account entity.

use serde::{Deserialize, Serialize};

use crate::currency::CurrencyCode;
use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;
use crate::money::Money;

/// A persisted account row.
///
/// Mutated only through the ledger engine while it holds the row's exclusive
/// lock. `user_name` is display data, not a reference to a user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(rename = "accountId")]
    pub id: AccountId,
    pub user_name: String,
    pub balance: Money,
    #[serde(rename = "currencyCode")]
    pub currency: CurrencyCode,
}

impl Account {
    /// Copy of this row with a different balance.
    pub fn with_balance(&self, balance: Money) -> Self {
        Self {
            balance,
            ..self.clone()
        }
    }
}

/// Attributes of an account that does not exist yet (storage assigns the id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub user_name: String,
    pub balance: Money,
    #[serde(rename = "currencyCode")]
    pub currency: CurrencyCode,
}

impl NewAccount {
    pub fn new(user_name: impl Into<String>, balance: Money, currency: CurrencyCode) -> Self {
        Self {
            user_name: user_name.into(),
            balance,
            currency,
        }
    }

    /// Checks the invariants a stored account must satisfy from its first row.
    pub fn validate(&self) -> DomainResult<()> {
        if self.user_name.trim().is_empty() {
            return Err(DomainError::validation("user name must not be empty"));
        }
        if !self.balance.is_non_negative() {
            return Err(DomainError::invariant(format!(
                "opening balance must not be negative, got {}",
                self.balance
            )));
        }
        if !self.currency.is_recognized() {
            return Err(DomainError::validation(format!(
                "unrecognized currency code '{}'",
                self.currency
            )));
        }
        Ok(())
    }
}
