use serde::{Deserialize, Serialize};

use remit_core::{AccountId, Money, ValueObject, validate_currency_code};

use crate::error::{LedgerError, LedgerResult};

/// A request to move `amount` from one account to another.
///
/// Constructed per call and discarded afterwards. The currency is kept as the
/// caller sent it so an unknown code is reported as `UnknownCurrency` instead of
/// failing deserialization. Wire field names follow the public transfer API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "currencyCode")]
    pub currency_code: String,
    pub amount: Money,
    #[serde(rename = "fromAccountId")]
    pub source: AccountId,
    #[serde(rename = "toAccountId")]
    pub destination: AccountId,
}

impl ValueObject for TransferRequest {}

impl TransferRequest {
    pub fn new(
        currency_code: impl Into<String>,
        amount: impl Into<Money>,
        source: AccountId,
        destination: AccountId,
    ) -> Self {
        Self {
            currency_code: currency_code.into(),
            amount: amount.into(),
            source,
            destination,
        }
    }

    /// Checks that need no storage access: recognized currency, strictly
    /// positive amount, distinct accounts.
    pub fn validate(&self) -> LedgerResult<()> {
        if !validate_currency_code(&self.currency_code) {
            return Err(LedgerError::UnknownCurrency(self.currency_code.clone()));
        }
        if !self.amount.is_positive() {
            return Err(LedgerError::InvalidAmount(self.amount.amount()));
        }
        if self.source == self.destination {
            return Err(LedgerError::SameAccount(self.source));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(code: &str, amount: rust_decimal::Decimal, from: i64, to: i64) -> TransferRequest {
        TransferRequest::new(code, amount, AccountId::new(from), AccountId::new(to))
    }

    #[test]
    fn valid_request_passes() {
        assert_eq!(request("USD", dec!(30), 1, 2).validate(), Ok(()));
    }

    #[test]
    fn amount_is_normalized_on_construction() {
        let req = request("USD", dec!(10.123456), 1, 2);
        assert_eq!(req.amount.to_string(), "10.1235");
    }

    #[test]
    fn rejects_unknown_currency_before_anything_else() {
        let err = request("ABC", dec!(-1), 1, 1).validate().unwrap_err();
        assert_eq!(err, LedgerError::UnknownCurrency("ABC".to_string()));
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for amount in [dec!(0), dec!(-5), dec!(0.00004)] {
            let err = request("USD", amount, 1, 2).validate().unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}");
        }
    }

    #[test]
    fn rejects_transfer_to_self() {
        let err = request("USD", dec!(1), 4, 4).validate().unwrap_err();
        assert_eq!(err, LedgerError::SameAccount(AccountId::new(4)));
    }

    #[test]
    fn deserializes_public_wire_format() {
        let json = r#"{"currencyCode":"EUR","amount":12.5,"fromAccountId":3,"toAccountId":4}"#;
        let req: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.currency_code, "EUR");
        assert_eq!(req.amount.to_string(), "12.5000");
        assert_eq!(req.source, AccountId::new(3));
        assert_eq!(req.destination, AccountId::new(4));
    }
}
