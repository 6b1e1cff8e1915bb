//! ISO 4217 currency codes.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Three-letter alphabetic currency code (e.g. `USD`).
///
/// Construction only checks the shape (three ASCII uppercase letters). Whether
/// the code names an active ISO 4217 currency is answered by
/// [`CurrencyCode::is_recognized`], so rows written by older code can still be
/// read back and compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl ValueObject for CurrencyCode {}

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> DomainResult<Self> {
        let code = code.into();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "currency code must be three uppercase letters, got '{code}'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True iff this is an active ISO 4217 alphabetic code.
    pub fn is_recognized(&self) -> bool {
        validate_currency_code(&self.0)
    }
}

/// True iff `code` is a recognized ISO 4217 alphabetic code, written exactly in
/// its canonical uppercase form.
///
/// Unrecognized codes are reported through a `warn` event, never as an error.
pub fn validate_currency_code(code: &str) -> bool {
    match iso_currency::Currency::from_code(code) {
        Some(currency) if currency.code() == code => {
            tracing::debug!(code, "currency code recognized");
            true
        }
        _ => {
            tracing::warn!(code, "currency code is not a recognized ISO 4217 code");
            false
        }
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
