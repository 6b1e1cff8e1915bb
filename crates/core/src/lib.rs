//! `remit-core`: domain foundation for the balance ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! fixed-scale money, currency codes, account identity and the account entity.

pub mod account;
pub mod currency;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use account::{Account, NewAccount};
pub use currency::{CurrencyCode, validate_currency_code};
pub use error::{DomainError, DomainResult};
pub use id::AccountId;
pub use money::{MONEY_SCALE, Money, checked_normalize, is_non_negative, normalize};
pub use value_object::ValueObject;
