//! Human-readable native currency amounts.
//!
//! Listing prices and offers are entered as decimal strings (`"0.5"`,
//! `"1,250.75"`). Payments are sent in the smallest unit of the chain's native
//! currency, so [`NativeAmount::to_wei`] scales a parsed amount by the
//! network's decimals and refuses inputs that carry more precision than the
//! currency can represent.
//!
//! # Example
//!
//! ```rust
//! use alloy_primitives::U256;
//! use nftpay::amount::{NativeAmount, format_wei};
//!
//! let amount = NativeAmount::parse("0.5").unwrap();
//! let wei = amount.to_wei(18).unwrap();
//! assert_eq!(wei, U256::from(500_000_000_000_000_000u64));
//! assert_eq!(format_wei(wei, 18), "0.5");
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;

/// An optional leading currency symbol, an optional minus sign, then either
/// plain digits or comma-grouped thousands, with an optional fraction.
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[^0-9\s.,+\-]+\s*)?(-)?([0-9]+(?:\.[0-9]+)?|[0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]+)?)$",
    )
    .expect("valid regex")
});

/// A non-negative decimal amount of a native currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeAmount(Decimal);

/// Errors that can occur when parsing or scaling an amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    /// The input string could not be parsed as a number.
    #[error("Invalid number format")]
    InvalidFormat,
    /// Negative values are not allowed.
    #[error("Negative value is not allowed")]
    Negative,
    /// The input has more decimal places than the currency supports.
    #[error("Too big of a precision: {amount} vs {currency} on currency")]
    WrongPrecision {
        /// Decimal places in the input.
        amount: u32,
        /// Decimal places supported by the currency.
        currency: u32,
    },
    /// The scaled amount does not fit into 256 bits.
    #[error("Amount overflows 256 bits")]
    Overflow,
}

impl NativeAmount {
    /// Parses a human-readable amount.
    ///
    /// Accepts plain decimals (`"0.5"`) and comma-grouped thousands
    /// (`"1,250.75"`), optionally preceded by a currency symbol (`"Ξ 0.5"`).
    /// Anything else, such as exponents, hex or misplaced separators, is
    /// rejected rather than reinterpreted.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a number or is negative.
    pub fn parse(input: &str) -> Result<Self, AmountParseError> {
        let caps = AMOUNT
            .captures(input.trim())
            .ok_or(AmountParseError::InvalidFormat)?;
        let digits = caps[2].replace(',', "");
        let parsed = Decimal::from_str(&digits).map_err(|_| AmountParseError::InvalidFormat)?;
        if caps.get(1).is_some() && !parsed.is_zero() {
            return Err(AmountParseError::Negative);
        }
        Ok(Self(parsed.normalize()))
    }

    /// Returns the number of decimal places after normalisation.
    #[must_use]
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Returns `true` for a zero amount.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Converts the amount into the currency's smallest unit.
    ///
    /// # Errors
    ///
    /// Returns [`AmountParseError::WrongPrecision`] if the amount has more
    /// decimal places than `decimals`, or [`AmountParseError::Overflow`] if the
    /// result does not fit into a `U256`.
    pub fn to_wei(&self, decimals: u8) -> Result<U256, AmountParseError> {
        let scale = self.scale();
        let decimals = u32::from(decimals);
        if scale > decimals {
            return Err(AmountParseError::WrongPrecision {
                amount: scale,
                currency: decimals,
            });
        }
        let mantissa = U256::from(self.0.mantissa().unsigned_abs());
        let factor = U256::from(10u8)
            .checked_pow(U256::from(decimals - scale))
            .ok_or(AmountParseError::Overflow)?;
        mantissa
            .checked_mul(factor)
            .ok_or(AmountParseError::Overflow)
    }
}

impl FromStr for NativeAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Formats an amount in the smallest unit as a decimal string without trailing zeros.
#[must_use]
pub fn format_wei(wei: U256, decimals: u8) -> String {
    let digits = wei.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_owned()
    } else {
        format!("{int_part}.{frac_part}")
    }
}
