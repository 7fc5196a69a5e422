//! Transfer requests and their validation

use crate::chain::TrackedToken;
use crate::error::{WalletError, WalletResult};

use ethers::types::{Address, U256};
use ethers::utils::{format_units, parse_units, to_checksum, ParseUnits};
use lazy_static::lazy_static;
use regex::Regex;

/// Decimals of the chain's native asset
pub const NATIVE_DECIMALS: u8 = 18;

lazy_static! {
    static ref ADDRESS_PATTERN: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid address pattern");
    static ref DECIMAL_PATTERN: Regex =
        Regex::new(r"^(\d+(\.\d*)?|\.\d+)$").expect("valid decimal pattern");
}

/// What is being transferred
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    Native,
    Token(TrackedToken),
}

impl Asset {
    pub fn symbol<'a>(&'a self, native_symbol: &'a str) -> &'a str {
        match self {
            Asset::Native => native_symbol,
            Asset::Token(token) => &token.symbol,
        }
    }
}

/// A transfer as drafted by the user
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub recipient: String,
    /// Decimal string in whole units (e.g. "1.5")
    pub amount: String,
    pub asset: Asset,
}

/// A request that passed validation; no network was touched to get here
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTransfer {
    pub recipient: Address,
    pub amount: String,
    pub asset: Asset,
}

impl TransferRequest {
    pub fn native(recipient: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount: amount.into(),
            asset: Asset::Native,
        }
    }

    pub fn token(
        recipient: impl Into<String>,
        amount: impl Into<String>,
        token: TrackedToken,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            amount: amount.into(),
            asset: Asset::Token(token),
        }
    }

    pub fn validate(&self) -> WalletResult<ValidatedTransfer> {
        let recipient = parse_address(&self.recipient)?;
        let amount = self.amount.trim();
        if !is_positive_decimal(amount) {
            return Err(WalletError::InvalidInput(format!(
                "Amount must be a positive number, got {:?}",
                self.amount
            )));
        }

        if self.asset == Asset::Native {
            parse_amount(amount, NATIVE_DECIMALS)?;
        }

        Ok(ValidatedTransfer {
            recipient,
            amount: amount.to_string(),
            asset: self.asset.clone(),
        })
    }
}

/// Parse a chain address, enforcing the EIP-55 checksum on mixed-case input
pub fn parse_address(input: &str) -> WalletResult<Address> {
    let input = input.trim();
    if !ADDRESS_PATTERN.is_match(input) {
        return Err(WalletError::InvalidInput(format!(
            "Not a valid address: {:?}",
            input
        )));
    }

    let address: Address = input
        .parse()
        .map_err(|e| WalletError::InvalidInput(format!("Not a valid address: {}", e)))?;

    let hex_part = &input[2..];
    let mixed_case = hex_part.chars().any(|c| c.is_ascii_lowercase())
        && hex_part.chars().any(|c| c.is_ascii_uppercase());
    if mixed_case && to_checksum(&address, None) != input {
        return Err(WalletError::InvalidInput(format!(
            "Address checksum mismatch: {}",
            input
        )));
    }

    Ok(address)
}

fn is_positive_decimal(amount: &str) -> bool {
    DECIMAL_PATTERN.is_match(amount) && amount.chars().any(|c| matches!(c, '1'..='9'))
}

/// Convert a positive decimal string into base units
pub fn parse_amount(amount: &str, decimals: u8) -> WalletResult<U256> {
    let amount = amount.trim();
    if !is_positive_decimal(amount) {
        return Err(WalletError::InvalidInput(format!(
            "Amount must be a positive number, got {:?}",
            amount
        )));
    }

    // parse_units truncates extra digits; refuse rather than sign a smaller amount
    let fraction = amount.split_once('.').map_or("", |(_, f)| f.trim_end_matches('0'));
    if fraction.len() > decimals as usize {
        return Err(WalletError::InvalidInput(format!(
            "Amount {} has more than {} decimal places",
            amount, decimals
        )));
    }

    match parse_units(amount, decimals as u32) {
        Ok(ParseUnits::U256(value)) if !value.is_zero() => Ok(value),
        Ok(_) => Err(WalletError::InvalidInput(format!(
            "Amount {} is below the smallest unit",
            amount
        ))),
        Err(e) => Err(WalletError::InvalidInput(format!(
            "Cannot convert {} with {} decimals: {}",
            amount, decimals, e
        ))),
    }
}

/// Render base units as a decimal string without trailing zeros
pub fn format_amount(value: U256, decimals: u8) -> WalletResult<String> {
    let formatted = format_units(value, decimals as u32)
        .map_err(|e| WalletError::Internal(format!("Cannot format {}: {}", value, e)))?;

    if !formatted.contains('.') {
        return Ok(formatted);
    }
    Ok(formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string())
}
