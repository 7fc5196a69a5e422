//! Minimal ERC-20 call data encoding and decoding

use crate::error::{WalletError, WalletResult};

use ethers::abi::{self, AbiEncode, ParamType, Token};
use ethers::contract::abigen;
use ethers::types::{Address, Bytes, U256};

abigen!(
    Erc20,
    r#"[
        function transfer(address to, uint256 amount) external returns (bool)
        function balanceOf(address owner) external view returns (uint256)
        function decimals() external view returns (uint8)
    ]"#
);

/// `transfer(to, amount)`
pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
    TransferCall { to, amount }.encode().into()
}

/// `balanceOf(owner)`
pub fn encode_balance_of(owner: Address) -> Bytes {
    BalanceOfCall { owner }.encode().into()
}

/// `decimals()`
pub fn encode_decimals() -> Bytes {
    DecimalsCall.encode().into()
}

/// Decode a single `uint256` return value
pub fn decode_uint(data: &[u8]) -> WalletResult<U256> {
    let tokens = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| WalletError::Contract(format!("Invalid uint256 return data: {}", e)))?;

    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| WalletError::Contract("Empty return data".to_string()))
}

/// Decode the `uint8` returned by `decimals()`
pub fn decode_decimals(data: &[u8]) -> WalletResult<u8> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return Err(WalletError::Contract(format!(
            "decimals() out of range: {}",
            value
        )));
    }
    Ok(value.low_u32() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors() {
        assert_eq!(hex::encode(&encode_transfer(Address::zero(), U256::zero())[..4]), "a9059cbb");
        assert_eq!(hex::encode(&encode_balance_of(Address::zero())[..4]), "70a08231");
        assert_eq!(hex::encode(&encode_decimals()[..]), "313ce567");
    }

    #[test]
    fn test_transfer_layout() {
        let to: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        let data = encode_transfer(to, U256::from(1_500_000u64));
        assert_eq!(data.len(), 4 + 32 + 32);
        assert_eq!(data[35], 0xaa);
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(1_500_000u64));
    }

    #[test]
    fn test_decode_decimals() {
        let encoded = abi::encode(&[Token::Uint(U256::from(18))]);
        assert_eq!(decode_decimals(&encoded).unwrap(), 18);

        let too_big = abi::encode(&[Token::Uint(U256::from(300))]);
        assert!(decode_decimals(&too_big).is_err());
        assert!(decode_uint(&[]).is_err());
    }
}
