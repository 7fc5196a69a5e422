//! On-chain shape of a transfer

use super::request::{parse_amount, Asset, ValidatedTransfer, NATIVE_DECIMALS};
use crate::chain::{erc20, GasPrice, NodeClient, TokenRegistry};
use crate::error::WalletResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};

/// Gas for a plain value transfer to an externally owned account
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Destination, value and call data of a transfer, before nonce and gas are known
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl TransferCall {
    /// Resolve a validated transfer into its call; token transfers need the token's decimals
    pub async fn prepare(
        node: &dyn NodeClient,
        tokens: &TokenRegistry,
        transfer: &ValidatedTransfer,
    ) -> WalletResult<Self> {
        match &transfer.asset {
            Asset::Native => Ok(Self {
                to: transfer.recipient,
                value: parse_amount(&transfer.amount, NATIVE_DECIMALS)?,
                data: Bytes::default(),
            }),
            Asset::Token(token) => {
                let decimals = tokens.decimals(node, token.contract).await?;
                let amount = parse_amount(&transfer.amount, decimals)?;
                Ok(Self {
                    to: token.contract,
                    value: U256::zero(),
                    data: erc20::encode_transfer(transfer.recipient, amount),
                })
            }
        }
    }

    /// Zero-value transfer to self, used to take over a pending nonce
    pub fn cancellation(owner: Address) -> Self {
        Self {
            to: owner,
            value: U256::zero(),
            data: Bytes::default(),
        }
    }

    /// Unsigned request for `eth_estimateGas`
    pub fn estimation_tx(&self, from: Address) -> TypedTransaction {
        TransactionRequest::new()
            .from(from)
            .to(self.to)
            .value(self.value)
            .data(self.data.clone())
            .into()
    }

    /// Complete transaction ready for signing
    pub fn build(
        &self,
        from: Address,
        nonce: U256,
        gas_limit: U256,
        gas_price: &GasPrice,
        chain_id: u64,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(from)
                .to(self.to)
                .value(self.value)
                .data(self.data.clone())
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(*price)
                .chain_id(chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(self.to)
                .value(self.value)
                .data(self.data.clone())
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(chain_id)
                .into(),
        }
    }
}
