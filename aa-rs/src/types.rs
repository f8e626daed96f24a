use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::encoding;

/// Transfer executed by the account once the operation validates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationCallData {
    pub recipient: Address,
    pub amount: u64,
}

/// A signed, nonce-protected request to move funds out of an account.
///
/// The signature travels next to the operation, never inside it, so two
/// operations are the same request iff every field here matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub key: U256,
    pub calldata: UserOperationCallData,
    pub fee: u64,
}

impl UserOperation {
    pub fn transfer(
        sender: Address,
        key: U256,
        nonce: U256,
        recipient: Address,
        amount: u64,
        fee: u64,
    ) -> Self {
        Self {
            sender,
            nonce,
            key,
            calldata: UserOperationCallData { recipient, amount },
            fee,
        }
    }

    /// Operation hash bound to a specific entry point deployment.
    pub fn hash(&self, entry_point: Address) -> H256 {
        encoding::user_op_hash(self, entry_point)
    }
}

/// A nonce lane: one strictly increasing sequence per `(sender, key)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceKey {
    pub sender: Address,
    pub key: U256,
}

/// Payload an owner signs to pull funds out of its entry point deposit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub account: Address,
    pub recipient: Address,
    pub amount: u64,
}

impl Withdrawal {
    pub fn hash(&self) -> H256 {
        encoding::withdrawal_hash(self)
    }
}
