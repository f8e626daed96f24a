use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::crypto::OwnerKey;

/// Append-only audit output. Nothing in the protocol reads these back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    AccountInitialized {
        entry_point: Address,
        account: Address,
        owner: OwnerKey,
    },
    Deposited {
        account: Address,
        amount: u64,
    },
    Withdrawn {
        account: Address,
        recipient: Address,
        amount: u64,
    },
    UserOperation {
        user_op_hash: H256,
        sender: Address,
        key: U256,
        nonce: U256,
    },
    AccountAdded {
        sender: Address,
        factory: Address,
    },
}
