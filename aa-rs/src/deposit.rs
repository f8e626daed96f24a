use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{AaError, AaResult};
use crate::offchain::{OffchainMap, StagedMap};

/// Funds the entry point holds in custody per account. Absent accounts hold 0.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositLedger {
    balances: OffchainMap<Address, u64>,
}

impl DepositLedger {
    pub fn balance_of(&self, account: Address) -> u64 {
        self.balances.get(&account).unwrap_or(0)
    }

    pub fn settled_balance_of(&self, account: Address) -> u64 {
        self.balances.get_settled(&account).unwrap_or(0)
    }

    /// Stages an increase. Returns the new balance.
    pub fn credit(&mut self, account: Address, amount: u64) -> AaResult<u64> {
        let current = self.balances.get(&account);
        let next = current
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or(AaError::Overflow)?;
        self.balances.update(account, current, next);
        Ok(next)
    }

    /// Stages a decrease, rejecting it if the balance does not cover it.
    pub fn debit(&mut self, account: Address, amount: u64) -> AaResult<u64> {
        let current = self.balances.get(&account);
        let available = current.unwrap_or(0);
        if available < amount {
            return Err(AaError::InsufficientBalance {
                account,
                available,
                required: amount,
            });
        }
        self.balances.update(account, current, available - amount);
        Ok(available - amount)
    }

    pub(crate) fn map(&self) -> &dyn StagedMap {
        &self.balances
    }

    pub(crate) fn map_mut(&mut self) -> &mut dyn StagedMap {
        &mut self.balances
    }
}
