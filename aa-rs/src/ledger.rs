use std::collections::BTreeMap;

use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::{AaError, AaResult};

/// Programs the ledger knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContractCode {
    EntryPoint,
    Account,
    AccountFactory,
}

impl ContractCode {
    pub fn name(&self) -> &'static str {
        match self {
            ContractCode::EntryPoint => "entry point",
            ContractCode::Account => "account",
            ContractCode::AccountFactory => "account factory",
        }
    }

    /// Fixed verification key every deployment of this program carries.
    pub fn verification_key(&self) -> H256 {
        keccak256(format!("zkaa/program/{}", self.name())).into()
    }
}

/// Native balances and deployed programs.
///
/// The ledger does not check authorization itself; [`crate::chain::Tx`] only
/// moves funds out of the transaction sender or out of the contract currently
/// executing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(with = "crate::store::entries")]
    balances: BTreeMap<Address, u64>,
    #[serde(with = "crate::store::entries")]
    code: BTreeMap<Address, ContractCode>,
    #[serde(with = "crate::store::entries")]
    verification_keys: BTreeMap<Address, H256>,
}

impl Ledger {
    pub fn balance(&self, address: Address) -> u64 {
        self.balances.get(&address).copied().unwrap_or(0)
    }

    pub fn code_at(&self, address: Address) -> Option<ContractCode> {
        self.code.get(&address).copied()
    }

    /// Verification key recorded when the program at `address` was deployed.
    pub fn verification_key_at(&self, address: Address) -> Option<H256> {
        self.verification_keys.get(&address).copied()
    }

    /// Creates funds out of thin air. Genesis and faucet tooling only.
    pub fn mint(&mut self, to: Address, amount: u64) -> AaResult<()> {
        let balance = self.balance(to).checked_add(amount).ok_or(AaError::Overflow)?;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub(crate) fn transfer(&mut self, from: Address, to: Address, amount: u64) -> AaResult<()> {
        let available = self.balance(from);
        if available < amount {
            return Err(AaError::InsufficientBalance {
                account: from,
                available,
                required: amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = self.balance(to).checked_add(amount).ok_or(AaError::Overflow)?;
        self.balances.insert(from, available - amount);
        self.balances.insert(to, credited);
        Ok(())
    }

    pub(crate) fn deploy(&mut self, address: Address, code: ContractCode) -> AaResult<()> {
        if address.is_zero() || self.code.contains_key(&address) {
            return Err(AaError::ContractExists(address));
        }
        self.code.insert(address, code);
        self.verification_keys.insert(address, code.verification_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_funds() {
        let mut ledger = Ledger::default();
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        ledger.mint(a, 100).unwrap();
        ledger.transfer(a, b, 40).unwrap();
        assert_eq!(ledger.balance(a), 60);
        assert_eq!(ledger.balance(b), 40);
    }

    #[test]
    fn transfer_rejects_overdraft() {
        let mut ledger = Ledger::default();
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        ledger.mint(a, 10).unwrap();
        let err = ledger.transfer(a, b, 11).unwrap_err();
        assert_eq!(
            err,
            AaError::InsufficientBalance {
                account: a,
                available: 10,
                required: 11
            }
        );
        assert_eq!(ledger.balance(a), 10);
    }

    #[test]
    fn mint_rejects_overflow() {
        let mut ledger = Ledger::default();
        let a = Address::repeat_byte(1);
        ledger.mint(a, u64::MAX).unwrap();
        assert_eq!(ledger.mint(a, 1), Err(AaError::Overflow));
    }

    #[test]
    fn deploy_is_one_shot() {
        let mut ledger = Ledger::default();
        let a = Address::repeat_byte(1);
        ledger.deploy(a, ContractCode::Account).unwrap();
        assert_eq!(ledger.code_at(a), Some(ContractCode::Account));
        assert_eq!(
            ledger.verification_key_at(a),
            Some(ContractCode::Account.verification_key())
        );
        assert_ne!(
            ContractCode::Account.verification_key(),
            ContractCode::EntryPoint.verification_key()
        );
        assert!(ledger.deploy(a, ContractCode::EntryPoint).is_err());
        assert!(ledger.deploy(Address::zero(), ContractCode::Account).is_err());
    }
}
