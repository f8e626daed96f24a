use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::chain::{Tx, WorldState};
use crate::crypto::{Curve, EcdsaSignature, OwnerKey, SignatureVerifier};
use crate::entry_point::EntryPoint;
use crate::error::{AaError, AaResult};
use crate::events::Event;
use crate::types::UserOperation;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub entry_point: Address,
    pub owner: OwnerKey,
}

impl AccountState {
    pub fn uninitialized(curve: Curve) -> AaResult<Self> {
        Ok(Self {
            entry_point: Address::zero(),
            owner: OwnerKey::dead(curve)?,
        })
    }

    pub fn is_initialized(&self, curve: Curve) -> bool {
        !self.owner.is_dead(curve)
    }
}

/// What the entry point needs from an account.
pub trait SmartAccount {
    fn address(&self) -> Address;

    /// Checks the owner's signature over the operation hash, consumes the
    /// operation's nonce and performs its transfer. Returns the operation hash.
    fn validate_user_op_and_execute(
        &self,
        tx: &mut Tx<'_>,
        op: &UserOperation,
        signature: &EcdsaSignature,
    ) -> AaResult<H256>;

    /// Fails with `InvalidSignature` unless `signature` is the owner's
    /// signature over `data_hash`.
    fn verify_signature(
        &self,
        state: &WorldState,
        verifier: &dyn SignatureVerifier,
        data_hash: H256,
        signature: &EcdsaSignature,
    ) -> AaResult<()>;
}

/// Handle to an account deployed at `address`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountContract {
    address: Address,
}

impl AccountContract {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    /// Deploys the account program at `address` in its uninitialized state.
    pub fn deploy(tx: &mut Tx<'_>, address: Address) -> AaResult<Self> {
        let state = AccountState::uninitialized(tx.curve())?;
        tx.deploy_account(address, state)?;
        tracing::debug!(account = ?address, "account deployed");
        Ok(Self { address })
    }

    pub fn state<'s>(&self, state: &'s WorldState) -> AaResult<&'s AccountState> {
        state.account(self.address)
    }

    pub fn owner(&self, state: &WorldState) -> AaResult<OwnerKey> {
        Ok(self.state(state)?.owner.clone())
    }

    pub fn entry_point(&self, state: &WorldState) -> AaResult<Address> {
        Ok(self.state(state)?.entry_point)
    }

    /// Binds the account to `entry_point` and `owner`, then moves `prefund`
    /// into the entry point deposit and `initial_balance` into the account,
    /// both paid by the transaction sender.
    pub fn initialize(
        &self,
        tx: &mut Tx<'_>,
        entry_point: Address,
        owner: OwnerKey,
        prefund: u64,
        initial_balance: u64,
    ) -> AaResult<()> {
        let curve = tx.curve();
        if self.state(tx.state())?.is_initialized(curve) {
            return Err(AaError::AlreadyInitialized(self.address));
        }
        if owner.is_dead(curve) {
            return Err(AaError::InvalidKey("the dead owner key cannot own an account".into()));
        }
        tx.state().entry_point(entry_point)?;

        let account = tx.state_mut().account_mut(self.address)?;
        account.entry_point = entry_point;
        account.owner = owner.clone();

        if prefund > 0 {
            EntryPoint::at(entry_point).deposit_to(tx, self.address, prefund)?;
        }
        if initial_balance > 0 {
            let payer = tx.sender();
            tx.transfer(payer, self.address, initial_balance)?;
        }

        tx.emit(
            self.address,
            Event::AccountInitialized {
                entry_point,
                account: self.address,
                owner,
            },
        );
        tracing::info!(account = ?self.address, entry_point = ?entry_point, prefund, initial_balance, "account initialized");
        Ok(())
    }

    fn initialized_state(&self, state: &WorldState, curve: Curve) -> AaResult<AccountState> {
        let account = self.state(state)?;
        if !account.is_initialized(curve) {
            return Err(AaError::NotInitialized(self.address));
        }
        Ok(account.clone())
    }
}

impl SmartAccount for AccountContract {
    fn address(&self) -> Address {
        self.address
    }

    fn validate_user_op_and_execute(
        &self,
        tx: &mut Tx<'_>,
        op: &UserOperation,
        signature: &EcdsaSignature,
    ) -> AaResult<H256> {
        let account = self.initialized_state(tx.state(), tx.curve())?;
        if tx.caller() != account.entry_point {
            return Err(AaError::NotEntryPoint {
                caller: tx.caller(),
                entry_point: account.entry_point,
            });
        }
        if op.sender != self.address {
            return Err(AaError::UnauthorizedCaller {
                caller: op.sender,
                account: self.address,
            });
        }

        let entry_point = EntryPoint::at(account.entry_point);
        let user_op_hash = entry_point.get_user_op_hash(op);
        self.verify_signature(tx.state(), tx.signatures(), user_op_hash, signature)?;
        tracing::debug!(account = ?self.address, hash = ?user_op_hash, "user operation signature valid");

        tx.call(self.address, |tx| {
            entry_point.validate_and_update_nonce(tx, op.sender, op.key, op.nonce)
        })?;

        tx.transfer(self.address, op.calldata.recipient, op.calldata.amount)?;
        Ok(user_op_hash)
    }

    fn verify_signature(
        &self,
        state: &WorldState,
        verifier: &dyn SignatureVerifier,
        data_hash: H256,
        signature: &EcdsaSignature,
    ) -> AaResult<()> {
        let account = self.initialized_state(state, verifier.curve())?;
        if verifier.verify(signature, data_hash, &account.owner) {
            Ok(())
        } else {
            Err(AaError::InvalidSignature)
        }
    }
}
