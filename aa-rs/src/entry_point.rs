use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::account::{AccountContract, SmartAccount};
use crate::chain::{Tx, WorldState};
use crate::crypto::EcdsaSignature;
use crate::deposit::DepositLedger;
use crate::error::{AaError, AaResult};
use crate::events::Event;
use crate::nonce::NonceLedger;
use crate::offchain::{OffchainState, StagedMap, StateCommitments};
use crate::proof::{SettlementProof, SettlementPublicInput};
use crate::types::{UserOperation, Withdrawal};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointState {
    commitments: StateCommitments,
    nonces: NonceLedger,
    deposits: DepositLedger,
}

impl EntryPointState {
    fn genesis() -> Self {
        let mut state = Self {
            commitments: StateCommitments::default(),
            nonces: NonceLedger::default(),
            deposits: DepositLedger::default(),
        };
        state.commitments.commitment = state.settled_commitment();
        state
    }

    pub fn nonces(&self) -> &NonceLedger {
        &self.nonces
    }

    pub fn deposits(&self) -> &DepositLedger {
        &self.deposits
    }
}

impl OffchainState for EntryPointState {
    fn maps(&self) -> Vec<&dyn StagedMap> {
        vec![self.nonces.map(), self.deposits.map()]
    }

    fn maps_mut(&mut self) -> Vec<&mut dyn StagedMap> {
        vec![self.nonces.map_mut(), self.deposits.map_mut()]
    }

    fn commitments(&self) -> &StateCommitments {
        &self.commitments
    }

    fn commitments_mut(&mut self) -> &mut StateCommitments {
        &mut self.commitments
    }
}

/// Handle to an entry point deployed at `address`. Nonces and deposits share
/// one commitment, so one `settle` finalizes both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    address: Address,
}

impl EntryPoint {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn deploy(tx: &mut Tx<'_>, address: Address) -> AaResult<Self> {
        tx.deploy_entry_point(address, EntryPointState::genesis())?;
        tracing::info!(entry_point = ?address, "entry point deployed");
        Ok(Self { address })
    }

    pub fn state<'s>(&self, state: &'s WorldState) -> AaResult<&'s EntryPointState> {
        state.entry_point(self.address)
    }

    fn state_mut<'s>(&self, tx: &'s mut Tx<'_>) -> AaResult<&'s mut EntryPointState> {
        tx.state_mut().entry_point_mut(self.address)
    }

    pub fn get_nonce(&self, state: &WorldState, sender: Address, key: U256) -> AaResult<U256> {
        Ok(self.state(state)?.nonces.get_nonce(sender, key))
    }

    pub fn settled_nonce(&self, state: &WorldState, sender: Address, key: U256) -> AaResult<U256> {
        Ok(self.state(state)?.nonces.settled_nonce(sender, key))
    }

    pub fn balance_of(&self, state: &WorldState, account: Address) -> AaResult<u64> {
        Ok(self.state(state)?.deposits.balance_of(account))
    }

    pub fn settled_balance_of(&self, state: &WorldState, account: Address) -> AaResult<u64> {
        Ok(self.state(state)?.deposits.settled_balance_of(account))
    }

    pub fn commitment(&self, state: &WorldState) -> AaResult<H256> {
        Ok(self.state(state)?.commitments.commitment)
    }

    pub fn settlements(&self, state: &WorldState) -> AaResult<u64> {
        Ok(self.state(state)?.commitments.settlements)
    }

    pub fn pending_updates(&self, state: &WorldState) -> AaResult<usize> {
        Ok(self.state(state)?.pending_updates())
    }

    pub fn settlement_input(&self, state: &WorldState) -> AaResult<SettlementPublicInput> {
        self.state(state)?.settlement_input(self.address)
    }

    pub fn get_user_op_hash(&self, op: &UserOperation) -> H256 {
        op.hash(self.address)
    }

    /// Takes `amount` from the transaction sender into custody and credits it
    /// to `account`'s deposit.
    pub fn deposit_to(&self, tx: &mut Tx<'_>, account: Address, amount: u64) -> AaResult<()> {
        let payer = tx.sender();
        tx.transfer(payer, self.address, amount)?;
        let balance = self.state_mut(tx)?.deposits.credit(account, amount)?;
        tx.emit(self.address, Event::Deposited { account, amount });
        tracing::info!(account = ?account, amount, balance, "deposit");
        Ok(())
    }

    /// Pays `amount` of `account`'s deposit to `recipient`, authorized by the
    /// owner's signature over the `Withdrawal` digest.
    pub fn withdraw_to(
        &self,
        tx: &mut Tx<'_>,
        account: Address,
        recipient: Address,
        amount: u64,
        signature: &EcdsaSignature,
    ) -> AaResult<()> {
        let digest = Withdrawal {
            account,
            recipient,
            amount,
        }
        .hash();
        AccountContract::at(account).verify_signature(
            tx.state(),
            tx.signatures(),
            digest,
            signature,
        )?;
        let balance = self.state_mut(tx)?.deposits.debit(account, amount)?;
        tx.transfer(self.address, recipient, amount)?;
        tx.emit(
            self.address,
            Event::Withdrawn {
                account,
                recipient,
                amount,
            },
        );
        tracing::info!(account = ?account, recipient = ?recipient, amount, balance, "withdrawal");
        Ok(())
    }

    /// Validates, executes and fee-settles `op`. Returns the operation hash.
    ///
    /// The fee is debited from the sender's deposit first. The account then
    /// checks the owner signature, consumes its nonce through
    /// [`EntryPoint::validate_and_update_nonce`] and performs the transfer.
    /// Finally the fee leaves custody for `beneficiary`. Any failure undoes
    /// all of it.
    pub fn handle_op(
        &self,
        tx: &mut Tx<'_>,
        op: &UserOperation,
        signature: &EcdsaSignature,
        beneficiary: Address,
    ) -> AaResult<H256> {
        self.state_mut(tx)?.deposits.debit(op.sender, op.fee)?;

        let account = AccountContract::at(op.sender);
        let user_op_hash =
            tx.call(self.address, |tx| account.validate_user_op_and_execute(tx, op, signature))?;

        tx.transfer(self.address, beneficiary, op.fee)?;
        tx.emit(
            self.address,
            Event::UserOperation {
                user_op_hash,
                sender: op.sender,
                key: op.key,
                nonce: op.nonce,
            },
        );
        tracing::info!(
            hash = ?user_op_hash,
            sender = ?op.sender,
            key = %op.key,
            nonce = %op.nonce,
            fee = op.fee,
            beneficiary = ?beneficiary,
            "user operation handled"
        );
        Ok(user_op_hash)
    }

    /// Consumes `nonce` on lane `(sender, key)`. Only `sender` itself may
    /// advance its lanes.
    pub fn validate_and_update_nonce(
        &self,
        tx: &mut Tx<'_>,
        sender: Address,
        key: U256,
        nonce: U256,
    ) -> AaResult<()> {
        if tx.caller() != sender {
            return Err(AaError::UnauthorizedCaller {
                caller: tx.caller(),
                account: sender,
            });
        }
        self.state_mut(tx)?
            .nonces
            .validate_and_update_nonce(sender, key, nonce)?;
        tracing::debug!(sender = ?sender, key = %key, nonce = %nonce, "nonce consumed");
        Ok(())
    }

    /// Skips the caller's next nonce on lane `key`, invalidating any signed
    /// operation that used it. Returns the new expected nonce.
    pub fn increment_nonce(&self, tx: &mut Tx<'_>, key: U256) -> AaResult<U256> {
        let sender = tx.caller();
        let next = self.state_mut(tx)?.nonces.increment(sender, key)?;
        tracing::debug!(sender = ?sender, key = %key, next = %next, "nonce incremented");
        Ok(next)
    }

    /// Folds the pending nonce and deposit writes into the commitment.
    pub fn settle(&self, tx: &mut Tx<'_>, proof: &SettlementProof) -> AaResult<H256> {
        let verifier = tx.proofs();
        let address = self.address;
        let state = self.state_mut(tx)?;
        let updates = state.pending_updates();
        let commitment = state.settle(address, proof, verifier)?;
        tracing::info!(entry_point = ?address, updates, commitment = ?commitment, "entry point settled");
        Ok(commitment)
    }
}
